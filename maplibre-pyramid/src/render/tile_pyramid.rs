//! The tiles of one source which are needed for the current viewport.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

use geo_types::{Coord, Geometry};

use crate::{
    coords::{LatLngBounds, ScreenCoordinate, EXTENT},
    error::Error,
    io::source_client::Necessity,
    options::MapMode,
    render::transform_state::TransformState,
    style::{
        filter::Filter,
        layer::StyleLayer,
        source::{SourceType, ZoomRange},
    },
    tile::{
        feature_index::{query_geometry, Feature},
        tile_cache::TileCache,
        tile_cover::{covering_zoom_level, tile_cover_transform},
        tile_id::{OverscaledTileID, UnwrappedTileID},
        tile_range::TileRange,
        PyramidTile, Tile,
    },
};

/// Tiles kept per visible tile when the cache size is derived from the viewport.
const CACHE_TILES_PER_VIEWPORT_TILE: usize = 5;

/// Everything [`TilePyramid::update`] needs to know about the viewport and the source.
pub struct PyramidParameters<'a> {
    pub transform: &'a TransformState,
    pub map_mode: MapMode,
    pub source_type: SourceType,
    pub tile_size: u16,
    pub zoom_range: ZoomRange,
    /// Tiles outside of these bounds are never created.
    pub bounds: Option<LatLngBounds>,
    /// Fixed cache size. Zero derives the size from the viewport.
    pub tile_cache_size: usize,
    pub prefetch_zoom_delta: u8,
    /// Whether any layer of the source is visible at the current zoom.
    pub needs_rendering: bool,
    /// New layers to lay out the retained tiles with.
    pub relayout: Option<Vec<Arc<StyleLayer>>>,
}

/// Owns the tiles of a source: those in use and a cache of recently used ones.
///
/// Tiles which are not loaded yet are substituted by loaded parents or children. The tiles to
/// draw are referenced by their id in [`TilePyramid::rendered_tiles`].
pub struct TilePyramid<T> {
    tiles: BTreeMap<OverscaledTileID, T>,
    cache: TileCache<T>,
    rendered: BTreeMap<UnwrappedTileID, OverscaledTileID>,
}

impl<T: PyramidTile> Default for TilePyramid<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one pass over a set of ideal tiles.
struct Pass<'a> {
    data_zoom: u8,
    zoom_range: ZoomRange,
    range: Option<&'a TileRange>,
    /// Upper limit of the necessity of retained tiles.
    max_necessity: Necessity,
    render: bool,
}

impl<T: PyramidTile> TilePyramid<T> {
    pub fn new() -> Self {
        Self {
            tiles: BTreeMap::new(),
            cache: TileCache::new(0),
            rendered: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn cache(&self) -> &TileCache<T> {
        &self.cache
    }

    pub fn get_tile(&self, id: &OverscaledTileID) -> Option<&T> {
        self.tiles.get(id)
    }

    /// Finds a tile in use or in the cache. Cached tiles still receive their outstanding
    /// answers.
    pub fn get_tile_mut(&mut self, id: &OverscaledTileID) -> Option<&mut T> {
        match self.tiles.get_mut(id) {
            Some(tile) => Some(tile),
            None => self.cache.peek_mut(id),
        }
    }

    pub fn tiles(&self) -> impl Iterator<Item = &T> {
        self.tiles.values()
    }

    pub fn tiles_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.tiles.values_mut()
    }

    /// Tiles to draw, keyed by the position they are drawn at.
    pub fn rendered_tiles(&self) -> impl Iterator<Item = (UnwrappedTileID, &T)> {
        self.rendered
            .iter()
            .filter_map(|(position, id)| Some((*position, self.tiles.get(id)?)))
    }

    pub fn rendered_tiles_mut(&mut self) -> impl Iterator<Item = (UnwrappedTileID, &mut T)> {
        let positions: BTreeMap<OverscaledTileID, UnwrappedTileID> = self
            .rendered
            .iter()
            .map(|(position, id)| (*id, *position))
            .collect();
        self.tiles
            .iter_mut()
            .filter_map(move |(id, tile)| Some((*positions.get(id)?, tile)))
    }

    /// Whether every required tile finished loading and layout.
    pub fn is_loaded(&self) -> bool {
        self.tiles
            .values()
            .filter(|tile| tile.necessity() == Necessity::Required)
            .all(PyramidTile::is_complete)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Drops all tiles, for example when the source changed.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.cache.clear();
        self.rendered.clear();
    }

    /// Brings the tiles in line with the viewport.
    ///
    /// Ideal tiles are retained as required. Where they can not be drawn yet, loaded children
    /// one level down or the closest loaded parent are drawn instead. Tiles no longer needed move
    /// to the cache if they can be drawn and are dropped otherwise. `create_tile` makes tiles
    /// which are neither in use nor cached; it may decline.
    ///
    /// Returns the errors of tiles which could not be laid out again.
    #[tracing::instrument(skip_all)]
    pub fn update<F>(&mut self, parameters: PyramidParameters, mut create_tile: F) -> Vec<Error>
    where
        F: FnMut(&OverscaledTileID) -> Option<T>,
    {
        let mut errors = Vec::new();
        let relayout = parameters.relayout;

        if relayout.is_some() {
            self.cache.clear();
        }

        if !parameters.needs_rendering {
            if relayout.is_some() {
                self.tiles.clear();
            } else {
                for tile in self.tiles.values_mut() {
                    tile.set_necessity(Necessity::Optional);
                }
            }
            self.rendered.clear();
            return errors;
        }

        let transform = parameters.transform;
        let zoom_range = parameters.zoom_range;
        let overscaled_zoom = covering_zoom_level(
            transform.zoom(),
            parameters.source_type,
            parameters.tile_size,
        );

        let mut tile_zoom = overscaled_zoom.clamp(0, u8::MAX as i32) as u8;
        let mut ideal_tiles = Vec::new();
        let mut prefetch = None;

        if transform.valid() && overscaled_zoom >= zoom_range.min as i32 {
            let ideal_zoom = tile_zoom.min(zoom_range.max);

            // Raster tiles are not reparsed for overzoomed levels.
            if parameters.source_type == SourceType::Raster {
                tile_zoom = ideal_zoom;
            }

            if parameters.map_mode == MapMode::Continuous
                && parameters.source_type != SourceType::GeoJson
                && parameters.prefetch_zoom_delta > 0
            {
                let prefetch_zoom = tile_zoom
                    .saturating_sub(parameters.prefetch_zoom_delta)
                    .max(zoom_range.min);
                if prefetch_zoom < ideal_zoom {
                    prefetch = Some((prefetch_zoom, tile_cover_transform(transform, prefetch_zoom)));
                }
            }

            ideal_tiles = tile_cover_transform(transform, ideal_zoom);
        }

        let range = parameters.bounds.map(|bounds| {
            TileRange::from_bounds(
                &bounds,
                ZoomRange::new(zoom_range.min, tile_zoom.min(zoom_range.max)),
            )
        });

        let mut retained = BTreeSet::new();
        self.rendered.clear();

        self.update_renderables(
            &ideal_tiles,
            &Pass {
                data_zoom: tile_zoom,
                zoom_range,
                range: range.as_ref(),
                max_necessity: Necessity::Required,
                render: true,
            },
            &mut retained,
            &mut create_tile,
        );

        if let Some((prefetch_zoom, prefetch_tiles)) = prefetch {
            self.update_renderables(
                &prefetch_tiles,
                &Pass {
                    data_zoom: prefetch_zoom,
                    zoom_range,
                    range: range.as_ref(),
                    max_necessity: Necessity::Optional,
                    render: false,
                },
                &mut retained,
                &mut create_tile,
            );
        }

        let cache_size = if parameters.tile_cache_size > 0 {
            parameters.tile_cache_size
        } else {
            let tile_size = parameters.tile_size.max(1) as f64;
            ((transform.width() / tile_size).ceil() as usize + 1)
                * ((transform.height() / tile_size).ceil() as usize + 1)
                * CACHE_TILES_PER_VIEWPORT_TILE
        };
        self.cache.set_size(cache_size);

        let stale: Vec<OverscaledTileID> = self
            .tiles
            .keys()
            .filter(|id| !retained.contains(*id))
            .copied()
            .collect();
        for id in stale {
            let Some(mut tile) = self.tiles.remove(&id) else {
                continue;
            };
            if relayout.is_some() {
                continue;
            }
            tile.set_necessity(Necessity::Optional);
            if tile.is_renderable() {
                self.cache.add(id, tile);
            }
        }

        if let Some(layers) = relayout {
            for (id, tile) in self.tiles.iter_mut() {
                if let Err(error) = tile.set_layers(layers.clone()) {
                    log::warn!("relayout of tile {id} failed: {error}");
                    errors.push(error);
                }
            }
        }

        log::trace!(
            "{} tiles in use, {} rendered, {} cached",
            self.tiles.len(),
            self.rendered.len(),
            self.cache.len()
        );
        errors
    }

    /// Retains the tiles needed for `ideal_tiles` and records the ones to draw.
    fn update_renderables<F>(
        &mut self,
        ideal_tiles: &[UnwrappedTileID],
        pass: &Pass,
        retained: &mut BTreeSet<OverscaledTileID>,
        create_tile: &mut F,
    ) where
        F: FnMut(&OverscaledTileID) -> Option<T>,
    {
        let mut checked = HashSet::new();

        for ideal in ideal_tiles {
            let data_id = ideal.overscale_to(pass.data_zoom.max(ideal.canonical.z));
            if !self.ensure_tile(&data_id, pass.range, create_tile) {
                continue;
            }
            let Some(tile) = self.tiles.get(&data_id) else {
                continue;
            };

            if tile.is_renderable() {
                self.retain(&data_id, Necessity::Required, pass, retained);
                self.render(*ideal, data_id, pass);
                continue;
            }

            let mut parent_tried_cache = tile.tried_cache();
            let mut parent_loaded = tile.is_loaded();
            self.retain(&data_id, Necessity::Required, pass, retained);

            let mut covered = true;
            let child_zoom = data_id.overscaled_z.saturating_add(1);
            if child_zoom > pass.zoom_range.max {
                let child_id = data_id.scaled_to(child_zoom);
                if self.is_renderable(&child_id) {
                    self.retain(&child_id, Necessity::Optional, pass, retained);
                    self.render(*ideal, child_id, pass);
                } else {
                    covered = false;
                }
            } else {
                for child in data_id.canonical.children() {
                    let child_id = OverscaledTileID::new(child_zoom, data_id.wrap, child);
                    if self.is_renderable(&child_id) {
                        self.retain(&child_id, Necessity::Optional, pass, retained);
                        self.render(child_id.to_unwrapped(), child_id, pass);
                    } else {
                        covered = false;
                    }
                }
            }

            if covered {
                continue;
            }

            for z in (pass.zoom_range.min..data_id.overscaled_z).rev() {
                let parent_id = data_id.scaled_to(z);
                // Another ideal tile already walked up from here.
                if !checked.insert(parent_id) {
                    break;
                }

                let exists = self.tiles.contains_key(&parent_id)
                    || ((parent_tried_cache || parent_loaded)
                        && self.ensure_tile(&parent_id, pass.range, create_tile));
                if !exists {
                    continue;
                }

                // Parents of tiles which could not be loaded are needed for sure. Otherwise the
                // cache may have something to show in the meantime.
                let necessity = if parent_loaded {
                    Necessity::Required
                } else {
                    Necessity::Optional
                };
                self.retain(&parent_id, necessity, pass, retained);

                let Some(parent) = self.tiles.get(&parent_id) else {
                    break;
                };
                parent_tried_cache = parent.tried_cache();
                parent_loaded = parent.is_loaded();

                if parent.is_renderable() {
                    self.render(parent_id.to_unwrapped(), parent_id, pass);
                    break;
                }
            }
        }
    }

    /// Makes sure the tile with `id` is in use, taking it from the cache or creating it.
    fn ensure_tile<F>(
        &mut self,
        id: &OverscaledTileID,
        range: Option<&TileRange>,
        create_tile: &mut F,
    ) -> bool
    where
        F: FnMut(&OverscaledTileID) -> Option<T>,
    {
        if self.tiles.contains_key(id) {
            return true;
        }
        if range.map_or(false, |range| !range.contains(&id.canonical)) {
            return false;
        }

        let tile = match self.cache.pop(id) {
            Some(tile) => Some(tile),
            None => create_tile(id),
        };
        match tile {
            Some(tile) => {
                self.tiles.insert(*id, tile);
                true
            }
            None => false,
        }
    }

    fn is_renderable(&self, id: &OverscaledTileID) -> bool {
        self.tiles.get(id).map_or(false, PyramidTile::is_renderable)
    }

    /// The first pass retaining a tile decides its necessity.
    fn retain(
        &mut self,
        id: &OverscaledTileID,
        necessity: Necessity,
        pass: &Pass,
        retained: &mut BTreeSet<OverscaledTileID>,
    ) {
        if !retained.insert(*id) {
            return;
        }
        if let Some(tile) = self.tiles.get_mut(id) {
            tile.set_necessity(necessity.min(pass.max_necessity));
        }
    }

    fn render(&mut self, position: UnwrappedTileID, id: OverscaledTileID, pass: &Pass) {
        if pass.render {
            self.rendered.entry(position).or_insert(id);
        }
    }
}

impl TilePyramid<Tile> {
    /// Features of `layer_ids` under the screen geometry `query`. A single coordinate queries a
    /// point, more coordinates a polygon. `tolerance` is given in pixels.
    pub fn query_rendered_features(
        &self,
        query: &[ScreenCoordinate],
        transform: &TransformState,
        tolerance: f64,
        layer_ids: &[String],
        filter: Option<&Filter>,
    ) -> Result<Vec<Feature>, Error> {
        let mut features = Vec::new();
        for (position, tile) in self.rendered_tiles() {
            let Some(geometry) = screen_to_tile(query, transform, &position) else {
                continue;
            };
            let tolerance = position.pixels_to_tile_units(tolerance, transform.zoom());
            features.extend(tile.query_rendered_features(&geometry, tolerance, layer_ids, filter)?);
        }
        Ok(features)
    }

    /// Features of `source_layer` in all tiles in use, whether rendered or not.
    pub fn query_source_features(
        &self,
        source_layer: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Feature>, Error> {
        let mut features = Vec::new();
        for tile in self.tiles.values() {
            features.extend(tile.query_source_features(source_layer, filter)?);
        }
        Ok(features)
    }
}

/// Converts screen coordinates into tile units of the tile drawn at `position`.
fn screen_to_tile(
    query: &[ScreenCoordinate],
    transform: &TransformState,
    position: &UnwrappedTileID,
) -> Option<Geometry<f64>> {
    let coords = query
        .iter()
        .map(|point| {
            let coordinate =
                transform.screen_coordinate_to_tile_coordinate(point, position.canonical.z)?;
            Some(Coord {
                x: (coordinate.x - position.unwrapped_x() as f64) * EXTENT,
                y: (coordinate.y - position.canonical.y as f64) * EXTENT,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    query_geometry(coords)
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::HashSet, sync::Arc};

    use crate::{
        coords::{LatLng, LatLngBounds},
        error::Error,
        io::source_client::Necessity,
        options::MapMode,
        render::{
            tile_pyramid::{PyramidParameters, TilePyramid},
            transform_state::{CameraOptions, TransformState},
        },
        style::{
            layer::StyleLayer,
            source::{SourceType, ZoomRange},
        },
        tile::{
            tile_id::{OverscaledTileID, UnwrappedTileID},
            PyramidTile,
        },
    };

    struct FakeTile {
        id: OverscaledTileID,
        renderable: bool,
        tried_cache: bool,
        necessity: Necessity,
        relayouts: usize,
    }

    impl FakeTile {
        fn new(id: &OverscaledTileID, renderable: bool, tried_cache: bool) -> Self {
            Self {
                id: *id,
                renderable,
                tried_cache,
                necessity: Necessity::Optional,
                relayouts: 0,
            }
        }
    }

    impl PyramidTile for FakeTile {
        fn id(&self) -> OverscaledTileID {
            self.id
        }

        fn is_renderable(&self) -> bool {
            self.renderable
        }

        fn is_loaded(&self) -> bool {
            self.renderable
        }

        fn is_complete(&self) -> bool {
            self.renderable
        }

        fn tried_cache(&self) -> bool {
            self.tried_cache
        }

        fn necessity(&self) -> Necessity {
            self.necessity
        }

        fn set_necessity(&mut self, necessity: Necessity) {
            self.necessity = necessity;
        }

        fn set_layers(&mut self, _layers: Vec<Arc<StyleLayer>>) -> Result<(), Error> {
            self.relayouts += 1;
            Ok(())
        }
    }

    fn transform(size: f64, center: LatLng, zoom: f64) -> TransformState {
        let mut transform = TransformState::new(size, size);
        transform.jump_to(&CameraOptions::default().with_center(center).with_zoom(zoom));
        transform
    }

    fn parameters(transform: &TransformState) -> PyramidParameters {
        PyramidParameters {
            transform,
            map_mode: MapMode::Static,
            source_type: SourceType::Vector,
            tile_size: 512,
            zoom_range: ZoomRange::new(0, 14),
            bounds: None,
            tile_cache_size: 0,
            prefetch_zoom_delta: 4,
            needs_rendering: true,
            relayout: None,
        }
    }

    fn ids(pyramid: &TilePyramid<FakeTile>) -> HashSet<OverscaledTileID> {
        pyramid.tiles().map(PyramidTile::id).collect()
    }

    fn rendered(pyramid: &TilePyramid<FakeTile>) -> Vec<UnwrappedTileID> {
        pyramid.rendered_tiles().map(|(position, _)| position).collect()
    }

    #[test]
    fn ideal_tiles_are_required() {
        let transform = transform(512.0, LatLng::new(0.0, 0.0), 1.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(parameters(&transform), |id| Some(FakeTile::new(id, false, false)));

        assert_eq!(
            ids(&pyramid),
            HashSet::from([
                OverscaledTileID::from_zxy(1, 0, 0),
                OverscaledTileID::from_zxy(1, 0, 1),
                OverscaledTileID::from_zxy(1, 1, 0),
                OverscaledTileID::from_zxy(1, 1, 1),
            ])
        );
        assert!(pyramid
            .tiles()
            .all(|tile| tile.necessity == Necessity::Required));
        assert!(rendered(&pyramid).is_empty());
        assert!(!pyramid.is_loaded());
    }

    #[test]
    fn loaded_parents_stand_in() {
        let transform = transform(512.0, LatLng::new(0.0, 0.0), 1.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(parameters(&transform), |id| {
            Some(FakeTile::new(id, id.canonical.z == 0, true))
        });

        let root = OverscaledTileID::from_zxy(0, 0, 0);
        assert_eq!(pyramid.len(), 5);
        assert_eq!(rendered(&pyramid), vec![root.to_unwrapped()]);
        // The children did not fail yet, so the parent is only asked from the cache.
        assert_eq!(pyramid.get_tile(&root).unwrap().necessity, Necessity::Optional);
    }

    #[test]
    fn loaded_children_stand_in() {
        let mut pyramid = TilePyramid::new();
        let zoomed_in = transform(256.0, LatLng::new(0.0, 0.0), 1.0);
        pyramid.update(parameters(&zoomed_in), |id| Some(FakeTile::new(id, true, true)));
        assert_eq!(rendered(&pyramid).len(), 4);

        let zoomed_out = transform(256.0, LatLng::new(0.0, 0.0), 0.0);
        pyramid.update(parameters(&zoomed_out), |id| Some(FakeTile::new(id, false, false)));

        let positions = rendered(&pyramid);
        assert_eq!(positions.len(), 4);
        assert!(positions.iter().all(|position| position.canonical.z == 1));
        assert_eq!(pyramid.len(), 5);
        let root = OverscaledTileID::from_zxy(0, 0, 0);
        assert_eq!(pyramid.get_tile(&root).unwrap().necessity, Necessity::Required);
        assert!(pyramid
            .tiles()
            .filter(|tile| tile.id != root)
            .all(|tile| tile.necessity == Necessity::Optional));
        // Children stand in but only the root is required.
        assert!(!pyramid.is_loaded());
    }

    #[test]
    fn tiles_out_of_view_are_cached() {
        let created = Cell::new(0);
        let create = |id: &OverscaledTileID| {
            created.set(created.get() + 1);
            Some(FakeTile::new(id, true, true))
        };

        let mut pyramid = TilePyramid::new();
        let equator = transform(256.0, LatLng::new(0.0, 0.0), 2.0);
        pyramid.update(parameters(&equator), create);
        assert_eq!(created.get(), 4);
        assert!(pyramid.is_loaded());

        let north = transform(256.0, LatLng::new(60.0, -150.0), 2.0);
        pyramid.update(parameters(&north), create);
        assert_eq!(created.get(), 6);
        assert_eq!(pyramid.len(), 2);
        assert_eq!(pyramid.cache().len(), 4);
        assert_eq!(pyramid.cache().size(), 20);

        pyramid.update(parameters(&equator), create);
        assert_eq!(created.get(), 6);
        assert_eq!(pyramid.len(), 4);
        assert!(pyramid
            .tiles()
            .all(|tile| tile.necessity == Necessity::Required));
    }

    #[test]
    fn unrenderable_tiles_are_dropped() {
        let mut pyramid = TilePyramid::new();
        let equator = transform(256.0, LatLng::new(0.0, 0.0), 2.0);
        pyramid.update(parameters(&equator), |id| Some(FakeTile::new(id, false, false)));
        let north = transform(256.0, LatLng::new(60.0, -150.0), 2.0);
        pyramid.update(parameters(&north), |id| Some(FakeTile::new(id, false, false)));
        assert_eq!(pyramid.len(), 2);
        assert!(pyramid.cache().is_empty());
    }

    #[test]
    fn tiles_outside_bounds_are_not_created() {
        let transform = transform(256.0, LatLng::new(0.0, 0.0), 2.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(
            PyramidParameters {
                bounds: Some(LatLngBounds::hull(
                    LatLng::new(37.0, -123.0),
                    LatLng::new(38.0, -122.0),
                )),
                ..parameters(&transform)
            },
            |id| Some(FakeTile::new(id, true, true)),
        );
        assert!(pyramid.is_empty());
    }

    #[test]
    fn vector_tiles_are_overscaled() {
        let transform = transform(256.0, LatLng::new(0.0, 0.0), 3.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(
            PyramidParameters {
                zoom_range: ZoomRange::new(0, 1),
                ..parameters(&transform)
            },
            |id| Some(FakeTile::new(id, true, true)),
        );
        assert!(!pyramid.is_empty());
        assert!(pyramid
            .tiles()
            .all(|tile| tile.id.overscaled_z == 3 && tile.id.canonical.z == 1));

        let mut raster = TilePyramid::new();
        raster.update(
            PyramidParameters {
                zoom_range: ZoomRange::new(0, 1),
                source_type: SourceType::Raster,
                ..parameters(&transform)
            },
            |id| Some(FakeTile::new(id, true, true)),
        );
        assert!(raster.tiles().all(|tile| tile.id.overscaled_z == 1));
    }

    #[test]
    fn continuous_maps_prefetch_parents() {
        let transform = transform(256.0, LatLng::new(0.0, 0.0), 6.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(
            PyramidParameters {
                map_mode: MapMode::Continuous,
                ..parameters(&transform)
            },
            |id| Some(FakeTile::new(id, false, false)),
        );
        let prefetched: Vec<&FakeTile> = pyramid
            .tiles()
            .filter(|tile| tile.id.canonical.z == 2)
            .collect();
        assert!(!prefetched.is_empty());
        assert!(prefetched
            .iter()
            .all(|tile| tile.necessity == Necessity::Optional));
        // Prefetched tiles are not drawn.
        assert!(rendered(&pyramid).is_empty());

        let mut still = TilePyramid::new();
        still.update(parameters(&transform), |id| Some(FakeTile::new(id, false, false)));
        assert!(still.tiles().all(|tile| tile.id.canonical.z == 6));
    }

    #[test]
    fn hidden_sources_release_their_tiles() {
        let transform = transform(256.0, LatLng::new(0.0, 0.0), 2.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(parameters(&transform), |id| Some(FakeTile::new(id, true, true)));
        pyramid.update(
            PyramidParameters {
                needs_rendering: false,
                ..parameters(&transform)
            },
            |id| Some(FakeTile::new(id, true, true)),
        );
        assert_eq!(pyramid.len(), 4);
        assert!(rendered(&pyramid).is_empty());
        assert!(pyramid
            .tiles()
            .all(|tile| tile.necessity == Necessity::Optional));
    }

    #[test]
    fn relayout_reaches_retained_tiles() {
        let transform = transform(256.0, LatLng::new(0.0, 0.0), 2.0);
        let mut pyramid = TilePyramid::new();
        pyramid.update(parameters(&transform), |id| Some(FakeTile::new(id, true, true)));
        let errors = pyramid.update(
            PyramidParameters {
                relayout: Some(Vec::new()),
                ..parameters(&transform)
            },
            |id| Some(FakeTile::new(id, true, true)),
        );
        assert!(errors.is_empty());
        assert!(pyramid.tiles().all(|tile| tile.relayouts == 1));
    }
}
