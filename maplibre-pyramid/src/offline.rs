//! Regions of the map to be made available offline, and the tiles they consist of.

use geo_types::Geometry;
use thiserror::Error;

use crate::{
    coords::LatLngBounds,
    style::source::{SourceType, ZoomRange},
    tile::{
        tile_cover::{
            covering_zoom_level, tile_count, tile_count_geometry, TileCover, TileCoverError,
        },
        tile_id::CanonicalTileID,
    },
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OfflineRegionError {
    #[error("invalid zoom range {min}..={max}")]
    InvalidZoomRange { min: f64, max: f64 },
    #[error("invalid pixel ratio {0}")]
    InvalidPixelRatio(f64),
    #[error(transparent)]
    Geometry(#[from] TileCoverError),
}

fn validate(min_zoom: f64, max_zoom: f64, pixel_ratio: f64) -> Result<(), OfflineRegionError> {
    // `max_zoom` may be infinite to include every zoom level of a source.
    if min_zoom.is_nan() || max_zoom.is_nan() || min_zoom < 0.0 || min_zoom > max_zoom {
        return Err(OfflineRegionError::InvalidZoomRange {
            min: min_zoom,
            max: max_zoom,
        });
    }
    if !pixel_ratio.is_finite() || pixel_ratio <= 0.0 {
        return Err(OfflineRegionError::InvalidPixelRatio(pixel_ratio));
    }
    Ok(())
}

/// A rectangular region over a range of zoom levels.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineTilePyramidRegionDefinition {
    pub style_url: String,
    pub bounds: LatLngBounds,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub pixel_ratio: f64,
    pub include_ideographs: bool,
}

impl OfflineTilePyramidRegionDefinition {
    pub fn new(
        style_url: &str,
        bounds: LatLngBounds,
        min_zoom: f64,
        max_zoom: f64,
        pixel_ratio: f64,
        include_ideographs: bool,
    ) -> Result<Self, OfflineRegionError> {
        validate(min_zoom, max_zoom, pixel_ratio)?;
        Ok(Self {
            style_url: style_url.to_string(),
            bounds,
            min_zoom,
            max_zoom,
            pixel_ratio,
            include_ideographs,
        })
    }
}

/// A region following an arbitrary geometry in longitude/latitude over a range of zoom levels.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineGeometryRegionDefinition {
    pub style_url: String,
    pub geometry: Geometry<f64>,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub pixel_ratio: f64,
    pub include_ideographs: bool,
}

impl OfflineGeometryRegionDefinition {
    pub fn new(
        style_url: &str,
        geometry: Geometry<f64>,
        min_zoom: f64,
        max_zoom: f64,
        pixel_ratio: f64,
        include_ideographs: bool,
    ) -> Result<Self, OfflineRegionError> {
        validate(min_zoom, max_zoom, pixel_ratio)?;
        Ok(Self {
            style_url: style_url.to_string(),
            geometry,
            min_zoom,
            max_zoom,
            pixel_ratio,
            include_ideographs,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OfflineRegionDefinition {
    TilePyramid(OfflineTilePyramidRegionDefinition),
    Geometry(OfflineGeometryRegionDefinition),
}

impl From<OfflineTilePyramidRegionDefinition> for OfflineRegionDefinition {
    fn from(definition: OfflineTilePyramidRegionDefinition) -> Self {
        OfflineRegionDefinition::TilePyramid(definition)
    }
}

impl From<OfflineGeometryRegionDefinition> for OfflineRegionDefinition {
    fn from(definition: OfflineGeometryRegionDefinition) -> Self {
        OfflineRegionDefinition::Geometry(definition)
    }
}

impl OfflineRegionDefinition {
    pub fn style_url(&self) -> &str {
        match self {
            OfflineRegionDefinition::TilePyramid(definition) => &definition.style_url,
            OfflineRegionDefinition::Geometry(definition) => &definition.style_url,
        }
    }

    pub fn pixel_ratio(&self) -> f64 {
        match self {
            OfflineRegionDefinition::TilePyramid(definition) => definition.pixel_ratio,
            OfflineRegionDefinition::Geometry(definition) => definition.pixel_ratio,
        }
    }

    pub fn include_ideographs(&self) -> bool {
        match self {
            OfflineRegionDefinition::TilePyramid(definition) => definition.include_ideographs,
            OfflineRegionDefinition::Geometry(definition) => definition.include_ideographs,
        }
    }

    fn zoom_range(&self) -> (f64, f64) {
        match self {
            OfflineRegionDefinition::TilePyramid(definition) => {
                (definition.min_zoom, definition.max_zoom)
            }
            OfflineRegionDefinition::Geometry(definition) => {
                (definition.min_zoom, definition.max_zoom)
            }
        }
    }

    /// Tile zoom levels of a source with `tile_size` and `zoom_range` needed to display the
    /// region. `None` if the source has no tiles at the zoom levels of the region.
    pub fn covering_zoom_range(
        &self,
        source_type: SourceType,
        tile_size: u16,
        zoom_range: ZoomRange,
    ) -> Option<ZoomRange> {
        let (min_zoom, max_zoom) = self.zoom_range();
        let min = covering_zoom_level(min_zoom, source_type, tile_size).max(zoom_range.min as i32);
        let max = if max_zoom.is_finite() {
            covering_zoom_level(max_zoom, source_type, tile_size).min(zoom_range.max as i32)
        } else {
            zoom_range.max as i32
        };
        (min <= max && min >= 0).then(|| ZoomRange::new(min as u8, max as u8))
    }

    /// Tiles of a source needed to display the region, by ascending zoom level.
    pub fn tile_cover(
        &self,
        source_type: SourceType,
        tile_size: u16,
        zoom_range: ZoomRange,
    ) -> Result<Vec<CanonicalTileID>, OfflineRegionError> {
        let Some(range) = self.covering_zoom_range(source_type, tile_size, zoom_range) else {
            return Ok(Vec::new());
        };

        let mut tiles = Vec::new();
        for z in range.min..=range.max {
            let cover = match self {
                OfflineRegionDefinition::TilePyramid(definition) => {
                    TileCover::from_bounds(&definition.bounds, z)
                }
                OfflineRegionDefinition::Geometry(definition) => {
                    TileCover::from_geometry(&definition.geometry, z)?
                }
            };
            tiles.extend(cover.map(|tile| tile.canonical));
        }
        Ok(tiles)
    }

    /// Number of tiles [`OfflineRegionDefinition::tile_cover`] returns.
    pub fn tile_count(
        &self,
        source_type: SourceType,
        tile_size: u16,
        zoom_range: ZoomRange,
    ) -> Result<u64, OfflineRegionError> {
        let Some(range) = self.covering_zoom_range(source_type, tile_size, zoom_range) else {
            return Ok(0);
        };

        let mut count = 0;
        for z in range.min..=range.max {
            count += match self {
                OfflineRegionDefinition::TilePyramid(definition) => {
                    tile_count(&definition.bounds, z)
                }
                OfflineRegionDefinition::Geometry(definition) => {
                    tile_count_geometry(&definition.geometry, z)?
                }
            };
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{polygon, Geometry};

    use crate::{
        coords::{LatLng, LatLngBounds},
        offline::{
            OfflineGeometryRegionDefinition, OfflineRegionDefinition, OfflineRegionError,
            OfflineTilePyramidRegionDefinition,
        },
        style::source::{SourceType, ZoomRange},
        tile::tile_id::CanonicalTileID,
    };

    fn san_francisco() -> LatLngBounds {
        LatLngBounds::hull(
            LatLng::new(37.6609, -122.5744),
            LatLng::new(37.8271, -122.3204),
        )
    }

    fn region(min_zoom: f64, max_zoom: f64) -> OfflineRegionDefinition {
        OfflineTilePyramidRegionDefinition::new("", san_francisco(), min_zoom, max_zoom, 1.0, false)
            .unwrap()
            .into()
    }

    #[test]
    fn covers_san_francisco() {
        let region = region(2.0, 2.0);
        let tiles = region
            .tile_cover(SourceType::Vector, 512, ZoomRange::new(0, 22))
            .unwrap();
        assert_eq!(tiles, vec![CanonicalTileID::new(2, 0, 1)]);
        assert_eq!(
            region
                .tile_count(SourceType::Vector, 512, ZoomRange::new(0, 22))
                .unwrap(),
            1
        );
    }

    #[test]
    fn source_zoom_range_limits_the_cover() {
        let region = region(2.0, 2.0);
        assert_eq!(
            region.covering_zoom_range(SourceType::Vector, 512, ZoomRange::new(3, 22)),
            None
        );
        assert!(region
            .tile_cover(SourceType::Vector, 512, ZoomRange::new(3, 22))
            .unwrap()
            .is_empty());
        assert_eq!(
            region
                .tile_count(SourceType::Vector, 512, ZoomRange::new(3, 22))
                .unwrap(),
            0
        );
    }

    #[test]
    fn small_tiles_need_higher_zoom_levels() {
        let region = region(2.0, 3.0);
        assert_eq!(
            region.covering_zoom_range(SourceType::Raster, 256, ZoomRange::new(0, 22)),
            Some(ZoomRange::new(3, 4))
        );
    }

    #[test]
    fn unbounded_regions_reach_the_source_max_zoom() {
        let region = region(0.0, f64::INFINITY);
        assert_eq!(
            region.covering_zoom_range(SourceType::Vector, 512, ZoomRange::new(0, 14)),
            Some(ZoomRange::new(0, 14))
        );
    }

    #[test]
    fn rejects_inverted_zoom_ranges() {
        assert!(matches!(
            OfflineTilePyramidRegionDefinition::new("", san_francisco(), 5.0, 4.0, 1.0, false),
            Err(OfflineRegionError::InvalidZoomRange { .. })
        ));
        assert!(matches!(
            OfflineTilePyramidRegionDefinition::new("", san_francisco(), 0.0, 4.0, 0.0, false),
            Err(OfflineRegionError::InvalidPixelRatio(_))
        ));
    }

    #[test]
    fn geometry_regions_count_their_tiles() {
        let geometry = Geometry::Polygon(polygon![
            (x: -122.5744, y: 37.6609),
            (x: -122.3204, y: 37.6609),
            (x: -122.3204, y: 37.8271),
            (x: -122.5744, y: 37.8271),
            (x: -122.5744, y: 37.6609),
        ]);
        let region: OfflineRegionDefinition =
            OfflineGeometryRegionDefinition::new("", geometry, 10.0, 10.0, 1.0, false)
                .unwrap()
                .into();
        let tiles = region
            .tile_cover(SourceType::Vector, 512, ZoomRange::new(0, 22))
            .unwrap();
        assert_eq!(tiles.len() as u64, region
            .tile_count(SourceType::Vector, 512, ZoomRange::new(0, 22))
            .unwrap());
        assert!(tiles.contains(&CanonicalTileID::new(10, 163, 395)));
    }
}
