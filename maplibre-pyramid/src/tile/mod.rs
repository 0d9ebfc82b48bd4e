//! Tiles: their identity, content, loading and layout.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::SystemTime,
};

use geo_types::Geometry;

use crate::{
    bucket::{Bucket, UploadPass},
    error::Error,
    io::{
        scheduler::{MailboxSender, Scheduler},
        source_client::{FileSource, Necessity, Resource, Response},
    },
    layout::{LayoutData, LayoutResult, TileSourceData},
    message::{Message, TileKey},
    style::{filter::Filter, layer::StyleLayer, source::DemEncoding},
    text::{
        glyph::{GlyphDependencies, GlyphMap},
        image_manager::ImageMap,
    },
    tile::{
        feature_index::{query_source_features, Feature, FeatureIndex},
        geometry_tile_data::GeometryTileData,
        tile_id::OverscaledTileID,
        tile_loader::{LoaderEvent, TileLoader},
        tile_worker::TileWorker,
    },
};

pub mod feature_index;
pub mod geojson_index;
pub mod geometry_tile_data;
pub mod tile_cache;
pub mod tile_cover;
mod tile_cover_impl;
pub mod tile_id;
pub mod tile_loader;
pub mod tile_range;
pub mod tile_worker;

/// What the bytes of a tile encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Vector,
    Raster,
    Dem(DemEncoding),
    GeoJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Loading,
    /// Data arrived and waits for its layout.
    Loaded,
    Parsing,
    Parsed,
    Errored,
    /// Abandoned. Answers and layouts still arriving are ignored.
    Obsolete,
}

/// How much of the tile can be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAvailability {
    None,
    /// Some layers are still waiting for glyphs or images.
    Some,
    All,
}

/// Collaborators shared by all tiles of a source.
#[derive(Clone)]
pub struct TileParameters {
    pub file_source: Arc<dyn FileSource>,
    pub scheduler: Arc<dyn Scheduler>,
    pub sender: MailboxSender<Message>,
    pub layers: Vec<Arc<StyleLayer>>,
    pub glyphs: Arc<GlyphMap>,
    pub images: Option<Arc<ImageMap>>,
}

/// The tile as seen by a [`TilePyramid`](crate::render::tile_pyramid::TilePyramid).
pub trait PyramidTile {
    fn id(&self) -> OverscaledTileID;
    /// Whether something can be drawn, possibly an older version or an empty tile.
    fn is_renderable(&self) -> bool;
    /// Whether the tile got an answer: data, no content or an error.
    fn is_loaded(&self) -> bool;
    /// Whether loading and layout are finished.
    fn is_complete(&self) -> bool;
    /// Whether the cache was already asked for the tile.
    fn tried_cache(&self) -> bool;
    fn necessity(&self) -> Necessity;
    fn set_necessity(&mut self, necessity: Necessity);
    fn set_layers(&mut self, layers: Vec<Arc<StyleLayer>>) -> Result<(), Error>;
}

pub struct Tile {
    key: TileKey,
    kind: TileKind,
    state: TileState,
    loader: Option<TileLoader>,
    worker: TileWorker,

    buckets: HashMap<String, Bucket>,
    feature_index: FeatureIndex,
    geometry: Option<Arc<GeometryTileData>>,
    glyph_dependencies: GlyphDependencies,
    image_dependencies: BTreeSet<String>,
    symbols_pending: bool,

    renderable: bool,
    error: Option<Error>,
}

impl Tile {
    /// A tile loaded through the file source.
    pub fn new(
        key: TileKey,
        kind: TileKind,
        resource: Resource,
        necessity: Necessity,
        parameters: &TileParameters,
    ) -> Self {
        let loader = TileLoader::new(
            key.clone(),
            resource,
            necessity,
            parameters.file_source.clone(),
            parameters.sender.clone(),
        );
        let mut tile = Self::without_loader(key, kind, parameters);
        tile.loader = Some(loader);
        tile
    }

    /// A tile whose data is at hand, like one cut from GeoJSON.
    pub fn with_data(
        key: TileKey,
        data: Arc<GeometryTileData>,
        parameters: &TileParameters,
    ) -> Result<Self, Error> {
        let mut tile = Self::without_loader(key, TileKind::GeoJson, parameters);
        tile.state = TileState::Loaded;
        tile.worker.set_data(TileSourceData::Geometry(data))?;
        tile.state = TileState::Parsing;
        Ok(tile)
    }

    fn without_loader(key: TileKey, kind: TileKind, parameters: &TileParameters) -> Self {
        let worker = TileWorker::new(
            key.clone(),
            parameters.scheduler.clone(),
            parameters.sender.clone(),
            parameters.layers.clone(),
            parameters.glyphs.clone(),
            parameters.images.clone(),
        );
        Self {
            key,
            kind,
            state: TileState::Loading,
            loader: None,
            worker,
            buckets: HashMap::new(),
            feature_index: FeatureIndex::new(),
            geometry: None,
            glyph_dependencies: GlyphDependencies::new(),
            image_dependencies: BTreeSet::new(),
            symbols_pending: false,
            renderable: false,
            error: None,
        }
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn kind(&self) -> TileKind {
        self.kind
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn availability(&self) -> DataAvailability {
        if !self.renderable {
            DataAvailability::None
        } else if self.symbols_pending || !self.worker.is_idle() {
            DataAvailability::Some
        } else {
            DataAvailability::All
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn modified(&self) -> Option<&str> {
        self.loader.as_ref().and_then(|loader| loader.modified())
    }

    pub fn expires(&self) -> Option<SystemTime> {
        self.loader.as_ref().and_then(|loader| loader.expires())
    }

    pub fn necessity(&self) -> Necessity {
        self.loader
            .as_ref()
            .map_or(Necessity::Required, |loader| loader.necessity())
    }

    pub fn bucket(&self, layer_id: &str) -> Option<&Bucket> {
        self.buckets.get(layer_id)
    }

    pub fn buckets(&self) -> &HashMap<String, Bucket> {
        &self.buckets
    }

    pub fn buckets_mut(&mut self) -> &mut HashMap<String, Bucket> {
        &mut self.buckets
    }

    /// Glyphs and images the symbol layers wait for, if any.
    pub fn pending_dependencies(&self) -> Option<(&GlyphDependencies, &BTreeSet<String>)> {
        self.symbols_pending
            .then_some((&self.glyph_dependencies, &self.image_dependencies))
    }

    /// Handles the answer to request `request_id` of the loader.
    pub fn on_response(&mut self, request_id: u64, response: Response) -> Result<(), Error> {
        if self.state == TileState::Obsolete {
            return Ok(());
        }
        let Some(loader) = self.loader.as_mut() else {
            return Ok(());
        };

        match loader.on_response(request_id, response) {
            LoaderEvent::Data(bytes) => {
                self.error = None;
                self.state = TileState::Loaded;
                let data = match self.kind {
                    TileKind::Vector | TileKind::GeoJson => TileSourceData::Vector(bytes),
                    TileKind::Raster => TileSourceData::Raster(bytes),
                    TileKind::Dem(encoding) => TileSourceData::Dem(bytes, encoding),
                };
                self.schedule(|worker| worker.set_data(data))
            }
            LoaderEvent::NoContent => {
                self.worker.clear_data();
                self.buckets.clear();
                self.feature_index = FeatureIndex::new();
                self.geometry = None;
                self.symbols_pending = false;
                self.renderable = true;
                self.state = TileState::Parsed;
                Ok(())
            }
            LoaderEvent::NotModified => {
                if self.state == TileState::Loading {
                    self.state = TileState::Parsed;
                }
                Ok(())
            }
            LoaderEvent::Pending | LoaderEvent::Stale => Ok(()),
            LoaderEvent::Error(error) => Err(self.set_error(error.into())),
        }
    }

    /// Applies the result of a layout. Results of abandoned layouts are ignored.
    pub fn on_layout(&mut self, result: LayoutResult) -> Result<(), Error> {
        if self.state == TileState::Obsolete {
            return Ok(());
        }
        let Some(result) = self.worker.on_layout(result) else {
            return Ok(());
        };

        match result.result {
            Ok(data) => self.apply_layout(data),
            Err(error) => return Err(self.set_error(error.into())),
        }

        self.schedule(|worker| worker.resume())?;
        self.state = if self.worker.is_idle() {
            TileState::Parsed
        } else {
            TileState::Parsing
        };
        Ok(())
    }

    fn apply_layout(&mut self, data: LayoutData) {
        let reloaded = self.renderable;
        let mut buckets = data.buckets;
        if reloaded {
            for bucket in buckets.values_mut().filter_map(Bucket::as_symbol_mut) {
                bucket.just_reloaded = true;
            }
        }
        for (layer_id, bucket) in self.buckets.drain() {
            if buckets.contains_key(&layer_id) {
                continue;
            }
            let keep = match bucket {
                // Symbol buckets of the previous layout stay until their layers are laid out
                // again.
                Bucket::Symbol(_) => data.symbols_pending,
                _ => data.symbols_only,
            };
            if keep {
                buckets.insert(layer_id, bucket);
            }
        }

        self.buckets = buckets;
        if !data.symbols_only {
            self.feature_index = data.feature_index;
            self.geometry = data.geometry;
        }
        self.glyph_dependencies = data.glyph_dependencies;
        self.image_dependencies = data.image_dependencies;
        self.symbols_pending = data.symbols_pending;
        self.renderable = true;
        self.error = None;
        log::debug!(
            "tile {} laid out with {} buckets",
            self.key.tile,
            self.buckets.len()
        );
    }

    pub fn on_glyphs_available(&mut self, glyphs: Arc<GlyphMap>) -> Result<(), Error> {
        self.schedule(|worker| worker.on_glyphs_available(glyphs))
    }

    pub fn on_images_available(&mut self, images: Arc<ImageMap>) -> Result<(), Error> {
        self.schedule(|worker| worker.on_images_available(images))
    }

    /// Abandons loading and layout. The tile is not used afterwards.
    pub fn cancel(&mut self) {
        if let Some(loader) = self.loader.as_mut() {
            loader.cancel();
        }
        self.worker.cancel();
        self.state = TileState::Obsolete;
    }

    /// Creates GPU resources of buckets which have none yet.
    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        for bucket in self.buckets.values_mut() {
            if bucket.needs_upload() {
                bucket.upload(pass);
            }
        }
    }

    /// Features of `layer_ids` rendered within `tolerance` of `query`, in tile units.
    pub fn query_rendered_features(
        &self,
        query: &Geometry<f64>,
        tolerance: f64,
        layer_ids: &[String],
        filter: Option<&Filter>,
    ) -> Result<Vec<Feature>, Error> {
        let Some(geometry) = &self.geometry else {
            return Ok(Vec::new());
        };
        Ok(self.feature_index.query_rendered_features(
            query,
            tolerance,
            layer_ids,
            geometry,
            self.key.tile,
            filter,
        )?)
    }

    pub fn query_source_features(
        &self,
        source_layer: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<Feature>, Error> {
        let Some(geometry) = &self.geometry else {
            return Ok(Vec::new());
        };
        Ok(query_source_features(
            geometry,
            source_layer,
            self.key.tile,
            filter,
        )?)
    }

    pub fn geometry(&self) -> Option<&Arc<GeometryTileData>> {
        self.geometry.as_ref()
    }

    fn set_error(&mut self, error: Error) -> Error {
        log::warn!("tile {} failed: {error}", self.key.tile);
        self.state = TileState::Errored;
        self.error = Some(error.clone());
        error
    }

    fn schedule<F, E>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut TileWorker) -> Result<(), E>,
        E: Into<Error>,
    {
        if self.state == TileState::Obsolete {
            return Ok(());
        }
        match f(&mut self.worker) {
            Ok(()) => {
                if !self.worker.is_idle() {
                    self.state = TileState::Parsing;
                }
                Ok(())
            }
            Err(error) => Err(self.set_error(error.into())),
        }
    }
}

impl PyramidTile for Tile {
    fn id(&self) -> OverscaledTileID {
        self.key.tile
    }

    fn is_renderable(&self) -> bool {
        self.renderable
    }

    fn is_loaded(&self) -> bool {
        self.renderable || self.state == TileState::Errored
    }

    fn is_complete(&self) -> bool {
        match self.state {
            TileState::Errored => true,
            TileState::Parsed => !self.symbols_pending,
            _ => false,
        }
    }

    fn tried_cache(&self) -> bool {
        // Tiles without a loader never look into the cache.
        self.loader.as_ref().map_or(false, |loader| loader.tried_cache())
    }

    fn necessity(&self) -> Necessity {
        Tile::necessity(self)
    }

    fn set_necessity(&mut self, necessity: Necessity) {
        if let Some(loader) = self.loader.as_mut() {
            loader.set_necessity(necessity);
            if loader.is_loading() && self.state == TileState::Errored {
                self.state = TileState::Loading;
            }
        }
    }

    fn set_layers(&mut self, layers: Vec<Arc<StyleLayer>>) -> Result<(), Error> {
        self.schedule(|worker| worker.set_layers(layers))
    }
}
