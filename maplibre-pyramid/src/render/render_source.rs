//! A source of the style together with the tiles loaded for it.

use std::sync::Arc;

use crate::{
    error::{Error, ParseError},
    io::{
        scheduler::MailboxSender,
        source_client::{AsyncRequest, FileSource, Necessity, Resource, Response},
    },
    message::{Message, TileKey, TileMessage},
    options::MapOptions,
    render::{
        tile_pyramid::{PyramidParameters, TilePyramid},
        transform_state::TransformState,
    },
    style::{
        layer::StyleLayer,
        source::{GeoJsonData, Source},
    },
    text::{
        glyph::GlyphMap,
        glyph_manager::GlyphManager,
        image_manager::{ImageManager, ImageMap},
    },
    tile::{
        geojson_index::{GeoJsonIndex, DEFAULT_BUFFER},
        tile_id::OverscaledTileID,
        Tile, TileKind, TileParameters,
    },
};

/// Managers and channels tiles need to resolve the glyphs and images of their labels.
pub struct DependencyContext<'a> {
    pub glyphs: &'a mut GlyphManager,
    pub images: &'a mut ImageManager,
    pub file_source: &'a dyn FileSource,
    pub sender: &'a MailboxSender<Message>,
}

enum GeoJsonState {
    /// Not a GeoJSON source.
    None,
    Loading(Option<AsyncRequest>),
    Loaded(Arc<GeoJsonIndex>),
    Failed,
}

/// Binds a style source to its [`TilePyramid`] and routes messages to its tiles.
pub struct RenderSource {
    id: String,
    source: Source,
    layers: Vec<Arc<StyleLayer>>,
    pyramid: TilePyramid<Tile>,
    geojson: GeoJsonState,
    needs_relayout: bool,
}

impl RenderSource {
    /// Inline GeoJSON is indexed right away. Sources referencing GeoJSON by URL wait for
    /// [`RenderSource::load`].
    pub fn new(id: &str, source: Source, layers: Vec<Arc<StyleLayer>>) -> Result<Self, Error> {
        let geojson = match &source {
            Source::GeoJson(geojson) => match &geojson.data {
                GeoJsonData::Inline(value) => GeoJsonState::Loaded(Arc::new(
                    GeoJsonIndex::from_value(
                        value,
                        source.zoom_range().max,
                        geojson.buffer.unwrap_or(DEFAULT_BUFFER),
                    )?,
                )),
                GeoJsonData::Url(_) => GeoJsonState::Loading(None),
            },
            _ => GeoJsonState::None,
        };

        Ok(Self {
            id: id.to_string(),
            source,
            layers,
            pyramid: TilePyramid::new(),
            geojson,
            needs_relayout: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn layers(&self) -> &[Arc<StyleLayer>] {
        &self.layers
    }

    pub fn pyramid(&self) -> &TilePyramid<Tile> {
        &self.pyramid
    }

    pub fn pyramid_mut(&mut self) -> &mut TilePyramid<Tile> {
        &mut self.pyramid
    }

    /// Replaces the layers drawing this source. Tiles are laid out again on the next update.
    pub fn set_layers(&mut self, layers: Vec<Arc<StyleLayer>>) {
        self.layers = layers;
        self.needs_relayout = true;
    }

    /// Requests the data of GeoJSON sources referenced by URL.
    pub fn load(&mut self, file_source: &dyn FileSource, sender: &MailboxSender<Message>) {
        let Source::GeoJson(geojson) = &self.source else {
            return;
        };
        let GeoJsonData::Url(url) = &geojson.data else {
            return;
        };
        if !matches!(self.geojson, GeoJsonState::Loading(None)) {
            return;
        }

        log::debug!("loading GeoJSON of source {} from {url}", self.id);
        let source_id = self.id.clone();
        let sender = sender.clone();
        let request = file_source.request(
            Resource::source(url),
            Box::new(move |response| {
                sender.send(Message::Source {
                    source_id,
                    response,
                });
            }),
        );
        self.geojson = GeoJsonState::Loading(Some(request));
    }

    /// Indexes GeoJSON data which arrived for this source. Tiles are cut again from the new data.
    pub fn on_source_response(&mut self, response: Response) -> Result<(), Error> {
        let Source::GeoJson(geojson) = &self.source else {
            return Ok(());
        };

        let result = match (response.error, response.data) {
            (Some(error), _) => Err(Error::from(error)),
            (None, Some(data)) => std::str::from_utf8(&data)
                .map_err(|error| ParseError::GeoJson(error.to_string()))
                .and_then(|json| {
                    GeoJsonIndex::parse(
                        json,
                        self.source.zoom_range().max,
                        geojson.buffer.unwrap_or(DEFAULT_BUFFER),
                    )
                })
                .map_err(Error::from),
            (None, None) => Err(ParseError::GeoJson("empty response".to_string()).into()),
        };

        match result {
            Ok(index) => {
                log::debug!("source {} indexed {} features", self.id, index.len());
                self.geojson = GeoJsonState::Loaded(Arc::new(index));
                self.pyramid.clear();
                Ok(())
            }
            Err(error) => {
                log::warn!("failed to load source {}: {error}", self.id);
                self.geojson = GeoJsonState::Failed;
                Err(error)
            }
        }
    }

    /// Whether the source data and all required tiles are loaded.
    pub fn is_loaded(&self) -> bool {
        match self.geojson {
            GeoJsonState::Loading(_) => false,
            GeoJsonState::Failed => true,
            GeoJsonState::None | GeoJsonState::Loaded(_) => self.pyramid.is_loaded(),
        }
    }

    fn needs_rendering(&self, zoom: f64) -> bool {
        let has_data = !matches!(
            self.geojson,
            GeoJsonState::Loading(_) | GeoJsonState::Failed
        );
        has_data && self.layers.iter().any(|layer| layer.is_visible_at(zoom))
    }

    /// Updates the tiles of this source for the viewport of `transform`.
    ///
    /// `parameters` carry the collaborators shared by all sources; the layers are replaced by
    /// the layers of this source.
    #[tracing::instrument(skip_all, fields(source = %self.id))]
    pub fn update(
        &mut self,
        transform: &TransformState,
        options: &MapOptions,
        parameters: &TileParameters,
    ) -> Vec<Error> {
        let parameters = TileParameters {
            layers: self.layers.clone(),
            ..parameters.clone()
        };
        let relayout = std::mem::take(&mut self.needs_relayout).then(|| self.layers.clone());

        let pyramid_parameters = PyramidParameters {
            transform,
            map_mode: options.map_mode,
            source_type: self.source.source_type(),
            tile_size: self.source.tile_size(),
            zoom_range: self.source.zoom_range(),
            bounds: self.source.bounds(),
            tile_cache_size: options.tile_cache_size,
            prefetch_zoom_delta: options.prefetch_zoom_delta,
            needs_rendering: self.needs_rendering(transform.zoom()),
            relayout,
        };

        let mut errors = Vec::new();
        let source_id = &self.id;
        let source = &self.source;
        let geojson = match &self.geojson {
            GeoJsonState::Loaded(index) => Some(index.clone()),
            _ => None,
        };
        let pixel_ratio = options.pixel_ratio;

        let mut relayout_errors = self.pyramid.update(pyramid_parameters, |id| {
            match create_tile(source_id, source, geojson.as_deref(), id, pixel_ratio, &parameters) {
                Ok(tile) => tile,
                Err(error) => {
                    errors.push(error);
                    None
                }
            }
        });
        errors.append(&mut relayout_errors);
        errors
    }

    /// Delivers a message addressed to one of the tiles of this source. Messages for tiles which
    /// are gone are dropped.
    pub fn on_tile_message(
        &mut self,
        tile_id: &OverscaledTileID,
        message: TileMessage,
        context: &mut DependencyContext,
    ) -> Result<(), Error> {
        let Some(tile) = self.pyramid.get_tile_mut(tile_id) else {
            log::trace!("dropping message for released tile {tile_id}");
            return Ok(());
        };

        match message {
            TileMessage::Response {
                request_id,
                response,
            } => tile.on_response(request_id, response),
            TileMessage::Layout(result) => {
                tile.on_layout(*result)?;
                request_dependencies(tile, context)
            }
        }
    }

    pub fn on_glyphs_available(
        &mut self,
        tile_id: &OverscaledTileID,
        glyphs: Arc<GlyphMap>,
    ) -> Result<(), Error> {
        match self.pyramid.get_tile_mut(tile_id) {
            Some(tile) => tile.on_glyphs_available(glyphs),
            None => Ok(()),
        }
    }

    pub fn on_images_available(
        &mut self,
        tile_id: &OverscaledTileID,
        images: Arc<ImageMap>,
    ) -> Result<(), Error> {
        match self.pyramid.get_tile_mut(tile_id) {
            Some(tile) => tile.on_images_available(images),
            None => Ok(()),
        }
    }
}

/// Makes a tile of `source`. Sources without tile URLs have no tiles.
fn create_tile(
    source_id: &str,
    source: &Source,
    geojson: Option<&GeoJsonIndex>,
    id: &OverscaledTileID,
    pixel_ratio: f64,
    parameters: &TileParameters,
) -> Result<Option<Tile>, Error> {
    let key = TileKey::new(source_id, *id);

    if let Source::GeoJson(_) = source {
        let Some(index) = geojson else {
            return Ok(None);
        };
        let data = index.get_tile(&id.canonical);
        return Tile::with_data(key, Arc::new(data), parameters).map(Some);
    }

    let Some(tile_set) = source.tile_set() else {
        return Ok(None);
    };
    let Some(template) = tile_set.tiles.first() else {
        log::warn!("source {source_id} has no tile URLs");
        return Ok(None);
    };

    let kind = match source {
        Source::Raster(_) => TileKind::Raster,
        Source::RasterDem(tile_set) => TileKind::Dem(tile_set.encoding.unwrap_or_default()),
        _ => TileKind::Vector,
    };
    let resource = Resource::tile(
        template,
        pixel_ratio,
        &id.canonical,
        tile_set.scheme,
        Necessity::Optional,
    );
    Ok(Some(Tile::new(
        key,
        kind,
        resource,
        Necessity::Optional,
        parameters,
    )))
}

/// Asks the managers for what a freshly laid out tile is missing. Once everything is at hand
/// the tile is laid out again; otherwise the managers notify it later.
fn request_dependencies(tile: &mut Tile, context: &mut DependencyContext) -> Result<(), Error> {
    let Some((glyph_dependencies, image_dependencies)) = tile.pending_dependencies() else {
        return Ok(());
    };
    let glyph_dependencies = glyph_dependencies.clone();
    let needs_images = !image_dependencies.is_empty();
    let key = tile.key().clone();

    let glyphs_ready = glyph_dependencies.is_empty()
        || context.glyphs.get_glyphs(
            key.clone(),
            &glyph_dependencies,
            context.file_source,
            context.sender,
        );
    let images_ready = !needs_images || context.images.get_images(key);
    if !(glyphs_ready && images_ready) {
        return Ok(());
    }

    if !glyph_dependencies.is_empty() {
        tile.on_glyphs_available(context.glyphs.glyphs())?;
    }
    if needs_images {
        tile.on_images_available(context.images.images())?;
    }
    Ok(())
}
