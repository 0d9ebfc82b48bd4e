//! Headless map which loads the tiles of a viewport and places their labels.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use instant::Instant;
use lyon::geom::euclid::{Box2D, Point2D};

use crate::{
    coords::ScreenCoordinate,
    error::Error,
    io::{
        scheduler::{Mailbox, Scheduler},
        source_client::FileSource,
    },
    message::{Message, TileKey},
    observer::MapObserver,
    options::MapOptions,
    render::{
        render_source::{DependencyContext, RenderSource},
        transform_state::{CameraOptions, TransformState},
    },
    style::{
        filter::Filter,
        layer::{LayerProperties, LayerType, StyleLayer},
        property::StyleProperty,
        Style,
    },
    text::{
        glyph_manager::GlyphManager,
        image_manager::ImageManager,
        placement::{BucketPlacementData, Placement},
    },
    tile::{
        feature_index::{lookup, Feature},
        PyramidTile, TileParameters,
    },
};

/// How long a still waits for the next message before giving up.
pub const STILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Restricts the results of [`Map::query_rendered_features`].
#[derive(Debug, Clone, Default)]
pub struct RenderedQueryOptions {
    /// Layers to query. All layers if `None`.
    pub layer_ids: Option<Vec<String>>,
    pub filter: Option<Filter>,
}

pub struct Map {
    options: MapOptions,
    transform: TransformState,
    camera_changed: bool,

    file_source: Arc<dyn FileSource>,
    scheduler: Arc<dyn Scheduler>,
    observer: Arc<dyn MapObserver>,
    mailbox: Mailbox<Message>,

    has_style: bool,
    layers: Vec<Arc<StyleLayer>>,
    sources: BTreeMap<String, RenderSource>,
    glyphs: GlyphManager,
    images: ImageManager,
    placement: Option<Placement>,
}

impl Map {
    pub fn new(
        options: MapOptions,
        file_source: Arc<dyn FileSource>,
        scheduler: Arc<dyn Scheduler>,
        observer: Arc<dyn MapObserver>,
    ) -> Self {
        let pixel_ratio = options.pixel_ratio;
        Self {
            options,
            transform: TransformState::default(),
            camera_changed: false,
            file_source,
            scheduler,
            observer,
            mailbox: Mailbox::new(),
            has_style: false,
            layers: Vec::new(),
            sources: BTreeMap::new(),
            glyphs: GlyphManager::new(None),
            images: ImageManager::new(None, pixel_ratio),
            placement: None,
        }
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    pub fn source(&self, source_id: &str) -> Option<&RenderSource> {
        self.sources.get(source_id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &RenderSource> {
        self.sources.values()
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    /// Replaces the style. Tiles of the previous style are dropped. The camera of the style is
    /// applied unless the camera was moved before.
    pub fn set_style(&mut self, style: Style) -> Result<(), Error> {
        let layers: Vec<Arc<StyleLayer>> = style.layers.iter().cloned().map(Arc::new).collect();

        let mut sources = BTreeMap::new();
        for (source_id, source) in &style.sources {
            let source_layers = layers
                .iter()
                .filter(|layer| layer.source.as_deref() == Some(source_id.as_str()))
                .cloned()
                .collect();
            sources.insert(
                source_id.clone(),
                RenderSource::new(source_id, source.clone(), source_layers)?,
            );
        }

        if !self.camera_changed {
            self.transform.jump_to(&CameraOptions {
                center: style.center(),
                zoom: style.zoom,
                bearing: style.bearing,
                pitch: style.pitch,
            });
        }

        log::info!(
            "style {} with {} sources and {} layers",
            style.name.as_deref().unwrap_or("<unnamed>"),
            sources.len(),
            layers.len()
        );
        self.has_style = true;
        self.layers = layers;
        self.sources = sources;
        self.glyphs = GlyphManager::new(style.glyphs.clone());
        self.images = ImageManager::new(style.sprite.clone(), self.options.pixel_ratio);
        self.placement = None;
        Ok(())
    }

    pub fn jump_to(&mut self, camera: &CameraOptions) {
        self.camera_changed = true;
        self.transform.jump_to(camera);
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.transform.resize(width, height);
    }

    /// Whether every source and the sprite finished loading.
    pub fn is_fully_loaded(&self) -> bool {
        self.images.is_loaded() && self.sources.values().all(RenderSource::is_loaded)
    }

    /// Loads everything the current viewport needs, places the labels and calls `callback`.
    /// Loading stops at the first error, which is passed to `callback`.
    pub fn render_still<F>(&mut self, callback: F)
    where
        F: FnOnce(Option<Error>),
    {
        let error = self.load_still().err();
        self.observer.on_did_finish_rendering_map(error.as_ref());
        callback(error);
    }

    #[tracing::instrument(skip_all)]
    fn load_still(&mut self) -> Result<(), Error> {
        if !self.has_style {
            return Err(Error::Style("no style set".to_string()));
        }
        if !self.transform.valid() {
            return Err(Error::Style("map has no size".to_string()));
        }

        let sender = self.mailbox.sender();
        self.images.load(self.file_source.as_ref(), &sender);
        for source in self.sources.values_mut() {
            source.load(self.file_source.as_ref(), &sender);
        }

        loop {
            if let Some(error) = self.update().into_iter().next() {
                return Err(error);
            }
            if self.is_fully_loaded() {
                break;
            }

            let Some(message) = self.mailbox.recv_timeout(STILL_TIMEOUT) else {
                log::error!("still timed out after {STILL_TIMEOUT:?}");
                return Err(Error::Timeout(STILL_TIMEOUT));
            };
            self.process(message)?;
            while let Some(message) = self.mailbox.try_recv() {
                self.process(message)?;
            }
        }

        self.place_symbols();
        Ok(())
    }

    /// Updates the tiles of all sources for the current viewport. Errors are reported to the
    /// observer and returned.
    pub fn update(&mut self) -> Vec<Error> {
        if !self.transform.valid() {
            return Vec::new();
        }

        let parameters = TileParameters {
            file_source: self.file_source.clone(),
            scheduler: self.scheduler.clone(),
            sender: self.mailbox.sender(),
            layers: Vec::new(),
            glyphs: self.glyphs.glyphs(),
            images: self.images.is_loaded().then(|| self.images.images()),
        };

        let mut errors = Vec::new();
        for source in self.sources.values_mut() {
            for error in source.update(&self.transform, &self.options, &parameters) {
                self.observer.on_source_error(source.id(), &error);
                errors.push(error);
            }
        }
        errors
    }

    /// Handles all messages which arrived so far. Returns the first error.
    pub fn process_messages(&mut self) -> Result<(), Error> {
        while let Some(message) = self.mailbox.try_recv() {
            self.process(message)?;
        }
        Ok(())
    }

    fn process(&mut self, message: Message) -> Result<(), Error> {
        let sender = self.mailbox.sender();
        match message {
            Message::Tile { key, message } => {
                let Some(source) = self.sources.get_mut(&key.source_id) else {
                    return Ok(());
                };
                let mut context = DependencyContext {
                    glyphs: &mut self.glyphs,
                    images: &mut self.images,
                    file_source: self.file_source.as_ref(),
                    sender: &sender,
                };
                source
                    .on_tile_message(&key.tile, message, &mut context)
                    .map_err(|error| {
                        self.observer.on_source_error(&key.source_id, &error);
                        error
                    })
            }
            Message::Glyphs {
                font_stack,
                range,
                response,
            } => {
                let (requestors, error) = self.glyphs.on_response(&font_stack, range, response);
                let glyphs = self.glyphs.glyphs();
                self.notify(requestors, |source, key| {
                    source.on_glyphs_available(&key.tile, glyphs.clone())
                })?;
                match error {
                    Some(error) => {
                        self.observer.on_glyphs_error(&font_stack, range, &error);
                        Err(error)
                    }
                    None => Ok(()),
                }
            }
            Message::Sprite(response) => {
                let (requestors, error) = self.images.on_response(response);
                let images = self.images.images();
                self.notify(requestors, |source, key| {
                    source.on_images_available(&key.tile, images.clone())
                })?;
                match error {
                    Some(error) => {
                        self.observer.on_sprite_error(&error);
                        Err(error)
                    }
                    None => Ok(()),
                }
            }
            Message::Source {
                source_id,
                response,
            } => {
                let Some(source) = self.sources.get_mut(&source_id) else {
                    return Ok(());
                };
                source.on_source_response(response).map_err(|error| {
                    self.observer.on_source_error(&source_id, &error);
                    error
                })
            }
        }
    }

    fn notify<F>(&mut self, requestors: Vec<TileKey>, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut RenderSource, &TileKey) -> Result<(), Error>,
    {
        for key in requestors {
            if let Some(source) = self.sources.get_mut(&key.source_id) {
                if let Err(error) = f(source, &key) {
                    self.observer.on_source_error(&key.source_id, &error);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Visible symbol layers in paint order.
    fn symbol_layers(&self) -> impl Iterator<Item = &Arc<StyleLayer>> {
        let zoom = self.transform.zoom();
        self.layers
            .iter()
            .filter(move |layer| layer.layer_type == LayerType::Symbol && layer.is_visible_at(zoom))
    }

    /// Places the labels of the rendered tiles and writes their opacities into the buckets.
    #[tracing::instrument(skip_all)]
    fn place_symbols(&mut self) {
        let now = Instant::now();
        let mut placement = Placement::new(
            &self.transform,
            self.options.map_mode,
            &self.options,
            self.placement.take(),
        );

        {
            let layers: Vec<Vec<BucketPlacementData>> = self
                .symbol_layers()
                .map(|layer| {
                    let Some(source) = layer
                        .source
                        .as_deref()
                        .and_then(|source_id| self.sources.get(source_id))
                    else {
                        return Vec::new();
                    };
                    source
                        .pyramid()
                        .rendered_tiles()
                        .filter_map(|(_, tile)| {
                            let bucket = tile.bucket(&layer.id)?.as_symbol()?;
                            Some(BucketPlacementData {
                                source_id: source.id(),
                                tile: tile.id(),
                                bucket,
                            })
                        })
                        .collect()
                })
                .collect();
            placement.place_layers(&layers);
        }
        placement.commit(now);

        let symbol_layers: Vec<Arc<StyleLayer>> = self.symbol_layers().cloned().collect();
        for layer in symbol_layers {
            let Some(source) = layer
                .source
                .as_deref()
                .and_then(|source_id| self.sources.get_mut(source_id))
            else {
                continue;
            };
            let mut seen = HashSet::new();
            for (_, tile) in source.pyramid_mut().rendered_tiles_mut() {
                if let Some(bucket) = tile
                    .buckets_mut()
                    .get_mut(&layer.id)
                    .and_then(|bucket| bucket.as_symbol_mut())
                {
                    placement.update_bucket_opacities(bucket, &mut seen);
                }
            }
        }

        self.placement = Some(placement);
    }

    /// Features drawn under `geometry`, given in screen pixels. A single point queries a point,
    /// more points query the polygon they span. Results follow the paint order of the layers,
    /// topmost first.
    pub fn query_rendered_features(
        &self,
        geometry: &[ScreenCoordinate],
        options: &RenderedQueryOptions,
    ) -> Result<Vec<Feature>, Error> {
        if geometry.is_empty() {
            return Ok(Vec::new());
        }
        let layer_ids: Vec<String> = self
            .layers
            .iter()
            .rev()
            .filter(|layer| {
                options
                    .layer_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&layer.id))
            })
            .map(|layer| layer.id.clone())
            .collect();
        let filter = options.filter.as_ref();

        let mut features = Vec::new();
        for source in self.sources.values() {
            let source_layer_ids: Vec<String> = layer_ids
                .iter()
                .filter(|id| source.layers().iter().any(|layer| layer.id == **id))
                .cloned()
                .collect();
            if source_layer_ids.is_empty() {
                continue;
            }
            let tolerance = source
                .layers()
                .iter()
                .filter(|layer| source_layer_ids.contains(&layer.id))
                .map(|layer| query_padding(layer))
                .fold(0.0, f64::max);
            features.extend(source.pyramid().query_rendered_features(
                geometry,
                &self.transform,
                tolerance,
                &source_layer_ids,
                filter,
            )?);
        }

        features.extend(self.query_rendered_symbols(geometry, &layer_ids, filter)?);
        features.sort_by_key(|feature| layer_ids.iter().position(|id| *id == feature.layer_id));
        Ok(features)
    }

    fn query_rendered_symbols(
        &self,
        geometry: &[ScreenCoordinate],
        layer_ids: &[String],
        filter: Option<&Filter>,
    ) -> Result<Vec<Feature>, Error> {
        let Some(placement) = &self.placement else {
            return Ok(Vec::new());
        };

        let mut min = Point2D::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point2D::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for point in geometry {
            min = min.min(Point2D::new(point.x, point.y));
            max = max.max(Point2D::new(point.x, point.y));
        }

        let mut results: Vec<_> = placement
            .query_rendered_symbols(&Box2D::new(min, max))
            .into_iter()
            .collect();
        results.sort_by_key(|(bucket_instance_id, _)| *bucket_instance_id);

        let mut features = Vec::new();
        for (bucket_instance_id, subfeatures) in results {
            let Some(query_data) = placement.query_data(bucket_instance_id) else {
                continue;
            };
            if !layer_ids.contains(&query_data.layer_id) {
                continue;
            }
            let Some(data) = self
                .sources
                .get(&query_data.source_id)
                .and_then(|source| source.pyramid().get_tile(&query_data.tile))
                .and_then(|tile| tile.geometry())
            else {
                continue;
            };
            for subfeature in &subfeatures {
                if let Some(feature) = lookup(data, subfeature, query_data.tile, filter)? {
                    features.push(feature);
                }
            }
        }
        Ok(features)
    }
}

/// Distance in pixels by which the geometry of a layer extends beyond its features.
fn query_padding(layer: &StyleLayer) -> f64 {
    let constant = |property: &StyleProperty<f64>| match property {
        StyleProperty::Constant(value) => *value,
        StyleProperty::Expression(_) => 0.0,
    };
    match &layer.properties {
        LayerProperties::Circle(circle) => constant(&circle.circle_radius),
        LayerProperties::Line(line) => constant(&line.line_width) / 2.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::{Arc, Mutex},
    };

    use crate::{
        coords::{LatLng, Projection, ScreenCoordinate, TileCoordinate},
        error::{Error, ErrorReason, ResponseError},
        io::{scheduler::ImmediateScheduler, source_client::StaticFileSource},
        map::{Map, RenderedQueryOptions},
        observer::MapObserver,
        options::{MapMode, MapOptions},
        render::transform_state::CameraOptions,
        style::Style,
        tile::{geometry_tile_data::tests::encode_test_tile, tile_id::UnwrappedTileID},
    };

    #[derive(Default)]
    struct RecordingObserver {
        errors: Mutex<Vec<String>>,
        finished: Mutex<usize>,
    }

    impl MapObserver for RecordingObserver {
        fn on_source_error(&self, source_id: &str, error: &Error) {
            if let Ok(mut errors) = self.errors.lock() {
                errors.push(format!("{source_id}: {error}"));
            }
        }

        fn on_did_finish_rendering_map(&self, _error: Option<&Error>) {
            if let Ok(mut finished) = self.finished.lock() {
                *finished += 1;
            }
        }
    }

    const STYLE: &str = r#"{
        "version": 8,
        "sources": {
            "streets": {"type": "vector", "tiles": ["https://tiles/{z}/{x}/{y}.pbf"]}
        },
        "layers": [
            {"id": "background", "type": "background"},
            {"id": "parks", "type": "fill", "source": "streets", "source-layer": "landuse"}
        ]
    }"#;

    fn map(file_source: Arc<StaticFileSource>, observer: Arc<RecordingObserver>) -> Map {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut map = Map::new(
            MapOptions::default().with_map_mode(MapMode::Static),
            file_source,
            Arc::new(ImmediateScheduler),
            observer,
        );
        map.set_style(Style::from_json(STYLE).unwrap()).unwrap();
        map
    }

    fn san_francisco(map: &mut Map) {
        map.set_size(512.0, 512.0);
        map.jump_to(
            &CameraOptions::default()
                .with_center(LatLng::new(37.8, -122.5))
                .with_zoom(10.0),
        );
    }

    #[test]
    fn still_of_san_francisco() {
        let file_source = Arc::new(StaticFileSource::new());
        for (x, y) in [(163, 395), (163, 396), (164, 395), (164, 396)] {
            file_source.insert(
                format!("https://tiles/10/{x}/{y}.pbf"),
                encode_test_tile("landuse"),
            );
        }
        let observer = Arc::new(RecordingObserver::default());
        let mut map = map(file_source, observer.clone());
        san_francisco(&mut map);

        let mut result = None;
        map.render_still(|error| result = Some(error));
        assert!(matches!(result, Some(None)), "{result:?}");
        assert_eq!(*observer.finished.lock().unwrap(), 1);

        let rendered: BTreeSet<UnwrappedTileID> = map
            .source("streets")
            .unwrap()
            .pyramid()
            .rendered_tiles()
            .map(|(position, _)| position)
            .collect();
        let expected: BTreeSet<UnwrappedTileID> = [(163, 395), (163, 396), (164, 395), (164, 396)]
            .into_iter()
            .map(|(x, y)| UnwrappedTileID::from_zxy(10, x, y))
            .collect();
        assert_eq!(rendered, expected);
    }

    #[test]
    fn connection_errors_end_the_still() {
        let file_source = Arc::new(StaticFileSource::new());
        for (x, y) in [(163, 396), (164, 395), (164, 396)] {
            file_source.insert(
                format!("https://tiles/10/{x}/{y}.pbf"),
                encode_test_tile("landuse"),
            );
        }
        file_source.insert_error(
            "https://tiles/10/163/395.pbf",
            ResponseError::new(ErrorReason::Connection, "network unreachable"),
        );
        let observer = Arc::new(RecordingObserver::default());
        let mut map = map(file_source, observer.clone());
        san_francisco(&mut map);

        let mut result = None;
        map.render_still(|error| result = Some(error));
        let error = result.flatten().expect("the still fails");
        assert!(error.to_string().contains("onnect"), "{error}");

        let errors = observer.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("streets: "));
        assert!(errors[0].contains("onnect"));
    }

    #[test]
    fn stills_need_a_style() {
        let mut map = Map::new(
            MapOptions::default().with_map_mode(MapMode::Static),
            Arc::new(StaticFileSource::new()),
            Arc::new(ImmediateScheduler),
            Arc::new(RecordingObserver::default()),
        );
        map.set_size(256.0, 256.0);

        let mut result = None;
        map.render_still(|error| result = Some(error));
        assert!(matches!(result, Some(Some(Error::Style(_)))));
    }

    #[test]
    fn style_camera_applies_until_the_camera_moves() {
        let style = Style::from_json(
            r#"{"version": 8, "center": [-122.5, 37.8], "zoom": 10, "sources": {}, "layers": []}"#,
        )
        .unwrap();
        let mut map = Map::new(
            MapOptions::default(),
            Arc::new(StaticFileSource::new()),
            Arc::new(ImmediateScheduler),
            Arc::new(RecordingObserver::default()),
        );
        map.set_size(256.0, 256.0);
        map.set_style(style.clone()).unwrap();
        assert_eq!(map.transform().zoom(), 10.0);

        map.jump_to(&CameraOptions::default().with_zoom(3.0));
        map.set_style(style).unwrap();
        assert_eq!(map.transform().zoom(), 3.0);
    }

    #[test]
    fn queries_features_under_a_point() {
        let file_source = Arc::new(StaticFileSource::new());
        file_source.insert("https://tiles/0/0/0.pbf", encode_test_tile("landuse"));
        let mut map = map(file_source, Arc::new(RecordingObserver::default()));

        // Puts the north-west corner of the world into the top left corner of the screen.
        map.set_size(256.0, 256.0);
        map.jump_to(
            &CameraOptions::default()
                .with_center(Projection::unproject(&TileCoordinate::new(128.0, 128.0), 512.0))
                .with_zoom(0.0),
        );

        let mut result = None;
        map.render_still(|error| result = Some(error));
        assert!(matches!(result, Some(None)), "{result:?}");

        // The square of the test tile covers pixels 64 to 192.
        let features = map
            .query_rendered_features(&[ScreenCoordinate::new(80.0, 80.0)], &RenderedQueryOptions::default())
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].layer_id, "parks");
        assert_eq!(features[0].id, Some(7));

        let features = map
            .query_rendered_features(&[ScreenCoordinate::new(220.0, 220.0)], &RenderedQueryOptions::default())
            .unwrap();
        assert!(features.is_empty());
    }
}
