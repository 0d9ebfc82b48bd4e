//! Turns the data of a tile into the buckets of the style layers drawing it. Runs on workers.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    bucket::{
        hillshade::DemData, raster::decode_image, Bucket, CircleBucket, FillBucket,
        FillExtrusionBucket, HeatmapBucket, HillshadeBucket, LineBucket, RasterBucket,
    },
    error::ParseError,
    layout::symbol_layout::SymbolLayout,
    style::{
        layer::{LayerProperties, LayerType, StyleLayer},
        property::StyleProperty,
        source::DemEncoding,
    },
    text::{
        glyph::{GlyphDependencies, GlyphMap},
        image_manager::ImageMap,
    },
    tile::{
        feature_index::{FeatureIndex, IndexedSubfeature},
        geometry_tile_data::{FeatureType, GeometryTileData, GeometryTileFeature, VectorTileData},
        tile_id::OverscaledTileID,
    },
};

pub mod symbol_layout;

/// Data of a tile as it was loaded.
#[derive(Debug, Clone)]
pub enum TileSourceData {
    /// Encoded vector tile.
    Vector(Arc<Vec<u8>>),
    /// Decoded vector tile or features of a GeoJSON tile.
    Geometry(Arc<GeometryTileData>),
    /// Encoded raster image.
    Raster(Arc<Vec<u8>>),
    /// Encoded raster image of elevations.
    Dem(Arc<Vec<u8>>, DemEncoding),
}

/// Everything a worker needs to lay out one tile.
pub struct LayoutInput {
    pub tile: OverscaledTileID,
    pub correlation_id: u64,
    pub data: TileSourceData,
    /// Layers of the source in paint order.
    pub layers: Vec<Arc<StyleLayer>>,
    pub glyphs: Arc<GlyphMap>,
    /// `None` while the sprite is loading.
    pub images: Option<Arc<ImageMap>>,
}

#[derive(Debug, Default)]
pub struct LayoutData {
    /// Buckets with data by layer id.
    pub buckets: HashMap<String, Bucket>,
    pub feature_index: FeatureIndex,
    /// Decoded geometry, reused when the tile is laid out again.
    pub geometry: Option<Arc<GeometryTileData>>,
    pub glyph_dependencies: GlyphDependencies,
    pub image_dependencies: BTreeSet<String>,
    /// Symbol layers are missing because glyphs or images are not loaded yet.
    pub symbols_pending: bool,
    /// The symbol layouts waiting for glyphs or images, finished by [`layout_symbols`].
    pub symbol_layouts: Option<Arc<Vec<SymbolLayout>>>,
    /// Only symbol buckets were laid out. Buckets of other layers, the feature index and the
    /// geometry stay as the previous layout left them.
    pub symbols_only: bool,
}

#[derive(Debug)]
pub struct LayoutResult {
    pub tile: OverscaledTileID,
    pub correlation_id: u64,
    pub result: Result<LayoutData, ParseError>,
}

/// Symbol layouts of an earlier layout which waited for glyphs or images.
pub struct SymbolLayoutInput {
    pub tile: OverscaledTileID,
    pub correlation_id: u64,
    pub symbol_layouts: Arc<Vec<SymbolLayout>>,
    pub glyphs: Arc<GlyphMap>,
    pub images: Option<Arc<ImageMap>>,
}

/// Lays out `input`. Decoding errors fail the whole tile, tessellation errors only drop the
/// affected feature.
#[tracing::instrument(skip_all, fields(tile = %input.tile))]
pub fn layout(input: LayoutInput) -> LayoutResult {
    let result = match &input.data {
        TileSourceData::Vector(bytes) => VectorTileData::parse(bytes)
            .map(|data| Arc::new(GeometryTileData::Vector(data)))
            .and_then(|data| layout_geometry(&input, data)),
        TileSourceData::Geometry(data) => layout_geometry(&input, data.clone()),
        TileSourceData::Raster(bytes) => layout_raster(&input, bytes),
        TileSourceData::Dem(bytes, encoding) => layout_dem(&input, bytes, *encoding),
    };
    if let Err(error) = &result {
        log::warn!("failed to lay out {}: {error}", input.tile);
    }
    LayoutResult {
        tile: input.tile,
        correlation_id: input.correlation_id,
        result,
    }
}

fn visible_layers(input: &LayoutInput) -> impl Iterator<Item = &Arc<StyleLayer>> {
    let zoom = input.tile.overscaled_z as f64;
    input
        .layers
        .iter()
        .filter(move |layer| layer.has_source_data() && layer.is_visible_at(zoom))
}

/// Whether layers of `layer_type` draw features of `feature_type`.
fn draws(layer_type: LayerType, feature_type: FeatureType) -> bool {
    match layer_type {
        LayerType::Fill | LayerType::FillExtrusion => feature_type == FeatureType::Polygon,
        LayerType::Line => matches!(feature_type, FeatureType::LineString | FeatureType::Polygon),
        LayerType::Circle | LayerType::Heatmap => feature_type == FeatureType::Point,
        _ => feature_type != FeatureType::Unknown,
    }
}

/// Orders features by their sort key. Features with equal keys keep their order.
fn sort_features(
    features: &mut [(usize, &GeometryTileFeature)],
    sort_key: Option<&StyleProperty<f64>>,
    zoom: f64,
) {
    let Some(sort_key) = sort_key else {
        return;
    };
    let key = |feature: &GeometryTileFeature| {
        sort_key.evaluate(zoom, &feature.properties).unwrap_or(0.0)
    };
    features.sort_by(|(_, a), (_, b)| key(a).total_cmp(&key(b)));
}

fn layout_geometry(
    input: &LayoutInput,
    data: Arc<GeometryTileData>,
) -> Result<LayoutData, ParseError> {
    let zoom = input.tile.overscaled_z as f64;
    let mut result = LayoutData::default();
    let mut decoded: HashMap<String, Vec<GeometryTileFeature>> = HashMap::new();
    let mut symbol_layouts = Vec::new();

    for layer in visible_layers(input) {
        let source_layer = layer.source_layer.as_deref().unwrap_or_default();
        if !data.has_layer(source_layer) {
            continue;
        }
        if !decoded.contains_key(source_layer) {
            decoded.insert(source_layer.to_string(), data.features(source_layer)?);
        }
        let Some(all_features) = decoded.get(source_layer) else {
            continue;
        };
        let mut features: Vec<(usize, &GeometryTileFeature)> = all_features
            .iter()
            .enumerate()
            .filter(|(_, feature)| draws(layer.layer_type, feature.feature_type))
            .filter(|(_, feature)| {
                layer
                    .filter
                    .as_ref()
                    .map_or(true, |filter| filter.evaluate(feature))
            })
            .collect();

        let bucket = match &layer.properties {
            LayerProperties::Fill(properties) => {
                sort_features(&mut features, properties.fill_sort_key.as_ref(), zoom);
                let mut bucket = FillBucket::default();
                add_features(&features, |feature| bucket.add_feature(feature));
                Bucket::Fill(bucket)
            }
            LayerProperties::Line(properties) => {
                let mut bucket = LineBucket::default();
                add_features(&features, |feature| {
                    bucket.add_feature(feature, properties, zoom)
                });
                Bucket::Line(bucket)
            }
            LayerProperties::Circle(properties) => {
                sort_features(&mut features, properties.circle_sort_key.as_ref(), zoom);
                let mut bucket = CircleBucket::default();
                for (_, feature) in &features {
                    bucket.add_feature(feature, properties, zoom);
                }
                Bucket::Circle(bucket)
            }
            LayerProperties::Heatmap(properties) => {
                let mut bucket = HeatmapBucket::default();
                for (_, feature) in &features {
                    bucket.add_feature(feature, properties, zoom);
                }
                Bucket::Heatmap(bucket)
            }
            LayerProperties::FillExtrusion(properties) => {
                let mut bucket = FillExtrusionBucket::default();
                add_features(&features, |feature| {
                    bucket.add_feature(feature, properties, zoom)
                });
                Bucket::FillExtrusion(bucket)
            }
            LayerProperties::Symbol(_) => {
                let owned = features
                    .iter()
                    .map(|(index, feature)| (*index, (*feature).clone()));
                if let Some(symbol_layout) = SymbolLayout::new(layer.clone(), zoom, owned) {
                    symbol_layouts.push(symbol_layout);
                }
                continue;
            }
            LayerProperties::Background
            | LayerProperties::Raster(_)
            | LayerProperties::Hillshade(_) => continue,
        };

        if !bucket.has_data() {
            continue;
        }
        for (index, feature) in &features {
            result
                .feature_index
                .insert(feature, IndexedSubfeature::new(*index, source_layer, &layer.id));
        }
        result.buckets.insert(layer.id.clone(), bucket);
    }

    lay_out_symbols(
        &input.tile,
        Arc::new(symbol_layouts),
        &input.glyphs,
        input.images.as_ref(),
        &mut result,
    );
    result.geometry = Some(data);
    Ok(result)
}

/// Finishes the symbol layouts of an earlier layout without touching its other layers.
#[tracing::instrument(skip_all, fields(tile = %input.tile))]
pub fn layout_symbols(input: SymbolLayoutInput) -> LayoutResult {
    let mut result = LayoutData {
        symbols_only: true,
        ..LayoutData::default()
    };
    lay_out_symbols(
        &input.tile,
        input.symbol_layouts,
        &input.glyphs,
        input.images.as_ref(),
        &mut result,
    );
    LayoutResult {
        tile: input.tile,
        correlation_id: input.correlation_id,
        result: Ok(result),
    }
}

/// Creates the symbol buckets if all glyphs and images are at hand. Otherwise records what is
/// missing and keeps the layouts for later.
fn lay_out_symbols(
    tile: &OverscaledTileID,
    symbol_layouts: Arc<Vec<SymbolLayout>>,
    glyphs: &GlyphMap,
    images: Option<&Arc<ImageMap>>,
    result: &mut LayoutData,
) {
    for symbol_layout in symbol_layouts.iter() {
        for (font_stack, ranges) in symbol_layout.glyph_dependencies() {
            result
                .glyph_dependencies
                .entry(font_stack.clone())
                .or_default()
                .extend(ranges);
        }
        result
            .image_dependencies
            .extend(symbol_layout.image_dependencies().iter().cloned());
    }

    let images = match images {
        Some(images) => Some(images.clone()),
        None if result.image_dependencies.is_empty() => Some(Arc::new(ImageMap::new())),
        None => None,
    };
    match images {
        Some(images) if glyphs.satisfies(&result.glyph_dependencies) => {
            for symbol_layout in symbol_layouts.iter().filter(|layout| !layout.is_empty()) {
                let bucket = symbol_layout.create_bucket(tile, glyphs, &images);
                if bucket.has_data() {
                    result
                        .buckets
                        .insert(bucket.layer.id.clone(), Bucket::Symbol(bucket));
                }
            }
        }
        _ => {
            result.symbols_pending = symbol_layouts.iter().any(|layout| !layout.is_empty());
            if result.symbols_pending {
                result.symbol_layouts = Some(symbol_layouts);
            }
        }
    }
}

/// Adds each feature with `add`, logging and skipping features which fail to tessellate.
fn add_features<F, E>(features: &[(usize, &GeometryTileFeature)], mut add: F)
where
    F: FnMut(&GeometryTileFeature) -> Result<(), E>,
    E: std::fmt::Debug,
{
    for (index, feature) in features {
        if let Err(e) = add(feature) {
            tracing::error!("tessellation of feature {index} failed {e:?}");
        }
    }
}

fn layers_of_type<'a>(
    input: &'a LayoutInput,
    layer_type: LayerType,
) -> impl Iterator<Item = &'a Arc<StyleLayer>> {
    visible_layers(input).filter(move |layer| layer.layer_type == layer_type)
}

fn layout_raster(input: &LayoutInput, bytes: &[u8]) -> Result<LayoutData, ParseError> {
    let image = Arc::new(decode_image(bytes)?);
    let mut result = LayoutData::default();
    for layer in layers_of_type(input, LayerType::Raster) {
        result
            .buckets
            .insert(layer.id.clone(), Bucket::Raster(RasterBucket::new(image.clone())));
    }
    Ok(result)
}

fn layout_dem(
    input: &LayoutInput,
    bytes: &[u8],
    encoding: DemEncoding,
) -> Result<LayoutData, ParseError> {
    let dem = DemData::decode(bytes, encoding)?;
    let mut result = LayoutData::default();
    for layer in layers_of_type(input, LayerType::Hillshade) {
        result
            .buckets
            .insert(layer.id.clone(), Bucket::Hillshade(HillshadeBucket::new(dem.clone())));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::{
        bucket::{raster::tests::encode_png, Bucket},
        error::ParseError,
        layout::{layout, layout_symbols, LayoutInput, SymbolLayoutInput, TileSourceData},
        style::{
            filter::Filter,
            layer::{
                CircleProperties, HillshadeProperties, LayerProperties, LineProperties,
                RasterProperties, StyleLayer, SymbolProperties,
            },
            property::StyleProperty,
            source::DemEncoding,
        },
        text::{glyph::GlyphMap, shaping::tests::ascii_glyphs},
        tile::{geometry_tile_data::tests::encode_test_tile, tile_id::OverscaledTileID},
    };

    fn layer(id: &str, properties: LayerProperties) -> Arc<StyleLayer> {
        Arc::new(StyleLayer::new(id, properties).with_source("composite", Some("landuse")))
    }

    fn labels() -> Arc<StyleLayer> {
        layer(
            "labels",
            LayerProperties::Symbol(Box::new(SymbolProperties {
                text_field: Some(StyleProperty::Constant("{name}".to_string())),
                text_font: vec!["Test".to_string()],
                ..SymbolProperties::default()
            })),
        )
    }

    fn input(data: TileSourceData, layers: Vec<Arc<StyleLayer>>, glyphs: GlyphMap) -> LayoutInput {
        LayoutInput {
            tile: OverscaledTileID::from_zxy(10, 163, 395),
            correlation_id: 1,
            data,
            layers,
            glyphs: Arc::new(glyphs),
            images: None,
        }
    }

    fn vector_tile() -> TileSourceData {
        TileSourceData::Vector(Arc::new(encode_test_tile("landuse")))
    }

    #[test]
    fn buckets_per_layer() {
        let layers = vec![
            layer("fill", LayerProperties::Fill(Default::default())),
            layer("outline", LayerProperties::Line(LineProperties::default())),
            layer("dots", LayerProperties::Circle(CircleProperties::default())),
            // Nothing of this source layer is in the tile.
            Arc::new(
                StyleLayer::new("roads", LayerProperties::Line(LineProperties::default()))
                    .with_source("composite", Some("roads")),
            ),
        ];
        let result = layout(input(vector_tile(), layers, GlyphMap::default()));
        assert_eq!(result.correlation_id, 1);
        let data = result.result.unwrap();

        assert!(matches!(data.buckets["fill"], Bucket::Fill(_)));
        assert!(matches!(data.buckets["outline"], Bucket::Line(_)));
        assert!(matches!(data.buckets["dots"], Bucket::Circle(_)));
        assert!(!data.buckets.contains_key("roads"));
        // Square of the fill and outline layers, point of the circle layer.
        assert_eq!(data.feature_index.len(), 3);
        assert!(data.geometry.is_some());
        assert!(!data.symbols_pending);
    }

    #[test]
    fn filters_and_zoom_ranges() {
        let filter = Filter::parse(&json!(["==", "name", "park"])).unwrap();
        let mut hidden = StyleLayer::new("hidden", LayerProperties::Fill(Default::default()))
            .with_source("composite", Some("landuse"));
        hidden.minzoom = Some(12.0);
        let layers = vec![
            Arc::new(
                StyleLayer::new("dots", LayerProperties::Circle(CircleProperties::default()))
                    .with_source("composite", Some("landuse"))
                    .with_filter(filter),
            ),
            Arc::new(hidden),
        ];
        let data = layout(input(vector_tile(), layers, GlyphMap::default()))
            .result
            .unwrap();
        // The only feature passing the filter is a polygon.
        assert!(data.buckets.is_empty());
        assert!(data.feature_index.is_empty());
    }

    #[test]
    fn symbols_wait_for_glyphs() {
        let pending = layout(input(vector_tile(), vec![labels()], GlyphMap::default()))
            .result
            .unwrap();
        assert!(pending.symbols_pending);
        assert!(pending.buckets.is_empty());
        assert_eq!(
            pending.glyph_dependencies[&vec!["Test".to_string()]]
                .iter()
                .collect::<Vec<_>>(),
            vec![&0]
        );

        let glyphs = ascii_glyphs(&vec!["Test".to_string()]);
        let data = layout(input(vector_tile(), vec![labels()], glyphs)).result.unwrap();
        assert!(!data.symbols_pending);
        let bucket = data.buckets["labels"].as_symbol().unwrap();
        // The point and the centroid of the square.
        assert_eq!(bucket.instances.len(), 2);
        // Symbols are answered by the collision index instead.
        assert!(data.feature_index.is_empty());
    }

    #[test]
    fn pending_symbols_are_finished_alone() {
        let layers = vec![
            layer("fill", LayerProperties::Fill(Default::default())),
            labels(),
        ];
        let pending = layout(input(vector_tile(), layers, GlyphMap::default()))
            .result
            .unwrap();
        assert!(pending.buckets.contains_key("fill"));
        let symbol_layouts = pending.symbol_layouts.unwrap();

        let result = layout_symbols(SymbolLayoutInput {
            tile: OverscaledTileID::from_zxy(10, 163, 395),
            correlation_id: 2,
            symbol_layouts: symbol_layouts.clone(),
            glyphs: Arc::new(GlyphMap::default()),
            images: None,
        });
        let still_pending = result.result.unwrap();
        assert!(still_pending.symbols_only);
        assert!(still_pending.symbols_pending);
        assert!(still_pending.buckets.is_empty());

        let result = layout_symbols(SymbolLayoutInput {
            tile: OverscaledTileID::from_zxy(10, 163, 395),
            correlation_id: 3,
            symbol_layouts,
            glyphs: Arc::new(ascii_glyphs(&vec!["Test".to_string()])),
            images: None,
        });
        assert_eq!(result.correlation_id, 3);
        let data = result.result.unwrap();
        assert!(data.symbols_only);
        assert!(!data.symbols_pending);
        assert!(data.symbol_layouts.is_none());
        // Only the symbol layer is laid out.
        assert_eq!(data.buckets.keys().collect::<Vec<_>>(), vec!["labels"]);
        assert!(data.feature_index.is_empty());
        assert!(data.geometry.is_none());
    }

    #[test]
    fn symbols_wait_for_images() {
        let icons = layer(
            "icons",
            LayerProperties::Symbol(Box::new(SymbolProperties {
                icon_image: Some(StyleProperty::Constant("marker".to_string())),
                ..SymbolProperties::default()
            })),
        );
        let mut pending = input(vector_tile(), vec![icons.clone()], GlyphMap::default());
        let data = layout(pending).result.unwrap();
        assert!(data.symbols_pending);
        assert!(data.image_dependencies.contains("marker"));

        pending = input(vector_tile(), vec![icons], GlyphMap::default());
        pending.images = Some(Arc::default());
        let data = layout(pending).result.unwrap();
        // The sprite is loaded but lacks the image.
        assert!(!data.symbols_pending);
        assert!(data.buckets.is_empty());
    }

    #[test]
    fn raster_and_dem_tiles() {
        let png = Arc::new(encode_png(4, |_, _| [1, 134, 160, 255]));
        let raster = layer("satellite", LayerProperties::Raster(RasterProperties::default()));
        let data = layout(input(
            TileSourceData::Raster(png.clone()),
            vec![raster],
            GlyphMap::default(),
        ))
        .result
        .unwrap();
        assert!(matches!(data.buckets["satellite"], Bucket::Raster(_)));

        let hillshade = layer("hills", LayerProperties::Hillshade(HillshadeProperties::default()));
        let data = layout(input(
            TileSourceData::Dem(png, DemEncoding::Mapbox),
            vec![hillshade],
            GlyphMap::default(),
        ))
        .result
        .unwrap();
        let Bucket::Hillshade(bucket) = &data.buckets["hills"] else {
            panic!("expected a hillshade bucket");
        };
        assert_eq!(bucket.dem.dim(), 4);
        assert!((bucket.dem.get(0, 0) - 0.0).abs() < 1e-3);
    }

    #[test]
    fn undecodable_tiles_fail() {
        let result = layout(input(
            TileSourceData::Vector(Arc::new(vec![0xff, 0xff, 0xff])),
            vec![labels()],
            GlyphMap::default(),
        ));
        assert!(matches!(result.result, Err(ParseError::VectorTile(_))));

        let result = layout(input(
            TileSourceData::Raster(Arc::new(b"garbage".to_vec())),
            Vec::new(),
            GlyphMap::default(),
        ));
        assert!(matches!(result.result, Err(ParseError::Image(_))));
    }
}
