//! Decoded content of vector and GeoJSON tiles.
//!
//! Protocol buffer tiles are decoded with geozero. Features of such tiles are only decoded when
//! they are accessed. GeoJSON tiles are read eagerly through a geozero [`FeatureProcessor`].

use std::collections::HashMap;

use geozero::{
    mvt::{tile, Message, Tile},
    ColumnValue, FeatureProcessor, GeomProcessor, GeozeroDatasource, PropertyProcessor,
};
use lyon::geom::euclid::Point2D;
use serde_json::{Map, Number, Value};

use crate::{
    coords::{TileSpace, EXTENT},
    error::ParseError,
};

pub type GeometryCoordinate = Point2D<i16, TileSpace>;
pub type GeometryCoordinates = Vec<GeometryCoordinate>;
pub type GeometryCollection = Vec<GeometryCoordinates>;
pub type PropertyMap = Map<String, Value>;

/// Name of the single layer of GeoJSON tiles.
pub const GEOJSON_LAYER_NAME: &str = "_geojsonTileLayer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureType {
    Unknown,
    Point,
    LineString,
    Polygon,
}

impl FeatureType {
    /// Name as used by `$type` filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Unknown => "Unknown",
            FeatureType::Point => "Point",
            FeatureType::LineString => "LineString",
            FeatureType::Polygon => "Polygon",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryTileFeature {
    pub id: Option<u64>,
    pub feature_type: FeatureType,
    pub properties: PropertyMap,
    /// Rings, lines or single points in tile units of [`EXTENT`].
    pub geometry: GeometryCollection,
}

impl GeometryTileFeature {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A protocol buffer vector tile.
#[derive(Debug)]
pub struct VectorTileData {
    tile: Tile,
    layers: HashMap<String, usize>,
}

impl VectorTileData {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let tile = Tile::decode(bytes).map_err(|e| ParseError::VectorTile(e.to_string()))?;
        let layers = tile
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| (layer.name.clone(), index))
            .collect();
        Ok(Self { tile, layers })
    }

    fn layer(&self, name: &str) -> Option<&tile::Layer> {
        self.layers.get(name).map(|index| &self.tile.layers[*index])
    }

    fn decode_feature(layer: &tile::Layer, index: usize) -> Result<GeometryTileFeature, ParseError> {
        let feature = layer.features.get(index).ok_or_else(|| {
            ParseError::VectorTile(format!("feature {index} out of range in {}", layer.name))
        })?;

        let feature_type = match feature.r#type() {
            tile::GeomType::Point => FeatureType::Point,
            tile::GeomType::Linestring => FeatureType::LineString,
            tile::GeomType::Polygon => FeatureType::Polygon,
            tile::GeomType::Unknown => FeatureType::Unknown,
        };

        let mut properties = Map::new();
        for pair in feature.tags.chunks(2) {
            let [key, value] = pair else {
                return Err(ParseError::VectorTile("odd number of feature tags".to_string()));
            };
            let key = layer.keys.get(*key as usize);
            let value = layer.values.get(*value as usize);
            match (key, value) {
                (Some(key), Some(value)) => {
                    properties.insert(key.clone(), tile_value_to_json(value));
                }
                _ => return Err(ParseError::VectorTile("feature tag out of range".to_string())),
            }
        }

        let scale = EXTENT / layer.extent().max(1) as f64;
        let geometry = decode_geometry(&feature.geometry, scale)?;

        Ok(GeometryTileFeature {
            id: feature.id,
            feature_type,
            properties,
            geometry,
        })
    }
}

fn tile_value_to_json(value: &tile::Value) -> Value {
    if let Some(string) = &value.string_value {
        Value::String(string.clone())
    } else if let Some(float) = value.float_value {
        Number::from_f64(float as f64).map_or(Value::Null, Value::Number)
    } else if let Some(double) = value.double_value {
        Number::from_f64(double).map_or(Value::Null, Value::Number)
    } else if let Some(int) = value.int_value {
        Value::from(int)
    } else if let Some(uint) = value.uint_value {
        Value::from(uint)
    } else if let Some(sint) = value.sint_value {
        Value::from(sint)
    } else if let Some(bool) = value.bool_value {
        Value::Bool(bool)
    } else {
        Value::Null
    }
}

fn zig_zag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

fn to_coordinate(x: i64, y: i64, scale: f64) -> GeometryCoordinate {
    let clamp = |v: f64| v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    GeometryCoordinate::new(clamp(x as f64 * scale), clamp(y as f64 * scale))
}

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

/// Decodes a command stream. Every `MoveTo` starts a new line, so each point of a multi point
/// ends up in its own line.
pub(crate) fn decode_geometry(commands: &[u32], scale: f64) -> Result<GeometryCollection, ParseError> {
    let mut lines = GeometryCollection::new();
    let mut line = GeometryCoordinates::new();
    let (mut x, mut y) = (0i64, 0i64);

    let mut i = 0;
    while i < commands.len() {
        let command = commands[i] & 0x7;
        let count = commands[i] >> 3;
        i += 1;

        match command {
            MOVE_TO | LINE_TO => {
                for _ in 0..count {
                    let (Some(dx), Some(dy)) = (commands.get(i), commands.get(i + 1)) else {
                        return Err(ParseError::VectorTile("truncated geometry".to_string()));
                    };
                    i += 2;
                    x += zig_zag(*dx) as i64;
                    y += zig_zag(*dy) as i64;

                    if command == MOVE_TO && !line.is_empty() {
                        lines.push(std::mem::take(&mut line));
                    }
                    line.push(to_coordinate(x, y, scale));
                }
            }
            CLOSE_PATH => {
                if let Some(first) = line.first().copied() {
                    line.push(first);
                }
            }
            unknown => {
                return Err(ParseError::VectorTile(format!(
                    "unknown geometry command {unknown}"
                )))
            }
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    Ok(lines)
}

/// Twice the signed area of a ring. Positive for clockwise rings in tile coordinates.
pub fn signed_area(ring: &GeometryCoordinates) -> i64 {
    let mut sum = 0i64;
    let len = ring.len();
    if len == 0 {
        return 0;
    }
    let mut j = len - 1;
    for i in 0..len {
        let (p1, p2) = (ring[i], ring[j]);
        sum += (p2.x as i64 - p1.x as i64) * (p1.y as i64 + p2.y as i64);
        j = i;
    }
    sum
}

/// Splits the rings of a polygon feature into polygons. A ring with the winding order of the
/// first ring starts a new polygon, the others are holes of the current one.
pub fn classify_rings(rings: &GeometryCollection) -> Vec<GeometryCollection> {
    if rings.len() <= 1 {
        return vec![rings.clone()];
    }

    let mut polygons = Vec::new();
    let mut polygon = GeometryCollection::new();
    let mut ccw = None;

    for ring in rings {
        let area = signed_area(ring);
        if area == 0 {
            continue;
        }

        let is_ccw = area < 0;
        let outer = *ccw.get_or_insert(is_ccw);
        if outer == is_ccw && !polygon.is_empty() {
            polygons.push(std::mem::take(&mut polygon));
        }
        polygon.push(ring.clone());
    }

    if !polygon.is_empty() {
        polygons.push(polygon);
    }
    polygons
}

#[derive(Debug, Clone, Default)]
pub struct GeometryTileLayer {
    pub name: String,
    pub features: Vec<GeometryTileFeature>,
}

/// A GeoJSON tile whose coordinates are already in tile units.
#[derive(Debug, Clone, Default)]
pub struct GeoJsonTileData {
    layer: GeometryTileLayer,
}

impl GeoJsonTileData {
    pub fn from_features(layer_name: &str, features: Vec<GeometryTileFeature>) -> Self {
        Self {
            layer: GeometryTileLayer {
                name: layer_name.to_string(),
                features,
            },
        }
    }

    /// Reads a FeatureCollection, a Feature or a bare geometry.
    pub fn parse(json: &str) -> Result<Self, ParseError> {
        let features = collect_geojson(json)?
            .into_iter()
            .map(|feature| feature.to_tile_feature(|x, y| (x, y)))
            .collect();
        Ok(Self::from_features(GEOJSON_LAYER_NAME, features))
    }
}

/// Reads GeoJSON into features with floating point coordinates.
pub(crate) fn collect_geojson(json: &str) -> Result<Vec<CollectedFeature>, ParseError> {
    let mut collector = FeatureCollector::default();
    geozero::geojson::GeoJson(json)
        .process(&mut collector)
        .map_err(|e| ParseError::GeoJson(e.to_string()))?;
    Ok(collector.finish())
}

/// A feature read by the [`FeatureCollector`].
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectedFeature {
    pub feature_type: Option<FeatureType>,
    pub properties: PropertyMap,
    pub geometry: Vec<Vec<(f64, f64)>>,
}

impl CollectedFeature {
    /// Converts to a tile feature, mapping each coordinate to tile units with `project`.
    pub fn to_tile_feature<F>(&self, project: F) -> GeometryTileFeature
    where
        F: Fn(f64, f64) -> (f64, f64),
    {
        let clamp = |v: f64| v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        let geometry = self
            .geometry
            .iter()
            .map(|line| {
                line.iter()
                    .map(|(x, y)| {
                        let (x, y) = project(*x, *y);
                        GeometryCoordinate::new(clamp(x), clamp(y))
                    })
                    .collect()
            })
            .collect();

        let id = match self.properties.get("id") {
            Some(Value::Number(number)) => number.as_u64(),
            _ => None,
        };

        GeometryTileFeature {
            id,
            feature_type: self.feature_type.unwrap_or(FeatureType::Unknown),
            properties: self.properties.clone(),
            geometry,
        }
    }
}

type GeoResult<T> = geozero::error::Result<T>;

/// Collects features from any geozero datasource.
#[derive(Default)]
pub(crate) struct FeatureCollector {
    features: Vec<CollectedFeature>,
    current: CollectedFeature,
    line: Vec<(f64, f64)>,
    in_point: bool,
}

impl FeatureCollector {
    fn set_type(&mut self, feature_type: FeatureType) {
        if self.current.feature_type.is_none() {
            self.current.feature_type = Some(feature_type);
        }
    }

    fn end_line(&mut self) {
        if !self.line.is_empty() {
            self.current.geometry.push(std::mem::take(&mut self.line));
        }
    }

    fn finish(mut self) -> Vec<CollectedFeature> {
        // Bare geometries never see a feature_end.
        if !self.current.geometry.is_empty() {
            self.features.push(std::mem::take(&mut self.current));
        }
        self.features
    }
}

impl GeomProcessor for FeatureCollector {
    fn xy(&mut self, x: f64, y: f64, _idx: usize) -> GeoResult<()> {
        if self.in_point {
            self.current.geometry.push(vec![(x, y)]);
        } else {
            self.line.push((x, y));
        }
        Ok(())
    }

    fn point_begin(&mut self, _idx: usize) -> GeoResult<()> {
        self.set_type(FeatureType::Point);
        self.in_point = true;
        Ok(())
    }

    fn point_end(&mut self, _idx: usize) -> GeoResult<()> {
        self.in_point = false;
        Ok(())
    }

    fn multipoint_begin(&mut self, _size: usize, _idx: usize) -> GeoResult<()> {
        self.set_type(FeatureType::Point);
        self.in_point = true;
        Ok(())
    }

    fn multipoint_end(&mut self, _idx: usize) -> GeoResult<()> {
        self.in_point = false;
        Ok(())
    }

    fn linestring_begin(&mut self, tagged: bool, _size: usize, _idx: usize) -> GeoResult<()> {
        if tagged {
            self.set_type(FeatureType::LineString);
        }
        Ok(())
    }

    fn linestring_end(&mut self, _tagged: bool, _idx: usize) -> GeoResult<()> {
        self.end_line();
        Ok(())
    }

    fn multilinestring_begin(&mut self, _size: usize, _idx: usize) -> GeoResult<()> {
        self.set_type(FeatureType::LineString);
        Ok(())
    }

    fn polygon_begin(&mut self, _tagged: bool, _size: usize, _idx: usize) -> GeoResult<()> {
        self.set_type(FeatureType::Polygon);
        Ok(())
    }

    fn multipolygon_begin(&mut self, _size: usize, _idx: usize) -> GeoResult<()> {
        self.set_type(FeatureType::Polygon);
        Ok(())
    }
}

impl PropertyProcessor for FeatureCollector {
    fn property(&mut self, _idx: usize, name: &str, value: &ColumnValue) -> GeoResult<bool> {
        let value = match value {
            ColumnValue::Bool(v) => Value::Bool(*v),
            ColumnValue::Byte(v) => Value::from(*v),
            ColumnValue::UByte(v) => Value::from(*v),
            ColumnValue::Short(v) => Value::from(*v),
            ColumnValue::UShort(v) => Value::from(*v),
            ColumnValue::Int(v) => Value::from(*v),
            ColumnValue::UInt(v) => Value::from(*v),
            ColumnValue::Long(v) => Value::from(*v),
            ColumnValue::ULong(v) => Value::from(*v),
            ColumnValue::Float(v) => Number::from_f64(*v as f64).map_or(Value::Null, Value::Number),
            ColumnValue::Double(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
            ColumnValue::String(v) | ColumnValue::DateTime(v) => Value::String(v.to_string()),
            ColumnValue::Json(v) => serde_json::from_str(v).unwrap_or(Value::Null),
            ColumnValue::Binary(_) => Value::Null,
        };
        self.current.properties.insert(name.to_string(), value);
        Ok(false)
    }
}

impl FeatureProcessor for FeatureCollector {
    fn feature_end(&mut self, _idx: u64) -> GeoResult<()> {
        self.end_line();
        self.features.push(std::mem::take(&mut self.current));
        Ok(())
    }
}

/// Content of a vector or GeoJSON tile.
#[derive(Debug)]
pub enum GeometryTileData {
    Vector(VectorTileData),
    GeoJson(GeoJsonTileData),
}

impl GeometryTileData {
    /// Whether the data contains a layer for `source_layer`. GeoJSON tiles answer every name with
    /// their single layer.
    pub fn has_layer(&self, source_layer: &str) -> bool {
        match self {
            GeometryTileData::Vector(data) => data.layer(source_layer).is_some(),
            GeometryTileData::GeoJson(_) => true,
        }
    }

    pub fn layer_names(&self) -> Vec<String> {
        match self {
            GeometryTileData::Vector(data) => {
                data.tile.layers.iter().map(|layer| layer.name.clone()).collect()
            }
            GeometryTileData::GeoJson(data) => vec![data.layer.name.clone()],
        }
    }

    pub fn feature_count(&self, source_layer: &str) -> usize {
        match self {
            GeometryTileData::Vector(data) => data
                .layer(source_layer)
                .map(|layer| layer.features.len())
                .unwrap_or(0),
            GeometryTileData::GeoJson(data) => data.layer.features.len(),
        }
    }

    pub fn feature(
        &self,
        source_layer: &str,
        index: usize,
    ) -> Result<Option<GeometryTileFeature>, ParseError> {
        match self {
            GeometryTileData::Vector(data) => match data.layer(source_layer) {
                Some(layer) if index < layer.features.len() => {
                    VectorTileData::decode_feature(layer, index).map(Some)
                }
                _ => Ok(None),
            },
            GeometryTileData::GeoJson(data) => Ok(data.layer.features.get(index).cloned()),
        }
    }

    /// Decodes all features of a layer in order.
    pub fn features(&self, source_layer: &str) -> Result<Vec<GeometryTileFeature>, ParseError> {
        let mut features = Vec::with_capacity(self.feature_count(source_layer));
        for index in 0..self.feature_count(source_layer) {
            if let Some(feature) = self.feature(source_layer, index)? {
                features.push(feature);
            }
        }
        Ok(features)
    }
}
