//! Style layers and the subset of their layout and paint properties used by tile layout.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::style::{filter::Filter, property::StyleProperty};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LayerType {
    Background,
    Fill,
    Line,
    Circle,
    Symbol,
    Raster,
    FillExtrusion,
    Heatmap,
    Hillshade,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolPlacement {
    #[default]
    Point,
    Line,
    LineCenter,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    Map,
    Viewport,
    #[default]
    Auto,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextAnchor {
    #[default]
    Center,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl TextAnchor {
    /// Fractions of the label size by which the label is shifted left and up.
    pub fn alignment(&self) -> (f64, f64) {
        let horizontal = match self {
            TextAnchor::Left | TextAnchor::TopLeft | TextAnchor::BottomLeft => 0.0,
            TextAnchor::Right | TextAnchor::TopRight | TextAnchor::BottomRight => 1.0,
            _ => 0.5,
        };
        let vertical = match self {
            TextAnchor::Top | TextAnchor::TopLeft | TextAnchor::TopRight => 0.0,
            TextAnchor::Bottom | TextAnchor::BottomLeft | TextAnchor::BottomRight => 1.0,
            _ => 0.5,
        };
        (horizontal, vertical)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LineJoin {
    #[default]
    Miter,
    Bevel,
    Round,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

fn constant<T>(value: T) -> StyleProperty<T> {
    StyleProperty::Constant(value)
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FillProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_sort_key: Option<StyleProperty<f64>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct LineProperties {
    pub line_width: StyleProperty<f64>,
    pub line_join: LineJoin,
    pub line_cap: LineCap,
    pub line_miter_limit: f64,
}

impl Default for LineProperties {
    fn default() -> Self {
        Self {
            line_width: constant(1.0),
            line_join: LineJoin::default(),
            line_cap: LineCap::default(),
            line_miter_limit: 2.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct CircleProperties {
    pub circle_radius: StyleProperty<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circle_sort_key: Option<StyleProperty<f64>>,
}

impl Default for CircleProperties {
    fn default() -> Self {
        Self {
            circle_radius: constant(5.0),
            circle_sort_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FillExtrusionProperties {
    pub fill_extrusion_height: StyleProperty<f64>,
    pub fill_extrusion_base: StyleProperty<f64>,
}

impl Default for FillExtrusionProperties {
    fn default() -> Self {
        Self {
            fill_extrusion_height: constant(0.0),
            fill_extrusion_base: constant(0.0),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct HeatmapProperties {
    pub heatmap_weight: StyleProperty<f64>,
    pub heatmap_radius: StyleProperty<f64>,
}

impl Default for HeatmapProperties {
    fn default() -> Self {
        Self {
            heatmap_weight: constant(1.0),
            heatmap_radius: constant(30.0),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RasterResampling {
    #[default]
    Linear,
    Nearest,
}

/// Raster tile layer description
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct RasterProperties {
    pub raster_opacity: f64,
    pub raster_fade_duration: u32,
    pub raster_resampling: RasterResampling,
}

impl Default for RasterProperties {
    fn default() -> Self {
        Self {
            raster_opacity: 1.0,
            raster_fade_duration: 300,
            raster_resampling: RasterResampling::Linear,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct HillshadeProperties {
    pub hillshade_exaggeration: f64,
    pub hillshade_illumination_direction: f64,
}

impl Default for HillshadeProperties {
    fn default() -> Self {
        Self {
            hillshade_exaggeration: 0.5,
            hillshade_illumination_direction: 335.0,
        }
    }
}

/// Layout and paint properties of a symbol layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct SymbolProperties {
    pub symbol_placement: SymbolPlacement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_sort_key: Option<StyleProperty<f64>>,
    pub symbol_avoid_edges: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_field: Option<StyleProperty<String>>,
    pub text_font: Vec<String>,
    pub text_size: StyleProperty<f64>,
    /// In ems.
    pub text_max_width: f64,
    /// In ems.
    pub text_line_height: f64,
    /// In ems.
    pub text_letter_spacing: f64,
    pub text_anchor: TextAnchor,
    /// In ems.
    pub text_offset: [f64; 2],
    pub text_padding: f64,
    pub text_transform: TextTransform,
    pub text_allow_overlap: bool,
    pub text_ignore_placement: bool,
    pub text_optional: bool,
    pub text_pitch_alignment: Alignment,
    pub text_rotation_alignment: Alignment,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_image: Option<StyleProperty<String>>,
    pub icon_size: StyleProperty<f64>,
    /// In pixels.
    pub icon_offset: [f64; 2],
    pub icon_padding: f64,
    pub icon_allow_overlap: bool,
    pub icon_ignore_placement: bool,
    pub icon_optional: bool,
}

impl Default for SymbolProperties {
    fn default() -> Self {
        Self {
            symbol_placement: SymbolPlacement::Point,
            symbol_sort_key: None,
            symbol_avoid_edges: false,
            text_field: None,
            text_font: vec![
                "Open Sans Regular".to_string(),
                "Arial Unicode MS Regular".to_string(),
            ],
            text_size: constant(16.0),
            text_max_width: 10.0,
            text_line_height: 1.2,
            text_letter_spacing: 0.0,
            text_anchor: TextAnchor::Center,
            text_offset: [0.0, 0.0],
            text_padding: 2.0,
            text_transform: TextTransform::None,
            text_allow_overlap: false,
            text_ignore_placement: false,
            text_optional: false,
            text_pitch_alignment: Alignment::Auto,
            text_rotation_alignment: Alignment::Auto,
            icon_image: None,
            icon_size: constant(1.0),
            icon_offset: [0.0, 0.0],
            icon_padding: 2.0,
            icon_allow_overlap: false,
            icon_ignore_placement: false,
            icon_optional: false,
        }
    }
}

impl SymbolProperties {
    /// Whether text is laid out in the plane of the map rather than facing the viewer.
    pub fn text_pitch_with_map(&self) -> bool {
        match self.text_pitch_alignment {
            Alignment::Map => true,
            Alignment::Viewport => false,
            Alignment::Auto => self.text_rotation_alignment == Alignment::Map
                || (self.text_rotation_alignment == Alignment::Auto
                    && self.symbol_placement != SymbolPlacement::Point),
        }
    }
}

/// The properties of a layer, by layer type.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerProperties {
    Background,
    Fill(FillProperties),
    Line(LineProperties),
    Circle(CircleProperties),
    Symbol(Box<SymbolProperties>),
    Raster(RasterProperties),
    FillExtrusion(FillExtrusionProperties),
    Heatmap(HeatmapProperties),
    Hillshade(HillshadeProperties),
}

impl LayerProperties {
    /// Reads the properties for `layer_type` from the merged layout and paint objects.
    fn from_value(layer_type: LayerType, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match layer_type {
            LayerType::Background => LayerProperties::Background,
            LayerType::Fill => LayerProperties::Fill(serde_json::from_value(value)?),
            LayerType::Line => LayerProperties::Line(serde_json::from_value(value)?),
            LayerType::Circle => LayerProperties::Circle(serde_json::from_value(value)?),
            LayerType::Symbol => LayerProperties::Symbol(Box::new(serde_json::from_value(value)?)),
            LayerType::Raster => LayerProperties::Raster(serde_json::from_value(value)?),
            LayerType::FillExtrusion => {
                LayerProperties::FillExtrusion(serde_json::from_value(value)?)
            }
            LayerType::Heatmap => LayerProperties::Heatmap(serde_json::from_value(value)?),
            LayerType::Hillshade => LayerProperties::Hillshade(serde_json::from_value(value)?),
        })
    }
}

/// Stores all the styles for a specific layer.
#[derive(Debug, Clone)]
pub struct StyleLayer {
    pub id: String,
    pub layer_type: LayerType,
    pub source: Option<String>,
    pub source_layer: Option<String>,
    pub minzoom: Option<f64>,
    pub maxzoom: Option<f64>,
    pub filter: Option<Filter>,
    pub visible: bool,
    pub properties: LayerProperties,
}

#[derive(Deserialize)]
struct StyleLayerDef {
    id: String,
    #[serde(rename = "type")]
    layer_type: LayerType,
    source: Option<String>,
    #[serde(rename = "source-layer")]
    source_layer: Option<String>,
    minzoom: Option<f64>,
    maxzoom: Option<f64>,
    filter: Option<Filter>,
    paint: Option<Map<String, Value>>,
    layout: Option<Map<String, Value>>,
}

impl<'de> Deserialize<'de> for StyleLayer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let def = StyleLayerDef::deserialize(deserializer)?;

        let mut merged = def.layout.unwrap_or_default();
        let visible = merged.remove("visibility").and_then(|v| v.as_str().map(String::from))
            != Some("none".to_string());
        merged.extend(def.paint.unwrap_or_default());

        let properties = LayerProperties::from_value(def.layer_type, Value::Object(merged))
            .map_err(|e| {
                serde::de::Error::custom(format!("properties of layer {}: {e}", def.id))
            })?;

        Ok(StyleLayer {
            id: def.id,
            layer_type: def.layer_type,
            source: def.source,
            source_layer: def.source_layer,
            minzoom: def.minzoom,
            maxzoom: def.maxzoom,
            filter: def.filter,
            visible,
            properties,
        })
    }
}

impl StyleLayer {
    pub fn new(id: &str, properties: LayerProperties) -> Self {
        let layer_type = match &properties {
            LayerProperties::Background => LayerType::Background,
            LayerProperties::Fill(_) => LayerType::Fill,
            LayerProperties::Line(_) => LayerType::Line,
            LayerProperties::Circle(_) => LayerType::Circle,
            LayerProperties::Symbol(_) => LayerType::Symbol,
            LayerProperties::Raster(_) => LayerType::Raster,
            LayerProperties::FillExtrusion(_) => LayerType::FillExtrusion,
            LayerProperties::Heatmap(_) => LayerType::Heatmap,
            LayerProperties::Hillshade(_) => LayerType::Hillshade,
        };
        Self {
            id: id.to_string(),
            layer_type,
            source: None,
            source_layer: None,
            minzoom: None,
            maxzoom: None,
            filter: None,
            visible: true,
            properties,
        }
    }

    pub fn with_source(mut self, source: &str, source_layer: Option<&str>) -> Self {
        self.source = Some(source.to_string());
        self.source_layer = source_layer.map(String::from);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether the layer is drawn at `zoom`.
    pub fn is_visible_at(&self, zoom: f64) -> bool {
        self.visible
            && self.minzoom.map_or(true, |min| zoom >= min)
            && self.maxzoom.map_or(true, |max| zoom < max)
    }

    pub fn symbol(&self) -> Option<&SymbolProperties> {
        match &self.properties {
            LayerProperties::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Layers which draw features of tiles. Background layers draw without any source.
    pub fn has_source_data(&self) -> bool {
        self.layer_type != LayerType::Background && self.source.is_some()
    }
}

impl Eq for StyleLayer {}

impl PartialEq for StyleLayer {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Hash for StyleLayer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use crate::style::{
        layer::{LayerProperties, LayerType, LineJoin, StyleLayer, SymbolPlacement, TextAnchor},
        property::StyleProperty,
    };

    #[test]
    fn merges_layout_and_paint() {
        let layer: StyleLayer = serde_json::from_value(json!({
            "id": "road-labels",
            "type": "symbol",
            "source": "openmaptiles",
            "source-layer": "transportation_name",
            "minzoom": 10,
            "filter": ["==", "class", "primary"],
            "layout": {
                "symbol-placement": "line",
                "text-field": "{name}",
                "text-size": 14,
                "text-anchor": "top",
                "text-allow-overlap": true
            },
            "paint": {"text-color": "#333"}
        }))
        .unwrap();

        assert_eq!(layer.layer_type, LayerType::Symbol);
        assert_eq!(layer.source_layer.as_deref(), Some("transportation_name"));
        assert!(layer.filter.is_some());
        let symbol = layer.symbol().unwrap();
        assert_eq!(symbol.symbol_placement, SymbolPlacement::Line);
        assert_eq!(symbol.text_anchor, TextAnchor::Top);
        assert!(symbol.text_allow_overlap);
        assert!(!symbol.icon_allow_overlap);
        assert_eq!(symbol.text_size.evaluate(10.0, &Map::new()), Some(14.0));
        assert_eq!(
            symbol.text_field,
            Some(StyleProperty::Constant("{name}".to_string()))
        );
        assert!(symbol.text_pitch_with_map());
    }

    #[test]
    fn zoom_range_and_visibility() {
        let layer: StyleLayer = serde_json::from_value(json!({
            "id": "water",
            "type": "fill",
            "source": "openmaptiles",
            "source-layer": "water",
            "minzoom": 4,
            "maxzoom": 10
        }))
        .unwrap();
        assert!(!layer.is_visible_at(3.9));
        assert!(layer.is_visible_at(4.0));
        assert!(!layer.is_visible_at(10.0));

        let hidden: StyleLayer = serde_json::from_value(json!({
            "id": "hidden",
            "type": "line",
            "source": "openmaptiles",
            "layout": {"visibility": "none", "line-join": "round"}
        }))
        .unwrap();
        assert!(!hidden.is_visible_at(5.0));
        match hidden.properties {
            LayerProperties::Line(line) => assert_eq!(line.line_join, LineJoin::Round),
            other => panic!("unexpected properties {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(serde_json::from_value::<StyleLayer>(json!({"id": "x", "type": "sky"})).is_err());
    }
}
