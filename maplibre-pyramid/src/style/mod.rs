//! Style description: sources and the layers drawing them.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    coords::LatLng,
    error::Error,
    style::{layer::StyleLayer, source::Source},
};

pub mod filter;
pub mod layer;
pub mod property;
pub mod source;

/// Stores the style for a multi-layered map.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Style {
    #[serde(default)]
    pub version: u16,
    #[serde(default)]
    pub name: Option<String>,
    /// `[longitude, latitude]`
    #[serde(default)]
    pub center: Option<[f64; 2]>,
    #[serde(default)]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub sources: HashMap<String, Source>,
    /// Base URL of the sprite, without extension and pixel ratio suffix.
    #[serde(default)]
    pub sprite: Option<String>,
    /// URL template of glyph ranges with `{fontstack}` and `{range}` place holders.
    #[serde(default)]
    pub glyphs: Option<String>,
    #[serde(default)]
    pub layers: Vec<StyleLayer>,
}

impl Style {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let style: Style = serde_json::from_str(json)?;
        style.validate()?;
        Ok(style)
    }

    fn validate(&self) -> Result<(), Error> {
        let mut ids = std::collections::HashSet::new();
        for layer in &self.layers {
            if !ids.insert(layer.id.as_str()) {
                return Err(Error::Style(format!("duplicate layer id {}", layer.id)));
            }
            if let Some(source) = &layer.source {
                if !self.sources.contains_key(source) {
                    return Err(Error::Style(format!(
                        "layer {} references unknown source {source}",
                        layer.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn center(&self) -> Option<LatLng> {
        self.center.map(|[lng, lat]| LatLng::new(lat, lng))
    }

    /// Layers drawing data of `source_id` in paint order.
    pub fn layers_of_source<'a>(
        &'a self,
        source_id: &'a str,
    ) -> impl Iterator<Item = &'a StyleLayer> + 'a {
        self.layers
            .iter()
            .filter(move |layer| layer.source.as_deref() == Some(source_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::style::{layer::LayerType, Style};

    #[test]
    fn parses_style() {
        let style = Style::from_json(
            r#"{
                "version": 8,
                "center": [-122.5, 37.8],
                "zoom": 10,
                "glyphs": "https://example.com/fonts/{fontstack}/{range}.pbf",
                "sources": {
                    "streets": {"type": "vector", "tiles": ["https://example.com/{z}/{x}/{y}.pbf"]}
                },
                "layers": [
                    {"id": "background", "type": "background"},
                    {"id": "water", "type": "fill", "source": "streets", "source-layer": "water"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(style.layers.len(), 2);
        assert_eq!(style.center().unwrap().latitude, 37.8);
        let layers: Vec<_> = style.layers_of_source("streets").collect();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].layer_type, LayerType::Fill);
    }

    #[test]
    fn rejects_dangling_sources_and_duplicates() {
        assert!(Style::from_json(
            r#"{"layers": [{"id": "a", "type": "fill", "source": "missing"}]}"#
        )
        .is_err());
        assert!(Style::from_json(
            r#"{"layers": [{"id": "a", "type": "background"}, {"id": "a", "type": "background"}]}"#
        )
        .is_err());
    }
}
