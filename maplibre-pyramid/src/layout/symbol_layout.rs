//! Lays out the text and icon labels of a symbol layer within a tile.

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    bucket::symbol::{CrossTileId, PlacedSymbol, SymbolBucket, SymbolBuffers, SymbolInstance},
    style::{
        layer::{StyleLayer, SymbolPlacement},
        property::resolve_tokens,
    },
    text::{
        anchor::{get_anchors, Anchor},
        collision_feature::{CollisionFeature, LabelBounds},
        glyph::{glyph_range, FontStack, GlyphDependencies, GlyphMap},
        image_manager::ImageMap,
        shaping::{
            shape_icon, shape_text, transform_text, PositionedIcon, Shaping, ShapingOptions,
            GLYPH_BORDER, ONE_EM,
        },
    },
    tile::{
        geometry_tile_data::{FeatureType, GeometryTileFeature},
        tile_id::OverscaledTileID,
    },
};

/// A feature of the source layer with its label content evaluated.
#[derive(Debug, Clone)]
struct SymbolFeature {
    index: usize,
    feature: GeometryTileFeature,
    text: Option<String>,
    icon: Option<String>,
    sort_key: f64,
}

/// The symbol features of one layer and the glyphs and images they need.
///
/// Creating the bucket has to wait until the dependencies are loaded.
#[derive(Debug)]
pub struct SymbolLayout {
    layer: Arc<StyleLayer>,
    zoom: f64,
    features: Vec<SymbolFeature>,
    glyph_dependencies: GlyphDependencies,
    image_dependencies: BTreeSet<String>,
}

impl SymbolLayout {
    /// Evaluates the labels of `features`, given with their index in the source layer.
    pub fn new<I>(layer: Arc<StyleLayer>, zoom: f64, features: I) -> Option<Self>
    where
        I: IntoIterator<Item = (usize, GeometryTileFeature)>,
    {
        let layout = layer.symbol()?;
        let font_stack: FontStack = layout.text_font.clone();
        let mut glyph_dependencies = GlyphDependencies::new();
        let mut image_dependencies = BTreeSet::new();

        let mut symbol_features = Vec::new();
        for (index, feature) in features {
            let text = layout
                .text_field
                .as_ref()
                .and_then(|field| field.evaluate(zoom, &feature.properties))
                .map(|template| resolve_tokens(&template, &feature.properties))
                .map(|text| transform_text(&text, layout.text_transform))
                .filter(|text| !text.is_empty());
            let icon = layout
                .icon_image
                .as_ref()
                .and_then(|image| image.evaluate(zoom, &feature.properties))
                .map(|template| resolve_tokens(&template, &feature.properties))
                .filter(|icon| !icon.is_empty());
            if text.is_none() && icon.is_none() {
                continue;
            }

            if let Some(text) = &text {
                let ranges = glyph_dependencies.entry(font_stack.clone()).or_default();
                ranges.extend(text.chars().filter_map(|c| glyph_range(c as u32)));
            }
            if let Some(icon) = &icon {
                image_dependencies.insert(icon.clone());
            }

            let sort_key = layout
                .symbol_sort_key
                .as_ref()
                .and_then(|key| key.evaluate(zoom, &feature.properties))
                .unwrap_or(0.0);
            symbol_features.push(SymbolFeature {
                index,
                feature,
                text,
                icon,
                sort_key,
            });
        }

        Some(Self {
            layer,
            zoom,
            features: symbol_features,
            glyph_dependencies,
            image_dependencies,
        })
    }

    pub fn glyph_dependencies(&self) -> &GlyphDependencies {
        &self.glyph_dependencies
    }

    pub fn image_dependencies(&self) -> &BTreeSet<String> {
        &self.image_dependencies
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Shapes all labels and creates their quads and collision geometry. Characters without a
    /// glyph and icons without an image are left out.
    #[tracing::instrument(skip_all, fields(layer = %self.layer.id))]
    pub fn create_bucket(
        &self,
        tile: &OverscaledTileID,
        glyphs: &GlyphMap,
        images: &ImageMap,
    ) -> SymbolBucket {
        let Some(layout) = self.layer.symbol() else {
            return SymbolBucket::new(self.layer.clone(), 0.0, 0.0, false);
        };
        let no_properties = Default::default();
        let bucket_text_size = layout.text_size.evaluate(self.zoom, &no_properties).unwrap_or(16.0);
        let bucket_icon_size = layout.icon_size.evaluate(self.zoom, &no_properties).unwrap_or(1.0);
        let mut bucket = SymbolBucket::new(
            self.layer.clone(),
            bucket_text_size,
            bucket_icon_size,
            layout.text_pitch_with_map(),
        );

        let unwrapped = tile.to_unwrapped();
        // Line labels are measured in pixels of the tile at its own zoom level.
        let tile_units_per_pixel = unwrapped.pixels_to_tile_units(1.0, tile.overscaled_z as f64);
        let shaping_options = ShapingOptions {
            max_width: layout.text_max_width,
            line_height: layout.text_line_height,
            letter_spacing: layout.text_letter_spacing,
            anchor: layout.text_anchor,
            offset: layout.text_offset,
            placement: layout.symbol_placement,
        };

        for feature in &self.features {
            let properties = &feature.feature.properties;
            let text_size = layout
                .text_size
                .evaluate(self.zoom, properties)
                .unwrap_or(bucket_text_size);
            let icon_size = layout
                .icon_size
                .evaluate(self.zoom, properties)
                .unwrap_or(bucket_icon_size);

            let shaping = feature.text.as_ref().and_then(|text| {
                shape_text(text, &layout.text_font, glyphs, &shaping_options)
            });
            let positioned_icon = feature.icon.as_ref().and_then(|name| match images.get(name) {
                Some(image) => Some(shape_icon(image, layout.icon_offset, icon_size)),
                None => {
                    log::debug!("image {name} of layer {} is missing", self.layer.id);
                    None
                }
            });
            if shaping.is_none() && positioned_icon.is_none() {
                continue;
            }

            for (anchor, line) in get_anchors(&feature.feature) {
                if !anchor.is_inside_tile() {
                    // Neighbouring tiles lay out the label.
                    continue;
                }
                let along_line = layout.symbol_placement != SymbolPlacement::Point
                    && feature.feature.feature_type == FeatureType::LineString;
                let collision = |bounds: LabelBounds, box_scale: f64, padding: f64| match &line {
                    Some(line) if along_line => CollisionFeature::new_line(
                        line,
                        &anchor,
                        bounds,
                        box_scale,
                        padding,
                        tile_units_per_pixel,
                    ),
                    _ => CollisionFeature::new_point(&anchor, bounds, box_scale, padding),
                };

                let text = shaping.as_ref().and_then(|shaping| {
                    let (vertex_start, vertex_count) =
                        add_glyph_quads(&mut bucket.text, &anchor, shaping, text_size);
                    (vertex_count > 0).then(|| PlacedSymbol {
                        collision: collision(
                            label_bounds(shaping),
                            text_size / ONE_EM,
                            layout.text_padding,
                        ),
                        vertex_start,
                        vertex_count,
                    })
                });
                let icon = positioned_icon.as_ref().map(|icon| PlacedSymbol {
                    collision: collision(icon_bounds(icon), 1.0, layout.icon_padding),
                    vertex_start: add_icon_quad(&mut bucket.icon, &anchor, icon),
                    vertex_count: 4,
                });
                if text.is_none() && icon.is_none() {
                    continue;
                }

                bucket.instances.push(SymbolInstance {
                    cross_tile_id: CrossTileId::new(
                        &feature.feature,
                        &self.layer.id,
                        feature.sort_key,
                        &unwrapped,
                        &anchor,
                    ),
                    anchor,
                    feature_index: feature.index,
                    sort_key: feature.sort_key,
                    text,
                    icon,
                });
            }
        }

        bucket.sort_instances();
        log::debug!(
            "laid out {} symbols of layer {} in {tile}",
            bucket.instances.len(),
            self.layer.id
        );
        bucket
    }
}

fn label_bounds(shaping: &Shaping) -> LabelBounds {
    LabelBounds {
        top: shaping.top,
        bottom: shaping.bottom,
        left: shaping.left,
        right: shaping.right,
    }
}

fn icon_bounds(icon: &PositionedIcon) -> LabelBounds {
    LabelBounds {
        top: icon.top,
        bottom: icon.bottom,
        left: icon.left,
        right: icon.right,
    }
}

/// Adds one quad per visible glyph. Returns the first vertex and the number of vertices.
fn add_glyph_quads(
    buffers: &mut SymbolBuffers,
    anchor: &Anchor,
    shaping: &Shaping,
    text_size: f64,
) -> (usize, usize) {
    let scale = text_size / ONE_EM;
    let start = buffers.vertices.len();
    let anchor = [anchor.point.x as f32, anchor.point.y as f32];
    for glyph in &shaping.glyphs {
        let metrics = &glyph.metrics;
        if metrics.width == 0 || metrics.height == 0 {
            continue;
        }
        let x0 = glyph.x + metrics.left as f64 - GLYPH_BORDER;
        let y0 = glyph.y - metrics.top as f64 - GLYPH_BORDER;
        let x1 = x0 + metrics.width as f64 + 2.0 * GLYPH_BORDER;
        let y1 = y0 + metrics.height as f64 + 2.0 * GLYPH_BORDER;
        buffers.add_quad(
            anchor,
            [(x0 * scale) as f32, (y0 * scale) as f32],
            [(x1 * scale) as f32, (y1 * scale) as f32],
        );
    }
    (start, buffers.vertices.len() - start)
}

fn add_icon_quad(buffers: &mut SymbolBuffers, anchor: &Anchor, icon: &PositionedIcon) -> usize {
    buffers.add_quad(
        [anchor.point.x as f32, anchor.point.y as f32],
        [icon.left as f32, icon.top as f32],
        [icon.right as f32, icon.bottom as f32],
    )
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use serde_json::json;

    use crate::{
        layout::symbol_layout::SymbolLayout,
        style::{
            layer::{LayerProperties, StyleLayer, SymbolPlacement, SymbolProperties},
            property::StyleProperty,
        },
        text::{image_manager::ImageMetrics, shaping::tests::ascii_glyphs},
        tile::{
            geometry_tile_data::{FeatureType, GeometryCoordinate, GeometryTileFeature},
            tile_id::OverscaledTileID,
        },
    };

    fn layer(configure: impl FnOnce(&mut SymbolProperties)) -> Arc<StyleLayer> {
        let mut properties = SymbolProperties {
            text_field: Some(StyleProperty::Constant("{name}".to_string())),
            text_font: vec!["Test".to_string()],
            ..SymbolProperties::default()
        };
        configure(&mut properties);
        Arc::new(
            StyleLayer::new("labels", LayerProperties::Symbol(Box::new(properties)))
                .with_source("places", Some("poi")),
        )
    }

    fn point(id: u64, name: &str, x: i16, y: i16) -> GeometryTileFeature {
        GeometryTileFeature {
            id: Some(id),
            feature_type: FeatureType::Point,
            properties: json!({ "name": name, "rank": id })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            geometry: vec![vec![GeometryCoordinate::new(x, y)]],
        }
    }

    #[test]
    fn collects_dependencies() {
        let layout = SymbolLayout::new(
            layer(|p| p.icon_image = Some(StyleProperty::Constant("marker".to_string()))),
            14.0,
            vec![(0, point(1, "Ab", 100, 100)), (1, point(2, "中", 200, 200))],
        )
        .unwrap();
        let ranges = &layout.glyph_dependencies()[&vec!["Test".to_string()]];
        assert_eq!(ranges.iter().copied().collect::<Vec<_>>(), vec![0, 0x4e00]);
        assert!(layout.image_dependencies().contains("marker"));
    }

    #[test]
    fn skips_features_without_labels() {
        let layout = SymbolLayout::new(
            layer(|_| {}),
            14.0,
            vec![(0, point(1, "", 100, 100))],
        )
        .unwrap();
        assert!(layout.is_empty());

        let fill = Arc::new(StyleLayer::new(
            "fill",
            LayerProperties::Fill(Default::default()),
        ));
        assert!(SymbolLayout::new(fill, 14.0, Vec::new()).is_none());
    }

    #[test]
    fn creates_glyph_quads_and_collision_boxes() {
        let layout = SymbolLayout::new(
            layer(|_| {}),
            14.0,
            vec![
                (0, point(1, "ab", 4096, 4096)),
                (1, point(2, "outside", -10, 4096)),
            ],
        )
        .unwrap();
        let glyphs = ascii_glyphs(&vec!["Test".to_string()]);
        let tile = OverscaledTileID::from_zxy(14, 100, 100);
        let bucket = layout.create_bucket(&tile, &glyphs, &HashMap::new());

        // The anchor outside of the tile is left to the neighbouring tile.
        assert_eq!(bucket.instances.len(), 1);
        let instance = &bucket.instances[0];
        assert_eq!(instance.feature_index, 0);
        let text = instance.text.as_ref().unwrap();
        assert_eq!(text.vertex_count, 8);
        assert_eq!(bucket.text.vertices.len(), 8);
        assert!(instance.icon.is_none());

        // Two glyphs of 12 pixel advance at text size 16 of 24.
        let collision_box = &text.collision.boxes[0];
        let scale = 16.0 / 24.0;
        assert!((collision_box.x1 - (-12.0 * scale - 2.0)).abs() < 1e-9);
        assert!((collision_box.x2 - (12.0 * scale + 2.0)).abs() < 1e-9);
        assert_eq!(collision_box.anchor.x, 4096.0);
    }

    #[test]
    fn icons_and_sort_keys() {
        let layout = SymbolLayout::new(
            layer(|p| {
                p.text_field = None;
                p.icon_image = Some(StyleProperty::Constant("marker".to_string()));
                p.symbol_sort_key = Some(StyleProperty::Expression(json!(["get", "rank"])));
            }),
            14.0,
            vec![(0, point(5, "a", 100, 100)), (1, point(2, "b", 200, 200))],
        )
        .unwrap();
        let images = HashMap::from([(
            "marker".to_string(),
            ImageMetrics {
                width: 20,
                height: 20,
                x: 0,
                y: 0,
                pixel_ratio: 1.0,
                sdf: false,
            },
        )]);
        let bucket = layout.create_bucket(
            &OverscaledTileID::from_zxy(14, 100, 100),
            &ascii_glyphs(&vec!["Test".to_string()]),
            &images,
        );
        let keys: Vec<f64> = bucket.instances.iter().map(|i| i.sort_key).collect();
        assert_eq!(keys, vec![2.0, 5.0]);
        assert_eq!(bucket.icon.vertices.len(), 8);
        assert!(bucket.instances.iter().all(|i| i.text.is_none()));

        let without_images = layout.create_bucket(
            &OverscaledTileID::from_zxy(14, 100, 100),
            &ascii_glyphs(&vec!["Test".to_string()]),
            &HashMap::new(),
        );
        assert!(without_images.instances.is_empty());
    }

    #[test]
    fn line_labels_follow_their_line() {
        let line = GeometryTileFeature {
            id: Some(9),
            feature_type: FeatureType::LineString,
            properties: json!({ "name": "Main St" }).as_object().cloned().unwrap_or_default(),
            geometry: vec![vec![
                GeometryCoordinate::new(0, 4000),
                GeometryCoordinate::new(8000, 4000),
            ]],
        };
        let layout = SymbolLayout::new(
            layer(|p| p.symbol_placement = SymbolPlacement::Line),
            14.0,
            vec![(0, line)],
        )
        .unwrap();
        let bucket = layout.create_bucket(
            &OverscaledTileID::from_zxy(14, 100, 100),
            &ascii_glyphs(&vec!["Test".to_string()]),
            &HashMap::new(),
        );
        let instance = &bucket.instances[0];
        assert_eq!(instance.anchor.point.x, 4000.0);
        let collision = &instance.text.as_ref().unwrap().collision;
        assert!(collision.along_line);
        assert!(collision.boxes.len() > 1);
    }
}
