use lyon::tessellation::TessellationError;

use crate::{
    bucket::{GeometryBucket, UploadPass, VertexAttribute},
    style::layer::LineProperties,
    tessellation::{
        tile_tessellator::{tessellate_lines, LineOptions},
        ShaderVertex,
    },
    tile::geometry_tile_data::{classify_rings, FeatureType, GeometryTileFeature},
};

const DEFAULT_LINE_WIDTH: f64 = 1.0;

/// Lines tessellated with unit width. The evaluated `line-width` of each feature is stored per
/// vertex.
#[derive(Debug, Default)]
pub struct LineBucket {
    pub geometry: GeometryBucket<ShaderVertex>,
    pub widths: VertexAttribute,
}

impl LineBucket {
    pub fn add_feature(
        &mut self,
        feature: &GeometryTileFeature,
        properties: &LineProperties,
        zoom: f64,
    ) -> Result<(), TessellationError> {
        let options = LineOptions {
            join: properties.line_join,
            cap: properties.line_cap,
            miter_limit: properties.line_miter_limit,
        };
        match feature.feature_type {
            FeatureType::LineString => {
                tessellate_lines(&feature.geometry, &options, &mut self.geometry.buffer)?
            }
            // The outlines of polygons are stroked as closed lines.
            FeatureType::Polygon => {
                for polygon in classify_rings(&feature.geometry) {
                    tessellate_lines(&polygon, &options, &mut self.geometry.buffer)?;
                }
            }
            FeatureType::Point | FeatureType::Unknown => return Ok(()),
        }
        self.geometry.buffer.end_feature();

        let width = properties
            .line_width
            .evaluate(zoom, &feature.properties)
            .unwrap_or(DEFAULT_LINE_WIDTH);
        self.widths
            .fill_to(self.geometry.vertex_count(), width as f32);
        Ok(())
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        self.geometry.upload(pass);
        self.widths.upload(pass);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        bucket::{line::LineBucket, tests::RecordingUploadPass},
        style::{layer::LineProperties, property::StyleProperty},
        tile::geometry_tile_data::{FeatureType, GeometryCoordinate, GeometryTileFeature},
    };

    #[test]
    fn stores_width_per_vertex() {
        let properties = LineProperties {
            line_width: StyleProperty::Expression(json!(["get", "width"])),
            ..LineProperties::default()
        };
        let line = |width: f64| GeometryTileFeature {
            id: None,
            feature_type: FeatureType::LineString,
            properties: json!({ "width": width }).as_object().cloned().unwrap(),
            geometry: vec![vec![
                GeometryCoordinate::new(0, 0),
                GeometryCoordinate::new(100, 0),
            ]],
        };

        let mut bucket = LineBucket::default();
        bucket.add_feature(&line(2.0), &properties, 10.0).unwrap();
        let first = bucket.geometry.vertex_count();
        bucket.add_feature(&line(4.0), &properties, 10.0).unwrap();

        assert_eq!(bucket.widths.values.len(), bucket.geometry.vertex_count());
        assert!(bucket.widths.values[..first].iter().all(|w| *w == 2.0));
        assert!(bucket.widths.values[first..].iter().all(|w| *w == 4.0));

        let mut pass = RecordingUploadPass::default();
        bucket.upload(&mut pass);
        assert_eq!(pass.vertex_buffers.len(), 2);
        assert!(bucket.widths.buffer().is_some());
    }
}
