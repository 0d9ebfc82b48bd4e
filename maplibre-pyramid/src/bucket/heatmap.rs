use crate::{
    bucket::{GeometryBucket, UploadPass, VertexAttribute},
    style::layer::HeatmapProperties,
    tessellation::{tile_tessellator::add_point_quad, ShaderVertex},
    tile::geometry_tile_data::{FeatureType, GeometryTileFeature},
};

/// Point quads like circles, each carrying its `heatmap-weight` and `heatmap-radius`.
#[derive(Debug, Default)]
pub struct HeatmapBucket {
    pub geometry: GeometryBucket<ShaderVertex>,
    pub weights: VertexAttribute,
    pub radii: VertexAttribute,
}

impl HeatmapBucket {
    pub fn add_feature(
        &mut self,
        feature: &GeometryTileFeature,
        properties: &HeatmapProperties,
        zoom: f64,
    ) {
        if feature.feature_type != FeatureType::Point {
            return;
        }
        // Unlike circles, heatmap points near the edge contribute to both tiles.
        for point in feature.geometry.iter().flatten() {
            add_point_quad(point.x, point.y, &mut self.geometry.buffer);
        }
        self.geometry.buffer.end_feature();

        let weight = properties
            .heatmap_weight
            .evaluate(zoom, &feature.properties)
            .unwrap_or(1.0);
        let radius = properties
            .heatmap_radius
            .evaluate(zoom, &feature.properties)
            .unwrap_or(30.0);
        let count = self.geometry.vertex_count();
        self.weights.fill_to(count, weight.max(0.0) as f32);
        self.radii.fill_to(count, radius as f32);
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        self.geometry.upload(pass);
        self.weights.upload(pass);
        self.radii.upload(pass);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        bucket::heatmap::HeatmapBucket,
        style::{layer::HeatmapProperties, property::StyleProperty},
        tile::geometry_tile_data::{FeatureType, GeometryCoordinate, GeometryTileFeature},
    };

    #[test]
    fn weights_follow_features() {
        let properties = HeatmapProperties {
            heatmap_weight: StyleProperty::Expression(json!(["get", "mag"])),
            ..HeatmapProperties::default()
        };
        let quake = |mag: f64| GeometryTileFeature {
            id: None,
            feature_type: FeatureType::Point,
            properties: json!({ "mag": mag }).as_object().cloned().unwrap(),
            geometry: vec![vec![GeometryCoordinate::new(-5, 100)]],
        };
        let mut bucket = HeatmapBucket::default();
        bucket.add_feature(&quake(2.5), &properties, 5.0);
        bucket.add_feature(&quake(-1.0), &properties, 5.0);

        assert_eq!(
            bucket.weights.values,
            vec![2.5, 2.5, 2.5, 2.5, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(bucket.radii.values.len(), 8);
    }
}
