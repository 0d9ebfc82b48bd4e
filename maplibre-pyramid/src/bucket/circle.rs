use crate::{
    bucket::{GeometryBucket, UploadPass, VertexAttribute},
    coords::EXTENT,
    style::layer::CircleProperties,
    tessellation::{tile_tessellator::add_point_quad, ShaderVertex},
    tile::geometry_tile_data::{FeatureType, GeometryTileFeature},
};

const DEFAULT_CIRCLE_RADIUS: f64 = 5.0;

/// One quad per point, extruded by the `circle-radius` stored per vertex.
#[derive(Debug, Default)]
pub struct CircleBucket {
    pub geometry: GeometryBucket<ShaderVertex>,
    pub radii: VertexAttribute,
}

impl CircleBucket {
    pub fn add_feature(
        &mut self,
        feature: &GeometryTileFeature,
        properties: &CircleProperties,
        zoom: f64,
    ) {
        if feature.feature_type != FeatureType::Point {
            return;
        }
        let extent = EXTENT as i16;
        for point in feature.geometry.iter().flatten() {
            // Points outside of the tile are drawn by the neighbouring tile's buffer.
            if point.x < 0 || point.x >= extent || point.y < 0 || point.y >= extent {
                continue;
            }
            add_point_quad(point.x, point.y, &mut self.geometry.buffer);
        }
        self.geometry.buffer.end_feature();

        let radius = properties
            .circle_radius
            .evaluate(zoom, &feature.properties)
            .unwrap_or(DEFAULT_CIRCLE_RADIUS);
        self.radii
            .fill_to(self.geometry.vertex_count(), radius as f32);
    }

    pub fn upload(&mut self, pass: &mut dyn UploadPass) {
        self.geometry.upload(pass);
        self.radii.upload(pass);
    }
}
