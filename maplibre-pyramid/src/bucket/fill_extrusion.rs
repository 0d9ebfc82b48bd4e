use lyon::tessellation::TessellationError;

use crate::{
    bucket::GeometryBucket,
    style::layer::FillExtrusionProperties,
    tessellation::{tile_tessellator::tessellate_extrusion, ExtrusionVertex},
    tile::geometry_tile_data::{classify_rings, FeatureType, GeometryTileFeature},
};

#[derive(Debug, Default)]
pub struct FillExtrusionBucket {
    pub geometry: GeometryBucket<ExtrusionVertex>,
}

impl FillExtrusionBucket {
    pub fn add_feature(
        &mut self,
        feature: &GeometryTileFeature,
        properties: &FillExtrusionProperties,
        zoom: f64,
    ) -> Result<(), TessellationError> {
        if feature.feature_type != FeatureType::Polygon {
            return Ok(());
        }
        let height = properties
            .fill_extrusion_height
            .evaluate(zoom, &feature.properties)
            .unwrap_or(0.0)
            .max(0.0);
        let base = properties
            .fill_extrusion_base
            .evaluate(zoom, &feature.properties)
            .unwrap_or(0.0)
            .clamp(0.0, height);

        for polygon in classify_rings(&feature.geometry) {
            tessellate_extrusion(&polygon, base as f32, height as f32, &mut self.geometry.buffer)?;
        }
        self.geometry.buffer.end_feature();
        Ok(())
    }
}
