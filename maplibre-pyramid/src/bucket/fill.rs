use lyon::tessellation::TessellationError;

use crate::{
    bucket::GeometryBucket,
    tessellation::{tile_tessellator::tessellate_polygon, ShaderVertex},
    tile::geometry_tile_data::{classify_rings, FeatureType, GeometryTileFeature},
};

#[derive(Debug, Default)]
pub struct FillBucket {
    pub geometry: GeometryBucket<ShaderVertex>,
}

impl FillBucket {
    /// Tessellates the polygons of a feature. Features which are not polygons are skipped.
    pub fn add_feature(&mut self, feature: &GeometryTileFeature) -> Result<(), TessellationError> {
        if feature.feature_type != FeatureType::Polygon {
            return Ok(());
        }
        for polygon in classify_rings(&feature.geometry) {
            tessellate_polygon(&polygon, &mut self.geometry.buffer)?;
        }
        self.geometry.buffer.end_feature();
        Ok(())
    }
}
