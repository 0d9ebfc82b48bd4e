//! Rectangular ranges of tiles used to restrict sources to their bounds.

use crate::{
    coords::{LatLngBounds, Projection, LONGITUDE_MAX},
    style::source::ZoomRange,
    tile::tile_id::CanonicalTileID,
};

/// The tiles intersecting geographic bounds, computed at the maximum zoom level and scaled down
/// for lower zoom levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRange {
    min: (u32, u32),
    max: (u32, u32),
    zoom_range: ZoomRange,
}

impl TileRange {
    pub fn from_bounds(bounds: &LatLngBounds, zoom_range: ZoomRange) -> Self {
        let z = zoom_range.max;
        let dimension = 2f64.powi(z as i32);
        let sw = Projection::project(&bounds.southwest().wrapped(), z);
        let ne = bounds.northeast();
        let ne = Projection::project(
            &if ne.longitude > LONGITUDE_MAX {
                ne.wrapped()
            } else {
                ne
            },
            z,
        );

        let column = |x: f64| x.floor().clamp(0.0, dimension - 1.0) as u32;
        let row = |y: f64| y.floor().clamp(0.0, dimension - 1.0) as u32;
        Self {
            min: (column(sw.x), row(ne.y)),
            max: (column(ne.x), row(sw.y)),
            zoom_range,
        }
    }

    pub fn contains(&self, tile: &CanonicalTileID) -> bool {
        if !self.zoom_range.contains(tile.z) {
            return false;
        }
        if tile.z == 0 {
            return true;
        }

        let dz = self.zoom_range.max - tile.z;
        let (x0, y0) = (self.min.0 >> dz, self.min.1 >> dz);
        let (x1, y1) = (self.max.0 >> dz, self.max.1 >> dz);

        let x_inside = if self.min.0 > self.max.0 {
            // Bounds crossing the antimeridian.
            tile.x >= x0 || tile.x <= x1
        } else {
            tile.x >= x0 && tile.x <= x1
        };
        x_inside && tile.y >= y0 && tile.y <= y1
    }
}
