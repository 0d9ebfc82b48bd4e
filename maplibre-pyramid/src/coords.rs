//! Provides utilities related to geographic and projected coordinates.

use std::{
    f64::consts::PI,
    fmt,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};

/// Number of tile-local units along one edge of a tile.
pub const EXTENT: f64 = 8192.0;
pub const EXTENT_SINT: i32 = EXTENT as i32;
/// Default size of a tile in pixels.
pub const TILE_SIZE: f64 = 512.0;
/// Highest zoom level for which tile arithmetic stays within 32-bit coordinates.
pub const MAX_ZOOM: u8 = 25;

pub const LATITUDE_MAX: f64 = 85.051128779806604;
pub const LONGITUDE_MAX: f64 = 180.0;
pub const DEGREES_MAX: f64 = 360.0;

/// The unit in which geometries and symbols are on a tile (`0..EXTENT`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileSpace;

/// Pixels on the screen, including the collision padding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScreenSpace;

/// Integer zoom level of a tile.
#[derive(
    Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone, Debug, Default, Serialize, Deserialize,
)]
pub struct ZoomLevel(u8);

impl ZoomLevel {
    pub const fn new(z: u8) -> Self {
        ZoomLevel(z)
    }

    pub fn is_root(self) -> bool {
        self.0 == 0
    }

    /// Number of tiles along one axis at this zoom level.
    pub fn tile_count(self) -> u32 {
        1u32 << self.0.min(31)
    }
}

impl Display for ZoomLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ZoomLevel {
    fn from(zoom_level: u8) -> Self {
        ZoomLevel(zoom_level)
    }
}

impl From<ZoomLevel> for u8 {
    fn from(val: ZoomLevel) -> Self {
        val.0
    }
}

/// A geographic position in degrees.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        LatLng {
            latitude,
            longitude,
        }
    }

    /// Returns the position with its longitude wrapped into `[-180, 180)`.
    pub fn wrapped(&self) -> Self {
        let longitude = (self.longitude + LONGITUDE_MAX).rem_euclid(DEGREES_MAX) - LONGITUDE_MAX;
        LatLng::new(self.latitude, longitude)
    }
}

impl Display for LatLng {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// An axis aligned geographic rectangle. Longitudes are not wrapped, which allows bounds to cross
/// the antimeridian by extending beyond ±180.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    sw: LatLng,
    ne: LatLng,
}

impl LatLngBounds {
    /// The whole web-mercator world.
    pub fn world() -> Self {
        Self {
            sw: LatLng::new(-90.0, -180.0),
            ne: LatLng::new(90.0, 180.0),
        }
    }

    /// Bounds which contain nothing. Extending them with a point yields a singleton.
    pub fn empty() -> Self {
        Self {
            sw: LatLng::new(90.0, 180.0),
            ne: LatLng::new(-90.0, -180.0),
        }
    }

    pub fn singleton(position: LatLng) -> Self {
        Self {
            sw: position,
            ne: position,
        }
    }

    /// Smallest bounds containing both positions.
    pub fn hull(a: LatLng, b: LatLng) -> Self {
        let mut bounds = Self::singleton(a);
        bounds.extend(b);
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.sw.latitude > self.ne.latitude || self.sw.longitude > self.ne.longitude
    }

    pub fn extend(&mut self, position: LatLng) {
        self.sw.latitude = self.sw.latitude.min(position.latitude);
        self.sw.longitude = self.sw.longitude.min(position.longitude);
        self.ne.latitude = self.ne.latitude.max(position.latitude);
        self.ne.longitude = self.ne.longitude.max(position.longitude);
    }

    pub fn contains(&self, position: &LatLng) -> bool {
        position.latitude >= self.sw.latitude
            && position.latitude <= self.ne.latitude
            && position.longitude >= self.sw.longitude
            && position.longitude <= self.ne.longitude
    }

    pub fn south(&self) -> f64 {
        self.sw.latitude
    }

    pub fn west(&self) -> f64 {
        self.sw.longitude
    }

    pub fn north(&self) -> f64 {
        self.ne.latitude
    }

    pub fn east(&self) -> f64 {
        self.ne.longitude
    }

    pub fn southwest(&self) -> LatLng {
        self.sw
    }

    pub fn northeast(&self) -> LatLng {
        self.ne
    }

    pub fn northwest(&self) -> LatLng {
        LatLng::new(self.north(), self.west())
    }

    pub fn southeast(&self) -> LatLng {
        LatLng::new(self.south(), self.east())
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.sw.latitude + self.ne.latitude) / 2.0,
            (self.sw.longitude + self.ne.longitude) / 2.0,
        )
    }
}

/// A point on the screen in pixels. The origin is in the upper-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct ScreenCoordinate {
    pub x: f64,
    pub y: f64,
}

impl ScreenCoordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A position in the web-mercator plane in units of tiles at a given zoom level.
///
/// # Coordinate System Origin
///
/// The origin is in the upper-left corner of the world.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct TileCoordinate {
    pub x: f64,
    pub y: f64,
}

impl TileCoordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Spherical web-mercator projection.
pub struct Projection;

impl Projection {
    /// Projects `position` into the mercator plane where the whole world measures `world_size`
    /// units. Latitudes are clamped to the valid mercator range.
    pub fn project_with_world_size(position: &LatLng, world_size: f64) -> TileCoordinate {
        let latitude = position.latitude.clamp(-LATITUDE_MAX, LATITUDE_MAX);
        let x = LONGITUDE_MAX + position.longitude;
        let y = LONGITUDE_MAX
            - (180.0 / PI) * f64::ln(f64::tan(PI / 4.0 + latitude * PI / DEGREES_MAX));
        TileCoordinate::new(x * world_size / DEGREES_MAX, y * world_size / DEGREES_MAX)
    }

    /// Projects `position` to tile units at zoom level `z`.
    pub fn project(position: &LatLng, z: u8) -> TileCoordinate {
        Self::project_with_world_size(position, 2f64.powi(z as i32))
    }

    /// Inverse of [`Projection::project_with_world_size`].
    pub fn unproject(point: &TileCoordinate, world_size: f64) -> LatLng {
        let x = point.x * DEGREES_MAX / world_size - LONGITUDE_MAX;
        let y = LONGITUDE_MAX - point.y * DEGREES_MAX / world_size;
        let latitude = DEGREES_MAX / PI * f64::atan(f64::exp(y * PI / 180.0)) - 90.0;
        LatLng::new(latitude, x)
    }
}

#[cfg(test)]
mod tests {
    use crate::coords::{LatLng, LatLngBounds, Projection, LATITUDE_MAX};

    #[test]
    fn hull_orders_corners() {
        let bounds = LatLngBounds::hull(LatLng::new(37.8271, -122.3204), LatLng::new(37.6609, -122.5744));
        assert_eq!(bounds.south(), 37.6609);
        assert_eq!(bounds.north(), 37.8271);
        assert_eq!(bounds.west(), -122.5744);
        assert_eq!(bounds.east(), -122.3204);
        assert!(!bounds.is_empty());
    }

    #[test]
    fn empty_and_singleton() {
        assert!(LatLngBounds::empty().is_empty());
        let singleton = LatLngBounds::singleton(LatLng::new(0.0, 0.0));
        assert!(!singleton.is_empty());
        assert!(singleton.contains(&LatLng::new(0.0, 0.0)));
    }

    #[test]
    fn projection_round_trips_and_clamps() {
        let origin = Projection::project(&LatLng::new(0.0, 0.0), 1);
        assert!((origin.x - 1.0).abs() < 1e-9);
        assert!((origin.y - 1.0).abs() < 1e-9);

        let top = Projection::project(&LatLng::new(89.0, -180.0), 0);
        assert!(top.y.abs() < 1e-9);
        assert!(top.x.abs() < 1e-9);

        let position = LatLng::new(37.7, -122.4);
        let back = Projection::unproject(&Projection::project(&position, 10), 1024.0);
        assert!((back.latitude - position.latitude).abs() < 1e-9);
        assert!((back.longitude - position.longitude).abs() < 1e-9);

        let max = Projection::unproject(&Projection::project(&LatLng::new(90.0, 0.0), 3), 8.0);
        assert!((max.latitude - LATITUDE_MAX).abs() < 1e-9);
    }

    #[test]
    fn wraps_longitude() {
        assert_eq!(LatLng::new(10.0, 190.0).wrapped().longitude, -170.0);
        assert_eq!(LatLng::new(10.0, -180.0).wrapped().longitude, -180.0);
    }
}
