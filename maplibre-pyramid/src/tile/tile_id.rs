//! Addressing of tiles in the quad tree.
//!
//! A [`CanonicalTileID`] names the content of a tile. An [`UnwrappedTileID`] adds the number of
//! world copies the tile is shifted horizontally and an [`OverscaledTileID`] adds the zoom level the
//! content is displayed at.

use std::fmt;

use crate::coords::{EXTENT, MAX_ZOOM, TILE_SIZE};

/// Identifies a tile in the quad tree independent of how it is displayed.
///
/// # Invariant
///
/// `x` and `y` are smaller than `2^z`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalTileID {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileID {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        debug_assert!(z <= 32, "zoom level {z} exceeds coordinate width");
        debug_assert!((x as u64) < (1u64 << z), "x={x} is out of range for z={z}");
        debug_assert!((y as u64) < (1u64 << z), "y={y} is out of range for z={z}");
        Self { z, x, y }
    }

    /// Number of tiles along one axis at the zoom level of this tile.
    pub fn dimension(&self) -> u64 {
        1u64 << self.z
    }

    pub fn is_child_of(&self, parent: &CanonicalTileID) -> bool {
        if parent.z >= self.z {
            return false;
        }
        let shift = self.z - parent.z;
        (self.x as u64 >> shift) == parent.x as u64 && (self.y as u64 >> shift) == parent.y as u64
    }

    /// Returns the ancestor at `z` if `z` is lower, or the upper-left descendant at `z` if `z` is
    /// higher than the zoom of this tile.
    pub fn scaled_to(&self, z: u8) -> CanonicalTileID {
        debug_assert!(z <= 32);
        if z <= self.z {
            let shift = self.z - z;
            CanonicalTileID::new(z, (self.x as u64 >> shift) as u32, (self.y as u64 >> shift) as u32)
        } else {
            let shift = z - self.z;
            CanonicalTileID::new(z, ((self.x as u64) << shift) as u32, ((self.y as u64) << shift) as u32)
        }
    }

    /// The four tiles one level down. Empty beyond [`MAX_ZOOM`].
    pub fn children(&self) -> Vec<CanonicalTileID> {
        if self.z >= MAX_ZOOM {
            return Vec::new();
        }
        let z = self.z + 1;
        let x = self.x * 2;
        let y = self.y * 2;
        vec![
            CanonicalTileID::new(z, x, y),
            CanonicalTileID::new(z, x, y + 1),
            CanonicalTileID::new(z, x + 1, y),
            CanonicalTileID::new(z, x + 1, y + 1),
        ]
    }

    pub fn parent(&self) -> Option<CanonicalTileID> {
        if self.z == 0 {
            return None;
        }
        Some(self.scaled_to(self.z - 1))
    }

    /// Bing maps style quad key. The root tile has an empty key.
    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(self.z as usize);
        for i in (1..=self.z).rev() {
            let mask = 1u64 << (i - 1);
            let mut digit = b'0';
            if self.x as u64 & mask != 0 {
                digit += 1;
            }
            if self.y as u64 & mask != 0 {
                digit += 2;
            }
            key.push(digit as char);
        }
        key
    }
}

impl fmt::Display for CanonicalTileID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A tile placed into a horizontally repeating world.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnwrappedTileID {
    pub wrap: i32,
    pub canonical: CanonicalTileID,
}

impl UnwrappedTileID {
    pub fn new(wrap: i32, canonical: CanonicalTileID) -> Self {
        Self { wrap, canonical }
    }

    /// Creates an id from a column which may lie outside of `[0, 2^z)`. The column is folded
    /// into the world and the number of world copies it was shifted by becomes the wrap. Rows
    /// outside the world are clamped.
    pub fn from_zxy(z: u8, x: i64, y: i64) -> Self {
        let dim = 1i64 << z;
        let wrap = if x < 0 { x - dim + 1 } else { x } / dim;
        let wrapped_x = x - wrap * dim;
        let clamped_y = y.clamp(0, dim - 1);
        Self {
            wrap: wrap as i32,
            canonical: CanonicalTileID::new(z, wrapped_x as u32, clamped_y as u32),
        }
    }

    /// Column of the tile in the unbounded world.
    pub fn unwrapped_x(&self) -> i64 {
        self.canonical.x as i64 + self.wrap as i64 * self.canonical.dimension() as i64
    }

    pub fn is_child_of(&self, parent: &UnwrappedTileID) -> bool {
        self.wrap == parent.wrap && self.canonical.is_child_of(&parent.canonical)
    }

    /// Ancestor at `z`, keeping the wrap. `z` must not exceed the zoom of this tile.
    pub fn scaled_to(&self, z: u8) -> UnwrappedTileID {
        debug_assert!(z <= self.canonical.z);
        UnwrappedTileID::new(self.wrap, self.canonical.scaled_to(z.min(self.canonical.z)))
    }

    pub fn children(&self) -> Vec<UnwrappedTileID> {
        self.canonical
            .children()
            .into_iter()
            .map(|child| UnwrappedTileID::new(self.wrap, child))
            .collect()
    }

    pub fn parent(&self) -> Option<UnwrappedTileID> {
        self.canonical
            .parent()
            .map(|parent| UnwrappedTileID::new(self.wrap, parent))
    }

    /// Displays this tile at `overscaled_z`, which must be at least the zoom of the tile.
    pub fn overscale_to(&self, overscaled_z: u8) -> OverscaledTileID {
        debug_assert!(overscaled_z >= self.canonical.z);
        OverscaledTileID::new(overscaled_z.max(self.canonical.z), self.wrap, self.canonical)
    }

    pub fn overscale_factor_in(&self, z: u8) -> u32 {
        1 << z.saturating_sub(self.canonical.z).min(31)
    }

    /// Converts a length in pixels at zoom level `zoom` to tile units of this tile.
    pub fn pixels_to_tile_units(&self, pixels: f64, zoom: f64) -> f64 {
        pixels * (EXTENT / (TILE_SIZE * 2f64.powf(zoom - self.canonical.z as f64)))
    }
}

impl fmt::Display for UnwrappedTileID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.canonical, self.wrap)
    }
}

/// A tile whose content is reused at a zoom level at or above its canonical zoom.
///
/// This is the key of parsed tile content.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverscaledTileID {
    pub overscaled_z: u8,
    pub wrap: i32,
    pub canonical: CanonicalTileID,
}

impl OverscaledTileID {
    pub fn new(overscaled_z: u8, wrap: i32, canonical: CanonicalTileID) -> Self {
        debug_assert!(overscaled_z >= canonical.z);
        Self {
            overscaled_z,
            wrap,
            canonical,
        }
    }

    pub fn from_zxy(z: u8, x: u32, y: u32) -> Self {
        Self::new(z, 0, CanonicalTileID::new(z, x, y))
    }

    pub fn overscale_factor(&self) -> u32 {
        1 << (self.overscaled_z - self.canonical.z).min(31)
    }

    /// Scales to `z`. Above the canonical zoom only the overscaled zoom changes.
    pub fn scaled_to(&self, z: u8) -> OverscaledTileID {
        if z >= self.canonical.z {
            OverscaledTileID::new(z, self.wrap, self.canonical)
        } else {
            OverscaledTileID::new(z, self.wrap, self.canonical.scaled_to(z))
        }
    }

    pub fn is_child_of(&self, parent: &OverscaledTileID) -> bool {
        self.overscaled_z > parent.overscaled_z
            && self.wrap == parent.wrap
            && (self.canonical == parent.canonical || self.canonical.is_child_of(&parent.canonical))
    }

    /// Tiles one overscaled level down. Once the canonical zoom reaches `source_max_zoom` the
    /// content can not be subdivided and the single child is an overscaled copy.
    pub fn children(&self, source_max_zoom: u8) -> Vec<OverscaledTileID> {
        if self.overscaled_z >= MAX_ZOOM {
            return Vec::new();
        }
        let z = self.overscaled_z + 1;
        if self.canonical.z >= source_max_zoom {
            return vec![OverscaledTileID::new(z, self.wrap, self.canonical)];
        }
        self.canonical
            .children()
            .into_iter()
            .map(|child| OverscaledTileID::new(z, self.wrap, child))
            .collect()
    }

    pub fn to_unwrapped(&self) -> UnwrappedTileID {
        UnwrappedTileID::new(self.wrap, self.canonical)
    }

    pub fn unwrap_to(&self, wrap: i32) -> OverscaledTileID {
        OverscaledTileID::new(self.overscaled_z, wrap, self.canonical)
    }
}

impl fmt::Display for OverscaledTileID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}=>{}@{}",
            self.canonical, self.overscaled_z, self.wrap
        )
    }
}
