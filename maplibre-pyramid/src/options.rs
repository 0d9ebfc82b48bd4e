//! Configuration of a [Map](crate::map::Map).

use std::time::Duration;

/// How a map is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapMode {
    /// A continually updating map. Labels fade in and out.
    #[default]
    Continuous,
    /// A once-off still image of an arbitrary viewport.
    Static,
    /// A once-off still image of a single tile.
    Tile,
}

pub const DEFAULT_FADE_DURATION: Duration = Duration::from_millis(300);
pub const DEFAULT_PREFETCH_ZOOM_DELTA: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    pub map_mode: MapMode,
    pub pixel_ratio: f64,
    /// Number of tiles kept per source after they went out of view. Zero sizes the cache from
    /// the viewport.
    pub tile_cache_size: usize,
    pub fade_duration: Duration,
    /// Whether labels of different sources collide with each other.
    pub cross_source_collisions: bool,
    /// Parents this many levels above the ideal zoom are loaded as placeholders.
    pub prefetch_zoom_delta: u8,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            map_mode: MapMode::default(),
            pixel_ratio: 1.0,
            tile_cache_size: 0,
            fade_duration: DEFAULT_FADE_DURATION,
            cross_source_collisions: true,
            prefetch_zoom_delta: DEFAULT_PREFETCH_ZOOM_DELTA,
        }
    }
}

impl MapOptions {
    pub fn with_map_mode(mut self, map_mode: MapMode) -> Self {
        self.map_mode = map_mode;
        self
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f64) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    pub fn with_tile_cache_size(mut self, tile_cache_size: usize) -> Self {
        self.tile_cache_size = tile_cache_size;
        self
    }

    pub fn with_fade_duration(mut self, fade_duration: Duration) -> Self {
        self.fade_duration = fade_duration;
        self
    }

    pub fn with_cross_source_collisions(mut self, cross_source_collisions: bool) -> Self {
        self.cross_source_collisions = cross_source_collisions;
        self
    }

    pub fn with_prefetch_zoom_delta(mut self, prefetch_zoom_delta: u8) -> Self {
        self.prefetch_zoom_delta = prefetch_zoom_delta;
        self
    }

    /// Fades only animate continuous maps.
    pub fn effective_fade_duration(&self) -> Duration {
        match self.map_mode {
            MapMode::Continuous => self.fade_duration,
            MapMode::Static | MapMode::Tile => Duration::ZERO,
        }
    }
}
