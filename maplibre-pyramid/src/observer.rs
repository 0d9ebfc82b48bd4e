//! Receives events of a [Map](crate::map::Map) which are of interest to its embedder.

use crate::error::Error;

/// Events are delivered on the thread driving the map. All methods do nothing by default.
pub trait MapObserver: Send + Sync {
    /// A tile or the data of a source failed to load.
    fn on_source_error(&self, _source_id: &str, _error: &Error) {}

    fn on_glyphs_error(&self, _font_stack: &[String], _range: u32, _error: &Error) {}

    fn on_sprite_error(&self, _error: &Error) {}

    /// A still image finished. `error` is the first error which occurred while loading it.
    fn on_did_finish_rendering_map(&self, _error: Option<&Error>) {}
}

/// Ignores all events.
pub struct NopObserver;

impl MapObserver for NopObserver {}

/// Logs all events.
pub struct LogObserver;

impl MapObserver for LogObserver {
    fn on_source_error(&self, source_id: &str, error: &Error) {
        log::error!("source {source_id}: {error}");
    }

    fn on_glyphs_error(&self, font_stack: &[String], range: u32, error: &Error) {
        log::error!("glyphs {range} of {}: {error}", font_stack.join(","));
    }

    fn on_sprite_error(&self, error: &Error) {
        log::error!("sprite: {error}");
    }

    fn on_did_finish_rendering_map(&self, error: Option<&Error>) {
        match error {
            Some(error) => log::warn!("still image finished with error: {error}"),
            None => log::info!("still image finished"),
        }
    }
}
