//! Everything which depends on the viewport: the camera, the tile pyramids of the sources and
//! the sources themselves.

pub mod render_source;
pub mod tile_pyramid;
pub mod transform_state;
