//! Labels: glyphs and images they are drawn with, how they are laid out and which of them are
//! shown after collision detection.

pub mod anchor;
pub mod collision_feature;
pub mod collision_index;
pub mod glyph;
pub mod glyph_manager;
pub mod glyph_pbf;
pub mod grid_index;
pub mod image_manager;
pub mod placement;
pub mod shaping;
