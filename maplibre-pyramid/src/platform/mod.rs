//! This module handles platform specific code.

#[cfg(not(target_arch = "wasm32"))]
pub use noweb::*;

#[cfg(not(target_arch = "wasm32"))]
mod noweb;
