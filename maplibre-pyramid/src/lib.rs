//! # maplibre-pyramid
//!
//! The tile pyramid and symbol placement engine of a vector map renderer.
//!
//! For a viewport it decides which tiles of each source are needed, loads them through a
//! [`FileSource`](io::source_client::FileSource), lays them out into buckets on a pool of worker
//! threads and places their labels without collisions. Drawing the buckets is left to the
//! embedder, which receives them through an [`UploadPass`](bucket::UploadPass).
//!
//! ### Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use maplibre_pyramid::{
//!     io::{scheduler::ImmediateScheduler, source_client::StaticFileSource},
//!     map::Map,
//!     observer::LogObserver,
//!     options::{MapMode, MapOptions},
//!     style::Style,
//! };
//!
//! let mut map = Map::new(
//!     MapOptions::default().with_map_mode(MapMode::Static),
//!     Arc::new(StaticFileSource::new()),
//!     Arc::new(ImmediateScheduler),
//!     Arc::new(LogObserver),
//! );
//! map.set_style(Style::from_json(r#"{"version": 8, "sources": {}, "layers": []}"#).unwrap())
//!     .unwrap();
//! map.set_size(512.0, 512.0);
//! map.render_still(|error| assert!(error.is_none()));
//! ```

pub mod bucket;
pub mod coords;
pub mod error;
pub mod io;
pub mod layout;
pub mod map;
pub mod message;
pub mod observer;
pub mod offline;
pub mod options;
pub mod platform;
pub mod render;
pub mod style;
pub mod text;
pub mod tile;

// Internal modules
pub(crate) mod tessellation;
