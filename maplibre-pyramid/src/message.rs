//! Messages delivered to the coordinating thread by file sources and workers.

use crate::{
    io::source_client::Response, layout::LayoutResult, text::glyph::FontStack,
    tile::tile_id::OverscaledTileID,
};

/// Identifies a tile across all sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub source_id: String,
    pub tile: OverscaledTileID,
}

impl TileKey {
    pub fn new(source_id: &str, tile: OverscaledTileID) -> Self {
        Self {
            source_id: source_id.to_string(),
            tile,
        }
    }
}

pub enum TileMessage {
    /// Answer to the request with the given id. Answers to superseded requests are dropped.
    Response { request_id: u64, response: Response },
    Layout(Box<LayoutResult>),
}

pub enum Message {
    Tile {
        key: TileKey,
        message: TileMessage,
    },
    Glyphs {
        font_stack: FontStack,
        range: u32,
        response: Response,
    },
    Sprite(Response),
    /// Data of a GeoJSON source referenced by URL.
    Source {
        source_id: String,
        response: Response,
    },
}
