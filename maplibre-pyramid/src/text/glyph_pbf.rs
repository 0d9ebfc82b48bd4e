//! Protocol buffer encoding of glyph ranges as served by glyph servers.

use prost::Message;

use crate::{
    error::ParseError,
    text::glyph::{GlyphId, GlyphMetrics, GLYPHS_PER_RANGE},
};

#[derive(Clone, PartialEq, Message)]
pub struct Glyph {
    #[prost(uint32, required, tag = "1")]
    pub id: u32,
    /// Signed distance field of the glyph with a border of 3 pixels.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub bitmap: Option<Vec<u8>>,
    #[prost(uint32, required, tag = "3")]
    pub width: u32,
    #[prost(uint32, required, tag = "4")]
    pub height: u32,
    #[prost(sint32, required, tag = "5")]
    pub left: i32,
    #[prost(sint32, required, tag = "6")]
    pub top: i32,
    #[prost(uint32, required, tag = "7")]
    pub advance: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct FontStack {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(string, required, tag = "2")]
    pub range: String,
    #[prost(message, repeated, tag = "3")]
    pub glyphs: Vec<Glyph>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Glyphs {
    #[prost(message, repeated, tag = "1")]
    pub stacks: Vec<FontStack>,
}

/// Decodes the glyphs of the range starting at `range_start`. Glyphs outside of the range are
/// ignored.
pub fn parse_glyphs(
    data: &[u8],
    range_start: u32,
) -> Result<Vec<(GlyphId, GlyphMetrics)>, ParseError> {
    let glyphs = Glyphs::decode(data).map_err(|e| ParseError::Glyphs(e.to_string()))?;
    let range = range_start..range_start + GLYPHS_PER_RANGE;

    Ok(glyphs
        .stacks
        .into_iter()
        .flat_map(|stack| stack.glyphs)
        .filter(|glyph| range.contains(&glyph.id))
        .map(|glyph| {
            (
                glyph.id,
                GlyphMetrics {
                    width: glyph.width,
                    height: glyph.height,
                    left: glyph.left,
                    top: glyph.top,
                    advance: glyph.advance,
                },
            )
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use prost::Message;

    use crate::text::glyph_pbf::{parse_glyphs, FontStack, Glyph, Glyphs};

    /// Encodes a range in which every glyph is 10 pixels wide and advances by 12 pixels.
    pub(crate) fn encode_range(range_start: u32, ids: &[u32]) -> Vec<u8> {
        Glyphs {
            stacks: vec![FontStack {
                name: "Open Sans Regular".to_string(),
                range: format!("{}-{}", range_start, range_start + 255),
                glyphs: ids
                    .iter()
                    .map(|id| Glyph {
                        id: *id,
                        bitmap: None,
                        width: 10,
                        height: 14,
                        left: 1,
                        top: -4,
                        advance: 12,
                    })
                    .collect(),
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn decodes_metrics() {
        let glyphs = parse_glyphs(&encode_range(0, &[65, 66, 300]), 0).unwrap();
        assert_eq!(glyphs.len(), 2);
        assert_eq!(glyphs[0].0, 65);
        assert_eq!(glyphs[0].1.advance, 12);
        assert_eq!(glyphs[1].1.top, -4);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_glyphs(&[0x0a, 0xff, 0xff], 0).is_err());
    }
}
