//! Expansion of URL templates of tiles, glyphs and sprites.

use std::f64::consts::PI;

use crate::{style::source::TileAddressingScheme, tile::tile_id::CanonicalTileID};

const HEX: &[u8; 16] = b"0123456789abcdef";
const EARTH_RADIUS_M: f64 = 6378137.0;

/// Replaces every `{token}` in `template` using `lookup`. Tokens for which `lookup` returns
/// `None` are kept verbatim.
pub fn replace_tokens<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(length) = rest[start..].find('}') else {
            break;
        };
        let token = &rest[start + 1..start + length];
        result.push_str(&rest[..start]);
        match lookup(token) {
            Some(value) => result.push_str(&value),
            None => result.push_str(&rest[start..=start + length]),
        }
        rest = &rest[start + length + 1..];
    }
    result.push_str(rest);
    result
}

fn mercator_coordinate(x: u32, y: u32, z: u8) -> (f64, f64) {
    let circumference = 2.0 * PI * EARTH_RADIUS_M;
    let resolution = circumference / 2f64.powi(z as i32);
    (
        x as f64 * resolution - PI * EARTH_RADIUS_M,
        y as f64 * resolution - PI * EARTH_RADIUS_M,
    )
}

/// Bounding box of a tile in EPSG:3857 meters as `minx,miny,maxx,maxy`.
fn tile_bbox(tile: &CanonicalTileID) -> String {
    let y = (1u32 << tile.z) - tile.y - 1;
    let min = mercator_coordinate(tile.x, y, tile.z);
    let max = mercator_coordinate(tile.x + 1, y + 1, tile.z);
    format!("{},{},{},{}", min.0, min.1, max.0, max.1)
}

/// Expands a tile URL template. The TMS scheme counts rows from the bottom.
pub fn tile_url(
    template: &str,
    tile: &CanonicalTileID,
    pixel_ratio: f64,
    scheme: TileAddressingScheme,
) -> String {
    replace_tokens(template, |token| match token {
        "z" => Some(tile.z.to_string()),
        "x" => Some(tile.x.to_string()),
        "y" => Some(
            match scheme {
                TileAddressingScheme::XYZ => tile.y,
                TileAddressingScheme::TMS => (1u32 << tile.z) - tile.y - 1,
            }
            .to_string(),
        ),
        "ratio" => Some(if pixel_ratio > 1.0 { "@2x" } else { "" }.to_string()),
        "quadkey" => Some(tile.quadkey()),
        "prefix" => Some(
            [HEX[(tile.x % 16) as usize] as char, HEX[(tile.y % 16) as usize] as char]
                .iter()
                .collect(),
        ),
        "bbox-epsg-3857" => Some(tile_bbox(tile)),
        _ => None,
    })
}

/// Expands a glyph URL template for a font stack and a range of 256 code points.
pub fn glyphs_url(template: &str, font_stack: &[String], range_start: u32) -> String {
    let font_stack = font_stack.join(",").replace(' ', "%20");
    replace_tokens(template, |token| match token {
        "fontstack" => Some(font_stack.clone()),
        "range" => Some(format!("{}-{}", range_start, range_start + 255)),
        _ => None,
    })
}

/// URL of the sprite index for `pixel_ratio`.
pub fn sprite_json_url(base: &str, pixel_ratio: f64) -> String {
    format!("{base}{}.json", if pixel_ratio > 1.0 { "@2x" } else { "" })
}
