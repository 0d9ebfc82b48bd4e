//! Positioning of glyphs of a label and of icons around their anchor.

use crate::{
    style::layer::{SymbolPlacement, TextAnchor, TextTransform},
    text::{
        glyph::{FontStack, GlyphId, GlyphMap, GlyphMetrics},
        image_manager::ImageMetrics,
    },
};

/// Size of the em box glyphs are rendered with. Shapings are computed in this unit and scaled
/// by the text size divided by `ONE_EM`.
pub const ONE_EM: f64 = 24.0;

/// Distance from the top of the em box to the baseline.
const BASELINE: f64 = 17.0;

/// Glyph bitmaps carry a border of this many pixels around the glyph.
pub const GLYPH_BORDER: f64 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionedGlyph {
    pub id: GlyphId,
    /// Left edge of the glyph advance.
    pub x: f64,
    /// Baseline of the glyph's line.
    pub y: f64,
    pub metrics: GlyphMetrics,
}

/// A label laid out in ems relative to its anchor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shaping {
    pub glyphs: Vec<PositionedGlyph>,
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
    pub line_count: usize,
}

impl Shaping {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

pub struct ShapingOptions {
    /// In ems of [`ONE_EM`] pixels.
    pub max_width: f64,
    pub line_height: f64,
    pub letter_spacing: f64,
    pub anchor: TextAnchor,
    pub offset: [f64; 2],
    pub placement: SymbolPlacement,
}

pub fn transform_text(text: &str, transform: TextTransform) -> String {
    match transform {
        TextTransform::None => text.to_string(),
        TextTransform::Uppercase => text.to_uppercase(),
        TextTransform::Lowercase => text.to_lowercase(),
    }
}

struct Word {
    glyphs: Vec<(GlyphId, GlyphMetrics)>,
    width: f64,
}

/// Splits the text into lines of words. Line labels are never broken.
fn break_lines(words: Vec<Vec<Word>>, max_width: f64, break_long_lines: bool) -> Vec<Vec<Word>> {
    if !break_long_lines || max_width <= 0.0 {
        return words;
    }

    let mut lines = Vec::new();
    for paragraph in words {
        let total: f64 = paragraph.iter().map(|word| word.width).sum();
        // Aim for lines of similar length rather than filling each line up to the maximum.
        let line_count = (total / max_width).ceil().max(1.0);
        let target_width = total / line_count;

        let mut line: Vec<Word> = Vec::new();
        let mut line_width = 0.0;
        for word in paragraph {
            if !line.is_empty() && line_width + word.width > target_width {
                lines.push(std::mem::take(&mut line));
                line_width = 0.0;
            }
            line_width += word.width;
            line.push(word);
        }
        lines.push(line);
    }
    lines
}

/// Lays out `text` with the glyphs of `font_stack`. Returns `None` if none of the characters
/// has a glyph.
pub fn shape_text(
    text: &str,
    font_stack: &FontStack,
    glyphs: &GlyphMap,
    options: &ShapingOptions,
) -> Option<Shaping> {
    let spacing = options.letter_spacing * ONE_EM;
    let space = |c: char| c == ' ' || c == '\u{200b}';

    // Paragraphs of words. The spaces between words stay part of the preceding word.
    let mut paragraphs = Vec::new();
    for paragraph in text.split('\n') {
        let mut words = Vec::new();
        let mut word = Word {
            glyphs: Vec::new(),
            width: 0.0,
        };
        for c in paragraph.chars() {
            if let Some(metrics) = glyphs.glyph(font_stack, c as GlyphId) {
                word.glyphs.push((c as GlyphId, *metrics));
                word.width += metrics.advance as f64 + spacing;
            }
            if space(c) && !word.glyphs.is_empty() {
                words.push(std::mem::replace(
                    &mut word,
                    Word {
                        glyphs: Vec::new(),
                        width: 0.0,
                    },
                ));
            }
        }
        if !word.glyphs.is_empty() {
            words.push(word);
        }
        paragraphs.push(words);
    }

    let lines = break_lines(
        paragraphs,
        options.max_width * ONE_EM,
        options.placement == SymbolPlacement::Point,
    );
    if lines.iter().all(|line| line.is_empty()) {
        return None;
    }

    let line_height = options.line_height * ONE_EM;
    let mut shaping = Shaping {
        line_count: lines.len(),
        ..Shaping::default()
    };

    let mut line_widths = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let mut x = 0.0;
        let y = index as f64 * line_height;
        for word in line {
            for (id, metrics) in &word.glyphs {
                shaping.glyphs.push(PositionedGlyph {
                    id: *id,
                    x,
                    y,
                    metrics: *metrics,
                });
                x += metrics.advance as f64 + spacing;
            }
        }
        // Trailing spaces and letter spacing do not count towards the line width.
        let trailing = line
            .last()
            .and_then(|word| word.glyphs.last())
            .map_or(0.0, |(id, metrics)| {
                let space_width = if char::from_u32(*id).map_or(false, space) {
                    metrics.advance as f64
                } else {
                    0.0
                };
                space_width + spacing
            });
        line_widths.push((x - trailing).max(0.0));
    }

    let max_line_width = line_widths.iter().cloned().fold(0.0, f64::max);
    let height = lines.len() as f64 * line_height;
    let (horizontal_align, vertical_align) = options.anchor.alignment();
    let shift_x = -horizontal_align * max_line_width + options.offset[0] * ONE_EM;
    let shift_y = -vertical_align * height + options.offset[1] * ONE_EM;

    // Lines are centered within the label.
    let mut glyph_index = 0;
    for (index, line) in lines.iter().enumerate() {
        let justify = (max_line_width - line_widths[index]) * 0.5;
        let count: usize = line.iter().map(|word| word.glyphs.len()).sum();
        for glyph in &mut shaping.glyphs[glyph_index..glyph_index + count] {
            glyph.x += shift_x + justify;
            glyph.y += shift_y + (line_height - ONE_EM) / 2.0 + BASELINE;
        }
        glyph_index += count;
    }

    shaping.left = shift_x;
    shaping.right = shift_x + max_line_width;
    shaping.top = shift_y;
    shaping.bottom = shift_y + height;
    Some(shaping)
}

/// The box of an icon relative to its anchor, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionedIcon {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

pub fn shape_icon(image: &ImageMetrics, offset: [f64; 2], size: f64) -> PositionedIcon {
    let width = image.width as f64 / image.pixel_ratio * size;
    let height = image.height as f64 / image.pixel_ratio * size;
    let dx = offset[0] * size;
    let dy = offset[1] * size;
    PositionedIcon {
        top: dy - height / 2.0,
        bottom: dy + height / 2.0,
        left: dx - width / 2.0,
        right: dx + width / 2.0,
    }
}
