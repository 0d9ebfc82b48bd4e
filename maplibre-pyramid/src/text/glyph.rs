//! Glyph metrics and the ranges in which glyphs are loaded.

use std::collections::{BTreeSet, HashMap};

/// An ordered list of font names. Glyphs are taken from the first font which has them.
pub type FontStack = Vec<String>;

/// Unicode code point of a glyph.
pub type GlyphId = u32;

pub const GLYPHS_PER_RANGE: u32 = 256;

/// Glyphs are only served for the basic multilingual plane.
const MAX_GLYPH_ID: GlyphId = 0xffff;

/// The first code point of the range of 256 glyphs containing `id`.
pub fn glyph_range(id: GlyphId) -> Option<u32> {
    if id > MAX_GLYPH_ID {
        return None;
    }
    Some((id / GLYPHS_PER_RANGE) * GLYPHS_PER_RANGE)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlyphMetrics {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub advance: u32,
}

#[derive(Clone, Debug, Default)]
struct FontGlyphs {
    ranges: BTreeSet<u32>,
    glyphs: HashMap<GlyphId, GlyphMetrics>,
}

/// Glyph metrics of all loaded ranges by font stack.
///
/// A range which failed to load is still recorded as loaded so that layout does not wait for
/// it. Its glyphs are simply missing.
#[derive(Clone, Debug, Default)]
pub struct GlyphMap {
    fonts: HashMap<FontStack, FontGlyphs>,
}

impl GlyphMap {
    pub fn insert_range<I>(&mut self, font_stack: &FontStack, range: u32, glyphs: I)
    where
        I: IntoIterator<Item = (GlyphId, GlyphMetrics)>,
    {
        let font = self.fonts.entry(font_stack.clone()).or_default();
        font.ranges.insert(range);
        font.glyphs.extend(glyphs);
    }

    pub fn has_range(&self, font_stack: &FontStack, range: u32) -> bool {
        self.fonts
            .get(font_stack)
            .map_or(false, |font| font.ranges.contains(&range))
    }

    pub fn glyph(&self, font_stack: &FontStack, id: GlyphId) -> Option<&GlyphMetrics> {
        self.fonts.get(font_stack)?.glyphs.get(&id)
    }

    /// Whether every range of `dependencies` is loaded.
    pub fn satisfies(&self, dependencies: &GlyphDependencies) -> bool {
        dependencies.iter().all(|(font_stack, ranges)| {
            ranges
                .iter()
                .all(|range| self.has_range(font_stack, *range))
        })
    }

    /// The ranges of `dependencies` which are not loaded yet.
    pub fn missing(&self, dependencies: &GlyphDependencies) -> GlyphDependencies {
        let mut missing = GlyphDependencies::new();
        for (font_stack, ranges) in dependencies {
            for range in ranges {
                if !self.has_range(font_stack, *range) {
                    missing.entry(font_stack.clone()).or_default().insert(*range);
                }
            }
        }
        missing
    }
}

/// Glyph ranges needed by a tile, by font stack.
pub type GlyphDependencies = HashMap<FontStack, BTreeSet<u32>>;

#[cfg(test)]
mod tests {
    use crate::text::glyph::{glyph_range, GlyphDependencies, GlyphMap, GlyphMetrics};

    #[test]
    fn ranges() {
        assert_eq!(glyph_range('A' as u32), Some(0));
        assert_eq!(glyph_range(0x4e2d), Some(0x4e00));
        assert_eq!(glyph_range(0xffff), Some(0xff00));
        assert_eq!(glyph_range(0x1f600), None);
    }

    #[test]
    fn tracks_loaded_ranges() {
        let font = vec!["Open Sans Regular".to_string()];
        let mut map = GlyphMap::default();
        let mut dependencies = GlyphDependencies::new();
        dependencies.entry(font.clone()).or_default().extend([0, 256]);

        map.insert_range(&font, 0, [('a' as u32, GlyphMetrics::default())]);
        assert!(!map.satisfies(&dependencies));
        assert_eq!(map.missing(&dependencies)[&font].len(), 1);
        assert!(map.glyph(&font, 'a' as u32).is_some());

        map.insert_range(&font, 256, []);
        assert!(map.satisfies(&dependencies));
        assert!(map.missing(&dependencies).is_empty());
    }
}
