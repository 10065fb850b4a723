//! Baked bitmap fonts
//!
//! A font is a glyph atlas plus per-glyph placement data for a contiguous
//! code-point range, baked once at `baked_size` pixels. Drawing at another
//! size scales the baked metrics. Only printable ASCII is ever laid out.

use serde::Deserialize;

use super::texture::Texture;
use crate::scene::TextMetrics;

/// First and one-past-last code points that may be drawn.
pub const PRINTABLE: std::ops::Range<u32> = 32..127;

/// Placement of one baked glyph: its atlas rectangle (texels), offset of
/// the rectangle from the pen position, and pen advance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Glyph {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
    pub xoff: f32,
    pub yoff: f32,
    pub xadvance: f32,
}

/// A positioned glyph rectangle relative to the text origin (baseline),
/// plus where to read it from the atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub s0: f32,
    pub t0: f32,
    pub s1: f32,
    pub t1: f32,
}

#[derive(Debug, Clone)]
pub struct Font {
    atlas: Texture,
    glyphs: Vec<Glyph>,
    first_char: u32,
    baked_size: f32,
    size: f32,
}

impl Font {
    pub fn new(atlas: Texture, glyphs: Vec<Glyph>, first_char: u32, baked_size: f32, size: f32) -> Self {
        Self {
            atlas,
            glyphs,
            first_char,
            baked_size,
            size,
        }
    }

    pub fn atlas(&self) -> &Texture {
        &self.atlas
    }

    /// Requested pixel size; also the line height.
    pub fn size(&self) -> f32 {
        self.size
    }

    /// Ratio between drawn and baked pixels.
    pub fn scale(&self) -> f32 {
        if self.baked_size > 0.0 {
            self.size / self.baked_size
        } else {
            1.0
        }
    }

    pub fn glyph(&self, c: char) -> Option<&Glyph> {
        let code = c as u32;
        if !PRINTABLE.contains(&code) || code < self.first_char {
            return None;
        }
        self.glyphs.get((code - self.first_char) as usize)
    }

    /// Lay out `text` starting at the origin. `\n` returns the pen to x = 0
    /// and moves it down one line; glyphs outside the baked range are skipped.
    pub fn layout(&self, text: &str) -> Vec<GlyphQuad> {
        let scale = self.scale();
        let mut quads = Vec::with_capacity(text.len());
        let (mut pen_x, mut pen_y) = (0.0f32, 0.0f32);

        for c in text.chars() {
            if c == '\n' {
                pen_x = 0.0;
                pen_y += self.size;
                continue;
            }
            let Some(g) = self.glyph(c) else {
                continue;
            };

            let x0 = pen_x + g.xoff * scale;
            let y0 = pen_y + g.yoff * scale;
            quads.push(GlyphQuad {
                x0,
                y0,
                x1: x0 + (g.x1 as f32 - g.x0 as f32) * scale,
                y1: y0 + (g.y1 as f32 - g.y0 as f32) * scale,
                s0: g.x0 as f32,
                t0: g.y0 as f32,
                s1: g.x1 as f32,
                t1: g.y1 as f32,
            });
            pen_x += g.xadvance * scale;
        }
        quads
    }

    /// Extent of `text` as it would be drawn, without drawing it.
    pub fn measure(&self, text: &str) -> TextMetrics {
        let scale = self.scale();
        let mut width = 0.0f32;
        let mut pen_x = 0.0f32;
        for c in text.chars() {
            if c == '\n' {
                pen_x = 0.0;
            } else if let Some(g) = self.glyph(c) {
                pen_x += g.xadvance * scale;
            }
            width = width.max(pen_x);
        }

        let quads = self.layout(text);
        let min_y = quads.iter().map(|q| q.y0).reduce(f32::min);
        let max_y = quads.iter().map(|q| q.y1).reduce(f32::max);

        match (min_y, max_y) {
            (Some(min_y), Some(max_y)) => TextMetrics {
                width,
                height: max_y - min_y,
                visual_min_y: min_y,
            },
            _ => TextMetrics {
                width,
                ..TextMetrics::default()
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Font with every printable glyph an 8x10 box sitting on the baseline,
    /// baked at 10px. The atlas is fully opaque.
    pub(crate) fn block_font(size: f32) -> Font {
        let glyphs = (PRINTABLE)
            .map(|_| Glyph {
                x0: 0,
                y0: 0,
                x1: 8,
                y1: 10,
                xoff: 0.0,
                yoff: -10.0,
                xadvance: 9.0,
            })
            .collect();
        let atlas = Texture::solid(8, 10, [255, 255, 255, 255]).unwrap();
        Font::new(atlas, glyphs, 32, 10.0, size)
    }

    #[test]
    fn skips_unbaked_code_points() {
        let font = block_font(10.0);
        assert_eq!(font.layout("a\u{7f}b\u{e9}").len(), 2);
        assert!(font.glyph('\t').is_none());
        assert!(font.glyph(' ').is_some());
    }

    #[test]
    fn newline_resets_pen() {
        let font = block_font(10.0);
        let quads = font.layout("ab\nc");
        assert_eq!(quads.len(), 3);
        assert_eq!(quads[1].x0, 9.0);
        assert_eq!(quads[2].x0, 0.0);
        assert_eq!(quads[2].y0, quads[0].y0 + 10.0);
    }

    #[test]
    fn measure_scales_with_size() {
        let small = block_font(10.0).measure("abc");
        assert_eq!(small.width, 27.0);
        assert_eq!(small.height, 10.0);
        assert_eq!(small.visual_min_y, -10.0);

        let large = block_font(20.0).measure("abc");
        assert_eq!(large.width, 54.0);
        assert_eq!(large.height, 20.0);
    }

    #[test]
    fn measure_uses_widest_line() {
        let m = block_font(10.0).measure("abcd\nx");
        assert_eq!(m.width, 36.0);
        assert_eq!(m.height, 20.0);
    }

    #[test]
    fn empty_text_measures_zero() {
        assert_eq!(block_font(10.0).measure(""), TextMetrics::default());
    }
}
