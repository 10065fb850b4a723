//! CPU textures and the resource store behind texture and font handles

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::debug;

use super::text::Font;
use crate::scene::{FontId, TextMeasure, TextMetrics, TextureId};

/// Straight-alpha RGBA8 image.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    /// `pixels` must hold exactly `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Single-color texture, handy for fallbacks and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Option<Self> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::from_rgba(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let i = (y * self.width as usize + x) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Bilinear sample at texel-space coordinates with clamp-to-edge.
    /// Texel centers sit at `n + 0.5`.
    pub fn sample_texel(&self, x: f32, y: f32) -> [f32; 4] {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let fx = (x - 0.5).clamp(0.0, max_x);
        let fy = (y - 0.5).clamp(0.0, max_y);

        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as u32, y0 as u32);

        let a = self.texel(x0, y0);
        let b = self.texel(x0 + 1, y0);
        let c = self.texel(x0, y0 + 1);
        let d = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0; 4];
        for (i, slot) in out.iter_mut().enumerate() {
            let top = a[i] as f32 * (1.0 - tx) + b[i] as f32 * tx;
            let bottom = c[i] as f32 * (1.0 - tx) + d[i] as f32 * tx;
            *slot = (top * (1.0 - ty) + bottom * ty) / 255.0;
        }
        out
    }

    /// Bilinear sample at normalized coordinates.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        self.sample_texel(u * self.width as f32, v * self.height as f32)
    }
}

/// Owner of every texture and font the scene refers to by handle.
///
/// Textures belong to exactly one image widget and are released when that
/// widget goes away. Fonts are shared and cached by file and size; a cached
/// font lives while some widget refers to it or while it is pinned.
#[derive(Debug, Default)]
pub struct Resources {
    textures: HashMap<TextureId, Texture>,
    next_texture: u32,
    fonts: HashMap<FontId, Font>,
    next_font: u32,
    font_keys: HashMap<(PathBuf, u32), FontId>,
    pinned_fonts: HashSet<FontId>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_texture(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, texture);
        id
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(&id)
    }

    pub fn release_textures(&mut self, ids: impl IntoIterator<Item = TextureId>) {
        for id in ids {
            if self.textures.remove(&id).is_some() {
                debug!("released texture {:?}", id);
            }
        }
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Font previously loaded from `path` at `size`, if any.
    pub fn cached_font(&self, path: &Path, size: f32) -> Option<FontId> {
        self.font_keys
            .get(&(path.to_path_buf(), size.to_bits()))
            .copied()
    }

    pub fn insert_font(&mut self, path: &Path, size: f32, font: Font) -> FontId {
        let id = FontId(self.next_font);
        self.next_font += 1;
        self.fonts.insert(id, font);
        self.font_keys.insert((path.to_path_buf(), size.to_bits()), id);
        id
    }

    /// Keep `id` loaded even when no widget refers to it.
    pub fn pin_font(&mut self, id: FontId) {
        self.pinned_fonts.insert(id);
    }

    /// Evict every unpinned font not in `in_use`. Returns how many went.
    pub fn retain_fonts(&mut self, in_use: &HashSet<FontId>) -> usize {
        let pinned = &self.pinned_fonts;
        let before = self.fonts.len();
        self.fonts.retain(|id, _| {
            let keep = in_use.contains(id) || pinned.contains(id);
            if !keep {
                debug!("evicted font {:?}", id);
            }
            keep
        });
        let fonts = &self.fonts;
        self.font_keys.retain(|_, id| fonts.contains_key(id));
        before - self.fonts.len()
    }

    pub fn font(&self, id: FontId) -> Option<&Font> {
        self.fonts.get(&id)
    }

    pub fn font_count(&self) -> usize {
        self.fonts.len()
    }
}

impl TextMeasure for Resources {
    fn measure(&self, font: FontId, text: &str) -> Option<TextMetrics> {
        self.font(font).map(|f| f.measure(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(Texture::from_rgba(2, 2, vec![0; 15]).is_none());
        assert!(Texture::from_rgba(0, 2, vec![]).is_none());
        assert!(Texture::from_rgba(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn bilinear_blends_between_texels() {
        let tex = Texture::from_rgba(2, 1, vec![0, 0, 0, 255, 255, 255, 255, 255]).unwrap();
        let left = tex.sample_texel(0.5, 0.5);
        let mid = tex.sample_texel(1.0, 0.5);
        let right = tex.sample_texel(1.5, 0.5);
        assert_eq!(left[0], 0.0);
        assert!((mid[0] - 0.5).abs() < 1e-6);
        assert_eq!(right[0], 1.0);
        // Clamped outside the image
        assert_eq!(tex.sample(-1.0, 0.5)[0], 0.0);
        assert_eq!(tex.sample(2.0, 0.5)[0], 1.0);
    }

    #[test]
    fn textures_are_released_by_handle() {
        let mut res = Resources::new();
        let a = res.insert_texture(Texture::solid(1, 1, [1, 2, 3, 4]).unwrap());
        let b = res.insert_texture(Texture::solid(1, 1, [5, 6, 7, 8]).unwrap());
        assert_ne!(a, b);
        res.release_textures([a]);
        assert!(res.texture(a).is_none());
        assert_eq!(res.texture(b).unwrap().texel(0, 0), [5, 6, 7, 8]);
        assert_eq!(res.texture_count(), 1);
    }

    #[test]
    fn unreferenced_fonts_are_evicted_unless_pinned() {
        use crate::renderer::text::tests::block_font;

        let mut res = Resources::new();
        let shell = res.insert_font(Path::new("a.toml"), 48.0, block_font(48.0));
        let small = res.insert_font(Path::new("a.toml"), 12.0, block_font(12.0));
        let large = res.insert_font(Path::new("a.toml"), 24.0, block_font(24.0));
        res.pin_font(shell);

        let in_use: HashSet<FontId> = [large].into_iter().collect();
        assert_eq!(res.retain_fonts(&in_use), 1);
        assert!(res.font(small).is_none());
        assert_eq!(res.cached_font(Path::new("a.toml"), 12.0), None);
        assert_eq!(res.cached_font(Path::new("a.toml"), 24.0), Some(large));
        assert_eq!(res.cached_font(Path::new("a.toml"), 48.0), Some(shell));

        // Ids are never reused after eviction
        let again = res.insert_font(Path::new("a.toml"), 12.0, block_font(12.0));
        assert_ne!(again, small);
        assert_eq!(res.font_count(), 3);
    }
}
