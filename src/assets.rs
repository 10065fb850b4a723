//! Font and image loading
//!
//! The compositor consumes fonts and images as opaque textures. This module
//! is the boundary: it turns a file path into a [`Texture`] or a baked
//! [`Font`], or reports why it could not.
//!
//! A baked font is a TOML manifest next to a PNG glyph atlas:
//!
//! ```toml
//! atlas = "sans-32.png"
//! pixel_size = 32.0
//! first_char = 32
//!
//! [[glyphs]]
//! x0 = 0
//! y0 = 0
//! x1 = 12
//! y1 = 24
//! xoff = 1.0
//! yoff = -22.0
//! xadvance = 14.0
//! ```
//!
//! Glyph coverage is read from the atlas alpha channel, or from the gray
//! level when the atlas has no alpha.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use crate::error::AssetError;
use crate::renderer::{Font, Glyph, Texture};

/// Loader seam used by the protocol dispatcher and the shell.
pub trait AssetLoader {
    fn load_image(&self, path: &Path) -> Result<Texture, AssetError>;
    fn load_font(&self, path: &Path, size: f32) -> Result<Font, AssetError>;
}

#[derive(Debug, Deserialize)]
struct FontManifest {
    atlas: PathBuf,
    pixel_size: f32,
    #[serde(default = "default_first_char")]
    first_char: u32,
    glyphs: Vec<Glyph>,
}

fn default_first_char() -> u32 {
    32
}

/// Decoded 8-bit PNG before channel normalization.
struct RawImage {
    width: u32,
    height: u32,
    color: png::ColorType,
    bytes: Vec<u8>,
}

/// Loads assets from the filesystem. Relative paths resolve against `root`
/// when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileAssets {
    root: Option<PathBuf>,
}

impl FileAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn decode_png(path: &Path) -> Result<RawImage, AssetError> {
        let png_err = |source: png::DecodingError| AssetError::Png {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut decoder = png::Decoder::new(BufReader::new(file));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info().map_err(png_err)?;

        let mut bytes = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut bytes).map_err(png_err)?;
        bytes.truncate(frame.buffer_size());

        if frame.bit_depth != png::BitDepth::Eight {
            return Err(AssetError::UnsupportedImage {
                path: path.to_path_buf(),
                detail: format!("bit depth {:?}", frame.bit_depth),
            });
        }

        Ok(RawImage {
            width: frame.width,
            height: frame.height,
            color: frame.color_type,
            bytes,
        })
    }

    /// Expand decoded channels to RGBA. `coverage` selects glyph-atlas
    /// semantics, where gray levels become alpha over white.
    fn to_rgba(path: &Path, raw: RawImage, coverage: bool) -> Result<Texture, AssetError> {
        use png::ColorType;

        let pixels: Vec<u8> = match (raw.color, coverage) {
            (ColorType::Rgba, _) => raw.bytes,
            (ColorType::Rgb, false) => raw
                .bytes
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            (ColorType::Rgb, true) => raw
                .bytes
                .chunks_exact(3)
                .flat_map(|p| [255, 255, 255, p[0]])
                .collect(),
            (ColorType::GrayscaleAlpha, _) => raw
                .bytes
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            (ColorType::Grayscale, false) => {
                raw.bytes.iter().flat_map(|&g| [g, g, g, 255]).collect()
            }
            (ColorType::Grayscale, true) => {
                raw.bytes.iter().flat_map(|&g| [255, 255, 255, g]).collect()
            }
            (other, _) => {
                return Err(AssetError::UnsupportedImage {
                    path: path.to_path_buf(),
                    detail: format!("color type {:?}", other),
                })
            }
        };

        Texture::from_rgba(raw.width, raw.height, pixels).ok_or_else(|| {
            AssetError::UnsupportedImage {
                path: path.to_path_buf(),
                detail: "pixel data does not match dimensions".to_string(),
            }
        })
    }
}

impl AssetLoader for FileAssets {
    fn load_image(&self, path: &Path) -> Result<Texture, AssetError> {
        let path = self.resolve(path);
        let raw = Self::decode_png(&path)?;
        let texture = Self::to_rgba(&path, raw, false)?;
        debug!(
            "loaded image {} ({}x{})",
            path.display(),
            texture.width(),
            texture.height()
        );
        Ok(texture)
    }

    fn load_font(&self, path: &Path, size: f32) -> Result<Font, AssetError> {
        let path = self.resolve(path);
        let invalid = |detail: String| AssetError::InvalidFont {
            path: path.clone(),
            detail,
        };

        if !(size > 0.0 && size.is_finite()) {
            return Err(invalid(format!("size {size} must be positive")));
        }

        let source = fs::read_to_string(&path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: FontManifest =
            toml::from_str(&source).map_err(|source| AssetError::Manifest {
                path: path.clone(),
                source,
            })?;

        if !(manifest.pixel_size > 0.0) {
            return Err(invalid("pixel_size must be positive".to_string()));
        }
        if manifest.glyphs.is_empty() {
            return Err(invalid("no glyphs".to_string()));
        }

        let atlas_path = match path.parent() {
            Some(dir) if manifest.atlas.is_relative() => dir.join(&manifest.atlas),
            _ => manifest.atlas.clone(),
        };
        let raw = Self::decode_png(&atlas_path)?;
        let atlas = Self::to_rgba(&atlas_path, raw, true)?;

        if let Some((i, g)) = manifest.glyphs.iter().enumerate().find(|(_, g)| {
            g.x0 > g.x1
                || g.y0 > g.y1
                || g.x1 as u32 > atlas.width()
                || g.y1 as u32 > atlas.height()
        }) {
            return Err(invalid(format!(
                "glyph {} rectangle {:?} outside {}x{} atlas",
                i,
                (g.x0, g.y0, g.x1, g.y1),
                atlas.width(),
                atlas.height()
            )));
        }

        info!(
            "loaded font {} ({} glyphs baked at {}px, drawn at {}px)",
            path.display(),
            manifest.glyphs.len(),
            manifest.pixel_size,
            size
        );
        Ok(Font::new(
            atlas,
            manifest.glyphs,
            manifest.first_char,
            manifest.pixel_size,
            size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32, color: png::ColorType, data: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
    }

    const MANIFEST: &str = r#"
atlas = "atlas.png"
pixel_size = 8.0
first_char = 65

[[glyphs]]
x0 = 0
y0 = 0
x1 = 2
y1 = 2
xoff = 0.0
yoff = -2.0
xadvance = 3.0
"#;

    #[test]
    fn loads_rgb_image_as_opaque() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        write_png(&path, 2, 1, png::ColorType::Rgb, &[255, 0, 0, 0, 255, 0]);

        let tex = FileAssets::new().load_image(&path).unwrap();
        assert_eq!((tex.width(), tex.height()), (2, 1));
        assert_eq!(tex.texel(0, 0), [255, 0, 0, 255]);
        assert_eq!(tex.texel(1, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn resolves_relative_paths_against_root() {
        let dir = TempDir::new().unwrap();
        write_png(
            &dir.path().join("dot.png"),
            1,
            1,
            png::ColorType::Rgba,
            &[1, 2, 3, 4],
        );

        let tex = FileAssets::with_root(dir.path())
            .load_image(Path::new("dot.png"))
            .unwrap();
        assert_eq!(tex.texel(0, 0), [1, 2, 3, 4]);
    }

    #[test]
    fn missing_image_is_io_error() {
        let err = FileAssets::new()
            .load_image(Path::new("/nonexistent/flux.png"))
            .unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }

    #[test]
    fn loads_font_with_gray_atlas() {
        let dir = TempDir::new().unwrap();
        write_png(
            &dir.path().join("atlas.png"),
            2,
            2,
            png::ColorType::Grayscale,
            &[0, 128, 255, 64],
        );
        let manifest = dir.path().join("font.toml");
        fs::write(&manifest, MANIFEST).unwrap();

        let font = FileAssets::new().load_font(&manifest, 16.0).unwrap();
        assert_eq!(font.scale(), 2.0);
        assert_eq!(font.atlas().texel(1, 0), [255, 255, 255, 128]);
        assert!(font.glyph('A').is_some());
        assert!(font.glyph('B').is_none());
        assert_eq!(font.measure("AA").width, 12.0);
    }

    #[test]
    fn rejects_glyphs_outside_atlas() {
        let dir = TempDir::new().unwrap();
        write_png(
            &dir.path().join("atlas.png"),
            1,
            1,
            png::ColorType::Grayscale,
            &[255],
        );
        let manifest = dir.path().join("font.toml");
        fs::write(&manifest, MANIFEST).unwrap();

        let err = FileAssets::new().load_font(&manifest, 8.0).unwrap_err();
        assert!(matches!(err, AssetError::InvalidFont { .. }));
    }

    #[test]
    fn malformed_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("font.toml");
        fs::write(&manifest, "pixel_size = \"big\"").unwrap();

        let err = FileAssets::new().load_font(&manifest, 8.0).unwrap_err();
        assert!(matches!(err, AssetError::Manifest { .. }));
    }
}
