//! Brand watermark
//!
//! The font is resolved once per run through a fallback chain:
//! brand font file, then the first loadable system serif, then the built-in
//! bitmap font. Every link that fails is recorded as a `FontUnavailable`
//! warning; resolution itself cannot fail.

use ab_glyph::{point, Font, FontVec, GlyphId, PxScale, ScaleFont};
use image::{GrayImage, Luma, RgbImage};
use std::fmt;
use std::path::{Path, PathBuf};

use super::glyphs::{self, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::error::FontUnavailable;

/// Opacity of the white watermark text
pub const WATERMARK_ALPHA: u8 = 200;

/// Gap between the text and the bottom edge
pub const BOTTOM_MARGIN: u32 = 10;

/// Serif fonts commonly present on Linux, macOS and Windows
pub const SYSTEM_SERIF_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSerif.ttf",
    "/usr/share/fonts/dejavu/DejaVuSerif.ttf",
    "/usr/share/fonts/TTF/DejaVuSerif.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSerif-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSerif-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Times New Roman.ttf",
    "/Library/Fonts/Times New Roman.ttf",
    "C:\\Windows\\Fonts\\times.ttf",
];

/// Which link of the chain produced the font
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    Brand(PathBuf),
    SystemSerif(PathBuf),
    Builtin,
}

impl fmt::Display for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSource::Brand(path) => write!(f, "brand font {}", path.display()),
            FontSource::SystemSerif(path) => write!(f, "system serif {}", path.display()),
            FontSource::Builtin => f.write_str("built-in bitmap font"),
        }
    }
}

enum Face {
    Outline(FontVec),
    Bitmap,
}

/// A resolved watermark font at a fixed pixel size. Shared read-only by all workers.
pub struct WatermarkFont {
    face: Face,
    source: FontSource,
    size: f32,
}

/// Result of walking the fallback chain
pub struct FontResolution {
    pub font: WatermarkFont,
    pub warnings: Vec<FontUnavailable>,
}

fn load_font_file(path: &Path) -> Result<FontVec, FontUnavailable> {
    let unavailable = |reason: String| FontUnavailable {
        candidate: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| unavailable(e.to_string()))?;
    FontVec::try_from_vec(bytes).map_err(|e| unavailable(e.to_string()))
}

impl WatermarkFont {
    /// Walk the chain using the standard system serif locations
    pub fn resolve(brand: Option<&Path>, size: f32) -> FontResolution {
        let serif: Vec<PathBuf> = SYSTEM_SERIF_CANDIDATES.iter().map(PathBuf::from).collect();
        Self::resolve_with(brand, &serif, size)
    }

    /// Walk the chain with an explicit list of serif candidates
    pub fn resolve_with(brand: Option<&Path>, serif_candidates: &[PathBuf], size: f32) -> FontResolution {
        let mut warnings = Vec::new();

        match brand {
            Some(path) => match load_font_file(path) {
                Ok(font) => {
                    tracing::info!(path = %path.display(), "Using brand watermark font");
                    return FontResolution {
                        font: WatermarkFont {
                            face: Face::Outline(font),
                            source: FontSource::Brand(path.to_path_buf()),
                            size,
                        },
                        warnings,
                    };
                }
                Err(warning) => {
                    tracing::warn!("{}; falling back to system serif", warning);
                    warnings.push(warning);
                }
            },
            None => warnings.push(FontUnavailable {
                candidate: "brand font".to_string(),
                reason: "not configured".to_string(),
            }),
        }

        for path in serif_candidates {
            if !path.is_file() {
                continue;
            }
            match load_font_file(path) {
                Ok(font) => {
                    tracing::info!(path = %path.display(), "Using system serif watermark font");
                    return FontResolution {
                        font: WatermarkFont {
                            face: Face::Outline(font),
                            source: FontSource::SystemSerif(path.clone()),
                            size,
                        },
                        warnings,
                    };
                }
                Err(warning) => {
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        let warning = FontUnavailable {
            candidate: "system serif".to_string(),
            reason: "no usable serif font found".to_string(),
        };
        tracing::warn!("{}; using built-in bitmap font", warning);
        warnings.push(warning);

        FontResolution {
            font: Self::builtin(size),
            warnings,
        }
    }

    /// The bitmap font, no file access
    pub fn builtin(size: f32) -> Self {
        WatermarkFont {
            face: Face::Bitmap,
            source: FontSource::Builtin,
            size,
        }
    }

    pub fn source(&self) -> &FontSource {
        &self.source
    }

    /// Coverage mask of `text`, tightly cropped. Zero-sized when nothing is drawn.
    pub fn render_mask(&self, text: &str) -> GrayImage {
        match &self.face {
            Face::Outline(font) => outline_mask(font, self.size, text),
            Face::Bitmap => bitmap_mask(self.size, text),
        }
    }
}

fn outline_mask(font: &FontVec, size: f32, text: &str) -> GrayImage {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);

    let mut caret = 0.0f32;
    let mut previous: Option<GlyphId> = None;
    let mut outlined = Vec::new();

    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(scale, point(caret, scaled.ascent()));
        caret += scaled.h_advance(id);
        previous = Some(id);

        if let Some(outline) = font.outline_glyph(glyph) {
            outlined.push(outline);
        }
    }

    if outlined.is_empty() {
        return GrayImage::new(0, 0);
    }

    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for outline in &outlined {
        let bounds = outline.px_bounds();
        min_x = min_x.min(bounds.min.x);
        min_y = min_y.min(bounds.min.y);
        max_x = max_x.max(bounds.max.x);
        max_y = max_y.max(bounds.max.y);
    }

    let width = (max_x - min_x).ceil().max(0.0) as u32;
    let height = (max_y - min_y).ceil().max(0.0) as u32;
    let mut mask = GrayImage::new(width, height);

    for outline in &outlined {
        let bounds = outline.px_bounds();
        let offset_x = (bounds.min.x - min_x).round() as i64;
        let offset_y = (bounds.min.y - min_y).round() as i64;

        outline.draw(|x, y, coverage| {
            let px = offset_x + x as i64;
            let py = offset_y + y as i64;
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                return;
            }
            let value = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
            let cell = mask.get_pixel_mut(px as u32, py as u32);
            cell.0[0] = cell.0[0].max(value);
        });
    }

    mask
}

fn bitmap_mask(size: f32, text: &str) -> GrayImage {
    let cell = ((size / (GLYPH_HEIGHT + 1) as f32).round() as u32).max(1);
    let count = text.chars().count() as u32;
    if count == 0 {
        return GrayImage::new(0, 0);
    }

    let advance = (GLYPH_WIDTH + 1) * cell;
    let width = count * advance - cell;
    let height = GLYPH_HEIGHT * cell;
    let mut mask = GrayImage::new(width, height);

    for (index, c) in text.chars().enumerate() {
        let glyph = glyphs::glyph(c);
        let origin_x = index as u32 * advance;
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !glyphs::is_set(&glyph, col, row) {
                    continue;
                }
                for dy in 0..cell {
                    for dx in 0..cell {
                        mask.put_pixel(origin_x + col * cell + dx, row * cell + dy, Luma([255]));
                    }
                }
            }
        }
    }

    mask
}

/// Composite `text` in semi-transparent white, centered horizontally and
/// anchored `BOTTOM_MARGIN` pixels above the bottom edge. Text wider than the
/// image is clipped symmetrically.
pub fn apply_watermark(image: &mut RgbImage, text: &str, font: &WatermarkFont) {
    let mask = font.render_mask(text);
    let (mask_width, mask_height) = mask.dimensions();
    if mask_width == 0 || mask_height == 0 {
        return;
    }

    let (width, height) = image.dimensions();
    let left = (width as i64 - mask_width as i64) / 2;
    let top = height as i64 - mask_height as i64 - BOTTOM_MARGIN as i64;

    for (mx, my, coverage) in mask.enumerate_pixels() {
        let coverage = coverage.0[0] as u32;
        if coverage == 0 {
            continue;
        }
        let x = left + mx as i64;
        let y = top + my as i64;
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            continue;
        }

        let alpha = WATERMARK_ALPHA as u32 * coverage / 255;
        let pixel = image.get_pixel_mut(x as u32, y as u32);
        for channel in pixel.0.iter_mut() {
            let base = *channel as u32;
            *channel = ((base * (255 - alpha) + 255 * alpha + 127) / 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_missing_brand_font_falls_back_with_warning() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("GreatVibes-Regular.ttf");

        let resolution = WatermarkFont::resolve(Some(&missing), 48.0);
        assert_ne!(resolution.font.source(), &FontSource::Brand(missing.clone()));
        assert!(!resolution.warnings.is_empty());
        assert!(resolution.warnings[0].candidate.contains("GreatVibes"));
    }

    #[test]
    fn test_chain_ends_at_builtin() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("broken.ttf");
        std::fs::write(&garbage, b"definitely not a font").unwrap();

        let resolution = WatermarkFont::resolve_with(
            Some(&dir.path().join("missing.ttf")),
            &[garbage, dir.path().join("absent.ttf")],
            48.0,
        );
        assert_eq!(resolution.font.source(), &FontSource::Builtin);
        // brand, broken serif candidate, exhausted serif chain
        assert_eq!(resolution.warnings.len(), 3);
    }

    #[test]
    fn test_bitmap_mask_dimensions() {
        let font = WatermarkFont::builtin(16.0);
        let mask = font.render_mask("AB");
        // cell = 2: two glyphs of 5 columns plus one spacing column
        assert_eq!(mask.dimensions(), (22, 14));
        assert!(mask.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn test_watermark_is_bottom_centered() {
        let mut image = RgbImage::from_pixel(400, 200, Rgb([40, 40, 40]));
        let font = WatermarkFont::builtin(16.0);
        apply_watermark(&mut image, "EEE", &font);

        let changed: Vec<(u32, u32)> = image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 != [40, 40, 40])
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!changed.is_empty());

        let min_y = changed.iter().map(|c| c.1).min().unwrap();
        let max_y = changed.iter().map(|c| c.1).max().unwrap();
        assert_eq!(max_y, 200 - BOTTOM_MARGIN - 1);
        assert_eq!(min_y, 200 - BOTTOM_MARGIN - 14);

        let min_x = changed.iter().map(|c| c.0).min().unwrap();
        let max_x = changed.iter().map(|c| c.0).max().unwrap();
        assert_eq!(min_x + max_x, 399);
    }

    #[test]
    fn test_watermark_is_semi_transparent() {
        let mut image = RgbImage::from_pixel(300, 100, Rgb([0, 0, 0]));
        apply_watermark(&mut image, "E", &WatermarkFont::builtin(16.0));
        let brightest = image.pixels().map(|p| p.0[0]).max().unwrap();
        assert_eq!(brightest, WATERMARK_ALPHA);
    }

    #[test]
    fn test_oversized_text_is_clipped() {
        let mut image = RgbImage::from_pixel(20, 60, Rgb([10, 10, 10]));
        apply_watermark(&mut image, "EETERNAL ELEGANCE", &WatermarkFont::builtin(16.0));
        assert_eq!(image.dimensions(), (20, 60));
    }
}
