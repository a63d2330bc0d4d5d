use image::{imageops::FilterType, RgbImage};
use std::path::{Path, PathBuf};

/// Directory, beside each enhanced image, holding its thumbnail
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// `<dir>/thumbnails/<stem>_thumbnail.<ext>` for an image at `<dir>/<stem>.<ext>`
pub fn thumbnail_path(image_path: &Path) -> PathBuf {
    let dir = image_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let file_name = match image_path.extension() {
        Some(ext) => format!("{}_thumbnail.{}", stem, ext.to_string_lossy()),
        None => format!("{}_thumbnail", stem),
    };

    dir.join(THUMBNAIL_DIR).join(file_name)
}

/// Dimensions with the longest side capped at `max_side`, aspect ratio kept.
/// Images already within the bound keep their size.
pub fn fit_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }

    let scale = |side: u32| -> u32 {
        (((side as u64 * max_side as u64) + longest as u64 / 2) / longest as u64).max(1) as u32
    };
    (scale(width), scale(height))
}

/// Generate a thumbnail of the enhanced image
pub fn make_thumbnail(image: &RgbImage, max_side: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = fit_dimensions(width, height, max_side);

    if (target_width, target_height) == (width, height) {
        return image.clone();
    }

    image::imageops::resize(image, target_width, target_height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_thumbnail_path_naming() {
        let path = thumbnail_path(Path::new("/out/SKU_0006/2/SKU_0006-IMG_1.jpg"));
        assert_eq!(
            path,
            Path::new("/out/SKU_0006/2/thumbnails/SKU_0006-IMG_1_thumbnail.jpg")
        );
    }

    #[test]
    fn test_fit_dimensions_caps_longest_side() {
        assert_eq!(fit_dimensions(1200, 800, 300), (300, 200));
        assert_eq!(fit_dimensions(800, 1200, 300), (200, 300));
        assert_eq!(fit_dimensions(3000, 5, 300), (300, 1));
    }

    #[test]
    fn test_small_images_are_not_upscaled() {
        assert_eq!(fit_dimensions(120, 80, 300), (120, 80));
        let image = RgbImage::from_pixel(120, 80, Rgb([1, 2, 3]));
        assert_eq!(make_thumbnail(&image, 300), image);
    }

    #[test]
    fn test_make_thumbnail_resizes() {
        let image = RgbImage::from_pixel(640, 480, Rgb([200, 100, 50]));
        let thumb = make_thumbnail(&image, 300);
        assert_eq!(thumb.dimensions(), (300, 225));
    }
}
