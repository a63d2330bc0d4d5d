//! Text derivatives of enhanced images
//!
//! Image-search consumers read each enhanced image as base64-encoded PNG from
//! `<dir>/base64/<stem>.txt`. The directory is scratch space: if it ends up
//! empty after a run it is removed. `thumbnails` directories are never touched.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::loader;

pub const BASE64_DIR: &str = "base64";

/// `<dir>/base64/<stem>.txt`
pub fn base64_path(image_path: &Path) -> PathBuf {
    let dir = image_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    dir.join(BASE64_DIR).join(format!("{}.txt", stem))
}

/// Encode the image as PNG, then base64, and write it beside `image_path`
pub fn write_base64(image: &RgbImage, image_path: &Path) -> Result<PathBuf, String> {
    let png = loader::encode(image, Path::new("derivative.png")).map_err(|e| e.to_string())?;
    let encoded = STANDARD.encode(png);

    let path = base64_path(image_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(&path, encoded).map_err(|e| e.to_string())?;

    tracing::debug!(path = %path.display(), "Saved base64 derivative");
    Ok(path)
}

/// Remove every empty `base64` directory under `root`. Returns how many were removed.
pub fn remove_empty_derivative_dirs(root: &Path) -> usize {
    let candidates: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == BASE64_DIR)
        .map(|e| e.into_path())
        .collect();

    let mut removed = 0;
    for dir in candidates {
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty && fs::remove_dir(&dir).is_ok() {
            tracing::debug!(path = %dir.display(), "Removed empty base64 directory");
            removed += 1;
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_base64_round_trips_to_png() {
        let dir = TempDir::new().unwrap();
        let image_path = dir.path().join("SKU_0001-IMG_1.jpg");
        let image = RgbImage::from_pixel(4, 3, Rgb([9, 8, 7]));

        let path = write_base64(&image, &image_path).unwrap();
        assert_eq!(path, dir.path().join("base64").join("SKU_0001-IMG_1.txt"));

        let text = fs::read_to_string(&path).unwrap();
        let bytes = STANDARD.decode(text.trim()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_only_empty_base64_dirs_are_removed() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("a").join(BASE64_DIR);
        let full = dir.path().join("b").join(BASE64_DIR);
        let thumbs = dir.path().join("a").join("thumbnails");
        fs::create_dir_all(&empty).unwrap();
        fs::create_dir_all(&full).unwrap();
        fs::create_dir_all(&thumbs).unwrap();
        fs::write(full.join("x.txt"), "abc").unwrap();

        assert_eq!(remove_empty_derivative_dirs(dir.path()), 1);
        assert!(!empty.exists());
        assert!(full.is_dir());
        assert!(thumbs.is_dir());
    }
}
