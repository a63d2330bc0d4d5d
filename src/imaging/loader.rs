//! Decoding and in-place encoding of staged image files
//!
//! JPEG and PNG are handled natively. Anything else the decoder understands
//! (TIFF, BMP, GIF, WebP) is first rewritten as a PNG next to the original and
//! the original is removed. HEIC/HEIF goes through libheif when the `heic`
//! feature is enabled; without it those files fail to decode and are left
//! untouched.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageError, ImageFormat, ImageReader, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

use super::PipelineStep;
use crate::error::TransformError;
use crate::state::{AssetState, ImageAsset};

/// File extensions the orchestrator treats as images (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "tif", "tiff", "bmp", "gif", "webp", "heic", "heif",
];

/// Extensions decoded and re-encoded without conversion
const NATIVE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// JPEG re-encode quality
pub const JPEG_QUALITY: u8 = 95;

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Whether the file name carries an image extension
pub fn is_image_path(path: &Path) -> bool {
    extension_lowercase(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_native(path: &Path) -> bool {
    extension_lowercase(path)
        .map(|ext| NATIVE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_heif(path: &Path) -> bool {
    matches!(extension_lowercase(path).as_deref(), Some("heic") | Some("heif"))
}

#[cfg(feature = "heic")]
fn decode_heif(path: &Path) -> Result<RgbImage, TransformError> {
    use image::error::{DecodingError, ImageFormatHint};
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let decode_error = |reason: String| TransformError::Decode {
        path: path.to_path_buf(),
        source: ImageError::Decoding(DecodingError::new(
            ImageFormatHint::Name("HEIF".to_string()),
            reason,
        )),
    };

    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_file(&path.to_string_lossy())
        .map_err(|e| decode_error(e.to_string()))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|e| decode_error(e.to_string()))?;
    let image = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| decode_error(e.to_string()))?;

    let planes = image.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| decode_error("no interleaved RGB plane".to_string()))?;

    let (width, height) = (plane.width, plane.height);
    let row_bytes = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * plane.stride;
        let line = plane
            .data
            .get(start..start + row_bytes)
            .ok_or_else(|| decode_error("truncated RGB plane".to_string()))?;
        pixels.extend_from_slice(line);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| decode_error("RGB plane size mismatch".to_string()))
}

/// HEIF containers bypass the `image` decoders. `None` for everything else.
#[cfg(feature = "heic")]
fn decode_heif_container(
    path: &Path,
) -> Option<Result<(image::DynamicImage, ImageFormat), TransformError>> {
    if !is_heif(path) {
        return None;
    }
    Some(decode_heif(path).map(|rgb| (image::DynamicImage::ImageRgb8(rgb), ImageFormat::Png)))
}

#[cfg(not(feature = "heic"))]
fn decode_heif_container(
    path: &Path,
) -> Option<Result<(image::DynamicImage, ImageFormat), TransformError>> {
    use image::error::{ImageFormatHint, UnsupportedError, UnsupportedErrorKind};

    if !is_heif(path) {
        return None;
    }
    let hint = ImageFormatHint::Name("HEIF".to_string());
    Some(Err(TransformError::Decode {
        path: path.to_path_buf(),
        source: ImageError::Unsupported(UnsupportedError::from_format_and_kind(
            hint.clone(),
            UnsupportedErrorKind::Format(hint),
        )),
    }))
}

/// Decode a file by content, not by extension
fn decode_file(path: &Path) -> Result<(image::DynamicImage, ImageFormat), TransformError> {
    if let Some(result) = decode_heif_container(path) {
        return result;
    }

    let decode_error = |source: ImageError| TransformError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let reader = ImageReader::open(path)
        .map_err(|e| decode_error(ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| decode_error(ImageError::IoError(e)))?;

    let format = reader.format();
    let image = reader.decode().map_err(decode_error)?;
    let format = format
        .or_else(|| ImageFormat::from_path(path).ok())
        .unwrap_or(ImageFormat::Png);

    Ok((image, format))
}

/// Decode the asset into an RGB working image.
///
/// Non-native containers are converted to `<stem>.png` first and the original
/// file is removed; `asset.path` follows the conversion. On success the asset
/// is `Converted`.
pub fn load(asset: &mut ImageAsset) -> Result<RgbImage, TransformError> {
    let (image, format) = decode_file(&asset.path)?;
    let rgb = image.to_rgb8();

    if !is_native(&asset.path) {
        let converted = asset.path.with_extension("png");
        if converted.exists() {
            return Err(TransformError::step(
                PipelineStep::Decode,
                &asset.path,
                format!("conversion target {} already exists", converted.display()),
            ));
        }
        write_encoded(&rgb, &converted).map_err(|reason| {
            TransformError::step(PipelineStep::Decode, &asset.path, reason)
        })?;
        fs::remove_file(&asset.path).map_err(|e| {
            TransformError::step(PipelineStep::Decode, &asset.path, format!("cannot remove original: {}", e))
        })?;

        tracing::info!(
            from = %asset.path.display(),
            to = %converted.display(),
            "Converted to PNG"
        );
        asset.path = converted;
        asset.format = Some(ImageFormat::Png);
    } else {
        asset.format = Some(format);
    }

    asset.advance(AssetState::Converted);
    Ok(rgb)
}

/// Encode `image` in the format implied by `path`'s extension (JPEG or PNG).
pub fn encode(image: &RgbImage, path: &Path) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    let (width, height) = image.dimensions();

    match extension_lowercase(path).as_deref() {
        Some("jpg") | Some("jpeg") => {
            JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        _ => {
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        }
    }

    Ok(buffer)
}

/// Encode fully in memory, then replace `path` via a rename so a failed encode
/// never leaves a truncated file behind.
pub fn write_encoded(image: &RgbImage, path: &Path) -> Result<(), String> {
    let bytes = encode(image, path).map_err(|e| e.to_string())?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging: PathBuf = path.with_file_name(format!(".{}.partial", file_name));

    fs::write(&staging, &bytes).map_err(|e| e.to_string())?;
    fs::rename(&staging, path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        e.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn sample() -> RgbImage {
        RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 90]))
    }

    #[test]
    fn test_image_extensions_are_case_insensitive() {
        assert!(is_image_path(Path::new("a/SKU_0001-IMG_1.JPG")));
        assert!(is_image_path(Path::new("b.heic")));
        assert!(!is_image_path(Path::new("notes.txt")));
        assert!(!is_image_path(Path::new("no_extension")));
    }

    #[test]
    fn test_native_file_is_loaded_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        sample().save(&path).unwrap();

        let mut asset = ImageAsset::new(path.clone());
        let image = load(&mut asset).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(asset.path, path);
        assert_eq!(asset.format, Some(ImageFormat::Png));
        assert_eq!(asset.state(), AssetState::Converted);
    }

    #[test]
    fn test_non_native_file_is_converted_and_original_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.bmp");
        sample().save(&path).unwrap();

        let mut asset = ImageAsset::new(path.clone());
        load(&mut asset).unwrap();

        assert_eq!(asset.path, dir.path().join("scan.png"));
        assert!(asset.path.is_file());
        assert!(!path.exists());
    }

    #[test]
    fn test_conversion_never_overwrites_a_sibling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.tif");
        let sibling = dir.path().join("x.png");
        sample().save(&path).unwrap();
        fs::write(&sibling, b"someone else's file").unwrap();

        let mut asset = ImageAsset::new(path.clone());
        let result = load(&mut asset);
        assert!(matches!(
            result,
            Err(TransformError::Step { step: PipelineStep::Decode, .. })
        ));
        assert_eq!(fs::read(&sibling).unwrap(), b"someone else's file");
        assert!(path.is_file());
    }

    #[test]
    fn test_heif_extensions_are_recognised() {
        assert!(is_heif(Path::new("a/IMG_1.HEIC")));
        assert!(is_heif(Path::new("b.heif")));
        assert!(!is_heif(Path::new("c.jpg")));
    }

    #[test]
    fn test_undecodable_file_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.heic");
        fs::write(&path, b"not really an image").unwrap();

        let mut asset = ImageAsset::new(path.clone());
        let result = load(&mut asset);
        assert!(matches!(result, Err(TransformError::Decode { .. })));
        assert!(path.is_file());
        assert_eq!(asset.state(), AssetState::Raw);
    }

    #[cfg(not(feature = "heic"))]
    #[test]
    fn test_heif_without_decoder_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("IMG_1.heic");
        fs::write(&path, b"ftypheic").unwrap();

        let mut asset = ImageAsset::new(path.clone());
        match load(&mut asset) {
            Err(TransformError::Decode { source: ImageError::Unsupported(_), .. }) => {}
            other => panic!("expected an unsupported-format error, got {:?}", other.map(|_| ())),
        }
        assert!(path.is_file());
    }

    #[cfg(feature = "heic")]
    #[test]
    fn test_corrupt_heif_fails_in_libheif() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("IMG_1.heic");
        fs::write(&path, b"ftypheic but nothing else").unwrap();

        let mut asset = ImageAsset::new(path.clone());
        match load(&mut asset) {
            Err(TransformError::Decode { source: ImageError::Decoding(_), .. }) => {}
            other => panic!("expected a libheif decoding error, got {:?}", other.map(|_| ())),
        }
        assert!(path.is_file());
        assert!(!dir.path().join("IMG_1.png").exists());
    }

    #[test]
    fn test_write_encoded_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jpg");
        fs::write(&path, b"old").unwrap();

        write_encoded(&sample(), &path).unwrap();
        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.width(), 8);
        assert!(!dir.path().join(".out.jpg.partial").exists());
    }
}
