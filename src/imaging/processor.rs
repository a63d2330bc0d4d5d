//! Per-asset transform pipeline
//!
//! Decode, orient, crop, sharpen, watermark, overwrite in place, thumbnail.
//! Every step runs on the asset's own files only. A failing step marks the
//! asset `Failed` and stops its pipeline; the error is returned as a value so
//! the orchestrator can count it.
//!
//! Overwriting is destructive and running the pipeline twice would crop and
//! watermark twice, so a hidden marker `.<file_name>.enhanced` is written next
//! to the asset right after the overwrite. A marked asset never goes through the
//! pixel steps again; if its thumbnail is missing (the thumbnail step failed
//! after the overwrite) the next run only rebuilds the derivatives from the
//! enhanced file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;

use super::{derivatives, filters, loader, thumbnail, watermark, PipelineStep, WatermarkFont};
use crate::config::IntakeConfig;
use crate::error::{FontUnavailable, TransformError};
use crate::state::{AssetState, ImageAsset};

/// Run-level settings the pipeline reads. Per-image constants live in the step modules.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSettings {
    pub watermark_text: String,
    pub thumbnail_max_side: u32,
    pub encode_base64: bool,
}

impl From<&IntakeConfig> for TransformSettings {
    fn from(config: &IntakeConfig) -> Self {
        Self {
            watermark_text: config.watermark_text.clone(),
            thumbnail_max_side: config.thumbnail_max_side,
            encode_base64: config.encode_base64,
        }
    }
}

/// A fully processed asset
#[derive(Debug)]
pub struct TransformOutcome {
    pub asset: ImageAsset,
    pub enhanced_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub base64_path: Option<PathBuf>,
    /// Non-fatal problems (derivative or marker writes)
    pub warnings: Vec<String>,
}

/// An asset whose pipeline stopped early
#[derive(Debug)]
pub struct TransformFailure {
    pub asset: ImageAsset,
    pub error: TransformError,
}

/// `.<file_name>.enhanced` beside the asset
pub fn marker_path(image_path: &Path) -> PathBuf {
    let file_name = image_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    image_path.with_file_name(format!(".{}.enhanced", file_name))
}

/// Whether the asset was already overwritten by an earlier run
pub fn is_processed(image_path: &Path) -> bool {
    marker_path(image_path).is_file()
}

/// Overwritten and thumbnailed: nothing left to do
pub fn is_complete(image_path: &Path) -> bool {
    is_processed(image_path) && thumbnail::thumbnail_path(image_path).is_file()
}

/// Maps one staged image to its enhanced version and thumbnail
pub struct Transformer {
    settings: TransformSettings,
    font: Arc<WatermarkFont>,
}

impl Transformer {
    pub fn new(settings: TransformSettings, font: Arc<WatermarkFont>) -> Self {
        Self { settings, font }
    }

    /// Build from config, resolving the watermark font once
    pub fn from_config(config: &IntakeConfig) -> (Self, Vec<FontUnavailable>) {
        let resolution =
            WatermarkFont::resolve(config.brand_font.as_deref(), config.watermark_font_size);
        let transformer = Self::new(config.into(), Arc::new(resolution.font));
        (transformer, resolution.warnings)
    }

    pub fn font(&self) -> &WatermarkFont {
        &self.font
    }

    /// Run the whole pipeline on `source_path`
    pub fn transform(&self, source_path: &Path) -> Result<TransformOutcome, TransformFailure> {
        let mut asset = ImageAsset::new(source_path.to_path_buf());

        let result = if is_processed(source_path) {
            self.finish_derivatives(&mut asset)
        } else {
            self.run_steps(&mut asset)
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                asset.fail();
                tracing::error!(path = %source_path.display(), error = %error, "Failed to process image");
                Err(TransformFailure { asset, error })
            }
        }
    }

    fn run_steps(&self, asset: &mut ImageAsset) -> Result<TransformOutcome, TransformError> {
        let mut warnings = Vec::new();

        // Decode
        let image = loader::load(asset)?;

        // Pixel steps
        let image = filters::orient(&image);
        let image = filters::crop_to_content(image);
        let mut image = filters::sharpen(&image);
        watermark::apply_watermark(&mut image, &self.settings.watermark_text, &self.font);

        if image.width() == 0 || image.height() == 0 {
            return Err(TransformError::step(PipelineStep::Crop, &asset.path, "empty image"));
        }

        // Compress & overwrite
        loader::write_encoded(&image, &asset.path)
            .map_err(|reason| TransformError::step(PipelineStep::Compress, &asset.path, reason))?;
        asset.advance(AssetState::Enhanced);
        tracing::info!(path = %asset.path.display(), "Compressed and saved");

        if let Err(e) = fs::write(marker_path(&asset.path), b"") {
            warnings.push(format!("cannot write processed marker: {}", e));
        }

        let (thumbnail_path, base64_path) = self.write_derivatives(asset, &image, &mut warnings)?;

        Ok(TransformOutcome {
            asset: asset.clone(),
            enhanced_path: asset.path.clone(),
            thumbnail_path,
            base64_path,
            warnings,
        })
    }

    /// Rebuild the thumbnail (and base64 text) of an already enhanced asset
    fn finish_derivatives(&self, asset: &mut ImageAsset) -> Result<TransformOutcome, TransformError> {
        let mut warnings = Vec::new();

        let image = loader::load(asset)?;
        asset.advance(AssetState::Enhanced);
        tracing::info!(path = %asset.path.display(), "Already enhanced, rebuilding thumbnail only");

        let (thumbnail_path, base64_path) = self.write_derivatives(asset, &image, &mut warnings)?;

        Ok(TransformOutcome {
            asset: asset.clone(),
            enhanced_path: asset.path.clone(),
            thumbnail_path,
            base64_path,
            warnings,
        })
    }

    fn write_derivatives(
        &self,
        asset: &mut ImageAsset,
        image: &RgbImage,
        warnings: &mut Vec<String>,
    ) -> Result<(PathBuf, Option<PathBuf>), TransformError> {
        // Thumbnail
        let thumbnail_path = thumbnail::thumbnail_path(&asset.path);
        let thumb = thumbnail::make_thumbnail(image, self.settings.thumbnail_max_side);
        if let Some(dir) = thumbnail_path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                TransformError::step(PipelineStep::Thumbnail, &asset.path, e)
            })?;
        }
        loader::write_encoded(&thumb, &thumbnail_path)
            .map_err(|reason| TransformError::step(PipelineStep::Thumbnail, &asset.path, reason))?;
        asset.advance(AssetState::Thumbnailed);
        tracing::info!(path = %thumbnail_path.display(), "Saved thumbnail");

        let base64_path = if self.settings.encode_base64 {
            match derivatives::write_base64(image, &asset.path) {
                Ok(path) => Some(path),
                Err(reason) => {
                    tracing::warn!(path = %asset.path.display(), reason = %reason, "Base64 derivative failed");
                    warnings.push(format!("base64 derivative failed: {}", reason));
                    None
                }
            }
        } else {
            None
        };

        Ok((thumbnail_path, base64_path))
    }
}
