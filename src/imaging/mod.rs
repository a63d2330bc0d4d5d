/// Image transform module
///
/// This module handles:
/// - Decoding staged files, converting non-native containers to PNG (loader.rs)
/// - Fixed orientation, content crop and sharpening (filters.rs)
/// - Brand watermark with a font fallback chain (watermark.rs, glyphs.rs)
/// - Thumbnails beside each enhanced image (thumbnail.rs)
/// - Base64 text derivatives for image-search consumers (derivatives.rs)
/// - The per-asset pipeline tying it all together (processor.rs)
pub mod derivatives;
pub mod filters;
mod glyphs;
pub mod loader;
pub mod processor;
pub mod thumbnail;
pub mod watermark;

pub use loader::{is_image_path, IMAGE_EXTENSIONS};
pub use processor::{
    is_complete, is_processed, TransformFailure, TransformOutcome, TransformSettings,
    Transformer,
};
pub use watermark::{FontResolution, FontSource, WatermarkFont};

use std::fmt;

/// Steps of the transform pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Decode,
    Orient,
    Crop,
    Enhance,
    Watermark,
    Compress,
    Thumbnail,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Decode => "decode",
            PipelineStep::Orient => "orient",
            PipelineStep::Crop => "crop",
            PipelineStep::Enhance => "enhance",
            PipelineStep::Watermark => "watermark",
            PipelineStep::Compress => "compress",
            PipelineStep::Thumbnail => "thumbnail",
        };
        f.write_str(name)
    }
}
