//! Pipeline configuration
//!
//! Stored as JSON. Every field has a default, so an empty object (or no file
//! at all) is a valid configuration. Per-image transform constants (rotation,
//! crop threshold, sharpen kernel) are fixed and not part of it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Upper bound on the worker pool; image work is CPU and memory bound
pub const MAX_WORKERS: usize = 4;

/// Order in which folders and files are captured at scan time
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListingOrder {
    /// Whatever order the filesystem returns
    #[default]
    AsListed,
    /// Lexicographic by file name
    ByName,
}

/// All run-level settings for an intake run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IntakeConfig {
    /// SQLite counter database. `None` = `<data_dir>/catalog-intake/catalog.db`
    pub database_path: Option<PathBuf>,

    /// Preferred watermark font (TrueType/OpenType)
    pub brand_font: Option<PathBuf>,

    /// Text composited onto every enhanced image
    pub watermark_text: String,

    /// Watermark glyph height in pixels
    pub watermark_font_size: f32,

    /// Longest side of generated thumbnails
    pub thumbnail_max_side: u32,

    /// Worker pool size, clamped to `1..=MAX_WORKERS`
    pub workers: usize,

    /// Write `base64/<stem>.txt` next to each enhanced image
    pub encode_base64: bool,

    pub listing_order: ListingOrder,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            brand_font: None,
            watermark_text: "Eternal Elegance Emporium".to_string(),
            watermark_font_size: 48.0,
            thumbnail_max_side: 300,
            workers: 2,
            encode_base64: true,
            listing_order: ListingOrder::AsListed,
        }
    }
}

impl IntakeConfig {
    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given, else the per-user config file if it exists, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::debug!(path = %path.display(), "Using config file");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config_dir>/catalog-intake/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("catalog-intake").join("config.json"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::state::CounterStore::default_path)
    }

    /// Effective pool size
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}
