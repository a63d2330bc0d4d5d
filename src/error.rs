//! Error taxonomy for the intake pipeline
//!
//! Fatal errors (`StoreUnavailable`, `Layout`, `Scan`) abort a run before any
//! worker is dispatched. Per-file and per-asset errors (`CopyError`,
//! `TransformError`) are caught at their own boundary and end up in the run
//! summary. `FontUnavailable` is only ever a warning.

use std::path::PathBuf;
use thiserror::Error;

use crate::imaging::PipelineStep;

/// Counter store errors. Every variant means the store is unavailable for this run.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database directory could not be created
    #[error("cannot create counter store directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database file could not be opened or its schema initialised
    #[error("cannot open counter store {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A read or write transaction failed; nothing was committed
    #[error("counter store transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    /// Counter values are never negative
    #[error("invalid SKU value {0}")]
    InvalidValue(i64),
}

/// A single source file that could not be copied into the catalog layout
#[derive(Debug, Error)]
#[error("copy {source_path} -> {destination} failed: {source}")]
pub struct CopyError {
    pub source_path: PathBuf,
    pub destination: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Per-asset transform failures. The asset is marked `Failed`, the batch carries on.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The file could not be decoded (or converted to a decodable format)
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A pipeline step after decoding failed
    #[error("{step} failed for {path}: {reason}")]
    Step {
        step: PipelineStep,
        path: PathBuf,
        reason: String,
    },
}

impl TransformError {
    pub fn step(step: PipelineStep, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TransformError::Step {
            step,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A watermark font candidate that could not be loaded. Never fatal.
#[derive(Debug, Clone, Error)]
#[error("font {candidate} unavailable: {reason}")]
pub struct FontUnavailable {
    pub candidate: String,
    pub reason: String,
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Run-level errors. Any of these aborts the run before transform work starts.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("SKU store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The input root could not be listed
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The batch output directory could not be created
    #[error("cannot create output layout at {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker task could not be joined
    #[error("worker pool failure: {0}")]
    Worker(String),
}

pub type Result<T, E = IntakeError> = std::result::Result<T, E>;
