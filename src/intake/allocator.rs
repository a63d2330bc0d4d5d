//! Folder allocator
//!
//! Turns the scanned item folders into one contiguous SKU block and stages the
//! catalog layout:
//!
//! ```text
//! <output_root>/<timestamp>_SKU#00006-00007/
//!     SKU_0006/2/SKU_0006-IMG_1.jpg
//!     SKU_0006/2/SKU_0006-IMG_2.jpg
//!     SKU_0007/1/SKU_0007-IMG_1.png
//! ```
//!
//! Source files are copied, never moved. Copy failures are recorded and
//! skipped; the reservation is never rolled back.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use super::scanner::scan_input;
use crate::config::ListingOrder;
use crate::error::{CopyError, IntakeError};
use crate::state::{sku_label, CatalogFolder, CounterStore, SkuAllocation, SourceItem};

/// Batch directory timestamp, e.g. `10_19_2026_03-45PM`
const TIMESTAMP_FORMAT: &str = "%m_%d_%Y_%I-%M%p";

/// One file copy in a batch plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// The full layout of a batch, computed before anything touches the disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub label: String,
    pub batch_dir: PathBuf,
    pub folders: Vec<CatalogFolder>,
    pub copies: Vec<PlannedCopy>,
}

/// Outcome of one allocation run
#[derive(Debug)]
pub struct AllocationReport {
    pub allocation: SkuAllocation,
    /// `None` when the input root held no item folders
    pub batch_dir: Option<PathBuf>,
    pub folders: Vec<CatalogFolder>,
    pub copied: usize,
    pub copy_failures: Vec<CopyError>,
    /// Folders with at least one failed copy (or whose directory could not be created)
    pub failed_folders: usize,
}

/// `<timestamp>_SKU#<first:05>-<last:05>`
pub fn batch_label(timestamp: &str, starting_sku: i64, folder_count: i64) -> String {
    format!(
        "{}_SKU#{:05}-{:05}",
        timestamp,
        starting_sku + 1,
        starting_sku + folder_count
    )
}

/// `SKU_0006-IMG_3.jpg`; the source extension is kept as-is
fn image_file_name(label: &str, k: usize, source: &Path) -> String {
    match source.extension() {
        Some(ext) => format!("{}-IMG_{}.{}", label, k, ext.to_string_lossy()),
        None => format!("{}-IMG_{}", label, k),
    }
}

/// Lay out a batch. Pure: item `n` (1-based ordinal) gets SKU `starting_sku + n`.
pub fn plan_batch(
    output_root: &Path,
    starting_sku: i64,
    label: &str,
    items: Vec<SourceItem>,
) -> BatchPlan {
    let batch_dir = output_root.join(label);
    let mut folders = Vec::with_capacity(items.len());
    let mut copies = Vec::new();

    for item in items {
        let sku = starting_sku + item.ordinal_index as i64;
        let sku_label = sku_label(sku);
        let image_count = item.file_list.len();
        let path = batch_dir.join(&sku_label).join(image_count.to_string());

        for (k, source) in item.file_list.iter().enumerate() {
            copies.push(PlannedCopy {
                source: source.clone(),
                destination: path.join(image_file_name(&sku_label, k + 1, source)),
            });
        }

        folders.push(CatalogFolder {
            sku,
            sku_label,
            source: item,
            image_count,
            path,
        });
    }

    BatchPlan {
        label: label.to_string(),
        batch_dir,
        folders,
        copies,
    }
}

/// Assigns SKU blocks to input folders and copies them into the catalog layout.
///
/// Holds the counter store by mutable reference; the store is touched exactly
/// once per batch.
pub struct FolderAllocator<'a> {
    store: &'a mut CounterStore,
    order: ListingOrder,
}

impl<'a> FolderAllocator<'a> {
    pub fn new(store: &'a mut CounterStore, order: ListingOrder) -> Self {
        Self { store, order }
    }

    pub fn allocate_batch(
        &mut self,
        input_root: &Path,
        output_root: &Path,
    ) -> Result<AllocationReport, IntakeError> {
        self.allocate_batch_at(input_root, output_root, Local::now())
    }

    /// `allocate_batch` with an explicit run time
    pub fn allocate_batch_at(
        &mut self,
        input_root: &Path,
        output_root: &Path,
        now: DateTime<Local>,
    ) -> Result<AllocationReport, IntakeError> {
        let items = scan_input(input_root, self.order)?;
        let folder_count = items.len() as i64;
        let image_count: usize = items.iter().map(|item| item.file_list.len()).sum();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

        let allocation = self.store.reserve(folder_count, image_count as i64, |start| {
            if folder_count == 0 {
                String::new()
            } else {
                batch_label(&timestamp, start, folder_count)
            }
        })?;

        if folder_count == 0 {
            tracing::warn!(input = %input_root.display(), "No item folders found, nothing to allocate");
            return Ok(AllocationReport {
                allocation,
                batch_dir: None,
                folders: Vec::new(),
                copied: 0,
                copy_failures: Vec::new(),
                failed_folders: 0,
            });
        }

        let plan = plan_batch(
            output_root,
            allocation.starting_sku,
            &allocation.generated_label,
            items,
        );

        fs::create_dir_all(&plan.batch_dir).map_err(|source| IntakeError::Layout {
            path: plan.batch_dir.clone(),
            source,
        })?;

        tracing::info!(
            batch = %plan.label,
            folders = plan.folders.len(),
            images = image_count,
            "Staging batch"
        );

        let (copied, copy_failures, failed_folders) = materialize(&plan);

        tracing::info!(
            batch = %plan.label,
            copied,
            failed = copy_failures.len(),
            "Processed {} subfolders with a total of {} images",
            plan.folders.len(),
            image_count
        );

        Ok(AllocationReport {
            allocation,
            batch_dir: Some(plan.batch_dir),
            folders: plan.folders,
            copied,
            copy_failures,
            failed_folders,
        })
    }
}

/// Create every folder and copy every file. Returns (copied, failures, failed folder count).
fn materialize(plan: &BatchPlan) -> (usize, Vec<CopyError>, usize) {
    let mut copied = 0;
    let mut failures = Vec::new();
    let mut failed_folders = 0;

    for folder in &plan.folders {
        let mut folder_failed = false;

        if let Err(e) = fs::create_dir_all(&folder.path) {
            tracing::error!(sku = %folder.sku_label, error = %e, "Cannot create item folder");
            folder_failed = true;
        }

        tracing::info!(
            source = %folder.source.relative_path.display(),
            sku = %folder.sku_label,
            images = folder.image_count,
            "Processing subfolder"
        );

        for copy in plan.copies.iter().filter(|c| c.destination.starts_with(&folder.path)) {
            match fs::copy(&copy.source, &copy.destination) {
                Ok(_) => copied += 1,
                Err(source) => {
                    tracing::warn!(
                        source = %copy.source.display(),
                        error = %source,
                        "Copy failed, skipping file"
                    );
                    folder_failed = true;
                    failures.push(CopyError {
                        source_path: copy.source.clone(),
                        destination: copy.destination.clone(),
                        source,
                    });
                }
            }
        }

        if folder_failed {
            failed_folders += 1;
        }
    }

    (copied, failures, failed_folders)
}
