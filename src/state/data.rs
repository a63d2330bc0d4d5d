//! Shared data structures for the intake pipeline
//!
//! These structs represent the data model that flows between
//! the counter store, the allocator and the transform workers.

use std::fmt;
use std::path::PathBuf;

/// One persisted allocation row: the SKU range reserved by a batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuAllocation {
    /// Last SKU before this batch; the batch owns `starting_sku + 1 ..= starting_sku + folder_count`
    pub starting_sku: i64,
    /// Number of item folders (and therefore SKUs) in the batch
    pub folder_count: i64,
    /// Total number of source files across the batch's folders
    pub image_count: i64,
    /// Run timestamp as used in the batch directory name
    pub timestamp: String,
    /// Batch directory name, e.g. `10_19_2026_03-45PM_SKU#00006-00007`
    pub generated_label: String,
}

impl SkuAllocation {
    /// First SKU owned by this allocation
    pub fn first_sku(&self) -> i64 {
        self.starting_sku + 1
    }

    /// Last SKU owned by this allocation (equal to `starting_sku` for a no-op row)
    pub fn last_sku(&self) -> i64 {
        self.starting_sku + self.folder_count
    }
}

/// One input subfolder as captured by the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    /// Path relative to the input root
    pub relative_path: PathBuf,
    /// 1-based position in the captured listing order
    pub ordinal_index: usize,
    /// Regular files in the folder, in listing order
    pub file_list: Vec<PathBuf>,
}

/// One output folder in the catalog layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFolder {
    pub sku: i64,
    /// `SKU_0006`
    pub sku_label: String,
    pub source: SourceItem,
    pub image_count: usize,
    /// `<batch>/SKU_0006/<image_count>`
    pub path: PathBuf,
}

/// `SKU_%04d`
pub fn sku_label(sku: i64) -> String {
    format!("SKU_{:04}", sku)
}

/// Lifecycle of an image file through the transform pipeline.
///
/// Transitions only move forward. `Failed` and `Thumbnailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Raw,
    Converted,
    Enhanced,
    Thumbnailed,
    Failed,
}

impl AssetState {
    fn rank(self) -> u8 {
        match self {
            AssetState::Raw => 0,
            AssetState::Converted => 1,
            AssetState::Enhanced => 2,
            AssetState::Thumbnailed => 3,
            AssetState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AssetState::Failed | AssetState::Thumbnailed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_advance_to(self, next: AssetState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetState::Raw => "raw",
            AssetState::Converted => "converted",
            AssetState::Enhanced => "enhanced",
            AssetState::Thumbnailed => "thumbnailed",
            AssetState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single image file owned by exactly one worker task
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub path: PathBuf,
    /// Detected container format, set once decoded
    pub format: Option<image::ImageFormat>,
    state: AssetState,
}

impl ImageAsset {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            format: None,
            state: AssetState::Raw,
        }
    }

    pub fn state(&self) -> AssetState {
        self.state
    }

    /// Move the asset forward. Returns false (and leaves the state alone) for a backward move.
    pub fn advance(&mut self, next: AssetState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = AssetState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sku_label_is_zero_padded() {
        assert_eq!(sku_label(6), "SKU_0006");
        assert_eq!(sku_label(12345), "SKU_12345");
    }

    #[test]
    fn test_allocation_range() {
        let row = SkuAllocation {
            starting_sku: 5,
            folder_count: 2,
            image_count: 3,
            timestamp: "t".into(),
            generated_label: "l".into(),
        };
        assert_eq!(row.first_sku(), 6);
        assert_eq!(row.last_sku(), 7);
    }

    #[test]
    fn test_asset_state_only_moves_forward() {
        let mut asset = ImageAsset::new(PathBuf::from("a.png"));
        assert!(asset.advance(AssetState::Converted));
        assert!(asset.advance(AssetState::Enhanced));
        assert!(!asset.advance(AssetState::Converted));
        assert_eq!(asset.state(), AssetState::Enhanced);
        assert!(asset.advance(AssetState::Thumbnailed));

        // Terminal: a thumbnailed asset cannot be failed afterwards
        asset.fail();
        assert_eq!(asset.state(), AssetState::Thumbnailed);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut asset = ImageAsset::new(PathBuf::from("a.png"));
        asset.fail();
        assert_eq!(asset.state(), AssetState::Failed);
        assert!(!asset.advance(AssetState::Enhanced));
    }
}
