/// Folder intake module
///
/// This module handles:
/// - Capturing the input root's item folders in a fixed order (scanner.rs)
/// - Reserving one SKU block per batch and staging the catalog layout (allocator.rs)
pub mod allocator;
pub mod scanner;

pub use allocator::{batch_label, plan_batch, AllocationReport, BatchPlan, FolderAllocator, PlannedCopy};
pub use scanner::scan_input;
