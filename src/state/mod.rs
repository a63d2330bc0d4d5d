/// State management module
///
/// This module handles the only state that outlives a batch run:
/// - The SKU counter and its allocation history (counter.rs)
/// - Shared data structures for folders and assets (data.rs)
pub mod counter;
pub mod data;

pub use counter::CounterStore;
pub use data::{sku_label, AssetState, CatalogFolder, ImageAsset, SkuAllocation, SourceItem};
