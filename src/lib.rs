//! catalog-intake
//!
//! Assigns durable SKUs to folders of product photos, restructures them into
//! the catalog layout and enhances every image (orientation, content crop,
//! sharpen, watermark, thumbnail) for downstream listing tools.

pub mod config;
pub mod error;
pub mod imaging;
pub mod intake;
pub mod orchestrator;
pub mod state;

pub use config::{IntakeConfig, ListingOrder};
pub use error::{IntakeError, StoreError};
pub use orchestrator::{BatchSummary, Orchestrator};
pub use state::CounterStore;
