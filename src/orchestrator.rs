//! Batch orchestrator
//!
//! Allocates the next batch, then drives the transformer over every eligible
//! image in the new layout on a fixed-size worker pool. Image work is CPU and
//! memory bound, so each asset runs in `spawn_blocking` and a semaphore caps
//! how many run at once.
//!
//! Per-asset results come back as values and are folded into a `BatchSummary`.
//! A failed asset never stops the batch.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::config::IntakeConfig;
use crate::error::{IntakeError, TransformError};
use crate::imaging::derivatives::{self, BASE64_DIR};
use crate::imaging::thumbnail::THUMBNAIL_DIR;
use crate::imaging::{
    is_complete, is_image_path, is_processed, TransformFailure, TransformOutcome, Transformer,
};
use crate::intake::FolderAllocator;
use crate::state::CounterStore;

/// One asset that did not make it through the pipeline
#[derive(Debug, Clone)]
pub struct AssetFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// End-of-run report. Always produced, even when assets fail.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Batch directory created by the allocator, if this run allocated one
    pub batch_dir: Option<PathBuf>,
    /// Eligible images found under the root
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Already carrying a processed marker
    pub skipped: usize,
    /// Left undispatched because the run was cancelled
    pub not_dispatched: usize,
    pub copy_failures: usize,
    pub failed_folders: usize,
    pub removed_scratch_dirs: usize,
    pub font_warnings: Vec<String>,
    pub asset_warnings: Vec<String>,
    pub failures: Vec<AssetFailure>,
}

impl BatchSummary {
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Any failure at all: a warning state, not a process failure
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.copy_failures > 0
    }

    /// Every dispatched asset failed
    pub fn all_failed(&self) -> bool {
        self.dispatched() > 0 && self.succeeded == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dir) = &self.batch_dir {
            writeln!(f, "Batch: {}", dir.display())?;
        }
        writeln!(
            f,
            "Assets: {} succeeded, {} failed, {} skipped, {} not dispatched",
            self.succeeded, self.failed, self.skipped, self.not_dispatched
        )?;
        if self.copy_failures > 0 {
            writeln!(
                f,
                "Copies: {} failed across {} folders",
                self.copy_failures, self.failed_folders
            )?;
        }
        for warning in &self.font_warnings {
            writeln!(f, "Font warning: {}", warning)?;
        }
        for failure in &self.failures {
            writeln!(f, "Failed: {} ({})", failure.path.display(), failure.reason)?;
        }
        Ok(())
    }
}

type TaskResult = Result<TransformOutcome, TransformFailure>;

/// Assets found under a root
#[derive(Debug, Default)]
pub struct AssetScan {
    pub pending: Vec<PathBuf>,
    pub already_processed: usize,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_derived_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && (entry.file_name() == THUMBNAIL_DIR || entry.file_name() == BASE64_DIR)
}

/// Every image under `root` outside `thumbnails`/`base64` directories, in name order
pub fn collect_assets(root: &Path) -> AssetScan {
    let mut scan = AssetScan::default();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && !is_derived_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_image_path(entry.path()) {
            continue;
        }

        if is_complete(entry.path()) {
            tracing::debug!(path = %entry.path().display(), "Already processed, skipping");
            scan.already_processed += 1;
        } else {
            if is_processed(entry.path()) {
                tracing::debug!(path = %entry.path().display(), "Enhanced but missing its thumbnail");
            }
            scan.pending.push(entry.into_path());
        }
    }

    scan
}

/// Drives allocation and the transform worker pool
pub struct Orchestrator {
    config: IntakeConfig,
    transformer: Arc<Transformer>,
    font_warnings: Vec<String>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Resolves the watermark font once for the whole run
    pub fn new(config: IntakeConfig) -> Self {
        let (transformer, warnings) = Transformer::from_config(&config);
        Self::with_transformer(config, transformer, warnings.iter().map(ToString::to_string).collect())
    }

    pub fn with_transformer(
        config: IntakeConfig,
        transformer: Transformer,
        font_warnings: Vec<String>,
    ) -> Self {
        Self {
            config,
            transformer: Arc::new(transformer),
            font_warnings,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling stops new dispatch; running tasks finish
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Allocate the next batch from `input_root`, then transform it.
    ///
    /// Store and layout errors abort before any worker starts.
    pub async fn run_batch(
        &self,
        store: &mut CounterStore,
        input_root: &Path,
        output_root: &Path,
    ) -> Result<BatchSummary, IntakeError> {
        let report = FolderAllocator::new(store, self.config.listing_order)
            .allocate_batch(input_root, output_root)?;

        let mut summary = match &report.batch_dir {
            Some(batch_dir) => self.run(batch_dir).await?,
            None => BatchSummary {
                font_warnings: self.font_warnings.clone(),
                ..BatchSummary::default()
            },
        };

        summary.batch_dir = report.batch_dir.clone();
        summary.copy_failures = report.copy_failures.len();
        summary.failed_folders = report.failed_folders;
        Ok(summary)
    }

    /// Transform every eligible image under `root`
    pub async fn run(&self, root: &Path) -> Result<BatchSummary, IntakeError> {
        let scan = collect_assets(root);
        let total = scan.pending.len();
        let workers = self.config.worker_count();

        let mut summary = BatchSummary {
            discovered: total + scan.already_processed,
            skipped: scan.already_processed,
            font_warnings: self.font_warnings.clone(),
            ..BatchSummary::default()
        };

        tracing::info!(
            root = %root.display(),
            assets = total,
            skipped = scan.already_processed,
            workers,
            "Starting transform pool"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, PathBuf> = HashMap::new();

        for (index, path) in scan.pending.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                summary.not_dispatched = total - index;
                tracing::warn!(remaining = summary.not_dispatched, "Run cancelled, stopping dispatch");
                break;
            };

            let transformer = Arc::clone(&self.transformer);
            let task_path = path.clone();
            let handle = tasks.spawn_blocking(move || {
                let _permit = permit;
                transformer.transform(&task_path)
            });
            in_flight.insert(handle.id(), path);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            record_joined(&mut summary, &mut in_flight, joined)?;
        }

        summary.removed_scratch_dirs = derivatives::remove_empty_derivative_dirs(root);

        if summary.failed > 0 {
            tracing::warn!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Transform finished with failures"
            );
        } else {
            tracing::info!(succeeded = summary.succeeded, "Transform finished");
        }

        Ok(summary)
    }
}

/// Fold one finished worker into the summary. A panicking worker counts as a
/// failed asset; any other join error is fatal.
fn record_joined(
    summary: &mut BatchSummary,
    in_flight: &mut HashMap<task::Id, PathBuf>,
    joined: Result<(task::Id, TaskResult), JoinError>,
) -> Result<(), IntakeError> {
    match joined {
        Ok((id, Ok(outcome))) => {
            in_flight.remove(&id);
            summary.succeeded += 1;
            summary.asset_warnings.extend(
                outcome
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}: {}", outcome.enhanced_path.display(), w)),
            );
        }
        Ok((id, Err(failure))) => {
            let path = in_flight
                .remove(&id)
                .unwrap_or_else(|| failure.asset.path.clone());
            summary.failed += 1;
            summary.failures.push(AssetFailure {
                path,
                reason: describe(&failure.error),
            });
        }
        Err(e) if e.is_panic() => {
            let path = in_flight.remove(&e.id()).unwrap_or_default();
            summary.failed += 1;
            summary.failures.push(AssetFailure {
                path,
                reason: format!("worker panicked: {}", e),
            });
        }
        Err(e) => return Err(IntakeError::Worker(e.to_string())),
    }

    Ok(())
}

fn describe(error: &TransformError) -> String {
    match error {
        TransformError::Decode { source, .. } => format!("decode: {}", source),
        TransformError::Step { step, reason, .. } => format!("{}: {}", step, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListingOrder;
    use crate::imaging::{TransformSettings, WatermarkFont};
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn test_orchestrator() -> Orchestrator {
        orchestrator_with_workers(2)
    }

    fn orchestrator_with_workers(workers: usize) -> Orchestrator {
        let mut config = IntakeConfig::default();
        config.listing_order = ListingOrder::ByName;
        config.workers = workers;
        let transformer = Transformer::new(
            TransformSettings::from(&config),
            Arc::new(WatermarkFont::builtin(16.0)),
        );
        Orchestrator::with_transformer(config, transformer, Vec::new())
    }

    fn photo() -> RgbImage {
        RgbImage::from_fn(120, 90, |x, y| Rgb([(50 + x) as u8, (40 + y) as u8, 90]))
    }

    #[test]
    fn test_collect_skips_derived_hidden_and_non_images() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("SKU_0001").join("3");
        fs::create_dir_all(folder.join("thumbnails")).unwrap();
        fs::create_dir_all(folder.join("base64")).unwrap();
        fs::write(folder.join("SKU_0001-IMG_1.jpg"), b"x").unwrap();
        fs::write(folder.join("SKU_0001-IMG_2.PNG"), b"x").unwrap();
        fs::write(folder.join("SKU_0001-IMG_3.txt"), b"x").unwrap();
        fs::write(folder.join("thumbnails").join("SKU_0001-IMG_1_thumbnail.jpg"), b"x").unwrap();
        fs::write(folder.join("base64").join("SKU_0001-IMG_1.png"), b"x").unwrap();
        fs::write(folder.join(".SKU_0001-IMG_2.PNG.enhanced"), b"").unwrap();
        fs::write(folder.join("thumbnails").join("SKU_0001-IMG_2_thumbnail.PNG"), b"x").unwrap();
        // Enhanced, but the thumbnail never got written
        fs::write(folder.join("SKU_0001-IMG_4.png"), b"x").unwrap();
        fs::write(folder.join(".SKU_0001-IMG_4.png.enhanced"), b"").unwrap();

        let scan = collect_assets(dir.path());
        assert_eq!(
            scan.pending,
            vec![folder.join("SKU_0001-IMG_1.jpg"), folder.join("SKU_0001-IMG_4.png")]
        );
        assert_eq!(scan.already_processed, 1);
    }

    #[tokio::test]
    async fn test_one_bad_image_out_of_ten() {
        let dir = TempDir::new().unwrap();
        for i in 1..=10 {
            let path = dir.path().join(format!("SKU_0001-IMG_{}.png", i));
            if i == 4 {
                fs::write(&path, b"corrupt").unwrap();
            } else {
                photo().save(&path).unwrap();
            }
        }

        let summary = test_orchestrator().run(dir.path()).await.unwrap();
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_failed());
        assert!(summary.failures[0].path.ends_with("SKU_0001-IMG_4.png"));

        for i in (1..=10).filter(|i| *i != 4) {
            assert!(dir.path().join(format!("SKU_0001-IMG_{}.png", i)).is_file());
            assert!(dir
                .path()
                .join("thumbnails")
                .join(format!("SKU_0001-IMG_{}_thumbnail.png", i))
                .is_file());
        }
        assert!(!dir.path().join("thumbnails").join("SKU_0001-IMG_4_thumbnail.png").exists());
    }

    #[tokio::test]
    async fn test_rerun_skips_processed_assets() {
        let dir = TempDir::new().unwrap();
        photo().save(dir.path().join("IMG_1.png")).unwrap();

        let orchestrator = test_orchestrator();
        let first = orchestrator.run(dir.path()).await.unwrap();
        assert_eq!(first.succeeded, 1);

        let before = fs::read(dir.path().join("IMG_1.png")).unwrap();
        let second = orchestrator.run(dir.path()).await.unwrap();
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(fs::read(dir.path().join("IMG_1.png")).unwrap(), before);
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        for i in 1..=3 {
            photo().save(dir.path().join(format!("IMG_{}.png", i))).unwrap();
        }

        let orchestrator = test_orchestrator();
        orchestrator.cancel_token().cancel();
        let summary = orchestrator.run(dir.path()).await.unwrap();
        assert_eq!(summary.dispatched(), 0);
        assert_eq!(summary.not_dispatched, 3);
        assert!(!dir.path().join("thumbnails").exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_lets_in_flight_asset_finish() {
        let dir = TempDir::new().unwrap();
        for i in 1..=6 {
            RgbImage::from_fn(480, 360, |x, y| Rgb([(x % 200) as u8 + 20, (y % 150) as u8 + 20, 90]))
                .save(dir.path().join(format!("IMG_{}.png", i)))
                .unwrap();
        }

        let orchestrator = orchestrator_with_workers(1);
        let token = orchestrator.cancel_token();
        let first_thumbnail = dir.path().join("thumbnails").join("IMG_1_thumbnail.png");
        let watcher = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(60);
            while !first_thumbnail.is_file() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            token.cancel();
        });

        let summary = orchestrator.run(dir.path()).await.unwrap();
        watcher.join().unwrap();

        assert!(summary.succeeded >= 1);
        assert_eq!(summary.failed, 0);
        assert!(summary.not_dispatched >= 1);
        assert_eq!(
            summary.succeeded + summary.failed + summary.not_dispatched,
            summary.discovered
        );

        // The asset in flight when the token fired ran to completion
        assert!(is_complete(&dir.path().join("IMG_1.png")));
        let completed = (1..=6)
            .filter(|i| is_complete(&dir.path().join(format!("IMG_{}.png", i))))
            .count();
        assert_eq!(completed, summary.succeeded);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported_with_its_path() {
        let path = PathBuf::from("/out/SKU_0001/1/SKU_0001-IMG_1.jpg");
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut in_flight = HashMap::new();

        let handle = tasks.spawn_blocking(|| -> TaskResult { panic!("decoder blew up") });
        in_flight.insert(handle.id(), path.clone());

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            record_joined(&mut summary, &mut in_flight, joined).unwrap();
        }

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].path, path);
        assert!(summary.failures[0].reason.starts_with("worker panicked"));
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_all_failed_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"nope").unwrap();
        fs::write(dir.path().join("b.heic"), b"nope").unwrap();

        let summary = test_orchestrator().run(dir.path()).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert!(summary.all_failed());
    }

    #[tokio::test]
    async fn test_run_batch_end_to_end() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let db = TempDir::new().unwrap();

        fs::create_dir(input.path().join("A")).unwrap();
        fs::create_dir(input.path().join("B")).unwrap();
        fs::create_dir(input.path().join("C")).unwrap();
        photo().save(input.path().join("A").join("1.jpg")).unwrap();
        photo().save(input.path().join("A").join("2.jpg")).unwrap();
        photo().save(input.path().join("B").join("1.png")).unwrap();

        let mut store = CounterStore::open(db.path().join("c.db")).unwrap();
        store.reset(5).unwrap();

        let summary = test_orchestrator()
            .run_batch(&mut store, input.path(), output.path())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.last_sku().unwrap(), 8);

        let batch = summary.batch_dir.unwrap();
        assert!(batch.to_string_lossy().ends_with("_SKU#00006-00008"));
        let a = batch.join("SKU_0006").join("2");
        assert!(a.join("SKU_0006-IMG_1.jpg").is_file());
        assert!(a.join("thumbnails").join("SKU_0006-IMG_2_thumbnail.jpg").is_file());
        assert!(a.join("base64").join("SKU_0006-IMG_1.txt").is_file());
        assert!(batch.join("SKU_0007/1/SKU_0007-IMG_1.png").is_file());
        assert!(batch.join("SKU_0008/0").is_dir());
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_before_dispatch() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let db = TempDir::new().unwrap();
        fs::create_dir(input.path().join("A")).unwrap();
        photo().save(input.path().join("A").join("1.png")).unwrap();

        let db_path = db.path().join("c.db");
        let mut store = CounterStore::open(&db_path).unwrap();
        // Another writer holds the lock for longer than the busy timeout allows
        let blocker = rusqlite::Connection::open(&db_path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let result = test_orchestrator()
            .run_batch(&mut store, input.path(), output.path())
            .await;
        assert!(matches!(result, Err(IntakeError::StoreUnavailable(_))));
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);

        blocker.execute_batch("ROLLBACK").unwrap();
    }
}
