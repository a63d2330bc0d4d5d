use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use catalog_intake::intake::FolderAllocator;
use catalog_intake::{BatchSummary, CounterStore, IntakeConfig, ListingOrder, Orchestrator};

/// Assign SKUs to product photo folders and prepare the images for listing
#[derive(Debug, Parser)]
#[command(name = "catalog-intake", version, about)]
struct Cli {
    /// JSON config file (default: <config_dir>/catalog-intake/config.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SKU counter database
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Also write plain-text logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct LayoutArgs {
    /// Folder holding one subfolder per item
    input: PathBuf,
    /// Root under which the batch directory is created
    output: PathBuf,
    /// Assign SKUs in file-name order instead of filesystem listing order
    #[arg(long)]
    sort_by_name: bool,
}

#[derive(Debug, Args)]
struct TransformArgs {
    /// Preferred watermark font
    #[arg(long)]
    brand_font: Option<PathBuf>,
    /// Worker pool size (capped)
    #[arg(long)]
    workers: Option<usize>,
    /// Skip base64 derivatives
    #[arg(long)]
    no_base64: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allocate the next batch and transform its images
    Run {
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        transform: TransformArgs,
    },
    /// Allocate the next batch and copy files into the catalog layout only
    Allocate {
        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Transform every unprocessed image under an existing catalog tree
    Process {
        root: PathBuf,
        #[command(flatten)]
        transform: TransformArgs,
    },
    /// Show the allocation history and the last SKU
    History,
    /// Clear the allocation history and rewind the counter (destructive)
    Reset {
        /// New last SKU; the next batch starts at this value + 1
        #[arg(long)]
        to: i64,
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

fn apply_layout(config: &mut IntakeConfig, layout: &LayoutArgs) {
    if layout.sort_by_name {
        config.listing_order = ListingOrder::ByName;
    }
}

fn apply_transform(config: &mut IntakeConfig, transform: &TransformArgs) {
    if let Some(font) = &transform.brand_font {
        config.brand_font = Some(font.clone());
    }
    if let Some(workers) = transform.workers {
        config.workers = workers;
    }
    if transform.no_base64 {
        config.encode_base64 = false;
    }
}

fn open_store(config: &IntakeConfig) -> Result<CounterStore> {
    let path = config.database_path();
    let store = CounterStore::open(&path)
        .with_context(|| format!("SKU store unavailable at {}", path.display()))?;
    info!("Database: {}", store.path().display());
    Ok(store)
}

/// Cancel dispatch on Ctrl-C; running workers finish
fn cancel_on_ctrl_c(orchestrator: &Orchestrator) {
    let token = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing running tasks");
            token.cancel();
        }
    });
}

fn report(summary: &BatchSummary) -> ExitCode {
    print!("{}", summary);

    if summary.all_failed() {
        tracing::error!("Every asset in the batch failed");
        ExitCode::FAILURE
    } else {
        if summary.has_failures() {
            tracing::warn!("Completed with failures, see summary");
        } else {
            info!("Processing completed successfully.");
        }
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let mut config = IntakeConfig::discover(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database_path = Some(database.clone());
    }

    match cli.command {
        Command::Run { layout, transform } => {
            apply_layout(&mut config, &layout);
            apply_transform(&mut config, &transform);

            let mut store = open_store(&config)?;
            let orchestrator = Orchestrator::new(config);
            cancel_on_ctrl_c(&orchestrator);

            let summary = orchestrator
                .run_batch(&mut store, &layout.input, &layout.output)
                .await?;
            Ok(report(&summary))
        }
        Command::Allocate { layout } => {
            apply_layout(&mut config, &layout);

            let mut store = open_store(&config)?;
            let report = FolderAllocator::new(&mut store, config.listing_order)
                .allocate_batch(&layout.input, &layout.output)?;

            for folder in &report.folders {
                println!(
                    "{} <- {} ({} files)",
                    folder.sku_label,
                    folder.source.relative_path.display(),
                    folder.image_count
                );
            }
            if let Some(dir) = &report.batch_dir {
                println!("Batch: {}", dir.display());
            }
            for failure in &report.copy_failures {
                println!("Copy failed: {}", failure);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Process { root, transform } => {
            apply_transform(&mut config, &transform);
            if !root.is_dir() {
                bail!("Output directory does not exist: {}", root.display());
            }

            let orchestrator = Orchestrator::new(config);
            cancel_on_ctrl_c(&orchestrator);

            let summary = orchestrator.run(&root).await?;
            Ok(report(&summary))
        }
        Command::History => {
            let store = open_store(&config)?;
            for row in store.history()? {
                println!(
                    "{:>6} +{:<4} images={:<5} {} {}",
                    row.starting_sku,
                    row.folder_count,
                    row.image_count,
                    row.timestamp,
                    row.generated_label
                );
            }
            if let Some(latest) = store.latest()? {
                println!("Latest batch: {} ({})", latest.generated_label, latest.timestamp);
            }
            println!("Last SKU: {}", store.last_sku()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { to, yes } => {
            if !yes {
                bail!("Refusing to reset the SKU counter without --yes");
            }
            let mut store = open_store(&config)?;
            store.reset(to)?;
            println!("SKU counter reset; next SKU is {}", to + 1);
            Ok(ExitCode::SUCCESS)
        }
    }
}
