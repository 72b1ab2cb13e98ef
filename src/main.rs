//! # Civic Harvest CLI (`civh`)
//!
//! The `civh` binary drives the three-stage harvest pipeline. It provides
//! commands for workspace initialization, incremental fetching,
//! deduplication, weekly aggregation, and batch diagnostics.
//!
//! ## Usage
//!
//! ```bash
//! civh --config ./config/civh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `civh init` | Create the data directories and watermark state file |
//! | `civh fetch` | Pull records modified since the last run into a bronze batch |
//! | `civh dedupe [FILES...]` | Collapse bronze batches into a silver batch (latest-wins) |
//! | `civh aggregate` | Build the weekly gold tables from the latest silver batch |
//! | `civh inspect duplicates` | Report duplicate recordids within one batch |
//! | `civh state` | Print the current watermark |
//!
//! ## Examples
//!
//! ```bash
//! # First run: initialize, then pull the fallback window
//! civh init
//! civh fetch
//!
//! # Preview the next window without fetching
//! civh fetch --dry-run
//!
//! # Merge specific bronze batches instead of the whole directory
//! civh dedupe data/bronze/a.json data/bronze/b.json
//!
//! # Aggregate an explicit silver batch
//! civh aggregate --input data/silver/311_requests__silver_deduped__20260108T065048Z.json
//! ```

mod aggregate;
mod batch;
mod client;
mod config;
mod dedupe;
mod fetch;
mod inspect;
mod models;
mod state;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Civic Harvest CLI — incremental harvesting and weekly trend reporting
/// for public 3-1-1 service requests.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file holding the API endpoint, fetch windowing, and storage paths.
#[derive(Parser)]
#[command(
    name = "civh",
    about = "Civic Harvest — incremental harvesting and weekly trend reporting for 3-1-1 service requests",
    version,
    long_about = "Civic Harvest pulls public service-request records from an open-data search API \
    in watermark-driven time windows, collapses overlapping fetches to one canonical version per \
    request (latest-wins), and aggregates the result into weekly count tables with data-quality \
    accounting."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/civh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the workspace.
    ///
    /// Creates the bronze/silver/gold data directories and a fresh state
    /// file with a null watermark. Idempotent — running it multiple times
    /// is safe and never resets an existing watermark.
    Init,

    /// Pull records modified since the last successful run.
    ///
    /// Computes the fetch window from the persisted watermark (minus a
    /// lookback margin), drains it in fixed-size sub-windows, writes a
    /// bronze batch, and advances the watermark. A failure mid-window
    /// leaves all persisted state untouched.
    Fetch {
        /// Compute and print the window without fetching or persisting.
        #[arg(long)]
        dry_run: bool,

        /// Override the configured page size for this run.
        #[arg(long)]
        rows: Option<usize>,

        /// Override the fallback window size in hours (first-run only).
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Collapse bronze batches into a silver batch (latest-wins).
    ///
    /// Merges the given batch files (default: every `.json` in the bronze
    /// directory), keeps the newest version per recordid, and writes the
    /// deduplicated batch plus a stats report.
    Dedupe {
        /// Bronze batch files to merge. Defaults to the whole bronze dir.
        files: Vec<PathBuf>,
    },

    /// Build the weekly gold tables from a silver batch.
    ///
    /// Buckets each record into its calendar week and categorical
    /// dimensions, writes the two sorted CSV count tables, and prints the
    /// full data-quality stats block.
    Aggregate {
        /// Silver batch to aggregate. Defaults to the latest in the
        /// silver directory.
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Batch diagnostics.
    Inspect {
        #[command(subcommand)]
        what: InspectAction,
    },

    /// Print the current watermark.
    State,
}

/// Inspection subcommands.
#[derive(Subcommand)]
enum InspectAction {
    /// Report duplicate recordids within one batch file.
    Duplicates {
        /// Path to a batch JSON file.
        #[arg(long)]
        file: PathBuf,

        /// Show the top N most duplicated recordids.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            state::run_init(&cfg)?;
        }
        Commands::Fetch {
            dry_run,
            rows,
            hours,
        } => {
            let opts = fetch::FetchOptions {
                rows,
                hours,
                dry_run,
            };
            fetch::run_fetch(&cfg, opts).await?;
        }
        Commands::Dedupe { files } => {
            dedupe::run_dedupe(&cfg, files)?;
        }
        Commands::Aggregate { input } => {
            aggregate::run_aggregate(&cfg, input)?;
        }
        Commands::Inspect { what } => match what {
            InspectAction::Duplicates { file, top } => {
                inspect::run_duplicates(&file, top)?;
            }
        },
        Commands::State => {
            state::run_show(&cfg)?;
        }
    }

    Ok(())
}
