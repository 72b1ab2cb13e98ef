//! # Civic Harvest
//!
//! An incremental harvesting and weekly trend-reporting pipeline for
//! public 3-1-1 service requests.
//!
//! Civic Harvest pulls service-request records from an open-data search
//! API in watermark-driven time windows, collapses overlapping fetches to
//! one canonical version per request (latest-wins), and aggregates the
//! result into weekly count tables with data-quality accounting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Fetcher     │──▶│ Deduplicator │──▶│  Aggregator  │
//! │ API → bronze │   │ bronze→silver │   │ silver→gold  │
//! └──────┬───────┘   └──────────────┘   └──────────────┘
//!        │
//!        ▼
//!  watermark state (config/state.json)
//! ```
//!
//! Each stage reads the previous stage's batch from disk and writes its
//! own — there is no in-process queue, and only the fetcher persists
//! cross-run state (the watermark). Re-runs are safe: the fetcher is
//! at-least-once and the deduplicator makes the overlap idempotent.
//!
//! ## Quick Start
//!
//! ```bash
//! civh init                     # create data dirs + state file
//! civh fetch                    # pull records modified since last run
//! civh dedupe                   # collapse bronze batches to silver
//! civh aggregate                # build weekly gold tables
//! civh inspect duplicates --file data/bronze/<batch>.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Record envelope and lenient timestamp parsing |
//! | [`client`] | Upstream search API client |
//! | [`state`] | Watermark persistence |
//! | [`fetch`] | Incremental windowed fetching (bronze) |
//! | [`batch`] | Batch exchange files |
//! | [`dedupe`] | Latest-wins deduplication (silver) |
//! | [`aggregate`] | Weekly aggregation (gold) |
//! | [`inspect`] | Duplicate-identifier diagnostics |

pub mod aggregate;
pub mod batch;
pub mod client;
pub mod config;
pub mod dedupe;
pub mod fetch;
pub mod inspect;
pub mod models;
pub mod state;
