//! Incremental fetch stage (bronze).
//!
//! Pulls every record modified since the last successful run. The window
//! is `[watermark - lookback, now)`, or a fixed-size fallback window when
//! no watermark exists yet. The lookback margin re-fetches a trailing
//! slice to catch records that were modified but not yet visible upstream
//! at watermark time; the resulting duplicates are the deduplicator's
//! problem, not ours.
//!
//! The window is traversed in fixed-size sub-windows so no single query
//! exceeds the upstream row limit. Within a sub-window, pages are drained
//! sequentially until the reported total is reached or a page comes back
//! empty. The watermark is advanced only after the whole window has been
//! drained and the bronze batch written — a failure mid-window leaves
//! persisted state untouched, making re-runs safe (at-least-once).

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::batch;
use crate::client::{HttpSearchApi, SearchApi};
use crate::config::Config;
use crate::models::{Record, LAST_MODIFIED_KEY, TS_MIN};
use crate::state::{JsonStateStore, StateStore};

/// Per-run overrides from the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchOptions {
    /// Override the configured page size.
    pub rows: Option<usize>,
    /// Override the fallback window size (first-run only).
    pub hours: Option<i64>,
    /// Compute and print the window without fetching or persisting.
    pub dry_run: bool,
}

/// Outcome of a completed fetch run.
#[derive(Debug)]
#[allow(dead_code)]
pub struct FetchReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub records_fetched: usize,
    pub new_watermark: Option<DateTime<Utc>>,
    pub output_path: Option<PathBuf>,
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Compute the half-open fetch window `[start, now)`.
///
/// No watermark: a fixed fallback window ending now. With a watermark:
/// start at `watermark - lookback` to tolerate upstream visibility lag.
pub fn effective_window(
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    fallback: Duration,
    lookback: Duration,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = match watermark {
        Some(wm) => wm - lookback,
        None => now - fallback,
    };
    (start, now)
}

/// Filter expression for one sub-window, half-open on the right.
pub fn window_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "last_modified_timestamp >= \"{}\" AND last_modified_timestamp < \"{}\"",
        iso(start),
        iso(end)
    )
}

/// Traverse `[start, end)` chunk by chunk, draining each sub-window's
/// pages sequentially. The final sub-window is clamped to `end`, so the
/// window is always covered completely regardless of boundary alignment.
///
/// Returns the flat, order-preserving record sequence — NOT deduplicated.
pub async fn fetch_window(
    api: &dyn SearchApi,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    chunk: Duration,
    page_size: usize,
) -> Result<Vec<Record>> {
    let mut all = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let chunk_end = std::cmp::min(cursor + chunk, end);
        let q = window_query(cursor, chunk_end);

        let mut offset = 0usize;
        let mut in_window = 0u64;
        loop {
            let page = api.search(&q, page_size, offset).await?;
            let got = page.records.len();
            in_window += got as u64;
            all.extend(page.records);
            println!(
                "Pulled {} records this page. Sub-window total: {} / {}",
                got, in_window, page.nhits
            );
            if got == 0 || in_window >= page.nhits {
                break;
            }
            offset += page_size;
        }

        cursor = chunk_end;
    }

    Ok(all)
}

/// Maximum parseable `last_modified_timestamp` among `records`.
/// Unparseable timestamps resolve to the sentinel and never win.
pub fn max_modified(records: &[Record]) -> Option<DateTime<Utc>> {
    records
        .iter()
        .map(|r| r.modified_at(LAST_MODIFIED_KEY))
        .filter(|ts| *ts > TS_MIN)
        .max()
}

/// Run one fetch: compute the window, drain it, write the bronze batch,
/// then (and only then) advance the watermark.
pub async fn fetch_into_bronze(
    config: &Config,
    api: &dyn SearchApi,
    state: &dyn StateStore,
    opts: FetchOptions,
    now: DateTime<Utc>,
) -> Result<FetchReport> {
    let watermark = state.load()?;
    let fallback = Duration::hours(opts.hours.unwrap_or(config.fetch.fallback_window_hours));
    let lookback = Duration::hours(config.fetch.lookback_hours);
    let chunk = Duration::hours(config.fetch.chunk_hours);
    let (start, end) = effective_window(watermark, now, fallback, lookback);

    match watermark {
        Some(wm) => println!("Last watermark: {}", iso(wm)),
        None => println!("Last watermark: (none)"),
    }
    println!("Effective start: {}", iso(start));

    if opts.dry_run {
        let span_secs = (end - start).num_seconds();
        let chunk_secs = chunk.num_seconds();
        let sub_windows = (span_secs + chunk_secs - 1) / chunk_secs;
        println!("fetch {} (dry-run)", config.api.dataset);
        println!("  window: [{}, {})", iso(start), iso(end));
        println!("  sub-windows: {}", sub_windows);
        return Ok(FetchReport {
            window_start: start,
            window_end: end,
            records_fetched: 0,
            new_watermark: None,
            output_path: None,
        });
    }

    let page_size = opts.rows.unwrap_or(config.api.page_size);
    let records = fetch_window(api, start, end, chunk, page_size).await?;

    let span_hours = ((end - start).num_minutes() + 59) / 60;
    let file_name = format!(
        "{}__last{}h__{}.json",
        config.api.dataset,
        span_hours,
        batch::run_stamp(now)
    );
    let out_path = config.storage.bronze_dir.join(file_name);
    batch::write_records(&out_path, &records)?;
    println!("Saved {} records to: {}", records.len(), out_path.display());

    let observed = max_modified(&records);
    let new_watermark = match observed {
        None => {
            println!("No last_modified_timestamp found. State not updated.");
            None
        }
        // Never move backward: the lookback can surface only records
        // older than the current watermark.
        Some(ts) => match watermark {
            Some(old) if ts <= old => {
                println!("Watermark unchanged at: {}", iso(old));
                None
            }
            _ => {
                state.store(ts)?;
                println!("Updated last_watermark to: {}", iso(ts));
                Some(ts)
            }
        },
    };

    println!();
    println!("fetch {}", config.api.dataset);
    println!("  window: [{}, {})", iso(start), iso(end));
    println!("  fetched: {} records", records.len());
    println!("ok");

    Ok(FetchReport {
        window_start: start,
        window_end: end,
        records_fetched: records.len(),
        new_watermark,
        output_path: Some(out_path),
    })
}

/// CLI entry point: wire up the HTTP client and the file-backed state
/// store, then run the fetch.
pub async fn run_fetch(config: &Config, opts: FetchOptions) -> Result<()> {
    let api = HttpSearchApi::new(&config.api)?;
    let state = JsonStateStore::new(&config.storage.state_path);
    fetch_into_bronze(config, &api, &state, opts, Utc::now()).await?;
    Ok(())
}
