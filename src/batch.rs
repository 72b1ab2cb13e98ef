//! Batch exchange files.
//!
//! Each stage hands the next one a JSON document on disk rather than an
//! in-process queue. Two shapes are accepted when reading: a bare array
//! of record objects, or an object with a `records` array (the sample
//! endpoint emits the latter; the fetcher writes the former). Anything
//! else is a fatal shape error for the stage reading it.
//!
//! Output file names encode a UTC run stamp (`%Y%m%dT%H%M%SZ`) so
//! successive runs never overwrite each other, and so the alphabetical
//! maximum of a directory listing is also the chronologically latest
//! batch.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::Record;

/// Compact UTC run stamp for file names, e.g. `20260108T041107Z`.
pub fn run_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Load records from a batch file, supporting both exchange shapes.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
    let payload: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Batch file is not valid JSON: {}", path.display()))?;

    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(items)) => items,
            Some(_) => bail!(
                "Unexpected batch shape: 'records' is not a list: {}",
                path.display()
            ),
            None => bail!(
                "Unexpected batch shape: object without a 'records' list: {}",
                path.display()
            ),
        },
        _ => bail!(
            "Unexpected batch JSON shape (expected list or object): {}",
            path.display()
        ),
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let record: Record = serde_json::from_value(item).with_context(|| {
            format!(
                "Unexpected batch shape: record entry is not an object: {}",
                path.display()
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Write a record batch as a bare JSON array, creating parent directories.
pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(records)?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write batch file: {}", path.display()))
}

/// Latest batch in `dir` whose file name starts with `prefix`.
///
/// Run stamps are ISO-ordered, so the alphabetical maximum is the
/// chronological latest. Returns `None` for a missing or empty directory.
pub fn latest_batch(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut best: Option<PathBuf> = None;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(".json") {
            continue;
        }
        if best
            .as_ref()
            .and_then(|b| b.file_name())
            .map_or(true, |b| name > b.to_string_lossy().as_ref())
        {
            best = Some(path);
        }
    }
    Ok(best)
}

/// All `.json` batches in `dir`, sorted by file name (oldest first).
pub fn list_batches(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().map_or(false, |ext| ext == "json")
        })
        .collect();
    paths.sort();
    Ok(paths)
}
