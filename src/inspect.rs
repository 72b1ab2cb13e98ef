//! Duplicate-identifier diagnostics.
//!
//! Read-only inspection of a single batch: how many recordids occur more
//! than once, which are the worst offenders, and what their version
//! timestamps look like. Useful for sizing the dedup problem before a
//! silver run; never writes anything.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::batch;
use crate::models::LAST_MODIFIED_KEY;

/// `civh inspect duplicates`: report duplicate recordids in one batch.
pub fn run_duplicates(file: &Path, top: usize) -> Result<()> {
    let records = batch::load_records(file)?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &records {
        if !record.recordid.is_empty() {
            *counts.entry(record.recordid.as_str()).or_insert(0) += 1;
        }
    }

    let total: usize = counts.values().sum();
    let unique = counts.len();
    let mut dupes: Vec<(&str, usize)> = counts
        .iter()
        .filter(|(_, c)| **c > 1)
        .map(|(id, c)| (*id, *c))
        .collect();
    // Most-duplicated first; BTreeMap iteration keeps ties in id order.
    dupes.sort_by(|a, b| b.1.cmp(&a.1));

    println!("File: {}", file.display());
    println!("Total records with recordid: {}", total);
    println!("Unique recordids: {}", unique);
    println!("Duplicate recordids: {}", dupes.len());

    if dupes.is_empty() {
        println!();
        println!("No duplicate recordids found.");
        return Ok(());
    }

    println!();
    println!("Top {} duplicates:", top.min(dupes.len()));
    for (id, count) in dupes.iter().take(top) {
        println!("  {}  ->  {} occurrences", id, count);
    }

    let (worst, _) = dupes[0];
    let timestamps: Vec<Option<&str>> = records
        .iter()
        .filter(|r| r.recordid == worst)
        .map(|r| r.field_str(LAST_MODIFIED_KEY))
        .collect();

    println!();
    println!("Example duplicated recordid: {}", worst);
    println!(
        "Its last_modified_timestamps: {}",
        serde_json::to_string(&timestamps)?
    );

    Ok(())
}
