//! Weekly aggregation (gold stage).
//!
//! Converts the canonical (deduplicated) batch into two sorted count
//! tables — requests per `(week, local_area)` and per `(week, local_area,
//! department)` — while surfacing data-quality signals about missing or
//! empty categorical fields.
//!
//! A record lands in the calendar week starting on the Monday on or
//! before its open date. Records whose open timestamp fails to parse are
//! excluded entirely and counted; records with missing or blank
//! dimensions still produce rows, keyed on the `"UNKNOWN"` sentinel.
//! Both tables are projections of the same per-record bucket assignment,
//! so their sums must equal the bucketed-row count — computed and
//! reported as an explicit self-check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde_json::Value;

use crate::batch;
use crate::config::Config;
use crate::dedupe::SILVER_PREFIX;
use crate::models::{parse_timestamp, Record, OPEN_TIMESTAMP_KEY, TS_MIN};

/// Categorical dimensions of the weekly tables.
pub const LOCAL_AREA_KEY: &str = "local_area";
pub const DEPARTMENT_KEY: &str = "department";

/// Effective value for a missing or blank dimension.
pub const UNKNOWN: &str = "UNKNOWN";

/// File-name prefixes of the gold tables.
pub const WEEK_AREA_PREFIX: &str = "311_requests__gold_weekly_by_local_area__";
pub const WEEK_AREA_DEPT_PREFIX: &str = "311_requests__gold_weekly_by_local_area_and_department__";

/// Three-way classification of a categorical field lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResolution {
    pub value: String,
    pub missing_key: bool,
    pub empty_value: bool,
}

/// Resolve a categorical field: absent key, blank value, or usable value.
///
/// Absent and blank both resolve to [`UNKNOWN`] but are distinguishable
/// for diagnosis; a usable value is returned trimmed.
pub fn resolve_field(record: &Record, key: &str) -> FieldResolution {
    match record.fields.get(key) {
        None => FieldResolution {
            value: UNKNOWN.to_string(),
            missing_key: true,
            empty_value: false,
        },
        Some(Value::String(s)) if !s.trim().is_empty() => FieldResolution {
            value: s.trim().to_string(),
            missing_key: false,
            empty_value: false,
        },
        // Present but null, blank, or not a string at all.
        Some(_) => FieldResolution {
            value: UNKNOWN.to_string(),
            missing_key: false,
            empty_value: true,
        },
    }
}

/// The Monday on or before the given instant's UTC date.
pub fn week_start(dt: DateTime<Utc>) -> NaiveDate {
    let date = dt.date_naive();
    date - Duration::days(dt.weekday().num_days_from_monday() as i64)
}

/// Counters accumulated over one aggregation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WeeklyStats {
    pub input_records: usize,
    pub produced_rows: usize,
    pub invalid_or_missing_ts: usize,
    pub unknown_local_area_count: usize,
    pub unknown_department_count: usize,
    pub unknown_any_count: usize,
    pub unknown_both_count: usize,
    pub missing_fields_local_area: usize,
    pub missing_fields_department: usize,
    pub empty_local_area_value: usize,
    pub empty_department_value: usize,
    pub min_week_start_date: Option<String>,
    pub max_week_start_date: Option<String>,
    pub sum_week_area: u64,
    pub sum_week_area_dept: u64,
}

/// First-occurrence example record per failure category, for debugging.
#[derive(Debug, Default, Clone)]
pub struct QualitySamples {
    pub missing_local_area_key: Option<Record>,
    pub missing_department_key: Option<Record>,
    pub empty_local_area_value: Option<Record>,
    pub empty_department_value: Option<Record>,
}

/// One row of the `(week, local_area)` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekAreaRow {
    pub week_start_date: String,
    pub local_area: String,
    pub request_count: u64,
}

/// One row of the `(week, local_area, department)` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekAreaDeptRow {
    pub week_start_date: String,
    pub local_area: String,
    pub department: String,
    pub request_count: u64,
}

/// Full result of one aggregation pass.
#[derive(Debug)]
pub struct Aggregation {
    pub week_area: Vec<WeekAreaRow>,
    pub week_area_dept: Vec<WeekAreaDeptRow>,
    pub stats: WeeklyStats,
    pub samples: QualitySamples,
}

/// Aggregate a canonical batch into the two weekly tables.
///
/// An empty batch is a precondition failure — the caller should not have
/// invoked aggregation on it.
pub fn aggregate_weekly(records: &[Record]) -> Result<Aggregation> {
    if records.is_empty() {
        bail!("No records found in silver batch");
    }

    let mut stats = WeeklyStats {
        input_records: records.len(),
        ..Default::default()
    };
    let mut samples = QualitySamples::default();

    struct BucketRow {
        week: String,
        area: String,
        dept: String,
    }
    let mut rows: Vec<BucketRow> = Vec::new();

    for record in records {
        let dt = parse_timestamp(record.field_str(OPEN_TIMESTAMP_KEY));
        if dt == TS_MIN {
            stats.invalid_or_missing_ts += 1;
            continue;
        }
        let week = week_start(dt).format("%Y-%m-%d").to_string();

        if stats
            .min_week_start_date
            .as_deref()
            .map_or(true, |m| week.as_str() < m)
        {
            stats.min_week_start_date = Some(week.clone());
        }
        if stats
            .max_week_start_date
            .as_deref()
            .map_or(true, |m| week.as_str() > m)
        {
            stats.max_week_start_date = Some(week.clone());
        }

        let area = resolve_field(record, LOCAL_AREA_KEY);
        if area.value == UNKNOWN {
            stats.unknown_local_area_count += 1;
            if area.missing_key {
                stats.missing_fields_local_area += 1;
                samples
                    .missing_local_area_key
                    .get_or_insert_with(|| record.clone());
            } else if area.empty_value {
                stats.empty_local_area_value += 1;
                samples
                    .empty_local_area_value
                    .get_or_insert_with(|| record.clone());
            }
        }

        let dept = resolve_field(record, DEPARTMENT_KEY);
        if dept.value == UNKNOWN {
            stats.unknown_department_count += 1;
            if dept.missing_key {
                stats.missing_fields_department += 1;
                samples
                    .missing_department_key
                    .get_or_insert_with(|| record.clone());
            } else if dept.empty_value {
                stats.empty_department_value += 1;
                samples
                    .empty_department_value
                    .get_or_insert_with(|| record.clone());
            }
        }

        stats.produced_rows += 1;
        if area.value == UNKNOWN || dept.value == UNKNOWN {
            stats.unknown_any_count += 1;
        }
        if area.value == UNKNOWN && dept.value == UNKNOWN {
            stats.unknown_both_count += 1;
        }

        rows.push(BucketRow {
            week,
            area: area.value,
            dept: dept.value,
        });
    }

    // BTreeMap keys give the lexicographic (week, area[, dept]) ordering
    // the output tables require.
    let mut week_area_counts: BTreeMap<(String, String), u64> = BTreeMap::new();
    let mut week_area_dept_counts: BTreeMap<(String, String, String), u64> = BTreeMap::new();
    for row in &rows {
        *week_area_counts
            .entry((row.week.clone(), row.area.clone()))
            .or_insert(0) += 1;
        *week_area_dept_counts
            .entry((row.week.clone(), row.area.clone(), row.dept.clone()))
            .or_insert(0) += 1;
    }

    let week_area: Vec<WeekAreaRow> = week_area_counts
        .into_iter()
        .map(|((week_start_date, local_area), request_count)| WeekAreaRow {
            week_start_date,
            local_area,
            request_count,
        })
        .collect();
    let week_area_dept: Vec<WeekAreaDeptRow> = week_area_dept_counts
        .into_iter()
        .map(
            |((week_start_date, local_area, department), request_count)| WeekAreaDeptRow {
                week_start_date,
                local_area,
                department,
                request_count,
            },
        )
        .collect();

    stats.sum_week_area = week_area.iter().map(|r| r.request_count).sum();
    stats.sum_week_area_dept = week_area_dept.iter().map(|r| r.request_count).sum();

    Ok(Aggregation {
        week_area,
        week_area_dept,
        stats,
        samples,
    })
}

/// Quote a CSV field only when it needs it.
fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn write_week_area_csv(path: &Path, rows: &[WeekAreaRow]) -> Result<()> {
    let mut out = String::from("week_start_date,local_area,request_count\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{}\n",
            csv_field(&row.week_start_date),
            csv_field(&row.local_area),
            row.request_count
        ));
    }
    write_table(path, &out)
}

fn write_week_area_dept_csv(path: &Path, rows: &[WeekAreaDeptRow]) -> Result<()> {
    let mut out = String::from("week_start_date,local_area,department,request_count\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&row.week_start_date),
            csv_field(&row.local_area),
            csv_field(&row.department),
            row.request_count
        ));
    }
    write_table(path, &out)
}

fn write_table(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write CSV file: {}", path.display()))
}

/// Count data rows in a written CSV (header excluded). Re-counted from
/// the file itself so the reported number reflects what actually landed
/// on disk.
pub fn count_csv_rows(path: &Path) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    Ok(raw.lines().count().saturating_sub(1))
}

fn sample_to_json(sample: &Option<Record>) -> String {
    match sample {
        None => "None found".to_string(),
        Some(record) => serde_json::to_string_pretty(record)
            .unwrap_or_else(|_| "(unprintable record)".to_string()),
    }
}

/// `civh aggregate`: load the latest (or given) silver batch, aggregate,
/// write both gold tables, and print the full stats block.
pub fn run_aggregate(config: &Config, input: Option<PathBuf>) -> Result<()> {
    let path = match input {
        Some(path) => path,
        None => batch::latest_batch(&config.storage.silver_dir, SILVER_PREFIX)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No silver batches found in {}",
                    config.storage.silver_dir.display()
                )
            })?,
    };

    let records = batch::load_records(&path)?;
    let agg = aggregate_weekly(&records)?;

    if agg.week_area.is_empty() {
        bail!("No rows to write for week and area CSV");
    }
    if agg.week_area_dept.is_empty() {
        bail!("No rows to write for week, area and dept CSV");
    }

    let stamp = batch::run_stamp(Utc::now());
    let week_area_path = config
        .storage
        .gold_dir
        .join(format!("{}{}.csv", WEEK_AREA_PREFIX, stamp));
    let week_area_dept_path = config
        .storage
        .gold_dir
        .join(format!("{}{}.csv", WEEK_AREA_DEPT_PREFIX, stamp));

    write_week_area_csv(&week_area_path, &agg.week_area)?;
    write_week_area_dept_csv(&week_area_dept_path, &agg.week_area_dept)?;

    let week_area_rows = count_csv_rows(&week_area_path)?;
    let week_area_dept_rows = count_csv_rows(&week_area_dept_path)?;

    let stats = &agg.stats;
    println!("Loaded silver file: {}", path.display());
    println!("Records: {}", records.len());
    println!();
    println!("--- Gold Weekly Stats ---");
    println!("Input records: {}", stats.input_records);
    println!("Produced rows: {}", stats.produced_rows);
    println!(
        "Skipped rows due to invalid or missing ts: {}",
        stats.invalid_or_missing_ts
    );
    println!("Unknown local area: {}", stats.unknown_local_area_count);
    println!("Unknown department: {}", stats.unknown_department_count);
    println!(
        "Unknown any (local area or department): {}",
        stats.unknown_any_count
    );
    println!(
        "Unknown both (local area and department): {}",
        stats.unknown_both_count
    );
    println!(
        "Missing fields - local area: {}",
        stats.missing_fields_local_area
    );
    println!(
        "Missing fields - department: {}",
        stats.missing_fields_department
    );
    println!("Empty local area value: {}", stats.empty_local_area_value);
    println!("Empty department value: {}", stats.empty_department_value);
    println!(
        "Min week start date: {}",
        stats.min_week_start_date.as_deref().unwrap_or("")
    );
    println!(
        "Max week start date: {}",
        stats.max_week_start_date.as_deref().unwrap_or("")
    );
    println!();
    println!("--- Sample Records ---");
    println!(
        "Sample missing local area key: {}",
        sample_to_json(&agg.samples.missing_local_area_key)
    );
    println!(
        "Sample missing department key: {}",
        sample_to_json(&agg.samples.missing_department_key)
    );
    println!(
        "Sample empty local area value: {}",
        sample_to_json(&agg.samples.empty_local_area_value)
    );
    println!(
        "Sample empty department value: {}",
        sample_to_json(&agg.samples.empty_department_value)
    );
    println!();
    println!("--- Request Count Verification ---");
    println!(
        "Sum of request_count in week and area: {}",
        stats.sum_week_area
    );
    println!(
        "Sum of request_count in week, area and dept: {}",
        stats.sum_week_area_dept
    );
    println!();
    println!("--- Output CSVs ---");
    println!(
        "Week and Area CSV Path: {}, Rows: {}",
        week_area_path.display(),
        week_area_rows
    );
    println!(
        "Week, Area and Dept CSV Path: {}, Rows: {}",
        week_area_dept_path.display(),
        week_area_dept_rows
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn rec(open: &str, area: Option<&str>, dept: Option<&str>) -> Record {
        let mut fields = serde_json::Map::new();
        if !open.is_empty() {
            fields.insert(
                OPEN_TIMESTAMP_KEY.to_string(),
                Value::String(open.to_string()),
            );
        }
        if let Some(a) = area {
            fields.insert(LOCAL_AREA_KEY.to_string(), Value::String(a.to_string()));
        }
        if let Some(d) = dept {
            fields.insert(DEPARTMENT_KEY.to_string(), Value::String(d.to_string()));
        }
        serde_json::from_value(json!({ "recordid": "r", "fields": fields })).unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn week_start_is_monday_on_or_before() {
        // 2026-01-05 is a Monday.
        assert_eq!(
            week_start(ts("2026-01-05T00:00:00Z")).to_string(),
            "2026-01-05"
        );
        assert_eq!(
            week_start(ts("2026-01-07T23:59:59Z")).to_string(),
            "2026-01-05"
        );
        // Sunday belongs to the preceding Monday's week.
        assert_eq!(
            week_start(ts("2026-01-11T12:00:00Z")).to_string(),
            "2026-01-05"
        );
        assert_eq!(
            week_start(ts("2026-01-12T00:00:00Z")).to_string(),
            "2026-01-12"
        );
    }

    #[test]
    fn resolve_field_classifies_three_ways() {
        let r = rec("2026-01-06T10:00:00Z", Some("  Downtown "), Some(""));
        let area = resolve_field(&r, LOCAL_AREA_KEY);
        assert_eq!(area.value, "Downtown");
        assert!(!area.missing_key && !area.empty_value);

        let dept = resolve_field(&r, DEPARTMENT_KEY);
        assert_eq!(dept.value, UNKNOWN);
        assert!(dept.empty_value && !dept.missing_key);

        let missing = resolve_field(&r, "nonexistent");
        assert_eq!(missing.value, UNKNOWN);
        assert!(missing.missing_key && !missing.empty_value);
    }

    #[test]
    fn resolve_field_treats_null_as_empty_value() {
        let r: Record = serde_json::from_value(json!({
            "recordid": "r",
            "fields": { "department": null }
        }))
        .unwrap();
        let dept = resolve_field(&r, DEPARTMENT_KEY);
        assert_eq!(dept.value, UNKNOWN);
        assert!(dept.empty_value && !dept.missing_key);
    }

    #[test]
    fn single_week_downtown_example() {
        // Three requests in the week of Mon 2026-01-05, all Downtown:
        // two Streets, one blank department.
        let records = vec![
            rec("2026-01-05T08:00:00Z", Some("Downtown"), Some("Streets")),
            rec("2026-01-07T12:00:00Z", Some("Downtown"), Some("Streets")),
            rec("2026-01-09T16:00:00Z", Some("Downtown"), Some("")),
        ];
        let agg = aggregate_weekly(&records).unwrap();

        assert_eq!(agg.week_area.len(), 1);
        assert_eq!(
            agg.week_area[0],
            WeekAreaRow {
                week_start_date: "2026-01-05".to_string(),
                local_area: "Downtown".to_string(),
                request_count: 3,
            }
        );

        assert_eq!(agg.week_area_dept.len(), 2);
        assert_eq!(agg.week_area_dept[0].department, "Streets");
        assert_eq!(agg.week_area_dept[0].request_count, 2);
        assert_eq!(agg.week_area_dept[1].department, UNKNOWN);
        assert_eq!(agg.week_area_dept[1].request_count, 1);

        assert_eq!(agg.stats.empty_department_value, 1);
        assert_eq!(agg.stats.unknown_department_count, 1);
        assert_eq!(agg.stats.unknown_any_count, 1);
        assert_eq!(agg.stats.unknown_both_count, 0);
    }

    #[test]
    fn sums_match_bucketed_row_count() {
        let records = vec![
            rec("2026-01-05T08:00:00Z", Some("Downtown"), Some("Streets")),
            rec("2026-01-13T12:00:00Z", Some("Sunset"), None),
            rec("not-a-timestamp", Some("Downtown"), Some("Streets")),
            rec("", Some("Sunset"), Some("Parks")),
            rec("2026-01-14T09:00:00Z", None, Some("")),
        ];
        let agg = aggregate_weekly(&records).unwrap();

        assert_eq!(agg.stats.input_records, 5);
        assert_eq!(agg.stats.invalid_or_missing_ts, 2);
        assert_eq!(agg.stats.produced_rows, 3);
        assert_eq!(agg.stats.sum_week_area, 3);
        assert_eq!(agg.stats.sum_week_area_dept, 3);
    }

    #[test]
    fn missing_key_and_empty_value_are_counted_separately() {
        let records = vec![
            rec("2026-01-05T08:00:00Z", Some("Downtown"), None),
            rec("2026-01-05T09:00:00Z", Some("Downtown"), Some("")),
        ];
        let agg = aggregate_weekly(&records).unwrap();

        assert_eq!(agg.stats.missing_fields_department, 1);
        assert_eq!(agg.stats.empty_department_value, 1);
        assert_eq!(agg.stats.unknown_department_count, 2);
        // Both rows still land in the table, keyed on the sentinel.
        assert_eq!(agg.week_area_dept.len(), 1);
        assert_eq!(agg.week_area_dept[0].department, UNKNOWN);
        assert_eq!(agg.week_area_dept[0].request_count, 2);
    }

    #[test]
    fn excluded_records_contribute_nothing() {
        let records = vec![
            rec("garbage", None, None),
            rec("2026-01-05T08:00:00Z", Some("Downtown"), Some("Streets")),
        ];
        let agg = aggregate_weekly(&records).unwrap();

        // The invalid-ts record never reaches field classification.
        assert_eq!(agg.stats.unknown_local_area_count, 0);
        assert_eq!(agg.stats.missing_fields_local_area, 0);
        assert_eq!(agg.stats.produced_rows, 1);
    }

    #[test]
    fn tables_are_sorted_lexicographically() {
        let records = vec![
            rec("2026-01-13T08:00:00Z", Some("Sunset"), Some("Parks")),
            rec("2026-01-05T08:00:00Z", Some("Sunset"), Some("Streets")),
            rec("2026-01-05T08:00:00Z", Some("Downtown"), Some("Parks")),
            rec("2026-01-13T08:00:00Z", Some("Downtown"), Some("Streets")),
        ];
        let agg = aggregate_weekly(&records).unwrap();

        let keys: Vec<(String, String)> = agg
            .week_area
            .iter()
            .map(|r| (r.week_start_date.clone(), r.local_area.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let dept_keys: Vec<(String, String, String)> = agg
            .week_area_dept
            .iter()
            .map(|r| {
                (
                    r.week_start_date.clone(),
                    r.local_area.clone(),
                    r.department.clone(),
                )
            })
            .collect();
        let mut dept_sorted = dept_keys.clone();
        dept_sorted.sort();
        assert_eq!(dept_keys, dept_sorted);
    }

    #[test]
    fn tracks_min_and_max_week() {
        let records = vec![
            rec("2026-01-21T08:00:00Z", Some("A"), Some("X")),
            rec("2026-01-05T08:00:00Z", Some("A"), Some("X")),
            rec("2026-01-13T08:00:00Z", Some("A"), Some("X")),
        ];
        let agg = aggregate_weekly(&records).unwrap();
        assert_eq!(agg.stats.min_week_start_date.as_deref(), Some("2026-01-05"));
        assert_eq!(agg.stats.max_week_start_date.as_deref(), Some("2026-01-19"));
    }

    #[test]
    fn samples_keep_first_occurrence_only() {
        let mut first = rec("2026-01-05T08:00:00Z", Some("Downtown"), Some(""));
        first.recordid = "first".to_string();
        let mut second = rec("2026-01-05T09:00:00Z", Some("Downtown"), Some(""));
        second.recordid = "second".to_string();

        let agg = aggregate_weekly(&[first, second]).unwrap();
        assert_eq!(
            agg.samples.empty_department_value.as_ref().unwrap().recordid,
            "first"
        );
        assert!(agg.samples.missing_department_key.is_none());
    }

    #[test]
    fn empty_batch_is_fatal() {
        assert!(aggregate_weekly(&[]).is_err());
    }

    #[test]
    fn csv_fields_are_quoted_only_when_needed() {
        assert_eq!(csv_field("Downtown"), "Downtown");
        assert_eq!(csv_field("Streets, Parks"), "\"Streets, Parks\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn written_tables_round_trip_row_counts() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gold").join("week_area.csv");
        let rows = vec![
            WeekAreaRow {
                week_start_date: "2026-01-05".to_string(),
                local_area: "Downtown".to_string(),
                request_count: 3,
            },
            WeekAreaRow {
                week_start_date: "2026-01-05".to_string(),
                local_area: "Sunset, East".to_string(),
                request_count: 1,
            },
        ];
        write_week_area_csv(&path, &rows).unwrap();
        assert_eq!(count_csv_rows(&path).unwrap(), 2);

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("week_start_date,local_area,request_count\n"));
        assert!(body.contains("2026-01-05,Downtown,3\n"));
        assert!(body.contains("2026-01-05,\"Sunset, East\",1\n"));
    }
}
