//! Core data model for the harvest pipeline.
//!
//! A [`Record`] is the loosely-typed envelope returned by the upstream
//! records search API: a natural identifier (`recordid`) plus a `fields`
//! object holding all domain attributes, including the two timestamp
//! fields and the categorical dimensions used downstream. Records are
//! immutable once fetched; uniqueness by identifier is NOT guaranteed
//! across batches — overlapping fetch windows routinely produce several
//! versions of the same identifier.
//!
//! Unknown top-level keys (`record_timestamp`, `datasetid`, geometry) are
//! preserved via a flattened extras map so batches round-trip through the
//! exchange files unmodified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding a record's modification timestamp (the dedup version key).
pub const LAST_MODIFIED_KEY: &str = "last_modified_timestamp";

/// Field holding the service request's open timestamp (the week-bucket key).
pub const OPEN_TIMESTAMP_KEY: &str = "service_request_open_timestamp";

/// Minimum-timestamp sentinel. Unparseable or missing timestamps resolve
/// to this value: it sorts first and never wins a latest-version
/// comparison.
pub const TS_MIN: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// A single service-request record as returned by the upstream API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Natural key. May be absent or empty upstream; such records cannot
    /// participate in deduplication.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recordid: String,

    /// All domain attributes, keyed by upstream field name.
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Passthrough of any other top-level keys the API sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Look up a field as a string, if present and actually a string.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// The record's version timestamp under `ts_key`, leniently parsed.
    pub fn modified_at(&self, ts_key: &str) -> DateTime<Utc> {
        parse_timestamp(self.field_str(ts_key))
    }
}

/// Leniently parse an ISO-8601 timestamp into a timezone-aware UTC value.
///
/// Accepts both a trailing literal-Z suffix and explicit `+00:00` offsets.
/// Missing, blank, or unparseable input maps to [`TS_MIN`] rather than an
/// error — a data-quality signal for the caller to count, never a reason
/// to abort.
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(s) = raw else {
        return TS_MIN;
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return TS_MIN;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(TS_MIN)
}
