//! Upstream records search API client.
//!
//! Thin wrapper over the dataset search endpoint
//! (`/api/records/1.0/search/`). The client builds the query parameters
//! the fetcher needs (`dataset`, a filter expression `q`, `rows`, `start`,
//! `sort`) and validates the response shape; retries, TLS, and connection
//! pooling are the HTTP client's concern. One page request is in flight
//! at a time.
//!
//! [`SearchApi`] is the seam the fetcher is written against, so tests can
//! substitute an in-memory upstream.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::ApiConfig;
use crate::models::Record;

/// Search endpoint path, appended to the configured base URL.
pub const API_PATH: &str = "/api/records/1.0/search/";

/// Sort order for all fetch queries: newest modifications first.
pub const SORT_PARAM: &str = "-last_modified_timestamp";

/// One page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub records: Vec<Record>,
    /// Total hits for the whole query, as reported by the upstream.
    pub nhits: u64,
}

/// A paginated search over the upstream dataset.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Request one page: filter expression `q`, page size `rows`,
    /// pagination offset `start`.
    async fn search(&self, q: &str, rows: usize, start: usize) -> Result<SearchPage>;
}

/// HTTP implementation of [`SearchApi`].
pub struct HttpSearchApi {
    client: reqwest::Client,
    url: String,
    dataset: String,
}

impl HttpSearchApi {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(api.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let url = format!("{}{}", api.base_url.trim_end_matches('/'), API_PATH);
        Ok(Self {
            client,
            url,
            dataset: api.dataset.clone(),
        })
    }
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn search(&self, q: &str, rows: usize, start: usize) -> Result<SearchPage> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[
                ("dataset", self.dataset.clone()),
                ("q", q.to_string()),
                ("rows", rows.to_string()),
                ("start", start.to_string()),
                ("sort", SORT_PARAM.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("Search request failed for dataset '{}'", self.dataset))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Search request failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let payload: Value = resp
            .json()
            .await
            .context("Response was not valid JSON (unexpected API response)")?;
        parse_page(payload)
    }
}

/// Validate the payload shape and pull out the records plus total count.
///
/// A non-object payload or a missing/non-list `records` key aborts the
/// run — the fetcher never persists state on a malformed response.
pub fn parse_page(payload: Value) -> Result<SearchPage> {
    let Value::Object(mut obj) = payload else {
        bail!("Unexpected payload shape: not a JSON object");
    };
    let items = match obj.remove("records") {
        Some(Value::Array(items)) => items,
        Some(_) => bail!("Unexpected payload shape: 'records' is not a list"),
        None => bail!("Unexpected payload shape: missing 'records' list"),
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let record: Record = serde_json::from_value(item)
            .context("Unexpected payload shape: record entry is not an object")?;
        records.push(record);
    }

    let nhits = obj.get("nhits").and_then(Value::as_u64).unwrap_or(0);
    Ok(SearchPage { records, nhits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_records_and_nhits() {
        let page = parse_page(json!({
            "nhits": 42,
            "records": [
                { "recordid": "a", "fields": {} },
                { "recordid": "b", "fields": {} }
            ]
        }))
        .unwrap();
        assert_eq!(page.nhits, 42);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].recordid, "a");
    }

    #[test]
    fn missing_nhits_defaults_to_zero() {
        let page = parse_page(json!({ "records": [] })).unwrap();
        assert_eq!(page.nhits, 0);
        assert!(page.records.is_empty());
    }

    #[test]
    fn non_object_payload_is_fatal() {
        assert!(parse_page(json!([1, 2, 3])).is_err());
        assert!(parse_page(json!("nope")).is_err());
    }

    #[test]
    fn missing_records_list_is_fatal() {
        assert!(parse_page(json!({ "nhits": 3 })).is_err());
        assert!(parse_page(json!({ "records": "not-a-list" })).is_err());
    }

    #[test]
    fn non_object_record_entry_is_fatal() {
        assert!(parse_page(json!({ "records": ["oops"] })).is_err());
    }
}
