//! Watermark state persistence.
//!
//! The watermark is the modification-timestamp boundary below which all
//! upstream changes are assumed already captured. It lives in a small JSON
//! state file (`{"last_watermark": null | "<ISO-8601+00:00>"}`) owned
//! exclusively by the fetcher: read at the start of a run, advanced only
//! after the full window has been drained and the bronze batch written.
//!
//! [`StateStore`] abstracts the persistence seam so tests can substitute
//! [`MemoryStateStore`] for the file-backed [`JsonStateStore`]. A corrupt
//! state file (invalid JSON, non-object, unparseable timestamp) is fatal:
//! silently resetting the watermark could re-pull or re-skip history.

use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::config::Config;

/// Key under which the watermark is stored in the state file.
pub const WATERMARK_KEY: &str = "last_watermark";

/// Read-then-write-on-success access to the persisted watermark.
pub trait StateStore: Send + Sync {
    /// Load the current watermark. `None` means no successful run has
    /// completed yet. A corrupt underlying store is an error, never `None`.
    fn load(&self) -> Result<Option<DateTime<Utc>>>;

    /// Persist a new watermark. Called at most once per run, after the
    /// full window has been drained.
    fn store(&self, watermark: DateTime<Utc>) -> Result<()>;
}

/// File-backed state store. Sibling keys in the state file are preserved
/// across watermark updates.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the state file as a JSON object. A missing file yields an
    /// empty object; anything unreadable or non-object is fatal.
    fn read_object(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("State file is not valid JSON: {}", self.path.display()))?;
        match value {
            Value::Object(obj) => Ok(obj),
            _ => bail!("State file is not a JSON object: {}", self.path.display()),
        }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let obj = self.read_object()?;
        match obj.get(WATERMARK_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                let dt = DateTime::parse_from_rfc3339(s).with_context(|| {
                    format!(
                        "State file holds an unparseable watermark '{}': {}",
                        s,
                        self.path.display()
                    )
                })?;
                Ok(Some(dt.with_timezone(&Utc)))
            }
            Some(other) => bail!(
                "State file watermark must be null or a string, got {}: {}",
                other,
                self.path.display()
            ),
        }
    }

    fn store(&self, watermark: DateTime<Utc>) -> Result<()> {
        let mut obj = self.read_object()?;
        obj.insert(
            WATERMARK_KEY.to_string(),
            Value::String(watermark.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&Value::Object(obj))?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))
    }
}

/// In-memory state store for tests.
#[allow(dead_code)]
pub struct MemoryStateStore {
    watermark: RwLock<Option<DateTime<Utc>>>,
}

#[allow(dead_code)]
impl MemoryStateStore {
    pub fn new(initial: Option<DateTime<Utc>>) -> Self {
        Self {
            watermark: RwLock::new(initial),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.watermark.read().unwrap())
    }

    fn store(&self, watermark: DateTime<Utc>) -> Result<()> {
        *self.watermark.write().unwrap() = Some(watermark);
        Ok(())
    }
}

/// `civh init`: create the data directories and a fresh state file.
/// Idempotent — an existing state file is left untouched.
pub fn run_init(config: &Config) -> Result<()> {
    for dir in [
        &config.storage.bronze_dir,
        &config.storage.silver_dir,
        &config.storage.gold_dir,
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let state_path = &config.storage.state_path;
    if !state_path.exists() {
        if let Some(parent) = state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = serde_json::json!({ WATERMARK_KEY: null });
        std::fs::write(state_path, serde_json::to_string_pretty(&fresh)?)
            .with_context(|| format!("Failed to write state file: {}", state_path.display()))?;
    }

    println!("Workspace initialized.");
    println!("  bronze: {}", config.storage.bronze_dir.display());
    println!("  silver: {}", config.storage.silver_dir.display());
    println!("  gold:   {}", config.storage.gold_dir.display());
    println!("  state:  {}", state_path.display());
    Ok(())
}

/// `civh state`: print the current watermark.
pub fn run_show(config: &Config) -> Result<()> {
    let store = JsonStateStore::new(&config.storage.state_path);
    match store.load()? {
        Some(wm) => println!(
            "last_watermark: {}",
            wm.to_rfc3339_opts(SecondsFormat::Secs, false)
        ),
        None => println!("last_watermark: (none)"),
    }
    Ok(())
}
