use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the open-data portal, without the API path.
    pub base_url: String,
    /// Dataset identifier, e.g. `3-1-1-service-requests`.
    pub dataset: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_page_size() -> usize {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Window size used when no watermark exists yet (first run).
    #[serde(default = "default_fallback_window_hours")]
    pub fallback_window_hours: i64,
    /// Safety buffer re-scanned each run to catch late-visible updates.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Sub-window size for chunked traversal of the fetch window.
    #[serde(default = "default_chunk_hours")]
    pub chunk_hours: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fallback_window_hours: default_fallback_window_hours(),
            lookback_hours: default_lookback_hours(),
            chunk_hours: default_chunk_hours(),
        }
    }
}

fn default_fallback_window_hours() -> i64 {
    48
}
fn default_lookback_hours() -> i64 {
    24
}
fn default_chunk_hours() -> i64 {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_bronze_dir")]
    pub bronze_dir: PathBuf,
    #[serde(default = "default_silver_dir")]
    pub silver_dir: PathBuf,
    #[serde(default = "default_gold_dir")]
    pub gold_dir: PathBuf,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bronze_dir: default_bronze_dir(),
            silver_dir: default_silver_dir(),
            gold_dir: default_gold_dir(),
            state_path: default_state_path(),
        }
    }
}

fn default_bronze_dir() -> PathBuf {
    PathBuf::from("data/bronze")
}
fn default_silver_dir() -> PathBuf {
    PathBuf::from("data/silver")
}
fn default_gold_dir() -> PathBuf {
    PathBuf::from("data/gold")
}
fn default_state_path() -> PathBuf {
    PathBuf::from("config/state.json")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.api.base_url.trim().is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }
    if config.api.dataset.trim().is_empty() {
        anyhow::bail!("api.dataset must not be empty");
    }
    if config.api.page_size == 0 {
        anyhow::bail!("api.page_size must be > 0");
    }
    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    if config.fetch.fallback_window_hours < 1 {
        anyhow::bail!("fetch.fallback_window_hours must be >= 1");
    }
    if config.fetch.lookback_hours < 0 {
        anyhow::bail!("fetch.lookback_hours must be >= 0");
    }
    if config.fetch.chunk_hours < 1 {
        anyhow::bail!("fetch.chunk_hours must be >= 1");
    }

    Ok(config)
}
