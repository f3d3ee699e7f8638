//! CLI configuration handling

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use featuresync_core::{
    HistoricalQuery, PollConfig, QueryWindow, RetryPolicy, DEFAULT_FEATURE_GROUP,
};
use featuresync_offline::{DuckDbQueryConfig, TrainConfig};
use featuresync_online::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration
///
/// Every section has defaults, so an empty file (or no file at all) is a
/// valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub feature_store: FeatureStoreConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStoreConfig {
    #[serde(default = "default_group_name")]
    pub group_name: String,

    /// Online store URL (sqlite://path, redis://host:port, memory://)
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            group_name: default_group_name(),
            url: default_store_url(),
        }
    }
}

fn default_group_name() -> String {
    DEFAULT_FEATURE_GROUP.to_string()
}

fn default_store_url() -> String {
    "sqlite://.featuresync/online.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_table")]
    pub table: String,

    /// CSV file holding the offline table
    #[serde(default = "default_source_path")]
    pub source_path: PathBuf,

    /// Directory query results are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_window_start")]
    pub window_start: DateTime<Utc>,

    #[serde(default = "default_window_end")]
    pub window_end: DateTime<Utc>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            table: default_table(),
            source_path: default_source_path(),
            output_dir: default_output_dir(),
            window_start: default_window_start(),
            window_end: default_window_end(),
        }
    }
}

fn default_database() -> String {
    "featurestore_offline".to_string()
}

fn default_table() -> String {
    DEFAULT_FEATURE_GROUP.to_string()
}

fn default_source_path() -> PathBuf {
    PathBuf::from(".featuresync/offline/customer_transactions.csv")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".featuresync/query-results")
}

fn default_window_start() -> DateTime<Utc> {
    QueryWindow::default().start
}

fn default_window_end() -> DateTime<Utc> {
    QueryWindow::default().end
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_seconds: default_timeout_seconds(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_timeout_seconds() -> u64 {
    3600 // 1 hour
}

fn default_max_consecutive_errors() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_writes: default_max_concurrent_writes(),
        }
    }
}

fn default_max_concurrent_writes() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Root directory of the artifact store
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    /// Model path relative to the artifact root
    #[serde(default = "default_model_path")]
    pub path: String,

    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_root: default_artifact_root(),
            path: default_model_path(),
            test_fraction: default_test_fraction(),
            seed: default_seed(),
        }
    }
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from(".featuresync/artifacts")
}

fn default_model_path() -> String {
    "saved_models/model.json".to_string()
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

impl CliConfig {
    pub fn poll_config(&self) -> PollConfig {
        let interval = Duration::from_millis(self.polling.interval_ms);
        PollConfig {
            poll_interval: interval,
            max_interval: interval,
            timeout: Duration::from_secs(self.polling.timeout_seconds),
            max_consecutive_errors: self.polling.max_consecutive_errors,
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            ..Default::default()
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            feature_group: self.feature_store.group_name.clone(),
            retry: self.retry_policy(),
            max_concurrent_writes: self.sync.max_concurrent_writes.max(1),
        }
    }

    pub fn query_service_config(&self) -> DuckDbQueryConfig {
        DuckDbQueryConfig {
            source_path: self.query.source_path.clone(),
            database: self.query.database.clone(),
            table: self.query.table.clone(),
        }
    }

    /// Historical query for the configured window
    ///
    /// Fails when the window is out of order.
    pub fn historical_query(&self) -> Result<HistoricalQuery> {
        let window = QueryWindow::new(self.query.window_start, self.query.window_end)
            .context("Invalid query window in configuration")?;

        Ok(HistoricalQuery::new(
            self.query.database.clone(),
            self.query.table.clone(),
            window,
            self.query.output_dir.to_string_lossy(),
        ))
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            test_fraction: self.model.test_fraction,
            seed: self.model.seed,
            ..Default::default()
        }
    }
}

/// Load configuration from file or defaults
pub fn load_config(config_path: Option<&str>) -> Result<CliConfig> {
    if let Some(path) = config_path {
        load_from_file(path)
    } else {
        // Check for default config locations
        let default_locations = [
            ".featuresync/config.yaml",
            ".featuresync/config.yml",
            "featuresync.yaml",
            "featuresync.yml",
        ];

        for location in &default_locations {
            if Path::new(location).exists() {
                return load_from_file(location);
            }
        }

        Ok(CliConfig::default())
    }
}

fn load_from_file(path: &str) -> Result<CliConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML config: {}", path))
    } else if path.ends_with(".json") {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config: {}", path))
    } else {
        // Try YAML first, then JSON
        serde_yaml::from_str(&content)
            .or_else(|_| serde_json::from_str(&content))
            .with_context(|| format!("Failed to parse config file: {}", path))
    }
}
