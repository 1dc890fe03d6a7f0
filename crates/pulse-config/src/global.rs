use pulse_core::RetryPolicy;
use pulse_types::indicator::{
    Period, DEFAULT_CRITICAL_THRESHOLD_PCT, DEFAULT_MIN_BASELINE, DEFAULT_WINDOW_SIZE,
};
use pulse_types::{AlertRule, Indicator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::source::SourceConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub storage: StorageGlobalConfig,
    #[serde(default)]
    pub eventbus: EventBusConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "default_system_name")]
    pub name: String,
    #[serde(default = "default_system_version")]
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: default_system_name(),
            version: default_system_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageGlobalConfig {
    /// Snapshot partitions live under `<root_dir>/snapshots`.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Keep snapshots in memory only.
    #[serde(default)]
    pub in_memory: bool,

    /// sea-orm URL for the score table; unset uses the in-memory score store.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageGlobalConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            in_memory: false,
            database_url: None,
        }
    }
}

impl StorageGlobalConfig {
    pub fn snapshot_root(&self) -> Option<&Path> {
        if self.in_memory {
            None
        } else {
            Some(self.root_dir.as_path())
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventBusConfig {
    #[serde(default = "default_eventbus_capacity")]
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_eventbus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Six-field cron expression (seconds first), UTC.
    #[serde(default = "default_ingestion_cron")]
    pub cron: String,

    /// Indicators fetched in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Run one ingestion pass immediately at start-up.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            cron: default_ingestion_cron(),
            concurrency: default_concurrency(),
            max_attempts: default_fetch_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            run_on_start: true,
        }
    }
}

impl IngestionConfig {
    pub fn fetch_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            attempt_timeout_ms: self.fetch_timeout_ms,
        }
    }

    pub fn store_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            attempt_timeout_ms: self.store_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_window_size")]
    pub default_window_size: usize,

    #[serde(default = "default_min_baseline")]
    pub default_min_baseline: usize,

    #[serde(default = "default_critical_threshold")]
    pub default_critical_threshold_pct: f64,

    /// Re-score later snapshots after a correction or back-dated arrival.
    #[serde(default = "default_true")]
    pub cascade_recompute: bool,

    #[serde(default = "default_cache_entries")]
    pub cache_entries_per_indicator: usize,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default = "default_store_attempts")]
    pub store_max_attempts: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            default_window_size: default_window_size(),
            default_min_baseline: default_min_baseline(),
            default_critical_threshold_pct: default_critical_threshold(),
            cascade_recompute: true,
            cache_entries_per_indicator: default_cache_entries(),
            store_timeout_ms: default_store_timeout_ms(),
            store_max_attempts: default_store_attempts(),
        }
    }
}

impl AnalyzerConfig {
    pub fn store_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.store_max_attempts,
            Duration::from_millis(default_initial_backoff_ms()),
            Duration::from_millis(self.store_timeout_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prometheus scrape listener, e.g. `0.0.0.0:9000`.
    #[serde(default)]
    pub listen: Option<String>,
}

/// Delivery endpoints for alert channels. Email and SMS transports live outside
/// the pipeline; events on unconfigured channels are recorded as failed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertingConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_headers: BTreeMap<String, String>,
    /// Upper bound on one webhook request, connect included.
    #[serde(default = "default_delivery_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_headers: BTreeMap::new(),
            timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

/// One registry entry. Unset analysis parameters fall back to `[analyzer]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub period: Period,
    #[serde(default)]
    pub window_size: Option<usize>,
    #[serde(default)]
    pub critical_threshold_pct: Option<f64>,
    #[serde(default)]
    pub min_baseline: Option<usize>,
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f64,
    #[serde(default)]
    pub source: SourceConfig,
}

impl IndicatorConfig {
    pub fn to_indicator(&self, defaults: &AnalyzerConfig) -> Indicator {
        let mut indicator = Indicator::new(&self.id, &self.name, &self.unit)
            .with_period(self.period)
            .with_window_size(self.window_size.unwrap_or(defaults.default_window_size))
            .with_critical_threshold(
                self.critical_threshold_pct
                    .unwrap_or(defaults.default_critical_threshold_pct),
            )
            .with_min_baseline(self.min_baseline.unwrap_or(defaults.default_min_baseline))
            .with_unit_scale(self.unit_scale)
            .with_source(self.source.label());
        indicator.description = self.description.clone();
        indicator
    }
}

fn default_system_name() -> String {
    "Supply-Chain Pulse".to_string()
}

fn default_system_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_eventbus_capacity() -> usize {
    1024
}

fn default_ingestion_cron() -> String {
    "0 0 6 * * *".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_fetch_attempts() -> u32 {
    4
}

fn default_store_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_delivery_timeout_ms() -> u64 {
    10_000
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_min_baseline() -> usize {
    DEFAULT_MIN_BASELINE
}

fn default_critical_threshold() -> f64 {
    DEFAULT_CRITICAL_THRESHOLD_PCT
}

fn default_cache_entries() -> usize {
    8
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_unit_scale() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}
