use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::GlobalConfig;

/// Loads `GlobalConfig` from a TOML file layered with environment overrides.
pub struct ConfigLoader {
    config_path: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            env_prefix: "PULSE".to_string(),
        }
    }

    /// Override the environment prefix (`PULSE` by default, e.g. `PULSE__API__PORT=9090`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load and validate. A missing file yields defaults (plus env overrides).
    pub fn load(&self) -> Result<GlobalConfig> {
        let path = self
            .config_path
            .to_str()
            .ok_or_else(|| anyhow!("Invalid config path"))?;

        let config = Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read config {}", self.config_path.display()))?;

        let global: GlobalConfig = config
            .try_deserialize()
            .with_context(|| format!("invalid config {}", self.config_path.display()))?;

        Self::validate(&global)?;
        Ok(global)
    }

    /// Cross-field checks the serde layer cannot express.
    pub fn validate(global: &GlobalConfig) -> Result<()> {
        if global.eventbus.capacity == 0 {
            return Err(anyhow!("eventbus.capacity must be greater than 0"));
        }
        if global.ingestion.concurrency == 0 {
            return Err(anyhow!("ingestion.concurrency must be greater than 0"));
        }
        if global.ingestion.max_attempts == 0 {
            return Err(anyhow!("ingestion.max_attempts must be greater than 0"));
        }
        if global.ingestion.cron.split_whitespace().count() != 6 {
            return Err(anyhow!(
                "ingestion.cron must have 6 fields (sec min hour day month weekday), got {:?}",
                global.ingestion.cron
            ));
        }
        if global.analyzer.default_window_size == 0 {
            return Err(anyhow!("analyzer.default_window_size must be greater than 0"));
        }
        if global.analyzer.cache_entries_per_indicator == 0 {
            return Err(anyhow!("analyzer.cache_entries_per_indicator must be greater than 0"));
        }

        let mut ids = HashSet::new();
        for indicator in &global.indicators {
            if indicator.id.trim().is_empty() {
                return Err(anyhow!("indicator id must not be empty"));
            }
            if !ids.insert(indicator.id.as_str()) {
                return Err(anyhow!("duplicate indicator id: {}", indicator.id));
            }
            if indicator.window_size == Some(0) {
                return Err(anyhow!("indicator {}: window_size must be greater than 0", indicator.id));
            }
            if let Some(pct) = indicator.critical_threshold_pct {
                if !pct.is_finite() || pct <= 0.0 {
                    return Err(anyhow!(
                        "indicator {}: critical_threshold_pct must be a positive number",
                        indicator.id
                    ));
                }
            }
            if !indicator.unit_scale.is_finite() || indicator.unit_scale == 0.0 {
                return Err(anyhow!("indicator {}: unit_scale must be finite and non-zero", indicator.id));
            }
            indicator.source.validate(&indicator.id)?;
        }

        for rule in &global.alert_rules {
            if !ids.contains(rule.indicator_id.as_str()) {
                return Err(anyhow!(
                    "alert rule {} references unknown indicator {}",
                    rule.id,
                    rule.indicator_id
                ));
            }
            if !rule.threshold_pct.is_finite() || rule.threshold_pct < 0.0 {
                return Err(anyhow!("alert rule {}: threshold_pct must be >= 0", rule.id));
            }
        }

        if let Some(url) = &global.alerting.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("alerting.webhook_url must be an http(s) URL, got {:?}", url));
            }
        }
        if global.alerting.timeout_ms == 0 {
            return Err(anyhow!("alerting.timeout_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn render(global: &GlobalConfig) -> Result<String> {
        Ok(toml::to_string_pretty(global)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceFormat, SourceKind};
    use pulse_types::{Channel, Period, Severity};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_default_when_missing() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path().join("pulse.toml"))
            .with_env_prefix("PULSE_TEST_MISSING");

        let config = loader.load().unwrap();
        assert_eq!(config.system.name, "Supply-Chain Pulse");
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_content = r#"
[system]
name = "Test Pulse"

[storage]
root_dir = "./test/data"

[ingestion]
cron = "0 30 5 * * *"
concurrency = 2

[analyzer]
default_window_size = 14
cascade_recompute = false

[[indicators]]
id = "freight_cost_index"
name = "Freight Cost Index"
unit = "index"
critical_threshold_pct = 12.5

[indicators.source]
kind = "file"
format = "freight"
path = "./feeds/freight.json"

[[indicators]]
id = "cpi"
name = "Consumer Price Index"
period = "month"

[indicators.source]
kind = "static"

[[indicators.source.readings]]
timestamp = "2024-01-01T00:00:00Z"
value = 3.1

[[alert_rules]]
id = "r1"
user_id = "u1"
indicator_id = "freight_cost_index"
threshold_pct = 15.0
min_severity = "elevated"
channel = "log"
"#;
        let path = temp_dir.path().join("pulse.toml");
        fs::write(&path, config_content).unwrap();

        let config = ConfigLoader::new(&path)
            .with_env_prefix("PULSE_TEST_FILE")
            .load()
            .unwrap();

        assert_eq!(config.system.name, "Test Pulse");
        assert_eq!(config.ingestion.concurrency, 2);
        assert!(!config.analyzer.cascade_recompute);
        assert_eq!(config.indicators.len(), 2);

        let freight = &config.indicators[0];
        assert_eq!(freight.source.kind, SourceKind::File);
        assert_eq!(freight.source.format, SourceFormat::Freight);
        let indicator = freight.to_indicator(&config.analyzer);
        assert_eq!(indicator.window_size, 14);
        assert_eq!(indicator.critical_threshold_pct, 12.5);

        let cpi = &config.indicators[1];
        assert_eq!(cpi.period, Period::Month);
        assert_eq!(cpi.source.readings.len(), 1);

        let rule = &config.alert_rules[0];
        assert_eq!(rule.min_severity, Severity::Elevated);
        assert_eq!(rule.channel, Channel::Log);
        assert!(rule.enabled);
    }

    #[test]
    fn test_env_override() {
        let temp_dir = tempdir().unwrap();
        std::env::set_var("PULSE_TEST_ENV__API__PORT", "9191");

        let config = ConfigLoader::new(temp_dir.path().join("pulse.toml"))
            .with_env_prefix("PULSE_TEST_ENV")
            .load()
            .unwrap();

        std::env::remove_var("PULSE_TEST_ENV__API__PORT");
        assert_eq!(config.api.port, 9191);
    }

    #[test]
    fn test_validate_rejects_duplicate_indicator() {
        let temp_dir = tempdir().unwrap();
        let config_content = r#"
[[indicators]]
id = "cpi"
name = "A"

[[indicators]]
id = "cpi"
name = "B"
"#;
        let path = temp_dir.path().join("pulse.toml");
        fs::write(&path, config_content).unwrap();

        let err = ConfigLoader::new(&path)
            .with_env_prefix("PULSE_TEST_DUP")
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate indicator id"));
    }

    #[test]
    fn test_validate_rejects_rule_for_unknown_indicator() {
        let mut config = GlobalConfig::default();
        config.alert_rules.push(pulse_types::AlertRule::new(
            "u1",
            "missing",
            10.0,
            Severity::Elevated,
            Channel::Log,
        ));
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let mut config = GlobalConfig::default();
        config.ingestion.cron = "0 6 * * *".to_string();
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_webhook() {
        let mut config = GlobalConfig::default();
        config.alerting.webhook_url = Some("ftp://alerts.example".to_string());
        assert!(ConfigLoader::validate(&config).is_err());
        config.alerting.webhook_url = Some("https://alerts.example/hook".to_string());
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_delivery_timeout() {
        let mut config = GlobalConfig::default();
        assert_eq!(config.alerting.timeout_ms, 10_000);
        config.alerting.timeout_ms = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_render_roundtrips_through_toml() {
        let rendered = ConfigLoader::render(&GlobalConfig::default()).unwrap();
        assert!(rendered.contains("[ingestion]"));
        let parsed: GlobalConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.api.port, 8080);
    }
}
