use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where an indicator's readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Readings listed inline in the configuration.
    #[default]
    Static,
    /// A JSON document on local disk.
    File,
    /// A JSON document fetched over HTTP(S).
    Http,
}

/// Layout of a source JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    Fred,
    PortCongestion,
    Freight,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StaticReading {
    pub timestamp: DateTime<Utc>,
    pub value: serde_json::Value,
}

/// Fetcher descriptor attached to an indicator.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    #[serde(default)]
    pub format: SourceFormat,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub url: Option<String>,

    /// Metric name selected from a multi-metric document; defaults to the indicator id.
    #[serde(default)]
    pub metric: Option<String>,

    #[serde(default)]
    pub readings: Vec<StaticReading>,
}

impl SourceConfig {
    pub fn metric_or<'a>(&'a self, indicator_id: &'a str) -> &'a str {
        self.metric.as_deref().unwrap_or(indicator_id)
    }

    /// Human-readable origin, stamped on snapshots when the indicator has no `source` label.
    pub fn label(&self) -> String {
        match self.kind {
            SourceKind::Static => "static".to_string(),
            SourceKind::File => match &self.path {
                Some(path) => format!("file:{}", path.display()),
                None => "file".to_string(),
            },
            SourceKind::Http => self.url.clone().unwrap_or_else(|| "http".to_string()),
        }
    }

    pub(crate) fn validate(&self, indicator_id: &str) -> anyhow::Result<()> {
        match self.kind {
            SourceKind::File if self.path.is_none() => Err(anyhow::anyhow!(
                "indicator {}: file source requires `path`",
                indicator_id
            )),
            SourceKind::Http => match self.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(()),
                Some(url) => Err(anyhow::anyhow!(
                    "indicator {}: unsupported url scheme in {}",
                    indicator_id,
                    url
                )),
                None => Err(anyhow::anyhow!(
                    "indicator {}: http source requires `url`",
                    indicator_id
                )),
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_label() {
        let source = SourceConfig {
            kind: SourceKind::File,
            path: Some(PathBuf::from("/data/cpi.json")),
            ..Default::default()
        };
        assert_eq!(source.label(), "file:/data/cpi.json");
        assert_eq!(source.metric_or("cpi"), "cpi");
    }

    #[test]
    fn test_http_source_requires_url() {
        let source = SourceConfig {
            kind: SourceKind::Http,
            ..Default::default()
        };
        assert!(source.validate("cpi").is_err());

        let source = SourceConfig {
            kind: SourceKind::Http,
            url: Some("ftp://example.com/cpi.json".to_string()),
            ..Default::default()
        };
        assert!(source.validate("cpi").is_err());
    }
}
