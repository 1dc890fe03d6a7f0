use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_config::{SourceConfig, SourceFormat, SourceKind};
use pulse_core::{FetchError, Fetcher, PulseError, RawReading, Result};
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::parser::{parse_document, ParsedReading};

/// Fixed readings, typically listed inline in the configuration.
pub struct StaticFetcher {
    name: String,
    readings: Vec<RawReading>,
}

impl StaticFetcher {
    pub fn new(name: impl Into<String>, readings: Vec<RawReading>) -> Self {
        Self {
            name: name.into(),
            readings,
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, _since: DateTime<Utc>) -> std::result::Result<Vec<RawReading>, FetchError> {
        Ok(self.readings.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Keep the readings for `metric`.
///
/// A document that decodes but carries nothing for the metric is a permanent
/// error: the source is misconfigured, and retrying will not change that.
fn select(metric: &str, parsed: Vec<ParsedReading>) -> std::result::Result<Vec<RawReading>, FetchError> {
    let total = parsed.len();
    let selected: Vec<RawReading> = parsed
        .into_iter()
        .filter(|r| r.metric == metric)
        .map(|r| RawReading::new(r.timestamp, r.value))
        .collect();

    if total > 0 && selected.is_empty() {
        return Err(FetchError::permanent(format!(
            "document has {} readings but none for metric {}",
            total, metric
        )));
    }
    Ok(selected)
}

fn decode(format: SourceFormat, metric: &str, body: &[u8]) -> std::result::Result<Vec<RawReading>, FetchError> {
    let doc: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| FetchError::permanent(format!("invalid JSON: {}", e)))?;
    let parsed = parse_document(format, &doc).map_err(|e| FetchError::permanent(e.to_string()))?;
    select(metric, parsed)
}

/// Reads a JSON document from local disk on every fetch.
pub struct JsonFileFetcher {
    name: String,
    path: PathBuf,
    format: SourceFormat,
    metric: String,
}

impl JsonFileFetcher {
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat, metric: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
            format,
            metric: metric.into(),
        }
    }
}

#[async_trait]
impl Fetcher for JsonFileFetcher {
    async fn fetch(&self, _since: DateTime<Utc>) -> std::result::Result<Vec<RawReading>, FetchError> {
        let body = tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                FetchError::permanent(format!("{}: {}", self.path.display(), e))
            }
            _ => FetchError::transient(format!("{}: {}", self.path.display(), e)),
        })?;

        let readings = decode(self.format, &self.metric, &body)?;
        debug!(path = %self.path.display(), count = readings.len(), "Read source document");
        Ok(readings)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// GETs a JSON document; the `since` bound is left to the upstream URL.
pub struct HttpJsonFetcher {
    client: Client,
    url: String,
    format: SourceFormat,
    metric: String,
}

impl HttpJsonFetcher {
    pub fn new(client: Client, url: impl Into<String>, format: SourceFormat, metric: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            format,
            metric: metric.into(),
        }
    }
}

fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchError::transient(format!("upstream returned {}", status)))
    } else {
        Some(FetchError::permanent(format!("upstream returned {}", status)))
    }
}

#[async_trait]
impl Fetcher for HttpJsonFetcher {
    async fn fetch(&self, _since: DateTime<Utc>) -> std::result::Result<Vec<RawReading>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::transient(format!("request to {} failed: {}", self.url, e)))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(format!("reading body from {}: {}", self.url, e)))?;

        let readings = decode(self.format, &self.metric, &body)?;
        debug!(url = %self.url, count = readings.len(), "Fetched source document");
        Ok(readings)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

/// Build the fetcher described by an indicator's source configuration.
pub fn fetcher_for_source(
    indicator_id: &str,
    source: &SourceConfig,
    client: &Client,
) -> Result<Arc<dyn Fetcher>> {
    let metric = source.metric_or(indicator_id).to_string();
    let fetcher: Arc<dyn Fetcher> = match source.kind {
        SourceKind::Static => Arc::new(StaticFetcher::new(
            format!("static:{}", indicator_id),
            source
                .readings
                .iter()
                .map(|r| RawReading::new(r.timestamp, r.value.clone()))
                .collect(),
        )),
        SourceKind::File => {
            let path = source.path.clone().ok_or_else(|| {
                PulseError::Config(format!("indicator {}: file source requires `path`", indicator_id))
            })?;
            Arc::new(JsonFileFetcher::new(path, source.format, metric))
        }
        SourceKind::Http => {
            let url = source.url.clone().ok_or_else(|| {
                PulseError::Config(format!("indicator {}: http source requires `url`", indicator_id))
            })?;
            Arc::new(HttpJsonFetcher::new(client.clone(), url, source.format, metric))
        }
    };
    Ok(fetcher)
}
