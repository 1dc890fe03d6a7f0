use crate::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading as returned by an upstream source, before normalization.
///
/// `value` is kept as raw JSON so that normalization can reject non-numeric
/// payloads instead of coercing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    pub value: serde_json::Value,
}

impl RawReading {
    pub fn new(timestamp: DateTime<Utc>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch readings for one indicator newer than (or revising) `since`.
    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawReading>, FetchError>;

    /// Name used in logs and run reports.
    fn name(&self) -> &str;
}
