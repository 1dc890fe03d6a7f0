use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::default_schema_version;

/// Identity of a snapshot: one reading per indicator per period boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub indicator_id: String,
    pub timestamp: DateTime<Utc>,
}

impl SnapshotKey {
    pub fn new(indicator_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            indicator_id: indicator_id.into(),
            timestamp,
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.indicator_id,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// One normalized reading of an indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub indicator_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub source: String,
    pub content_hash: String,
    /// 1 for the first write of a key, bumped by the store on each correction.
    #[serde(default = "first_revision")]
    pub revision: u32,
    pub ingested_at: DateTime<Utc>,
}

fn first_revision() -> u32 {
    1
}

impl Snapshot {
    pub fn new(
        indicator_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
        source: impl Into<String>,
    ) -> Self {
        let indicator_id = indicator_id.into();
        let content_hash = content_hash(&indicator_id, &timestamp, value);
        Self {
            schema_version: default_schema_version(),
            indicator_id,
            timestamp,
            value,
            source: source.into(),
            content_hash,
            revision: 1,
            ingested_at: Utc::now(),
        }
    }

    pub fn with_ingested_at(mut self, ingested_at: DateTime<Utc>) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.indicator_id.clone(), self.timestamp)
    }

    /// True when both snapshots carry the same reading for the same key.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.content_hash == other.content_hash
    }

    /// Recompute the hash and compare it with the stored one.
    pub fn verify_hash(&self) -> bool {
        content_hash(&self.indicator_id, &self.timestamp, self.value) == self.content_hash
    }
}

/// SHA-256 over `(indicator_id, timestamp, value)`.
///
/// Source and ingestion time are not hashed, so a re-fetch of the same reading
/// from a later run hashes identically.
pub fn content_hash(indicator_id: &str, timestamp: &DateTime<Utc>, value: f64) -> String {
    // -0.0 == 0.0 but their bit patterns differ.
    let value = if value == 0.0 { 0.0 } else { value };
    let mut hasher = Sha256::new();
    hasher.update(indicator_id.as_bytes());
    // 0xFF never occurs in UTF-8, so field boundaries stay unambiguous.
    hasher.update([0xFF]);
    hasher.update(timestamp.timestamp_millis().to_le_bytes());
    hasher.update([0xFF]);
    hasher.update(value.to_bits().to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_hash_ignores_source_and_ingest_time() {
        let a = Snapshot::new("cpi", day(1), 3.2, "fred");
        let b = Snapshot::new("cpi", day(1), 3.2, "mirror").with_ingested_at(day(9));
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_hash_distinguishes_corrections() {
        let a = Snapshot::new("cpi", day(1), 3.2, "fred");
        let b = Snapshot::new("cpi", day(1), 3.3, "fred");
        assert!(!a.same_content(&b));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_negative_zero_hashes_like_zero() {
        assert_eq!(
            content_hash("x", &day(1), 0.0),
            content_hash("x", &day(1), -0.0)
        );
    }

    #[test]
    fn test_verify_hash_detects_tampering() {
        let mut snapshot = Snapshot::new("cpi", day(2), 3.2, "fred");
        assert!(snapshot.verify_hash());
        snapshot.value = 9.9;
        assert!(!snapshot.verify_hash());
    }

    #[test]
    fn test_schema_version_defaults_when_absent() {
        let json = serde_json::json!({
            "indicator_id": "cpi",
            "timestamp": "2024-01-01T00:00:00Z",
            "value": 3.2,
            "source": "fred",
            "content_hash": content_hash("cpi", &day(1), 3.2),
            "ingested_at": "2024-01-02T00:00:00Z"
        });
        let snapshot: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snapshot.schema_version, 1);
        assert_eq!(snapshot.revision, 1);
        assert!(snapshot.verify_hash());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(
            SnapshotKey::new("cpi", day(5)).to_string(),
            "cpi@2024-01-05T00:00:00Z"
        );
    }
}
