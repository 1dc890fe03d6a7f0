use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::default_schema_version;
use crate::snapshot::SnapshotKey;

/// Risk severity, ordered `Normal < Elevated < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Elevated,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Normal => "normal",
            Severity::Elevated => "elevated",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Severity::Normal),
            "elevated" => Ok(Severity::Elevated),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Deviation of one snapshot from its trailing baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: String,
    pub indicator_id: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot_hash: String,
    pub snapshot_revision: u32,
    pub baseline_avg: Option<f64>,
    pub baseline_points: usize,
    pub observed_value: f64,
    pub delta_pct: Option<f64>,
    pub severity: Severity,
    /// 0-100 intensity derived from |delta_pct|.
    pub risk_score: u8,
    #[serde(default)]
    pub insufficient_baseline: bool,
    #[serde(default)]
    pub zero_baseline: bool,
    pub computed_at: DateTime<Utc>,
}

impl RiskScore {
    /// Deterministic id; a correction (new hash) yields a new id.
    pub fn score_id(indicator_id: &str, timestamp: &DateTime<Utc>, snapshot_hash: &str) -> String {
        let short = &snapshot_hash[..snapshot_hash.len().min(16)];
        format!(
            "{}@{}#{}",
            indicator_id,
            timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            short
        )
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.indicator_id.clone(), self.timestamp)
    }

    pub fn abs_delta_pct(&self) -> Option<f64> {
        self.delta_pct.map(f64::abs)
    }

    /// Equal in everything except when it was computed.
    pub fn same_assessment(&self, other: &RiskScore) -> bool {
        self.id == other.id
            && self.snapshot_hash == other.snapshot_hash
            && self.snapshot_revision == other.snapshot_revision
            && self.baseline_avg == other.baseline_avg
            && self.baseline_points == other.baseline_points
            && self.observed_value == other.observed_value
            && self.delta_pct == other.delta_pct
            && self.severity == other.severity
            && self.insufficient_baseline == other.insufficient_baseline
            && self.zero_baseline == other.zero_baseline
    }
}
