use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::Result;
use pulse_types::RiskScore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    /// A different assessment replaced the stored one.
    Replaced { previous: RiskScore },
    /// Stored assessment is identical; nothing written.
    Unchanged,
    /// Stored score was computed from a newer snapshot revision; nothing written.
    Stale { current_revision: u32 },
}

impl UpsertOutcome {
    /// Whether downstream consumers (alerting) should be told.
    pub fn is_change(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Replaced { .. })
    }
}

/// Decide how `incoming` relates to what is stored for the same key.
pub(crate) fn decide(existing: Option<&RiskScore>, incoming: &RiskScore) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Inserted,
        Some(current) if current.snapshot_revision > incoming.snapshot_revision => {
            UpsertOutcome::Stale {
                current_revision: current.snapshot_revision,
            }
        }
        Some(current) if current.same_assessment(incoming) => UpsertOutcome::Unchanged,
        Some(current) => UpsertOutcome::Replaced {
            previous: current.clone(),
        },
    }
}

/// One risk score per `(indicator_id, timestamp)`.
#[async_trait]
pub trait RiskScoreStore: Send + Sync {
    async fn get(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<RiskScore>>;

    /// Atomic compare-and-write guarded by snapshot revision.
    async fn upsert(&self, score: RiskScore) -> Result<UpsertOutcome>;

    /// Newest first.
    async fn recent(&self, indicator_id: &str, limit: usize) -> Result<Vec<RiskScore>>;

    /// Scores in `[start, end)`, newest first, at most `limit`.
    async fn range(
        &self,
        indicator_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RiskScore>>;

    async fn latest(&self, indicator_id: &str) -> Result<Option<RiskScore>> {
        Ok(self.recent(indicator_id, 1).await?.into_iter().next())
    }

    /// Indicators that have at least one score, sorted.
    async fn indicators(&self) -> Result<Vec<String>>;
}

pub type SharedScoreStore = Arc<dyn RiskScoreStore>;

#[derive(Default)]
pub struct MemoryScoreStore {
    scores: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, RiskScore>>>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.scores.read().await.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl RiskScoreStore for MemoryScoreStore {
    async fn get(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<RiskScore>> {
        let scores = self.scores.read().await;
        Ok(scores
            .get(indicator_id)
            .and_then(|series| series.get(&timestamp))
            .cloned())
    }

    async fn upsert(&self, score: RiskScore) -> Result<UpsertOutcome> {
        let mut scores = self.scores.write().await;
        let series = scores.entry(score.indicator_id.clone()).or_default();
        let outcome = decide(series.get(&score.timestamp), &score);
        if outcome.is_change() {
            series.insert(score.timestamp, score.clone());
        }
        debug!(score_id = %score.id, outcome = ?outcome, "Score upsert");
        Ok(outcome)
    }

    async fn recent(&self, indicator_id: &str, limit: usize) -> Result<Vec<RiskScore>> {
        let scores = self.scores.read().await;
        Ok(scores
            .get(indicator_id)
            .map(|series| series.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn range(
        &self,
        indicator_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RiskScore>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let scores = self.scores.read().await;
        Ok(scores
            .get(indicator_id)
            .map(|series| {
                series
                    .range(start..end)
                    .rev()
                    .take(limit)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn indicators(&self) -> Result<Vec<String>> {
        let scores = self.scores.read().await;
        let mut ids: Vec<String> = scores
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pulse_types::{Severity, SCHEMA_VERSION};

    pub(crate) fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    pub(crate) fn score(n: i64, hash: &str, revision: u32, delta: f64) -> RiskScore {
        let ts = day(n);
        RiskScore {
            schema_version: SCHEMA_VERSION,
            id: RiskScore::score_id("cpi", &ts, hash),
            indicator_id: "cpi".to_string(),
            timestamp: ts,
            snapshot_hash: hash.to_string(),
            snapshot_revision: revision,
            baseline_avg: Some(100.0),
            baseline_points: 30,
            observed_value: 100.0 + delta,
            delta_pct: Some(delta),
            severity: if delta >= 15.0 {
                Severity::Critical
            } else {
                Severity::Normal
            },
            risk_score: 0,
            insufficient_baseline: false,
            zero_baseline: false,
            computed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let store = MemoryScoreStore::new();

        assert_eq!(
            store.upsert(score(0, "aaaa", 1, 16.0)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        // Recomputed later, same assessment.
        assert_eq!(
            store.upsert(score(0, "aaaa", 1, 16.0)).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        // Correction.
        let outcome = store.upsert(score(0, "bbbb", 2, 5.0)).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::Replaced { ref previous } if previous.snapshot_hash == "aaaa"));
        // Late result computed from the old revision.
        assert_eq!(
            store.upsert(score(0, "aaaa", 1, 16.0)).await.unwrap(),
            UpsertOutcome::Stale { current_revision: 2 }
        );

        let stored = store.get("cpi", day(0)).await.unwrap().unwrap();
        assert_eq!(stored.snapshot_hash, "bbbb");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_recent_and_range_newest_first() {
        let store = MemoryScoreStore::new();
        for n in 0..5 {
            store.upsert(score(n, "h", 1, n as f64)).await.unwrap();
        }

        let recent = store.recent("cpi", 2).await.unwrap();
        assert_eq!(recent[0].timestamp, day(4));
        assert_eq!(recent[1].timestamp, day(3));

        let range = store.range("cpi", day(1), day(4), 10).await.unwrap();
        let ts: Vec<_> = range.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![day(3), day(2), day(1)]);

        assert_eq!(store.latest("cpi").await.unwrap().unwrap().timestamp, day(4));
        assert!(store.latest("missing").await.unwrap().is_none());
        assert_eq!(store.indicators().await.unwrap(), vec!["cpi"]);
    }
}
