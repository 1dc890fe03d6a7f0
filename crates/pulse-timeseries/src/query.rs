use chrono::{DateTime, Utc};
use pulse_types::{RiskScore, Snapshot};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::score_store::SharedScoreStore;
use crate::snapshot_store::SharedSnapshotStore;

/// Upper bound applied to every list query.
pub const MAX_QUERY_LIMIT: usize = 1_000;

/// Score history query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreQuery {
    pub indicator_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: usize,
}

impl ScoreQuery {
    pub fn new(indicator_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            indicator_id: indicator_id.into(),
            start,
            end,
            limit: 100,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Read-only view for dashboards and the HTTP API.
///
/// Storage failures are logged and surface as "nothing available".
#[derive(Clone)]
pub struct QueryService {
    snapshots: SharedSnapshotStore,
    scores: SharedScoreStore,
}

impl QueryService {
    pub fn new(snapshots: SharedSnapshotStore, scores: SharedScoreStore) -> Self {
        Self { snapshots, scores }
    }

    /// Newest first.
    pub async fn get_recent_scores(&self, indicator_id: &str, limit: usize) -> Vec<RiskScore> {
        match self
            .scores
            .recent(indicator_id, limit.min(MAX_QUERY_LIMIT))
            .await
        {
            Ok(scores) => scores,
            Err(e) => {
                warn!(indicator_id = %indicator_id, error = %e, "Recent scores query failed");
                Vec::new()
            }
        }
    }

    pub async fn get_latest_score(&self, indicator_id: &str) -> Option<RiskScore> {
        match self.scores.latest(indicator_id).await {
            Ok(score) => score,
            Err(e) => {
                warn!(indicator_id = %indicator_id, error = %e, "Latest score query failed");
                None
            }
        }
    }

    /// Newest first, `[start, end)`.
    pub async fn get_scores_time_series(&self, query: &ScoreQuery) -> Vec<RiskScore> {
        match self
            .scores
            .range(
                &query.indicator_id,
                query.start,
                query.end,
                query.limit.min(MAX_QUERY_LIMIT),
            )
            .await
        {
            Ok(scores) => scores,
            Err(e) => {
                warn!(indicator_id = %query.indicator_id, error = %e, "Score range query failed");
                Vec::new()
            }
        }
    }

    /// Up to `count` snapshots strictly before `upto`, oldest first.
    pub async fn get_snapshot_window(
        &self,
        indicator_id: &str,
        upto: DateTime<Utc>,
        count: usize,
    ) -> Vec<Snapshot> {
        match self
            .snapshots
            .get_window(indicator_id, upto, count.min(MAX_QUERY_LIMIT))
            .await
        {
            Ok(window) => window,
            Err(e) => {
                warn!(indicator_id = %indicator_id, error = %e, "Snapshot window query failed");
                Vec::new()
            }
        }
    }

    /// Indicators with at least one score.
    pub async fn list_indicators(&self) -> Vec<String> {
        match self.scores.indicators().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Indicator list query failed");
                Vec::new()
            }
        }
    }
}
