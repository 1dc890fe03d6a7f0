use chrono::{DateTime, Utc};
use pulse_core::metrics::record_score_upserted;
use pulse_core::{retry, PulseError, Result, RetryPolicy, SharedEventBus};
use pulse_registry::SharedRegistry;
use pulse_timeseries::{SharedScoreStore, SharedSnapshotStore, UpsertOutcome};
use pulse_types::{Indicator, PipelineEvent, RiskScore, ScoreUpserted, Snapshot, SnapshotWritten};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::moving_average::{MovingAverageState, WindowCache};
use crate::risk::assess;

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// Re-score later snapshots whose window covers a corrected or late key.
    pub cascade: bool,
    pub cache_entries_per_indicator: usize,
    pub store_retry: RetryPolicy,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            cascade: true,
            cache_entries_per_indicator: 8,
            store_retry: RetryPolicy::new(
                3,
                std::time::Duration::from_millis(200),
                std::time::Duration::from_secs(5),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Scored {
        score: RiskScore,
        upsert: UpsertOutcome,
    },
    /// A score for this exact snapshot hash and revision already exists.
    AlreadyScored,
    /// The notification named a key the store does not hold.
    MissingSnapshot,
    UnknownIndicator,
}

impl AnalysisOutcome {
    pub fn is_change(&self) -> bool {
        matches!(self, AnalysisOutcome::Scored { upsert, .. } if upsert.is_change())
    }
}

/// Scores snapshots against their trailing moving average.
///
/// All state is recovered from the stores on each call; the window cache only
/// saves reads.
pub struct RiskAnalyzer {
    registry: SharedRegistry,
    snapshots: SharedSnapshotStore,
    scores: SharedScoreStore,
    cache: WindowCache,
    notifier: Option<SharedEventBus>,
    settings: AnalyzerSettings,
}

impl RiskAnalyzer {
    pub fn new(
        registry: SharedRegistry,
        snapshots: SharedSnapshotStore,
        scores: SharedScoreStore,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            registry,
            snapshots,
            scores,
            cache: WindowCache::new(settings.cache_entries_per_indicator),
            notifier: None,
            settings,
        }
    }

    /// Publish `ScoreUpserted` on the bus for every inserted or replaced score.
    pub fn with_notifier(mut self, bus: SharedEventBus) -> Self {
        self.notifier = Some(bus);
        self
    }

    pub fn cache(&self) -> &WindowCache {
        &self.cache
    }

    /// React to one write notification, then cascade if it changed history.
    pub async fn handle(&self, event: &SnapshotWritten) -> Result<AnalysisOutcome> {
        let outcome = self
            .analyze(&event.indicator_id, event.timestamp, false)
            .await?;

        if self.settings.cascade && (event.correction || outcome.is_change()) {
            self.cascade(&event.indicator_id, event.timestamp).await?;
        }
        Ok(outcome)
    }

    /// Score the snapshot stored at `(indicator_id, timestamp)`.
    ///
    /// `force` skips the already-scored check; the upsert still refuses to
    /// replace a score computed from a newer revision.
    pub async fn analyze(
        &self,
        indicator_id: &str,
        timestamp: DateTime<Utc>,
        force: bool,
    ) -> Result<AnalysisOutcome> {
        let Some(indicator) = self.registry.get(indicator_id).await else {
            warn!(indicator_id = %indicator_id, "Notification for unregistered indicator");
            return Ok(AnalysisOutcome::UnknownIndicator);
        };

        let Some(snapshot) = self.load_snapshot(indicator_id, timestamp).await? else {
            warn!(indicator_id = %indicator_id, timestamp = %timestamp, "Snapshot not found");
            return Ok(AnalysisOutcome::MissingSnapshot);
        };

        if !snapshot.value.is_finite() {
            return Err(PulseError::malformed(format!(
                "{}: non-numeric value {}",
                snapshot.key(),
                snapshot.value
            )));
        }

        if !force {
            if let Some(existing) = self.load_score(indicator_id, timestamp).await? {
                if existing.snapshot_hash == snapshot.content_hash
                    && existing.snapshot_revision == snapshot.revision
                {
                    debug!(score_id = %existing.id, "Already scored");
                    return Ok(AnalysisOutcome::AlreadyScored);
                }
            }
        }

        let window = self.window(&indicator, timestamp).await?;
        let score = assess(&indicator, &snapshot, window.len(), window.mean());
        let upsert = self.upsert(score.clone()).await?;

        record_score_upserted(indicator_id, upsert_label(&upsert));
        match &upsert {
            UpsertOutcome::Inserted | UpsertOutcome::Replaced { .. } => {
                info!(
                    score_id = %score.id,
                    severity = %score.severity,
                    delta_pct = ?score.delta_pct,
                    baseline_points = score.baseline_points,
                    insufficient_baseline = score.insufficient_baseline,
                    replaced = matches!(upsert, UpsertOutcome::Replaced { .. }),
                    "Risk score written"
                );
                self.notify(&score);
            }
            UpsertOutcome::Unchanged => debug!(score_id = %score.id, "Risk score unchanged"),
            UpsertOutcome::Stale { current_revision } => debug!(
                score_id = %score.id,
                current_revision = current_revision,
                "Score from an older revision dropped"
            ),
        }

        Ok(AnalysisOutcome::Scored { score, upsert })
    }

    /// Re-score already-scored snapshots whose window includes `changed`.
    async fn cascade(&self, indicator_id: &str, changed: DateTime<Utc>) -> Result<usize> {
        let Some(indicator) = self.registry.get(indicator_id).await else {
            return Ok(0);
        };

        let followers = {
            let snapshots = self.snapshots.clone();
            let id = indicator_id.to_string();
            let limit = indicator.window_size;
            retry(&self.settings.store_retry, "snapshot after", || {
                let snapshots = snapshots.clone();
                let id = id.clone();
                async move { snapshots.after(&id, changed, limit).await }
            })
            .await?
        };

        let mut rescored = 0;
        for follower in followers {
            if self.load_score(indicator_id, follower.timestamp).await?.is_none() {
                // Its own notification will score it.
                continue;
            }
            if self
                .analyze(indicator_id, follower.timestamp, true)
                .await?
                .is_change()
            {
                rescored += 1;
            }
        }

        if rescored > 0 {
            info!(
                indicator_id = %indicator_id,
                changed = %changed,
                rescored = rescored,
                "Cascade re-scored later snapshots"
            );
        }
        Ok(rescored)
    }

    /// Score every stored snapshot that lacks a score for its current hash and revision.
    pub async fn reconcile(&self, indicator_id: &str) -> Result<usize> {
        let stored = {
            let snapshots = self.snapshots.clone();
            let id = indicator_id.to_string();
            retry(&self.settings.store_retry, "snapshot scan", || {
                let snapshots = snapshots.clone();
                let id = id.clone();
                async move { snapshots.after(&id, DateTime::<Utc>::MIN_UTC, usize::MAX).await }
            })
            .await?
        };

        let mut repaired = 0;
        for snapshot in stored {
            let current = match self.load_score(indicator_id, snapshot.timestamp).await? {
                Some(score) => {
                    score.snapshot_hash == snapshot.content_hash
                        && score.snapshot_revision == snapshot.revision
                }
                None => false,
            };
            if current {
                continue;
            }
            match self.analyze(indicator_id, snapshot.timestamp, false).await {
                Ok(_) => repaired += 1,
                Err(e) => warn!(
                    indicator_id = %indicator_id,
                    timestamp = %snapshot.timestamp,
                    error = %e,
                    "Reconcile failed for snapshot"
                ),
            }
        }

        if repaired > 0 {
            info!(indicator_id = %indicator_id, repaired = repaired, "Reconciled missing scores");
        }
        Ok(repaired)
    }

    /// Reconcile every indicator that has snapshots. Failures are logged per indicator.
    pub async fn reconcile_all(&self) -> usize {
        let ids = match self.snapshots.indicators().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Cannot list indicators for reconciliation");
                return 0;
            }
        };

        let mut repaired = 0;
        for id in ids {
            match self.reconcile(&id).await {
                Ok(n) => repaired += n,
                Err(e) => warn!(indicator_id = %id, error = %e, "Reconciliation failed"),
            }
        }
        repaired
    }

    /// Window of up to `window_size` values strictly before `upto`.
    async fn window(&self, indicator: &Indicator, upto: DateTime<Utc>) -> Result<MovingAverageState> {
        let id = indicator.id.as_str();
        let generation = {
            let snapshots = self.snapshots.clone();
            let id = id.to_string();
            retry(&self.settings.store_retry, "snapshot generation", || {
                let snapshots = snapshots.clone();
                let id = id.clone();
                async move { snapshots.generation(&id).await }
            })
            .await?
        };

        let state = match self.cache.nearest(id, upto, generation).await {
            Some(cached) if cached.upto == upto && cached.window_size == indicator.window_size => {
                return Ok(cached);
            }
            Some(mut cached) if cached.window_size == indicator.window_size => {
                let gap = self.load_range(id, cached.upto, upto).await?;
                cached.advance(upto, &gap);
                cached
            }
            _ => {
                let snapshots = self.load_window(id, upto, indicator.window_size).await?;
                MovingAverageState::from_snapshots(id, indicator.window_size, upto, generation, &snapshots)
            }
        };

        self.cache.insert(state.clone()).await;
        Ok(state)
    }

    async fn load_snapshot(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.clone();
        let id = indicator_id.to_string();
        retry(&self.settings.store_retry, "snapshot get", || {
            let snapshots = snapshots.clone();
            let id = id.clone();
            async move { snapshots.get(&id, timestamp).await }
        })
        .await
    }

    async fn load_window(&self, indicator_id: &str, upto: DateTime<Utc>, count: usize) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.clone();
        let id = indicator_id.to_string();
        retry(&self.settings.store_retry, "snapshot window", || {
            let snapshots = snapshots.clone();
            let id = id.clone();
            async move { snapshots.get_window(&id, upto, count).await }
        })
        .await
    }

    async fn load_range(
        &self,
        indicator_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.clone();
        let id = indicator_id.to_string();
        retry(&self.settings.store_retry, "snapshot range", || {
            let snapshots = snapshots.clone();
            let id = id.clone();
            async move { snapshots.range(&id, start, end).await }
        })
        .await
    }

    async fn load_score(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<RiskScore>> {
        let scores = self.scores.clone();
        let id = indicator_id.to_string();
        retry(&self.settings.store_retry, "score get", || {
            let scores = scores.clone();
            let id = id.clone();
            async move { scores.get(&id, timestamp).await }
        })
        .await
    }

    async fn upsert(&self, score: RiskScore) -> Result<UpsertOutcome> {
        let scores = self.scores.clone();
        retry(&self.settings.store_retry, "score upsert", || {
            let scores = scores.clone();
            let score = score.clone();
            async move { scores.upsert(score).await }
        })
        .await
    }

    fn notify(&self, score: &RiskScore) {
        let Some(bus) = &self.notifier else {
            return;
        };
        let event = PipelineEvent::ScoreUpserted(ScoreUpserted {
            risk_score_id: score.id.clone(),
            indicator_id: score.indicator_id.clone(),
            timestamp: score.timestamp,
            severity: score.severity,
        });
        if let Err(e) = bus.publish(event) {
            warn!(score_id = %score.id, error = %e, "No subscriber for score notification");
        }
    }
}

fn upsert_label(outcome: &UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Inserted => "inserted",
        UpsertOutcome::Replaced { .. } => "replaced",
        UpsertOutcome::Unchanged => "unchanged",
        UpsertOutcome::Stale { .. } => "stale",
    }
}

/// Shared handle used by the consumer tasks.
pub type SharedAnalyzer = Arc<RiskAnalyzer>;
