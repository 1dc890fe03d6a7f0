use chrono::{DateTime, Utc};
use pulse_core::metrics::{
    record_fetch_failure, record_snapshot_rejected, record_snapshot_written,
};
use pulse_core::{retry_counted, Fetcher, PulseError, RetryPolicy};
use pulse_registry::SharedRegistry;
use pulse_timeseries::{PutOutcome, SharedSnapshotStore};
use pulse_types::Indicator;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub inserted: usize,
    pub corrected: usize,
    pub duplicate: usize,
    pub rejected: usize,
}

impl IngestCounts {
    fn add(&mut self, other: &IngestCounts) {
        self.inserted += other.inserted;
        self.corrected += other.corrected;
        self.duplicate += other.duplicate;
        self.rejected += other.rejected;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient fetch errors or timeouts outlasted the retry budget.
    TransientExhausted,
    /// The source rejected the request or returned garbage.
    Permanent,
    /// Snapshots could not be committed.
    Store,
    /// No fetcher is bound to the indicator.
    NoFetcher,
    /// The indicator task panicked.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientExhausted => "transient_exhausted",
            FailureKind::Permanent => "permanent",
            FailureKind::Store => "store",
            FailureKind::NoFetcher => "no_fetcher",
            FailureKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndicatorOutcome {
    Completed(IngestCounts),
    Failed {
        kind: FailureKind,
        attempts: u32,
        message: String,
    },
    /// Stopped by cancellation; whatever was counted is committed.
    Cancelled { counts: IngestCounts },
}

/// Per-indicator result of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<String, IndicatorOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, IndicatorOutcome::Failed { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn cancelled(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, IndicatorOutcome::Cancelled { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Counts summed over completed and cancelled indicators.
    pub fn totals(&self) -> IngestCounts {
        let mut totals = IngestCounts::default();
        for outcome in self.outcomes.values() {
            match outcome {
                IndicatorOutcome::Completed(counts) | IndicatorOutcome::Cancelled { counts } => {
                    totals.add(counts)
                }
                IndicatorOutcome::Failed { .. } => {}
            }
        }
        totals
    }
}

/// Fetches, normalizes and stores readings for every registered indicator.
pub struct IngestionWorker {
    registry: SharedRegistry,
    store: SharedSnapshotStore,
    fetchers: RwLock<HashMap<String, Arc<dyn Fetcher>>>,
    fetch_retry: RetryPolicy,
    store_retry: RetryPolicy,
    concurrency: usize,
}

impl IngestionWorker {
    pub fn new(registry: SharedRegistry, store: SharedSnapshotStore) -> Self {
        Self {
            registry,
            store,
            fetchers: RwLock::new(HashMap::new()),
            fetch_retry: RetryPolicy::default(),
            store_retry: RetryPolicy::default(),
            concurrency: 4,
        }
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Attach the fetcher used for `indicator_id`, replacing any previous one.
    pub async fn bind(&self, indicator_id: impl Into<String>, fetcher: Arc<dyn Fetcher>) {
        let indicator_id = indicator_id.into();
        debug!(indicator_id = %indicator_id, fetcher = %fetcher.name(), "Fetcher bound");
        self.fetchers.write().await.insert(indicator_id, fetcher);
    }

    pub async fn unbind(&self, indicator_id: &str) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.write().await.remove(indicator_id)
    }

    /// Run one ingestion pass over every registered indicator.
    ///
    /// Indicator failures are isolated and reported; the run itself never fails.
    /// Setting `cancel` to `true` stops indicators at the next reading boundary.
    pub async fn run_once(&self, cancel: watch::Receiver<bool>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let indicators = self.registry.list().await;

        info!(
            run_id = %run_id,
            indicators = indicators.len(),
            concurrency = self.concurrency,
            "Ingestion run started"
        );

        let fetchers = self.fetchers.read().await.clone();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut outcomes = BTreeMap::new();

        for indicator in &indicators {
            let Some(fetcher) = fetchers.get(&indicator.id).cloned() else {
                warn!(indicator_id = %indicator.id, "No fetcher bound, skipping");
                record_fetch_failure(&indicator.id, FailureKind::NoFetcher.as_str());
                outcomes.insert(
                    indicator.id.clone(),
                    IndicatorOutcome::Failed {
                        kind: FailureKind::NoFetcher,
                        attempts: 0,
                        message: "no fetcher bound".to_string(),
                    },
                );
                continue;
            };

            let job = IndicatorJob {
                indicator: indicator.clone(),
                fetcher,
                store: self.store.clone(),
                fetch_retry: self.fetch_retry.clone(),
                store_retry: self.store_retry.clone(),
                cancel: cancel.clone(),
            };
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let id = job.indicator.id.clone();
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => job.run().await,
                    Err(_) => IndicatorOutcome::Cancelled {
                        counts: IngestCounts::default(),
                    },
                };
                (id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    outcomes.insert(id, outcome);
                }
                Err(e) => error!(run_id = %run_id, error = %e, "Indicator task join error"),
            }
        }

        for indicator in &indicators {
            outcomes
                .entry(indicator.id.clone())
                .or_insert_with(|| IndicatorOutcome::Failed {
                    kind: FailureKind::Internal,
                    attempts: 0,
                    message: "indicator task aborted".to_string(),
                });
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        let totals = report.totals();
        info!(
            run_id = %run_id,
            inserted = totals.inserted,
            corrected = totals.corrected,
            duplicate = totals.duplicate,
            rejected = totals.rejected,
            failed = report.failed().len(),
            cancelled = report.cancelled().len(),
            "Ingestion run finished"
        );
        report
    }
}

struct IndicatorJob {
    indicator: Indicator,
    fetcher: Arc<dyn Fetcher>,
    store: SharedSnapshotStore,
    fetch_retry: RetryPolicy,
    store_retry: RetryPolicy,
    cancel: watch::Receiver<bool>,
}

impl IndicatorJob {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Newest stored timestamp, or a backfill of one window for a new indicator.
    async fn since(&self) -> DateTime<Utc> {
        let id = &self.indicator.id;
        match self.store.latest(id).await {
            Ok(Some(latest)) => latest.timestamp,
            Ok(None) => self.backfill_start(),
            Err(e) => {
                warn!(indicator_id = %id, error = %e, "Latest snapshot lookup failed, backfilling");
                self.backfill_start()
            }
        }
    }

    fn backfill_start(&self) -> DateTime<Utc> {
        let period = self.indicator.period;
        period.step_back(period.align(Utc::now()), self.indicator.window_size as u32)
    }

    fn failed(&self, kind: FailureKind, attempts: u32, err: &PulseError) -> IndicatorOutcome {
        let id = &self.indicator.id;
        match kind {
            FailureKind::Permanent => error!(
                indicator_id = %id,
                fetcher = %self.fetcher.name(),
                attempts = attempts,
                error = %err,
                alert_operators = true,
                "Permanent fetch failure"
            ),
            _ => error!(
                indicator_id = %id,
                kind = kind.as_str(),
                attempts = attempts,
                error = %err,
                "Indicator skipped for this run"
            ),
        }
        record_fetch_failure(id, kind.as_str());
        IndicatorOutcome::Failed {
            kind,
            attempts,
            message: err.to_string(),
        }
    }

    async fn run(self) -> IndicatorOutcome {
        let mut counts = IngestCounts::default();
        if self.cancelled() {
            return IndicatorOutcome::Cancelled { counts };
        }

        let id = self.indicator.id.clone();
        let since = self.since().await;
        debug!(indicator_id = %id, since = %since, "Fetching");

        let fetcher = self.fetcher.clone();
        let (fetched, attempts) = retry_counted(&self.fetch_retry, "fetch", || {
            let fetcher = fetcher.clone();
            let id = id.clone();
            async move {
                fetcher
                    .fetch(since)
                    .await
                    .map_err(|e| PulseError::from_fetch(id, e))
            }
        })
        .await;

        let readings = match fetched {
            Ok(readings) => readings,
            Err(e) => {
                let kind = match &e {
                    PulseError::PermanentFetch { .. } => FailureKind::Permanent,
                    _ => FailureKind::TransientExhausted,
                };
                return self.failed(kind, attempts, &e);
            }
        };

        for reading in &readings {
            if self.cancelled() {
                info!(indicator_id = %id, "Ingestion cancelled mid-indicator");
                return IndicatorOutcome::Cancelled { counts };
            }

            let snapshot = match normalize(&self.indicator, reading) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(
                        indicator_id = %id,
                        timestamp = %reading.timestamp,
                        error = %e,
                        "Rejected malformed reading"
                    );
                    record_snapshot_rejected(&id);
                    counts.rejected += 1;
                    continue;
                }
            };

            let store = self.store.clone();
            let (put, put_attempts) = retry_counted(&self.store_retry, "snapshot put", || {
                let store = store.clone();
                let snapshot = snapshot.clone();
                async move { store.put(snapshot).await }
            })
            .await;

            match put {
                Ok(PutOutcome::Inserted(_)) => {
                    counts.inserted += 1;
                    record_snapshot_written(&id, "inserted");
                }
                Ok(PutOutcome::Corrected { previous, current }) => {
                    info!(
                        indicator_id = %id,
                        timestamp = %current.timestamp,
                        previous_value = previous.value,
                        value = current.value,
                        revision = current.revision,
                        "Snapshot corrected"
                    );
                    counts.corrected += 1;
                    record_snapshot_written(&id, "corrected");
                }
                Ok(PutOutcome::Duplicate(_)) => {
                    counts.duplicate += 1;
                    record_snapshot_written(&id, "duplicate");
                }
                Err(PulseError::MalformedData(message)) => {
                    warn!(indicator_id = %id, error = %message, "Store rejected snapshot");
                    record_snapshot_rejected(&id);
                    counts.rejected += 1;
                }
                Err(e) => return self.failed(FailureKind::Store, put_attempts, &e),
            }
        }

        debug!(
            indicator_id = %id,
            inserted = counts.inserted,
            corrected = counts.corrected,
            duplicate = counts.duplicate,
            rejected = counts.rejected,
            "Indicator ingested"
        );
        IndicatorOutcome::Completed(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals_skip_failures() {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "a".to_string(),
            IndicatorOutcome::Completed(IngestCounts {
                inserted: 3,
                duplicate: 1,
                ..Default::default()
            }),
        );
        outcomes.insert(
            "b".to_string(),
            IndicatorOutcome::Cancelled {
                counts: IngestCounts {
                    inserted: 1,
                    rejected: 2,
                    ..Default::default()
                },
            },
        );
        outcomes.insert(
            "c".to_string(),
            IndicatorOutcome::Failed {
                kind: FailureKind::Permanent,
                attempts: 1,
                message: "404".to_string(),
            },
        );
        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes,
        };

        let totals = report.totals();
        assert_eq!(totals.inserted, 4);
        assert_eq!(totals.duplicate, 1);
        assert_eq!(totals.rejected, 2);
        assert_eq!(report.failed(), vec!["c"]);
        assert_eq!(report.cancelled(), vec!["b"]);
    }
}
