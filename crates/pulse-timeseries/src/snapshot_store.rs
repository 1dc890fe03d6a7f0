use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::{PulseError, Result, SharedEventBus};
use pulse_types::message::{PipelineEvent, SnapshotWritten};
use pulse_types::{content_hash, Snapshot};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::partition;

/// Result of a committed (or skipped) write.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// First write of this key.
    Inserted(Snapshot),
    /// Different content for an existing key; `current.revision` was bumped.
    Corrected { previous: Snapshot, current: Snapshot },
    /// Same content hash already stored; nothing written, nothing published.
    Duplicate(Snapshot),
}

impl PutOutcome {
    /// The snapshot now stored for the key.
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            PutOutcome::Inserted(s) | PutOutcome::Duplicate(s) => s,
            PutOutcome::Corrected { current, .. } => current,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PutOutcome::Duplicate(_))
    }

    pub fn is_correction(&self) -> bool {
        matches!(self, PutOutcome::Corrected { .. })
    }
}

/// Append-only snapshot storage keyed by `(indicator_id, timestamp)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Idempotent write. Durable once it returns `Inserted` or `Corrected`.
    async fn put(&self, snapshot: Snapshot) -> Result<PutOutcome>;

    async fn get(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<Snapshot>>;

    /// Up to `count` most recent snapshots strictly before `upto`, oldest first.
    /// Missing periods are simply absent.
    async fn get_window(
        &self,
        indicator_id: &str,
        upto: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Snapshot>>;

    async fn latest(&self, indicator_id: &str) -> Result<Option<Snapshot>>;

    /// Snapshots in `[start, end)`, oldest first.
    async fn range(
        &self,
        indicator_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>>;

    /// Up to `limit` snapshots strictly after `after`, oldest first.
    async fn after(
        &self,
        indicator_id: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Snapshot>>;

    /// Bumped on every committed write of the indicator.
    async fn generation(&self, indicator_id: &str) -> Result<u64>;

    async fn indicators(&self) -> Result<Vec<String>>;
}

pub type SharedSnapshotStore = Arc<dyn SnapshotStore>;

#[derive(Default)]
struct Series {
    snapshots: BTreeMap<DateTime<Utc>, Snapshot>,
    generation: u64,
}

/// Date-partitioned JSONL store with an in-memory index.
///
/// Writes to one partition are serialized by that partition's mutex, which
/// also serializes writes to any single key. Without a root directory the
/// store is memory-only.
pub struct PartitionedSnapshotStore {
    root: Option<PathBuf>,
    index: RwLock<HashMap<String, Series>>,
    partition_locks: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
    notifier: Option<SharedEventBus>,
}

impl PartitionedSnapshotStore {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            index: RwLock::new(HashMap::new()),
            partition_locks: Mutex::new(HashMap::new()),
            notifier: None,
        }
    }

    /// Open (or create) a durable store under `root`, replaying existing partitions.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(partition::SNAPSHOT_DIR)).await?;

        let mut index: HashMap<String, Series> = HashMap::new();
        let mut loaded = 0usize;
        let mut skipped = 0usize;

        for (date, path) in partition::list_partitions(&root).await? {
            let replayed = partition::read_partition(date, &path).await?;
            skipped += replayed.skipped;
            for snapshot in replayed.records {
                loaded += 1;
                let series = index.entry(snapshot.indicator_id.clone()).or_default();
                series.generation += 1;
                match series.snapshots.get(&snapshot.timestamp) {
                    Some(existing) if existing.revision >= snapshot.revision => {}
                    _ => {
                        series.snapshots.insert(snapshot.timestamp, snapshot);
                    }
                }
            }
        }

        info!(
            root = %root.display(),
            indicators = index.len(),
            records = loaded,
            skipped = skipped,
            "Snapshot store opened"
        );

        Ok(Self {
            root: Some(root),
            index: RwLock::new(index),
            partition_locks: Mutex::new(HashMap::new()),
            notifier: None,
        })
    }

    /// Publish `SnapshotWritten` on the bus after every committed write.
    pub fn with_notifier(mut self, bus: SharedEventBus) -> Self {
        self.notifier = Some(bus);
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    async fn partition_lock(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut locks = self.partition_locks.lock().await;
        locks.entry(date).or_default().clone()
    }

    fn notify(&self, outcome: &PutOutcome) {
        let Some(bus) = &self.notifier else {
            return;
        };
        let snapshot = outcome.snapshot();
        let event = PipelineEvent::SnapshotWritten(SnapshotWritten {
            indicator_id: snapshot.indicator_id.clone(),
            timestamp: snapshot.timestamp,
            content_hash: snapshot.content_hash.clone(),
            revision: snapshot.revision,
            correction: outcome.is_correction(),
        });
        if let Err(e) = bus.publish(event) {
            warn!(
                indicator_id = %snapshot.indicator_id,
                timestamp = %snapshot.timestamp,
                error = %e,
                "No subscriber for snapshot notification"
            );
        }
    }
}

#[async_trait]
impl SnapshotStore for PartitionedSnapshotStore {
    async fn put(&self, mut snapshot: Snapshot) -> Result<PutOutcome> {
        if !snapshot.value.is_finite() {
            return Err(PulseError::malformed(format!(
                "non-finite value for {}",
                snapshot.key()
            )));
        }
        snapshot.content_hash =
            content_hash(&snapshot.indicator_id, &snapshot.timestamp, snapshot.value);

        let lock = self
            .partition_lock(partition::partition_date(&snapshot.timestamp))
            .await;
        let _guard = lock.lock().await;

        let previous = {
            let index = self.index.read().await;
            index
                .get(&snapshot.indicator_id)
                .and_then(|series| series.snapshots.get(&snapshot.timestamp))
                .cloned()
        };

        if let Some(existing) = &previous {
            if existing.same_content(&snapshot) {
                debug!(key = %snapshot.key(), "Duplicate snapshot skipped");
                return Ok(PutOutcome::Duplicate(existing.clone()));
            }
        }
        snapshot.revision = previous.as_ref().map(|p| p.revision + 1).unwrap_or(1);

        if let Some(root) = &self.root {
            partition::append_record(root, &snapshot)
                .await
                .map_err(|e| PulseError::store_unavailable(format!("{}: {}", snapshot.key(), e)))?;
        }

        {
            let mut index = self.index.write().await;
            let series = index.entry(snapshot.indicator_id.clone()).or_default();
            series.snapshots.insert(snapshot.timestamp, snapshot.clone());
            series.generation += 1;
        }

        let outcome = match previous {
            None => PutOutcome::Inserted(snapshot),
            Some(previous) => {
                info!(
                    key = %snapshot.key(),
                    old_value = previous.value,
                    new_value = snapshot.value,
                    revision = snapshot.revision,
                    "Snapshot corrected"
                );
                PutOutcome::Corrected {
                    previous,
                    current: snapshot,
                }
            }
        };

        // Still under the partition lock, so notifications for one key keep write order.
        self.notify(&outcome);
        Ok(outcome)
    }

    async fn get(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let index = self.index.read().await;
        Ok(index
            .get(indicator_id)
            .and_then(|series| series.snapshots.get(&timestamp))
            .cloned())
    }

    async fn get_window(
        &self,
        indicator_id: &str,
        upto: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Snapshot>> {
        let index = self.index.read().await;
        let Some(series) = index.get(indicator_id) else {
            return Ok(Vec::new());
        };
        let mut window: Vec<Snapshot> = series
            .snapshots
            .range(..upto)
            .rev()
            .take(count)
            .map(|(_, s)| s.clone())
            .collect();
        window.reverse();
        Ok(window)
    }

    async fn latest(&self, indicator_id: &str) -> Result<Option<Snapshot>> {
        let index = self.index.read().await;
        Ok(index
            .get(indicator_id)
            .and_then(|series| series.snapshots.values().next_back())
            .cloned())
    }

    async fn range(
        &self,
        indicator_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let index = self.index.read().await;
        Ok(index
            .get(indicator_id)
            .map(|series| series.snapshots.range(start..end).map(|(_, s)| s.clone()).collect())
            .unwrap_or_default())
    }

    async fn after(
        &self,
        indicator_id: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Snapshot>> {
        use std::ops::Bound::{Excluded, Unbounded};

        let index = self.index.read().await;
        Ok(index
            .get(indicator_id)
            .map(|series| {
                series
                    .snapshots
                    .range((Excluded(after), Unbounded))
                    .take(limit)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn generation(&self, indicator_id: &str) -> Result<u64> {
        let index = self.index.read().await;
        Ok(index.get(indicator_id).map(|s| s.generation).unwrap_or(0))
    }

    async fn indicators(&self) -> Result<Vec<String>> {
        let index = self.index.read().await;
        let mut ids: Vec<String> = index.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
