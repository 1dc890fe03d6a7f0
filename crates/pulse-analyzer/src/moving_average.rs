use chrono::{DateTime, Utc};
use pulse_types::Snapshot;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// Trailing window of an indicator's values strictly before `upto`.
///
/// Derived state only: it can always be rebuilt from the snapshot store.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverageState {
    pub indicator_id: String,
    pub window_size: usize,
    /// Exclusive upper bound of the window.
    pub upto: DateTime<Utc>,
    /// Store generation the window was read at.
    pub generation: u64,
    window: VecDeque<(DateTime<Utc>, f64)>,
    sum: f64,
}

impl MovingAverageState {
    pub fn new(
        indicator_id: impl Into<String>,
        window_size: usize,
        upto: DateTime<Utc>,
        generation: u64,
    ) -> Self {
        Self {
            indicator_id: indicator_id.into(),
            window_size,
            upto,
            generation,
            window: VecDeque::with_capacity(window_size),
            sum: 0.0,
        }
    }

    /// Build from snapshots ordered oldest first.
    pub fn from_snapshots(
        indicator_id: impl Into<String>,
        window_size: usize,
        upto: DateTime<Utc>,
        generation: u64,
        snapshots: &[Snapshot],
    ) -> Self {
        let mut state = Self::new(indicator_id, window_size, upto, generation);
        for snapshot in snapshots {
            state.push(snapshot.timestamp, snapshot.value);
        }
        state
    }

    fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.window.push_back((timestamp, value));
        if self.window.len() > self.window_size {
            while self.window.len() > self.window_size {
                self.window.pop_front();
            }
            // Re-summed after eviction so a derived window sums exactly like a fresh one.
            self.sum = self.window.iter().map(|(_, v)| v).sum();
        } else {
            self.sum += value;
        }
    }

    /// Slide the window forward to `upto` by pushing the snapshots in
    /// `[self.upto, upto)`, ordered oldest first.
    pub fn advance(&mut self, upto: DateTime<Utc>, snapshots: &[Snapshot]) {
        for snapshot in snapshots {
            if snapshot.timestamp >= self.upto && snapshot.timestamp < upto {
                self.push(snapshot.timestamp, snapshot.value);
            }
        }
        self.upto = upto;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Arithmetic mean over the points present; gaps are not interpolated.
    pub fn mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.sum / self.window.len() as f64)
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.window.iter().map(|(_, v)| *v).collect()
    }
}

/// Best-effort cache of moving-average windows keyed by `(indicator, upto)`.
///
/// An entry is only served while the store generation it was read at is
/// still current.
pub struct WindowCache {
    entries: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, MovingAverageState>>>,
    max_entries_per_indicator: usize,
}

impl WindowCache {
    pub fn new(max_entries_per_indicator: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries_per_indicator: max_entries_per_indicator.max(1),
        }
    }

    /// Nearest entry at or before `upto` for the current `generation`.
    ///
    /// Entries from other generations are dropped on the way.
    pub async fn nearest(
        &self,
        indicator_id: &str,
        upto: DateTime<Utc>,
        generation: u64,
    ) -> Option<MovingAverageState> {
        let mut entries = self.entries.lock().await;
        let series = entries.get_mut(indicator_id)?;

        let before = series.len();
        series.retain(|_, state| state.generation == generation);
        if series.len() != before {
            debug!(
                indicator_id = %indicator_id,
                evicted = before - series.len(),
                generation = generation,
                "Discarded stale windows"
            );
        }

        series.range(..=upto).next_back().map(|(_, state)| state.clone())
    }

    pub async fn insert(&self, state: MovingAverageState) {
        let mut entries = self.entries.lock().await;
        let series = entries.entry(state.indicator_id.clone()).or_default();
        series.insert(state.upto, state);
        while series.len() > self.max_entries_per_indicator {
            series.pop_first();
        }
    }

    pub async fn invalidate(&self, indicator_id: &str) {
        self.entries.lock().await.remove(indicator_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.values().map(BTreeMap::len).sum()
    }
}
