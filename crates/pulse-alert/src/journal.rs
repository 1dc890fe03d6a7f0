//! Alert events as an append-only JSONL journal at `<root>/alerts/events.jsonl`.
//!
//! Every insert and delivery update appends the full event; on open the
//! journal is replayed and the last record per id wins.

use async_trait::async_trait;
use pulse_core::{PulseError, Result};
use pulse_types::AlertEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::AlertEventStore;

pub const ALERT_DIR: &str = "alerts";
pub const JOURNAL_FILE: &str = "events.jsonl";

pub struct JournalAlertStore {
    path: PathBuf,
    // Held across the append so check, write and index update are one step.
    events: Mutex<HashMap<String, AlertEvent>>,
}

impl JournalAlertStore {
    /// Open (or create) the journal under `root`, replaying existing records.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join(ALERT_DIR);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(JOURNAL_FILE);

        let mut events = HashMap::new();
        let mut skipped = 0usize;
        if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AlertEvent>(line) {
                    Ok(event) => {
                        events.insert(event.id.clone(), event);
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "Skipping unreadable alert journal line"
                        );
                    }
                }
            }
        }

        info!(
            path = %path.display(),
            events = events.len(),
            skipped = skipped,
            "Alert journal opened"
        );

        Ok(Self {
            path,
            events: Mutex::new(events),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    async fn append(&self, event: &AlertEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let written = async {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        written.map_err(|e| PulseError::store_unavailable(format!("alert journal: {}", e)))
    }
}

#[async_trait]
impl AlertEventStore for JournalAlertStore {
    async fn insert_if_absent(&self, event: AlertEvent) -> Result<bool> {
        let mut events = self.events.lock().await;
        if events.contains_key(&event.id) {
            return Ok(false);
        }
        self.append(&event).await?;
        debug!(alert_id = %event.id, "Alert event journaled");
        events.insert(event.id.clone(), event);
        Ok(true)
    }

    async fn update(&self, event: AlertEvent) -> Result<()> {
        let mut events = self.events.lock().await;
        let Some(stored) = events.get(&event.id) else {
            return Err(PulseError::NotFound(format!("alert event {}", event.id)));
        };

        let mut updated = stored.clone();
        updated.delivery_status = event.delivery_status;
        updated.delivered_at = event.delivered_at;
        updated.delivery_error = event.delivery_error;
        self.append(&updated).await?;
        events.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<AlertEvent>> {
        Ok(self.events.lock().await.get(event_id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self.events.lock().await.values().cloned().collect();
        events.sort_by(|a, b| b.raised_at.cmp(&a.raised_at).then_with(|| a.id.cmp(&b.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn for_rule(&self, rule_id: &str) -> Result<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self
            .events
            .lock()
            .await
            .values()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.raised_at.cmp(&b.raised_at));
        Ok(events)
    }
}
