use async_trait::async_trait;
use pulse_core::{PulseError, Result};
use pulse_types::AlertEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Alert event sink keyed by the deterministic event id.
#[async_trait]
pub trait AlertEventStore: Send + Sync {
    /// Atomic insert-if-absent. `false` when the id already exists.
    async fn insert_if_absent(&self, event: AlertEvent) -> Result<bool>;

    /// Record delivery status on an existing event.
    async fn update(&self, event: AlertEvent) -> Result<()>;

    async fn get(&self, event_id: &str) -> Result<Option<AlertEvent>>;

    /// Newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<AlertEvent>>;

    async fn for_rule(&self, rule_id: &str) -> Result<Vec<AlertEvent>>;
}

pub type SharedAlertStore = Arc<dyn AlertEventStore>;

#[derive(Default)]
pub struct MemoryAlertStore {
    events: RwLock<HashMap<String, AlertEvent>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl AlertEventStore for MemoryAlertStore {
    async fn insert_if_absent(&self, event: AlertEvent) -> Result<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Ok(false);
        }
        events.insert(event.id.clone(), event);
        Ok(true)
    }

    async fn update(&self, event: AlertEvent) -> Result<()> {
        let mut events = self.events.write().await;
        match events.get_mut(&event.id) {
            Some(stored) => {
                stored.delivery_status = event.delivery_status;
                stored.delivered_at = event.delivered_at;
                stored.delivery_error = event.delivery_error;
                Ok(())
            }
            None => Err(PulseError::NotFound(format!("alert event {}", event.id))),
        }
    }

    async fn get(&self, event_id: &str) -> Result<Option<AlertEvent>> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self.events.read().await.values().cloned().collect();
        events.sort_by(|a, b| b.raised_at.cmp(&a.raised_at).then_with(|| a.id.cmp(&b.id)));
        events.truncate(limit);
        Ok(events)
    }

    async fn for_rule(&self, rule_id: &str) -> Result<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.raised_at.cmp(&b.raised_at));
        Ok(events)
    }
}
