use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::score::Severity;
use crate::snapshot::SnapshotKey;

/// A snapshot was committed (first write or correction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWritten {
    pub indicator_id: String,
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub revision: u32,
    pub correction: bool,
}

impl SnapshotWritten {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.indicator_id.clone(), self.timestamp)
    }
}

/// A risk score was inserted or replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpserted {
    pub risk_score_id: String,
    pub indicator_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

impl ScoreUpserted {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.indicator_id.clone(), self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    SnapshotWritten(SnapshotWritten),
    ScoreUpserted(ScoreUpserted),
}

impl PipelineEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            PipelineEvent::SnapshotWritten(_) => "snapshot.written",
            PipelineEvent::ScoreUpserted(_) => "score.upserted",
        }
    }

    pub fn indicator_id(&self) -> &str {
        match self {
            PipelineEvent::SnapshotWritten(e) => &e.indicator_id,
            PipelineEvent::ScoreUpserted(e) => &e.indicator_id,
        }
    }
}

/// Envelope carried on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub event: PipelineEvent,
    pub published_at: DateTime<Utc>,
}

impl Message {
    pub fn new(event: PipelineEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            published_at: Utc::now(),
        }
    }

    pub fn topic(&self) -> &'static str {
        self.event.topic()
    }
}
