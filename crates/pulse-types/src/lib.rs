pub mod alert;
pub mod indicator;
pub mod message;
pub mod score;
pub mod snapshot;

pub use alert::{AlertEvent, AlertRule, Channel, DeliveryStatus};
pub use indicator::{Indicator, Period};
pub use message::{Message, PipelineEvent, ScoreUpserted, SnapshotWritten};
pub use score::{RiskScore, Severity};
pub use snapshot::{content_hash, Snapshot, SnapshotKey};

/// Version stamped on every persisted record.
pub const SCHEMA_VERSION: u16 = 1;

pub(crate) fn default_schema_version() -> u16 {
    SCHEMA_VERSION
}
