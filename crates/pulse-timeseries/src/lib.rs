pub mod partition;
pub mod query;
pub mod score_store;
pub mod snapshot_store;
pub mod sql;

pub use query::{QueryService, ScoreQuery, MAX_QUERY_LIMIT};
pub use score_store::{MemoryScoreStore, RiskScoreStore, SharedScoreStore, UpsertOutcome};
pub use snapshot_store::{PartitionedSnapshotStore, PutOutcome, SharedSnapshotStore, SnapshotStore};
pub use sql::SqlScoreStore;
