use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persisted risk score, one row per `(indicator_id, timestamp)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "risk_scores")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub indicator_id: String,
    /// Unix millis of the snapshot period boundary.
    #[sea_orm(primary_key, auto_increment = false)]
    pub timestamp: i64,
    pub id: String,
    pub schema_version: i32,
    pub snapshot_hash: String,
    pub snapshot_revision: i32,
    pub baseline_avg: Option<f64>,
    pub baseline_points: i64,
    pub observed_value: f64,
    pub delta_pct: Option<f64>,
    pub severity: String,
    pub risk_score: i32,
    pub insufficient_baseline: bool,
    pub zero_baseline: bool,
    pub computed_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
