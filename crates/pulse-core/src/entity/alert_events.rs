use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persisted alert event. The primary key is the deterministic
/// `{rule_id}:{risk_score_id}` id, so a second insert of the same event fails.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alert_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub rule_id: String,
    pub risk_score_id: String,
    pub user_id: String,
    pub indicator_id: String,
    pub channel: String,
    pub severity: String,
    pub delta_pct: f64,
    pub raised_at: i64,
    pub delivery_status: String,
    pub delivered_at: Option<i64>,
    pub delivery_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
