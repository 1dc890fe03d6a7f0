use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pulse_core::entity::risk_scores;
use pulse_core::{PulseError, Result};
use pulse_types::{RiskScore, Severity};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Schema, TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::score_store::{decide, RiskScoreStore, UpsertOutcome};

/// Risk scores in a `risk_scores` table (SQLite or Postgres).
pub struct SqlScoreStore {
    db: Arc<DatabaseConnection>,
}

impl SqlScoreStore {
    /// Connect and create the table if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        if database_url.starts_with("sqlite::memory:") {
            // Every pooled connection would get its own empty in-memory database.
            options.max_connections(1).min_connections(1);
        }

        let db = Database::connect(options).await?;
        info!(backend = ?db.get_database_backend(), "Connected score database");

        let store = Self::new(Arc::new(db));
        store.init_schema().await?;
        Ok(store)
    }

    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// The pooled connection, for other tables living in the same database.
    pub fn shared_connection(&self) -> Arc<DatabaseConnection> {
        self.db.clone()
    }

    pub async fn init_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(risk_scores::Entity);
        stmt.if_not_exists();
        self.db.execute(backend.build(&stmt)).await?;
        Ok(())
    }
}

/// Every column `Set`, so the same value serves insert and full-row update.
pub(crate) fn to_active_model(score: &RiskScore) -> risk_scores::ActiveModel {
    risk_scores::ActiveModel {
        indicator_id: Set(score.indicator_id.clone()),
        timestamp: Set(score.timestamp.timestamp_millis()),
        id: Set(score.id.clone()),
        schema_version: Set(score.schema_version as i32),
        snapshot_hash: Set(score.snapshot_hash.clone()),
        snapshot_revision: Set(score.snapshot_revision as i32),
        baseline_avg: Set(score.baseline_avg),
        baseline_points: Set(score.baseline_points as i64),
        observed_value: Set(score.observed_value),
        delta_pct: Set(score.delta_pct),
        severity: Set(score.severity.to_string()),
        risk_score: Set(score.risk_score as i32),
        insufficient_baseline: Set(score.insufficient_baseline),
        zero_baseline: Set(score.zero_baseline),
        computed_at: Set(score.computed_at.timestamp_millis()),
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PulseError::Internal(format!("timestamp out of range: {}", ms)))
}

pub(crate) fn from_model(model: risk_scores::Model) -> Result<RiskScore> {
    let severity: Severity = model.severity.parse().map_err(PulseError::Internal)?;
    Ok(RiskScore {
        schema_version: model.schema_version as u16,
        id: model.id,
        indicator_id: model.indicator_id,
        timestamp: from_millis(model.timestamp)?,
        snapshot_hash: model.snapshot_hash,
        snapshot_revision: model.snapshot_revision.max(0) as u32,
        baseline_avg: model.baseline_avg,
        baseline_points: model.baseline_points.max(0) as usize,
        observed_value: model.observed_value,
        delta_pct: model.delta_pct,
        severity,
        risk_score: model.risk_score.clamp(0, 100) as u8,
        insufficient_baseline: model.insufficient_baseline,
        zero_baseline: model.zero_baseline,
        computed_at: from_millis(model.computed_at)?,
    })
}

fn from_models(models: Vec<risk_scores::Model>) -> Result<Vec<RiskScore>> {
    models.into_iter().map(from_model).collect()
}

#[async_trait]
impl RiskScoreStore for SqlScoreStore {
    async fn get(&self, indicator_id: &str, timestamp: DateTime<Utc>) -> Result<Option<RiskScore>> {
        risk_scores::Entity::find_by_id((indicator_id.to_string(), timestamp.timestamp_millis()))
            .one(&*self.db)
            .await?
            .map(from_model)
            .transpose()
    }

    async fn upsert(&self, score: RiskScore) -> Result<UpsertOutcome> {
        let txn = self.db.begin().await?;

        let existing = risk_scores::Entity::find_by_id((
            score.indicator_id.clone(),
            score.timestamp.timestamp_millis(),
        ))
        .one(&txn)
        .await?
        .map(from_model)
        .transpose()?;

        let outcome = decide(existing.as_ref(), &score);
        match &outcome {
            UpsertOutcome::Inserted => {
                // A concurrent insert of the same key fails on the primary key and is retried.
                to_active_model(&score).insert(&txn).await?;
            }
            UpsertOutcome::Replaced { .. } => {
                to_active_model(&score).update(&txn).await?;
            }
            UpsertOutcome::Unchanged | UpsertOutcome::Stale { .. } => {}
        }
        txn.commit().await?;

        debug!(score_id = %score.id, outcome = ?outcome, "Score upsert (sql)");
        Ok(outcome)
    }

    async fn recent(&self, indicator_id: &str, limit: usize) -> Result<Vec<RiskScore>> {
        let models = risk_scores::Entity::find()
            .filter(risk_scores::Column::IndicatorId.eq(indicator_id))
            .order_by_desc(risk_scores::Column::Timestamp)
            .limit(limit as u64)
            .all(&*self.db)
            .await?;
        from_models(models)
    }

    async fn range(
        &self,
        indicator_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RiskScore>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let models = risk_scores::Entity::find()
            .filter(risk_scores::Column::IndicatorId.eq(indicator_id))
            .filter(risk_scores::Column::Timestamp.gte(start.timestamp_millis()))
            .filter(risk_scores::Column::Timestamp.lt(end.timestamp_millis()))
            .order_by_desc(risk_scores::Column::Timestamp)
            .limit(limit as u64)
            .all(&*self.db)
            .await?;
        from_models(models)
    }

    async fn indicators(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = risk_scores::Entity::find()
            .select_only()
            .column(risk_scores::Column::IndicatorId)
            .distinct()
            .order_by_asc(risk_scores::Column::IndicatorId)
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(ids)
    }
}
