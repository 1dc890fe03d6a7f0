use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pulse_core::entity::alert_events;
use pulse_core::{PulseError, Result};
use pulse_types::AlertEvent;
use sea_orm::sea_query::OnConflict;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Schema,
};
use std::sync::Arc;
use tracing::debug;

use crate::store::AlertEventStore;

/// Alert events in an `alert_events` table, usually next to `risk_scores`.
pub struct SqlAlertStore {
    db: Arc<DatabaseConnection>,
}

impl SqlAlertStore {
    /// Wrap an open connection and create the table if needed.
    pub async fn open(db: Arc<DatabaseConnection>) -> Result<Self> {
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(alert_events::Entity);
        stmt.if_not_exists();
        self.db.execute(backend.build(&stmt)).await?;
        Ok(())
    }
}

fn to_active_model(event: &AlertEvent) -> alert_events::ActiveModel {
    alert_events::ActiveModel {
        id: Set(event.id.clone()),
        rule_id: Set(event.rule_id.clone()),
        risk_score_id: Set(event.risk_score_id.clone()),
        user_id: Set(event.user_id.clone()),
        indicator_id: Set(event.indicator_id.clone()),
        channel: Set(event.channel.to_string()),
        severity: Set(event.severity.to_string()),
        delta_pct: Set(event.delta_pct),
        raised_at: Set(event.raised_at.timestamp_millis()),
        delivery_status: Set(event.delivery_status.to_string()),
        delivered_at: Set(event.delivered_at.map(|t| t.timestamp_millis())),
        delivery_error: Set(event.delivery_error.clone()),
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PulseError::Internal(format!("timestamp out of range: {}", ms)))
}

fn from_model(model: alert_events::Model) -> Result<AlertEvent> {
    Ok(AlertEvent {
        channel: model.channel.parse().map_err(PulseError::Internal)?,
        severity: model.severity.parse().map_err(PulseError::Internal)?,
        delivery_status: model.delivery_status.parse().map_err(PulseError::Internal)?,
        raised_at: from_millis(model.raised_at)?,
        delivered_at: model.delivered_at.map(from_millis).transpose()?,
        id: model.id,
        rule_id: model.rule_id,
        risk_score_id: model.risk_score_id,
        user_id: model.user_id,
        indicator_id: model.indicator_id,
        delta_pct: model.delta_pct,
        delivery_error: model.delivery_error,
    })
}

fn from_models(models: Vec<alert_events::Model>) -> Result<Vec<AlertEvent>> {
    models.into_iter().map(from_model).collect()
}

#[async_trait]
impl AlertEventStore for SqlAlertStore {
    async fn insert_if_absent(&self, event: AlertEvent) -> Result<bool> {
        // ON CONFLICT DO NOTHING keeps the check and the insert in one statement.
        let inserted = alert_events::Entity::insert(to_active_model(&event))
            .on_conflict(
                OnConflict::column(alert_events::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        debug!(alert_id = %event.id, inserted = inserted, "Alert event insert (sql)");
        Ok(inserted > 0)
    }

    async fn update(&self, event: AlertEvent) -> Result<()> {
        let stored = alert_events::Entity::find_by_id(event.id.clone())
            .one(&*self.db)
            .await?
            .ok_or_else(|| PulseError::NotFound(format!("alert event {}", event.id)))?;

        let mut model: alert_events::ActiveModel = stored.into();
        model.delivery_status = Set(event.delivery_status.to_string());
        model.delivered_at = Set(event.delivered_at.map(|t| t.timestamp_millis()));
        model.delivery_error = Set(event.delivery_error.clone());
        model.update(&*self.db).await?;
        Ok(())
    }

    async fn get(&self, event_id: &str) -> Result<Option<AlertEvent>> {
        alert_events::Entity::find_by_id(event_id.to_string())
            .one(&*self.db)
            .await?
            .map(from_model)
            .transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let models = alert_events::Entity::find()
            .order_by_desc(alert_events::Column::RaisedAt)
            .order_by_asc(alert_events::Column::Id)
            .limit(limit.min(i64::MAX as usize) as u64)
            .all(&*self.db)
            .await?;
        from_models(models)
    }

    async fn for_rule(&self, rule_id: &str) -> Result<Vec<AlertEvent>> {
        let models = alert_events::Entity::find()
            .filter(alert_events::Column::RuleId.eq(rule_id))
            .order_by_asc(alert_events::Column::RaisedAt)
            .all(&*self.db)
            .await?;
        from_models(models)
    }
}
