use pulse_core::metrics::{record_alert_delivery, record_alert_raised};
use pulse_core::{retry, Result, RetryPolicy};
use pulse_timeseries::SharedScoreStore;
use pulse_types::{AlertEvent, AlertRule, Channel, DeliveryStatus, RiskScore, ScoreUpserted};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::delivery::DeliveryRouter;
use crate::rules::SharedRuleSource;
use crate::store::SharedAlertStore;

/// The signed delta that makes `rule` fire for `score`, if it does.
pub fn rule_matches(rule: &AlertRule, score: &RiskScore) -> Option<f64> {
    if !rule.enabled || rule.indicator_id != score.indicator_id {
        return None;
    }
    let delta = score.delta_pct?;
    if score.severity >= rule.min_severity && delta.abs() >= rule.threshold_pct {
        Some(delta)
    } else {
        None
    }
}

fn channel_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email",
        Channel::Sms => "sms",
        Channel::Webhook => "webhook",
        Channel::Log => "log",
    }
}

fn status_label(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Failed => "failed",
    }
}

/// Matches upserted risk scores against alert rules.
///
/// Creation is at most once per `(rule, score)`; delivery is handed off and
/// its status recorded when it completes.
pub struct AlertEvaluator {
    rules: SharedRuleSource,
    events: SharedAlertStore,
    scores: SharedScoreStore,
    router: Arc<DeliveryRouter>,
    store_retry: RetryPolicy,
}

impl AlertEvaluator {
    pub fn new(
        rules: SharedRuleSource,
        events: SharedAlertStore,
        scores: SharedScoreStore,
        router: Arc<DeliveryRouter>,
    ) -> Self {
        Self {
            rules,
            events,
            scores,
            router,
            store_retry: RetryPolicy::new(
                3,
                std::time::Duration::from_millis(200),
                std::time::Duration::from_secs(5),
            ),
        }
    }

    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    /// Handle a score notification. The stored score is authoritative: a
    /// notification for a score since replaced evaluates the replacement.
    pub async fn handle(&self, trigger: &ScoreUpserted) -> Result<Vec<AlertEvent>> {
        let scores = self.scores.clone();
        let indicator_id = trigger.indicator_id.clone();
        let timestamp = trigger.timestamp;
        let current = retry(&self.store_retry, "score get", || {
            let scores = scores.clone();
            let indicator_id = indicator_id.clone();
            async move { scores.get(&indicator_id, timestamp).await }
        })
        .await?;

        match current {
            Some(score) => {
                if score.id != trigger.risk_score_id {
                    debug!(
                        notified = %trigger.risk_score_id,
                        current = %score.id,
                        "Score replaced since notification"
                    );
                }
                self.evaluate(&score).await
            }
            None => {
                warn!(key = %trigger.key(), "Notified score not found");
                Ok(Vec::new())
            }
        }
    }

    /// Create (and dispatch) an event for every matching rule that has none yet.
    /// Returns only the newly created events.
    pub async fn evaluate(&self, score: &RiskScore) -> Result<Vec<AlertEvent>> {
        if score.delta_pct.is_none() {
            return Ok(Vec::new());
        }

        let rules = self.rules.clone();
        let indicator_id = score.indicator_id.clone();
        let candidates = retry(&self.store_retry, "rules for indicator", || {
            let rules = rules.clone();
            let indicator_id = indicator_id.clone();
            async move { rules.rules_for_indicator(&indicator_id).await }
        })
        .await?;

        let mut created = Vec::new();
        for rule in &candidates {
            let Some(delta) = rule_matches(rule, score) else {
                continue;
            };

            let event = AlertEvent::new(rule, score, delta);
            let events = self.events.clone();
            let inserted = retry(&self.store_retry, "alert insert", || {
                let events = events.clone();
                let event = event.clone();
                async move { events.insert_if_absent(event).await }
            })
            .await?;

            if !inserted {
                debug!(alert_id = %event.id, "Alert already raised");
                continue;
            }

            record_alert_raised(&event.indicator_id);
            info!(
                alert_id = %event.id,
                rule_id = %rule.id,
                user_id = %rule.user_id,
                indicator_id = %score.indicator_id,
                severity = %score.severity,
                delta_pct = delta,
                threshold_pct = rule.threshold_pct,
                "Alert raised"
            );
            self.dispatch(event.clone());
            created.push(event);
        }

        Ok(created)
    }

    /// Re-evaluate the most recent scores of every indicator. Redelivery is
    /// harmless, so this covers notifications lost to lag.
    pub async fn reconcile_recent(&self, per_indicator: usize) -> usize {
        let indicators = match self.scores.indicators().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Alert reconciliation could not list indicators");
                return 0;
            }
        };

        let mut raised = 0;
        for indicator_id in indicators {
            let recent = match self.scores.recent(&indicator_id, per_indicator).await {
                Ok(scores) => scores,
                Err(e) => {
                    warn!(indicator_id = %indicator_id, error = %e, "Alert reconciliation skipped");
                    continue;
                }
            };
            for score in recent {
                match self.evaluate(&score).await {
                    Ok(events) => raised += events.len(),
                    Err(e) => warn!(score_id = %score.id, error = %e, "Alert re-evaluation failed"),
                }
            }
        }
        raised
    }

    /// Deliver one event and record the outcome on it.
    pub async fn deliver(&self, event: AlertEvent) -> AlertEvent {
        deliver_and_record(&self.router, &self.events, event).await
    }

    fn dispatch(&self, event: AlertEvent) {
        let router = self.router.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            deliver_and_record(&router, &events, event).await;
        });
    }
}

async fn deliver_and_record(
    router: &DeliveryRouter,
    events: &SharedAlertStore,
    mut event: AlertEvent,
) -> AlertEvent {
    let result = router.deliver(&event).await;
    if result.success {
        event.mark_delivered();
    } else {
        warn!(alert_id = %event.id, reason = %result.message, "Alert delivery failed");
        event.mark_failed(result.message);
    }

    record_alert_delivery(channel_label(event.channel), status_label(event.delivery_status));
    if let Err(e) = events.update(event.clone()).await {
        error!(alert_id = %event.id, error = %e, "Failed to record delivery status");
    }
    event
}
