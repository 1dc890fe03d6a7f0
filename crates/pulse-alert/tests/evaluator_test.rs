use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pulse_alert::{
    spawn_alert_evaluator, AlertDelivery, AlertEvaluator, AlertEventStore, DeliveryResult,
    DeliveryRouter, LogDelivery, MemoryAlertStore, MemoryRuleSource,
};
use pulse_analyzer::{spawn_analyzer, AnalysisOutcome, AnalyzerSettings, RiskAnalyzer};
use pulse_core::{EventBus, RetryPolicy};
use pulse_registry::IndicatorRegistry;
use pulse_timeseries::{MemoryScoreStore, PartitionedSnapshotStore, SnapshotStore};
use pulse_types::{
    AlertEvent, AlertRule, Channel, DeliveryStatus, Indicator, RiskScore, ScoreUpserted, Severity,
    Snapshot, SnapshotWritten,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const ID: &str = "freight_cost_index";

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        attempt_timeout_ms: 1_000,
    }
}

#[derive(Default)]
struct CountingDelivery {
    calls: AtomicUsize,
}

#[async_trait]
impl AlertDelivery for CountingDelivery {
    async fn deliver(&self, _event: &AlertEvent) -> DeliveryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DeliveryResult::success()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

struct Pipeline {
    snapshots: Arc<PartitionedSnapshotStore>,
    analyzer: RiskAnalyzer,
    evaluator: AlertEvaluator,
    alerts: Arc<MemoryAlertStore>,
    delivery: Arc<CountingDelivery>,
}

async fn pipeline(rules: Vec<AlertRule>) -> Pipeline {
    let registry = IndicatorRegistry::from_indicators([Indicator::new(ID, "Freight cost", "index")
        .with_critical_threshold(15.0)])
    .await
    .unwrap();
    let snapshots = Arc::new(PartitionedSnapshotStore::in_memory());
    let scores = Arc::new(MemoryScoreStore::new());
    let analyzer = RiskAnalyzer::new(
        Arc::new(registry),
        snapshots.clone(),
        scores.clone(),
        AnalyzerSettings {
            store_retry: fast_retry(),
            ..AnalyzerSettings::default()
        },
    );

    let delivery = Arc::new(CountingDelivery::default());
    let router = Arc::new(DeliveryRouter::new());
    router.register(Channel::Email, delivery.clone()).await;
    router.register(Channel::Log, Arc::new(LogDelivery)).await;

    let alerts = Arc::new(MemoryAlertStore::new());
    let evaluator = AlertEvaluator::new(
        Arc::new(MemoryRuleSource::from_rules(rules).await.unwrap()),
        alerts.clone(),
        scores,
        router,
    )
    .with_store_retry(fast_retry());

    Pipeline {
        snapshots,
        analyzer,
        evaluator,
        alerts,
        delivery,
    }
}

/// Writes a 30-day baseline of 100.0 and then `value` on day 30; returns the score.
async fn score_day_30(p: &Pipeline, value: f64) -> RiskScore {
    for n in 0..30 {
        p.snapshots.put(Snapshot::new(ID, day(n), 100.0, "test")).await.unwrap();
    }
    write_and_score(p, 30, value).await
}

async fn write_and_score(p: &Pipeline, n: i64, value: f64) -> RiskScore {
    let outcome = p.snapshots.put(Snapshot::new(ID, day(n), value, "test")).await.unwrap();
    let snapshot = outcome.snapshot();
    let event = SnapshotWritten {
        indicator_id: ID.to_string(),
        timestamp: snapshot.timestamp,
        content_hash: snapshot.content_hash.clone(),
        revision: snapshot.revision,
        correction: outcome.is_correction(),
    };
    match p.analyzer.handle(&event).await.unwrap() {
        AnalysisOutcome::Scored { score, .. } => score,
        other => panic!("expected a score, got {:?}", other),
    }
}

fn notification(score: &RiskScore) -> ScoreUpserted {
    ScoreUpserted {
        risk_score_id: score.id.clone(),
        indicator_id: score.indicator_id.clone(),
        timestamp: score.timestamp,
        severity: score.severity,
    }
}

fn email_rule(id: &str, threshold: f64, min: Severity) -> AlertRule {
    AlertRule::new("alice", ID, threshold, min, Channel::Email).with_id(id)
}

async fn wait_for_status(store: &MemoryAlertStore, id: &str) -> AlertEvent {
    timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let Some(event) = store.get(id).await.unwrap() {
                if event.delivery_status != DeliveryStatus::Pending {
                    return event;
                }
            }
            sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("delivery status recorded")
}

#[tokio::test]
async fn test_critical_score_raises_exactly_one_alert() {
    let p = pipeline(vec![email_rule("r1", 15.0, Severity::Elevated)]).await;
    let score = score_day_30(&p, 116.0).await;
    assert_eq!(score.delta_pct, Some(16.0));
    assert_eq!(score.severity, Severity::Critical);

    let raised = p.evaluator.handle(&notification(&score)).await.unwrap();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].id, AlertEvent::event_id("r1", &score.id));
    assert_eq!(raised[0].delta_pct, 16.0);

    let delivered = wait_for_status(&p.alerts, &raised[0].id).await;
    assert_eq!(delivered.delivery_status, DeliveryStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
    assert_eq!(p.delivery.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_triggers_raise_one_alert() {
    let p = pipeline(vec![email_rule("r1", 15.0, Severity::Elevated)]).await;
    let score = score_day_30(&p, 116.0).await;
    let trigger = notification(&score);
    let Pipeline {
        evaluator,
        alerts,
        delivery,
        ..
    } = p;
    let evaluator = Arc::new(evaluator);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let evaluator = evaluator.clone();
        let trigger = trigger.clone();
        handles.push(tokio::spawn(async move {
            evaluator.handle(&trigger).await.unwrap().len()
        }));
    }
    let mut created = 0;
    for handle in handles {
        created += handle.await.unwrap();
    }
    assert_eq!(created, 1);

    wait_for_status(&alerts, &AlertEvent::event_id("r1", &score.id)).await;
    assert_eq!(alerts.len().await, 1);
    assert_eq!(delivery.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_normal_score_raises_nothing() {
    let p = pipeline(vec![
        email_rule("r1", 10.0, Severity::Normal),
        email_rule("r2", 15.0, Severity::Elevated),
    ])
    .await;
    let score = score_day_30(&p, 105.0).await;
    assert_eq!(score.delta_pct, Some(5.0));
    assert_eq!(score.severity, Severity::Normal);

    let raised = p.evaluator.handle(&notification(&score)).await.unwrap();
    assert!(raised.is_empty());
    assert_eq!(p.alerts.len().await, 0);
}

#[tokio::test]
async fn test_redelivered_trigger_does_not_double_alert() {
    let p = pipeline(vec![email_rule("r1", 15.0, Severity::Elevated)]).await;
    let score = score_day_30(&p, 116.0).await;
    let trigger = notification(&score);

    assert_eq!(p.evaluator.handle(&trigger).await.unwrap().len(), 1);
    assert!(p.evaluator.handle(&trigger).await.unwrap().is_empty());
    assert!(p.evaluator.handle(&trigger).await.unwrap().is_empty());

    wait_for_status(&p.alerts, &AlertEvent::event_id("r1", &score.id)).await;
    assert_eq!(p.alerts.len().await, 1);
    assert_eq!(p.delivery.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_correction_raises_a_distinct_alert() {
    let p = pipeline(vec![email_rule("r1", 15.0, Severity::Elevated)]).await;
    let first = score_day_30(&p, 116.0).await;
    p.evaluator.handle(&notification(&first)).await.unwrap();

    let corrected = write_and_score(&p, 30, 130.0).await;
    assert_ne!(corrected.id, first.id);
    let raised = p.evaluator.handle(&notification(&corrected)).await.unwrap();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].delta_pct, 30.0);

    // The stale notification now evaluates the replacement score.
    assert!(p.evaluator.handle(&notification(&first)).await.unwrap().is_empty());
    assert_eq!(p.alerts.for_rule("r1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_disabled_and_insufficient_never_match() {
    let p = pipeline(vec![email_rule("r1", 0.0, Severity::Normal).disabled()]).await;
    let score = score_day_30(&p, 200.0).await;
    assert!(p.evaluator.handle(&notification(&score)).await.unwrap().is_empty());

    let q = pipeline(vec![email_rule("r1", 0.0, Severity::Normal)]).await;
    q.snapshots.put(Snapshot::new(ID, day(0), 100.0, "test")).await.unwrap();
    let early = write_and_score(&q, 1, 500.0).await;
    assert!(early.insufficient_baseline);
    assert!(q.evaluator.handle(&notification(&early)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrouted_channel_marks_event_failed() {
    let rule = AlertRule::new("bob", ID, 15.0, Severity::Elevated, Channel::Sms).with_id("sms");
    let p = pipeline(vec![rule]).await;
    let score = score_day_30(&p, 116.0).await;

    let raised = p.evaluator.handle(&notification(&score)).await.unwrap();
    let event = wait_for_status(&p.alerts, &raised[0].id).await;
    assert_eq!(event.delivery_status, DeliveryStatus::Failed);
    assert!(event.delivery_error.is_some());
    assert!(event.delivered_at.is_none());
}

#[tokio::test]
async fn test_reconcile_recent_is_idempotent() {
    let p = pipeline(vec![email_rule("r1", 15.0, Severity::Elevated)]).await;
    score_day_30(&p, 116.0).await;

    assert_eq!(p.evaluator.reconcile_recent(10).await, 1);
    assert_eq!(p.evaluator.reconcile_recent(10).await, 0);
    assert_eq!(p.alerts.len().await, 1);
}

#[tokio::test]
async fn test_bus_driven_pipeline_raises_alert() {
    let bus = Arc::new(EventBus::new(256));
    let registry = IndicatorRegistry::from_indicators([Indicator::new(ID, "Freight cost", "index")
        .with_critical_threshold(15.0)])
    .await
    .unwrap();
    let snapshots = Arc::new(PartitionedSnapshotStore::in_memory().with_notifier(bus.clone()));
    let scores = Arc::new(MemoryScoreStore::new());
    let analyzer = Arc::new(
        RiskAnalyzer::new(
            Arc::new(registry),
            snapshots.clone(),
            scores.clone(),
            AnalyzerSettings::default(),
        )
        .with_notifier(bus.clone()),
    );

    let router = Arc::new(DeliveryRouter::new());
    router.register(Channel::Log, Arc::new(LogDelivery)).await;
    let alerts = Arc::new(MemoryAlertStore::new());
    let rules = MemoryRuleSource::from_rules([AlertRule::new(
        "alice",
        ID,
        15.0,
        Severity::Elevated,
        Channel::Log,
    )
    .with_id("r1")])
    .await
    .unwrap();
    let evaluator = Arc::new(AlertEvaluator::new(Arc::new(rules), alerts.clone(), scores, router));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let analyzer_task = spawn_analyzer(analyzer, bus.clone(), shutdown_rx.clone());
    let alert_task = spawn_alert_evaluator(evaluator, bus.clone(), shutdown_rx);

    for n in 0..31 {
        let value = if n == 30 { 116.0 } else { 100.0 };
        snapshots.put(Snapshot::new(ID, day(n), value, "test")).await.unwrap();
    }

    let event = timeout(std::time::Duration::from_secs(5), async {
        loop {
            let recent = alerts.list_recent(10).await.unwrap();
            if let Some(event) = recent.into_iter().find(|e| e.delivery_status == DeliveryStatus::Delivered) {
                return event;
            }
            sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("alert delivered");
    assert_eq!(event.rule_id, "r1");
    assert_eq!(event.severity, Severity::Critical);
    assert_eq!(alerts.len().await, 1);

    shutdown_tx.send(true).unwrap();
    analyzer_task.await.unwrap();
    alert_task.await.unwrap();
}
