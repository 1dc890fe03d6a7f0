use anyhow::Context;
use chrono::{DateTime, Utc};
use pulse_alert::{
    AlertEvaluator, DeliveryRouter, JournalAlertStore, LogDelivery, MemoryAlertStore,
    MemoryRuleSource, SharedAlertStore, SqlAlertStore, WebhookDelivery,
};
use pulse_analyzer::{spawn_analyzer, AnalyzerSettings, RiskAnalyzer, SharedAnalyzer};
use pulse_config::GlobalConfig;
use pulse_core::{EventBus, SharedEventBus};
use pulse_ingest::{fetcher_for_source, IngestionScheduler, IngestionWorker, RunReport};
use pulse_registry::{IndicatorRegistry, SharedRegistry};
use pulse_timeseries::{
    MemoryScoreStore, PartitionedSnapshotStore, QueryService, SharedScoreStore,
    SharedSnapshotStore, SqlScoreStore,
};
use pulse_types::{Channel, DeliveryStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::AppState;

/// Recent scores per indicator re-checked for alerts after a one-shot run.
const ALERT_RECONCILE_DEPTH: usize = 64;

/// Every pipeline component, wired from one configuration.
pub struct Pipeline {
    pub config: GlobalConfig,
    pub bus: SharedEventBus,
    pub registry: SharedRegistry,
    pub snapshots: SharedSnapshotStore,
    pub scores: SharedScoreStore,
    pub rules: Arc<MemoryRuleSource>,
    pub alerts: SharedAlertStore,
    pub worker: Arc<IngestionWorker>,
    pub analyzer: SharedAnalyzer,
    pub evaluator: Arc<AlertEvaluator>,
    built_at: DateTime<Utc>,
    shutdown_tx: watch::Sender<bool>,
}

impl Pipeline {
    pub async fn build(config: GlobalConfig) -> anyhow::Result<Self> {
        let built_at = Utc::now();
        let bus: SharedEventBus = Arc::new(EventBus::new(config.eventbus.capacity));

        let registry: SharedRegistry = Arc::new(
            IndicatorRegistry::from_indicators(
                config
                    .indicators
                    .iter()
                    .map(|c| c.to_indicator(&config.analyzer)),
            )
            .await
            .context("failed to build indicator registry")?,
        );

        let snapshots: SharedSnapshotStore = match config.storage.snapshot_root() {
            Some(root) => Arc::new(
                PartitionedSnapshotStore::open(root)
                    .await
                    .with_context(|| format!("failed to open snapshot store at {}", root.display()))?
                    .with_notifier(bus.clone()),
            ),
            None => Arc::new(PartitionedSnapshotStore::in_memory().with_notifier(bus.clone())),
        };

        // Alert events follow the most durable store configured, so their
        // at-most-once creation holds across restarts.
        let (scores, alerts): (SharedScoreStore, SharedAlertStore) =
            match (&config.storage.database_url, config.storage.snapshot_root()) {
                (Some(url), _) => {
                    let scores = SqlScoreStore::connect(url)
                        .await
                        .context("failed to open score database")?;
                    let alerts = SqlAlertStore::open(scores.shared_connection())
                        .await
                        .context("failed to open alert event table")?;
                    let scores: SharedScoreStore = Arc::new(scores);
                    let alerts: SharedAlertStore = Arc::new(alerts);
                    (scores, alerts)
                }
                (None, Some(root)) => {
                    let alerts = JournalAlertStore::open(root).await.with_context(|| {
                        format!("failed to open alert journal at {}", root.display())
                    })?;
                    let alerts: SharedAlertStore = Arc::new(alerts);
                    (Arc::new(MemoryScoreStore::new()) as SharedScoreStore, alerts)
                }
                (None, None) => (
                    Arc::new(MemoryScoreStore::new()) as SharedScoreStore,
                    Arc::new(MemoryAlertStore::new()) as SharedAlertStore,
                ),
            };

        let (shutdown_tx, _) = watch::channel(false);

        let worker = IngestionWorker::new(registry.clone(), snapshots.clone())
            .with_fetch_retry(config.ingestion.fetch_retry())
            .with_store_retry(config.ingestion.store_retry())
            .with_concurrency(config.ingestion.concurrency);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.ingestion.fetch_timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        for indicator in &config.indicators {
            let fetcher = fetcher_for_source(&indicator.id, &indicator.source, &client)
                .with_context(|| format!("indicator {}: invalid source", indicator.id))?;
            worker.bind(indicator.id.clone(), fetcher).await;
        }

        let analyzer = Arc::new(
            RiskAnalyzer::new(
                registry.clone(),
                snapshots.clone(),
                scores.clone(),
                AnalyzerSettings {
                    cascade: config.analyzer.cascade_recompute,
                    cache_entries_per_indicator: config.analyzer.cache_entries_per_indicator,
                    store_retry: config.analyzer.store_retry(),
                },
            )
            .with_notifier(bus.clone()),
        );

        let rules = Arc::new(
            MemoryRuleSource::from_rules(config.alert_rules.iter().cloned())
                .await
                .context("invalid alert rule")?,
        );

        let router = Arc::new(DeliveryRouter::new());
        router.register(Channel::Log, Arc::new(LogDelivery)).await;
        if let Some(url) = &config.alerting.webhook_url {
            let mut webhook = WebhookDelivery::new(
                url.clone(),
                Duration::from_millis(config.alerting.timeout_ms),
            )
            .context("failed to build webhook delivery")?;
            for (key, value) in &config.alerting.webhook_headers {
                webhook = webhook.with_header(key.clone(), value.clone());
            }
            router.register(Channel::Webhook, Arc::new(webhook)).await;
        }

        let evaluator = Arc::new(
            AlertEvaluator::new(rules.clone(), alerts.clone(), scores.clone(), router)
                .with_store_retry(config.analyzer.store_retry()),
        );

        info!(
            indicators = config.indicators.len(),
            alert_rules = config.alert_rules.len(),
            durable_snapshots = config.storage.snapshot_root().is_some(),
            sql_scores = config.storage.database_url.is_some(),
            "Pipeline assembled"
        );

        Ok(Self {
            config,
            bus,
            registry,
            snapshots,
            scores,
            rules,
            alerts,
            worker: Arc::new(worker),
            analyzer,
            evaluator,
            built_at,
            shutdown_tx,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            registry: self.registry.clone(),
            query: QueryService::new(self.snapshots.clone(), self.scores.clone()),
            alerts: self.alerts.clone(),
        })
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Start the analyzer and alert consumers on the bus.
    pub fn spawn_consumers(&self) -> Vec<JoinHandle<()>> {
        vec![
            spawn_analyzer(self.analyzer.clone(), self.bus.clone(), self.shutdown_signal()),
            pulse_alert::spawn_alert_evaluator(
                self.evaluator.clone(),
                self.bus.clone(),
                self.shutdown_signal(),
            ),
        ]
    }

    pub async fn scheduler(&self) -> anyhow::Result<IngestionScheduler> {
        IngestionScheduler::new(self.worker.clone(), self.shutdown_signal()).await
    }

    /// One ingestion pass followed by synchronous scoring and alerting, for
    /// batch use without bus consumers.
    pub async fn run_once(&self) -> RunReport {
        let report = self.worker.run_once(self.shutdown_signal()).await;
        let scored = self.analyzer.reconcile_all().await;
        let raised = self.evaluator.reconcile_recent(ALERT_RECONCILE_DEPTH).await;
        info!(
            run_id = %report.run_id,
            failed = report.failed().len(),
            scored = scored,
            alerts_raised = raised,
            "One-shot run finished"
        );
        report
    }

    /// Wait until no alert raised by this pipeline is pending delivery, or
    /// `timeout` passes. Events left pending by an earlier process are ignored.
    pub async fn drain_deliveries(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                match self.alerts.list_recent(usize::MAX).await {
                    Ok(events)
                        if events.iter().all(|e| {
                            e.raised_at < self.built_at
                                || e.delivery_status != DeliveryStatus::Pending
                        }) =>
                    {
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Could not inspect alert deliveries");
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!("Alert deliveries still pending at exit");
        }
        drained
    }
}
