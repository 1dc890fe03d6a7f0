use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::worker::{IngestionWorker, RunReport};

/// Runs the ingestion worker on a cron schedule.
///
/// Ticks that fire while a run is still in progress are skipped, so runs
/// of the same worker never overlap.
pub struct IngestionScheduler {
    scheduler: JobScheduler,
    worker: Arc<IngestionWorker>,
    running: Arc<Mutex<()>>,
    cancel: watch::Receiver<bool>,
    last_report: Arc<Mutex<Option<RunReport>>>,
}

impl IngestionScheduler {
    pub async fn new(
        worker: Arc<IngestionWorker>,
        cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            worker,
            running: Arc::new(Mutex::new(())),
            cancel,
            last_report: Arc::new(Mutex::new(None)),
        })
    }

    /// Schedule ingestion with a 6-field cron expression (seconds first).
    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<uuid::Uuid> {
        let worker = self.worker.clone();
        let running = self.running.clone();
        let cancel = self.cancel.clone();
        let last_report = self.last_report.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _l| {
            let worker = worker.clone();
            let running = running.clone();
            let cancel = cancel.clone();
            let last_report = last_report.clone();

            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    warn!("Previous ingestion run still in progress, skipping tick");
                    return;
                };
                let stopping = *cancel.borrow();
                if stopping {
                    info!("Shutdown requested, skipping scheduled ingestion");
                    return;
                }
                let report = worker.run_once(cancel).await;
                *last_report.lock().await = Some(report);
            })
        })?;

        let job_id = self.scheduler.add(job).await?;
        info!(cron = %cron_expression, job_id = %job_id, "Ingestion scheduled");
        Ok(job_id)
    }

    /// Run immediately, outside the schedule, waiting for any in-flight run first.
    pub async fn run_now(&self) -> RunReport {
        let _guard = self.running.lock().await;
        let report = self.worker.run_once(self.cancel.clone()).await;
        *self.last_report.lock().await = Some(report.clone());
        report
    }

    /// Run in the background under the same overlap guard as scheduled ticks.
    pub fn spawn_run(&self) -> tokio::task::JoinHandle<RunReport> {
        let worker = self.worker.clone();
        let running = self.running.clone();
        let cancel = self.cancel.clone();
        let last_report = self.last_report.clone();
        tokio::spawn(async move {
            let _guard = running.lock().await;
            let report = worker.run_once(cancel).await;
            *last_report.lock().await = Some(report.clone());
            report
        })
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.lock().await.clone()
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.scheduler.start().await?;
        info!("Ingestion scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await?;
        info!("Ingestion scheduler stopped");
        Ok(())
    }
}
