use pulse_core::SharedEventBus;
use pulse_types::PipelineEvent;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::evaluator::AlertEvaluator;

/// Scores re-checked per indicator after the evaluator lagged.
const LAG_RECONCILE_DEPTH: usize = 64;

/// Consume `ScoreUpserted` notifications until shutdown.
pub fn spawn_alert_evaluator(
    evaluator: Arc<AlertEvaluator>,
    bus: SharedEventBus,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        info!("Starting alert evaluator");

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(message) => {
                        let PipelineEvent::ScoreUpserted(event) = message.event else {
                            continue;
                        };
                        debug!(message_id = %message.id, score_id = %event.risk_score_id, "Score notification");
                        let evaluator = evaluator.clone();
                        tokio::spawn(async move {
                            if let Err(e) = evaluator.handle(&event).await {
                                error!(
                                    score_id = %event.risk_score_id,
                                    indicator_id = %event.indicator_id,
                                    error = %e,
                                    "Alert evaluation failed"
                                );
                            }
                        });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Alert evaluator lagged behind, re-evaluating recent scores");
                        let evaluator = evaluator.clone();
                        tokio::spawn(async move {
                            let raised = evaluator.reconcile_recent(LAG_RECONCILE_DEPTH).await;
                            info!(raised = raised, "Alert reconciliation finished");
                        });
                    }
                    Err(RecvError::Closed) => {
                        info!("Event bus closed, alert evaluator stopping");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("Alert evaluator shutting down");
                    break;
                }
            }
        }
    })
}
