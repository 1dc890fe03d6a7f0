use pulse_core::SharedEventBus;
use pulse_types::PipelineEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analyzer::SharedAnalyzer;

/// Consume `SnapshotWritten` notifications until shutdown.
///
/// Every notification is handled in its own task, so keys never wait on each
/// other. Lost notifications (receiver lag) and the start-up gap are covered
/// by reconciling from the stores.
pub fn spawn_analyzer(
    analyzer: SharedAnalyzer,
    bus: SharedEventBus,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // Subscribe before reconciling so nothing written meanwhile is missed.
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        info!("Starting risk analyzer");

        let startup = analyzer.clone();
        tokio::spawn(async move {
            let repaired = startup.reconcile_all().await;
            info!(repaired = repaired, "Start-up reconciliation finished");
        });

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(message) => {
                        let PipelineEvent::SnapshotWritten(event) = message.event else {
                            continue;
                        };
                        debug!(message_id = %message.id, key = %event.key(), "Snapshot notification");
                        let analyzer = analyzer.clone();
                        tokio::spawn(async move {
                            if let Err(e) = analyzer.handle(&event).await {
                                error!(
                                    indicator_id = %event.indicator_id,
                                    timestamp = %event.timestamp,
                                    error = %e,
                                    "Risk analysis failed"
                                );
                            }
                        });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Analyzer lagged behind, reconciling");
                        let analyzer = analyzer.clone();
                        tokio::spawn(async move {
                            analyzer.reconcile_all().await;
                        });
                    }
                    Err(RecvError::Closed) => {
                        info!("Event bus closed, analyzer stopping");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("Risk analyzer shutting down");
                    break;
                }
            }
        }
    })
}
