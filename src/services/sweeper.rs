use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::ports::EventLedger;
use crate::services::reconciliation::{Disposition, ReconciliationEngine};

const SWEEP_BATCH_SIZE: i64 = 50;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub reconciled: usize,
    pub anomalies: usize,
    pub failed: usize,
}

/// Replays unprocessed ledger events on an interval, for providers that give
/// up redelivering before a transient failure clears.
pub async fn run_sweeper(engine: Arc<ReconciliationEngine>, ledger: Arc<dyn EventLedger>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Event sweeper started");

    loop {
        sleep(interval).await;

        match sweep_once(&engine, ledger.as_ref()).await {
            Ok(summary) if summary.examined > 0 => {
                info!(
                    examined = summary.examined,
                    reconciled = summary.reconciled,
                    anomalies = summary.anomalies,
                    failed = summary.failed,
                    "Sweep finished"
                );
            }
            Ok(_) => debug!("Sweep found no unprocessed events"),
            Err(e) => error!("Sweep failed: {}", e),
        }
    }
}

/// One pass over the unprocessed events, oldest first. Each replay counts one
/// attempt, so an event that keeps failing drops out once it hits the cap.
pub async fn sweep_once(engine: &ReconciliationEngine, ledger: &dyn EventLedger) -> Result<SweepSummary, AppError> {
    let events = ledger.list_unprocessed(SWEEP_BATCH_SIZE).await?;
    let mut summary = SweepSummary {
        examined: events.len(),
        ..Default::default()
    };

    for event in events {
        match engine.replay(event.id).await {
            Ok(receipt) => match receipt.disposition {
                Disposition::Anomaly(_) => summary.anomalies += 1,
                Disposition::Reconciled(_) | Disposition::AlreadyProcessed | Disposition::Held => {
                    summary.reconciled += 1
                }
            },
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Replay failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
