//! Sweep runtime: the interval scheduler that starts each pass and the queue
//! consumer that runs the continuation pages.
//!
//! Both run until the shutdown token is cancelled. A page already in progress
//! is finished before the task exits.

use crate::metrics;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tessera_storage::ContinuationToken;
use tessera_sync::{
    QueueReceiver, ReconciliationSweep, SweepError, SweepOptions, SweepReport, WorkQueue,
    decode_batch,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Build the sweep from the shared state's collaborators.
pub fn build_sweep(state: &AppState, queue: Arc<dyn WorkQueue>) -> ReconciliationSweep {
    ReconciliationSweep::new(
        state.storage.clone(),
        state.origin.tokens.clone(),
        state.origin.metadata.clone(),
        state.populator.clone(),
        state.resolver.clone(),
        queue,
        SweepOptions::from_config(&state.config.sweep),
    )
}

/// Run one page and record the result.
pub async fn run_page(
    sweep: &ReconciliationSweep,
    cursor: Option<ContinuationToken>,
) -> Result<SweepReport, SweepError> {
    let start = cursor.is_none();
    let result = sweep.run(cursor).await;
    metrics::record_sweep(&result);

    match &result {
        Ok(report) if start => info!(listed = report.listed, "Sweep pass started"),
        Ok(report) if !report.continued => info!(listed = report.listed, "Sweep pass complete"),
        Ok(_) => {}
        Err(SweepError::TokenUnavailable) => {
            warn!("No origin token, sweep invocation skipped")
        }
        Err(e) => error!(error = %e, "Sweep invocation failed"),
    }
    result
}

/// Starts a new pass every interval.
pub struct SweepScheduler {
    sweep: Arc<ReconciliationSweep>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(sweep: Arc<ReconciliationSweep>, interval: Duration) -> Self {
        Self { sweep, interval }
    }

    /// Runs until shutdown is signalled. The first pass starts one interval
    /// after startup.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Sweep scheduler starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Sweep scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let _ = run_page(&self.sweep, None).await;
                }
            }
        }
    }
}

/// Receives continuation messages and runs one page per message, strictly in
/// sequence.
pub struct QueueConsumer {
    sweep: Arc<ReconciliationSweep>,
    receiver: QueueReceiver,
}

impl QueueConsumer {
    pub fn new(sweep: Arc<ReconciliationSweep>, receiver: QueueReceiver) -> Self {
        Self { sweep, receiver }
    }

    /// Runs until shutdown is signalled or every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Sweep queue consumer starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Sweep queue consumer shutting down");
                    break;
                }

                batch = self.receiver.recv_batch() => {
                    let Some(batch) = batch else {
                        info!("Sweep queue closed");
                        break;
                    };
                    let _ = handle_batch(&self.sweep, &batch).await;
                }
            }
        }
    }
}

/// Handle one delivered batch. A batch that is not exactly one well-formed
/// message is logged and dropped; it is never redelivered.
pub async fn handle_batch(
    sweep: &ReconciliationSweep,
    batch: &[Vec<u8>],
) -> Option<Result<SweepReport, SweepError>> {
    let cursor = match decode_batch(batch).and_then(|message| message.token()) {
        Ok(cursor) => cursor,
        Err(e) => {
            metrics::QUEUE_CONTRACT_VIOLATIONS.inc();
            error!(error = %e, messages = batch.len(), "Dropping sweep queue delivery");
            return None;
        }
    };
    Some(run_page(sweep, Some(cursor)).await)
}
