//! Periodic flush of the measurement buffer to batch storage.
//!
//! One tokio task per session runs the loop. Each tick drains the buffer and
//! writes the batch on the blocking pool, awaiting it before the next tick is
//! considered, so there is never more than one flush in flight. Ticks that
//! come due while a flush is still running are skipped.

use crate::core::buffer::MeasurementBuffer;
use crate::core::hrv;
use crate::store::{BatchStorage, StoreError};
use crate::transparency::SharedTransparencyLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Errors from a flush.
#[derive(Debug)]
pub enum FlushError {
    /// The storage write failed; the batch is gone
    Storage(StoreError),
    /// The flush task panicked or was cancelled
    TaskFailed(String),
}

impl std::fmt::Display for FlushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushError::Storage(e) => write!(f, "Batch write failed: {e}"),
            FlushError::TaskFailed(e) => write!(f, "Flush task failed: {e}"),
        }
    }
}

impl std::error::Error for FlushError {}

/// Everything a flush needs, cheap to clone into the blocking pool.
#[derive(Clone)]
pub struct FlushTarget {
    pub buffer: Arc<MeasurementBuffer>,
    pub storage: Arc<dyn BatchStorage>,
    pub log: SharedTransparencyLog,
}

impl FlushTarget {
    /// Drain the buffer and write whatever was pending as one batch.
    ///
    /// Returns the number of measurements written. An empty buffer performs
    /// no write. A failed write is not retried and its measurements are not
    /// put back.
    pub async fn flush(&self) -> Result<usize, FlushError> {
        let target = self.clone();
        tokio::task::spawn_blocking(move || target.flush_blocking())
            .await
            .map_err(|e| FlushError::TaskFailed(e.to_string()))?
    }

    fn flush_blocking(&self) -> Result<usize, FlushError> {
        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            tracing::debug!("Nothing to save");
            return Ok(0);
        }

        let count = batch.len();
        if let Err(e) = self.storage.write_measurements(&batch) {
            self.log.record_batch_failed(count as u64);
            return Err(FlushError::Storage(e));
        }

        if let Some(summary) = hrv::summarize(&batch) {
            tracing::debug!(
                count,
                mean_hr = summary.mean_heart_rate,
                rmssd = summary.rmssd,
                "Saved heart-rate batch"
            );
            self.log.record_batch_written(summary);
        }
        Ok(count)
    }
}

/// Handle to a running flush loop.
pub struct PersistenceScheduler {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<usize, FlushError>>,
}

impl PersistenceScheduler {
    /// Spawn the flush loop. The first tick fires one `interval` from now.
    pub fn start(target: FlushTarget, interval: Duration) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(target, interval, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Stop ticking and perform the final flush.
    ///
    /// Resolves once the final write has completed; its result is returned.
    pub async fn shutdown(self) -> Result<usize, FlushError> {
        let _ = self.shutdown.send(());
        self.handle
            .await
            .map_err(|e| FlushError::TaskFailed(e.to_string()))?
    }
}

async fn run(
    target: FlushTarget,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<usize, FlushError> {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            // A dropped handle counts as a shutdown request too
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Err(e) = target.flush().await {
                    tracing::error!(error = %e, "Periodic flush failed, batch dropped");
                }
            }
        }
    }

    let written = target.flush().await?;
    tracing::debug!(written, "Final flush complete");
    Ok(written)
}
