//! Transparency log of what the tracker has collected and persisted.
//!
//! Counters are atomics so the event forwarder, the flush loop and the
//! control path can all record without coordination.

use crate::core::BatchSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Running statistics for the tracker process.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Measurements received from the transport
    measurements_received: AtomicU64,
    /// Measurements written to storage
    measurements_persisted: AtomicU64,
    /// Measurements dropped because their batch write failed
    measurements_lost: AtomicU64,
    /// Batches written successfully
    batches_written: AtomicU64,
    /// Batch writes that failed
    batches_failed: AtomicU64,
    /// Disconnect notifications shown
    disconnects_notified: AtomicU64,
    /// Summary of the most recent successful batch
    last_batch: Mutex<Option<BatchSummary>>,
    /// Process start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            measurements_received: AtomicU64::new(0),
            measurements_persisted: AtomicU64::new(0),
            measurements_lost: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            disconnects_notified: AtomicU64::new(0),
            last_batch: Mutex::new(None),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that continues from, and saves to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous tracker stats: {e}");
        }

        log
    }

    pub fn record_measurements_received(&self, count: u64) {
        self.measurements_received
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record a successful batch write.
    pub fn record_batch_written(&self, summary: BatchSummary) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.measurements_persisted
            .fetch_add(summary.count as u64, Ordering::Relaxed);
        *self.last_batch.lock().unwrap_or_else(|p| p.into_inner()) = Some(summary);
    }

    /// Record a failed batch write of `count` measurements.
    pub fn record_batch_failed(&self, count: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.measurements_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_disconnect_notified(&self) {
        self.disconnects_notified.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            measurements_received: self.measurements_received.load(Ordering::Relaxed),
            measurements_persisted: self.measurements_persisted.load(Ordering::Relaxed),
            measurements_lost: self.measurements_lost.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            disconnects_notified: self.disconnects_notified.load(Ordering::Relaxed),
            last_batch: self
                .last_batch
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let mut text = format!(
            "Tracker Statistics:\n\
             - Measurements received: {}\n\
             - Measurements persisted: {}\n\
             - Measurements lost to failed writes: {}\n\
             - Batches written: {}\n\
             - Batches failed: {}\n\
             - Disconnect notifications: {}\n\
             - Session duration: {} seconds",
            stats.measurements_received,
            stats.measurements_persisted,
            stats.measurements_lost,
            stats.batches_written,
            stats.batches_failed,
            stats.disconnects_notified,
            stats.session_duration_secs
        );
        if let Some(batch) = stats.last_batch {
            text.push_str(&format!(
                "\n - Last batch: {} samples, mean HR {:.1} bpm",
                batch.count, batch.mean_heart_rate
            ));
            if let Some(rmssd) = batch.rmssd {
                text.push_str(&format!(", RMSSD {rmssd:.1} ms"));
            }
        }
        text
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                measurements_received: stats.measurements_received,
                measurements_persisted: stats.measurements_persisted,
                measurements_lost: stats.measurements_lost,
                batches_written: stats.batches_written,
                batches_failed: stats.batches_failed,
                disconnects_notified: stats.disconnects_notified,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.measurements_received
                    .store(persisted.measurements_received, Ordering::Relaxed);
                self.measurements_persisted
                    .store(persisted.measurements_persisted, Ordering::Relaxed);
                self.measurements_lost
                    .store(persisted.measurements_lost, Ordering::Relaxed);
                self.batches_written
                    .store(persisted.batches_written, Ordering::Relaxed);
                self.batches_failed
                    .store(persisted.batches_failed, Ordering::Relaxed);
                self.disconnects_notified
                    .store(persisted.disconnects_notified, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of tracker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub measurements_received: u64,
    pub measurements_persisted: u64,
    pub measurements_lost: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub disconnects_notified: u64,
    pub last_batch: Option<BatchSummary>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub measurements_received: u64,
    pub measurements_persisted: u64,
    pub measurements_lost: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub disconnects_notified: u64,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
