//! Batch storage port and adapters.

use crate::sensor::Measurement;
use crate::store::StoreError;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Append-only bulk insert of drained measurements.
///
/// A batch is written whole or the call fails; the tracker never retries.
pub trait BatchStorage: Send + Sync {
    fn write_measurements(&self, batch: &[Measurement]) -> Result<(), StoreError>;
}

/// Appends one JSON object per measurement to a `.jsonl` file.
#[derive(Debug)]
pub struct JsonlBatchStorage {
    path: PathBuf,
    // Serializes appends from concurrent writers
    lock: Mutex<()>,
}

impl JsonlBatchStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored measurement back, in write order.
    pub fn read_all(&self) -> Result<Vec<Measurement>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| StoreError::ParseError(e.to_string()))
            })
            .collect()
    }
}

impl BatchStorage for JsonlBatchStorage {
    fn write_measurements(&self, batch: &[Measurement]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        // Serialize up front so a bad sample cannot leave half a batch on disk
        let mut payload = String::new();
        for measurement in batch {
            let line = serde_json::to_string(measurement)
                .map_err(|e| StoreError::SerializeError(e.to_string()))?;
            payload.push_str(&line);
            payload.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(payload.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps written batches in memory. Can be switched into a failing mode to
/// simulate a storage outage.
#[derive(Debug, Default)]
pub struct MemoryBatchStorage {
    batches: Mutex<Vec<Vec<Measurement>>>,
    failing: AtomicBool,
}

impl MemoryBatchStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All successfully written batches, oldest first.
    pub fn batches(&self) -> Vec<Vec<Measurement>> {
        self.batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// All successfully written measurements, flattened.
    pub fn measurements(&self) -> Vec<Measurement> {
        self.batches().into_iter().flatten().collect()
    }
}

impl BatchStorage for MemoryBatchStorage {
    fn write_measurements(&self, batch: &[Measurement]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory storage set to fail".into()));
        }
        self.batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(batch.to_vec());
        Ok(())
    }
}
