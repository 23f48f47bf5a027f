//! Persistence ports and adapters.
//!
//! Two collaborators sit behind this module: a key/value settings store and
//! an append-only batch store for measurements. Both are blocking. The
//! daemon and session tasks call them from the blocking pool; only the
//! synchronous `Daemon::is_enabled` query reads settings on the caller's
//! thread.

pub mod settings;
pub mod storage;

pub use settings::{keys, JsonSettingsStore, MemorySettingsStore, SettingsStore};
pub use storage::{BatchStorage, JsonlBatchStorage, MemoryBatchStorage};

/// Errors raised by settings and batch stores.
#[derive(Debug)]
pub enum StoreError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    /// The backing store refused the write
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "IO error: {e}"),
            StoreError::ParseError(e) => write!(f, "Parse error: {e}"),
            StoreError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            StoreError::Unavailable(e) => write!(f, "Storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError(e.to_string())
    }
}
