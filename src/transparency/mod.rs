//! Transparency module for the biometrics tracker.
//!
//! Tracks what the tracker received, persisted and lost, so operators can
//! audit collection at any time.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, PersistedStats, SharedTransparencyLog,
    TransparencyLog, TransparencyStats,
};
