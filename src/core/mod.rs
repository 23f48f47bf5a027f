//! Core tracker engine.
//!
//! This module contains the session lifecycle, the measurement buffer and
//! the batched persistence loop.

pub mod buffer;
pub mod hrv;
pub mod scheduler;
pub mod session;

pub use buffer::MeasurementBuffer;
pub use hrv::{summarize, BatchSummary};
pub use scheduler::{FlushError, FlushTarget, PersistenceScheduler};
pub use session::{SensorSession, SessionContext, SessionError, SessionState, StateCell};
