//! Biometrics Tracker - heart-rate sensor ingestion daemon.
//!
//! This library keeps a session with a single heart-rate sensor, buffers the
//! measurements it streams, persists them in periodic batches and notifies
//! the operator once when the link drops.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Biometrics Tracker                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐     │
//! │  │  Transport  │──▶│   Session   │──▶│ MeasurementBuf. │     │
//! │  │ (wireless)  │   │ (forwarder) │   │  (RR diffs)     │     │
//! │  └─────────────┘   └─────────────┘   └─────────────────┘     │
//! │                           │                   │              │
//! │                           ▼                   ▼              │
//! │                    ┌─────────────┐   ┌─────────────────┐     │
//! │                    │  Notifier   │   │ Flush scheduler │──▶ storage
//! │                    │ (disconnect)│   │  (every 10 s)   │     │
//! │                    └─────────────┘   └─────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use biometrics_tracker::{
//!     config::Config,
//!     sensor::{SimulatedConfig, SimulatedTransport},
//!     store::{JsonlBatchStorage, MemorySettingsStore},
//!     ui::{LogChooser, LogNotifier},
//!     Collaborators, Daemon,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let daemon = Daemon::new(
//!     &config,
//!     Collaborators {
//!         transport: Arc::new(SimulatedTransport::new(SimulatedConfig::default())),
//!         settings: Arc::new(MemorySettingsStore::new()),
//!         storage: Arc::new(JsonlBatchStorage::new(config.measurements_path())),
//!         chooser: Arc::new(LogChooser::new()),
//!         notifier: Arc::new(LogNotifier),
//!     },
//! );
//!
//! daemon.start().await?;
//! // ... later
//! daemon.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod daemon;
pub mod sensor;
pub mod store;
pub mod transparency;
pub mod ui;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{MeasurementBuffer, PersistenceScheduler, SensorSession, SessionState};
pub use daemon::{Collaborators, Daemon, DaemonError};
pub use sensor::{DeviceInfo, EventSink, Measurement, Transport, TransportEvent};
pub use store::{BatchStorage, SettingsStore, StoreError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
