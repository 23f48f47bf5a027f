//! Sensor-facing types for the biometrics tracker.
//!
//! The wireless stack itself is out of scope; this module defines the port
//! the tracker consumes and a simulated adapter for running without hardware.

pub mod simulated;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use simulated::{SimulatedConfig, SimulatedTransport};
pub use transport::{EventSink, EventStream, Transport, TransportEvent};
pub use types::{DeviceInfo, Measurement};
