//! Simulated transport that emits synthetic heart-rate data.
//!
//! This exists so the binary (and integration tests) can run without a
//! wireless stack. It knows a fixed list of devices and, once connected,
//! produces one sample per tick on its own thread, the way a real transport
//! delivers notifications on its own execution context.

use crate::sensor::transport::{EventSink, Transport};
use crate::sensor::types::{DeviceInfo, Measurement};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for the simulated sensor.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Devices reported as reachable
    pub devices: Vec<DeviceInfo>,
    /// Time between emitted samples
    pub sample_interval: Duration,
    /// Resting heart rate the signal oscillates around
    pub base_heart_rate: f64,
    /// Drop the link after this many samples (None = never)
    pub drop_after: Option<u64>,
    /// Body location reported for the sensor
    pub body_location: Option<String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            devices: vec![DeviceInfo::new("Simulated HRM", "00:00:00:00:00:01")],
            sample_interval: Duration::from_secs(1),
            base_heart_rate: 65.0,
            drop_after: None,
            body_location: Some("Chest".to_string()),
        }
    }
}

/// A transport that fabricates a plausible heart-rate signal.
pub struct SimulatedTransport {
    config: SimulatedConfig,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedTransport {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Names of all devices this transport reports as reachable.
    pub fn device_names(&self) -> Vec<String> {
        self.config.devices.iter().map(|d| d.name.clone()).collect()
    }

    /// Whether a session is currently producing samples.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop_worker(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Transport for SimulatedTransport {
    fn find_device_by_identity(&self, name: &str) -> Option<DeviceInfo> {
        self.config.devices.iter().find(|d| d.name == name).cloned()
    }

    fn connect(&self, device: &DeviceInfo, events: EventSink) -> bool {
        if !self.config.devices.contains(device) {
            return false;
        }
        self.stop_worker();
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let interval = self.config.sample_interval;
        let base = self.config.base_heart_rate;
        let drop_after = self.config.drop_after;
        let name = device.name.clone();

        let handle = thread::spawn(move || {
            let mut signal = SyntheticSignal::new(base);
            let mut emitted = 0u64;
            while running.load(Ordering::SeqCst) {
                if drop_after.is_some_and(|limit| emitted >= limit) {
                    events.disconnected(name.clone());
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                let (hr, rr) = signal.next_sample();
                if !events.measurements(vec![Measurement::new(hr, rr)]) {
                    break;
                }
                emitted += 1;
                thread::sleep(interval);
            }
        });

        match self.worker.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        true
    }

    fn body_sensor_location(&self) -> Option<String> {
        self.config.body_location.clone()
    }

    fn disconnect(&self) {
        self.stop_worker();
    }
}

/// Slow oscillation around a base rate with a little deterministic jitter.
struct SyntheticSignal {
    base: f64,
    step: u64,
    seed: u64,
}

impl SyntheticSignal {
    fn new(base: f64) -> Self {
        Self {
            base,
            step: 0,
            seed: 0x2545_f491_4f6c_dd1d,
        }
    }

    fn next_sample(&mut self) -> (f64, f64) {
        // xorshift64
        self.seed ^= self.seed << 13;
        self.seed ^= self.seed >> 7;
        self.seed ^= self.seed << 17;
        let jitter = (self.seed % 1000) as f64 / 1000.0 - 0.5;

        let phase = self.step as f64 / 10.0;
        self.step += 1;

        let hr = (self.base + 5.0 * phase.sin() + 2.0 * jitter).max(30.0);
        let rr = 60_000.0 / hr;
        (hr.round(), rr.round())
    }
}
