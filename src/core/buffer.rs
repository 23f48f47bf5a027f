//! Thread-safe buffer between the sensor event path and the flush loop.
//!
//! Enqueues go through a lock-free unbounded channel and never block. Drains
//! are serialized by a mutex that also owns the running "previous RR" value,
//! so the RR difference is only ever computed on the single exclusive drain
//! path.

use crate::sensor::Measurement;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

/// State touched only while holding the drain lock.
#[derive(Debug, Default)]
struct DrainState {
    /// RR interval of the most recently drained sample in this session
    previous_rr: Option<f64>,
}

/// Pending measurements for one sensor session.
#[derive(Debug)]
pub struct MeasurementBuffer {
    sender: Sender<Measurement>,
    receiver: Receiver<Measurement>,
    drain: Mutex<DrainState>,
}

impl MeasurementBuffer {
    /// Create an empty buffer for a fresh session.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            drain: Mutex::new(DrainState::default()),
        }
    }

    /// Append a measurement to the tail.
    pub fn enqueue(&self, measurement: Measurement) {
        // The buffer owns the receiver, so the channel cannot be disconnected
        let _ = self.sender.send(measurement);
    }

    /// Append a transport batch, preserving its order.
    pub fn enqueue_all(&self, batch: impl IntoIterator<Item = Measurement>) {
        for measurement in batch {
            self.enqueue(measurement);
        }
    }

    /// Remove and return everything queued when the drain began, oldest first.
    ///
    /// Each returned measurement gets its RR difference relative to the
    /// previously drained one, which may come from an earlier drain.
    /// Measurements enqueued while the drain runs stay for the next one.
    pub fn drain_all(&self) -> Vec<Measurement> {
        let mut state = self.drain.lock().unwrap_or_else(|p| p.into_inner());

        let pending = self.receiver.len();
        let mut drained = Vec::with_capacity(pending);
        for mut measurement in self.receiver.try_iter().take(pending) {
            let difference = state
                .previous_rr
                .map(|previous| (measurement.rr_interval - previous).abs());
            measurement.set_rr_difference(difference);
            state.previous_rr = Some(measurement.rr_interval);
            drained.push(measurement);
        }
        drained
    }

    /// Forget the previous RR value so the next drained sample starts a new
    /// series. Called when a session (re)connects.
    pub fn reset_session(&self) {
        self.drain
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .previous_rr = None;
    }

    /// Number of measurements currently waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for MeasurementBuffer {
    fn default() -> Self {
        Self::new()
    }
}
