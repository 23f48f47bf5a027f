//! Transport port: how the tracker talks to the wireless sensor stack.
//!
//! The transport is an opaque collaborator. Calls on it may block for a
//! noticeable amount of time, so the daemon always runs them on the blocking
//! pool. Events flow back through an [`EventSink`] handed over at connect
//! time; dropping the matching [`EventStream`] revokes the subscription.

use crate::sensor::types::{DeviceInfo, Measurement};
use tokio::sync::mpsc;

/// Asynchronous events emitted by a connected transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One notification's worth of samples, in delivery order
    Measurements(Vec<Measurement>),
    /// The link to the named device dropped
    Disconnected(String),
}

/// Receiving half of a session's event subscription.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of a session's event subscription.
///
/// Cloneable and callable from any thread. Sends never block; once the
/// session unsubscribes every send returns `false`.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Create a connected sink/stream pair.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a batch of measurements.
    pub fn measurements(&self, batch: Vec<Measurement>) -> bool {
        self.tx.send(TransportEvent::Measurements(batch)).is_ok()
    }

    /// Report that the link to `device_name` was lost.
    pub fn disconnected(&self, device_name: impl Into<String>) -> bool {
        self.tx
            .send(TransportEvent::Disconnected(device_name.into()))
            .is_ok()
    }

    /// Whether the session has unsubscribed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The wireless stack as seen by the tracker.
pub trait Transport: Send + Sync {
    /// Look up a reachable device by its remembered identity.
    fn find_device_by_identity(&self, name: &str) -> Option<DeviceInfo>;

    /// Open a session with `device`. On success the transport keeps `events`
    /// and reports measurements and disconnects through it.
    fn connect(&self, device: &DeviceInfo, events: EventSink) -> bool;

    /// Query where on the body the connected sensor is worn.
    fn body_sensor_location(&self) -> Option<String>;

    /// Release the current session.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_reports_closed_after_stream_dropped() {
        let (sink, stream) = EventSink::channel();
        assert!(sink.measurements(vec![Measurement::new(60.0, 1000.0)]));
        assert!(!sink.is_closed());

        drop(stream);
        assert!(sink.is_closed());
        assert!(!sink.disconnected("Polar H7"));
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, mut stream) = EventSink::channel();
        sink.measurements(vec![Measurement::new(60.0, 1000.0)]);
        sink.disconnected("Polar H7");

        assert!(matches!(
            stream.try_recv(),
            Ok(TransportEvent::Measurements(batch)) if batch.len() == 1
        ));
        assert_eq!(
            stream.try_recv().ok(),
            Some(TransportEvent::Disconnected("Polar H7".to_string()))
        );
    }
}
