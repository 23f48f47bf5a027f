//! One connection lifetime with a heart-rate sensor.
//!
//! Opening a session connects the transport, records the body location,
//! starts the flush loop and spawns the event forwarder. The forwarder is
//! the only task that sees transport events: it feeds measurements into the
//! session's buffer and turns the first disconnect into a notification.
//! Closing reverses this in an order that guarantees no measurement arrives
//! after the final flush has started.

use crate::core::buffer::MeasurementBuffer;
use crate::core::scheduler::{FlushError, FlushTarget, PersistenceScheduler};
use crate::sensor::{DeviceInfo, EventSink, EventStream, Measurement, Transport, TransportEvent};
use crate::store::{keys, BatchStorage, SettingsStore};
use crate::transparency::SharedTransparencyLog;
use crate::ui::Notifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Connection state of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing happening
    Idle,
    /// Waiting for the operator to pick a sensor
    Selecting,
    /// Opening a session with a sensor
    Connecting,
    /// Receiving measurements
    Connected,
    /// The transport reported a disconnect; waiting for an explicit stop
    Lost,
    /// Torn down by an explicit stop
    Stopped,
}

impl SessionState {
    /// Connected or lost: a session exists and its flush loop is running.
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Lost)
    }

    /// Any state in which `start` has nothing to do.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Selecting
                | SessionState::Connecting
                | SessionState::Connected
                | SessionState::Lost
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Selecting => "selecting",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Lost => "lost",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared state cell, written by the control path and the forwarder.
pub type StateCell = Arc<watch::Sender<SessionState>>;

/// Errors while opening a session.
#[derive(Debug)]
pub enum SessionError {
    /// The transport could not open the device
    ConnectionFailed(String),
    /// A blocking transport call panicked
    TaskFailed(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::ConnectionFailed(device) => {
                write!(f, "Couldn't establish a connection to {device}")
            }
            SessionError::TaskFailed(e) => write!(f, "Transport task failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Collaborators and settings a session is opened with.
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub settings: Arc<dyn SettingsStore>,
    pub storage: Arc<dyn BatchStorage>,
    pub notifier: Arc<dyn Notifier>,
    pub log: SharedTransparencyLog,
    pub flush_interval: Duration,
    pub notification_duration: Duration,
}

/// A live session with one sensor.
pub struct SensorSession {
    id: Uuid,
    device: DeviceInfo,
    transport: Arc<dyn Transport>,
    buffer: Arc<MeasurementBuffer>,
    scheduler: PersistenceScheduler,
    stop_forwarder: oneshot::Sender<()>,
    forwarder: JoinHandle<()>,
}

impl SensorSession {
    /// Connect to `device` and bring the session up.
    ///
    /// On success `state` is `Connected` before any transport event is
    /// processed. On failure nothing is left running.
    pub async fn open(
        ctx: &SessionContext,
        device: DeviceInfo,
        state: StateCell,
    ) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", %id, device = %device.name);

        let (sink, events) = EventSink::channel();
        let connected = {
            let transport = ctx.transport.clone();
            let device = device.clone();
            tokio::task::spawn_blocking(move || transport.connect(&device, sink))
                .await
                .map_err(|e| SessionError::TaskFailed(e.to_string()))?
        };
        if !connected {
            return Err(SessionError::ConnectionFailed(device.name));
        }
        span.in_scope(|| tracing::info!("Connection established"));

        record_body_location(ctx)
            .instrument(span.clone())
            .await;

        // A fresh buffer per session, so RR differences restart here
        let buffer = Arc::new(MeasurementBuffer::new());
        let scheduler = PersistenceScheduler::start(
            FlushTarget {
                buffer: buffer.clone(),
                storage: ctx.storage.clone(),
                log: ctx.log.clone(),
            },
            ctx.flush_interval,
        );

        state.send_replace(SessionState::Connected);

        let (stop_forwarder, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(
            forward_events(
                events,
                stop_rx,
                Forwarder {
                    buffer: buffer.clone(),
                    notifier: ctx.notifier.clone(),
                    log: ctx.log.clone(),
                    state,
                    notification_duration: ctx.notification_duration,
                    notified: false,
                },
            )
            .instrument(span),
        );

        Ok(Self {
            id,
            device,
            transport: ctx.transport.clone(),
            buffer,
            scheduler,
            stop_forwarder,
            forwarder,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Measurements waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Tear the session down: unsubscribe, final flush, release transport.
    ///
    /// Returns the number of measurements written by the final flush.
    pub async fn close(self) -> Result<usize, FlushError> {
        let _ = self.stop_forwarder.send(());
        if let Err(e) = self.forwarder.await {
            tracing::warn!(session = %self.id, "Event forwarder ended abnormally: {e}");
        }

        let flushed = self.scheduler.shutdown().await;

        let transport = self.transport.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || transport.disconnect()).await {
            tracing::warn!(session = %self.id, "Transport disconnect failed: {e}");
        }

        match &flushed {
            Ok(count) => tracing::info!(session = %self.id, count, "Session closed"),
            Err(e) => tracing::error!(session = %self.id, error = %e, "Final flush failed"),
        }
        flushed
    }
}

/// Query the body sensor location once and remember it.
async fn record_body_location(ctx: &SessionContext) {
    let transport = ctx.transport.clone();
    let settings = ctx.settings.clone();

    let result = tokio::task::spawn_blocking(move || {
        let location = transport
            .body_sensor_location()
            .filter(|l| !l.trim().is_empty());
        let stored = location.as_deref().unwrap_or(keys::LOCATION_UNKNOWN);
        if let Err(e) = settings.set_string(keys::HEARTRATE_TRACKER_LOCATION, stored) {
            tracing::warn!("Could not store body sensor location: {e}");
        }
        location
    })
    .await;

    match result {
        Ok(Some(location)) => tracing::info!("Body sensor location: {location}"),
        Ok(None) => tracing::info!("Body sensor location unknown"),
        Err(e) => tracing::warn!("Body sensor location query failed: {e}"),
    }
}

struct Forwarder {
    buffer: Arc<MeasurementBuffer>,
    notifier: Arc<dyn Notifier>,
    log: SharedTransparencyLog,
    state: StateCell,
    notification_duration: Duration,
    /// Set after the first disconnect notification of this session
    notified: bool,
}

impl Forwarder {
    fn buffer_batch(&self, batch: Vec<Measurement>) {
        self.log.record_measurements_received(batch.len() as u64);
        self.buffer.enqueue_all(batch);
    }

    fn connection_lost(&mut self, device_name: &str) {
        self.state.send_if_modified(|s| {
            if *s == SessionState::Connected {
                *s = SessionState::Lost;
                true
            } else {
                false
            }
        });
        if self.notified {
            tracing::debug!("Duplicate disconnect from {device_name} ignored");
            return;
        }
        self.notified = true;
        tracing::warn!("Connection lost to {device_name}");
        self.notifier
            .connection_lost(device_name, self.notification_duration);
        self.log.record_disconnect_notified();
    }

    /// Revoke the sink and buffer whatever the transport delivered before
    /// that point, so the final flush sees it.
    fn drain_remaining(&self, events: &mut EventStream) {
        events.close();
        let mut late = 0usize;
        while let Ok(event) = events.try_recv() {
            match event {
                TransportEvent::Measurements(batch) => {
                    late += batch.len();
                    self.buffer_batch(batch);
                }
                TransportEvent::Disconnected(device_name) => {
                    tracing::debug!("Disconnect from {device_name} during shutdown ignored");
                }
            }
        }
        if late > 0 {
            tracing::debug!(count = late, "Buffered measurements delivered before stop");
        }
    }
}

/// Route transport events until stopped or the transport drops its sink.
///
/// The "already notified" flag lives in the forwarder, so each new session
/// starts with it cleared and only this task ever touches it. On stop the
/// sink is closed first and events already queued are still buffered.
async fn forward_events(
    mut events: EventStream,
    mut stop: oneshot::Receiver<()>,
    mut fwd: Forwarder,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                fwd.drain_remaining(&mut events);
                break;
            }
            event = events.recv() => match event {
                Some(TransportEvent::Measurements(batch)) => fwd.buffer_batch(batch),
                Some(TransportEvent::Disconnected(device_name)) => {
                    fwd.connection_lost(&device_name);
                }
                None => {
                    tracing::debug!("Transport closed its event sink");
                    break;
                }
            }
        }
    }
}
