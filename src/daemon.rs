//! Tracker daemon: startup policy and lifecycle around a sensor session.
//!
//! The host calls `start`/`stop` and forwards the device chooser's callbacks.
//! Control-path calls are serialized by the session slot's mutex, so the
//! state machine has a single driver apart from the forwarder's
//! `Connected -> Lost` transition.

use crate::config::Config;
use crate::core::{FlushError, SensorSession, SessionContext, SessionError, SessionState, StateCell};
use crate::sensor::{DeviceInfo, Transport};
use crate::store::{keys, BatchStorage, SettingsStore, StoreError};
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use crate::ui::{DeviceChooser, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// External collaborators supplied by the host process.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub settings: Arc<dyn SettingsStore>,
    pub storage: Arc<dyn BatchStorage>,
    pub chooser: Arc<dyn DeviceChooser>,
    pub notifier: Arc<dyn Notifier>,
}

/// Errors surfaced to the host.
#[derive(Debug)]
pub enum DaemonError {
    /// The transport could not open the device; the tracker is not running
    ConnectionFailed(String),
    /// A device was selected while no selection was pending
    NotSelecting(SessionState),
    /// The final flush on stop failed
    Flush(FlushError),
    /// A settings write failed
    Settings(StoreError),
    /// A blocking collaborator call panicked
    TaskFailed(String),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::ConnectionFailed(device) => write!(
                f,
                "Couldn't establish a connection to {device}! Tracker is not running."
            ),
            DaemonError::NotSelecting(state) => {
                write!(f, "No device selection pending (state: {state})")
            }
            DaemonError::Flush(e) => write!(f, "{e}"),
            DaemonError::Settings(e) => write!(f, "Settings error: {e}"),
            DaemonError::TaskFailed(e) => write!(f, "Background task failed: {e}"),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<SessionError> for DaemonError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::ConnectionFailed(device) => DaemonError::ConnectionFailed(device),
            SessionError::TaskFailed(e) => DaemonError::TaskFailed(e),
        }
    }
}

impl From<FlushError> for DaemonError {
    fn from(e: FlushError) -> Self {
        DaemonError::Flush(e)
    }
}

impl From<StoreError> for DaemonError {
    fn from(e: StoreError) -> Self {
        DaemonError::Settings(e)
    }
}

/// The heart-rate tracker.
pub struct Daemon {
    deps: Collaborators,
    flush_interval: Duration,
    notification_duration: Duration,
    log: SharedTransparencyLog,
    state: StateCell,
    session: Mutex<Option<SensorSession>>,
}

impl Daemon {
    pub fn new(config: &Config, deps: Collaborators) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            deps,
            flush_interval: config.flush_interval,
            notification_duration: config.notification_duration,
            log: create_shared_log(),
            state: Arc::new(state),
            session: Mutex::new(None),
        }
    }

    /// Use an existing (possibly persisted) transparency log.
    pub fn with_log(mut self, log: SharedTransparencyLog) -> Self {
        self.log = log;
        self
    }

    /// Whether the tracker is enabled in settings.
    ///
    /// A synchronous read for the host; the async paths go through the
    /// blocking pool instead.
    pub fn is_enabled(&self) -> bool {
        self.deps.settings.get_bool(keys::TRACKER_ENABLED, true)
    }

    /// Connected or lost.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SharedTransparencyLog {
        self.log.clone()
    }

    /// Start tracking according to the startup policy.
    ///
    /// A no-op while a selection, connection or session is already under way.
    pub async fn start(&self) -> Result<SessionState, DaemonError> {
        let mut slot = self.session.lock().await;

        let current = self.state();
        if current.is_active() {
            tracing::debug!(state = %current, "Start ignored, tracker already active");
            return Ok(current);
        }

        let enabled = self
            .with_settings(|settings| settings.get_bool(keys::TRACKER_ENABLED, true))
            .await?;
        if !enabled {
            tracing::info!("Tracker disabled in settings, not starting");
            self.set_state(SessionState::Idle);
            return Ok(SessionState::Idle);
        }

        let remembered = self
            .with_settings(|settings| settings.get_string(keys::HEARTRATE_TRACKER_ID, ""))
            .await?;
        if remembered.is_empty() {
            tracing::info!("No remembered heart-rate sensor");
            return Ok(self.begin_selection());
        }

        let transport = self.deps.transport.clone();
        let name = remembered.clone();
        let found = tokio::task::spawn_blocking(move || transport.find_device_by_identity(&name))
            .await
            .map_err(|e| DaemonError::TaskFailed(e.to_string()))?;

        match found {
            Some(device) => self.connect(&mut slot, device).await,
            None => {
                tracing::info!("Remembered sensor {remembered} not reachable");
                Ok(self.begin_selection())
            }
        }
    }

    /// Chooser callback: the operator picked `device`.
    pub async fn on_device_selected(
        &self,
        device: DeviceInfo,
    ) -> Result<SessionState, DaemonError> {
        let mut slot = self.session.lock().await;

        let current = self.state();
        if current != SessionState::Selecting {
            return Err(DaemonError::NotSelecting(current));
        }

        self.deps.chooser.close();
        let name = device.name.clone();
        let remembered = self
            .with_settings(move |settings| settings.set_string(keys::HEARTRATE_TRACKER_ID, &name))
            .await?;
        if let Err(e) = remembered {
            tracing::warn!("Could not remember selected sensor: {e}");
        }

        self.connect(&mut slot, device).await
    }

    /// Chooser callback: the operator closed the chooser without a choice.
    pub async fn on_selection_cancelled(&self) {
        let _slot = self.session.lock().await;
        if self.state() == SessionState::Selecting {
            self.deps.chooser.close();
            self.set_state(SessionState::Idle);
            tracing::info!("Sensor selection cancelled");
        }
    }

    /// Disable the tracker: close the chooser, stop any session and persist
    /// the disabled flag.
    pub async fn disable_tracker(&self) -> Result<(), DaemonError> {
        let stopped = self.stop().await;
        self.with_settings(|settings| settings.set_bool(keys::TRACKER_ENABLED, false))
            .await??;
        tracing::info!("Tracker disabled");
        stopped.map(|_| ())
    }

    /// Stop tracking.
    ///
    /// Unsubscribes from the transport, performs the final flush and releases
    /// the transport. Returns the number of measurements the final flush
    /// wrote; a failed final flush is returned as an error.
    pub async fn stop(&self) -> Result<usize, DaemonError> {
        let mut slot = self.session.lock().await;

        let Some(session) = slot.take() else {
            if self.state() == SessionState::Selecting {
                self.deps.chooser.close();
                self.set_state(SessionState::Idle);
            }
            return Ok(0);
        };

        let flushed = session.close().await;
        self.set_state(SessionState::Stopped);
        Ok(flushed?)
    }

    fn begin_selection(&self) -> SessionState {
        self.set_state(SessionState::Selecting);
        self.deps.chooser.show();
        SessionState::Selecting
    }

    async fn connect(
        &self,
        slot: &mut Option<SensorSession>,
        device: DeviceInfo,
    ) -> Result<SessionState, DaemonError> {
        self.set_state(SessionState::Connecting);
        tracing::info!(device = %device.name, "Connecting to heart-rate sensor");

        match SensorSession::open(&self.session_context(), device, self.state.clone()).await {
            Ok(session) => {
                *slot = Some(session);
                Ok(self.state())
            }
            Err(e) => {
                tracing::warn!("{e}. Tracker is not running.");
                self.set_state(SessionState::Idle);
                Err(e.into())
            }
        }
    }

    /// Run a settings call on the blocking pool.
    async fn with_settings<R, F>(&self, f: F) -> Result<R, DaemonError>
    where
        F: FnOnce(&dyn SettingsStore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let settings = self.deps.settings.clone();
        tokio::task::spawn_blocking(move || f(settings.as_ref()))
            .await
            .map_err(|e| DaemonError::TaskFailed(e.to_string()))
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            transport: self.deps.transport.clone(),
            settings: self.deps.settings.clone(),
            storage: self.deps.storage.clone(),
            notifier: self.deps.notifier.clone(),
            log: self.log.clone(),
            flush_interval: self.flush_interval,
            notification_duration: self.notification_duration,
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Tracker state changed");
        }
    }
}
