//! Operator-facing collaborators: the device chooser and the disconnect
//! notification.
//!
//! Both are owned by the host. The adapters here only log, which is what the
//! headless binary needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Lets the operator pick a sensor when none is remembered.
///
/// Once the operator chooses, the host calls
/// [`Daemon::on_device_selected`](crate::Daemon::on_device_selected).
pub trait DeviceChooser: Send + Sync {
    fn show(&self);
    fn close(&self);
}

/// Raises user-visible notifications.
pub trait Notifier: Send + Sync {
    /// The link to `device_name` dropped. Shown for `display_duration`.
    fn connection_lost(&self, device_name: &str, display_duration: Duration);
}

/// Chooser for headless hosts: logs that a selection is required.
#[derive(Debug, Default)]
pub struct LogChooser {
    open: AtomicBool,
}

impl LogChooser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl DeviceChooser for LogChooser {
    fn show(&self) {
        self.open.store(true, Ordering::SeqCst);
        tracing::warn!("No heart-rate sensor selected; waiting for operator to choose one");
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Notifier that writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn connection_lost(&self, device_name: &str, display_duration: Duration) {
        tracing::warn!(
            device = device_name,
            display_secs = display_duration.as_secs(),
            "Connection lost! Lost the connection to: {device_name}"
        );
    }
}
