//! Integration tests for the tracker daemon lifecycle

use biometrics_tracker::{
    config::Config,
    sensor::{DeviceInfo, EventSink, Measurement, Transport},
    store::{keys, MemoryBatchStorage, MemorySettingsStore, SettingsStore, StoreError},
    ui::{DeviceChooser, Notifier},
    Collaborators, Daemon, DaemonError, SessionState,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport whose reachable devices and behavior are set by the test.
#[derive(Default)]
struct FakeTransport {
    reachable: Mutex<Vec<DeviceInfo>>,
    refuse_connect: AtomicBool,
    location: Mutex<Option<String>>,
    sink: Mutex<Option<EventSink>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    fn with_device(name: &str) -> Self {
        let transport = Self::default();
        transport
            .reachable
            .lock()
            .unwrap()
            .push(DeviceInfo::new(name, "c0:ff:ee"));
        transport
    }

    fn sink(&self) -> EventSink {
        self.sink.lock().unwrap().clone().expect("transport not connected")
    }
}

impl Transport for FakeTransport {
    fn find_device_by_identity(&self, name: &str) -> Option<DeviceInfo> {
        self.reachable
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    fn connect(&self, _device: &DeviceInfo, events: EventSink) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return false;
        }
        *self.sink.lock().unwrap() = Some(events);
        true
    }

    fn body_sensor_location(&self) -> Option<String> {
        self.location.lock().unwrap().clone()
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeChooser {
    shown: AtomicUsize,
    open: AtomicBool,
}

impl DeviceChooser for FakeChooser {
    fn show(&self) {
        self.shown.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeNotifier {
    lost: Mutex<Vec<(String, Duration)>>,
}

impl Notifier for FakeNotifier {
    fn connection_lost(&self, device_name: &str, display_duration: Duration) {
        self.lost
            .lock()
            .unwrap()
            .push((device_name.to_string(), display_duration));
    }
}

struct Harness {
    daemon: Daemon,
    transport: Arc<FakeTransport>,
    settings: Arc<MemorySettingsStore>,
    storage: Arc<MemoryBatchStorage>,
    chooser: Arc<FakeChooser>,
    notifier: Arc<FakeNotifier>,
}

fn harness(transport: FakeTransport, flush_interval: Duration) -> Harness {
    let transport = Arc::new(transport);
    let settings = Arc::new(MemorySettingsStore::new());
    let storage = Arc::new(MemoryBatchStorage::new());
    let chooser = Arc::new(FakeChooser::default());
    let notifier = Arc::new(FakeNotifier::default());

    let config = Config {
        flush_interval,
        ..Config::default()
    };
    let daemon = Daemon::new(
        &config,
        Collaborators {
            transport: transport.clone(),
            settings: settings.clone(),
            storage: storage.clone(),
            chooser: chooser.clone(),
            notifier: notifier.clone(),
        },
    );

    Harness {
        daemon,
        transport,
        settings,
        storage,
        chooser,
        notifier,
    }
}

/// Harness with a remembered, reachable sensor and a long flush interval.
fn remembered_harness() -> Harness {
    let h = harness(
        FakeTransport::with_device("Polar H7"),
        Duration::from_secs(3600),
    );
    h.settings
        .set_string(keys::HEARTRATE_TRACKER_ID, "Polar H7")
        .unwrap();
    h
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn samples(rr: &[f64]) -> Vec<Measurement> {
    rr.iter().map(|&rr| Measurement::new(60_000.0 / rr, rr)).collect()
}

#[tokio::test]
async fn test_disabled_tracker_does_nothing() {
    let h = remembered_harness();
    h.settings.set_bool(keys::TRACKER_ENABLED, false).unwrap();

    assert!(!h.daemon.is_enabled());
    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Idle);
    assert!(!h.daemon.is_running());
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 0);
    assert_eq!(h.chooser.shown.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_remembered_sensor_opens_chooser() {
    let h = harness(FakeTransport::with_device("Polar H7"), Duration::from_secs(3600));

    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Selecting);
    assert!(h.chooser.open.load(Ordering::SeqCst));
    assert!(!h.daemon.is_running());
}

#[tokio::test]
async fn test_unreachable_remembered_sensor_falls_back_to_chooser() {
    let h = harness(FakeTransport::default(), Duration::from_secs(3600));
    h.settings
        .set_string(keys::HEARTRATE_TRACKER_ID, "Polar H7")
        .unwrap();

    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Selecting);
    assert_eq!(h.chooser.shown.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remembered_sensor_connects_and_records_location() {
    let h = remembered_harness();
    *h.transport.location.lock().unwrap() = Some("Chest".to_string());

    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Connected);
    assert!(h.daemon.is_running());
    assert_eq!(
        h.settings.get_string(keys::HEARTRATE_TRACKER_LOCATION, ""),
        "Chest"
    );

    h.daemon.stop().await.unwrap();
    assert_eq!(h.daemon.state(), SessionState::Stopped);
    assert!(!h.daemon.is_running());
}

#[tokio::test]
async fn test_missing_location_stores_sentinel() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();

    assert_eq!(
        h.settings.get_string(keys::HEARTRATE_TRACKER_LOCATION, ""),
        keys::LOCATION_UNKNOWN
    );
    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_connection_failure_is_not_retried() {
    let h = remembered_harness();
    h.transport.refuse_connect.store(true, Ordering::SeqCst);

    let result = h.daemon.start().await;
    assert!(matches!(result, Err(DaemonError::ConnectionFailed(ref d)) if d == "Polar H7"));
    assert_eq!(h.daemon.state(), SessionState::Idle);
    assert!(!h.daemon.is_running());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();
    let first_sink = h.transport.sink();

    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Connected);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);

    // Still the original subscription, and it is delivered exactly once
    assert!(!first_sink.is_closed());
    first_sink.measurements(samples(&[800.0]));
    wait_for(|| h.daemon.stats().stats().measurements_received == 1).await;
    assert_eq!(h.daemon.stop().await.unwrap(), 1);
    assert_eq!(h.storage.measurements().len(), 1);
}

#[tokio::test]
async fn test_start_while_selecting_keeps_single_chooser() {
    let h = harness(FakeTransport::with_device("Polar H7"), Duration::from_secs(3600));

    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Selecting);
    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Selecting);
    assert_eq!(h.chooser.shown.load(Ordering::SeqCst), 1);
    assert!(h.chooser.open.load(Ordering::SeqCst));
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_device_selection_persists_identity_and_connects() {
    let h = harness(FakeTransport::with_device("Polar H7"), Duration::from_secs(3600));
    h.daemon.start().await.unwrap();

    let device = h.transport.find_device_by_identity("Polar H7").unwrap();
    assert_eq!(
        h.daemon.on_device_selected(device).await.unwrap(),
        SessionState::Connected
    );
    assert!(!h.chooser.open.load(Ordering::SeqCst));
    assert_eq!(
        h.settings.get_string(keys::HEARTRATE_TRACKER_ID, ""),
        "Polar H7"
    );

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_selection_outside_selecting_is_rejected() {
    let h = harness(FakeTransport::with_device("Polar H7"), Duration::from_secs(3600));
    let device = DeviceInfo::new("Polar H7", "c0:ff:ee");

    assert!(matches!(
        h.daemon.on_device_selected(device).await,
        Err(DaemonError::NotSelecting(SessionState::Idle))
    ));
}

#[tokio::test]
async fn test_cancelled_selection_returns_to_idle() {
    let h = harness(FakeTransport::default(), Duration::from_secs(3600));
    h.daemon.start().await.unwrap();

    h.daemon.on_selection_cancelled().await;
    assert_eq!(h.daemon.state(), SessionState::Idle);
    assert!(!h.chooser.open.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_while_selecting_closes_chooser() {
    let h = harness(FakeTransport::default(), Duration::from_secs(3600));
    h.daemon.start().await.unwrap();

    assert_eq!(h.daemon.stop().await.unwrap(), 0);
    assert_eq!(h.daemon.state(), SessionState::Idle);
    assert!(!h.chooser.open.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_duplicate_disconnect_notifies_once() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();
    let sink = h.transport.sink();

    sink.disconnected("Polar H7");
    wait_for(|| h.daemon.state() == SessionState::Lost).await;
    wait_for(|| h.notifier.lost.lock().unwrap().len() == 1).await;
    assert!(h.daemon.is_running());

    sink.disconnected("Polar H7");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let lost = h.notifier.lost.lock().unwrap().clone();
    assert_eq!(lost, vec![("Polar H7".to_string(), Duration::from_secs(60))]);
    assert_eq!(h.daemon.stats().stats().disconnects_notified, 1);

    // No automatic reconnect; start leaves the lost session alone
    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Lost);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);

    h.daemon.stop().await.unwrap();
    assert_eq!(h.daemon.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_restart_after_stop_notifies_again() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();
    h.transport.sink().disconnected("Polar H7");
    wait_for(|| h.notifier.lost.lock().unwrap().len() == 1).await;
    h.daemon.stop().await.unwrap();

    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Connected);
    h.transport.sink().disconnected("Polar H7");
    wait_for(|| h.notifier.lost.lock().unwrap().len() == 2).await;

    h.daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_flushes_exactly_buffered_measurements() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();
    let sink = h.transport.sink();

    sink.measurements(samples(&[800.0, 810.0, 780.0, 790.0, 805.0]));
    wait_for(|| h.daemon.stats().stats().measurements_received == 5).await;

    assert_eq!(h.daemon.stop().await.unwrap(), 5);
    assert!(!sink.measurements(samples(&[900.0])));

    let stored = h.storage.measurements();
    let rr: Vec<f64> = stored.iter().map(|m| m.rr_interval).collect();
    assert_eq!(rr, vec![800.0, 810.0, 780.0, 790.0, 805.0]);
    assert_eq!(h.storage.batches().len(), 1);
    assert_eq!(h.transport.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_keeps_measurements_delivered_just_before() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();
    let sink = h.transport.sink();

    for rr in [800.0, 810.0, 780.0, 790.0, 805.0] {
        assert!(sink.measurements(samples(&[rr])));
    }
    assert_eq!(h.daemon.stop().await.unwrap(), 5);
    assert!(sink.is_closed());

    let rr: Vec<f64> = h.storage.measurements().iter().map(|m| m.rr_interval).collect();
    assert_eq!(rr, vec![800.0, 810.0, 780.0, 790.0, 805.0]);
    assert_eq!(h.daemon.stats().stats().measurements_received, 5);
}

#[tokio::test]
async fn test_periodic_flush_computes_rr_differences_across_batches() {
    let h = harness(FakeTransport::with_device("Polar H7"), Duration::from_millis(30));
    h.settings
        .set_string(keys::HEARTRATE_TRACKER_ID, "Polar H7")
        .unwrap();
    h.daemon.start().await.unwrap();
    let sink = h.transport.sink();

    sink.measurements(samples(&[800.0, 810.0, 780.0]));
    wait_for(|| h.storage.measurements().len() == 3).await;
    sink.measurements(samples(&[800.0]));
    wait_for(|| h.storage.measurements().len() == 4).await;
    h.daemon.stop().await.unwrap();

    let diffs: Vec<Option<f64>> = h
        .storage
        .measurements()
        .iter()
        .map(|m| m.rr_difference())
        .collect();
    assert_eq!(diffs, vec![None, Some(10.0), Some(30.0), Some(20.0)]);
    assert!(h.storage.batches().len() >= 2);
}

#[tokio::test]
async fn test_failed_write_drops_batch_without_retry() {
    let h = harness(FakeTransport::with_device("Polar H7"), Duration::from_millis(30));
    h.settings
        .set_string(keys::HEARTRATE_TRACKER_ID, "Polar H7")
        .unwrap();
    h.daemon.start().await.unwrap();
    let sink = h.transport.sink();

    h.storage.set_failing(true);
    sink.measurements(samples(&[800.0, 810.0]));
    wait_for(|| h.daemon.stats().stats().measurements_lost == 2).await;
    h.storage.set_failing(false);

    // The failed batch is gone; the final flush has nothing left to write
    assert_eq!(h.daemon.stop().await.unwrap(), 0);
    assert!(h.storage.measurements().is_empty());
    assert_eq!(h.daemon.stats().stats().measurements_lost, 2);
}

#[tokio::test]
async fn test_failed_final_flush_is_reported_to_stop() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();
    h.transport.sink().measurements(samples(&[800.0]));
    wait_for(|| h.daemon.stats().stats().measurements_received == 1).await;

    h.storage.set_failing(true);
    assert!(matches!(h.daemon.stop().await, Err(DaemonError::Flush(_))));
    assert_eq!(h.daemon.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_disable_tracker_stops_and_persists_flag() {
    let h = remembered_harness();
    h.daemon.start().await.unwrap();

    h.daemon.disable_tracker().await.unwrap();
    assert!(!h.daemon.is_enabled());
    assert!(!h.daemon.is_running());
    assert_eq!(h.daemon.start().await.unwrap(), SessionState::Idle);
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let h = remembered_harness();
    let mut states = h.daemon.subscribe_state();

    h.daemon.start().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::Connected);

    h.transport.sink().disconnected("Polar H7");
    tokio::time::timeout(Duration::from_secs(2), states.changed())
        .await
        .expect("no state change")
        .unwrap();
    assert_eq!(*states.borrow(), SessionState::Lost);

    h.daemon.stop().await.unwrap();
}

/// Settings store that remembers which threads touched it.
#[derive(Default)]
struct ThreadRecordingSettings {
    inner: MemorySettingsStore,
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl ThreadRecordingSettings {
    fn record(&self) {
        self.threads.lock().unwrap().push(std::thread::current().id());
    }
}

impl SettingsStore for ThreadRecordingSettings {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.record();
        self.inner.get_bool(key, default)
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.record();
        self.inner.get_string(key, default)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.record();
        self.inner.set_bool(key, value)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.record();
        self.inner.set_string(key, value)
    }
}

#[tokio::test]
async fn test_settings_calls_stay_off_the_runtime_thread() {
    let settings = Arc::new(ThreadRecordingSettings::default());
    let chooser = Arc::new(FakeChooser::default());
    let daemon = Daemon::new(
        &Config {
            flush_interval: Duration::from_secs(3600),
            ..Config::default()
        },
        Collaborators {
            transport: Arc::new(FakeTransport::with_device("Polar H7")),
            settings: settings.clone(),
            storage: Arc::new(MemoryBatchStorage::new()),
            chooser: chooser.clone(),
            notifier: Arc::new(FakeNotifier::default()),
        },
    );

    assert_eq!(daemon.start().await.unwrap(), SessionState::Selecting);
    daemon
        .on_device_selected(DeviceInfo::new("Polar H7", "c0:ff:ee"))
        .await
        .unwrap();
    daemon.disable_tracker().await.unwrap();

    // The current-thread runtime drives the daemon on this thread
    let runtime_thread = std::thread::current().id();
    let threads = settings.threads.lock().unwrap().clone();
    assert!(threads.len() >= 4);
    assert!(threads.iter().all(|id| *id != runtime_thread));
    assert_eq!(
        settings.inner.get_string(keys::HEARTRATE_TRACKER_ID, ""),
        "Polar H7"
    );
    assert!(!settings.inner.get_bool(keys::TRACKER_ENABLED, true));
}
