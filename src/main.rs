//! Biometrics Tracker CLI
//!
//! Heart-rate sensor ingestion daemon.

use biometrics_tracker::{
    config::Config,
    sensor::{SimulatedConfig, SimulatedTransport, Transport},
    store::{keys, JsonSettingsStore, JsonlBatchStorage, SettingsStore},
    transparency::{create_shared_log_with_persistence, PersistedStats},
    ui::{LogChooser, LogNotifier},
    Collaborators, Daemon, SessionState, VERSION,
};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biometrics-tracker")]
#[command(version = VERSION)]
#[command(about = "Heart-rate sensor ingestion daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the sensor and start recording
    Start {
        /// Sensor to use when none is remembered or the remembered one is unreachable
        #[arg(long)]
        device: Option<String>,

        /// Flush interval in seconds (overrides the configuration)
        #[arg(long)]
        flush_interval: Option<u64>,

        /// Make the simulated sensor drop the link after this many samples
        #[arg(long)]
        drop_after: Option<u64>,
    },

    /// Show tracker settings and cumulative statistics
    Status,

    /// Enable the tracker
    Enable,

    /// Disable the tracker
    Disable,

    /// Forget the remembered sensor
    Forget,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            device,
            flush_interval,
            drop_after,
        } => {
            cmd_start(device, flush_interval, drop_after);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Enable => {
            cmd_set_enabled(true);
        }
        Commands::Disable => {
            cmd_set_enabled(false);
        }
        Commands::Forget => {
            cmd_forget();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn load_config() -> Config {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load configuration, using defaults: {e}");
            Config::default()
        }
    };
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    config
}

fn open_settings(config: &Config) -> JsonSettingsStore {
    match JsonSettingsStore::open(config.settings_path()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: Could not open settings {:?}: {e}", config.settings_path());
            std::process::exit(1);
        }
    }
}

fn cmd_start(device: Option<String>, flush_interval: Option<u64>, drop_after: Option<u64>) {
    println!("Biometrics Tracker v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(secs) = flush_interval {
        config.flush_interval = Duration::from_secs(secs);
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let transport = Arc::new(SimulatedTransport::new(SimulatedConfig {
        drop_after,
        ..SimulatedConfig::default()
    }));
    let storage = Arc::new(JsonlBatchStorage::new(config.measurements_path()));
    let log = create_shared_log_with_persistence(config.stats_path());

    let daemon = Daemon::new(
        &config,
        Collaborators {
            transport: transport.clone(),
            settings: Arc::new(open_settings(&config)),
            storage: storage.clone(),
            chooser: Arc::new(LogChooser::new()),
            notifier: Arc::new(LogNotifier),
        },
    )
    .with_log(log.clone());

    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Measurements: {:?}", storage.path());
    println!();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Could not start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    runtime.block_on(async move {
        let mut state = match daemon.start().await {
            Ok(state) => state,
            Err(e) => {
                eprintln!("Error: {e}");
                return;
            }
        };

        if state == SessionState::Selecting {
            let Some(name) = device else {
                println!("No sensor selected. Reachable sensors:");
                for name in transport.device_names() {
                    println!("  {name}");
                }
                println!();
                println!("Run again with --device <NAME> to choose one.");
                daemon.on_selection_cancelled().await;
                return;
            };
            let Some(info) = transport.find_device_by_identity(&name) else {
                eprintln!("Error: Sensor '{name}' is not reachable");
                daemon.on_selection_cancelled().await;
                return;
            };
            state = match daemon.on_device_selected(info).await {
                Ok(state) => state,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return;
                }
            };
        }

        if !state.is_running() {
            println!("Tracker is not running (state: {state}).");
            return;
        }

        println!("Recording. Press Ctrl+C to stop");
        println!();

        let mut states = daemon.subscribe_state();
        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                changed = states.changed() => {
                    if changed.is_ok() && *states.borrow() == SessionState::Lost {
                        println!("Sensor connection lost. Press Ctrl+C to stop and save.");
                    }
                }
            }
        }

        println!();
        println!("Stopping tracker...");
        match daemon.stop().await {
            Ok(count) => println!("Saved {count} remaining measurements."),
            Err(e) => eprintln!("Error during final save: {e}"),
        }
    });

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save tracker stats: {e}");
    }

    println!();
    println!("{}", log.summary());
}

fn cmd_status() {
    let config = load_config();
    let settings = open_settings(&config);

    println!("Biometrics Tracker Status");
    println!("=========================");
    println!();

    let remembered = settings.get_string(keys::HEARTRATE_TRACKER_ID, "");
    println!("Settings:");
    println!(
        "  Tracker: {}",
        if settings.get_bool(keys::TRACKER_ENABLED, true) {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Sensor: {}",
        if remembered.is_empty() {
            "(none)"
        } else {
            remembered.as_str()
        }
    );
    println!(
        "  Body location: {}",
        settings.get_string(keys::HEARTRATE_TRACKER_LOCATION, keys::LOCATION_UNKNOWN)
    );
    println!();

    let stats_path = config.stats_path();
    let persisted = std::fs::read_to_string(&stats_path)
        .ok()
        .and_then(|content| serde_json::from_str::<PersistedStats>(&content).ok());
    match persisted {
        Some(stats) => {
            println!("Cumulative Statistics:");
            println!("  Measurements received: {}", stats.measurements_received);
            println!("  Measurements persisted: {}", stats.measurements_persisted);
            println!("  Measurements lost: {}", stats.measurements_lost);
            println!("  Batches written: {}", stats.batches_written);
            println!("  Batches failed: {}", stats.batches_failed);
            println!("  Disconnect notifications: {}", stats.disconnects_notified);
            println!("  Last updated: {}", stats.last_updated);
        }
        None => println!("No previous session data found."),
    }
}

fn cmd_set_enabled(enabled: bool) {
    let config = load_config();
    let settings = open_settings(&config);
    if let Err(e) = settings.set_bool(keys::TRACKER_ENABLED, enabled) {
        eprintln!("Error saving settings: {e}");
        std::process::exit(1);
    }
    if enabled {
        println!("Tracker enabled.");
    } else {
        println!("Tracker disabled. Use 'biometrics-tracker enable' to turn it back on.");
    }
}

fn cmd_forget() {
    let config = load_config();
    let settings = open_settings(&config);
    if let Err(e) = settings.set_string(keys::HEARTRATE_TRACKER_ID, "") {
        eprintln!("Error saving settings: {e}");
        std::process::exit(1);
    }
    println!("Remembered sensor cleared. The next start will ask for one.");
}

fn cmd_config() {
    let config = load_config();
    println!("Configuration file: {:?}", Config::config_path());
    println!();
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error serializing configuration: {e}"),
    }
}

fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
