//! Settings store port and adapters.

use crate::store::StoreError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Setting keys owned by the tracker.
pub mod keys {
    /// Whether the tracker should run at all
    pub const TRACKER_ENABLED: &str = "BiometricsTrackerEnabled";
    /// Identity of the remembered heart-rate sensor
    pub const HEARTRATE_TRACKER_ID: &str = "HeartrateTrackerID";
    /// Body location reported by the remembered sensor
    pub const HEARTRATE_TRACKER_LOCATION: &str = "HeartrateTrackerLocation";
    /// Stored when the sensor does not report a body location
    pub const LOCATION_UNKNOWN: &str = "UNKNOWN";
}

/// Key/value settings owned by the host.
pub trait SettingsStore: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_string(&self, key: &str, default: &str) -> String;
    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Settings kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        match self.values.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.with_values(|v| v.get(key).and_then(Value::as_bool).unwrap_or(default))
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.with_values(|v| {
            v.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        })
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.with_values(|v| v.insert(key.to_string(), Value::Bool(value)));
        Ok(())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_values(|v| v.insert(key.to_string(), Value::String(value.to_string())));
        Ok(())
    }
}

/// Settings persisted as a flat JSON object on disk.
///
/// The file is rewritten on every `set`; reads are served from memory.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    cache: MemorySettingsStore,
}

impl JsonSettingsStore {
    /// Open (or lazily create) the settings file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cache = MemorySettingsStore::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let values: Map<String, Value> = serde_json::from_str(&content)
                .map_err(|e| StoreError::ParseError(e.to_string()))?;
            cache.with_values(|v| *v = values);
        }

        Ok(Self { path, cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self
            .cache
            .with_values(|v| serde_json::to_string_pretty(&*v))
            .map_err(|e| StoreError::SerializeError(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.cache.get_bool(key, default)
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.cache.get_string(key, default)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.cache.set_bool(key, value)?;
        self.save()
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.cache.set_string(key, value)?;
        self.save()
    }
}
