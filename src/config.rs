//! Per-Device Configuration Store
//!
//! Key/value settings handlers query per device: the share handler's
//! incoming directory, the runcommand handler's command table, and whatever
//! future handlers need. Values have JSON semantics and live in one JSON
//! file per device id. The physical store is an external collaborator
//! concern beyond this accessor contract.

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Key/value configuration for one device
///
/// Reads fall back to the caller's default on missing keys *and* on values
/// of the wrong shape, so a hand-edited config file can never fault a
/// handler. Writes persist immediately.
pub struct DeviceConfig {
    /// Backing file, `None` for an ephemeral (test) store
    path: Option<PathBuf>,
    values: RwLock<HashMap<String, Value>>,
}

impl DeviceConfig {
    /// Open (or create) the configuration for a device id
    pub fn open(config_dir: impl Into<PathBuf>, device_id: &str) -> Result<Self> {
        let config_dir = config_dir.into();
        fs::create_dir_all(&config_dir)?;
        let path = config_dir.join(format!("{}.json", device_id));

        let values = if path.exists() {
            let json = fs::read_to_string(&path)?;
            match serde_json::from_str(&json) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring unreadable device config {:?}: {}", path, e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        debug!("Opened device config at {:?}", path);
        Ok(Self {
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    /// Create an in-memory store that never touches disk
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Get a typed value, or `default` when the key is absent or malformed
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let values = match self.values.read() {
            Ok(values) => values,
            Err(_) => return default,
        };
        match values.get(key) {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Config key '{}' has unexpected shape: {}", key, e);
                    default
                }
            },
            None => default,
        }
    }

    /// Check whether a key is set
    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .map(|values| values.contains_key(key))
            .unwrap_or(false)
    }

    /// Set a value and persist the store
    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let serialized = serde_json::to_value(value)?;
        {
            let mut values = self
                .values
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            values.insert(key.into(), serialized);
        }
        self.persist()
    }

    /// Remove a key and persist the store
    pub fn remove(&self, key: &str) -> Result<()> {
        {
            let mut values = self
                .values
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            values.remove(key);
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let values = self
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let json = serde_json::to_string_pretty(&*values)?;
        fs::write(path, json)?;
        debug!("Saved device config to {:?}", path);
        Ok(())
    }
}
