//! Device Identity and Registry
//!
//! Tracks the identity of remote peers and persists their trust snapshot
//! across restarts. A device is created on first contact with a peer and
//! only removed on explicit forget; trust survives transport loss because
//! the registry, not the connection, is the source of truth for it.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use uuid::Uuid;

/// Kind of peer device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Laptop,
    Phone,
    Tablet,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Desktop
    }
}

/// Static identity of a device
///
/// The `device_id` is stable and unique per physical peer; the name is
/// display text and may change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    /// Stable unique identifier
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// Display name (mutable)
    #[serde(rename = "deviceName")]
    pub device_name: String,

    /// Device kind
    #[serde(rename = "deviceType", default)]
    pub device_type: DeviceType,

    /// Protocol version the device speaks
    #[serde(rename = "protocolVersion", default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    crate::PROTOCOL_VERSION
}

impl DeviceInfo {
    /// Create an identity with a freshly generated id
    pub fn new(device_name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            device_type,
            protocol_version: crate::PROTOCOL_VERSION,
        }
    }

    /// Create an identity for a known id (e.g. a reconnecting peer)
    pub fn with_id(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type,
            protocol_version: crate::PROTOCOL_VERSION,
        }
    }
}

/// A known peer device with its persisted trust snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Device identity
    #[serde(flatten)]
    pub info: DeviceInfo,

    /// Whether the device is paired (trust snapshot, persisted)
    #[serde(default)]
    pub paired: bool,

    /// Last time device was seen (UNIX seconds)
    pub last_seen: u64,
}

impl Device {
    /// Create a device record on first contact
    pub fn from_contact(info: DeviceInfo) -> Self {
        Self {
            info,
            paired: false,
            last_seen: current_timestamp(),
        }
    }

    /// Get device ID
    pub fn id(&self) -> &str {
        &self.info.device_id
    }

    /// Get device display name
    pub fn name(&self) -> &str {
        &self.info.device_name
    }

    /// Update the display name
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.info.device_name = name.into();
        self.update_last_seen();
    }

    /// Check if device is paired
    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// Update the persisted trust snapshot
    pub fn set_paired(&mut self, paired: bool) {
        self.paired = paired;
        self.update_last_seen();
    }

    /// Update last seen timestamp
    pub fn update_last_seen(&mut self) {
        self.last_seen = current_timestamp();
    }

    /// Get time since last seen in seconds
    pub fn seconds_since_last_seen(&self) -> u64 {
        current_timestamp().saturating_sub(self.last_seen)
    }

    /// Check if device was seen within the last N seconds
    pub fn seen_recently(&self, within_seconds: u64) -> bool {
        self.seconds_since_last_seen() <= within_seconds
    }
}

/// Registry of known devices with JSON persistence
///
/// The registry is the persistence hook behind trust surviving reconnects:
/// sessions snapshot their trust transitions into it, and a device created
/// from the registry after a restart starts out paired if it was paired
/// before.
pub struct DeviceRegistry {
    /// Map of device ID to device
    devices: HashMap<String, Device>,

    /// Path to the registry JSON file
    registry_path: PathBuf,
}

impl DeviceRegistry {
    /// Create a registry backed by the given JSON file
    ///
    /// Loads existing entries if the file is present.
    pub fn new(registry_path: impl Into<PathBuf>) -> Result<Self> {
        let registry_path = registry_path.into();

        if let Some(parent) = registry_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut registry = Self {
            devices: HashMap::new(),
            registry_path,
        };
        registry.load()?;
        Ok(registry)
    }

    /// Add or update a device
    pub fn add_device(&mut self, device: Device) {
        let device_id = device.id().to_string();
        info!("Adding/updating device: {} ({})", device.name(), device_id);
        self.devices.insert(device_id, device);
    }

    /// Get a device by ID
    pub fn get_device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Get a mutable reference to a device by ID
    pub fn get_device_mut(&mut self, device_id: &str) -> Option<&mut Device> {
        self.devices.get_mut(device_id)
    }

    /// Remove a device (explicit forget)
    pub fn remove_device(&mut self, device_id: &str) -> Option<Device> {
        info!("Removing device: {}", device_id);
        self.devices.remove(device_id)
    }

    /// Check if a device is known
    pub fn has_device(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Iterate all devices
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Iterate paired devices
    pub fn paired_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.is_paired())
    }

    /// Number of known devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Record a trust transition for a device and persist immediately
    pub fn set_paired(&mut self, device_id: &str, paired: bool) -> Result<()> {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.set_paired(paired);
        }
        self.save()
    }

    /// Save the registry to disk
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.devices)?;
        fs::write(&self.registry_path, json)?;
        debug!("Saved device registry to {:?}", self.registry_path);
        Ok(())
    }

    /// Load the registry from disk
    pub fn load(&mut self) -> Result<()> {
        if !self.registry_path.exists() {
            debug!("No existing registry file at {:?}", self.registry_path);
            return Ok(());
        }

        let json = fs::read_to_string(&self.registry_path)?;
        self.devices = serde_json::from_str(&json)?;
        info!("Loaded {} devices from registry", self.devices.len());
        Ok(())
    }

    /// Remove unpaired devices not seen in N seconds
    ///
    /// Paired devices are never evicted; their trust outlives any silence.
    pub fn cleanup_stale_devices(&mut self, max_age_seconds: u64) -> usize {
        let before_count = self.devices.len();

        self.devices.retain(|id, device| {
            let keep = device.is_paired() || device.seen_recently(max_age_seconds);
            if !keep {
                debug!("Removing stale device: {} ({})", device.name(), id);
            }
            keep
        });

        before_count - self.devices.len()
    }
}

/// Get current UNIX timestamp in seconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
