//! Durable device store: the persistence seam behind the orchestrator.
//!
//! Stored rows are sparse ([`StoredDevice`]), accumulated over years of
//! farm edits; [`StoredDevice::resolve`] backfills every missing field
//! into a [`DeviceConfig`] and the resolved row is written straight back,
//! so the store converges on fully-populated rows.

use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{DeviceConfig, DeviceId, FilamentRef, TempTriggers};

/// Input for registering a brand-new device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDevice {
    /// Full control address; wins over `ip`/`port` when present.
    pub address: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub api_key: String,
    pub name: Option<String>,
    pub camera_url: Option<String>,
    pub group: Option<String>,
}

/// One row of the durable store. Every field the fleet does not strictly
/// need is optional; resolution fills the gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDevice {
    pub id: DeviceId,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub api_key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub camera_url: Option<String>,
    #[serde(default)]
    pub feed_rate: Option<f64>,
    #[serde(default)]
    pub flow_rate: Option<f64>,
    #[serde(default)]
    pub sort_index: Option<usize>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub current_user: Option<String>,
    #[serde(default)]
    pub temp_triggers: Option<TempTriggers>,
    #[serde(default)]
    pub selected_filament: Option<FilamentRef>,
}

impl StoredDevice {
    /// Backfill every missing field into a complete [`DeviceConfig`].
    ///
    /// `fallback_sort_index` is used when the row carries no sort position
    /// (a device added before ordering existed, or a fresh insert).
    pub fn resolve(self, fallback_sort_index: usize) -> DeviceConfig {
        let address = match self.address {
            Some(address) if !address.is_empty() => with_scheme(address),
            _ => {
                let ip = self.ip.unwrap_or_default();
                let port = self.port.map(|p| p.to_string()).unwrap_or_default();
                format!("http://{ip}:{port}")
            }
        };

        DeviceConfig {
            id: self.id,
            address,
            api_key: self.api_key,
            name: self.name.unwrap_or_default(),
            group: self.group.unwrap_or_default(),
            camera_url: self.camera_url.and_then(normalize_camera_url),
            feed_rate: self.feed_rate.unwrap_or(100.0),
            flow_rate: self.flow_rate.unwrap_or(100.0),
            sort_index: self.sort_index.unwrap_or(fallback_sort_index),
            firmware_version: self.firmware_version.unwrap_or_default(),
            current_user: self.current_user.unwrap_or_default(),
            temp_triggers: self.temp_triggers.unwrap_or_default(),
            selected_filament: self.selected_filament,
        }
    }
}

impl From<&DeviceConfig> for StoredDevice {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            id: config.id.clone(),
            address: Some(config.address.clone()),
            ip: None,
            port: None,
            api_key: config.api_key.clone(),
            name: Some(config.name.clone()),
            group: Some(config.group.clone()),
            camera_url: config.camera_url.clone(),
            feed_rate: Some(config.feed_rate),
            flow_rate: Some(config.flow_rate),
            sort_index: Some(config.sort_index),
            firmware_version: Some(config.firmware_version.clone()),
            current_user: Some(config.current_user.clone()),
            temp_triggers: Some(config.temp_triggers),
            selected_filament: config.selected_filament.clone(),
        }
    }
}

fn with_scheme(address: String) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address
    } else {
        format!("http://{address}")
    }
}

/// Placeholder and template camera values count as "no camera"; bare
/// host:port values get a scheme.
fn normalize_camera_url(url: String) -> Option<String> {
    if url.is_empty() || url == "none" || url.contains("{Set") {
        None
    } else if url.starts_with("http://") || url.starts_with("https://") {
        Some(url)
    } else {
        Some(format!("http://{url}"))
    }
}

/// Persistence seam for device configuration.
///
/// All methods return `Send` futures so supervisors on other tasks can
/// persist through a shared handle.
pub trait DeviceStore: Send + Sync + 'static {
    /// Every stored row, ordered by sort position where known.
    fn load_all(&self) -> impl Future<Output = Result<Vec<StoredDevice>, CoreError>> + Send;

    /// Create a row for a new device and return it, id assigned.
    fn insert(&self, device: NewDevice) -> impl Future<Output = Result<StoredDevice, CoreError>> + Send;

    /// Write a resolved configuration back, replacing the row.
    fn save(&self, config: &DeviceConfig) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Remove the row. Deleting an unknown id is not an error.
    fn delete(&self, id: &DeviceId) -> impl Future<Output = Result<(), CoreError>> + Send;
}

/// In-memory [`DeviceStore`], used in tests and ephemeral fleets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredDevice>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-existing rows.
    pub fn with_rows(rows: Vec<StoredDevice>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredDevice>> {
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl DeviceStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<StoredDevice>, CoreError> {
        let mut rows = self.lock().clone();
        // Rows without a sort position sink to the end in insertion order.
        rows.sort_by_key(|row| row.sort_index.unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn insert(&self, device: NewDevice) -> Result<StoredDevice, CoreError> {
        let row = StoredDevice {
            id: DeviceId::new(Uuid::new_v4().to_string()),
            address: device.address,
            ip: device.ip,
            port: device.port,
            api_key: device.api_key,
            name: device.name,
            group: device.group,
            camera_url: device.camera_url,
            feed_rate: None,
            flow_rate: None,
            sort_index: None,
            firmware_version: None,
            current_user: None,
            temp_triggers: None,
            selected_filament: None,
        };
        debug!(device = %row.id, "inserting device row");
        self.lock().push(row.clone());
        Ok(row)
    }

    async fn save(&self, config: &DeviceConfig) -> Result<(), CoreError> {
        let mut rows = self.lock();
        let replacement = StoredDevice::from(config);
        match rows.iter_mut().find(|row| row.id == config.id) {
            Some(slot) => *slot = replacement,
            None => rows.push(replacement),
        }
        Ok(())
    }

    async fn delete(&self, id: &DeviceId) -> Result<(), CoreError> {
        self.lock().retain(|row| &row.id != id);
        Ok(())
    }
}
