//! Registry model: the live in-memory shape of one printer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use printfleet_api::types::{FileEntry, FilesResponse};

use crate::classify::{self, StatusClass};

/// Opaque device identifier, assigned by the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Where the supervisor stands with the device's host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Handshake in progress.
    Searching,
    /// Handshake succeeded; the host answers its API.
    Online,
    /// The host went away politely (push socket closed).
    Offline,
    /// The host is unreachable or failing.
    Shutdown,
    /// The host answers HTTP but its control API is disabled.
    NoApi,
    /// The device was removed from the fleet.
    Deleted,
}

impl ConnectionState {
    /// Display label, also fed through [`classify`](crate::classify::classify).
    pub fn label(self) -> &'static str {
        match self {
            Self::Searching => "Searching...",
            Self::Online => "Online",
            Self::Offline => "Offline",
            Self::Shutdown => "Shutdown",
            Self::NoApi => "No-API",
            Self::Deleted => "Deleted",
        }
    }
}

/// Health of the push-socket stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StreamHealth {
    /// No open socket.
    #[default]
    Down,
    /// Socket open but no status frame seen yet.
    Degraded,
    /// Status frames are flowing.
    Up,
}

/// Per-device temperature alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempTriggers {
    /// Allowed actual-vs-target drift while heating, in °C.
    pub heating_variation: f64,
    /// Temperature below which a tool counts as cooled down, in °C.
    pub cool_down: f64,
}

impl Default for TempTriggers {
    fn default() -> Self {
        Self {
            heating_variation: 1.0,
            cool_down: 30.0,
        }
    }
}

/// Reference to the spool currently loaded on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilamentRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub colour: Option<String>,
}

/// Mirror of the device's own settings sections, kept verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceSettings {
    pub api: Value,
    pub appearance: Value,
    pub feature: Value,
    pub folder: Value,
    pub plugins: Value,
    pub scripts: Value,
    pub serial: Value,
    pub server: Value,
    pub system: Value,
    pub webcam: Value,
}

/// One printable file known to the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub display: String,
    pub size: Option<u64>,
    pub estimated_print_time: Option<f64>,
    pub date: Option<i64>,
}

/// One folder in the device's file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderRecord {
    pub name: String,
    pub path: String,
}

/// Flattened view of the device's recursive file listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileListing {
    pub files: Vec<FileRecord>,
    pub file_count: usize,
    pub folders: Vec<FolderRecord>,
    pub folder_count: usize,
}

impl FileListing {
    /// Flatten the device's file tree into parallel file and folder lists.
    pub fn from_response(resp: &FilesResponse) -> Self {
        let mut listing = Self::default();
        for entry in &resp.files {
            listing.collect(entry);
        }
        listing.file_count = listing.files.len();
        listing.folder_count = listing.folders.len();
        listing
    }

    fn collect(&mut self, entry: &FileEntry) {
        if entry.is_folder() {
            self.folders.push(FolderRecord {
                name: entry.name.clone(),
                path: entry.path.clone(),
            });
            for child in &entry.children {
                self.collect(child);
            }
        } else {
            self.files.push(FileRecord {
                path: entry.path.clone(),
                name: entry.name.clone(),
                display: entry.display.clone().unwrap_or_else(|| entry.name.clone()),
                size: entry.size,
                estimated_print_time: entry
                    .gcode_analysis
                    .as_ref()
                    .and_then(|a| a.estimated_print_time),
                date: entry.date,
            });
        }
    }
}

/// Disk usage reported alongside the file listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub free: Option<u64>,
    pub total: Option<u64>,
}

/// Fully-resolved configuration for one device: every field present, all
/// backfill applied. Produced by [`StoredDevice::resolve`] and written
/// back through the store on change.
///
/// [`StoredDevice::resolve`]: crate::store::StoredDevice::resolve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    /// Control address, always scheme-qualified (`http://host:port`).
    pub address: String,
    pub api_key: String,
    pub name: String,
    pub group: String,
    pub camera_url: Option<String>,
    pub feed_rate: f64,
    pub flow_rate: f64,
    pub sort_index: usize,
    pub firmware_version: String,
    pub current_user: String,
    pub temp_triggers: TempTriggers,
    pub selected_filament: Option<FilamentRef>,
}

/// Live registry entry for one device: its configuration plus everything
/// the supervisor has learned from the control API and the push socket.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub address: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub name: String,
    pub group: String,
    pub camera_url: Option<String>,
    pub feed_rate: f64,
    pub flow_rate: f64,
    /// Manual jog step in mm; session-local, never persisted.
    pub step_rate: f64,
    pub sort_index: usize,

    pub connection_state: ConnectionState,
    pub host_class: StatusClass,
    pub print_status: String,
    pub status_class: StatusClass,
    pub stream_health: StreamHealth,

    pub firmware_version: String,
    pub current_user: String,
    pub temp_triggers: TempTriggers,
    pub selected_filament: Option<FilamentRef>,

    pub current_z: Option<f64>,
    pub progress: Value,
    pub job: Value,
    pub logs: Value,
    pub temps: Vec<Value>,

    pub files: FileListing,
    pub storage: Option<StorageInfo>,
    pub profiles: Value,
    pub system_commands: Value,
    pub connection_current: Value,
    pub connection_options: Value,
    pub settings: DeviceSettings,
}

impl DeviceRecord {
    /// Seed a fresh registry entry from resolved configuration. The device
    /// starts out searching with its serial link presumed disconnected.
    pub fn from_config(config: DeviceConfig) -> Self {
        Self {
            id: config.id,
            address: config.address,
            api_key: config.api_key,
            name: config.name,
            group: config.group,
            camera_url: config.camera_url,
            feed_rate: config.feed_rate,
            flow_rate: config.flow_rate,
            step_rate: 10.0,
            sort_index: config.sort_index,
            connection_state: ConnectionState::Searching,
            host_class: classify::classify(ConnectionState::Searching.label()),
            print_status: "Disconnected".to_owned(),
            status_class: classify::classify("Disconnected"),
            stream_health: StreamHealth::Down,
            firmware_version: config.firmware_version,
            current_user: config.current_user,
            temp_triggers: config.temp_triggers,
            selected_filament: config.selected_filament,
            current_z: None,
            progress: Value::Null,
            job: Value::Null,
            logs: Value::Null,
            temps: Vec::new(),
            files: FileListing::default(),
            storage: None,
            profiles: Value::Null,
            system_commands: Value::Null,
            connection_current: Value::Null,
            connection_options: Value::Null,
            settings: DeviceSettings::default(),
        }
    }

    /// The durable slice of this record, for writing back to the store.
    pub fn to_config(&self) -> DeviceConfig {
        DeviceConfig {
            id: self.id.clone(),
            address: self.address.clone(),
            api_key: self.api_key.clone(),
            name: self.name.clone(),
            group: self.group.clone(),
            camera_url: self.camera_url.clone(),
            feed_rate: self.feed_rate,
            flow_rate: self.flow_rate,
            sort_index: self.sort_index,
            firmware_version: self.firmware_version.clone(),
            current_user: self.current_user.clone(),
            temp_triggers: self.temp_triggers,
            selected_filament: self.selected_filament.clone(),
        }
    }

    /// Apply the display state for one connection phase.
    pub(crate) fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
        self.host_class = classify::classify(state.label());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::classify::Category;

    fn config() -> DeviceConfig {
        DeviceConfig {
            id: DeviceId::from("d-1"),
            address: "http://10.0.0.4:5000".to_owned(),
            api_key: "key".to_owned(),
            name: "voron".to_owned(),
            group: String::new(),
            camera_url: None,
            feed_rate: 100.0,
            flow_rate: 100.0,
            sort_index: 3,
            firmware_version: String::new(),
            current_user: String::new(),
            temp_triggers: TempTriggers::default(),
            selected_filament: None,
        }
    }

    #[test]
    fn fresh_record_is_searching_and_disconnected() {
        let record = DeviceRecord::from_config(config());
        assert_eq!(record.connection_state, ConnectionState::Searching);
        assert_eq!(record.host_class.category, Category::Offline);
        assert_eq!(record.print_status, "Disconnected");
        assert_eq!(record.status_class.category, Category::Disconnected);
        assert_eq!(record.stream_health, StreamHealth::Down);
        assert_eq!(record.step_rate, 10.0);
    }

    #[test]
    fn config_round_trips_through_record() {
        let config = config();
        let record = DeviceRecord::from_config(config.clone());
        assert_eq!(record.to_config(), config);
    }

    #[test]
    fn file_listing_flattens_nested_folders() {
        let resp = serde_json::from_value(json!({
            "free": 5, "total": 10,
            "files": [
                {
                    "type": "folder", "path": "models", "name": "models",
                    "children": [
                        {
                            "type": "folder", "path": "models/boats", "name": "boats",
                            "children": [{
                                "type": "machinecode",
                                "path": "models/boats/benchy.gcode",
                                "name": "benchy.gcode",
                                "size": 42,
                                "gcodeAnalysis": { "estimatedPrintTime": 1800.0 }
                            }]
                        }
                    ]
                },
                { "type": "machinecode", "path": "calicat.gcode", "name": "calicat.gcode" }
            ]
        }))
        .unwrap();

        let listing = FileListing::from_response(&resp);
        assert_eq!(listing.folder_count, 2);
        assert_eq!(listing.file_count, 2);
        assert_eq!(listing.files[0].path, "models/boats/benchy.gcode");
        assert_eq!(listing.files[0].estimated_print_time, Some(1800.0));
        assert_eq!(listing.files[1].display, "calicat.gcode");
        assert_eq!(listing.folders[1].path, "models/boats");
    }

    #[test]
    fn api_key_never_serializes() {
        let record = DeviceRecord::from_config(config());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("api_key").is_none());
        assert_eq!(json["address"], "http://10.0.0.4:5000");
    }
}
