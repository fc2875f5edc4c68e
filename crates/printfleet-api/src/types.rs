// Wire types for the printer's control API and push socket.
//
// Payloads the registry forwards verbatim (job, progress, logs, temps)
// stay as `serde_json::Value` so nothing the device sends is dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Control API responses ────────────────────────────────────────────

/// `GET /api/users`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersResponse {
    #[serde(default)]
    pub users: Vec<ApiUser>,
}

impl UsersResponse {
    /// A device with no configured users is fresh out of the box.
    pub fn is_fresh(&self) -> bool {
        self.users.is_empty()
    }

    /// The administrative identity the supervisor should adopt.
    pub fn admin_name(&self) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.admin)
            .map(|u| u.name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

/// `GET /api/connection`
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionResponse {
    pub current: ConnectionCurrent,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCurrent {
    pub state: String,
    #[serde(flatten)]
    pub extra: Value,
}

/// `GET /api/printerprofiles`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilesResponse {
    #[serde(default)]
    pub profiles: Value,
}

/// `GET /api/system/commands`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemCommandsResponse {
    #[serde(default)]
    pub core: Value,
}

/// `GET /api/settings`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsResponse {
    #[serde(default)]
    pub api: Value,
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub feature: Value,
    #[serde(default)]
    pub folder: Value,
    #[serde(default)]
    pub plugins: Value,
    #[serde(default)]
    pub scripts: Value,
    #[serde(default)]
    pub serial: Value,
    #[serde(default)]
    pub server: Value,
    #[serde(default)]
    pub system: Value,
    #[serde(default)]
    pub webcam: Option<WebcamSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Appearance {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebcamSettings {
    #[serde(default, rename = "streamUrl")]
    pub stream_url: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

/// `GET /api/files?recursive=true`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesResponse {
    #[serde(default)]
    pub free: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One node of the device's recursive file tree.
#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    #[serde(default, rename = "type")]
    pub kind: String,
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default, rename = "gcodeAnalysis")]
    pub gcode_analysis: Option<GcodeAnalysis>,
    #[serde(default)]
    pub children: Vec<FileEntry>,
}

impl FileEntry {
    pub fn is_folder(&self) -> bool {
        self.kind == "folder"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcodeAnalysis {
    #[serde(default, rename = "estimatedPrintTime")]
    pub estimated_print_time: Option<f64>,
    #[serde(flatten)]
    pub extra: Value,
}

// ── Push-socket frames ───────────────────────────────────────────────

/// One inbound push-socket frame. A single frame may carry any
/// combination of the three sections; each is handled independently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub connected: Option<ConnectedInfo>,
    #[serde(default)]
    pub event: Option<PushEvent>,
    #[serde(default)]
    pub current: Option<CurrentMessage>,
}

/// Sent once when the device accepts the socket; carries firmware info.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedInfo {
    pub version: String,
    #[serde(flatten)]
    pub extra: Value,
}

/// Discrete device event, e.g. `PrintFailed` / `PrintDone`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Live status snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentMessage {
    pub state: CurrentState,
    #[serde(default, rename = "currentZ")]
    pub current_z: Option<f64>,
    #[serde(default)]
    pub progress: Value,
    #[serde(default)]
    pub job: Value,
    #[serde(default)]
    pub logs: Value,
    #[serde(default)]
    pub temps: Vec<Value>,
}

impl CurrentMessage {
    /// Job completion percentage, when the snapshot carries one.
    pub fn completion(&self) -> Option<f64> {
        self.progress.get("completion").and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentState {
    pub text: String,
    #[serde(flatten)]
    pub extra: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn users_response_fresh_and_admin() {
        let fresh: UsersResponse = serde_json::from_value(json!({})).unwrap();
        assert!(fresh.is_fresh());
        assert_eq!(fresh.admin_name(), None);

        let populated: UsersResponse = serde_json::from_value(json!({
            "users": [
                { "name": "viewer", "admin": false },
                { "name": "boss", "admin": true },
            ]
        }))
        .unwrap();
        assert!(!populated.is_fresh());
        assert_eq!(populated.admin_name(), Some("boss"));
    }

    #[test]
    fn push_message_sections_are_independent() {
        let msg: PushMessage = serde_json::from_value(json!({
            "connected": { "version": "1.4.0", "display_version": "1.4.0" },
            "current": {
                "state": { "text": "Printing", "flags": { "printing": true } },
                "currentZ": 1.25,
                "progress": { "completion": 42.5 },
                "temps": [{ "tool0": { "actual": 210.1 } }]
            }
        }))
        .unwrap();

        assert_eq!(msg.connected.unwrap().version, "1.4.0");
        assert!(msg.event.is_none());
        let current = msg.current.unwrap();
        assert_eq!(current.state.text, "Printing");
        assert_eq!(current.current_z, Some(1.25));
        assert_eq!(current.completion(), Some(42.5));
        assert_eq!(current.temps.len(), 1);
    }

    #[test]
    fn push_event_carries_kind_and_payload() {
        let msg: PushMessage = serde_json::from_value(json!({
            "event": { "type": "PrintDone", "payload": { "name": "benchy.gcode" } }
        }))
        .unwrap();
        let event = msg.event.unwrap();
        assert_eq!(event.kind, "PrintDone");
        assert_eq!(event.payload["name"], "benchy.gcode");
    }

    #[test]
    fn file_entry_tree_parses_recursively() {
        let resp: FilesResponse = serde_json::from_value(json!({
            "free": 100, "total": 200,
            "files": [{
                "type": "folder",
                "path": "models",
                "name": "models",
                "children": [{
                    "type": "machinecode",
                    "path": "models/benchy.gcode",
                    "name": "benchy.gcode",
                    "size": 1234,
                    "gcodeAnalysis": { "estimatedPrintTime": 3600.5 }
                }]
            }]
        }))
        .unwrap();

        assert!(resp.files[0].is_folder());
        let child = &resp.files[0].children[0];
        assert!(!child.is_folder());
        assert_eq!(
            child.gcode_analysis.as_ref().unwrap().estimated_print_time,
            Some(3600.5)
        );
    }
}
