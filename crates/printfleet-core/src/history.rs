//! Terminal job events, broadcast to history consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::model::DeviceRecord;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Failed,
    Done,
}

impl JobOutcome {
    /// Map a push-event kind onto an outcome; non-terminal events are `None`.
    pub(crate) fn from_event_kind(kind: &str) -> Option<Self> {
        match kind {
            "PrintFailed" => Some(Self::Failed),
            "PrintDone" => Some(Self::Done),
            _ => None,
        }
    }
}

/// One terminal job event with the device state captured at that moment.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub outcome: JobOutcome,
    /// Event payload exactly as the device sent it.
    pub payload: Value,
    /// Snapshot of the device when the event arrived, including the
    /// selected filament and job metadata history consumers need.
    pub device: DeviceRecord,
    pub occurred_at: DateTime<Utc>,
}
