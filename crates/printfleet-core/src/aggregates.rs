//! Periodic fleet-wide aggregates, published on watch channels.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::classify::Category;
use crate::model::{ConnectionState, DeviceRecord, StreamHealth};

/// Cheap per-category counters, recomputed on the fast cadence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetSnapshotStats {
    pub devices: usize,
    pub idle: usize,
    pub active: usize,
    pub complete: usize,
    pub offline: usize,
    pub disconnected: usize,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Heavier fleet totals, recomputed on the slow cadence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetTotals {
    pub devices: usize,
    pub hosts_online: usize,
    pub hosts_unreachable: usize,
    pub streams_up: usize,
    /// Mean completion across devices reporting progress.
    pub average_completion: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
}

pub fn snapshot_stats(records: &[DeviceRecord]) -> FleetSnapshotStats {
    let mut stats = FleetSnapshotStats {
        devices: records.len(),
        captured_at: Some(Utc::now()),
        ..FleetSnapshotStats::default()
    };
    for record in records {
        match record.status_class.category {
            Category::Idle => stats.idle += 1,
            Category::Active => stats.active += 1,
            Category::Complete => stats.complete += 1,
            Category::Offline => stats.offline += 1,
            Category::Disconnected => stats.disconnected += 1,
        }
    }
    stats
}

pub fn fleet_totals(records: &[DeviceRecord]) -> FleetTotals {
    let mut totals = FleetTotals {
        devices: records.len(),
        captured_at: Some(Utc::now()),
        ..FleetTotals::default()
    };

    let mut completion_sum = 0.0;
    let mut completion_count = 0u32;
    for record in records {
        if record.connection_state == ConnectionState::Online {
            totals.hosts_online += 1;
        } else {
            totals.hosts_unreachable += 1;
        }
        if record.stream_health == StreamHealth::Up {
            totals.streams_up += 1;
        }
        if let Some(completion) = record.progress.get("completion").and_then(Value::as_f64) {
            completion_sum += completion;
            completion_count += 1;
        }
    }
    if completion_count > 0 {
        totals.average_completion = Some(completion_sum / f64::from(completion_count));
    }
    totals
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::classify;
    use crate::model::{DeviceConfig, DeviceId, TempTriggers};

    fn record(id: &str, status: &str) -> DeviceRecord {
        let mut record = DeviceRecord::from_config(DeviceConfig {
            id: DeviceId::from(id),
            address: "http://10.0.0.4:5000".to_owned(),
            api_key: "key".to_owned(),
            name: id.to_owned(),
            group: String::new(),
            camera_url: None,
            feed_rate: 100.0,
            flow_rate: 100.0,
            sort_index: 0,
            firmware_version: String::new(),
            current_user: String::new(),
            temp_triggers: TempTriggers::default(),
            selected_filament: None,
        });
        record.print_status = status.to_owned();
        record.status_class = classify::classify(status);
        record
    }

    #[test]
    fn snapshot_stats_counts_every_category() {
        let mut printing = record("a", "Printing");
        printing.set_connection_state(ConnectionState::Online);
        let records = vec![
            printing,
            record("b", "Operational"),
            record("c", "Complete"),
            record("d", "Disconnected"),
            record("e", "Shutdown"),
        ];

        let stats = snapshot_stats(&records);
        assert_eq!(stats.devices, 5);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.disconnected, 1);
        assert_eq!(stats.offline, 1);
        assert!(stats.captured_at.is_some());
    }

    #[test]
    fn fleet_totals_average_only_reporting_devices() {
        let mut a = record("a", "Printing");
        a.set_connection_state(ConnectionState::Online);
        a.stream_health = StreamHealth::Up;
        a.progress = json!({ "completion": 50.0 });
        let mut b = record("b", "Printing");
        b.set_connection_state(ConnectionState::Online);
        b.progress = json!({ "completion": 100.0 });
        let c = record("c", "Disconnected");

        let totals = fleet_totals(&[a, b, c]);
        assert_eq!(totals.devices, 3);
        assert_eq!(totals.hosts_online, 2);
        assert_eq!(totals.hosts_unreachable, 1);
        assert_eq!(totals.streams_up, 1);
        assert_eq!(totals.average_completion, Some(75.0));
    }

    #[test]
    fn empty_fleet_has_no_average() {
        let totals = fleet_totals(&[]);
        assert_eq!(totals.devices, 0);
        assert_eq!(totals.average_completion, None);
    }
}
