//! Shared in-memory device registry.
//!
//! One [`DeviceRecord`] per device, keyed by id, shared between the
//! orchestrator, the per-device supervisors, and any read-side consumer.
//! Mutations go through [`DeviceRegistry::mutate`], which holds the
//! record's shard lock for the duration of the closure; closures must not
//! touch the registry again or block.
//!
//! Invariant: `sort_index` values across live records form a dense
//! `0..len` sequence. [`DeviceRegistry::resequence`] restores it after
//! removals.

use dashmap::DashMap;
use tracing::warn;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceRecord, StreamHealth};
use crate::supervisor::SupervisorHandle;

#[derive(Default)]
pub struct DeviceRegistry {
    records: DashMap<DeviceId, DeviceRecord>,
    handles: DashMap<DeviceId, SupervisorHandle>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.records.contains_key(id)
    }

    /// Snapshot one record.
    pub fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Apply `apply` to the record under its shard lock.
    pub fn mutate<F>(&self, id: &DeviceId, apply: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        match self.records.get_mut(id) {
            Some(mut entry) => {
                apply(entry.value_mut());
                Ok(())
            }
            None => Err(CoreError::not_found(id)),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: DeviceRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Drop a record. The caller must have torn down its supervisor first.
    pub fn remove(&self, id: &DeviceId) -> Option<DeviceRecord> {
        if self.handles.contains_key(id) {
            warn!(device = %id, "removing record while its supervisor is installed");
        }
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Drop every record. Supervisor handles must already be drained.
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Snapshot all records, ordered by `sort_index` when requested.
    pub fn list(&self, ordered: bool) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        if ordered {
            records.sort_by_key(|record| record.sort_index);
        }
        records
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The sort position a newly added device should take.
    pub fn next_sort_index(&self) -> usize {
        self.records.len()
    }

    /// Restore the dense `0..len` sort order after removals, preserving
    /// relative order. Returns the records whose index changed.
    pub fn resequence(&self) -> Vec<DeviceRecord> {
        let ordered = self.list(true);
        let mut changed = Vec::new();
        for (position, record) in ordered.into_iter().enumerate() {
            if record.sort_index == position {
                continue;
            }
            let result = self.mutate(&record.id, |r| r.sort_index = position);
            if result.is_ok() {
                if let Some(updated) = self.get(&record.id) {
                    changed.push(updated);
                }
            }
        }
        changed
    }

    pub fn stream_health(&self, id: &DeviceId) -> Option<StreamHealth> {
        self.records.get(id).map(|entry| entry.stream_health)
    }

    // ── Supervisor handles ───────────────────────────────────────────

    pub(crate) fn install_handle(
        &self,
        id: DeviceId,
        handle: SupervisorHandle,
    ) -> Option<SupervisorHandle> {
        self.handles.insert(id, handle)
    }

    pub(crate) fn take_handle(&self, id: &DeviceId) -> Option<SupervisorHandle> {
        self.handles.remove(id).map(|(_, handle)| handle)
    }

    pub(crate) fn drain_handles(&self) -> Vec<(DeviceId, SupervisorHandle)> {
        let ids: Vec<DeviceId> = self.handles.iter().map(|entry| entry.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.handles.remove(&id))
            .collect()
    }

    pub(crate) fn with_handle<R>(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&SupervisorHandle) -> R,
    ) -> Option<R> {
        self.handles.get(id).map(|entry| f(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{DeviceConfig, TempTriggers};

    fn record(id: &str, sort_index: usize) -> DeviceRecord {
        DeviceRecord::from_config(DeviceConfig {
            id: DeviceId::from(id),
            address: format!("http://10.0.0.{sort_index}:5000"),
            api_key: "key".to_owned(),
            name: id.to_owned(),
            group: String::new(),
            camera_url: None,
            feed_rate: 100.0,
            flow_rate: 100.0,
            sort_index,
            firmware_version: String::new(),
            current_user: String::new(),
            temp_triggers: TempTriggers::default(),
            selected_filament: None,
        })
    }

    fn indices(registry: &DeviceRegistry) -> Vec<(String, usize)> {
        registry
            .list(true)
            .into_iter()
            .map(|r| (r.id.to_string(), r.sort_index))
            .collect()
    }

    #[test]
    fn mutate_unknown_device_is_not_found() {
        let registry = DeviceRegistry::new();
        let err = registry
            .mutate(&DeviceId::from("ghost"), |r| r.feed_rate = 50.0)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn list_orders_by_sort_index() {
        let registry = DeviceRegistry::new();
        registry.insert(record("b", 1));
        registry.insert(record("c", 2));
        registry.insert(record("a", 0));

        assert_eq!(
            indices(&registry),
            vec![
                ("a".to_owned(), 0),
                ("b".to_owned(), 1),
                ("c".to_owned(), 2)
            ]
        );
    }

    #[test]
    fn removing_middle_device_then_resequencing_stays_dense() {
        let registry = DeviceRegistry::new();
        registry.insert(record("a", 0));
        registry.insert(record("b", 1));
        registry.insert(record("c", 2));

        registry.remove(&DeviceId::from("b"));
        let changed = registry.resequence();

        assert_eq!(
            indices(&registry),
            vec![("a".to_owned(), 0), ("c".to_owned(), 1)]
        );
        // Only the shifted record is reported for persistence.
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, DeviceId::from("c"));
    }

    #[test]
    fn next_sort_index_tracks_population() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.next_sort_index(), 0);
        registry.insert(record("a", 0));
        assert_eq!(registry.next_sort_index(), 1);
    }

    #[test]
    fn resequence_on_dense_registry_changes_nothing() {
        let registry = DeviceRegistry::new();
        registry.insert(record("a", 0));
        registry.insert(record("b", 1));
        assert!(registry.resequence().is_empty());
    }
}
