//! Fleet orchestrator: owns the registry, the store, the supervisors,
//! and the aggregate tasks.
//!
//! All fleet lifecycle runs through here. Structural changes (update,
//! remove) quiesce the whole fleet with [`FleetOrchestrator::pause`] and
//! rebuild it with [`FleetOrchestrator::init`], so supervisors never race
//! a record that is being restructured under them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printfleet_api::{TimeoutBudget, throttle_interval_ms};

use crate::aggregates::{self, FleetSnapshotStats, FleetTotals};
use crate::config::FleetConfig;
use crate::error::CoreError;
use crate::history::HistoryEvent;
use crate::model::{ConnectionState, DeviceId, DeviceRecord, FilamentRef, StreamHealth};
use crate::registry::DeviceRegistry;
use crate::store::{DeviceStore, NewDevice};
use crate::supervisor::{self, SupervisorCommand, SupervisorContext};

/// Field changes for one registered device. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub api_key: Option<String>,
    pub camera_url: Option<String>,
    pub group: Option<String>,
}

/// How a manual reconnect request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStatus {
    /// Stream was healthy; state was re-synced in place.
    Success,
    /// Stream was degraded; a forced reconnect was started.
    Warning,
    /// Stream was down; a fresh connection attempt was started.
    Error,
}

#[derive(Debug, Clone)]
pub struct ReconnectOutcome {
    pub status: ReconnectStatus,
    pub message: String,
}

struct AggregateTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct Inner<S> {
    registry: Arc<DeviceRegistry>,
    store: Arc<S>,
    config: FleetConfig,
    budget: Arc<TimeoutBudget>,
    history_tx: broadcast::Sender<Arc<HistoryEvent>>,
    polling_tx: watch::Sender<f64>,
    polling_rx: watch::Receiver<f64>,
    snapshot_stats_tx: watch::Sender<FleetSnapshotStats>,
    fleet_totals_tx: watch::Sender<FleetTotals>,
    aggregate_tasks: tokio::sync::Mutex<AggregateTasks>,
}

/// Handle to one fleet. Cheap to clone; all clones drive the same fleet.
pub struct FleetOrchestrator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for FleetOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DeviceStore> FleetOrchestrator<S> {
    /// Build an orchestrator over `store`. No supervisors run until
    /// [`init`](Self::init) is called.
    pub fn new(config: FleetConfig, store: S) -> Self {
        let budget = Arc::new(TimeoutBudget::new(
            config.api_timeout,
            config.api_retry_cutoff,
        ));
        let (history_tx, _) = broadcast::channel(config.history_capacity);
        let (polling_tx, polling_rx) = watch::channel(config.polling_seconds);
        let (snapshot_stats_tx, _) = watch::channel(FleetSnapshotStats::default());
        let (fleet_totals_tx, _) = watch::channel(FleetTotals::default());

        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(DeviceRegistry::new()),
                store: Arc::new(store),
                config,
                budget,
                history_tx,
                polling_tx,
                polling_rx,
                snapshot_stats_tx,
                fleet_totals_tx,
                aggregate_tasks: tokio::sync::Mutex::new(AggregateTasks {
                    cancel: CancellationToken::new(),
                    handles: Vec::new(),
                }),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// (Re)build the fleet from the durable store and start a supervisor
    /// per device. Idempotent: any running fleet is quiesced first.
    pub async fn init(&self) -> Result<usize, CoreError> {
        self.pause().await;

        let rows = self.inner.store.load_all().await?;
        self.inner.registry.clear();

        let mut ids = Vec::with_capacity(rows.len());
        for (position, row) in rows.into_iter().enumerate() {
            let config = row.resolve(position);
            // Write the backfilled row straight back so the store
            // converges on fully-populated rows.
            self.inner.store.save(&config).await?;
            ids.push(config.id.clone());
            self.inner.registry.insert(DeviceRecord::from_config(config));
        }

        for id in &ids {
            self.spawn_supervisor(id.clone());
        }
        self.start_aggregates().await;

        info!(devices = ids.len(), "fleet initialized");
        Ok(ids.len())
    }

    /// Quiesce the fleet: stop the aggregate tasks, then tear down every
    /// supervisor and wait for each to wind down. Records stay in the
    /// registry with whatever state they last had.
    pub async fn pause(&self) {
        {
            let mut tasks = self.inner.aggregate_tasks.lock().await;
            tasks.cancel.cancel();
            for handle in tasks.handles.drain(..) {
                let _ = handle.await;
            }
        }
        for (id, handle) in self.inner.registry.drain_handles() {
            debug!(device = %id, "closing supervisor");
            handle.shutdown().await;
        }
        debug!("fleet quiesced");
    }

    /// Register a brand-new device and start supervising it. The device
    /// is persisted before anything touches the network.
    pub async fn add_device(&self, device: NewDevice) -> Result<DeviceRecord, CoreError> {
        let row = self.inner.store.insert(device).await?;
        let config = row.resolve(self.inner.registry.next_sort_index());
        self.inner.store.save(&config).await?;

        let record = DeviceRecord::from_config(config);
        let id = record.id.clone();
        self.inner.registry.insert(record.clone());
        self.respawn_supervisor(&id).await;

        info!(device = %id, address = %record.address, "device added");
        Ok(record)
    }

    /// Apply field changes to one device, persist them, and rebuild the
    /// fleet so its supervisor reconnects with the new settings.
    ///
    /// A device that was concurrently removed is logged and skipped; the
    /// fleet restarts either way, so a failed update never leaves it
    /// quiesced.
    pub async fn update_device(&self, id: &DeviceId, update: DeviceUpdate) -> Result<(), CoreError> {
        info!(device = %id, "quiescing fleet to update device");
        self.pause().await;

        let applied = match self.inner.registry.mutate(id, |r| {
            if let Some(name) = update.name {
                r.name = name;
            }
            if let Some(address) = update.address {
                r.address = address;
            }
            if let Some(api_key) = update.api_key {
                r.api_key = api_key;
            }
            if let Some(camera_url) = update.camera_url {
                r.camera_url = (!camera_url.is_empty()).then_some(camera_url);
            }
            if let Some(group) = update.group {
                r.group = group;
            }
        }) {
            Ok(()) => self.persist(id).await,
            Err(e) => {
                warn!(device = %id, error = %e, "update for a device that is no longer registered");
                Ok(())
            }
        };

        self.init().await?;
        applied
    }

    /// Remove devices from the fleet and the store, then rebuild. Unknown
    /// ids are skipped with a warning. Returns the removed records.
    ///
    /// Store failures are collected rather than aborting mid-removal: the
    /// fleet always restarts, and the first failure (if any) is returned
    /// after it has.
    pub async fn remove_devices(&self, ids: &[DeviceId]) -> Result<Vec<DeviceRecord>, CoreError> {
        info!(count = ids.len(), "quiescing fleet to remove devices");
        self.pause().await;

        let mut removed = Vec::new();
        let mut failure = None;
        for id in ids {
            let _ = self
                .inner
                .registry
                .mutate(id, |r| r.set_connection_state(ConnectionState::Deleted));
            match self.inner.registry.remove(id) {
                Some(record) => removed.push(record),
                None => warn!(device = %id, "remove requested for unknown device"),
            }
            if let Err(e) = self.inner.store.delete(id).await {
                warn!(device = %id, error = %e, "failed to delete stored device");
                failure.get_or_insert(e);
            }
        }

        // Close the sort-order gaps and persist the shifted devices.
        for record in self.inner.registry.resequence() {
            if let Err(e) = self.inner.store.save(&record.to_config()).await {
                warn!(device = %record.id, error = %e, "failed to persist resequenced device");
                failure.get_or_insert(e);
            }
        }

        self.init().await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Manually reconnect one device. What happens depends on how healthy
    /// its stream currently is.
    pub async fn reconnect(&self, id: &DeviceId) -> Result<ReconnectOutcome, CoreError> {
        let record = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| CoreError::not_found(id))?;

        let outcome = match record.stream_health {
            StreamHealth::Up => {
                let sent = self
                    .inner
                    .registry
                    .with_handle(id, |h| h.send_command(SupervisorCommand::Resync))
                    .unwrap_or(false);
                if sent {
                    ReconnectOutcome {
                        status: ReconnectStatus::Success,
                        message: "Stream is healthy; device information re-synced.".to_owned(),
                    }
                } else {
                    self.respawn_supervisor(id).await;
                    ReconnectOutcome {
                        status: ReconnectStatus::Warning,
                        message: "Stream looked healthy but took no commands; reconnecting."
                            .to_owned(),
                    }
                }
            }
            StreamHealth::Degraded => {
                self.respawn_supervisor(id).await;
                ReconnectOutcome {
                    status: ReconnectStatus::Warning,
                    message: "Stream was degraded; forced a reconnect.".to_owned(),
                }
            }
            StreamHealth::Down => {
                self.respawn_supervisor(id).await;
                ReconnectOutcome {
                    status: ReconnectStatus::Error,
                    message:
                        "Stream was down; started a fresh connection attempt. Check the device is \
                         fully booted."
                            .to_owned(),
                }
            }
        };
        info!(device = %id, status = ?outcome.status, "manual reconnect");
        Ok(outcome)
    }

    /// Change the fleet's polling cadence and push a new throttle frame
    /// to every supervised device. Returns how many took it.
    ///
    /// Every installed supervisor is offered the command; ones without an
    /// open session simply have a closed or idle channel and drop out of
    /// the count. A session that has not produced a frame yet still holds
    /// an open socket and must take the new throttle.
    pub async fn update_polling_interval(&self, polling_seconds: f64) -> usize {
        let _ = self.inner.polling_tx.send(polling_seconds);
        let throttle = throttle_interval_ms(polling_seconds);

        let mut updated = 0;
        for id in self.inner.registry.ids() {
            let sent = self
                .inner
                .registry
                .with_handle(&id, |h| h.send_command(SupervisorCommand::SetThrottle(throttle)))
                .unwrap_or(false);
            if sent {
                updated += 1;
            }
        }
        info!(throttle_ms = throttle, updated, "polling interval pushed");
        updated
    }

    // ── Per-device settings ──────────────────────────────────────────

    /// Reorder the fleet. `ids` lists every device in its new position.
    pub async fn set_sort_order(&self, ids: &[DeviceId]) -> Result<(), CoreError> {
        for (position, id) in ids.iter().enumerate() {
            match self.inner.registry.mutate(id, |r| r.sort_index = position) {
                Ok(()) => self.persist(id).await?,
                Err(e) => warn!(device = %id, error = %e, "sort order names an unknown device"),
            }
        }
        Ok(())
    }

    pub async fn set_feed_rate(&self, id: &DeviceId, rate: f64) -> Result<(), CoreError> {
        self.inner.registry.mutate(id, |r| r.feed_rate = rate)?;
        self.persist(id).await
    }

    pub async fn set_flow_rate(&self, id: &DeviceId, rate: f64) -> Result<(), CoreError> {
        self.inner.registry.mutate(id, |r| r.flow_rate = rate)?;
        self.persist(id).await
    }

    /// Jog step is session-local; it lives in memory only.
    pub fn set_step_rate(&self, id: &DeviceId, rate: f64) -> Result<(), CoreError> {
        self.inner.registry.mutate(id, |r| r.step_rate = rate)
    }

    pub async fn set_filament(
        &self,
        id: &DeviceId,
        filament: Option<FilamentRef>,
    ) -> Result<(), CoreError> {
        self.inner.registry.mutate(id, |r| r.selected_filament = filament.clone())?;
        self.persist(id).await
    }

    // ── Read side ────────────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Snapshot the fleet in sort order.
    pub fn fleet(&self) -> Vec<DeviceRecord> {
        self.inner.registry.list(true)
    }

    pub fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.inner.registry.get(id)
    }

    /// Subscribe to terminal job events.
    pub fn history_events(&self) -> broadcast::Receiver<Arc<HistoryEvent>> {
        self.inner.history_tx.subscribe()
    }

    /// Watch the fast per-status counters.
    pub fn snapshot_stats(&self) -> watch::Receiver<FleetSnapshotStats> {
        self.inner.snapshot_stats_tx.subscribe()
    }

    /// Watch the slow fleet-wide totals.
    pub fn fleet_totals(&self) -> watch::Receiver<FleetTotals> {
        self.inner.fleet_totals_tx.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn persist(&self, id: &DeviceId) -> Result<(), CoreError> {
        let record = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| CoreError::not_found(id))?;
        self.inner.store.save(&record.to_config()).await
    }

    fn spawn_supervisor(&self, id: DeviceId) {
        let handle = supervisor::spawn(SupervisorContext {
            id: id.clone(),
            registry: Arc::clone(&self.inner.registry),
            store: Arc::clone(&self.inner.store),
            budget: Arc::clone(&self.inner.budget),
            config: self.inner.config.clone(),
            polling: self.inner.polling_rx.clone(),
            history: self.inner.history_tx.clone(),
        });
        if let Some(stale) = self.inner.registry.install_handle(id.clone(), handle) {
            warn!(device = %id, "replaced a supervisor that was still installed");
            tokio::spawn(stale.shutdown());
        }
    }

    async fn respawn_supervisor(&self, id: &DeviceId) {
        if let Some(old) = self.inner.registry.take_handle(id) {
            old.shutdown().await;
        }
        self.spawn_supervisor(id.clone());
    }

    async fn start_aggregates(&self) {
        let mut tasks = self.inner.aggregate_tasks.lock().await;
        let cancel = CancellationToken::new();
        tasks.cancel = cancel.clone();
        tasks.handles.push(tokio::spawn(aggregate_task(
            Arc::clone(&self.inner.registry),
            self.inner.snapshot_stats_tx.clone(),
            aggregates::snapshot_stats,
            self.inner.config.snapshot_stats_interval,
            cancel.clone(),
        )));
        tasks.handles.push(tokio::spawn(aggregate_task(
            Arc::clone(&self.inner.registry),
            self.inner.fleet_totals_tx.clone(),
            aggregates::fleet_totals,
            self.inner.config.fleet_totals_interval,
            cancel,
        )));
    }
}

/// Recompute one aggregate on a fixed cadence until cancelled.
async fn aggregate_task<T: Send + Sync + 'static>(
    registry: Arc<DeviceRegistry>,
    tx: watch::Sender<T>,
    compute: fn(&[DeviceRecord]) -> T,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let records = registry.list(false);
                let _ = tx.send(compute(&records));
            }
        }
    }
}
