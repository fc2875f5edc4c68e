//! Per-device connection supervisor.
//!
//! One supervisor task per registered device. Each pass through the loop
//! is a *session*: handshake against the control API, one-time state
//! sync, then a streaming read over the push socket until it drops. A
//! failed session schedules the next one after a fixed delay; only
//! caller-initiated teardown (or device removal) ends the loop.
//!
//! ```text
//! Searching ──users ok──▶ Online ──stream open──▶ frames flowing
//!     │                      │
//!     ├─503/404─▶ NoApi      └─socket error─▶ Shutdown ─┐
//!     └─error───▶ Shutdown ◀────────────────────────────┘
//!                    │ retry delay
//!                    ▼
//!                Searching (next session)
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use printfleet_api::types::{CurrentMessage, PushMessage};
use printfleet_api::{
    ApiError, DeviceClient, SessionEvent, StreamSession, TimeoutBudget, throttle_interval_ms,
};

use crate::classify;
use crate::config::FleetConfig;
use crate::history::{HistoryEvent, JobOutcome};
use crate::model::{ConnectionState, DeviceId, DeviceRecord, FileListing, StorageInfo, StreamHealth};
use crate::registry::DeviceRegistry;
use crate::store::DeviceStore;

const COMMAND_CHANNEL_SIZE: usize = 8;

/// Control messages an orchestrator can push into a live session.
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Re-send the throttle frame with a new interval.
    SetThrottle(u64),
    /// Re-run the one-time API sync over the existing session.
    Resync,
}

/// Handle to one running supervisor task.
pub struct SupervisorHandle {
    cancel: CancellationToken,
    commands: mpsc::Sender<SupervisorCommand>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Best-effort command delivery; a full or closed channel means the
    /// session is not in a state to take commands.
    pub(crate) fn send_command(&self, command: SupervisorCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Cancel the task and wait for it to wind down.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "supervisor task did not shut down cleanly");
        }
    }
}

/// Everything one supervisor task needs, moved into the task at spawn.
pub(crate) struct SupervisorContext<S> {
    pub id: DeviceId,
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<S>,
    pub budget: Arc<TimeoutBudget>,
    pub config: FleetConfig,
    pub polling: watch::Receiver<f64>,
    pub history: broadcast::Sender<Arc<HistoryEvent>>,
}

pub(crate) fn spawn<S: DeviceStore>(ctx: SupervisorContext<S>) -> SupervisorHandle {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let task = tokio::spawn(run(ctx, cancel.clone(), rx));
    SupervisorHandle {
        cancel,
        commands: tx,
        task,
    }
}

/// How one session ended, deciding what the loop does next.
enum SessionOutcome {
    /// The device is gone from the registry; stop for good.
    Terminal,
    /// Caller tore the supervisor down.
    Cancelled,
    /// Handshake never completed; retry on the slow cadence.
    RetryHandshake,
    /// Stream was up and dropped; retry on the fast cadence.
    RetryStream,
}

async fn run<S: DeviceStore>(
    ctx: SupervisorContext<S>,
    cancel: CancellationToken,
    mut commands: mpsc::Receiver<SupervisorCommand>,
) {
    loop {
        let delay = match run_session(&ctx, &cancel, &mut commands).await {
            SessionOutcome::Terminal => {
                info!(device = %ctx.id, "supervisor finished");
                return;
            }
            SessionOutcome::Cancelled => {
                debug!(device = %ctx.id, "supervisor torn down");
                return;
            }
            SessionOutcome::RetryHandshake => ctx.config.handshake_retry,
            SessionOutcome::RetryStream => ctx.config.stream_retry,
        };

        debug!(device = %ctx.id, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session<S: DeviceStore>(
    ctx: &SupervisorContext<S>,
    cancel: &CancellationToken,
    commands: &mut mpsc::Receiver<SupervisorCommand>,
) -> SessionOutcome {
    let Some(record) = ctx.registry.get(&ctx.id) else {
        warn!(device = %ctx.id, "device no longer registered");
        return SessionOutcome::Terminal;
    };
    mark_searching(&ctx.registry, &ctx.id);

    let client = match DeviceClient::new(
        &record.address,
        &record.api_key,
        Arc::clone(&ctx.budget),
        &ctx.config.transport,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(device = %ctx.id, address = %record.address, error = %e, "unusable device address");
            mark_unreachable(&ctx.registry, &ctx.id);
            return SessionOutcome::RetryHandshake;
        }
    };

    // Handshake: the users endpoint doubles as a liveness probe and tells
    // us which identity to present on the push socket.
    let handshake = tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionOutcome::Cancelled,
        result = client.users() => result,
    };
    let users = match handshake {
        Ok(users) => users,
        Err(e) if e.is_no_api() => {
            warn!(device = %ctx.id, error = %e, "host up but control API unavailable");
            mark_no_api(&ctx.registry, &ctx.id);
            return SessionOutcome::RetryHandshake;
        }
        Err(e) => {
            warn!(device = %ctx.id, error = %e, "handshake failed");
            mark_unreachable(&ctx.registry, &ctx.id);
            return SessionOutcome::RetryHandshake;
        }
    };

    let identity = if users.is_fresh() {
        debug!(device = %ctx.id, "no users configured, presenting default identity");
        "admin".to_owned()
    } else {
        users.admin_name().unwrap_or("admin").to_owned()
    };
    let adopted = ctx.registry.mutate(&ctx.id, |r| {
        r.current_user = identity.clone();
        r.set_connection_state(ConnectionState::Online);
    });
    if adopted.is_err() {
        return SessionOutcome::Terminal;
    }
    persist(ctx).await;
    info!(device = %ctx.id, identity = %identity, "handshake complete");

    tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionOutcome::Cancelled,
        () = sync_device(ctx, &client) => {}
    }

    let throttle = throttle_interval_ms(*ctx.polling.borrow());
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => return SessionOutcome::Cancelled,
        result = StreamSession::connect(&record.address, &identity, &record.api_key, throttle) => result,
    };
    let mut session = match connected {
        Ok(session) => session,
        Err(e) => {
            warn!(device = %ctx.id, error = %e, "push socket connect failed");
            mark_unreachable(&ctx.registry, &ctx.id);
            return SessionOutcome::RetryStream;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                session.close().await;
                return SessionOutcome::Cancelled;
            }
            command = commands.recv() => match command {
                Some(SupervisorCommand::SetThrottle(throttle_ms)) => {
                    if let Err(e) = session.send_throttle(throttle_ms).await {
                        warn!(device = %ctx.id, error = %e, "throttle update failed");
                        mark_unreachable(&ctx.registry, &ctx.id);
                        return SessionOutcome::RetryStream;
                    }
                    debug!(device = %ctx.id, throttle_ms, "throttle updated");
                }
                Some(SupervisorCommand::Resync) => sync_device(ctx, &client).await,
                // Handle dropped: the orchestrator replaced us.
                None => {
                    session.close().await;
                    return SessionOutcome::Cancelled;
                }
            },
            event = session.next_event() => match event {
                SessionEvent::Message(message) => {
                    if !handle_push(ctx, message).await {
                        session.close().await;
                        return SessionOutcome::Terminal;
                    }
                }
                SessionEvent::Closed { code, reason } => {
                    if cancel.is_cancelled() {
                        return SessionOutcome::Cancelled;
                    }
                    info!(device = %ctx.id, ?code, reason = %reason, "device closed the push socket");
                    let _ = ctx.registry.mutate(&ctx.id, |r| {
                        r.stream_health = StreamHealth::Down;
                        r.set_connection_state(ConnectionState::Offline);
                    });
                    return SessionOutcome::RetryStream;
                }
                SessionEvent::Ended => {
                    if cancel.is_cancelled() {
                        return SessionOutcome::Cancelled;
                    }
                    info!(device = %ctx.id, "push socket ended");
                    let _ = ctx.registry.mutate(&ctx.id, |r| {
                        r.stream_health = StreamHealth::Down;
                        r.set_connection_state(ConnectionState::Offline);
                    });
                    return SessionOutcome::RetryStream;
                }
                SessionEvent::Failed(e) => {
                    warn!(device = %ctx.id, error = %e, "push socket failed");
                    mark_unreachable(&ctx.registry, &ctx.id);
                    return SessionOutcome::RetryStream;
                }
            }
        }
    }
}

/// Apply one inbound push frame. Returns `false` when the device has been
/// removed from the registry and the session should stop.
async fn handle_push<S: DeviceStore>(ctx: &SupervisorContext<S>, message: PushMessage) -> bool {
    if let Some(connected) = message.connected {
        debug!(device = %ctx.id, version = %connected.version, "device firmware reported");
        let updated = ctx
            .registry
            .mutate(&ctx.id, |r| r.firmware_version = connected.version.clone());
        if updated.is_err() {
            return false;
        }
        persist(ctx).await;
    }

    if let Some(event) = message.event {
        if let Some(outcome) = JobOutcome::from_event_kind(&event.kind) {
            if let Some(device) = ctx.registry.get(&ctx.id) {
                info!(device = %ctx.id, kind = %event.kind, "terminal job event");
                let _ = ctx.history.send(Arc::new(HistoryEvent {
                    outcome,
                    payload: event.payload,
                    device,
                    occurred_at: Utc::now(),
                }));
            }
        } else {
            debug!(device = %ctx.id, kind = %event.kind, "ignoring non-terminal event");
        }
    }

    if let Some(current) = message.current {
        if ctx
            .registry
            .mutate(&ctx.id, |r| apply_current(r, &current))
            .is_err()
        {
            return false;
        }
    }

    true
}

/// Fold a live status snapshot into the record.
///
/// Temperature frames may arrive empty between real samples; an empty
/// list never clobbers the last known readings.
pub(crate) fn apply_current(record: &mut DeviceRecord, current: &CurrentMessage) {
    record.stream_health = StreamHealth::Up;

    let status = classify::normalize(&current.state.text).to_owned();
    record.status_class = if current.completion() == Some(100.0) {
        classify::classify("Complete")
    } else {
        classify::classify(&status)
    };
    record.print_status = status;

    record.current_z = current.current_z;
    record.progress = current.progress.clone();
    record.job = current.job.clone();
    record.logs = current.logs.clone();
    if !current.temps.is_empty() {
        record.temps = current.temps.clone();
    }
}

// ── One-time API sync ────────────────────────────────────────────────

/// Pull the device's slow-moving state over the control API. Each fetch
/// is best-effort: a failure logs and leaves the previous data in place.
async fn sync_device<S: DeviceStore>(ctx: &SupervisorContext<S>, client: &DeviceClient) {
    sync_profiles(ctx, client).await;
    sync_system_commands(ctx, client).await;
    sync_settings(ctx, client).await;
    sync_connection(ctx, client).await;
    sync_files(ctx, client).await;
}

async fn sync_profiles<S: DeviceStore>(ctx: &SupervisorContext<S>, client: &DeviceClient) {
    match client.printer_profiles().await {
        Ok(resp) => {
            let _ = ctx.registry.mutate(&ctx.id, |r| r.profiles = resp.profiles);
            debug!(device = %ctx.id, "profiles synced");
        }
        Err(e) => log_sync_failure(&ctx.id, "profiles", &e),
    }
}

async fn sync_system_commands<S: DeviceStore>(ctx: &SupervisorContext<S>, client: &DeviceClient) {
    match client.system_commands().await {
        Ok(resp) => {
            let _ = ctx.registry.mutate(&ctx.id, |r| r.system_commands = resp.core);
            debug!(device = %ctx.id, "system commands synced");
        }
        Err(e) => log_sync_failure(&ctx.id, "system commands", &e),
    }
}

async fn sync_settings<S: DeviceStore>(ctx: &SupervisorContext<S>, client: &DeviceClient) {
    let resp = match client.settings().await {
        Ok(resp) => resp,
        Err(e) => {
            log_sync_failure(&ctx.id, "settings", &e);
            return;
        }
    };

    let stream_url = resp
        .webcam
        .as_ref()
        .and_then(|w| w.stream_url.clone())
        .filter(|url| !url.is_empty());
    let webcam = resp.webcam.as_ref().map(|w| w.extra.clone()).unwrap_or_default();

    let updated = ctx.registry.mutate(&ctx.id, |r| {
        // A device-side display name beats an unset or template name.
        if r.name.is_empty() || r.name.contains("{Leave") {
            r.name.clone_from(&resp.appearance.name);
        }
        if r.camera_url.is_none() {
            r.camera_url = stream_url.clone().map(|url| {
                if url.starts_with("http") {
                    url
                } else {
                    // Device-relative stream path
                    format!("{}{url}", r.address.trim_end_matches('/'))
                }
            });
        }
        r.settings.api = resp.api.clone();
        r.settings.appearance = resp.appearance.extra.clone();
        r.settings.feature = resp.feature.clone();
        r.settings.folder = resp.folder.clone();
        r.settings.plugins = resp.plugins.clone();
        r.settings.scripts = resp.scripts.clone();
        r.settings.serial = resp.serial.clone();
        r.settings.server = resp.server.clone();
        r.settings.system = resp.system.clone();
        r.settings.webcam = webcam.clone();
    });
    if updated.is_ok() {
        persist(ctx).await;
        debug!(device = %ctx.id, "settings synced");
    }
}

async fn sync_connection<S: DeviceStore>(ctx: &SupervisorContext<S>, client: &DeviceClient) {
    match client.connection().await {
        Ok(resp) => {
            let status = classify::normalize(&resp.current.state).to_owned();
            let _ = ctx.registry.mutate(&ctx.id, |r| {
                r.status_class = classify::classify(&status);
                r.print_status = status.clone();
                r.connection_current =
                    serde_json::to_value(&resp.current).unwrap_or_default();
                r.connection_options = resp.options.clone();
            });
            debug!(device = %ctx.id, "connection state synced");
        }
        Err(e) => log_sync_failure(&ctx.id, "connection", &e),
    }
}

async fn sync_files<S: DeviceStore>(ctx: &SupervisorContext<S>, client: &DeviceClient) {
    // Drop the stale listing first so a failed fetch never leaves files
    // the device no longer has.
    let _ = ctx.registry.mutate(&ctx.id, |r| r.files = FileListing::default());
    match client.files().await {
        Ok(resp) => {
            let listing = FileListing::from_response(&resp);
            let _ = ctx.registry.mutate(&ctx.id, |r| {
                r.storage = Some(StorageInfo {
                    free: resp.free,
                    total: resp.total,
                });
                r.files = listing.clone();
            });
            debug!(device = %ctx.id, files = listing.file_count, "file listing synced");
        }
        Err(e) => log_sync_failure(&ctx.id, "files", &e),
    }
}

/// Write the record's durable slice back through the store.
async fn persist<S: DeviceStore>(ctx: &SupervisorContext<S>) {
    let Some(record) = ctx.registry.get(&ctx.id) else {
        return;
    };
    if let Err(e) = ctx.store.save(&record.to_config()).await {
        error!(device = %ctx.id, error = %e, "failed to persist device configuration");
    }
}

fn log_sync_failure(id: &DeviceId, what: &str, error: &ApiError) {
    warn!(device = %id, error = %error, "{what} sync failed, keeping previous data");
}

// ── Registry display-state helpers ───────────────────────────────────
//
// Mutations tolerate a missing record: the device may be removed while
// its supervisor is mid-transition, and the session loop notices on its
// next registry access.

fn mark_searching(registry: &DeviceRegistry, id: &DeviceId) {
    let _ = registry.mutate(id, |r| {
        r.set_connection_state(ConnectionState::Searching);
        r.print_status = ConnectionState::Searching.label().to_owned();
        r.status_class = classify::classify(ConnectionState::Searching.label());
        r.stream_health = StreamHealth::Degraded;
    });
}

fn mark_no_api(registry: &DeviceRegistry, id: &DeviceId) {
    let _ = registry.mutate(id, |r| {
        r.set_connection_state(ConnectionState::NoApi);
        r.print_status = ConnectionState::NoApi.label().to_owned();
        r.status_class = classify::classify(ConnectionState::NoApi.label());
        r.stream_health = StreamHealth::Down;
    });
}

fn mark_unreachable(registry: &DeviceRegistry, id: &DeviceId) {
    let _ = registry.mutate(id, |r| {
        r.set_connection_state(ConnectionState::Shutdown);
        r.print_status = "Offline".to_owned();
        r.status_class = classify::classify("Offline");
        r.stream_health = StreamHealth::Down;
    });
}
