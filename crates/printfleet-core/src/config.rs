//! Fleet-level tunables.

use std::time::Duration;

use printfleet_api::transport::TransportConfig;

/// Configuration for a [`FleetOrchestrator`](crate::orchestrator::FleetOrchestrator).
///
/// The defaults mirror a small farm on a local network; every value can be
/// overridden before the orchestrator is built.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Initial value of the shared API timeout budget.
    pub api_timeout: Duration,
    /// Ceiling the budget may grow to before a fetch gives up.
    pub api_retry_cutoff: Duration,
    /// Delay before re-running a failed handshake.
    pub handshake_retry: Duration,
    /// Delay before re-opening a dropped push socket.
    pub stream_retry: Duration,
    /// Requested device status cadence, in seconds per frame.
    pub polling_seconds: f64,
    /// How often the cheap per-status counters are recomputed.
    pub snapshot_stats_interval: Duration,
    /// How often the heavier fleet-wide totals are recomputed.
    pub fleet_totals_interval: Duration,
    /// Buffered capacity of the job history event channel.
    pub history_capacity: usize,
    /// HTTP transport settings shared by every device client.
    pub transport: TransportConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_millis(1_000),
            api_retry_cutoff: Duration::from_millis(10_000),
            handshake_retry: Duration::from_secs(30),
            stream_retry: Duration::from_secs(5),
            polling_seconds: 0.5,
            snapshot_stats_interval: Duration::from_millis(500),
            fleet_totals_interval: Duration::from_secs(5),
            history_capacity: 256,
            transport: TransportConfig::default(),
        }
    }
}
