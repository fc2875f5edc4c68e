use thiserror::Error;

/// Top-level error type for the `printfleet-api` crate.
///
/// Covers every failure mode of the device-side surface: the HTTP control
/// API, the bounded-retry timeout policy, and the push-socket stream.
/// `printfleet-core` maps these into supervisor state transitions.
#[derive(Debug, Error)]
pub enum ApiError {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid device URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The configured API key cannot be sent as an HTTP header.
    #[error("Invalid API credential: {0}")]
    InvalidCredential(String),

    // ── Retry policy ────────────────────────────────────────────────
    /// The shared timeout budget hit its cutoff while fetching `resource`.
    #[error("Timeout budget exhausted fetching {resource} (budget {budget_ms}ms)")]
    TimeoutExceeded { resource: String, budget_ms: u64 },

    // ── Control API ─────────────────────────────────────────────────
    /// The control endpoint answered 503/404 -- the API is not there.
    #[error("Device API unavailable (HTTP {status})")]
    NoApi { status: u16 },

    /// Any other non-success status from the device.
    #[error("Unexpected device response (HTTP {status})")]
    Http { status: u16 },

    // ── Push socket ─────────────────────────────────────────────────
    /// Push-socket connection failed (refused, reset, upgrade rejected).
    #[error("Stream connection failed: {0}")]
    StreamConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl ApiError {
    /// Returns `true` for the definitive "no API here" handshake signal.
    pub fn is_no_api(&self) -> bool {
        matches!(self, Self::NoApi { .. })
    }

    /// Returns `true` if the bounded-retry budget was exhausted.
    pub fn is_timeout_exceeded(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }

    /// Returns `true` if the device host itself looks unreachable.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            Self::StreamConnect(_) => true,
            _ => false,
        }
    }
}
