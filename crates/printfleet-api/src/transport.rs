// Shared transport configuration for building reqwest::Client instances.
//
// Every device client injects its credential as a default `X-Api-Key`
// header; connection tuning is shared through this module so per-device
// clients stay identical apart from the key.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::ApiError;

/// Header carrying the device credential on every control-API request.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Shared transport configuration for building HTTP clients.
///
/// No overall request timeout is set here: the bounded-retry fetcher
/// races each attempt against the shared [`TimeoutBudget`](crate::TimeoutBudget)
/// instead, so a reqwest-level timeout would fire behind its back.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("printfleet/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` with the credential installed as a
    /// default header.
    pub fn build_client(&self, api_key: &str) -> Result<reqwest::Client, ApiError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).map_err(|_| {
            ApiError::InvalidCredential(
                "API key contains characters not valid in a header".to_owned(),
            )
        })?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(ApiError::Transport)
    }
}
