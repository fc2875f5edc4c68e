// Control-API HTTP client
//
// Wraps `reqwest::Client` with device URL construction and the
// bounded-retry timeout policy. One instance per device; the timeout
// budget is shared across all instances in the fleet.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::error::ApiError;
use crate::retry::TimeoutBudget;
use crate::transport::TransportConfig;
use crate::types::{
    ConnectionResponse, FilesResponse, ProfilesResponse, SettingsResponse,
    SystemCommandsResponse, UsersResponse,
};

/// HTTP client for one printer's control API.
///
/// All requests carry the `X-Api-Key` credential and race against the
/// shared [`TimeoutBudget`]; non-timeout transport errors propagate
/// immediately without retry.
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: Url,
    budget: Arc<TimeoutBudget>,
}

impl DeviceClient {
    /// Create a client for the device at `address` (e.g. `http://10.0.0.4:5000`).
    pub fn new(
        address: &str,
        api_key: &str,
        budget: Arc<TimeoutBudget>,
        transport: &TransportConfig,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(address.trim_end_matches('/'))?;
        let http = transport.build_client(api_key)?;
        Ok(Self { http, base_url, budget })
    }

    /// The device's base control address.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Typed endpoint wrappers ──────────────────────────────────────

    pub async fn users(&self) -> Result<UsersResponse, ApiError> {
        self.get_retry("users").await
    }

    pub async fn printer_profiles(&self) -> Result<ProfilesResponse, ApiError> {
        self.get_retry("printerprofiles").await
    }

    pub async fn settings(&self) -> Result<SettingsResponse, ApiError> {
        self.get_retry("settings").await
    }

    pub async fn system_commands(&self) -> Result<SystemCommandsResponse, ApiError> {
        self.get_retry("system/commands").await
    }

    pub async fn connection(&self) -> Result<ConnectionResponse, ApiError> {
        self.get_retry("connection").await
    }

    pub async fn files(&self) -> Result<FilesResponse, ApiError> {
        self.get_retry("files?recursive=true").await
    }

    // ── Bounded-retry fetch ──────────────────────────────────────────

    /// Fetch `resource` with the escalating-timeout retry policy.
    ///
    /// Each attempt races the request against the budget's current value.
    /// On timeout the budget grows one step and the attempt repeats; once
    /// the budget reaches the cutoff, one step is restored and the call
    /// fails with [`ApiError::TimeoutExceeded`]. Any non-timeout error
    /// propagates on the spot.
    pub async fn get_retry<T: DeserializeOwned>(&self, resource: &str) -> Result<T, ApiError> {
        loop {
            let wait = self.budget.current();
            debug!(
                resource,
                timeout_ms = wait.as_millis() as u64,
                url = %self.base_url,
                "device API attempt"
            );

            match tokio::time::timeout(wait, self.get_once(resource)).await {
                Ok(result) => return result,
                Err(_elapsed) => {
                    if self.budget.at_cutoff() {
                        let budget_ms = self.budget.restore();
                        info!(resource, url = %self.base_url, "timeout budget exhausted");
                        return Err(ApiError::TimeoutExceeded {
                            resource: resource.to_owned(),
                            budget_ms,
                        });
                    }
                    let grown = self.budget.grow();
                    info!(
                        resource,
                        budget_ms = grown,
                        url = %self.base_url,
                        "request timed out, growing budget and retrying"
                    );
                }
            }
        }
    }

    /// Single GET attempt against `{base}/api/{resource}`.
    async fn get_once<T: DeserializeOwned>(&self, resource: &str) -> Result<T, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let url = Url::parse(&format!("{base}/api/{resource}"))?;
        let resp = self.http.get(url).send().await.map_err(ApiError::Transport)?;

        match resp.status() {
            status if status.is_success() => {
                let body = resp.text().await.map_err(ApiError::Transport)?;
                serde_json::from_str(&body).map_err(|e| ApiError::Deserialization {
                    message: e.to_string(),
                    body,
                })
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::NOT_FOUND => Err(ApiError::NoApi {
                status: resp.status().as_u16(),
            }),
            status => Err(ApiError::Http {
                status: status.as_u16(),
            }),
        }
    }
}
