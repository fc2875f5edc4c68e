// Integration tests for `DeviceClient` using wiremock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use printfleet_api::transport::TransportConfig;
use printfleet_api::{ApiError, DeviceClient, RETRY_STEP_MS, TimeoutBudget};

// ── Helpers ─────────────────────────────────────────────────────────

fn budget(initial_ms: u64, cutoff_ms: u64) -> Arc<TimeoutBudget> {
    Arc::new(TimeoutBudget::new(
        Duration::from_millis(initial_ms),
        Duration::from_millis(cutoff_ms),
    ))
}

async fn setup(budget: Arc<TimeoutBudget>) -> (MockServer, DeviceClient) {
    let server = MockServer::start().await;
    let client = DeviceClient::new(
        &server.uri(),
        "test-key",
        budget,
        &TransportConfig::default(),
    )
    .unwrap();
    (server, client)
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn users_sends_api_key_header() {
    let (server, client) = setup(budget(5_000, 30_000)).await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(header("X-Api-Key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{ "name": "boss", "admin": true }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let users = client.users().await.unwrap();
    assert_eq!(users.admin_name(), Some("boss"));
}

#[tokio::test]
async fn files_requests_recursive_listing() {
    let (server, client) = setup(budget(5_000, 30_000)).await;

    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(query_param("recursive", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "free": 11_111, "total": 22_222,
            "files": [
                { "type": "machinecode", "path": "benchy.gcode", "name": "benchy.gcode" }
            ]
        })))
        .mount(&server)
        .await;

    let files = client.files().await.unwrap();
    assert_eq!(files.free, Some(11_111));
    assert_eq!(files.files.len(), 1);
}

#[tokio::test]
async fn connection_state_parses() {
    let (server, client) = setup(budget(5_000, 30_000)).await;

    Mock::given(method("GET"))
        .and(path("/api/connection"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "current": { "state": "Operational", "port": "/dev/ttyUSB0" },
            "options": { "ports": ["/dev/ttyUSB0"] }
        })))
        .mount(&server)
        .await;

    let conn = client.connection().await.unwrap();
    assert_eq!(conn.current.state, "Operational");
}

// ── Error taxonomy ──────────────────────────────────────────────────

#[tokio::test]
async fn service_unavailable_is_no_api() {
    let (server, client) = setup(budget(5_000, 30_000)).await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.users().await.unwrap_err();
    assert!(err.is_no_api(), "got {err:?}");
    assert!(matches!(err, ApiError::NoApi { status: 503 }));
}

#[tokio::test]
async fn not_found_is_no_api() {
    let (server, client) = setup(budget(5_000, 30_000)).await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client.users().await.unwrap_err().is_no_api());
}

#[tokio::test]
async fn other_status_is_not_retried() {
    let (server, client) = setup(budget(5_000, 30_000)).await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.users().await.unwrap_err();
    assert!(matches!(err, ApiError::Http { status: 401 }));
}

// ── Bounded-retry policy ────────────────────────────────────────────

#[tokio::test]
async fn timeout_at_cutoff_fails_and_restores_budget() {
    // Budget already at its cutoff: the first timed-out attempt must fail
    // without retrying, handing one step back.
    let shared = budget(200, 200);
    let (server, client) = setup(Arc::clone(&shared)).await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "users": [] }))
                .set_delay(Duration::from_millis(2_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let before = shared.current_ms();
    let err = client.users().await.unwrap_err();
    assert!(err.is_timeout_exceeded(), "got {err:?}");
    assert!(shared.current_ms() <= before);
}

#[tokio::test]
async fn timeout_grows_budget_then_succeeds() {
    // First attempt times out at 100ms; the grown budget comfortably covers
    // the 400ms response on the retry.
    let shared = budget(100, 100 + RETRY_STEP_MS);
    let (server, client) = setup(Arc::clone(&shared)).await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "users": [] }))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let users = client.users().await.unwrap();
    assert!(users.is_fresh());
    // The grown budget is left in the pool: borrowed patience is shared.
    assert_eq!(shared.current_ms(), 100 + RETRY_STEP_MS);
}
