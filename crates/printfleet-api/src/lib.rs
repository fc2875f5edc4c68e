// printfleet-api: Async Rust client for a printer's REST control API and
// its sockjs push-socket stream.

pub mod client;
pub mod error;
pub mod retry;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::DeviceClient;
pub use error::ApiError;
pub use retry::{RETRY_STEP_MS, TimeoutBudget};
pub use stream::{SessionEvent, StreamSession, throttle_interval_ms};
