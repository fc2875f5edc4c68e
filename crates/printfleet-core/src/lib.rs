//! Fleet connection supervision and shared device state.
//!
//! This crate keeps a farm of networked 3D printers continuously
//! connected and observable:
//!
//! - [`registry::DeviceRegistry`] — the shared in-memory state of every
//!   device, one [`model::DeviceRecord`] per printer.
//! - [`supervisor`] — one task per device running the handshake, state
//!   sync, and push-socket session loop.
//! - [`orchestrator::FleetOrchestrator`] — fleet lifecycle: init, add,
//!   update, remove, reconnect, ordering, and the aggregate feeds.
//! - [`store::DeviceStore`] — the persistence seam; [`store::MemoryStore`]
//!   ships for tests and ephemeral fleets.
//!
//! ```no_run
//! use printfleet_core::config::FleetConfig;
//! use printfleet_core::orchestrator::FleetOrchestrator;
//! use printfleet_core::store::MemoryStore;
//!
//! # async fn demo() -> Result<(), printfleet_core::error::CoreError> {
//! let fleet = FleetOrchestrator::new(FleetConfig::default(), MemoryStore::new());
//! let devices = fleet.init().await?;
//! println!("supervising {devices} devices");
//! # Ok(())
//! # }
//! ```

pub mod aggregates;
pub mod classify;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod supervisor;

pub use aggregates::{FleetSnapshotStats, FleetTotals};
pub use classify::{Category, Severity, StatusClass};
pub use config::FleetConfig;
pub use error::CoreError;
pub use history::{HistoryEvent, JobOutcome};
pub use model::{ConnectionState, DeviceId, DeviceRecord, StreamHealth};
pub use orchestrator::{DeviceUpdate, FleetOrchestrator, ReconnectOutcome, ReconnectStatus};
pub use registry::DeviceRegistry;
pub use store::{DeviceStore, MemoryStore, NewDevice, StoredDevice};
