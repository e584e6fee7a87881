//! # fleet-telemetry
//!
//! Telemetry coordination for fleetmesh.
//!
//! The fleet's health and metric snapshots funnel through one telemetry
//! service per deployment. That service survives the loss of either
//! machine by writing through a [`DualHubCoordinator`] - two redundant
//! ingestion hubs with sticky automatic failover - and independently
//! mirroring every payload onto a shared publish/subscribe bus so peer
//! consumers are never hostage to hub availability.

use thiserror::Error;

pub mod bus;
pub mod coordinator;
pub mod service;

// Re-export commonly used types
pub use bus::{BusEnvelope, BusPublisher};
pub use coordinator::{DualHubCoordinator, HubCoordinationState};
pub use service::{TelemetryClient, TelemetryService, TelemetryServiceHandle};

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur during telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Hub unreachable: {0}")]
    HubUnavailable(String),

    #[error("Bus unreachable: {0}")]
    BusUnavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Wire error: {0}")]
    Wire(#[from] fleet_wire::WireError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] fleet_core::Error),
}

impl From<TelemetryError> for fleet_core::Error {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::HubUnavailable(msg) => fleet_core::Error::unavailable(msg),
            TelemetryError::BusUnavailable(msg) => fleet_core::Error::bus_unavailable(msg),
            TelemetryError::Http(e) => fleet_core::Error::network(e.to_string()),
            TelemetryError::Wire(e) => e.into(),
            TelemetryError::Json(e) => fleet_core::Error::Json(e),
            TelemetryError::Core(e) => e,
        }
    }
}
