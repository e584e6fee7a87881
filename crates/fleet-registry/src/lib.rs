//! # fleet-registry
//!
//! Service registry for fleetmesh: the directory mapping agent identity to
//! network location.
//!
//! This crate provides:
//! - The in-memory registry table with idempotent registration, typed
//!   not-found lookups, and heartbeat-driven staleness tracking
//! - The registry server (frame protocol handler, staleness reaper, and an
//!   optional active health poller)
//! - The registry client used by agents and the traffic router
//!
//! The registry keeps no persistent store: on restart the fleet simply
//! re-registers, which is the expected recovery path, not a failure.

use thiserror::Error;

pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use client::RegistryClient;
pub use protocol::{RegistryRequest, RegistryResponse};
pub use registry::{RegistryEntry, RegistryStats, ServiceRegistry};
pub use server::{RegistryServer, RegistryServerHandle};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Wire error: {0}")]
    Wire(#[from] fleet_wire::WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] fleet_core::Error),
}

impl From<RegistryError> for fleet_core::Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => fleet_core::Error::not_found(name),
            RegistryError::InvalidRequest(msg) => fleet_core::Error::protocol(msg),
            RegistryError::Wire(e) => e.into(),
            RegistryError::Io(e) => fleet_core::Error::Io(e),
            RegistryError::Json(e) => fleet_core::Error::Json(e),
            RegistryError::Core(e) => e,
        }
    }
}
