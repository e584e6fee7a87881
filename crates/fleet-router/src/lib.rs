//! # fleet-router
//!
//! Weighted traffic router for fleetmesh.
//!
//! The router sits in front of two generations of the same service and
//! splits inbound traffic by a runtime-configurable percentage: each
//! request independently rolls a uniform integer in [1,100] and goes to
//! the new backend when the roll lands at or under the configured split.
//! There is no session affinity, the percentage is re-read on every
//! request so operators can ramp without a restart, and forwarded frames
//! are relayed verbatim in both directions - the router picks a
//! destination, nothing more.

use thiserror::Error;

pub mod policy;
pub mod router;

// Re-export commonly used types
pub use policy::PolicyHandle;
pub use router::{Backend, RouterHandle, RouterStats, WeightedRouter};

/// Result type for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors that can occur during router operations
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Invalid routing policy: {0}")]
    Policy(String),

    #[error("Backend unreachable: {0}")]
    Backend(String),

    #[error("Wire error: {0}")]
    Wire(#[from] fleet_wire::WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] fleet_core::Error),
}

impl From<RouterError> for fleet_core::Error {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::Policy(msg) => fleet_core::Error::config(msg),
            RouterError::Backend(msg) => fleet_core::Error::network(msg),
            RouterError::Wire(e) => e.into(),
            RouterError::Io(e) => fleet_core::Error::Io(e),
            RouterError::Core(e) => e,
        }
    }
}
