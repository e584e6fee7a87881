//! # fleet-lease
//!
//! GPU memory lease manager for fleetmesh.
//!
//! Agents that need GPU memory ask the lease server for a time-bounded
//! grant before loading a model. The server is the single writer of one
//! invariant: the sum of estimated VRAM across active leases never exceeds
//! the configured budget. Admission is a serialized decision behind one
//! arbiter lock, even though requests arrive concurrently.
//!
//! Crashed holders are covered by TTL reclaim; there is no separate
//! cancellation signal. Release is idempotent because callers may race the
//! server-side reclaim.

use thiserror::Error;

pub mod client;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use client::{LeaseClient, LeaseHandle, LeaseSpec};
pub use protocol::{LeaseRequest, LeaseResponse, LeaseStats};
pub use server::{LeaseServer, LeaseServerHandle, LeaseState};

/// Result type for lease operations
pub type Result<T> = std::result::Result<T, LeaseError>;

/// Errors that can occur during lease operations
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Lease denied after {attempts} attempts: {vram_mb}mb would exceed the budget")]
    Exhausted { attempts: u32, vram_mb: u64 },

    #[error("Wire error: {0}")]
    Wire(#[from] fleet_wire::WireError),

    #[error("Resilience error: {0}")]
    Resilience(#[from] fleet_resilience::ResilienceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Core error: {0}")]
    Core(#[from] fleet_core::Error),
}

impl From<LeaseError> for fleet_core::Error {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Exhausted { attempts, vram_mb } => fleet_core::Error::capacity(format!(
                "{}mb still denied after {} attempts",
                vram_mb, attempts
            )),
            LeaseError::Wire(e) => e.into(),
            LeaseError::Resilience(e) => e.into(),
            LeaseError::Json(e) => fleet_core::Error::Json(e),
            LeaseError::Protocol(msg) => fleet_core::Error::protocol(msg),
            LeaseError::Core(e) => e,
        }
    }
}
