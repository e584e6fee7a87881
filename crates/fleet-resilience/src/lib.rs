//! # fleet-resilience
//!
//! Resiliency layer wrapping every outbound call an agent makes: named
//! circuit breakers, bulkhead isolation pools, and bounded retry with
//! exponential backoff.
//!
//! The entry point is [`ResilienceLayer`] - an explicit owned-state object
//! holding one breaker and one bulkhead table per process. Callers pass the
//! underlying operation as a value and get back its result or a typed
//! error; the state machines live outside the wrapped functions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleet_resilience::ResilienceLayer;
//! use fleet_core::config::ResilienceConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layer = ResilienceLayer::new(ResilienceConfig::default());
//!
//! let reply = layer
//!     .protect("cloud-asr", || async {
//!         // ... the actual downstream call ...
//!         Ok("transcript".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod breaker;
pub mod bulkhead;
pub mod layer;
pub mod retry;

// Re-export commonly used types
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use bulkhead::{Bulkhead, BulkheadSnapshot, WorkerPool};
pub use layer::ResilienceLayer;
pub use retry::RetryPolicy;

/// Result type for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors produced by the resiliency layer.
///
/// `CircuitOpen` and `BulkheadFull` are self-protection outcomes: the
/// downstream was never attempted. `Downstream` wraps a genuine failure of
/// the protected call. Logs must keep the two distinguishable.
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Circuit '{0}' is open, call not attempted")]
    CircuitOpen(String),

    #[error("Bulkhead '{0}' is saturated, call rejected")]
    BulkheadFull(String),

    #[error("Call through '{name}' timed out after {timeout:?}")]
    Timeout {
        name: String,
        timeout: std::time::Duration,
    },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Downstream error: {0}")]
    Downstream(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ResilienceError> for fleet_core::Error {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::CircuitOpen(name) => {
                fleet_core::Error::unavailable(format!("circuit '{}' open", name))
            }
            ResilienceError::BulkheadFull(name) => {
                fleet_core::Error::exhausted(format!("bulkhead '{}' full", name))
            }
            ResilienceError::Timeout { name, timeout } => {
                fleet_core::Error::timeout(format!("'{}' after {:?}", name, timeout))
            }
            ResilienceError::RetriesExhausted { attempts, last } => {
                fleet_core::Error::unavailable(format!("{} attempts exhausted: {}", attempts, last))
            }
            ResilienceError::Downstream(e) => fleet_core::Error::Other(e),
            ResilienceError::Internal(msg) => fleet_core::Error::internal(msg),
        }
    }
}
