//! # fleet-agent
//!
//! Agent runtime for fleetmesh.
//!
//! An agent is one worker process in the fleet. This crate gives it the
//! coordination contract: a main frame endpoint for its business protocol,
//! an independently scheduled health endpoint, registration and heartbeats
//! against the service registry, and ready-made clients for GPU leasing
//! and telemetry pushes. The business logic itself plugs in as a
//! [`MessageHandler`]; everything else is the runtime's job.

use thiserror::Error;

pub mod agent;
pub mod config;
pub mod health;

// Re-export commonly used types
pub use agent::{Agent, AgentBuilder, EchoHandler, MessageHandler};
pub use config::{AgentConfig, AgentSettings};
pub use health::{HealthEndpoint, HealthState};

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur during agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Wire error: {0}")]
    Wire(#[from] fleet_wire::WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] fleet_core::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Initialize logging from configuration.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &fleet_core::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids);

    match config.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }

    Ok(())
}
