//! # fleet-core
//!
//! Core types, error taxonomy, and configuration for fleetmesh - a control
//! plane for a fleet of GPU worker agents.
//!
//! This crate provides the foundational pieces shared across all other
//! fleetmesh components:
//!
//! - Agent identity and health reporting types
//! - The unified error taxonomy used on every coordination path
//! - Configuration schema with layered loading (defaults, file, environment)

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{
    Config, LeaseConfig, LoggingConfig, RegistryConfig, ResilienceConfig, RouterConfig,
    TelemetryConfig,
};
pub use error::{Error, Result};
pub use types::{AgentIdentity, AgentName, HealthReport, HealthStatus};
