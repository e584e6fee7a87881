//! Error handling for fleetmesh
//!
//! Provides the unified error taxonomy used across all fleetmesh components.
//! The variants mirror the coordination outcomes that callers are expected to
//! branch on: a denied lease is `CapacityExceeded`, an open circuit is
//! `DependencyUnavailable`, an unknown name is `NotFound`, and so on.

/// Result type alias for fleetmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for fleetmesh
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown agent name or lease id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lease denied because the VRAM budget would be exceeded
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A bounded wait elapsed without completing
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Circuit open: the downstream was not attempted
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Bulkhead saturated: concurrency ceiling and wait queue are full
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Shared message bus unreachable (independent of hub failures)
    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    /// Network-level failures (connect, read, write)
    #[error("Network error: {0}")]
    Network(String),

    /// Wire protocol violations (bad frame, unexpected reply)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a capacity exceeded error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a dependency unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    /// Create a resource exhausted error
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a bus unavailable error
    pub fn bus_unavailable(msg: impl Into<String>) -> Self {
        Self::BusUnavailable(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is worth retrying with backoff.
    ///
    /// Capacity denials, timeouts, and network failures are transient;
    /// an open circuit is not (retrying before the cooldown elapses is
    /// exactly what the breaker exists to prevent).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CapacityExceeded(_) | Error::Timeout(_) | Error::Network(_) | Error::Io(_)
        )
    }

    /// Check if this error indicates healthy self-protection rather than a
    /// downstream malfunction. Operators filter on this distinction.
    pub fn is_self_protection(&self) -> bool {
        matches!(
            self,
            Error::DependencyUnavailable(_) | Error::ResourceExhausted(_)
        )
    }

    /// Get the error category for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::CapacityExceeded(_) => "capacity_exceeded",
            Error::Timeout(_) => "timeout",
            Error::DependencyUnavailable(_) => "dependency_unavailable",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::BusUnavailable(_) => "bus_unavailable",
            Error::Network(_) => "network",
            Error::Protocol(_) => "protocol",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}
