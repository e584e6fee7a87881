//! Configuration management for fleetmesh
//!
//! Provides a layered configuration system: defaults, then an optional YAML
//! file, then `FLEETMESH_`-prefixed environment variables. Every recognized
//! option of the coordination plane lives here so operators can retune a
//! deployment without code changes.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for fleetmesh components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Service registry settings
    pub registry: RegistryConfig,

    /// GPU lease manager settings
    pub lease: LeaseConfig,

    /// Circuit breaker / bulkhead settings
    pub resilience: ResilienceConfig,

    /// Dual-hub telemetry settings
    pub telemetry: TelemetryConfig,

    /// Weighted traffic router settings
    pub router: RouterConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Ok(config_path) = std::env::var("FLEETMESH_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./fleetmesh.yaml", "/etc/fleetmesh/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FLEETMESH")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path.into()));

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.lease.validate()?;
        self.resilience.validate()?;
        self.router.validate()?;
        Ok(())
    }
}

/// Service registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Address the registry server binds to / clients connect to
    pub addr: String,

    /// Seconds without a heartbeat before an entry is considered stale
    pub staleness_window_secs: u64,

    /// Interval between staleness sweeps
    pub reap_interval_secs: u64,

    /// Enable active health polling of registered agents
    pub health_poll_enabled: bool,

    /// Interval between health polls
    pub health_poll_interval_secs: u64,

    /// Consecutive failed polls before an entry is dropped
    pub health_poll_failures: u32,

    /// Per-poll timeout in milliseconds
    pub health_poll_timeout_ms: u64,

    /// Request timeout for registry clients in milliseconds
    pub request_timeout_ms: u64,
}

impl RegistryConfig {
    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7400".to_string(),
            staleness_window_secs: 30,
            reap_interval_secs: 5,
            health_poll_enabled: false,
            health_poll_interval_secs: 10,
            health_poll_failures: 3,
            health_poll_timeout_ms: 2000,
            request_timeout_ms: 3000,
        }
    }
}

/// Defaults applied to a named class of lease clients (e.g. "translator")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientClassConfig {
    /// Default VRAM estimate in megabytes
    pub vram_estimate_mb: u64,

    /// Default lease TTL in seconds
    pub ttl_seconds: u64,

    /// Default priority (lower = more urgent)
    pub priority: u32,
}

impl Default for ClientClassConfig {
    fn default() -> Self {
        Self {
            vram_estimate_mb: 2048,
            ttl_seconds: 300,
            priority: 5,
        }
    }
}

/// GPU lease manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Address the lease server binds to / clients connect to
    pub addr: String,

    /// Total VRAM budget in megabytes the server may lease out
    pub vram_budget_mb: u64,

    /// Interval between TTL reclaim sweeps
    pub reclaim_interval_secs: u64,

    /// Request timeout for lease clients in milliseconds
    pub request_timeout_ms: u64,

    /// Maximum acquire attempts before giving up
    pub max_attempts: u32,

    /// Initial retry backoff in milliseconds
    pub backoff_initial_ms: u64,

    /// Backoff cap in milliseconds
    pub backoff_cap_ms: u64,

    /// Per-class defaults keyed by client class name
    #[serde(default)]
    pub client_classes: HashMap<String, ClientClassConfig>,
}

impl LeaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vram_budget_mb == 0 {
            return Err(crate::Error::config("VRAM budget must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::config("Lease max attempts must be > 0"));
        }
        if self.backoff_initial_ms > self.backoff_cap_ms {
            return Err(crate::Error::config(
                "Lease backoff initial must not exceed its cap",
            ));
        }
        Ok(())
    }

    /// Defaults for a client class, falling back to the built-in class
    pub fn class(&self, name: &str) -> ClientClassConfig {
        self.client_classes.get(name).cloned().unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7410".to_string(),
            vram_budget_mb: 24_000,
            reclaim_interval_secs: 5,
            request_timeout_ms: 3000,
            max_attempts: 6,
            backoff_initial_ms: 250,
            backoff_cap_ms: 2000,
            client_classes: HashMap::new(),
        }
    }
}

/// Settings for one named circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Failures within the window before the circuit opens
    pub failure_threshold: u32,

    /// Rolling window the failure counter tracks, in seconds
    pub failure_window_secs: u64,

    /// How long the circuit stays open before a half-open trial, in seconds
    pub timeout_duration_secs: u64,

    /// Per-call timeout in milliseconds; a timeout counts as a failure
    pub request_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 60,
            timeout_duration_secs: 30,
            request_timeout_ms: 5000,
        }
    }
}

/// How a bulkhead isolates callers of a saturated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// Callers run the operation themselves, gated by a semaphore with a
    /// bounded wait queue
    #[default]
    Semaphore,

    /// Operations are dispatched to a dedicated worker pool with a
    /// bounded job queue
    WorkerPool,
}

/// Settings for one named bulkhead pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkheadSettings {
    /// Maximum concurrent in-flight calls
    pub max_concurrent: u32,

    /// Callers allowed to wait for a slot; 0 rejects immediately
    pub max_queue_size: u32,

    /// How long a queued caller may wait for a slot, in milliseconds
    pub acquire_timeout_ms: u64,

    /// Isolation strategy for this pool
    #[serde(default)]
    pub isolation: IsolationStrategy,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_queue_size: 16,
            acquire_timeout_ms: 2000,
            isolation: IsolationStrategy::Semaphore,
        }
    }
}

/// Circuit breaker / bulkhead settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    /// Defaults for breakers without a named override
    pub default_breaker: BreakerSettings,

    /// Defaults for bulkheads without a named override
    pub default_bulkhead: BulkheadSettings,

    /// Per-name breaker overrides
    #[serde(default)]
    pub breakers: HashMap<String, BreakerSettings>,

    /// Per-name bulkhead overrides
    #[serde(default)]
    pub bulkheads: HashMap<String, BulkheadSettings>,
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in std::iter::once(("default", &self.default_breaker))
            .chain(self.breakers.iter().map(|(n, s)| (n.as_str(), s)))
        {
            if settings.failure_threshold == 0 {
                return Err(crate::Error::config(format!(
                    "Breaker '{}': failure threshold must be > 0",
                    name
                )));
            }
        }
        for (name, settings) in std::iter::once(("default", &self.default_bulkhead))
            .chain(self.bulkheads.iter().map(|(n, s)| (n.as_str(), s)))
        {
            if settings.max_concurrent == 0 {
                return Err(crate::Error::config(format!(
                    "Bulkhead '{}': max concurrent must be > 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Settings for a named breaker, falling back to the defaults
    pub fn breaker(&self, name: &str) -> BreakerSettings {
        self.breakers
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_breaker.clone())
    }

    /// Settings for a named bulkhead, falling back to the defaults
    pub fn bulkhead(&self, name: &str) -> BulkheadSettings {
        self.bulkheads
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_bulkhead.clone())
    }
}

/// Dual-hub telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Primary hub base URL
    pub primary_hub_url: String,

    /// Fallback hub base URL
    pub fallback_hub_url: String,

    /// Shared publish/subscribe bus address
    pub bus_addr: String,

    /// Subject snapshots are mirrored onto
    pub bus_subject: String,

    /// Address the telemetry service binds for agent snapshot pushes
    pub ingest_addr: String,

    /// Per-publish timeout in milliseconds
    pub publish_timeout_ms: u64,
}

impl TelemetryConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            primary_hub_url: "http://127.0.0.1:7420".to_string(),
            fallback_hub_url: "http://127.0.0.1:7421".to_string(),
            bus_addr: "127.0.0.1:7430".to_string(),
            bus_subject: "fleet.telemetry".to_string(),
            ingest_addr: "127.0.0.1:7440".to_string(),
            publish_timeout_ms: 2000,
        }
    }
}

/// Weighted traffic router settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Port the router listens on
    pub frontend_port: u16,

    /// Host both backends live on (used when no registry names are set)
    pub backend_host: String,

    /// Port of the legacy backend
    pub legacy_backend_port: u16,

    /// Port of the new backend
    pub new_backend_port: u16,

    /// Percentage of traffic sent to the new backend, 0..=100
    pub traffic_percent_to_new: u8,

    /// Registry name of the legacy backend, if resolved via the registry
    pub legacy_backend_name: Option<String>,

    /// Registry name of the new backend, if resolved via the registry
    pub new_backend_name: Option<String>,

    /// Per-forward round-trip timeout in milliseconds
    pub forward_timeout_ms: u64,
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.traffic_percent_to_new > 100 {
            return Err(crate::Error::config(
                "Router traffic percent must be within 0..=100",
            ));
        }
        Ok(())
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            frontend_port: 7450,
            backend_host: "127.0.0.1".to_string(),
            legacy_backend_port: 7451,
            new_backend_port: 7452,
            traffic_percent_to_new: 0,
            legacy_backend_name: None,
            new_backend_name: None,
            forward_timeout_ms: 5000,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json or text)
    pub format: String,

    /// Include the emitting module path
    pub show_target: bool,

    /// Include thread ids
    pub show_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: true,
            show_thread_ids: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease.max_attempts, 6);
        assert_eq!(config.lease.backoff_initial_ms, 250);
        assert_eq!(config.lease.backoff_cap_ms, 2000);
    }

    #[test]
    fn test_lease_validation() {
        let mut config = Config::default();
        config.lease.vram_budget_mb = 0;
        assert!(config.validate().is_err());

        config.lease.vram_budget_mb = 1024;
        config.lease.backoff_initial_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_router_percent_bounds() {
        let mut config = RouterConfig::default();
        assert!(config.validate().is_ok());

        config.traffic_percent_to_new = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resilience_named_fallbacks() {
        let mut config = ResilienceConfig::default();
        config.breakers.insert(
            "cloud-asr".to_string(),
            BreakerSettings {
                failure_threshold: 3,
                ..Default::default()
            },
        );

        assert_eq!(config.breaker("cloud-asr").failure_threshold, 3);
        assert_eq!(
            config.breaker("unnamed").failure_threshold,
            config.default_breaker.failure_threshold
        );
        assert_eq!(
            config.bulkhead("unnamed").max_concurrent,
            config.default_bulkhead.max_concurrent
        );
    }

    #[test]
    fn test_client_class_fallback() {
        let mut config = LeaseConfig::default();
        config.client_classes.insert(
            "vision".to_string(),
            ClientClassConfig {
                vram_estimate_mb: 8192,
                ttl_seconds: 120,
                priority: 1,
            },
        );

        assert_eq!(config.class("vision").vram_estimate_mb, 8192);
        assert_eq!(config.class("unknown").vram_estimate_mb, 2048);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.registry.addr, config.registry.addr);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.router.frontend_port, config.router.frontend_port);
    }
}
