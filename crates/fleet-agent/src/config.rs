//! Agent configuration.

use crate::{AgentError, Result};
use fleet_core::AgentName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Agent-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Unique agent name; generated when absent
    pub name: Option<String>,

    /// Host this agent advertises to the registry
    pub host: String,

    /// Main endpoint port (0 picks an ephemeral port)
    pub main_port: u16,

    /// Health endpoint port (0 picks an ephemeral port)
    pub health_port: u16,

    /// Capabilities advertised to the registry
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Seconds between heartbeats
    pub heartbeat_interval_secs: u64,

    /// Attempts before giving up on initial registration
    pub registration_attempts: u32,

    /// Lease client class this agent belongs to
    pub client_class: String,

    /// Push health snapshots to the telemetry service
    pub telemetry_push_enabled: bool,

    /// Seconds between telemetry pushes
    pub telemetry_push_interval_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: None,
            host: "127.0.0.1".to_string(),
            main_port: 0,
            health_port: 0,
            capabilities: Vec::new(),
            heartbeat_interval_secs: 10,
            registration_attempts: 5,
            client_class: "default".to_string(),
            telemetry_push_enabled: false,
            telemetry_push_interval_secs: 15,
        }
    }
}

impl AgentSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// The configured name, or a generated one
    pub fn agent_name(&self) -> AgentName {
        match &self.name {
            Some(name) => AgentName::new(name.clone()),
            None => AgentName::generate(),
        }
    }
}

/// Full configuration for one agent process: its own settings plus the
/// fleet-wide sections (registry, lease, resilience, telemetry, logging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Agent-specific settings
    pub agent: AgentSettings,

    /// Fleet-wide coordination settings
    #[serde(flatten)]
    pub core: fleet_core::Config,
}

impl AgentConfig {
    /// Load with the standard layering: defaults, optional YAML file,
    /// `FLEETMESH_`-prefixed environment.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(
            config::Config::try_from(&Self::default())
                .map_err(|e| AgentError::Config(e.to_string()))?,
        );

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

        let parsed: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AgentError::Config(e.to_string()))?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(
                config::Config::try_from(&Self::default())
                    .map_err(|e| AgentError::Config(e.to_string()))?,
            )
            .add_source(config::File::from(path.into()));

        let parsed: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AgentError::Config(e.to_string()))?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.agent.host.is_empty() {
            return Err(AgentError::Config("Agent host cannot be empty".to_string()));
        }
        if self.agent.heartbeat_interval_secs == 0 {
            return Err(AgentError::Config(
                "Heartbeat interval must be > 0".to_string(),
            ));
        }
        if self.agent.registration_attempts == 0 {
            return Err(AgentError::Config(
                "Registration attempts must be > 0".to_string(),
            ));
        }
        self.core.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.heartbeat_interval_secs, 10);
    }

    #[test]
    fn test_generated_name_when_unset() {
        let settings = AgentSettings::default();
        let name = settings.agent_name();
        assert!(name.as_str().starts_with("agent-"));

        let named = AgentSettings {
            name: Some("translator-1".to_string()),
            ..Default::default()
        };
        assert_eq!(named.agent_name().as_str(), "translator-1");
    }

    #[test]
    fn test_validation_rejects_zero_heartbeat() {
        let mut config = AgentConfig::default();
        config.agent.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization_flattens_core_sections() {
        let config = AgentConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        // Core sections sit at the top level beside `agent`.
        assert!(json.get("agent").is_some());
        assert!(json.get("registry").is_some());
        assert!(json.get("lease").is_some());
    }
}
