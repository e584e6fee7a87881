//! Core type definitions for fleetmesh

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Unique name of an agent in the fleet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentName(String);

impl AgentName {
    /// Create a new AgentName from a string
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a random AgentName
    pub fn generate() -> Self {
        Self(format!("agent-{}", Uuid::new_v4()))
    }

    /// Get the string representation of the name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for AgentName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Identity of an agent process: where its endpoints live.
///
/// Created at process start and immutable for the process lifetime. The
/// main port carries the agent's business protocol; the health port answers
/// liveness polls independently of the main path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent name
    pub name: AgentName,

    /// Host the agent is reachable on
    pub host: String,

    /// Port of the main request/response endpoint
    pub main_port: u16,

    /// Port of the health endpoint
    pub health_port: u16,
}

impl AgentIdentity {
    /// Create a new agent identity
    pub fn new(name: impl Into<AgentName>, host: impl Into<String>, main_port: u16, health_port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            main_port,
            health_port,
        }
    }

    /// Endpoint of the main socket in host:port form
    pub fn main_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.main_port)
    }

    /// Socket address of the main endpoint, for numeric hosts
    pub fn main_addr(&self) -> crate::Result<SocketAddr> {
        self.main_endpoint()
            .parse()
            .map_err(|e| crate::Error::config(format!("invalid main address: {}", e)))
    }

    /// URL of the health endpoint
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.host, self.health_port)
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.main_port)
    }
}

/// Liveness/readiness status reported by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Agent is fully operational
    Ok,
    /// Agent is serving but impaired
    Degraded,
    /// Agent should not receive traffic
    Unhealthy,
}

impl HealthStatus {
    /// Whether the agent should be kept in discovery results
    pub fn is_serving(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ok" => Ok(HealthStatus::Ok),
            "degraded" => Ok(HealthStatus::Degraded),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            _ => Err(format!("Unknown health status: {}", s)),
        }
    }
}

/// Snapshot produced by an agent on every health poll.
///
/// Only the most recent report per agent is retained anywhere; there is no
/// history. The metrics map is free-form and flows through to the telemetry
/// hubs untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Current status
    pub status: HealthStatus,

    /// Wall-clock time the report was produced
    pub timestamp: DateTime<Utc>,

    /// Seconds since the agent process started
    pub uptime_seconds: u64,

    /// Free-form metrics
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
}

impl HealthReport {
    /// Create a report with the given status and uptime, stamped now
    pub fn new(status: HealthStatus, uptime_seconds: u64) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            uptime_seconds,
            metrics: HashMap::new(),
        }
    }

    /// Attach a metric value
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_creation() {
        let name = AgentName::new("translator-1");
        assert_eq!(name.as_str(), "translator-1");

        let generated = AgentName::generate();
        assert!(generated.as_str().starts_with("agent-"));
        assert_ne!(name, generated);
    }

    #[test]
    fn test_identity_addresses() {
        let identity = AgentIdentity::new("vision-0", "127.0.0.1", 5800, 5801);
        assert_eq!(identity.main_addr().unwrap().port(), 5800);
        assert_eq!(identity.health_url(), "http://127.0.0.1:5801/health");
        assert_eq!(identity.to_string(), "vision-0@127.0.0.1:5800");
    }

    #[test]
    fn test_health_status_parsing() {
        assert_eq!("ok".parse::<HealthStatus>().unwrap(), HealthStatus::Ok);
        assert_eq!(
            "degraded".parse::<HealthStatus>().unwrap(),
            HealthStatus::Degraded
        );
        assert!("sideways".parse::<HealthStatus>().is_err());
    }

    #[test]
    fn test_health_status_serving() {
        assert!(HealthStatus::Ok.is_serving());
        assert!(HealthStatus::Degraded.is_serving());
        assert!(!HealthStatus::Unhealthy.is_serving());
    }

    #[test]
    fn test_health_report_round_trip() {
        let report = HealthReport::new(HealthStatus::Ok, 120)
            .with_metric("queue_depth", 3)
            .with_metric("gpu_util", 0.82);

        let json = serde_json::to_string(&report).unwrap();
        let parsed: HealthReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, HealthStatus::Ok);
        assert_eq!(parsed.uptime_seconds, 120);
        assert_eq!(parsed.metrics.get("queue_depth"), Some(&serde_json::json!(3)));
    }
}
