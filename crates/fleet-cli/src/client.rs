//! Thin client wrapper for CLI commands.

use anyhow::Context;
use fleet_core::{AgentIdentity, AgentName, HealthReport};
use fleet_registry::{RegistryClient, RegistryStats};
use std::time::Duration;

/// Bundles the control-plane clients a CLI invocation needs
pub struct FleetClient {
    registry: RegistryClient,
    http: reqwest::Client,
    timeout: Duration,
}

impl FleetClient {
    /// Create a client for the given registry address
    pub fn new(registry_addr: &str, timeout: Duration) -> Self {
        Self {
            registry: RegistryClient::new(registry_addr, timeout),
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Resolve an agent's endpoints
    pub async fn lookup(&self, name: &AgentName) -> anyhow::Result<AgentIdentity> {
        self.registry
            .get_agent_endpoint(name)
            .await
            .with_context(|| format!("looking up agent '{}'", name))
    }

    /// Resolve an agent, then poll its health endpoint
    pub async fn health(&self, name: &AgentName) -> anyhow::Result<HealthReport> {
        let identity = self.lookup(name).await?;
        let report = self
            .http
            .get(identity.health_url())
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("polling health of '{}'", name))?
            .error_for_status()?
            .json::<HealthReport>()
            .await
            .context("decoding health report")?;
        Ok(report)
    }

    /// Registry statistics
    pub async fn registry_stats(&self) -> anyhow::Result<RegistryStats> {
        self.registry
            .stats()
            .await
            .context("fetching registry statistics")
    }
}
