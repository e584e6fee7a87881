//! Registry client used by agents and the traffic router.

use crate::protocol::{RegistryErrorKind, RegistryRequest, RegistryResponse};
use crate::RegistryStats;
use fleet_core::{AgentIdentity, AgentName, Error, Result};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Thin client over the registry wire protocol.
///
/// Each call is one short-lived request/reply exchange with an explicit
/// timeout. Errors come back as the core taxonomy so callers can branch on
/// `NotFound` versus transport failures.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    addr: String,
    timeout: Duration,
}

impl RegistryClient {
    /// Create a client for the registry at `addr`
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Registry address this client talks to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn exchange(&self, request: &RegistryRequest) -> Result<RegistryResponse> {
        let response: RegistryResponse = fleet_wire::call(&self.addr, request, self.timeout)
            .await
            .map_err(Error::from)?;

        if let RegistryResponse::Error { kind, message } = &response {
            return Err(match kind {
                RegistryErrorKind::NotFound => Error::not_found(message.clone()),
                RegistryErrorKind::InvalidRequest => Error::protocol(message.clone()),
            });
        }
        Ok(response)
    }

    /// Register or refresh an agent
    pub async fn register_agent(
        &self,
        identity: AgentIdentity,
        capabilities: BTreeSet<String>,
    ) -> Result<()> {
        debug!(agent = %identity.name, registry = %self.addr, "registering agent");
        match self
            .exchange(&RegistryRequest::RegisterAgent {
                identity,
                capabilities,
            })
            .await?
        {
            RegistryResponse::Ok => Ok(()),
            other => Err(Error::protocol(format!("unexpected reply: {:?}", other))),
        }
    }

    /// Remove an agent
    pub async fn deregister(&self, name: &AgentName) -> Result<()> {
        match self
            .exchange(&RegistryRequest::Deregister { name: name.clone() })
            .await?
        {
            RegistryResponse::Ok => Ok(()),
            other => Err(Error::protocol(format!("unexpected reply: {:?}", other))),
        }
    }

    /// Resolve an agent's endpoints
    pub async fn get_agent_endpoint(&self, name: &AgentName) -> Result<AgentIdentity> {
        match self
            .exchange(&RegistryRequest::GetAgentEndpoint { name: name.clone() })
            .await?
        {
            RegistryResponse::Endpoint {
                host,
                port,
                health_check_port,
            } => Ok(AgentIdentity::new(name.clone(), host, port, health_check_port)),
            other => Err(Error::protocol(format!("unexpected reply: {:?}", other))),
        }
    }

    /// Refresh an agent's liveness
    pub async fn heartbeat(&self, name: &AgentName) -> Result<()> {
        match self
            .exchange(&RegistryRequest::Heartbeat { name: name.clone() })
            .await?
        {
            RegistryResponse::Ok => Ok(()),
            other => Err(Error::protocol(format!("unexpected reply: {:?}", other))),
        }
    }

    /// List agents advertising a capability
    pub async fn discover(&self, capability: &str) -> Result<Vec<AgentIdentity>> {
        match self
            .exchange(&RegistryRequest::Discover {
                capability: capability.to_string(),
            })
            .await?
        {
            RegistryResponse::Agents { agents } => Ok(agents),
            other => Err(Error::protocol(format!("unexpected reply: {:?}", other))),
        }
    }

    /// Registry statistics
    pub async fn stats(&self) -> Result<RegistryStats> {
        match self.exchange(&RegistryRequest::Stats).await? {
            RegistryResponse::Stats { stats } => Ok(stats),
            other => Err(Error::protocol(format!("unexpected reply: {:?}", other))),
        }
    }
}
