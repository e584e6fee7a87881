//! Registry wire protocol.
//!
//! Requests and responses travel as JSON frames over the fleet-wire
//! transport. The `op` tag keeps the protocol self-describing on the wire.

use crate::RegistryStats;
use fleet_core::{AgentIdentity, AgentName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Requests a registry client can send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegistryRequest {
    /// Register or refresh an agent
    RegisterAgent {
        identity: AgentIdentity,
        #[serde(default)]
        capabilities: BTreeSet<String>,
    },

    /// Remove an agent
    Deregister { name: AgentName },

    /// Resolve an agent's endpoints
    GetAgentEndpoint { name: AgentName },

    /// Refresh an agent's liveness
    Heartbeat { name: AgentName },

    /// List agents advertising a capability
    Discover { capability: String },

    /// Registry statistics
    Stats,
}

/// Error kinds a registry response can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryErrorKind {
    NotFound,
    InvalidRequest,
}

/// Responses the registry server sends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RegistryResponse {
    /// Operation succeeded with nothing to return
    Ok,

    /// Endpoint resolution result
    Endpoint {
        host: String,
        port: u16,
        health_check_port: u16,
    },

    /// Discovery result
    Agents { agents: Vec<AgentIdentity> },

    /// Statistics result
    Stats { stats: RegistryStats },

    /// Typed failure
    Error {
        kind: RegistryErrorKind,
        message: String,
    },
}

impl RegistryResponse {
    /// Shorthand for a not-found error response
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Error {
            kind: RegistryErrorKind::NotFound,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = RegistryRequest::GetAgentEndpoint {
            name: "translator-1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["op"], "get_agent_endpoint");
        assert_eq!(json["name"], "translator-1");
    }

    #[test]
    fn test_register_round_trip() {
        let request = RegistryRequest::RegisterAgent {
            identity: AgentIdentity::new("vision-0", "10.0.0.5", 6000, 6001),
            capabilities: ["detect".to_string()].into_iter().collect(),
        };
        let bytes = serde_json::to_vec(&request).unwrap();
        let parsed: RegistryRequest = serde_json::from_slice(&bytes).unwrap();
        match parsed {
            RegistryRequest::RegisterAgent { identity, capabilities } => {
                assert_eq!(identity.host, "10.0.0.5");
                assert!(capabilities.contains("detect"));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_shape() {
        let response = RegistryResponse::not_found("no agent 'ghost'");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["result"], "error");
        assert_eq!(json["kind"], "not_found");
    }
}
