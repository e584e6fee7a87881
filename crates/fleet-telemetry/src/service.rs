//! Telemetry ingest service.
//!
//! Agents push their health snapshots here. The service keeps the latest
//! report per agent and mirrors every push to the dual hubs and the bus.
//! Mirroring happens off the request path so a slow hub never backs up
//! the agents.

use crate::{BusPublisher, DualHubCoordinator, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_core::config::TelemetryConfig;
use fleet_core::{AgentName, HealthReport};
use fleet_resilience::ResilienceLayer;
use fleet_wire::{FrameHandler, FrameServer};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Requests the telemetry service accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TelemetryRequest {
    /// Store and mirror one agent snapshot
    PushReport {
        agent: AgentName,
        report: HealthReport,
    },
}

/// Responses the telemetry service sends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TelemetryResponse {
    Ok,
    Error { message: String },
}

struct IngestHandler {
    snapshots: Arc<DashMap<AgentName, HealthReport>>,
    coordinator: Arc<DualHubCoordinator>,
    bus: BusPublisher,
    bus_subject: String,
}

#[async_trait]
impl FrameHandler for IngestHandler {
    async fn handle(&self, frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
        let response = match serde_json::from_slice::<TelemetryRequest>(&frame) {
            Ok(TelemetryRequest::PushReport { agent, report }) => {
                debug!(agent = %agent, status = %report.status, "telemetry snapshot received");
                self.snapshots.insert(agent.clone(), report.clone());

                // Mirror off the request path: the agent's ack must not
                // wait out a hub timeout.
                let coordinator = self.coordinator.clone();
                let bus = self.bus.clone();
                let subject = self.bus_subject.clone();
                tokio::spawn(async move {
                    let payload = serde_json::json!({
                        "agent": agent,
                        "report": report,
                    });
                    let hub_ok = coordinator.publish_metrics(&payload).await;
                    let bus_ok = bus.publish(&subject, &payload).await;
                    if !hub_ok && !bus_ok {
                        tracing::error!(
                            agent = %agent,
                            "snapshot reached neither hub nor bus"
                        );
                    }
                });

                TelemetryResponse::Ok
            }
            Err(e) => TelemetryResponse::Error {
                message: e.to_string(),
            },
        };
        Ok(serde_json::to_vec(&response)?)
    }
}

/// Handle to a running telemetry service
pub struct TelemetryServiceHandle {
    local_addr: SocketAddr,
    snapshots: Arc<DashMap<AgentName, HealthReport>>,
    coordinator: Arc<DualHubCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl TelemetryServiceHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Latest snapshot for an agent, if any
    pub fn latest(&self, agent: &AgentName) -> Option<HealthReport> {
        self.snapshots.get(agent).map(|r| r.clone())
    }

    /// Number of agents with a retained snapshot
    pub fn tracked_agents(&self) -> usize {
        self.snapshots.len()
    }

    /// The coordinator, for state inspection
    pub fn coordinator(&self) -> Arc<DualHubCoordinator> {
        self.coordinator.clone()
    }

    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(addr = %self.local_addr, "telemetry service stopped");
    }
}

impl Drop for TelemetryServiceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The telemetry service
pub struct TelemetryService {
    config: TelemetryConfig,
}

impl TelemetryService {
    pub fn new(config: TelemetryConfig) -> Self {
        Self { config }
    }

    /// Bind the ingest endpoint and start serving.
    pub async fn start(&self, resilience: &ResilienceLayer) -> Result<TelemetryServiceHandle> {
        let snapshots = Arc::new(DashMap::new());
        let coordinator = Arc::new(DualHubCoordinator::new(&self.config, resilience));
        let bus = BusPublisher::new(&self.config);

        let frame_server = FrameServer::bind(&self.config.ingest_addr).await?;
        let local_addr = frame_server.local_addr();

        let tasks = vec![frame_server.spawn(IngestHandler {
            snapshots: snapshots.clone(),
            coordinator: coordinator.clone(),
            bus,
            bus_subject: self.config.bus_subject.clone(),
        })];

        info!(addr = %local_addr, "telemetry service started");
        Ok(TelemetryServiceHandle {
            local_addr,
            snapshots,
            coordinator,
            tasks,
        })
    }
}

/// Client agents use to push snapshots
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    addr: String,
    timeout: Duration,
}

impl TelemetryClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Push one snapshot. Errors are the caller's signal that telemetry
    /// is dark; agents keep running regardless.
    pub async fn push_report(&self, agent: &AgentName, report: &HealthReport) -> Result<()> {
        let request = TelemetryRequest::PushReport {
            agent: agent.clone(),
            report: report.clone(),
        };
        let response: TelemetryResponse =
            fleet_wire::call(&self.addr, &request, self.timeout).await?;
        match response {
            TelemetryResponse::Ok => Ok(()),
            TelemetryResponse::Error { message } => {
                Err(crate::TelemetryError::Core(fleet_core::Error::protocol(message)))
            }
        }
    }
}
