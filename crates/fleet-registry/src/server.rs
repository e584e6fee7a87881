//! Registry server: frame handler, staleness reaper, health poller.

use crate::protocol::{RegistryErrorKind, RegistryRequest, RegistryResponse};
use crate::{RegistryError, Result, ServiceRegistry};
use async_trait::async_trait;
use fleet_core::config::RegistryConfig;
use fleet_wire::{FrameHandler, FrameServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frame handler translating wire requests into registry operations
struct RegistryHandler {
    registry: ServiceRegistry,
}

impl RegistryHandler {
    async fn dispatch(&self, request: RegistryRequest) -> RegistryResponse {
        match request {
            RegistryRequest::RegisterAgent {
                identity,
                capabilities,
            } => {
                self.registry.register(identity, capabilities).await;
                RegistryResponse::Ok
            }
            RegistryRequest::Deregister { name } => match self.registry.deregister(&name).await {
                Ok(()) => RegistryResponse::Ok,
                Err(RegistryError::NotFound(msg)) => RegistryResponse::not_found(msg),
                Err(e) => RegistryResponse::Error {
                    kind: RegistryErrorKind::InvalidRequest,
                    message: e.to_string(),
                },
            },
            RegistryRequest::GetAgentEndpoint { name } => {
                match self.registry.lookup(&name).await {
                    Ok(identity) => RegistryResponse::Endpoint {
                        host: identity.host,
                        port: identity.main_port,
                        health_check_port: identity.health_port,
                    },
                    Err(RegistryError::NotFound(msg)) => RegistryResponse::not_found(msg),
                    Err(e) => RegistryResponse::Error {
                        kind: RegistryErrorKind::InvalidRequest,
                        message: e.to_string(),
                    },
                }
            }
            RegistryRequest::Heartbeat { name } => match self.registry.heartbeat(&name).await {
                Ok(()) => RegistryResponse::Ok,
                Err(RegistryError::NotFound(msg)) => RegistryResponse::not_found(msg),
                Err(e) => RegistryResponse::Error {
                    kind: RegistryErrorKind::InvalidRequest,
                    message: e.to_string(),
                },
            },
            RegistryRequest::Discover { capability } => RegistryResponse::Agents {
                agents: self.registry.discover(&capability).await,
            },
            RegistryRequest::Stats => RegistryResponse::Stats {
                stats: self.registry.stats().await,
            },
        }
    }
}

#[async_trait]
impl FrameHandler for RegistryHandler {
    async fn handle(&self, frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
        let response = match serde_json::from_slice::<RegistryRequest>(&frame) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                debug!(error = %e, "rejecting malformed registry request");
                RegistryResponse::Error {
                    kind: RegistryErrorKind::InvalidRequest,
                    message: e.to_string(),
                }
            }
        };
        Ok(serde_json::to_vec(&response)?)
    }
}

/// Handle to a running registry server
pub struct RegistryServerHandle {
    local_addr: SocketAddr,
    registry: ServiceRegistry,
    tasks: Vec<JoinHandle<()>>,
}

impl RegistryServerHandle {
    /// Address the server bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The underlying table (shared; useful for in-process consumers)
    pub fn registry(&self) -> ServiceRegistry {
        self.registry.clone()
    }

    /// Stop the server and its background tasks
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(addr = %self.local_addr, "registry server stopped");
    }
}

impl Drop for RegistryServerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The registry server
pub struct RegistryServer {
    config: RegistryConfig,
}

impl RegistryServer {
    /// Create a server from configuration
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Bind and start serving; returns a handle owning the background tasks.
    pub async fn start(&self) -> Result<RegistryServerHandle> {
        let registry = ServiceRegistry::new();
        let frame_server = FrameServer::bind(&self.config.addr).await?;
        let local_addr = frame_server.local_addr();

        let mut tasks = Vec::new();

        tasks.push(frame_server.spawn(RegistryHandler {
            registry: registry.clone(),
        }));

        tasks.push(spawn_reaper(registry.clone(), self.config.clone()));

        if self.config.health_poll_enabled {
            tasks.push(spawn_health_poller(registry.clone(), self.config.clone()));
        }

        info!(addr = %local_addr, "registry server started");
        Ok(RegistryServerHandle {
            local_addr,
            registry,
            tasks,
        })
    }
}

/// Periodically drop entries that have missed heartbeats
fn spawn_reaper(registry: ServiceRegistry, config: RegistryConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.reap_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let dropped = registry.expire_stale(config.staleness_window()).await;
            if !dropped.is_empty() {
                info!(count = dropped.len(), "reaped stale registry entries");
            }
        }
    })
}

/// Actively poll agent health endpoints and drop persistent failures
fn spawn_health_poller(registry: ServiceRegistry, config: RegistryConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let poll_timeout = Duration::from_millis(config.health_poll_timeout_ms);
        let mut ticker =
            tokio::time::interval(Duration::from_secs(config.health_poll_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            for entry in registry.snapshot().await {
                let name = entry.identity.name.clone();
                let url = entry.identity.health_url();

                let healthy = match client.get(&url).timeout(poll_timeout).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(e) => {
                        debug!(agent = %name, error = %e, "health poll failed");
                        false
                    }
                };

                if healthy {
                    // A successful poll counts as liveness.
                    let _ = registry.heartbeat(&name).await;
                } else {
                    let failures = registry.record_poll_failure(&name).await;
                    if failures >= config.health_poll_failures {
                        warn!(
                            agent = %name,
                            failures = failures,
                            "dropping agent after consecutive failed health polls"
                        );
                        let _ = registry.deregister(&name).await;
                    }
                }
            }
        }
    })
}
