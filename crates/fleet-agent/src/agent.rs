//! Core agent runtime.

use crate::config::AgentConfig;
use crate::health::{HealthEndpoint, HealthState};
use crate::{AgentError, Result};
use async_trait::async_trait;
use fleet_core::{AgentIdentity, AgentName};
use fleet_lease::LeaseClient;
use fleet_registry::RegistryClient;
use fleet_resilience::{ResilienceLayer, RetryPolicy};
use fleet_telemetry::TelemetryClient;
use fleet_wire::{FrameHandler, FrameServer};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The agent's business protocol, plugged into the main endpoint.
///
/// The runtime owns the socket and framing; implementations see request
/// payloads and produce reply payloads.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, request: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// Default handler: replies with the request, useful for wiring tests
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, request: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        Ok(request)
    }
}

/// Adapts a [`MessageHandler`] onto the frame server
struct MainEndpoint {
    handler: Arc<dyn MessageHandler>,
}

#[async_trait]
impl FrameHandler for MainEndpoint {
    async fn handle(&self, frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
        self.handler
            .handle(frame)
            .await
            .map_err(|e| fleet_wire::WireError::Handler(e.to_string()))
    }
}

/// Handle to one spawned runtime task
struct ServiceHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// One worker process in the fleet.
///
/// Lifecycle: `start()` binds the health and main endpoints, registers
/// with the service registry (bounded retries), and spawns the heartbeat
/// loop; `run()` does all that and parks until shutdown; `stop()`
/// deregisters and tears the tasks down.
pub struct Agent {
    config: AgentConfig,
    name: AgentName,
    handler: Arc<dyn MessageHandler>,
    health: Arc<HealthState>,
    resilience: Arc<ResilienceLayer>,
    registry: RegistryClient,
    identity: Option<AgentIdentity>,
    services: Vec<ServiceHandle>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Agent {
    fn new(config: AgentConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let name = config.agent.agent_name();
        let resilience = Arc::new(ResilienceLayer::new(config.core.resilience.clone()));
        let registry = RegistryClient::new(
            config.core.registry.addr.clone(),
            config.core.registry.request_timeout(),
        );

        Self {
            config,
            name,
            handler,
            health: Arc::new(HealthState::new()),
            resilience,
            registry,
            identity: None,
            services: Vec::new(),
            shutdown_tx: None,
        }
    }

    /// This agent's name
    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// Identity as registered; `None` before `start()`
    pub fn identity(&self) -> Option<&AgentIdentity> {
        self.identity.as_ref()
    }

    /// Live health state, for business code to update
    pub fn health(&self) -> Arc<HealthState> {
        self.health.clone()
    }

    /// The process resilience layer, for wrapping outbound calls
    pub fn resilience(&self) -> Arc<ResilienceLayer> {
        self.resilience.clone()
    }

    /// A lease client bound to this process's resilience layer
    pub fn lease_client(&self) -> LeaseClient {
        LeaseClient::new(&self.config.core.lease, &self.resilience)
    }

    /// Start endpoints, register, and spawn background loops
    pub async fn start(&mut self) -> Result<()> {
        self.config.validate()?;
        info!(agent = %self.name, "starting agent");

        // Health first: liveness must be observable before anything else,
        // and it runs on its own task for the whole process lifetime.
        let health_bind = format!(
            "{}:{}",
            self.config.agent.host, self.config.agent.health_port
        );
        let (health_addr, health_task) =
            HealthEndpoint::new(self.health.clone(), health_bind).start().await?;
        self.services.push(ServiceHandle {
            name: "health-endpoint",
            handle: health_task,
        });

        // Main business endpoint.
        let main_bind = format!("{}:{}", self.config.agent.host, self.config.agent.main_port);
        let main_server = FrameServer::bind(&main_bind).await?;
        let main_addr = main_server.local_addr();
        self.services.push(ServiceHandle {
            name: "main-endpoint",
            handle: main_server.spawn(MainEndpoint {
                handler: self.handler.clone(),
            }),
        });

        let identity = AgentIdentity::new(
            self.name.clone(),
            self.config.agent.host.clone(),
            main_addr.port(),
            health_addr.port(),
        );

        self.register_with_retries(&identity).await?;
        self.identity = Some(identity.clone());

        self.spawn_heartbeat(identity.clone());

        if self.config.agent.telemetry_push_enabled {
            self.spawn_telemetry_push();
        }

        info!(agent = %self.name, main = %main_addr, health = %health_addr, "agent started");
        Ok(())
    }

    /// Register against the registry, retrying transient failures.
    ///
    /// An unreachable registry after the configured attempts is fatal:
    /// the process exits non-zero rather than running undiscoverable.
    async fn register_with_retries(&self, identity: &AgentIdentity) -> Result<()> {
        let capabilities: BTreeSet<String> =
            self.config.agent.capabilities.iter().cloned().collect();
        let policy = RetryPolicy::new(
            self.config.agent.registration_attempts,
            Duration::from_millis(250),
            Duration::from_millis(2000),
        );

        let registry = self.registry.clone();
        let identity = identity.clone();
        policy
            .run("register-agent", move || {
                let registry = registry.clone();
                let identity = identity.clone();
                let capabilities = capabilities.clone();
                async move { registry.register_agent(identity, capabilities).await }
            })
            .await
            .map_err(|e| {
                error!(agent = %self.name, error = %e, "could not register with the fleet registry");
                AgentError::Registration(e.to_string())
            })
    }

    /// Heartbeat loop. A `NotFound` answer means the registry restarted
    /// and lost us; the expected recovery is simply to re-register.
    fn spawn_heartbeat(&mut self, identity: AgentIdentity) {
        let registry = self.registry.clone();
        let name = self.name.clone();
        let interval = self.config.agent.heartbeat_interval();
        let capabilities: BTreeSet<String> =
            self.config.agent.capabilities.iter().cloned().collect();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; we just registered.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match registry.heartbeat(&name).await {
                    Ok(()) => debug!(agent = %name, "heartbeat"),
                    Err(fleet_core::Error::NotFound(_)) => {
                        warn!(agent = %name, "registry lost us, re-registering");
                        if let Err(e) = registry
                            .register_agent(identity.clone(), capabilities.clone())
                            .await
                        {
                            warn!(agent = %name, error = %e, "re-registration failed");
                        }
                    }
                    Err(e) => warn!(agent = %name, error = %e, "heartbeat failed"),
                }
            }
        });

        self.services.push(ServiceHandle {
            name: "heartbeat",
            handle,
        });
    }

    /// Periodic health snapshot pushes to the telemetry service
    fn spawn_telemetry_push(&mut self) {
        let client = TelemetryClient::new(
            self.config.core.telemetry.ingest_addr.clone(),
            self.config.core.telemetry.publish_timeout(),
        );
        let health = self.health.clone();
        let name = self.name.clone();
        let interval = Duration::from_secs(self.config.agent.telemetry_push_interval_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report = health.report();
                if let Err(e) = client.push_report(&name, &report).await {
                    debug!(agent = %name, error = %e, "telemetry push failed");
                }
            }
        });

        self.services.push(ServiceHandle {
            name: "telemetry-push",
            handle,
        });
    }

    /// Run until ctrl-c or an explicit shutdown signal
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        tokio::select! {
            _ = shutdown_rx => {
                info!(agent = %self.name, "received shutdown signal");
            }
            _ = signal::ctrl_c() => {
                info!(agent = %self.name, "received ctrl-c");
            }
        }

        self.stop().await
    }

    /// Deregister and stop all runtime tasks
    pub async fn stop(&mut self) -> Result<()> {
        info!(agent = %self.name, "stopping agent");

        // Best-effort: a dead registry must not block shutdown.
        if self.identity.is_some() {
            match self.registry.deregister(&self.name).await {
                Ok(()) => debug!(agent = %self.name, "deregistered"),
                Err(e) => warn!(agent = %self.name, error = %e, "deregistration failed"),
            }
        }

        for service in self.services.drain(..) {
            service.handle.abort();
            debug!(agent = %self.name, service = service.name, "service stopped");
        }

        info!(agent = %self.name, "agent stopped");
        Ok(())
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    config: Option<AgentConfig>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            handler: None,
        }
    }

    /// Use this configuration instead of loading one
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Plug in the business protocol
    pub fn with_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Build the agent
    pub fn build(self) -> Result<Agent> {
        let config = match self.config {
            Some(config) => config,
            None => AgentConfig::load()?,
        };
        config.validate()?;

        let handler = self.handler.unwrap_or_else(|| Arc::new(EchoHandler));
        Ok(Agent::new(config, handler))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
