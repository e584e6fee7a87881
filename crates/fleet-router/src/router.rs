//! The weighted traffic router.

use crate::{PolicyHandle, Result};
use fleet_registry::RegistryClient;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which generation of the service a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Legacy,
    New,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Legacy => write!(f, "legacy"),
            Backend::New => write!(f, "new"),
        }
    }
}

/// Router statistics
#[derive(Debug)]
pub struct RouterStats {
    /// Frames received
    pub requests_total: AtomicU64,

    /// Frames forwarded to the new backend
    pub to_new_total: AtomicU64,

    /// Frames forwarded to the legacy backend
    pub to_legacy_total: AtomicU64,

    /// Forwarding failures
    pub errors_total: AtomicU64,

    /// Router start time
    pub start_time: Instant,
}

impl Default for RouterStats {
    fn default() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            to_new_total: AtomicU64::new(0),
            to_legacy_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

/// Handle to a running router
pub struct RouterHandle {
    local_addr: SocketAddr,
    policy: Arc<PolicyHandle>,
    stats: Arc<RouterStats>,
    task: JoinHandle<()>,
}

impl RouterHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live policy, e.g. for runtime ramping
    pub fn policy(&self) -> Arc<PolicyHandle> {
        self.policy.clone()
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        self.stats.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
        info!(addr = %self.local_addr, "router stopped");
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Message-passing proxy splitting traffic between two backends
pub struct WeightedRouter {
    policy: Arc<PolicyHandle>,
    registry: Option<RegistryClient>,
    stats: Arc<RouterStats>,
}

impl WeightedRouter {
    /// Create a router over a policy, optionally resolving backends
    /// through the service registry
    pub fn new(policy: PolicyHandle, registry: Option<RegistryClient>) -> Self {
        Self {
            policy: Arc::new(policy),
            registry,
            stats: Arc::new(RouterStats::default()),
        }
    }

    /// The routing decision, separated for testability: a roll in
    /// [1,100] at or under the percentage goes to the new backend.
    pub fn choose(traffic_percent_to_new: u8, roll: u8) -> Backend {
        if roll <= traffic_percent_to_new {
            Backend::New
        } else {
            Backend::Legacy
        }
    }

    fn draw() -> u8 {
        rand::thread_rng().gen_range(1..=100)
    }

    /// Resolve a backend to a dialable address. Registry names win when
    /// configured and resolvable; the configured host:port is the
    /// fallback either way.
    async fn resolve(&self, backend: Backend) -> String {
        let config = self.policy.config();
        let (name, port) = match backend {
            Backend::Legacy => (&config.legacy_backend_name, config.legacy_backend_port),
            Backend::New => (&config.new_backend_name, config.new_backend_port),
        };

        if let (Some(name), Some(registry)) = (name, &self.registry) {
            match registry.get_agent_endpoint(&name.as_str().into()).await {
                Ok(identity) => return identity.main_endpoint(),
                Err(e) => {
                    warn!(
                        backend = %backend,
                        name = %name,
                        error = %e,
                        "registry resolution failed, using configured address"
                    );
                }
            }
        }

        format!("{}:{}", config.backend_host, port)
    }

    /// Bind the frontend port and start proxying.
    pub async fn start(self) -> Result<RouterHandle> {
        let config = self.policy.config();
        let listener =
            TcpListener::bind(("0.0.0.0", config.frontend_port)).await?;
        let local_addr = listener.local_addr()?;

        let policy = self.policy.clone();
        let stats = self.stats.clone();
        let router = Arc::new(self);

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let router = router.clone();
                        tokio::spawn(async move {
                            if let Err(e) = router.serve_connection(stream).await {
                                debug!(peer = %peer, error = %e, "proxy connection ended");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        });

        info!(addr = %local_addr, "weighted router started");
        Ok(RouterHandle {
            local_addr,
            policy,
            stats,
            task,
        })
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let frame = match fleet_wire::read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(fleet_wire::WireError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

            // The split is re-read here, on every request.
            let percent = self.policy.traffic_percent_to_new();
            let backend = Self::choose(percent, Self::draw());
            let addr = self.resolve(backend).await;

            match backend {
                Backend::New => self.stats.to_new_total.fetch_add(1, Ordering::Relaxed),
                Backend::Legacy => self.stats.to_legacy_total.fetch_add(1, Ordering::Relaxed),
            };

            debug!(backend = %backend, addr = %addr, percent = percent, "forwarding frame");

            // Round-trip to the chosen backend, payload untouched in
            // both directions.
            let forward_timeout = self.policy.config().forward_timeout();
            match fleet_wire::request_raw(&addr, &frame, forward_timeout).await {
                Ok(reply) => {
                    fleet_wire::write_frame(&mut stream, &reply).await?;
                }
                Err(e) => {
                    self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    warn!(backend = %backend, addr = %addr, error = %e, "forward failed");
                    // Nothing sensible to synthesize for the caller:
                    // closing the connection is the failure signal.
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_core::config::RouterConfig;
    use fleet_wire::{FrameHandler, FrameServer};
    use std::time::Duration;

    struct Tagged(&'static [u8]);

    #[async_trait]
    impl FrameHandler for Tagged {
        async fn handle(&self, mut frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
            // Reply is "<tag>:<original payload>" so tests can check both
            // the chosen backend and payload fidelity.
            let mut reply = self.0.to_vec();
            reply.push(b':');
            reply.append(&mut frame);
            Ok(reply)
        }
    }

    async fn spawn_backend(tag: &'static [u8]) -> u16 {
        let server = FrameServer::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().port();
        server.spawn(Tagged(tag));
        port
    }

    async fn start_router(percent: u8) -> RouterHandle {
        let legacy_port = spawn_backend(b"legacy").await;
        let new_port = spawn_backend(b"new").await;
        let config = RouterConfig {
            frontend_port: 0,
            backend_host: "127.0.0.1".to_string(),
            legacy_backend_port: legacy_port,
            new_backend_port: new_port,
            traffic_percent_to_new: percent,
            forward_timeout_ms: 1000,
            ..Default::default()
        };
        WeightedRouter::new(PolicyHandle::new(config).unwrap(), None)
            .start()
            .await
            .unwrap()
    }

    #[test]
    fn test_choose_boundaries() {
        assert_eq!(WeightedRouter::choose(0, 1), Backend::Legacy);
        assert_eq!(WeightedRouter::choose(0, 100), Backend::Legacy);
        assert_eq!(WeightedRouter::choose(100, 1), Backend::New);
        assert_eq!(WeightedRouter::choose(100, 100), Backend::New);
        // The roll equal to the percentage goes new.
        assert_eq!(WeightedRouter::choose(30, 30), Backend::New);
        assert_eq!(WeightedRouter::choose(30, 31), Backend::Legacy);
    }

    #[test]
    fn test_distribution_within_tolerance() {
        let mut rng = rand::thread_rng();
        let mut to_new = 0u32;
        let total = 10_000;

        for _ in 0..total {
            let roll: u8 = rng.gen_range(1..=100);
            if WeightedRouter::choose(30, roll) == Backend::New {
                to_new += 1;
            }
        }

        let fraction = to_new as f64 / total as f64;
        assert!(
            (0.27..=0.33).contains(&fraction),
            "fraction to new backend was {}",
            fraction
        );
    }

    #[tokio::test]
    async fn test_forwards_verbatim_to_new_at_full_split() {
        let handle = start_router(100).await;
        let addr = format!("127.0.0.1:{}", handle.local_addr().port());

        let reply = fleet_wire::request_raw(&addr, b"payload-bytes", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"new:payload-bytes");

        let stats = handle.stats();
        assert_eq!(stats.requests_total.load(Ordering::Relaxed), 1);
        assert_eq!(stats.to_new_total.load(Ordering::Relaxed), 1);
        assert_eq!(stats.to_legacy_total.load(Ordering::Relaxed), 0);

        handle.stop();
    }

    #[tokio::test]
    async fn test_zero_split_sticks_to_legacy() {
        let handle = start_router(0).await;
        let addr = format!("127.0.0.1:{}", handle.local_addr().port());

        for i in 0..10u8 {
            let reply = fleet_wire::request_raw(&addr, &[i], Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(&reply[..7], b"legacy:");
        }

        let stats = handle.stats();
        assert_eq!(stats.to_legacy_total.load(Ordering::Relaxed), 10);
        assert_eq!(stats.to_new_total.load(Ordering::Relaxed), 0);

        handle.stop();
    }

    #[tokio::test]
    async fn test_runtime_ramp_applies_to_next_request() {
        let handle = start_router(0).await;
        let addr = format!("127.0.0.1:{}", handle.local_addr().port());

        let reply = fleet_wire::request_raw(&addr, b"a", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&reply[..7], b"legacy:");

        // Ramp to 100% with no restart; the very next request follows.
        handle.policy().set_traffic_percent(100).unwrap();
        let reply = fleet_wire::request_raw(&addr, b"b", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&reply[..4], b"new:");

        handle.stop();
    }
}
