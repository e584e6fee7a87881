//! Lease client with bounded retry and circuit protection.

use crate::protocol::{LeaseRequest, LeaseResponse, LeaseStats};
use crate::{LeaseError, Result};
use fleet_core::config::{ClientClassConfig, LeaseConfig};
use fleet_resilience::{CircuitBreaker, ResilienceError, ResilienceLayer, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the breaker guarding lease-server calls
const LEASE_BREAKER: &str = "lease-server";

/// What a client wants leased
#[derive(Debug, Clone)]
pub struct LeaseSpec {
    pub client: String,
    pub model_name: String,
    pub vram_estimate_mb: u64,
    pub priority: u32,
    pub ttl_seconds: u64,
}

impl LeaseSpec {
    /// Build a spec from a client class's configured defaults
    pub fn from_class(
        client: impl Into<String>,
        model_name: impl Into<String>,
        class: &ClientClassConfig,
    ) -> Self {
        Self {
            client: client.into(),
            model_name: model_name.into(),
            vram_estimate_mb: class.vram_estimate_mb,
            priority: class.priority,
            ttl_seconds: class.ttl_seconds,
        }
    }
}

/// A granted lease as the holder sees it
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    /// Opaque token to release with
    pub lease_id: String,

    /// When the server may reclaim the grant; holders that want to keep
    /// the memory re-acquire before this instant.
    pub expires_at: Instant,
}

impl LeaseHandle {
    /// Time left before the server may reclaim
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Client for the lease server.
///
/// Denied acquisitions are retried up to the configured attempt count with
/// exponential backoff, honoring the server's `retry_after_ms` as a floor.
/// All wire calls go through a named circuit breaker so a dead lease
/// server fails fast instead of stalling every model load in the process.
pub struct LeaseClient {
    addr: String,
    request_timeout: Duration,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl LeaseClient {
    /// Create a client from configuration and the process resilience layer
    pub fn new(config: &LeaseConfig, resilience: &ResilienceLayer) -> Self {
        Self {
            addr: config.addr.clone(),
            request_timeout: config.request_timeout(),
            policy: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.backoff_initial_ms),
                Duration::from_millis(config.backoff_cap_ms),
            ),
            breaker: resilience.breaker(LEASE_BREAKER),
        }
    }

    async fn exchange(&self, request: &LeaseRequest) -> Result<LeaseResponse> {
        let addr = self.addr.clone();
        let timeout = self.request_timeout;
        let payload = serde_json::to_vec(request)?;

        let response = self
            .breaker
            .call(move || async move {
                let reply = fleet_wire::request_raw(&addr, &payload, timeout).await?;
                Ok(serde_json::from_slice::<LeaseResponse>(&reply)?)
            })
            .await?;

        if let LeaseResponse::Error { message } = &response {
            return Err(LeaseError::Protocol(message.clone()));
        }
        Ok(response)
    }

    /// Acquire a lease, retrying denials with backoff.
    ///
    /// Worst case this blocks for roughly `attempts x capped backoff`
    /// before giving up with a capacity error. An open circuit surfaces
    /// immediately; waiting out a dead server is not this layer's job.
    pub async fn acquire(&self, spec: LeaseSpec) -> Result<LeaseHandle> {
        let request = LeaseRequest::Acquire {
            client: spec.client.clone(),
            model_name: spec.model_name.clone(),
            vram_estimate_mb: spec.vram_estimate_mb,
            priority: spec.priority,
            ttl_seconds: spec.ttl_seconds,
        };

        let mut attempt = 0u32;
        loop {
            match self.exchange(&request).await {
                Ok(LeaseResponse::Acquired {
                    granted: true,
                    lease_id: Some(lease_id),
                    ..
                }) => {
                    info!(
                        client = %spec.client,
                        model = %spec.model_name,
                        lease_id = %lease_id,
                        attempt = attempt + 1,
                        "lease acquired"
                    );
                    return Ok(LeaseHandle {
                        lease_id,
                        expires_at: Instant::now() + Duration::from_secs(spec.ttl_seconds),
                    });
                }
                Ok(LeaseResponse::Acquired {
                    granted: false,
                    retry_after_ms,
                    ..
                }) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            client = %spec.client,
                            model = %spec.model_name,
                            attempts = attempt,
                            "giving up on lease acquisition"
                        );
                        return Err(LeaseError::Exhausted {
                            attempts: attempt,
                            vram_mb: spec.vram_estimate_mb,
                        });
                    }

                    let wait = self
                        .policy
                        .delay(attempt - 1, Some(Duration::from_millis(retry_after_ms)));
                    debug!(
                        client = %spec.client,
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        "lease denied, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Ok(other) => {
                    return Err(LeaseError::Protocol(format!(
                        "unexpected reply to acquire: {:?}",
                        other
                    )))
                }
                // An open breaker means the server is considered down;
                // retrying inside the cooldown would defeat it.
                Err(LeaseError::Resilience(e @ ResilienceError::CircuitOpen(_))) => {
                    return Err(LeaseError::Resilience(e))
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        return Err(e);
                    }
                    let wait = self.policy.delay(attempt - 1, None);
                    debug!(
                        client = %spec.client,
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "lease call failed, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Release a lease. Safe to call twice; the server treats unknown ids
    /// as already-released.
    pub async fn release(&self, lease_id: &str) -> Result<()> {
        match self
            .exchange(&LeaseRequest::Release {
                lease_id: lease_id.to_string(),
            })
            .await?
        {
            LeaseResponse::Released => Ok(()),
            other => Err(LeaseError::Protocol(format!(
                "unexpected reply to release: {:?}",
                other
            ))),
        }
    }

    /// Server statistics
    pub async fn stats(&self) -> Result<LeaseStats> {
        match self.exchange(&LeaseRequest::Stats).await? {
            LeaseResponse::Stats { stats } => Ok(stats),
            other => Err(LeaseError::Protocol(format!(
                "unexpected reply to stats: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::LeaseServer;
    use fleet_core::config::ResilienceConfig;

    fn spec(client: &str, vram_mb: u64, ttl_seconds: u64) -> LeaseSpec {
        LeaseSpec {
            client: client.to_string(),
            model_name: "whisper-large".to_string(),
            vram_estimate_mb: vram_mb,
            priority: 5,
            ttl_seconds,
        }
    }

    async fn start_server(budget_mb: u64) -> (crate::LeaseServerHandle, LeaseConfig) {
        let config = LeaseConfig {
            addr: "127.0.0.1:0".to_string(),
            vram_budget_mb: budget_mb,
            reclaim_interval_secs: 1,
            backoff_initial_ms: 50,
            backoff_cap_ms: 200,
            ..Default::default()
        };
        let handle = LeaseServer::new(config.clone()).start().await.unwrap();
        let config = LeaseConfig {
            addr: handle.local_addr().to_string(),
            ..config
        };
        (handle, config)
    }

    #[tokio::test]
    async fn test_acquire_and_release_over_the_wire() {
        let (handle, config) = start_server(10_000).await;
        let resilience = ResilienceLayer::new(ResilienceConfig::default());
        let client = LeaseClient::new(&config, &resilience);

        let lease = client.acquire(spec("translator-1", 4_000, 60)).await.unwrap();
        assert!(lease.remaining() > Duration::from_secs(50));
        assert_eq!(handle.state().leased_mb().await, 4_000);

        client.release(&lease.lease_id).await.unwrap();
        assert_eq!(handle.state().leased_mb().await, 0);

        // Releasing again is fine.
        client.release(&lease.lease_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_until_ttl_reclaim_frees_budget() {
        let (handle, config) = start_server(1_000).await;
        let resilience = ResilienceLayer::new(ResilienceConfig::default());
        let client = LeaseClient::new(&config, &resilience);

        // A holder takes nearly everything and never releases.
        let _abandoned = client.acquire(spec("crashy", 900, 1)).await.unwrap();

        // The second acquire is denied at first, then a retry lands after
        // the server reclaims the expired lease.
        let lease = client.acquire(spec("patient", 900, 60)).await.unwrap();
        assert_eq!(handle.state().leased_mb().await, 900);
        client.release(&lease.lease_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_capacity_error() {
        let (_handle, config) = start_server(1_000).await;
        // Fewer attempts keep the test short; the giving-up path is the
        // same at any count.
        let config = LeaseConfig {
            max_attempts: 3,
            ..config
        };
        let resilience = ResilienceLayer::new(ResilienceConfig::default());
        let client = LeaseClient::new(&config, &resilience);

        // Long-lived holder: retries cannot succeed.
        let _held = client.acquire(spec("holder", 1_000, 300)).await.unwrap();

        let err = client.acquire(spec("wanting", 500, 60)).await.unwrap_err();
        match err {
            LeaseError::Exhausted { attempts, vram_mb } => {
                assert_eq!(attempts, config.max_attempts);
                assert_eq!(vram_mb, 500);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_spec_from_class_defaults() {
        let class = ClientClassConfig {
            vram_estimate_mb: 8_192,
            ttl_seconds: 120,
            priority: 1,
        };
        let spec = LeaseSpec::from_class("vision-0", "yolo-x", &class);
        assert_eq!(spec.vram_estimate_mb, 8_192);
        assert_eq!(spec.priority, 1);
        assert_eq!(spec.ttl_seconds, 120);
    }
}
