//! Dual-hub coordination with sticky failover.

use fleet_core::config::TelemetryConfig;
use fleet_resilience::{CircuitBreaker, ResilienceLayer};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Which hub the coordinator currently prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveHub {
    Primary,
    Fallback,
}

/// Facts-only view of the coordinator for logs and tooling
#[derive(Debug, Clone, serde::Serialize)]
pub struct HubCoordinationState {
    pub primary_hub_url: String,
    pub fallback_hub_url: String,
    pub current_active_hub: String,
    pub failover_count: u64,
}

/// Writes metric payloads to whichever of two hubs is alive.
///
/// Failover is sticky: after switching, the coordinator keeps using the
/// new active hub until that one fails, rather than bouncing back to a
/// flapping primary. One coordinator instance owns this state; nothing
/// else mutates it.
pub struct DualHubCoordinator {
    primary_url: String,
    fallback_url: String,
    active: RwLock<ActiveHub>,
    failover_count: AtomicU64,
    http: reqwest::Client,
    publish_timeout: Duration,
    primary_breaker: Arc<CircuitBreaker>,
    fallback_breaker: Arc<CircuitBreaker>,
}

impl DualHubCoordinator {
    /// Create a coordinator from configuration and the process
    /// resilience layer
    pub fn new(config: &TelemetryConfig, resilience: &ResilienceLayer) -> Self {
        Self {
            primary_url: config.primary_hub_url.trim_end_matches('/').to_string(),
            fallback_url: config.fallback_hub_url.trim_end_matches('/').to_string(),
            active: RwLock::new(ActiveHub::Primary),
            failover_count: AtomicU64::new(0),
            http: reqwest::Client::new(),
            publish_timeout: config.publish_timeout(),
            primary_breaker: resilience.breaker("telemetry-hub-primary"),
            fallback_breaker: resilience.breaker("telemetry-hub-fallback"),
        }
    }

    fn hub_url(&self, hub: ActiveHub) -> &str {
        match hub {
            ActiveHub::Primary => &self.primary_url,
            ActiveHub::Fallback => &self.fallback_url,
        }
    }

    fn hub_breaker(&self, hub: ActiveHub) -> &Arc<CircuitBreaker> {
        match hub {
            ActiveHub::Primary => &self.primary_breaker,
            ActiveHub::Fallback => &self.fallback_breaker,
        }
    }

    async fn try_hub(&self, hub: ActiveHub, metrics: &serde_json::Value) -> bool {
        let url = format!("{}/metrics", self.hub_url(hub));
        let http = self.http.clone();
        let timeout = self.publish_timeout;
        let payload = metrics.clone();

        let result = self
            .hub_breaker(hub)
            .call(move || async move {
                let response = http
                    .post(&url)
                    .json(&payload)
                    .timeout(timeout)
                    .send()
                    .await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("hub answered {}", response.status()))
                }
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(hub = self.hub_url(hub), error = %e, "hub publish failed");
                false
            }
        }
    }

    /// Publish a metrics payload.
    ///
    /// Tries the current active hub first, then the other. A success on
    /// the other hub flips the active hub and counts one failover. If
    /// both fail the payload is dropped; nothing here buffers.
    pub async fn publish_metrics(&self, metrics: &serde_json::Value) -> bool {
        let first = *self.active.read();
        let second = match first {
            ActiveHub::Primary => ActiveHub::Fallback,
            ActiveHub::Fallback => ActiveHub::Primary,
        };

        if self.try_hub(first, metrics).await {
            return true;
        }

        if self.try_hub(second, metrics).await {
            *self.active.write() = second;
            let failovers = self.failover_count.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                from = self.hub_url(first),
                to = self.hub_url(second),
                failover_count = failovers,
                "telemetry hub failover"
            );
            return true;
        }

        error!(
            primary = %self.primary_url,
            fallback = %self.fallback_url,
            "both telemetry hubs unreachable, dropping payload"
        );
        false
    }

    /// URL of the hub the coordinator currently prefers
    pub fn current_active_hub(&self) -> String {
        self.hub_url(*self.active.read()).to_string()
    }

    /// How many times the active hub has flipped
    pub fn failover_count(&self) -> u64 {
        self.failover_count.load(Ordering::SeqCst)
    }

    /// Facts-only snapshot
    pub fn state(&self) -> HubCoordinationState {
        HubCoordinationState {
            primary_hub_url: self.primary_url.clone(),
            fallback_hub_url: self.fallback_url.clone(),
            current_active_hub: self.current_active_hub(),
            failover_count: self.failover_count(),
        }
    }
}

impl std::fmt::Debug for DualHubCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualHubCoordinator")
            .field("primary_url", &self.primary_url)
            .field("fallback_url", &self.fallback_url)
            .field("active", &*self.active.read())
            .field("failover_count", &self.failover_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use fleet_core::config::ResilienceConfig;
    use std::sync::atomic::AtomicBool;

    #[derive(Clone)]
    struct HubState {
        healthy: Arc<AtomicBool>,
        hits: Arc<AtomicU64>,
    }

    async fn metrics_handler(State(state): State<HubState>) -> StatusCode {
        state.hits.fetch_add(1, Ordering::SeqCst);
        if state.healthy.load(Ordering::SeqCst) {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    /// Spin up a hub that can be flipped between healthy and failing
    async fn spawn_hub() -> (String, Arc<AtomicBool>, Arc<AtomicU64>) {
        let healthy = Arc::new(AtomicBool::new(true));
        let hits = Arc::new(AtomicU64::new(0));
        let state = HubState {
            healthy: healthy.clone(),
            hits: hits.clone(),
        };

        let app = Router::new()
            .route("/metrics", post(metrics_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (url, healthy, hits)
    }

    fn coordinator_for(primary: &str, fallback: &str) -> DualHubCoordinator {
        let config = TelemetryConfig {
            primary_hub_url: primary.to_string(),
            fallback_hub_url: fallback.to_string(),
            publish_timeout_ms: 1000,
            ..Default::default()
        };
        DualHubCoordinator::new(&config, &ResilienceLayer::new(ResilienceConfig::default()))
    }

    #[tokio::test]
    async fn test_publish_prefers_primary_when_healthy() {
        let (primary, _p_healthy, p_hits) = spawn_hub().await;
        let (fallback, _f_healthy, f_hits) = spawn_hub().await;
        let coordinator = coordinator_for(&primary, &fallback);

        assert!(coordinator.publish_metrics(&serde_json::json!({"x": 1})).await);
        assert_eq!(p_hits.load(Ordering::SeqCst), 1);
        assert_eq!(f_hits.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_failover_is_sticky() {
        let (primary, p_healthy, p_hits) = spawn_hub().await;
        let (fallback, _f_healthy, f_hits) = spawn_hub().await;
        let coordinator = coordinator_for(&primary, &fallback);

        // Primary goes down: publish still succeeds via the fallback,
        // the active hub flips, and exactly one failover is counted.
        p_healthy.store(false, Ordering::SeqCst);
        assert!(coordinator.publish_metrics(&serde_json::json!({"x": 1})).await);
        assert_eq!(coordinator.current_active_hub(), fallback.trim_end_matches('/'));
        assert_eq!(coordinator.failover_count(), 1);

        // Primary recovers, but the coordinator stays on the fallback.
        p_healthy.store(true, Ordering::SeqCst);
        let primary_hits_before = p_hits.load(Ordering::SeqCst);
        assert!(coordinator.publish_metrics(&serde_json::json!({"x": 2})).await);
        assert!(coordinator.publish_metrics(&serde_json::json!({"x": 3})).await);

        assert_eq!(p_hits.load(Ordering::SeqCst), primary_hits_before);
        assert!(f_hits.load(Ordering::SeqCst) >= 3);
        assert_eq!(coordinator.failover_count(), 1);
    }

    #[tokio::test]
    async fn test_both_hubs_down_drops_payload() {
        let (primary, p_healthy, _) = spawn_hub().await;
        let (fallback, f_healthy, _) = spawn_hub().await;
        let coordinator = coordinator_for(&primary, &fallback);

        p_healthy.store(false, Ordering::SeqCst);
        f_healthy.store(false, Ordering::SeqCst);

        assert!(!coordinator.publish_metrics(&serde_json::json!({"x": 1})).await);
        // No successful publish anywhere: no failover recorded.
        assert_eq!(coordinator.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_failback_only_when_fallback_dies() {
        let (primary, p_healthy, _) = spawn_hub().await;
        let (fallback, f_healthy, _) = spawn_hub().await;
        let coordinator = coordinator_for(&primary, &fallback);

        // Flip to fallback.
        p_healthy.store(false, Ordering::SeqCst);
        assert!(coordinator.publish_metrics(&serde_json::json!({})).await);
        assert_eq!(coordinator.failover_count(), 1);

        // Primary back, fallback dies: now the coordinator flips again.
        p_healthy.store(true, Ordering::SeqCst);
        f_healthy.store(false, Ordering::SeqCst);
        assert!(coordinator.publish_metrics(&serde_json::json!({})).await);
        assert_eq!(coordinator.failover_count(), 2);
        assert_eq!(coordinator.current_active_hub(), primary.trim_end_matches('/'));
    }
}
