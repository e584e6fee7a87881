//! Per-process table of named breakers and bulkheads.

use crate::breaker::CircuitBreaker;
use crate::bulkhead::{Bulkhead, WorkerPool};
use crate::{BreakerSnapshot, BulkheadSnapshot, Result};
use dashmap::DashMap;
use fleet_core::config::{IsolationStrategy, ResilienceConfig};
use std::future::Future;
use std::sync::Arc;

/// Owned resiliency state for one process.
///
/// Every named downstream dependency gets one breaker and one isolation
/// pool, created on first use from the configured defaults or the
/// per-name override. The layer is passed by handle to all callers within
/// the process; it is not shared across processes.
#[derive(Debug)]
pub struct ResilienceLayer {
    config: ResilienceConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    pools: DashMap<String, Arc<WorkerPool>>,
}

impl ResilienceLayer {
    /// Create a layer from configuration
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            bulkheads: DashMap::new(),
            pools: DashMap::new(),
        }
    }

    /// The breaker for a named dependency, created on first use
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.breaker(name))))
            .clone()
    }

    /// The semaphore bulkhead for a named resource, created on first use
    pub fn bulkhead(&self, name: &str) -> Arc<Bulkhead> {
        self.bulkheads
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bulkhead::new(name, self.config.bulkhead(name))))
            .clone()
    }

    /// The worker pool for a named resource, created on first use
    pub fn worker_pool(&self, name: &str) -> Arc<WorkerPool> {
        self.pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(WorkerPool::new(name, &self.config.bulkhead(name))))
            .clone()
    }

    /// Run an operation behind the named isolation pool and breaker.
    ///
    /// The pool gates admission first (fast rejection under saturation),
    /// then the breaker decides whether the downstream is attempted at
    /// all. Which pool shape isolates the call is the resource's
    /// configured `isolation` strategy.
    pub async fn protect<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let breaker = self.breaker(name);

        match self.config.bulkhead(name).isolation {
            IsolationStrategy::Semaphore => {
                let bulkhead = self.bulkhead(name);
                bulkhead.run(|| async move { breaker.call(op).await }).await?
            }
            IsolationStrategy::WorkerPool => {
                let pool = self.worker_pool(name);
                pool.dispatch(async move { breaker.call(op).await }).await?
            }
        }
    }

    /// Snapshots of every breaker created so far
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }

    /// Snapshots of every semaphore bulkhead created so far
    pub fn bulkhead_snapshots(&self) -> Vec<BulkheadSnapshot> {
        self.bulkheads.iter().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitState, ResilienceError};
    use fleet_core::config::{BreakerSettings, BulkheadSettings};

    fn layer_with_tight_breaker() -> ResilienceLayer {
        let mut config = ResilienceConfig::default();
        config.breakers.insert(
            "cloud-tts".to_string(),
            BreakerSettings {
                failure_threshold: 2,
                failure_window_secs: 60,
                timeout_duration_secs: 30,
                request_timeout_ms: 500,
            },
        );
        ResilienceLayer::new(config)
    }

    #[tokio::test]
    async fn test_protect_success_path() {
        let layer = ResilienceLayer::new(ResilienceConfig::default());
        let value = layer
            .protect("registry", || async { Ok("registered") })
            .await
            .unwrap();
        assert_eq!(value, "registered");
    }

    #[tokio::test]
    async fn test_same_name_shares_breaker_state() {
        let layer = layer_with_tight_breaker();

        for _ in 0..2 {
            let result: Result<()> = layer
                .protect("cloud-tts", || async { Err(anyhow::anyhow!("500")) })
                .await;
            assert!(result.is_err());
        }

        // The named breaker is now open for every caller of that name.
        assert_eq!(layer.breaker("cloud-tts").state(), CircuitState::Open);
        let result: Result<()> = layer.protect("cloud-tts", || async { Ok(()) }).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen(_))));

        // Other names are unaffected.
        assert!(layer.protect("cloud-asr", || async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_named_override_applies() {
        let layer = layer_with_tight_breaker();
        let snapshot = layer.breaker("cloud-tts").snapshot();
        assert_eq!(snapshot.name, "cloud-tts");

        // Default-config breaker uses the default threshold.
        let default_state = layer.breaker("something-else").state();
        assert_eq!(default_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_worker_pool_strategy_runs_calls() {
        let mut config = ResilienceConfig::default();
        config.bulkheads.insert(
            "vision-ocr".to_string(),
            BulkheadSettings {
                max_concurrent: 2,
                max_queue_size: 4,
                isolation: fleet_core::config::IsolationStrategy::WorkerPool,
                ..Default::default()
            },
        );
        let layer = ResilienceLayer::new(config);

        let value = layer
            .protect("vision-ocr", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        // The call went through the pool path, not a semaphore bulkhead.
        assert!(layer.bulkhead_snapshots().is_empty());
    }
}
