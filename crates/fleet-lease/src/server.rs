//! Lease arbitration server.

use crate::protocol::{LeaseRequest, LeaseResponse, LeaseStats};
use crate::Result;
use async_trait::async_trait;
use fleet_core::config::LeaseConfig;
use fleet_wire::{FrameHandler, FrameServer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounds on the retry hint handed to denied clients
const RETRY_HINT_MIN_MS: u64 = 250;
const RETRY_HINT_MAX_MS: u64 = 2000;
/// Added per priority level so urgent clients are hinted to return sooner
const RETRY_HINT_PRIORITY_STEP_MS: u64 = 50;

/// One active grant as the arbiter tracks it
#[derive(Debug, Clone)]
struct ActiveLease {
    lease_id: String,
    client_name: String,
    model_name: String,
    vram_estimate_mb: u64,
    #[allow(dead_code)]
    priority: u32,
    ttl: Duration,
    granted_at: Instant,
}

impl ActiveLease {
    fn expired(&self) -> bool {
        self.granted_at.elapsed() >= self.ttl
    }

    fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.granted_at.elapsed())
    }
}

#[derive(Debug, Default)]
struct Counters {
    grants: AtomicU64,
    denials: AtomicU64,
    releases: AtomicU64,
    reclaims: AtomicU64,
}

/// The arbiter: owns the budget and every active lease.
///
/// All admission decisions serialize through the table mutex, so the
/// budget invariant holds at every instant any concurrent caller can
/// observe. Nothing else writes lease state.
#[derive(Debug, Clone)]
pub struct LeaseState {
    budget_mb: u64,
    table: Arc<Mutex<HashMap<String, ActiveLease>>>,
    counters: Arc<Counters>,
}

impl LeaseState {
    /// Create an arbiter with the given VRAM budget
    pub fn new(budget_mb: u64) -> Self {
        Self {
            budget_mb,
            table: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Decide one acquire request.
    pub async fn acquire(
        &self,
        client: &str,
        model_name: &str,
        vram_estimate_mb: u64,
        priority: u32,
        ttl_seconds: u64,
    ) -> LeaseResponse {
        let mut table = self.table.lock().await;
        Self::reclaim_expired_locked(&mut table, &self.counters);

        let leased: u64 = table.values().map(|l| l.vram_estimate_mb).sum();

        if leased + vram_estimate_mb <= self.budget_mb {
            let lease = ActiveLease {
                lease_id: Uuid::new_v4().to_string(),
                client_name: client.to_string(),
                model_name: model_name.to_string(),
                vram_estimate_mb,
                priority,
                ttl: Duration::from_secs(ttl_seconds),
                granted_at: Instant::now(),
            };
            let lease_id = lease.lease_id.clone();
            table.insert(lease_id.clone(), lease);
            self.counters.grants.fetch_add(1, Ordering::Relaxed);

            info!(
                client = client,
                model = model_name,
                vram_mb = vram_estimate_mb,
                leased_mb = leased + vram_estimate_mb,
                budget_mb = self.budget_mb,
                "lease granted"
            );

            LeaseResponse::Acquired {
                granted: true,
                lease_id: Some(lease_id),
                retry_after_ms: 0,
            }
        } else {
            self.counters.denials.fetch_add(1, Ordering::Relaxed);
            let retry_after_ms = Self::retry_hint(&table, priority);

            // A denial is the budget working, not a malfunction.
            warn!(
                client = client,
                model = model_name,
                requested_mb = vram_estimate_mb,
                leased_mb = leased,
                budget_mb = self.budget_mb,
                retry_after_ms = retry_after_ms,
                "lease denied, budget protection engaged"
            );

            LeaseResponse::Acquired {
                granted: false,
                lease_id: None,
                retry_after_ms,
            }
        }
    }

    /// Release a lease. Unknown or already-released ids are a no-op:
    /// callers legitimately race the TTL reclaim.
    pub async fn release(&self, lease_id: &str) {
        let mut table = self.table.lock().await;
        if let Some(lease) = table.remove(lease_id) {
            self.counters.releases.fetch_add(1, Ordering::Relaxed);
            debug!(
                lease_id = lease_id,
                client = %lease.client_name,
                vram_mb = lease.vram_estimate_mb,
                "lease released"
            );
        } else {
            debug!(lease_id = lease_id, "release of unknown lease ignored");
        }
    }

    /// Reclaim every expired lease. Returns how many were dropped.
    pub async fn reclaim_expired(&self) -> usize {
        let mut table = self.table.lock().await;
        Self::reclaim_expired_locked(&mut table, &self.counters)
    }

    fn reclaim_expired_locked(
        table: &mut HashMap<String, ActiveLease>,
        counters: &Counters,
    ) -> usize {
        let expired: Vec<String> = table
            .values()
            .filter(|l| l.expired())
            .map(|l| l.lease_id.clone())
            .collect();

        for lease_id in &expired {
            if let Some(lease) = table.remove(lease_id) {
                counters.reclaims.fetch_add(1, Ordering::Relaxed);
                warn!(
                    lease_id = %lease_id,
                    client = %lease.client_name,
                    vram_mb = lease.vram_estimate_mb,
                    "lease TTL elapsed without release, reclaimed"
                );
            }
        }
        expired.len()
    }

    /// Suggested wait: the soonest expiry among active leases, clamped,
    /// plus a per-priority penalty so urgent clients retry first.
    fn retry_hint(table: &HashMap<String, ActiveLease>, priority: u32) -> u64 {
        let soonest_ms = table
            .values()
            .map(|l| l.remaining().as_millis() as u64)
            .min()
            .unwrap_or(RETRY_HINT_MAX_MS);

        soonest_ms.clamp(RETRY_HINT_MIN_MS, RETRY_HINT_MAX_MS)
            + RETRY_HINT_PRIORITY_STEP_MS * priority as u64
    }

    /// VRAM currently leased out
    pub async fn leased_mb(&self) -> u64 {
        self.table
            .lock()
            .await
            .values()
            .map(|l| l.vram_estimate_mb)
            .sum()
    }

    /// Server statistics
    pub async fn stats(&self) -> LeaseStats {
        let table = self.table.lock().await;
        LeaseStats {
            budget_mb: self.budget_mb,
            leased_mb: table.values().map(|l| l.vram_estimate_mb).sum(),
            active_leases: table.len(),
            grants_total: self.counters.grants.load(Ordering::Relaxed),
            denials_total: self.counters.denials.load(Ordering::Relaxed),
            releases_total: self.counters.releases.load(Ordering::Relaxed),
            reclaims_total: self.counters.reclaims.load(Ordering::Relaxed),
        }
    }
}

/// Frame handler translating wire requests into arbiter calls
struct LeaseHandler {
    state: LeaseState,
}

#[async_trait]
impl FrameHandler for LeaseHandler {
    async fn handle(&self, frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
        let response = match serde_json::from_slice::<LeaseRequest>(&frame) {
            Ok(LeaseRequest::Acquire {
                client,
                model_name,
                vram_estimate_mb,
                priority,
                ttl_seconds,
            }) => {
                self.state
                    .acquire(&client, &model_name, vram_estimate_mb, priority, ttl_seconds)
                    .await
            }
            Ok(LeaseRequest::Release { lease_id }) => {
                self.state.release(&lease_id).await;
                LeaseResponse::Released
            }
            Ok(LeaseRequest::Stats) => LeaseResponse::Stats {
                stats: self.state.stats().await,
            },
            Err(e) => {
                debug!(error = %e, "rejecting malformed lease request");
                LeaseResponse::Error {
                    message: e.to_string(),
                }
            }
        };
        Ok(serde_json::to_vec(&response)?)
    }
}

/// Handle to a running lease server
pub struct LeaseServerHandle {
    local_addr: SocketAddr,
    state: LeaseState,
    tasks: Vec<JoinHandle<()>>,
}

impl LeaseServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The arbiter (shared; useful for in-process inspection)
    pub fn state(&self) -> LeaseState {
        self.state.clone()
    }

    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(addr = %self.local_addr, "lease server stopped");
    }
}

impl Drop for LeaseServerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The lease server
pub struct LeaseServer {
    config: LeaseConfig,
}

impl LeaseServer {
    pub fn new(config: LeaseConfig) -> Self {
        Self { config }
    }

    /// Bind and start serving; returns a handle owning the background tasks.
    pub async fn start(&self) -> Result<LeaseServerHandle> {
        let state = LeaseState::new(self.config.vram_budget_mb);
        let frame_server = FrameServer::bind(&self.config.addr).await?;
        let local_addr = frame_server.local_addr();

        let mut tasks = Vec::new();
        tasks.push(frame_server.spawn(LeaseHandler {
            state: state.clone(),
        }));

        // Background sweep bounds VRAM leakage from crashed holders even
        // when no acquire traffic triggers the inline reclaim.
        let sweep_state = state.clone();
        let sweep_interval = Duration::from_secs(self.config.reclaim_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sweep_state.reclaim_expired().await;
            }
        }));

        info!(
            addr = %local_addr,
            budget_mb = self.config.vram_budget_mb,
            "lease server started"
        );
        Ok(LeaseServerHandle {
            local_addr,
            state,
            tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(response: &LeaseResponse) -> Option<String> {
        match response {
            LeaseResponse::Acquired {
                granted: true,
                lease_id: Some(id),
                ..
            } => Some(id.clone()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_grant_within_budget() {
        let state = LeaseState::new(10_000);
        let reply = state.acquire("a", "m", 4_000, 5, 60).await;
        assert!(granted(&reply).is_some());
        assert_eq!(state.leased_mb().await, 4_000);
    }

    #[tokio::test]
    async fn test_denial_beyond_budget_with_hint() {
        let state = LeaseState::new(10_000);
        let _ = state.acquire("a", "m", 8_000, 5, 60).await;

        match state.acquire("b", "m", 4_000, 0, 60).await {
            LeaseResponse::Acquired {
                granted: false,
                lease_id: None,
                retry_after_ms,
            } => {
                assert!(retry_after_ms >= RETRY_HINT_MIN_MS);
            }
            other => panic!("expected denial, got {:?}", other),
        }
        // The failed request did not leak into the accounting.
        assert_eq!(state.leased_mb().await, 8_000);
    }

    #[tokio::test]
    async fn test_priority_biases_retry_hint() {
        let state = LeaseState::new(1_000);
        let _ = state.acquire("holder", "m", 1_000, 5, 60).await;

        let urgent = match state.acquire("u", "m", 500, 0, 60).await {
            LeaseResponse::Acquired { retry_after_ms, .. } => retry_after_ms,
            other => panic!("unexpected reply: {:?}", other),
        };
        let casual = match state.acquire("c", "m", 500, 8, 60).await {
            LeaseResponse::Acquired { retry_after_ms, .. } => retry_after_ms,
            other => panic!("unexpected reply: {:?}", other),
        };
        assert!(urgent < casual);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let state = LeaseState::new(10_000);
        let reply = state.acquire("a", "m", 4_000, 5, 60).await;
        let lease_id = granted(&reply).unwrap();

        state.release(&lease_id).await;
        assert_eq!(state.leased_mb().await, 0);

        // Second release and an unknown id are both silent no-ops.
        state.release(&lease_id).await;
        state.release("not-a-lease").await;
        assert_eq!(state.stats().await.releases_total, 1);
    }

    #[tokio::test]
    async fn test_ttl_reclaim_frees_budget() {
        let state = LeaseState::new(1_000);
        let reply = state.acquire("crashed-client", "m", 900, 5, 1).await;
        assert!(granted(&reply).is_some());

        // Denied while the stale lease still holds the budget.
        let denied = state.acquire("b", "m", 900, 5, 60).await;
        assert!(granted(&denied).is_none());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // No Release ever arrived; the next acquire reclaims inline.
        let after = state.acquire("b", "m", 900, 5, 60).await;
        assert!(granted(&after).is_some());
        assert_eq!(state.stats().await.reclaims_total, 1);
    }

    #[tokio::test]
    async fn test_budget_invariant_under_concurrency() {
        let state = LeaseState::new(1_000);
        let mut tasks = Vec::new();

        for i in 0..32 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                let reply = state.acquire(&format!("client-{}", i), "m", 300, 5, 60).await;
                // Observe the accounting right after our own admission.
                let leased = state.leased_mb().await;
                assert!(leased <= 1_000, "budget invariant violated: {}mb", leased);

                if let LeaseResponse::Acquired {
                    granted: true,
                    lease_id: Some(id),
                    ..
                } = reply
                {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    state.release(&id).await;
                    true
                } else {
                    false
                }
            }));
        }

        let mut grants = 0;
        for task in tasks {
            if task.await.unwrap() {
                grants += 1;
            }
        }

        // Some were granted, never more than the budget allows at once.
        assert!(grants >= 3);
        assert_eq!(state.leased_mb().await, 0);
        let stats = state.stats().await;
        assert_eq!(stats.grants_total, stats.releases_total);
    }
}
