//! Circuit breaker state machine.
//!
//! One breaker per named downstream dependency, shared by every caller of
//! that dependency within the process. Unrelated dependencies fail
//! independently; there is no global circuit.

use crate::{ResilienceError, Result};
use fleet_core::config::BreakerSettings;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls fail fast until the cooldown elapses
    Open,
    /// A single trial call is in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Facts-only view of a breaker, for logs and operator tooling
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: u32,
    pub calls_total: u64,
    pub failures_total: u64,
    pub fast_failures_total: u64,
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    /// Failures observed in the current rolling window
    failures: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
    /// Whether the half-open trial slot is taken
    trial_in_flight: bool,
}

/// Circuit breaker for one named downstream dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    core: Mutex<BreakerCore>,
    calls_total: AtomicU64,
    failures_total: AtomicU64,
    fast_failures_total: AtomicU64,
}

enum Admission {
    Proceed,
    Trial,
    Rejected,
}

impl CircuitBreaker {
    /// Create a breaker with the given settings
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failures: 0,
                window_start: Instant::now(),
                opened_at: None,
                trial_in_flight: false,
            }),
            calls_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            fast_failures_total: AtomicU64::new(0),
        }
    }

    /// Name of the protected dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Execute the protected operation.
    ///
    /// Enforces the per-call request timeout; a timeout counts as a
    /// failure. While the circuit is open the downstream is not attempted
    /// at all.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.admit() {
            Admission::Rejected => {
                self.fast_failures_total.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.name, "circuit open, failing fast");
                return Err(ResilienceError::CircuitOpen(self.name.clone()));
            }
            Admission::Proceed | Admission::Trial => {}
        }

        self.calls_total.fetch_add(1, Ordering::Relaxed);
        let request_timeout = Duration::from_millis(self.settings.request_timeout_ms);

        match tokio::time::timeout(request_timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure();
                Err(ResilienceError::Downstream(e))
            }
            Err(_) => {
                self.on_failure();
                Err(ResilienceError::Timeout {
                    name: self.name.clone(),
                    timeout: request_timeout,
                })
            }
        }
    }

    /// Facts-only snapshot for logs and tooling
    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.core.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: core.state,
            failures_in_window: core.failures,
            calls_total: self.calls_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            fast_failures_total: self.fast_failures_total.load(Ordering::Relaxed),
        }
    }

    fn admit(&self) -> Admission {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => Admission::Proceed,
            CircuitState::Open => {
                let cooldown = Duration::from_secs(self.settings.timeout_duration_secs);
                let elapsed = core
                    .opened_at
                    .map(|t| t.elapsed() >= cooldown)
                    .unwrap_or(true);
                if elapsed {
                    core.state = CircuitState::HalfOpen;
                    core.trial_in_flight = true;
                    debug!(breaker = %self.name, "cooldown elapsed, admitting trial call");
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if core.trial_in_flight {
                    Admission::Rejected
                } else {
                    core.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn on_success(&self) {
        let mut core = self.core.lock();
        if core.state != CircuitState::Closed {
            debug!(breaker = %self.name, from = %core.state, "circuit closed");
        }
        core.state = CircuitState::Closed;
        core.failures = 0;
        core.window_start = Instant::now();
        core.opened_at = None;
        core.trial_in_flight = false;
    }

    fn on_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock();

        match core.state {
            CircuitState::HalfOpen => {
                // Failed trial: back to open, restart the cooldown.
                core.state = CircuitState::Open;
                core.opened_at = Some(Instant::now());
                core.trial_in_flight = false;
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                let window = Duration::from_secs(self.settings.failure_window_secs);
                if core.window_start.elapsed() > window {
                    core.failures = 0;
                    core.window_start = Instant::now();
                }
                core.failures += 1;
                if core.failures >= self.settings.failure_threshold {
                    core.state = CircuitState::Open;
                    core.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        failures = core.failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {
                // A late failure from a call admitted before the transition.
                core.opened_at = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            failure_window_secs: 60,
            timeout_duration_secs: 1,
            request_timeout_ms: 200,
        }
    }

    async fn failing_call(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(|| async { Err::<(), _>(anyhow::anyhow!("downstream boom")) })
            .await
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new("asr", fast_settings());
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..3 {
            let _ = failing_call(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_fails_fast_without_invoking_downstream() {
        let breaker = CircuitBreaker::new("asr", fast_settings());
        for _ in 0..3 {
            let _ = failing_call(&breaker).await;
        }

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked2 = invoked.clone();
        let result = breaker
            .call(|| async move {
                invoked2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_success_resets() {
        let breaker = CircuitBreaker::new("asr", fast_settings());
        for _ in 0..3 {
            let _ = failing_call(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Cooldown elapsed: the next call is the half-open trial.
        let result = breaker.call(|| async { Ok::<_, anyhow::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failures_in_window, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("asr", fast_settings());
        for _ in 0..3 {
            let _ = failing_call(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let _ = failing_call(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_request_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("slow", fast_settings());

        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
        assert_eq!(breaker.snapshot().failures_in_window, 1);
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let asr = CircuitBreaker::new("asr", fast_settings());
        let mt = CircuitBreaker::new("mt", fast_settings());

        for _ in 0..3 {
            let _ = failing_call(&asr).await;
        }

        assert_eq!(asr.state(), CircuitState::Open);
        assert_eq!(mt.state(), CircuitState::Closed);
        assert!(mt.call(|| async { Ok::<_, anyhow::Error>(()) }).await.is_ok());
    }
}
