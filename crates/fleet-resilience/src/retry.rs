//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy: a bounded attempt count with exponential backoff.
///
/// Backoff doubles from `initial` and is capped at `cap`. A server-supplied
/// hint (`retry_after`) acts as a floor on the wait when it is larger than
/// the computed backoff; the hint is not capped, the server knows best.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial: Duration,
    /// Upper bound on the computed backoff
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            initial,
            cap,
        }
    }

    /// Backoff before attempt `attempt + 1` (zero-based attempt index)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial
            .checked_mul(1u32 << attempt.min(16))
            .unwrap_or(self.cap);
        doubled.min(self.cap)
    }

    /// Wait before the next attempt, honoring a server floor
    pub fn delay(&self, attempt: u32, floor: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        match floor {
            Some(floor) if floor > backoff => floor,
            _ => backoff,
        }
    }

    /// Run an operation, retrying transient failures with backoff.
    ///
    /// The operation is retried while it returns an error classified as
    /// retryable by [`fleet_core::Error::is_retryable`] and attempts remain;
    /// the final error is surfaced to the caller.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> fleet_core::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = fleet_core::Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    debug!(
                        operation = name,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial: Duration::from_millis(250),
            cap: Duration::from_millis(2000),
        }
    }
}
