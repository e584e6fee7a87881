//! Bulkhead isolation: bounded concurrency per named resource.
//!
//! Two strategies are provided. [`Bulkhead`] gates callers on a semaphore
//! with a bounded wait queue - the caller's own task runs the operation
//! once a slot frees. [`WorkerPool`] dispatches operations onto a fixed set
//! of worker tasks with a bounded job queue, so saturating one resource's
//! pool cannot starve callers of a different resource.
//!
//! In both shapes the slot is released structurally (RAII permit or
//! pool-owned execution); forgetting a release is not expressible.

use crate::{ResilienceError, Result};
use fleet_core::config::BulkheadSettings;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tracing::{debug, warn};

/// Facts-only view of a bulkhead, for logs and operator tooling
#[derive(Debug, Clone)]
pub struct BulkheadSnapshot {
    pub name: String,
    pub max_concurrent: u32,
    pub available: u32,
    pub waiting: u32,
    pub accepted_total: u64,
    pub rejected_total: u64,
}

/// Semaphore-gated bulkhead for one named resource
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    settings: BulkheadSettings,
    semaphore: Arc<Semaphore>,
    waiting: AtomicU32,
    accepted_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl Bulkhead {
    /// Create a bulkhead with the given settings
    pub fn new(name: impl Into<String>, settings: BulkheadSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent as usize));
        Self {
            name: name.into(),
            settings,
            semaphore,
            waiting: AtomicU32::new(0),
            accepted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    /// Name of the guarded resource
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the operation inside a slot.
    ///
    /// If all slots are busy the caller waits on the bounded queue up to
    /// the acquire timeout; once the queue is full further callers are
    /// rejected immediately. The permit drops on every exit path.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                if self.waiting.load(Ordering::SeqCst) >= self.settings.max_queue_size {
                    self.rejected_total.fetch_add(1, Ordering::Relaxed);
                    debug!(bulkhead = %self.name, "queue full, rejecting caller");
                    return Err(ResilienceError::BulkheadFull(self.name.clone()));
                }

                self.waiting.fetch_add(1, Ordering::SeqCst);
                let acquire_timeout = Duration::from_millis(self.settings.acquire_timeout_ms);
                let acquired =
                    tokio::time::timeout(acquire_timeout, self.semaphore.clone().acquire_owned())
                        .await;
                self.waiting.fetch_sub(1, Ordering::SeqCst);

                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(ResilienceError::Internal(format!(
                            "bulkhead '{}' semaphore closed",
                            self.name
                        )))
                    }
                    Err(_) => {
                        self.rejected_total.fetch_add(1, Ordering::Relaxed);
                        warn!(bulkhead = %self.name, "timed out waiting for a slot");
                        return Err(ResilienceError::Timeout {
                            name: self.name.clone(),
                            timeout: acquire_timeout,
                        });
                    }
                }
            }
        };

        self.accepted_total.fetch_add(1, Ordering::Relaxed);
        Ok(op().await)
    }

    /// Facts-only snapshot for logs and tooling
    pub fn snapshot(&self) -> BulkheadSnapshot {
        BulkheadSnapshot {
            name: self.name.clone(),
            max_concurrent: self.settings.max_concurrent,
            available: self.semaphore.available_permits() as u32,
            waiting: self.waiting.load(Ordering::SeqCst),
            accepted_total: self.accepted_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
        }
    }
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Isolated worker pool for one named resource.
///
/// Jobs run on the pool's own tasks; the submitting task only waits for
/// the result. The job queue is bounded and rejects on overflow.
pub struct WorkerPool {
    name: String,
    tx: mpsc::Sender<Job>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn a pool with `max_concurrent` workers and a queue of
    /// `max_queue_size` pending jobs (minimum 1, a channel cannot be
    /// zero-capacity; a zero-size queue still rejects once workers are
    /// saturated and the single slot is taken).
    pub fn new(name: impl Into<String>, settings: &BulkheadSettings) -> Self {
        let name = name.into();
        let capacity = (settings.max_queue_size as usize).max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(settings.max_concurrent as usize);
        for worker_id in 0..settings.max_concurrent {
            let rx = rx.clone();
            let pool_name = name.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => {
                            debug!(pool = %pool_name, worker = worker_id, "worker pool drained, exiting");
                            break;
                        }
                    }
                }
            }));
        }

        Self { name, tx, workers }
    }

    /// Dispatch an operation onto the pool and wait for its result.
    pub async fn dispatch<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = result_tx.send(fut.await);
        });

        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                debug!(pool = %self.name, "job queue full, rejecting caller");
                ResilienceError::BulkheadFull(self.name.clone())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ResilienceError::Internal(format!("worker pool '{}' stopped", self.name))
            }
        })?;

        result_rx
            .await
            .map_err(|_| ResilienceError::Internal(format!("worker pool '{}' dropped a job", self.name)))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .finish()
    }
}
