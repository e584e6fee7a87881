//! Agent health state and the HTTP health endpoint.
//!
//! The health endpoint runs on its own spawned task and its state is
//! guarded by short-lived locks of its own, so a stalled business call can
//! never stop liveness reporting.

use crate::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fleet_core::{HealthReport, HealthStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// Live health state of one agent process
#[derive(Debug)]
pub struct HealthState {
    started_at: Instant,
    status: RwLock<HealthStatus>,
    metrics: RwLock<HashMap<String, serde_json::Value>>,
}

impl HealthState {
    /// Create state reporting `Ok` from now
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            status: RwLock::new(HealthStatus::Ok),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Current status
    pub fn status(&self) -> HealthStatus {
        *self.status.read()
    }

    /// Update the status
    pub fn set_status(&self, status: HealthStatus) {
        *self.status.write() = status;
    }

    /// Set one free-form metric
    pub fn set_metric(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metrics.write().insert(key.into(), value.into());
    }

    /// Produce the report a health poll answers with
    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.status(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            metrics: self.metrics.read().clone(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP endpoint answering health polls
pub struct HealthEndpoint {
    state: Arc<HealthState>,
    bind_addr: String,
}

impl HealthEndpoint {
    /// Create an endpoint serving the given state
    pub fn new(state: Arc<HealthState>, bind_addr: impl Into<String>) -> Self {
        Self {
            state,
            bind_addr: bind_addr.into(),
        }
    }

    /// Bind and start serving; returns the bound address and the task.
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let app = create_app(self.state);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "health endpoint server error");
            }
        });

        info!(addr = %local_addr, "health endpoint listening");
        Ok((local_addr, handle))
    }
}

fn create_app(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// `GET /health`: the full report, 200 regardless of status so pollers
/// can distinguish "degraded" from "unreachable"
async fn health_handler(State(state): State<Arc<HealthState>>) -> Response {
    Json(state.report()).into_response()
}

/// `GET /ready`: 200 while the agent should receive traffic
async fn ready_handler(State(state): State<Arc<HealthState>>) -> Response {
    if state.status().is_serving() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_report() {
        let state = Arc::new(HealthState::new());
        state.set_metric("queue_depth", 4);
        let (addr, task) = HealthEndpoint::new(state.clone(), "127.0.0.1:0")
            .start()
            .await
            .unwrap();

        let report: HealthReport = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.metrics.get("queue_depth"), Some(&serde_json::json!(4)));

        task.abort();
    }

    #[tokio::test]
    async fn test_ready_tracks_status() {
        let state = Arc::new(HealthState::new());
        let (addr, task) = HealthEndpoint::new(state.clone(), "127.0.0.1:0")
            .start()
            .await
            .unwrap();
        let ready_url = format!("http://{}/ready", addr);

        assert!(reqwest::get(&ready_url).await.unwrap().status().is_success());

        state.set_status(HealthStatus::Unhealthy);
        assert_eq!(
            reqwest::get(&ready_url).await.unwrap().status().as_u16(),
            503
        );

        // Degraded still serves.
        state.set_status(HealthStatus::Degraded);
        assert!(reqwest::get(&ready_url).await.unwrap().status().is_success());

        task.abort();
    }
}
