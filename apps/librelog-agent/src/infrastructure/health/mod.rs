//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session status reporting, and Prometheus metrics.
//! Used by container orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (200 only while connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::services::{SessionStatus, SharedQueue};
use crate::domain::session::SessionState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Agent version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Ingest session status.
    pub session: SessionInfo,
    /// Outbound queue status.
    pub queue: QueueInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Session connected.
    Healthy,
    /// Reconnecting; samples are buffered.
    Degraded,
    /// Session manager stopped.
    Unhealthy,
}

/// Ingest session status.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Lifecycle state.
    pub state: String,
    /// Whether sends are possible.
    pub connected: bool,
    /// Identifier of the live session.
    pub id: Option<String>,
    /// Generation of the live session.
    pub generation: Option<u64>,
    /// Reconnect attempts since the last healthy session.
    pub reconnect_attempts: u32,
}

/// Outbound queue status.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    /// Samples held, including the one in flight.
    pub depth: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Samples enqueued since start.
    pub enqueued: u64,
    /// Samples acknowledged since start.
    pub delivered: u64,
    /// Samples refused by the ingester since start.
    pub rejected: u64,
    /// Samples evicted under backpressure since start.
    pub dropped: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status_rx: watch::Receiver<SessionStatus>,
    queue: Arc<SharedQueue>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        status_rx: watch::Receiver<SessionStatus>,
        queue: Arc<SharedQueue>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status_rx,
            queue,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.status_rx.borrow().state.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let session = {
        let status = state.status_rx.borrow();
        let live = status.live_session();
        SessionInfo {
            state: status.state.to_string(),
            connected: status.state.is_connected(),
            id: live.as_ref().map(|s| s.id().to_string()),
            generation: live.as_ref().map(|s| s.generation()),
            reconnect_attempts: status.reconnect_attempts,
        }
    };

    let snapshot = state.queue.snapshot();

    HealthResponse {
        status: determine_health_status(&session),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        session,
        queue: QueueInfo {
            depth: snapshot.len,
            capacity: snapshot.capacity,
            enqueued: snapshot.stats.enqueued,
            delivered: snapshot.stats.delivered,
            rejected: snapshot.stats.rejected,
            dropped: snapshot.stats.dropped,
        },
    }
}

fn determine_health_status(session: &SessionInfo) -> HealthStatus {
    if session.connected {
        HealthStatus::Healthy
    } else if session.state == SessionState::Terminated.as_str() {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::domain::sample::Sample;

    fn session_info(state: SessionState) -> SessionInfo {
        SessionInfo {
            state: state.to_string(),
            connected: state.is_connected(),
            id: None,
            generation: None,
            reconnect_attempts: 0,
        }
    }

    async fn serve(state: Arc<HealthServerState>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_by_session_state() {
        assert_eq!(
            determine_health_status(&session_info(SessionState::Connected)),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&session_info(SessionState::Disconnected)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&session_info(SessionState::Reauthenticating)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&session_info(SessionState::Terminated)),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn endpoints_report_session_and_queue() {
        let queue = Arc::new(SharedQueue::new(NonZeroUsize::new(4).unwrap()));
        queue.push(Sample::single("ram", "perc", 42.0).unwrap());

        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let state = Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            status_rx,
            Arc::clone(&queue),
        ));
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let live = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(live.status().as_u16(), 200);

        let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
        assert_eq!(ready.status().as_u16(), 503);

        let body: serde_json::Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["session"]["state"], "disconnected");
        assert_eq!(body["queue"]["depth"], 1);
        assert_eq!(body["queue"]["capacity"], 4);

        status_tx.send_replace(SessionStatus {
            state: SessionState::Terminated,
            session: None,
            reconnect_attempts: 0,
        });
        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.status().as_u16(), 503);
    }
}
