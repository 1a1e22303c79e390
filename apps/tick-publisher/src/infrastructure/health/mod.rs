//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, pipeline status, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status with pipeline counters
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (broker connected and pipeline running)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PipelineSnapshot, PipelineStats};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Pipeline counters.
    pub pipeline: PipelineSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Broker connected and ingesting.
    Healthy,
    /// Broker connected but the pipeline is not running.
    Degraded,
    /// Broker not connected.
    Unhealthy,
}

impl HealthStatus {
    /// Derive the status from pipeline counters.
    #[must_use]
    pub const fn of(snapshot: &PipelineSnapshot) -> Self {
        match (snapshot.broker_connected, snapshot.running) {
            (true, true) => Self::Healthy,
            (true, false) => Self::Degraded,
            (false, _) => Self::Unhealthy,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    stats: Arc<PipelineStats>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, stats: Arc<PipelineStats>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            stats,
        }
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Build the health and metrics router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(status))
        .route("/healthz", get(live))
        .route("/readyz", get(ready))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

/// HTTP server for probes and scraping, stopped by its cancellation token.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a server for `port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Bind` if the port is unavailable and
    /// `HealthServerError::Serve` if the listener fails afterwards.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;
        tracing::info!(port, "Health endpoint listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!(port, "Health endpoint stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn status(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let pipeline = state.stats.snapshot();
    let health = HealthStatus::of(&pipeline);
    let body = HealthResponse {
        status: health,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        pipeline,
    };
    let code = if health == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}

async fn live() -> &'static str {
    "OK"
}

async fn ready(State(state): State<Arc<HealthServerState>>) -> (StatusCode, &'static str) {
    match HealthStatus::of(&state.stats.snapshot()) {
        HealthStatus::Healthy => (StatusCode::OK, "READY"),
        HealthStatus::Degraded | HealthStatus::Unhealthy => {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

async fn prometheus() -> impl IntoResponse {
    let Some(handle) = get_metrics_handle() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain")],
            "Metrics recorder not installed".to_string(),
        );
    };
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Port could not be bound.
    #[error("failed to bind health endpoint on port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Bind failure.
        #[source]
        source: std::io::Error,
    },

    /// Listener failed while serving.
    #[error("health endpoint failed: {0}")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn state() -> (Arc<HealthServerState>, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::new());
        let state = Arc::new(HealthServerState::new("1.2.3".to_string(), stats.clone()));
        (state, stats)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn degraded_when_stopped_but_connected() {
        let stats = PipelineStats::new();
        stats.set_broker_connected(true);
        assert_eq!(HealthStatus::of(&stats.snapshot()), HealthStatus::Degraded);
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

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (state, _) = state();
        let (status, body) = get(router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_follows_broker_and_pipeline() {
        let (state, stats) = state();

        let (status, _) = get(router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        stats.set_broker_connected(true);
        let (status, _) = get(router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        stats.set_running(true);
        let (status, body) = get(router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let (state, stats) = state();
        stats.set_broker_connected(true);
        stats.set_running(true);
        stats.record_received();
        stats.record_published();

        let (status, body) = get(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "1.2.3");
        assert_eq!(json["pipeline"]["received"], 1);
        assert_eq!(json["pipeline"]["published"], 1);
    }

    #[tokio::test]
    async fn unhealthy_without_broker() {
        let (state, _) = state();
        let (status, body) = get(router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("\"unhealthy\""));
    }
}
