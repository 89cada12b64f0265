//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, producer status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (first cycle done or cache warm)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ProducerState, ProducerStatus};
use crate::domain::schedule::MarketSchedule;
use crate::infrastructure::broadcast::ConnectionRegistry;
use crate::infrastructure::metrics::get_metrics_handle;

/// Consecutive failed cycles after which the service reports unhealthy.
pub const UNHEALTHY_AFTER_FAILURES: u64 = 10;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the market gate is open right now.
    pub market_open: bool,
    /// Producer loop status.
    pub producer: ProducerInfo,
    /// Subscriber and cache status.
    pub broadcast: BroadcastInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fetches succeeding.
    Healthy,
    /// Recent fetches failing.
    Degraded,
    /// Fetches failing persistently.
    Unhealthy,
}

/// Producer loop status.
#[derive(Debug, Clone, Serialize)]
pub struct ProducerInfo {
    /// State chosen on the latest tick.
    pub state: Option<ProducerState>,
    /// Completed fetch cycles.
    pub cycles: u64,
    /// Cycles whose fetch failed.
    pub failed_cycles: u64,
    /// Failed cycles since the last success.
    pub consecutive_failures: u64,
    /// Size of the last published batch.
    pub last_batch_size: usize,
    /// When the last cycle completed.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Most recent fetch error.
    pub last_error: Option<String>,
}

/// Subscriber and cache status.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastInfo {
    /// Connected WebSocket subscribers.
    pub subscribers: usize,
    /// Alerts in the cached batch.
    pub cached_alerts: usize,
    /// When the cached batch was published (exchange-local).
    pub last_updated: Option<NaiveDateTime>,
    /// Whether the cache predates today's close.
    pub stale: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    schedule: Arc<MarketSchedule>,
    registry: Arc<ConnectionRegistry>,
    producer: Arc<ProducerStatus>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        schedule: Arc<MarketSchedule>,
        registry: Arc<ConnectionRegistry>,
        producer: Arc<ProducerStatus>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            schedule,
            registry,
            producer,
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
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
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
    if is_ready(&state) {
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

fn is_ready(state: &HealthServerState) -> bool {
    state.producer.cycles() > 0 || state.registry.has_data()
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let producer = &state.producer;
    let stats = state.registry.stats();
    let local_now = state.schedule.local_now();

    HealthResponse {
        status: determine_health_status(producer.consecutive_failures()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        market_open: state.schedule.is_open_local(local_now),
        producer: ProducerInfo {
            state: producer.state(),
            cycles: producer.cycles(),
            failed_cycles: producer.failed_cycles(),
            consecutive_failures: producer.consecutive_failures(),
            last_batch_size: producer.last_batch_size(),
            last_cycle_at: producer.last_cycle_at(),
            last_error: producer.last_error(),
        },
        broadcast: BroadcastInfo {
            subscribers: stats.subscribers,
            cached_alerts: stats.cached_frames,
            last_updated: stats.last_updated,
            stale: state.registry.is_stale(local_now),
        },
    }
}

const fn determine_health_status(consecutive_failures: u64) -> HealthStatus {
    match consecutive_failures {
        0 => HealthStatus::Healthy,
        n if n < UNHEALTHY_AFTER_FAILURES => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
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
