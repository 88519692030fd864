//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, Prometheus
//! metrics and a read-only view of the stored hourly averages.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ticks flowing)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /averages/{pair}` - Hourly buckets for a pair, newest first

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::HourlyAggregator;
use crate::domain::feed::{FeedSource, FeedStatus};
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

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
    /// Tick source status.
    pub feed: FeedInfo,
    /// Open viewer connections.
    pub viewers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Ticks are flowing.
    Healthy,
    /// Serving viewers, but no source is configured.
    Degraded,
    /// Upstream feed selected but not subscribed.
    Unhealthy,
}

/// Tick source status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Source kind: "upstream", "synthetic" or "disabled".
    pub source: &'static str,
    /// Connection state.
    pub state: &'static str,
    /// Raw trade records received.
    pub trades_received: u64,
    /// Reconnect attempts since the last subscribe.
    pub reconnect_attempts: u32,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_status: Arc<FeedStatus>,
    broadcast_hub: SharedBroadcastHub,
    aggregator: Arc<HourlyAggregator>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed_status: Arc<FeedStatus>,
        broadcast_hub: SharedBroadcastHub,
        aggregator: Arc<HourlyAggregator>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_status,
            broadcast_hub,
            aggregator,
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
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/averages/{pair}", get(averages_handler))
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
    if state.feed_status.is_live() {
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

async fn averages_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(pair): Path<String>,
) -> impl IntoResponse {
    match state.aggregator.buckets_for_pair(&pair.to_uppercase()).await {
        Ok(buckets) => (StatusCode::OK, Json(buckets)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, pair = %pair, "Failed to read hourly averages");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let status = &state.feed_status;
    let feed = FeedInfo {
        source: status.source().as_str(),
        state: status.state().as_str(),
        trades_received: status.trades_received(),
        reconnect_attempts: status.reconnect_attempts(),
    };

    HealthResponse {
        status: determine_health_status(status),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        viewers: state.broadcast_hub.connection_count(),
    }
}

fn determine_health_status(status: &FeedStatus) -> HealthStatus {
    match status.source() {
        FeedSource::Disabled => HealthStatus::Degraded,
        FeedSource::Synthetic | FeedSource::Upstream if status.is_live() => HealthStatus::Healthy,
        FeedSource::Synthetic | FeedSource::Upstream => HealthStatus::Unhealthy,
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
    use axum::body::to_bytes;
    use axum::response::Response;
    use chrono::TimeZone;

    use super::*;
    use crate::domain::feed::FeedEvent;
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::persistence::MemoryAggregateStore;

    fn state(source: FeedSource) -> (Arc<HealthServerState>, Arc<FeedStatus>, Arc<HourlyAggregator>) {
        let status = Arc::new(FeedStatus::new(source));
        let aggregator = Arc::new(HourlyAggregator::new(Arc::new(MemoryAggregateStore::new())));
        let state = Arc::new(HealthServerState::new(
            "0.0.0-test".to_string(),
            Arc::clone(&status),
            Arc::new(BroadcastHub::with_defaults()),
            Arc::clone(&aggregator),
        ));
        (state, status, aggregator)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn upstream_status_follows_subscription() {
        let (state, status, _) = state(FeedSource::Upstream);
        assert_eq!(build_health_response(&state).status, HealthStatus::Unhealthy);

        status.apply(&FeedEvent::Connecting);
        status.apply(&FeedEvent::Subscribed {
            symbols: vec!["ETHUSDC".to_string()],
        });
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.feed.state, "subscribed");
        assert_eq!(response.feed.source, "upstream");

        status.apply(&FeedEvent::Disconnected);
        status.apply(&FeedEvent::Reconnecting { attempt: 2 });
        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.feed.reconnect_attempts, 2);
    }

    #[test]
    fn synthetic_is_healthy_and_disabled_is_degraded() {
        let (synthetic, _, _) = state(FeedSource::Synthetic);
        assert_eq!(build_health_response(&synthetic).status, HealthStatus::Healthy);

        let (disabled, _, _) = state(FeedSource::Disabled);
        assert_eq!(build_health_response(&disabled).status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn readiness_reflects_feed() {
        let (state, status, _) = state(FeedSource::Upstream);
        let response = readiness_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        status.apply(&FeedEvent::Subscribed { symbols: vec![] });
        let response = readiness_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn averages_are_listed_newest_first() {
        let (state, _, aggregator) = state(FeedSource::Synthetic);
        let ten = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();
        let eleven = Utc.with_ymd_and_hms(2024, 5, 1, 11, 5, 0).unwrap();
        aggregator.merge("ETHUSDC", ten, 2000.0, 1).await.unwrap();
        aggregator.merge("ETHUSDC", eleven, 2010.0, 1).await.unwrap();
        aggregator.merge("ETHUSDC", eleven, 2020.0, 1).await.unwrap();

        let response = averages_handler(State(state), Path("ethusdc".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let buckets = json.as_array().unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0]["hour_start"], "2024-05-01T11:00:00Z");
        assert_eq!(buckets[0]["avg_price"], 2015.0);
        assert_eq!(buckets[0]["sample_count"], 2);
        assert_eq!(buckets[1]["avg_price"], 2000.0);
    }

    #[tokio::test]
    async fn unknown_pair_returns_empty_list() {
        let (state, _, _) = state(FeedSource::Synthetic);
        let response = averages_handler(State(state), Path("NOPE".to_string()))
            .await
            .into_response();
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }
}
