//! HTTP API for editor extensions.
//!
//! Feature routes mirror the backend contract but go through the coordinator:
//! - POST /entropy, /ghost, /autopanic, /saliency (debounced triggers)
//! - POST /v1/metrics (explicit request, no debounce)
//! - POST /v1/ranks (per-token ranks of a whole document)
//! - POST /v1/cache/clear
//! - GET /v1/cache/stats
//! - GET /health
//! - GET /metrics
//!
//! Results come back as `200` with a JSON body. `204` means there is nothing
//! to deliver: the backend failed or had no data, or a newer trigger for the
//! same feature superseded this one.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::backend::types::{PrefixRequest, RanksRequest, SaliencyRequest};
use crate::config::Config;
use crate::coordinator::{Coordinator, FeatureStats, MetricsRequest, Outcome};
use crate::telemetry::Telemetry;

/// Application state shared across handlers.
pub struct AppState {
    pub coordinator: Coordinator,
    pub telemetry: Arc<Telemetry>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/entropy", post(entropy))
        .route("/ghost", post(ghost))
        .route("/autopanic", post(autopanic))
        .route("/saliency", post(saliency))
        .route("/v1/metrics", post(metrics_request))
        .route("/v1/ranks", post(token_ranks))
        .route("/v1/cache/clear", post(clear_cache))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ─── Response Types ────────────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub backend: String,
    pub features: Vec<FeatureStats>,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub features: Vec<FeatureStats>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: bool,
}

fn deliver<T: Serialize>(outcome: Outcome<T>) -> Response {
    match outcome.into_value() {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn entropy(State(state): State<Arc<AppState>>, Json(req): Json<PrefixRequest>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    debug!(request_id, uri = req.uri, prefix_chars = req.prefix.len(), "Entropy trigger");
    deliver(state.coordinator.entropy(req).await)
}

async fn ghost(State(state): State<Arc<AppState>>, Json(req): Json<PrefixRequest>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    debug!(request_id, uri = req.uri, prefix_chars = req.prefix.len(), "Ghost trigger");
    deliver(state.coordinator.ghost(req).await)
}

async fn autopanic(State(state): State<Arc<AppState>>, Json(req): Json<PrefixRequest>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    debug!(request_id, uri = req.uri, prefix_chars = req.prefix.len(), "Autopanic trigger");
    deliver(state.coordinator.autopanic(req).await)
}

async fn saliency(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaliencyRequest>,
) -> Result<Response, StatusCode> {
    // Lines are 1-indexed.
    if req.cursor_line == 0 {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let request_id = Uuid::new_v4().to_string();
    info!(
        request_id,
        uri = req.uri,
        line = req.cursor_line,
        character = req.cursor_char,
        "Saliency trigger"
    );
    Ok(deliver(state.coordinator.saliency(req).await))
}

async fn metrics_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MetricsRequest>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    debug!(request_id, feature = %req.feature(), "Explicit metrics request");
    match state.coordinator.get_metrics(req).await {
        Some(metrics) => Json(metrics).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn token_ranks(State(state): State<Arc<AppState>>, Json(req): Json<RanksRequest>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id, uri = req.uri, code_chars = req.code.len(), "Token ranks request");
    match state.coordinator.token_ranks(req).await {
        Some(ranks) => Json(ranks).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<ClearResponse> {
    state.coordinator.clear_all().await;
    Json(ClearResponse { cleared: true })
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        features: state.coordinator.stats().await,
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backend = match state.config.backend.mode {
        crate::config::BackendMode::Remote => state.config.backend.url.clone(),
        crate::config::BackendMode::Local => state.config.backend.completions_url.clone(),
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        backend,
        features: state.coordinator.stats().await,
    })
}

async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> Result<Response, StatusCode> {
    let body = state.telemetry.render().map_err(|e| {
        error!(error = %e, "Failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}
