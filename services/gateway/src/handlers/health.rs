//! Health check, catalog and monitoring handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::debug;

use crate::metrics::update_system_metrics;
use crate::models::{GatewayInfo, HealthCheckResponse};
use crate::server::AppState;

/// Liveness probe; never touches a backend
pub async fn health_check() -> Json<HealthCheckResponse> {
    debug!("Health check request");
    Json(HealthCheckResponse::ok())
}

/// Route catalog served on `/`
pub async fn gateway_info(State(state): State<AppState>) -> Json<GatewayInfo> {
    Json(GatewayInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        routes: state.pipeline.router().table().catalog(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => {
            update_system_metrics(state.pipeline.limiter().stats().tracked_keys);
            handle.render().into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
