//! Health check endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "pos-realtime"
        })),
    )
}

/// Service status with registry counters
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "feed": state.feed_kind,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "registry": state.registry.stats(),
    }))
}
