//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .route("/api/channels", get(handlers::channels::list_channels))
        .route("/api/channels/:name", get(handlers::channels::get_channel))
        .route("/ws/feeds/:name", get(websocket::feed::feed_ws))
        .with_state(state)
}
