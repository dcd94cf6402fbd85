//! Channel inspection handlers

use axum::extract::{Path, State};
use axum::Json;

use crate::api::server::AppState;
use crate::error::RealtimeError;
use crate::models::ChannelSnapshot;

/// List every registered channel
pub async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelSnapshot>> {
    Json(state.registry.snapshot())
}

/// Get one channel by feed name
pub async fn get_channel(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ChannelSnapshot>, RealtimeError> {
    state
        .registry
        .channel(&name)
        .map(Json)
        .ok_or(RealtimeError::ChannelNotFound { name })
}
