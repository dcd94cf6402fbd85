//! Change-feed WebSocket relay
//!
//! Each connected client is one independent subscriber on the registry.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::WS_BUFFER_SIZE;
use crate::api::server::AppState;
use crate::models::ChangeEvent;

/// WebSocket handler for one change feed
pub async fn feed_ws(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_feed_ws(socket, name, state))
}

/// Handle WebSocket connection for a feed
async fn handle_feed_ws(socket: WebSocket, name: String, state: AppState) {
    let client_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ChangeEvent>(WS_BUFFER_SIZE);

    let channel = name.clone();
    let subscription = match state.registry.subscribe(&name, move |event| {
        // Listeners run on the feed's dispatch path; never block it.
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(channel = %channel, "Feed WebSocket buffer full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(channel = %name, client = %client_id, "Feed WebSocket rejected: {}", e);
            let body = json!({ "error": e.to_string() }).to_string();
            let _ = sender.send(Message::Text(body)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(channel = %name, client = %client_id, "Feed WebSocket connected");

    // Spawn task to send events to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize change event: {}", e);
                }
            }
        }
    });

    // Handle incoming messages (mainly for ping/pong and close)
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    debug!("Feed WebSocket received close");
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by axum
                }
                Err(e) => {
                    debug!("Feed WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = &mut send_task => {}
        _ = &mut receive_task => {}
    }

    subscription.unsubscribe();
    send_task.abort();
    receive_task.abort();
    let _ = tokio::join!(send_task, receive_task);

    info!(channel = %name, client = %client_id, "Feed WebSocket disconnected");
}
