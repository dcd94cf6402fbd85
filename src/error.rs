use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

/// Unified error type for the realtime service
#[derive(Error, Debug)]
pub enum RealtimeError {
    // Registry errors
    #[error("Invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("Channel not found: {name}")]
    ChannelNotFound { name: String },

    // Transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    // Codec errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;

impl RealtimeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RealtimeError::InvalidChannelName(_) | RealtimeError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            RealtimeError::ChannelNotFound { .. } => StatusCode::NOT_FOUND,

            RealtimeError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            RealtimeError::WebSocket(_) | RealtimeError::ConnectionFailed(_) => {
                StatusCode::BAD_GATEWAY
            }

            RealtimeError::Json(_) | RealtimeError::Io(_) | RealtimeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self);
        } else {
            debug!(status = status.as_u16(), "Request rejected: {}", self);
        }
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
