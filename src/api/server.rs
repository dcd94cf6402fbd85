//! Relay API server using Axum
//!
//! Exposes registry status and relays change feeds to browser consumers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::RelayServerConfig;
use crate::error::{RealtimeError, Result};
use crate::registry::ChannelRegistry;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ChannelRegistry>,
    pub started_at: Instant,
    /// Which feed backs the registry ("socket" or "memory")
    pub feed_kind: &'static str,
}

impl AppState {
    pub fn new(registry: Arc<ChannelRegistry>, feed_kind: &'static str) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
            feed_kind,
        }
    }
}

/// Relay API server
pub struct ApiServer {
    config: RelayServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: RelayServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| RealtimeError::InvalidConfig(format!("Invalid relay address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener, async move {
            let _ = shutdown.changed().await;
        })
        .await
    }

    /// Serve on an already bound listener until `signal` resolves
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.router();

        info!("Relay server listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| RealtimeError::Internal(e.to_string()))?;

        info!("Relay server shut down");
        Ok(())
    }
}
