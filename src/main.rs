//! POS Realtime Relay - Entry Point
//!
//! Starts the channel registry, its sweep service and the relay server with
//! graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use pos_realtime::api::{ApiServer, AppState};
use pos_realtime::config::LogConfig;
use pos_realtime::feed::{FeedClient, MemoryFeed, SocketFeed};
use pos_realtime::registry::{SweepHandle, SweepService};
use pos_realtime::{ChannelRegistry, Config, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting POS realtime relay");

    let (shutdown_tx, _) = watch::channel(false);

    // Pick the feed backend
    let mut feed_task = None;
    let (client, feed_kind): (Arc<dyn FeedClient>, &'static str) =
        if config.realtime.url.is_some() {
            let (feed, task) =
                SocketFeed::spawn(config.realtime.clone(), shutdown_tx.subscribe())?;
            feed_task = Some(task);
            (Arc::new(feed), "socket")
        } else {
            info!("REALTIME_URL not set, using in-memory feed");
            (Arc::new(MemoryFeed::new()), "memory")
        };

    let registry = Arc::new(ChannelRegistry::with_config(client, config.registry.clone()));

    // Start sweep service
    let (sweep_handle, sweep_shutdown) = SweepHandle::new();
    let sweep_service = SweepService::new(registry.clone());
    let sweep_task = tokio::spawn(async move {
        sweep_service.run(sweep_shutdown).await;
    });

    // Log-only subscriptions for configured channels
    let mut watches = Vec::new();
    for name in &config.relay.watch {
        let channel = name.clone();
        match registry.subscribe(name, move |event| {
            info!(
                channel = %channel,
                table = %event.table,
                kind = %event.kind.as_str(),
                "Change received"
            );
        }) {
            Ok(subscription) => watches.push(subscription),
            Err(e) => error!(channel = %name, "Failed to watch channel: {}", e),
        }
    }

    // Create API server
    let api_server = ApiServer::new(
        config.relay.clone(),
        AppState::new(registry.clone(), feed_kind),
    );
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("Relay server error: {}", e);
        }
    });

    info!(
        feed = feed_kind,
        watching = watches.len(),
        "Relay started on {}",
        config.relay_addr()
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    for subscription in &watches {
        subscription.unsubscribe();
    }

    let _ = shutdown_tx.send(true);
    sweep_handle.shutdown();

    let _ = tokio::join!(api_task, sweep_task);
    if let Some(task) = feed_task {
        let _ = task.await;
    }

    info!(channels = registry.len(), "POS realtime relay stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("pos_realtime={},tower_http=debug", log.level).into()
    });

    let fmt_layer = if log.format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
