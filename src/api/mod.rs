//! Relay API
//!
//! REST status endpoints and the WebSocket change-feed relay.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayServerConfig;
    use crate::feed::memory::MemoryFeed;
    use crate::models::{ChangeEvent, ChangeKind, ChannelSnapshot};
    use crate::registry::ChannelRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message;
    use tower::ServiceExt;

    fn relay_config() -> RelayServerConfig {
        RelayServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
            cors_origins: vec![],
            watch: vec![],
        }
    }

    fn setup() -> (Arc<MemoryFeed>, Arc<ChannelRegistry>, ApiServer) {
        let feed = Arc::new(MemoryFeed::new());
        let registry = Arc::new(ChannelRegistry::new(feed.clone()));
        let server = ApiServer::new(relay_config(), AppState::new(registry.clone(), "memory"));
        (feed, registry, server)
    }

    async fn get_json(server: &ApiServer, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = server
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_feed, _registry, server) = setup();
        let (status, body) = get_json(&server, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "pos-realtime");
    }

    #[tokio::test]
    async fn test_status_reports_registry_stats() {
        let (_feed, registry, server) = setup();
        let sub = registry.subscribe("orders", |_| {}).unwrap();

        let (status, body) = get_json(&server, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["feed"], "memory");
        assert_eq!(body["registry"]["active_channels"], 1);
        assert_eq!(body["registry"]["channels_created"], 1);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_channel_endpoints() {
        let (_feed, registry, server) = setup();
        let _a = registry.subscribe("orders", |_| {}).unwrap();
        let _b = registry.subscribe("orders", |_| {}).unwrap();

        let (status, body) = get_json(&server, "/api/channels").await;
        assert_eq!(status, StatusCode::OK);
        let channels: Vec<ChannelSnapshot> = serde_json::from_value(body).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].listeners, 2);

        let (status, body) = get_json(&server, "/api/channels/orders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "open");

        let (status, body) = get_json(&server, "/api/channels/tables").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Channel not found: tables");
    }

    #[tokio::test]
    async fn test_feed_websocket_relays_events_and_unsubscribes() {
        let (feed, registry, server) = setup();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            server
                .serve(listener, async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let url = format!("ws://{}/ws/feeds/orders", addr);
        let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        for _ in 0..100 {
            if registry.listener_count("orders") == Some(1) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.listener_count("orders"), Some(1));

        let event = ChangeEvent::new("orders", ChangeKind::Update, "orders")
            .with_record(serde_json::json!({"id": 3, "status": "ready"}));
        assert_eq!(feed.publish("orders", event.clone()), 1);

        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text frame, got {:?}", msg);
        };
        let received: ChangeEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(received, event);

        client.close(None).await.unwrap();
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
        assert_eq!(feed.closed(), 1);

        let _ = stop_tx.send(());
        timeout(Duration::from_secs(2), server_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
