//! Websocket realtime client
//!
//! One socket per process carries every feed as a Phoenix topic. Channels are
//! joined on `activate()`, acknowledged joins move to `Open`, and anything
//! that kills the socket moves every channel to `Closed`. Closed channels are
//! never rejoined here: the registry sweep reaps them and the next subscribe
//! opens a fresh one on the reconnected socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::phoenix::{self, Frame, Inbound};
use super::{FeedClient, FeedConnection, Listener, ListenerId, ListenerSet};
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, Result};
use crate::models::{ChannelState, EventFilter};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct Shared {
    config: RealtimeConfig,
    access_token: Option<String>,
    outbound: mpsc::UnboundedSender<Frame>,
    channels: DashMap<String, Arc<SocketChannel>>,
    next_ref: AtomicU64,
    connected: AtomicBool,
}

impl Shared {
    fn make_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn send(&self, frame: Frame) {
        if self.outbound.send(frame).is_err() {
            debug!("Realtime socket task gone, dropping outbound frame");
        }
    }

    /// Joins are only worth sending while their channel still waits for one.
    fn should_send(&self, frame: &Frame) -> bool {
        if frame.event != phoenix::EVENT_JOIN {
            return true;
        }
        match self.channels.get(&frame.topic) {
            Some(channel) => {
                channel.state() == ChannelState::Connecting
                    && *channel.join_ref.lock() == frame.join_ref
            }
            None => false,
        }
    }

    /// Drop a frame queued while no socket is up. A join that can no longer
    /// be delivered fails its channel.
    fn discard_offline(&self, frame: Frame) {
        if frame.event != phoenix::EVENT_JOIN || !self.should_send(&frame) {
            return;
        }
        if let Some(channel) = self.channels.get(&frame.topic).map(|c| Arc::clone(c.value())) {
            if channel.mark_closed() {
                warn!(channel = %channel.name, "Realtime channel join dropped, socket offline");
            }
        }
    }

    fn close_all(&self, reason: &str) {
        let mut closed = 0usize;
        for entry in self.channels.iter() {
            if entry.value().mark_closed() {
                closed += 1;
            }
        }
        if closed > 0 {
            warn!(channels = closed, reason, "Realtime channels closed by socket loss");
        }
    }

    fn handle_text(&self, text: &str, pending_heartbeat: &mut Option<String>) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring undecodable realtime frame: {}", e);
                return;
            }
        };

        match frame.classify() {
            Inbound::Reply {
                topic,
                msg_ref,
                ok,
                response,
            } => {
                if topic == phoenix::HEARTBEAT_TOPIC {
                    if msg_ref.is_some() && *pending_heartbeat == msg_ref {
                        *pending_heartbeat = None;
                    }
                    return;
                }

                let Some(channel) = self.channels.get(&topic).map(|c| Arc::clone(c.value()))
                else {
                    return;
                };
                if *channel.join_ref.lock() != msg_ref {
                    return;
                }
                if ok {
                    if channel.mark_open() {
                        info!(channel = %channel.name, "Realtime channel joined");
                    }
                } else if channel.mark_closed() {
                    warn!(channel = %channel.name, response = %response, "Realtime channel join rejected");
                }
            }
            Inbound::Closed { topic, reason } => {
                if let Some(channel) = self.channels.get(&topic).map(|c| Arc::clone(c.value())) {
                    if channel.mark_closed() {
                        warn!(channel = %channel.name, reason, "Realtime channel closed by server");
                    }
                }
            }
            Inbound::Change { topic, event } => {
                let Some(channel) = self.channels.get(&topic).map(|c| Arc::clone(c.value()))
                else {
                    return;
                };
                if channel.state().is_closed() {
                    return;
                }
                let delivered = channel.listeners.dispatch(&event);
                debug!(
                    channel = %channel.name,
                    kind = event.kind.as_str(),
                    listeners = delivered,
                    "Change event dispatched"
                );
            }
            Inbound::Ignored => {}
        }
    }
}

/// [`FeedClient`] over the hosted backend's realtime websocket
#[derive(Clone)]
pub struct SocketFeed {
    shared: Arc<Shared>,
}

impl SocketFeed {
    /// Start the socket task. The returned handle finishes after `shutdown`
    /// flips to `true`.
    pub fn spawn(
        config: RealtimeConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let url = config.websocket_url().ok_or_else(|| {
            RealtimeError::InvalidConfig("REALTIME_URL is required for the socket feed".into())
        })?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let access_token = (!config.api_key.is_empty()).then(|| config.api_key.clone());
        let shared = Arc::new(Shared {
            config,
            access_token,
            outbound,
            channels: DashMap::new(),
            next_ref: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        });

        let task = tokio::spawn(run_socket(Arc::clone(&shared), url, outbound_rx, shutdown));

        Ok((Self { shared }, task))
    }

    /// Number of topics currently tracked on the socket
    pub fn channel_count(&self) -> usize {
        self.shared.channels.len()
    }

    /// Whether a socket session is currently up
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl FeedClient for SocketFeed {
    fn open_channel(&self, name: &str) -> Arc<dyn FeedConnection> {
        let topic = phoenix::topic_for(name);
        let channel = Arc::new(SocketChannel {
            name: name.to_string(),
            topic: topic.clone(),
            state: Mutex::new(ChannelState::Connecting),
            join_ref: Mutex::new(None),
            listeners: ListenerSet::default(),
            shared: Arc::downgrade(&self.shared),
        });

        if let Some(previous) = self.shared.channels.insert(topic, Arc::clone(&channel)) {
            // A stale topic under the same name is dead to its owner already.
            previous.mark_closed();
        }
        channel
    }
}

/// One Phoenix topic on the shared socket
pub struct SocketChannel {
    name: String,
    topic: String,
    state: Mutex<ChannelState>,
    join_ref: Mutex<Option<String>>,
    listeners: ListenerSet,
    shared: Weak<Shared>,
}

impl SocketChannel {
    fn mark_open(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ChannelState::Connecting {
            *state = ChannelState::Open;
            return true;
        }
        false
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ChannelState::Closed {
            *state = ChannelState::Closed;
            return true;
        }
        false
    }
}

impl FeedConnection for SocketChannel {
    fn on_event(&self, filter: EventFilter, listener: Listener) -> ListenerId {
        self.listeners.add(filter, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn activate(&self) {
        if self.state() != ChannelState::Connecting {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            self.mark_closed();
            return;
        };

        let mut join_ref = self.join_ref.lock();
        if join_ref.is_some() {
            return;
        }
        let msg_ref = shared.make_ref();
        *join_ref = Some(msg_ref.clone());
        drop(join_ref);

        debug!(channel = %self.name, msg_ref = %msg_ref, "Joining realtime channel");
        shared.send(Frame::join(
            &self.name,
            shared.config.table_for(&self.name),
            &shared.config.schema,
            shared.access_token.as_deref(),
            &msg_ref,
        ));
    }

    fn close(&self) {
        let was_live = self.mark_closed();
        self.listeners.clear();

        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared
            .channels
            .remove_if(&self.topic, |_, current| std::ptr::eq(Arc::as_ptr(current), self));

        let join_ref = self.join_ref.lock().clone();
        if was_live {
            if let Some(join_ref) = join_ref {
                shared.send(Frame::leave(&self.name, &shared.make_ref(), Some(&join_ref)));
            }
        }
        debug!(channel = %self.name, "Realtime channel closed");
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(RealtimeError),
}

async fn connect(url: &Url, limit: Duration) -> Result<Socket> {
    let (socket, _response) = timeout(limit, connect_async(url.as_str()))
        .await
        .map_err(|_| RealtimeError::Timeout)??;
    Ok(socket)
}

#[instrument(skip_all, fields(host = url.host_str().unwrap_or_default()))]
async fn run_socket(
    shared: Arc<Shared>,
    url: Url,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting realtime socket");
    let config = shared.config.clone();
    let mut backoff = INITIAL_BACKOFF;

    'reconnect: loop {
        if *shutdown.borrow() {
            break;
        }

        let attempt = tokio::select! {
            attempt = connect(&url, config.connect_timeout()) => attempt,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match attempt {
            Ok(socket) => {
                info!("Realtime socket connected");
                backoff = INITIAL_BACKOFF;
                shared.connected.store(true, Ordering::SeqCst);

                let end = session(&shared, socket, &config, &mut outbound_rx, &mut shutdown).await;
                shared.connected.store(false, Ordering::SeqCst);
                match end {
                    SessionEnd::Shutdown => {
                        shared.close_all("shutdown");
                        break;
                    }
                    SessionEnd::Dropped(e) => {
                        warn!(error = %e, "Realtime socket dropped");
                        shared.close_all(&e.to_string());
                    }
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    timeout_secs = config.connect_timeout_secs,
                    "Realtime socket connect failed"
                );
                shared.close_all("connect failed");
            }
        }

        let delay = backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=250));
        backoff = (backoff * 2).min(MAX_BACKOFF);
        debug!("Reconnecting realtime socket in {:?}", delay);

        let wait = sleep(delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => shared.discard_offline(frame),
                    None => break 'reconnect,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break 'reconnect;
                    }
                }
            }
        }
    }

    info!("Realtime socket stopped");
}

async fn session(
    shared: &Shared,
    socket: Socket,
    config: &RealtimeConfig,
    outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = interval(config.heartbeat_interval());
    heartbeat.tick().await; // Skip immediate tick
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Shutdown;
                };
                if !shared.should_send(&frame) {
                    continue;
                }
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode realtime frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    return SessionEnd::Dropped(e.into());
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text, &mut pending_heartbeat),
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Dropped(RealtimeError::ConnectionFailed(
                            "closed by server".to_string(),
                        ));
                    }
                    Some(Err(e)) => return SessionEnd::Dropped(e.into()),
                    // Pings are answered by tungstenite on the next write
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if pending_heartbeat.is_some() {
                    return SessionEnd::Dropped(RealtimeError::ConnectionFailed(
                        "heartbeat not acknowledged".to_string(),
                    ));
                }
                let msg_ref = shared.make_ref();
                let text = match Frame::heartbeat(&msg_ref).encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode heartbeat: {}", e);
                        continue;
                    }
                };
                pending_heartbeat = Some(msg_ref);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    return SessionEnd::Dropped(e.into());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
