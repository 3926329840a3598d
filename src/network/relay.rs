//! Room Relay
//!
//! WebSocket service holding the shared room records. It never simulates:
//! it merges the partial writes clients publish and pushes the merged room
//! to every subscriber. Text frames are JSON, binary frames are bincode, and
//! replies use the encoding of the request.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::{Clock, Millis, SystemClock};
use crate::game::state::{Room, RoomId, RoomStatus};
use crate::network::channel::{ChannelError, RoomStore};
use crate::network::protocol::{
    ErrorCode, RelayErrorBody, RelayRequest, RelayRequestFrame, RelayResponse, RelayResponseFrame,
};

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER: usize = 128;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum rooms held at once.
    pub max_rooms: usize,
    /// How long ended or abandoned rooms are kept.
    pub room_retention: Duration,
    /// Period of the room cleanup sweep.
    pub cleanup_interval: Duration,
    /// Relay version string.
    pub version: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            max_rooms: 1024,
            room_retention: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RelayConfig {
    /// Read overrides from `RELAY_BIND_ADDR`, `RELAY_MAX_CONNECTIONS`,
    /// `RELAY_MAX_ROOMS` and `RELAY_ROOM_RETENTION_SECS`.
    pub fn from_env() -> Result<Self, RelayError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("RELAY_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| RelayError::Config(format!("RELAY_BIND_ADDR {addr}")))?;
        }
        if let Some(n) = env_number("RELAY_MAX_CONNECTIONS")? {
            config.max_connections = n as usize;
        }
        if let Some(n) = env_number("RELAY_MAX_ROOMS")? {
            config.max_rooms = n as usize;
        }
        if let Some(secs) = env_number("RELAY_ROOM_RETENTION_SECS")? {
            config.room_retention = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn env_number(key: &str) -> Result<Option<u64>, RelayError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| RelayError::Config(format!("{key} {raw}"))),
        Err(_) => Ok(None),
    }
}

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Encoding of a connection's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    Binary,
}

struct Outbound {
    frame: RelayResponseFrame,
    format: WireFormat,
}

impl Outbound {
    fn new(frame: RelayResponseFrame, format: WireFormat) -> Self {
        Self { frame, format }
    }

    fn encode(&self) -> Result<Message, String> {
        match self.format {
            WireFormat::Json => self.frame.to_json().map(Message::Text).map_err(|e| e.to_string()),
            WireFormat::Binary => self.frame.to_bytes().map(Message::Binary).map_err(|e| e.to_string()),
        }
    }
}

/// Connected client state.
struct ConnectedClient {
    connected_at: Instant,
}

/// Live subscription forwarders of one connection.
type Subscriptions = BTreeMap<RoomId, JoinHandle<()>>;

/// The relay.
pub struct RelayServer {
    config: RelayConfig,
    store: Arc<RoomStore>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a relay with an empty store.
    pub fn new(config: RelayConfig) -> Self {
        let store = Arc::new(RoomStore::new(config.max_rooms));
        Self::with_store(config, store)
    }

    /// Create a relay over an existing store.
    pub fn with_store(config: RelayConfig, store: Arc<RoomStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        info!(
            addr = %listener.local_addr()?,
            version = %self.config.version,
            "Room relay listening"
        );

        let cleanup_store = self.store.clone();
        let retention = self.config.room_retention;
        let period = self.config.cleanup_interval;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_store, retention, period).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let store = self.store.clone();
        let clients = self.clients.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

            clients.write().await.insert(addr, ConnectedClient { connected_at: Instant::now() });

            let sender_task = tokio::spawn(async move {
                while let Some(out) = msg_rx.recv().await {
                    let message = match out.encode() {
                        Ok(m) => m,
                        Err(e) => {
                            error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(message).await.is_err() {
                        break;
                    }
                }
            });

            let mut subscriptions = Subscriptions::new();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let (decoded, format) = match msg {
                            Some(Ok(Message::Text(text))) => (
                                RelayRequestFrame::from_json(&text).map_err(|e| e.to_string()),
                                WireFormat::Json,
                            ),
                            Some(Ok(Message::Binary(data))) => (
                                RelayRequestFrame::from_bytes(&data).map_err(|e| e.to_string()),
                                WireFormat::Binary,
                            ),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Control frames are answered by tungstenite
                            Some(Ok(_)) => continue,
                        };

                        let frame = match decoded {
                            Ok(f) => f,
                            Err(e) => {
                                debug!("Invalid frame from {}: {}", addr, e);
                                let reply = RelayResponseFrame::error(None, ErrorCode::InvalidMessage, "invalid frame");
                                let _ = msg_tx.send(Outbound::new(reply, format)).await;
                                continue;
                            }
                        };

                        let body = Self::handle_request(frame.body, &store, &mut subscriptions, &msg_tx, format).await;
                        let reply = RelayResponseFrame::reply(frame.request_id, body);
                        if msg_tx.send(Outbound::new(reply, format)).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let notice = RelayResponseFrame::push(RelayResponse::Shutdown {
                            reason: "Relay shutting down".to_string(),
                        });
                        let _ = msg_tx.send(Outbound::new(notice, WireFormat::Json)).await;
                        break;
                    }
                }
            }

            for (_, forwarder) in std::mem::take(&mut subscriptions) {
                forwarder.abort();
            }
            drop(msg_tx);
            // Give the writer a moment to flush the last frames
            if tokio::time::timeout(Duration::from_millis(250), sender_task).await.is_err() {
                debug!("Writer for {} did not drain in time", addr);
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    "Client {} cleaned up after {}s",
                    addr,
                    client.connected_at.elapsed().as_secs()
                );
            }
        });
    }

    /// Serve one request.
    async fn handle_request(
        request: RelayRequest,
        store: &Arc<RoomStore>,
        subscriptions: &mut Subscriptions,
        msg_tx: &mpsc::Sender<Outbound>,
        format: WireFormat,
    ) -> RelayResponse {
        match request {
            RelayRequest::Fetch { room_id } => RelayResponse::Snapshot {
                room: store.get(&room_id).await,
            },

            RelayRequest::Publish { room_id, update } => match store.apply(&room_id, &update).await {
                Ok(_) => RelayResponse::Ack,
                Err(e) => error_response(e),
            },

            RelayRequest::Subscribe { room_id } => {
                if subscriptions.get(&room_id).is_some_and(|task| !task.is_finished()) {
                    return RelayResponse::Ack;
                }
                match store.subscribe(&room_id).await {
                    Ok(changes) => {
                        let forwarder = Self::spawn_forwarder(room_id, changes, msg_tx.clone(), format);
                        subscriptions.insert(room_id, forwarder);
                        RelayResponse::Ack
                    }
                    Err(e) => error_response(e),
                }
            }

            RelayRequest::Unsubscribe { room_id } => {
                if let Some(forwarder) = subscriptions.remove(&room_id) {
                    forwarder.abort();
                }
                RelayResponse::Ack
            }

            RelayRequest::ListRooms => RelayResponse::Rooms {
                rooms: store.summaries().await,
            },

            RelayRequest::CreateRoom { room } => match store.create(room).await {
                Ok(()) => RelayResponse::Ack,
                Err(e) => error_response(e),
            },

            RelayRequest::Ping { timestamp } => RelayResponse::Pong {
                timestamp,
                server_time: SystemClock.now_ms(),
            },
        }
    }

    /// Push every change of a room to one connection.
    fn spawn_forwarder(
        room_id: RoomId,
        mut changes: broadcast::Receiver<Room>,
        msg_tx: mpsc::Sender<Outbound>,
        format: WireFormat,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(room) => {
                        let push = RelayResponseFrame::push(RelayResponse::Changed { room });
                        if msg_tx.send(Outbound::new(push, format)).await.is_err() {
                            break;
                        }
                    }
                    // Every push is a full room, the next one catches up
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room = %room_id.short(), skipped, "Subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(store: Arc<RoomStore>, retention: Duration, period: Duration) {
        let mut interval = interval(period);

        loop {
            interval.tick().await;
            let now = SystemClock.now_ms();
            let removed = store
                .remove_where(|room| is_stale(room, now, retention.as_millis() as Millis))
                .await;
            if removed > 0 {
                info!(removed, "Removed stale rooms");
            }
        }
    }

    /// Shutdown the relay.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get held room count.
    pub async fn room_count(&self) -> usize {
        self.store.len().await
    }
}

/// Ended rooms and empty lobbies are dropped once older than the retention.
fn is_stale(room: &Room, now: Millis, retention_ms: Millis) -> bool {
    let old = now.saturating_sub(room.created_at) > retention_ms;
    let finished = room.status == RoomStatus::Ended;
    let abandoned = room.status == RoomStatus::Lobby && room.players.is_empty();
    old && (finished || abandoned)
}

fn error_response(e: ChannelError) -> RelayResponse {
    let code = match &e {
        ChannelError::RoomNotFound(_) => ErrorCode::RoomNotFound,
        ChannelError::RoomExists(_) => ErrorCode::RoomExists,
        ChannelError::Full => ErrorCode::RelayFull,
        _ => ErrorCode::InternalError,
    };
    RelayResponse::Error(RelayErrorBody {
        code,
        message: e.to_string(),
    })
}
