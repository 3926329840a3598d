//! WebSocket State Channel
//!
//! [`StateChannel`] backed by a connection to a [`RelayServer`]. Requests
//! are correlated by id; changes pushed for subscribed rooms are fanned out
//! to local broadcast receivers.
//!
//! [`RelayServer`]: crate::network::relay::RelayServer

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::core::clock::{Clock, Millis, SystemClock};
use crate::game::state::{Room, RoomId};
use crate::game::update::RoomUpdate;
use crate::network::channel::{ChannelError, StateChannel, ROOM_BROADCAST_CAPACITY};
use crate::network::protocol::{
    ErrorCode, RelayErrorBody, RelayRequest, RelayRequestFrame, RelayResponse, RelayResponseFrame,
    RequestId, RoomSummary,
};

/// Default time to wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type Pending = Mutex<BTreeMap<RequestId, oneshot::Sender<RelayResponse>>>;
type RoomFeeds = Mutex<BTreeMap<RoomId, broadcast::Sender<Room>>>;

struct Shared {
    outgoing: mpsc::Sender<Message>,
    pending: Pending,
    feeds: RoomFeeds,
    next_id: AtomicU64,
    request_timeout: Duration,
}

/// Client side of the relay protocol.
#[derive(Clone)]
pub struct WsChannel {
    shared: Arc<Shared>,
}

impl WsChannel {
    /// Connect to a relay, e.g. `ws://127.0.0.1:8080`.
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        Self::connect_with_timeout(url, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect with a custom request timeout.
    pub async fn connect_with_timeout(url: &str, request_timeout: Duration) -> Result<Self, ChannelError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        info!(url, "Connected to relay");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Message>(128);

        let shared = Arc::new(Shared {
            outgoing,
            pending: Mutex::new(BTreeMap::new()),
            feeds: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            request_timeout,
        });

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => RelayResponseFrame::from_json(&text).map_err(|e| e.to_string()),
                    Ok(Message::Binary(data)) => RelayResponseFrame::from_bytes(&data).map_err(|e| e.to_string()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Relay connection error: {}", e);
                        break;
                    }
                };
                match frame {
                    Ok(frame) => {
                        if !Self::dispatch(&reader_shared, frame).await {
                            break;
                        }
                    }
                    Err(e) => debug!("Undecodable relay frame: {}", e),
                }
            }

            // Fail every waiter and end every subscription
            reader_shared.pending.lock().await.clear();
            reader_shared.feeds.lock().await.clear();
            info!("Relay connection closed");
        });

        Ok(Self { shared })
    }

    /// Route one frame. Returns false when the relay is going away.
    async fn dispatch(shared: &Shared, frame: RelayResponseFrame) -> bool {
        match (frame.request_id, frame.body) {
            (Some(id), body) => {
                if let Some(waiter) = shared.pending.lock().await.remove(&id) {
                    let _ = waiter.send(body);
                }
                true
            }
            (None, RelayResponse::Changed { room }) => {
                if let Some(feed) = shared.feeds.lock().await.get(&room.id) {
                    let _ = feed.send(room);
                }
                true
            }
            (None, RelayResponse::Shutdown { reason }) => {
                warn!(%reason, "Relay shutting down");
                false
            }
            (None, RelayResponse::Error(body)) => {
                debug!(code = ?body.code, "Relay rejected a frame: {}", body.message);
                true
            }
            (None, other) => {
                debug!("Unexpected push: {:?}", other);
                true
            }
        }
    }

    /// Send a request and wait for its reply.
    async fn request(&self, body: RelayRequest) -> Result<RelayResponse, ChannelError> {
        let request_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id, tx);

        let text = RelayRequestFrame { request_id, body }.to_json()?;
        if self.shared.outgoing.send(Message::Text(text)).await.is_err() {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(ChannelError::Closed);
        }

        match tokio::time::timeout(self.shared.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                Err(ChannelError::Timeout)
            }
        }
    }

    /// Expect a bare acknowledgement.
    async fn request_ack(&self, body: RelayRequest, room_id: RoomId) -> Result<(), ChannelError> {
        match self.request(body).await? {
            RelayResponse::Ack => Ok(()),
            RelayResponse::Error(e) => Err(remote_error(e, room_id)),
            other => Err(unexpected(other)),
        }
    }

    /// Round trip time to the relay.
    pub async fn ping(&self) -> Result<Millis, ChannelError> {
        let sent = SystemClock.now_ms();
        match self.request(RelayRequest::Ping { timestamp: sent }).await? {
            RelayResponse::Pong { timestamp, .. } => Ok(SystemClock.now_ms().saturating_sub(timestamp)),
            other => Err(unexpected(other)),
        }
    }

    /// Stop receiving changes for a room.
    pub async fn unsubscribe(&self, room_id: RoomId) -> Result<(), ChannelError> {
        self.shared.feeds.lock().await.remove(&room_id);
        self.request_ack(RelayRequest::Unsubscribe { room_id }, room_id).await
    }
}

fn remote_error(body: RelayErrorBody, room_id: RoomId) -> ChannelError {
    match body.code {
        ErrorCode::RoomNotFound => ChannelError::RoomNotFound(room_id),
        ErrorCode::RoomExists => ChannelError::RoomExists(room_id),
        ErrorCode::RelayFull => ChannelError::Full,
        ErrorCode::InvalidMessage | ErrorCode::InternalError => ChannelError::Remote(body.message),
    }
}

fn unexpected(reply: RelayResponse) -> ChannelError {
    ChannelError::Remote(format!("unexpected reply {:?}", reply))
}

impl StateChannel for WsChannel {
    async fn fetch_snapshot(&self, room_id: RoomId) -> Result<Option<Room>, ChannelError> {
        match self.request(RelayRequest::Fetch { room_id }).await? {
            RelayResponse::Snapshot { room } => Ok(room),
            RelayResponse::Error(e) => Err(remote_error(e, room_id)),
            other => Err(unexpected(other)),
        }
    }

    async fn publish(&self, room_id: RoomId, update: RoomUpdate) -> Result<(), ChannelError> {
        self.request_ack(RelayRequest::Publish { room_id, update }, room_id).await
    }

    async fn subscribe(&self, room_id: RoomId) -> Result<broadcast::Receiver<Room>, ChannelError> {
        let receiver = {
            let mut feeds = self.shared.feeds.lock().await;
            if let Some(feed) = feeds.get(&room_id) {
                return Ok(feed.subscribe());
            }
            let (feed, receiver) = broadcast::channel(ROOM_BROADCAST_CAPACITY);
            feeds.insert(room_id, feed);
            receiver
        };
        if let Err(e) = self.request_ack(RelayRequest::Subscribe { room_id }, room_id).await {
            self.shared.feeds.lock().await.remove(&room_id);
            return Err(e);
        }
        Ok(receiver)
    }

    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ChannelError> {
        match self.request(RelayRequest::ListRooms).await? {
            RelayResponse::Rooms { rooms } => Ok(rooms),
            RelayResponse::Error(e) => Err(ChannelError::Remote(e.message)),
            other => Err(unexpected(other)),
        }
    }

    async fn create_room(&self, room: Room) -> Result<(), ChannelError> {
        let room_id = room.id;
        self.request_ack(RelayRequest::CreateRoom { room }, room_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::state::{Player, PlayerId};
    use crate::network::relay::{RelayConfig, RelayServer};
    use tokio::net::TcpListener;

    async fn start_relay() -> (Arc<RelayServer>, String) {
        let relay = Arc::new(RelayServer::new(RelayConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let serving = relay.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (relay, url)
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let (relay, url) = start_relay().await;
        let channel = WsChannel::connect(&url).await.unwrap();
        let room_id = RoomId::new([6; 16]);

        channel.create_room(Room::new(room_id, 0)).await.unwrap();
        assert_eq!(channel.list_rooms().await.unwrap().len(), 1);

        let mut changes = channel.subscribe(room_id).await.unwrap();
        let id = PlayerId::new([1; 16]);
        channel
            .publish(room_id, RoomUpdate::join(Player::new(id, "ann", 0, (1, 1))))
            .await
            .unwrap();
        channel
            .publish(room_id, RoomUpdate::position(id, Vec2::new(1.5, 2.0)))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.players.contains_key(&id));

        let snapshot = channel.fetch_snapshot(room_id).await.unwrap().unwrap();
        assert_eq!(snapshot.players[&id].position, Vec2::new(1.5, 2.0));
        assert!(channel.ping().await.is_ok());

        relay.shutdown();
    }

    #[tokio::test]
    async fn test_remote_errors_mapped() {
        let (relay, url) = start_relay().await;
        let channel = WsChannel::connect(&url).await.unwrap();
        let room_id = RoomId::new([8; 16]);

        assert!(channel.fetch_snapshot(room_id).await.unwrap().is_none());
        let result = channel.publish(room_id, RoomUpdate::default()).await;
        assert!(matches!(result, Err(ChannelError::RoomNotFound(id)) if id == room_id));

        channel.create_room(Room::new(room_id, 0)).await.unwrap();
        let dup = channel.create_room(Room::new(room_id, 0)).await;
        assert!(matches!(dup, Err(ChannelError::RoomExists(_))));

        relay.shutdown();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);
        assert!(matches!(WsChannel::connect(&url).await, Err(ChannelError::Transport(_))));
    }
}
