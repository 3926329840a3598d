//! Shared State Channel
//!
//! The one seam between a client and the shared room records: read a room,
//! merge a partial write into it, and subscribe to the full record after
//! every change. Subscribers get the whole room, never a diff.
//!
//! [`RoomStore`] is the record keeper used both by the in-process channel and
//! by the WebSocket relay.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::game::state::{Room, RoomId};
use crate::game::update::RoomUpdate;
use crate::network::protocol::RoomSummary;

/// Buffered changes per room subscription before a slow reader lags.
pub const ROOM_BROADCAST_CAPACITY: usize = 64;

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Room id unknown.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// Room id already taken.
    #[error("room {0} already exists")]
    RoomExists(RoomId),

    /// Store holds its maximum number of rooms.
    #[error("room limit reached")]
    Full,

    /// Connection to the relay is gone.
    #[error("channel closed")]
    Closed,

    /// No reply within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame encoding failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Relay answered with an error.
    #[error("relay error: {0}")]
    Remote(String),
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Encoding(e.to_string())
    }
}

impl From<bincode::Error> for ChannelError {
    fn from(e: bincode::Error) -> Self {
        ChannelError::Encoding(e.to_string())
    }
}

/// Read, write and watch shared room records.
pub trait StateChannel: Send + Sync + 'static {
    /// Current record, `None` for an unknown room.
    fn fetch_snapshot(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Option<Room>, ChannelError>> + Send;

    /// Merge a partial write.
    fn publish(
        &self,
        room_id: RoomId,
        update: RoomUpdate,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the full record after every change.
    fn subscribe(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<broadcast::Receiver<Room>, ChannelError>> + Send;

    /// Every room the channel knows.
    fn list_rooms(&self) -> impl Future<Output = Result<Vec<RoomSummary>, ChannelError>> + Send;

    /// Store a new room. Fails if the id is taken.
    fn create_room(&self, room: Room) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

// =============================================================================
// ROOM STORE
// =============================================================================

struct RoomEntry {
    room: Room,
    changes: broadcast::Sender<Room>,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        let (changes, _) = broadcast::channel(ROOM_BROADCAST_CAPACITY);
        Self { room, changes }
    }
}

/// Canonical copies of every room, with per-room change broadcast.
pub struct RoomStore {
    rooms: RwLock<BTreeMap<RoomId, RoomEntry>>,
    max_rooms: usize,
}

impl RoomStore {
    /// Create a store holding at most `max_rooms` rooms.
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            max_rooms,
        }
    }

    /// Copy of a room.
    pub async fn get(&self, room_id: &RoomId) -> Option<Room> {
        self.rooms.read().await.get(room_id).map(|e| e.room.clone())
    }

    /// Insert a new room.
    pub async fn create(&self, room: Room) -> Result<(), ChannelError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return Err(ChannelError::RoomExists(room.id));
        }
        if rooms.len() >= self.max_rooms {
            return Err(ChannelError::Full);
        }
        info!(room = %room.id.short(), players = room.players.len(), "Room created");
        rooms.insert(room.id, RoomEntry::new(room));
        Ok(())
    }

    /// Merge an update and broadcast the merged room.
    pub async fn apply(&self, room_id: &RoomId, update: &RoomUpdate) -> Result<Room, ChannelError> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(room_id)
            .ok_or(ChannelError::RoomNotFound(*room_id))?;

        let report = update.apply_to(&mut entry.room);
        if !report.players_rejected.is_empty() {
            debug!(
                room = %room_id.short(),
                rejected = report.players_rejected.len(),
                "Join lost the race for the last seat"
            );
        }

        let room = entry.room.clone();
        // No subscribers is fine
        let _ = entry.changes.send(room.clone());
        Ok(room)
    }

    /// Subscribe to a room's changes.
    pub async fn subscribe(&self, room_id: &RoomId) -> Result<broadcast::Receiver<Room>, ChannelError> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|e| e.changes.subscribe())
            .ok_or(ChannelError::RoomNotFound(*room_id))
    }

    /// Summaries of every room.
    pub async fn summaries(&self) -> Vec<RoomSummary> {
        self.rooms
            .read()
            .await
            .values()
            .map(|e| RoomSummary::of(&e.room))
            .collect()
    }

    /// Drop a room.
    pub async fn remove(&self, room_id: &RoomId) -> bool {
        self.rooms.write().await.remove(room_id).is_some()
    }

    /// Drop every room matching a predicate. Returns how many were removed.
    pub async fn remove_where(&self, mut predicate: impl FnMut(&Room) -> bool) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, e| !predicate(&e.room));
        before - rooms.len()
    }

    /// Number of rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

// =============================================================================
// IN-PROCESS CHANNEL
// =============================================================================

/// Channel over a store in the same process.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    store: Arc<RoomStore>,
}

impl InMemoryChannel {
    /// Channel over a fresh store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel over an existing store.
    pub fn with_store(store: Arc<RoomStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }
}

impl StateChannel for InMemoryChannel {
    async fn fetch_snapshot(&self, room_id: RoomId) -> Result<Option<Room>, ChannelError> {
        Ok(self.store.get(&room_id).await)
    }

    async fn publish(&self, room_id: RoomId, update: RoomUpdate) -> Result<(), ChannelError> {
        self.store.apply(&room_id, &update).await.map(|_| ())
    }

    async fn subscribe(&self, room_id: RoomId) -> Result<broadcast::Receiver<Room>, ChannelError> {
        self.store.subscribe(&room_id).await
    }

    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ChannelError> {
        Ok(self.store.summaries().await)
    }

    async fn create_room(&self, room: Room) -> Result<(), ChannelError> {
        self.store.create(room).await
    }
}
