//! Relay Protocol
//!
//! Wire format between clients and the room relay. Text frames carry JSON,
//! binary frames carry bincode. Enums are externally tagged so both
//! encodings accept the same types.

use serde::{Serialize, Deserialize};

use crate::core::clock::Millis;
use crate::game::state::{PlayerId, Room, RoomId, RoomStatus};
use crate::game::update::RoomUpdate;

/// Correlates a response with its request.
pub type RequestId = u64;

// =============================================================================
// CLIENT -> RELAY
// =============================================================================

/// Requests a client can make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayRequest {
    /// Read the current room record.
    Fetch { room_id: RoomId },

    /// Merge a partial write into a room.
    Publish { room_id: RoomId, update: RoomUpdate },

    /// Receive the full room after every change.
    Subscribe { room_id: RoomId },

    /// Stop receiving changes.
    Unsubscribe { room_id: RoomId },

    /// List every room the relay holds.
    ListRooms,

    /// Store a new room.
    CreateRoom { room: Room },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// A request with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequestFrame {
    pub request_id: RequestId,
    pub body: RelayRequest,
}

// =============================================================================
// RELAY -> CLIENT
// =============================================================================

/// Short description of a room for join decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub player_ids: Vec<PlayerId>,
    pub created_at: Millis,
}

impl RoomSummary {
    /// Summarize a room.
    pub fn of(room: &Room) -> Self {
        Self {
            room_id: room.id,
            status: room.status,
            player_ids: room.players.keys().copied().collect(),
            created_at: room.created_at,
        }
    }

    /// Number of seated players.
    pub fn player_count(&self) -> usize {
        self.player_ids.len()
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Room id unknown.
    RoomNotFound,
    /// Room id already taken.
    RoomExists,
    /// Relay holds its maximum number of rooms.
    RelayFull,
    /// Frame could not be decoded.
    InvalidMessage,
    /// Internal relay error.
    InternalError,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Responses and pushes from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayResponse {
    /// Result of a fetch. `None` for an unknown room.
    Snapshot { room: Option<Room> },

    /// Pushed to subscribers after every change.
    Changed { room: Room },

    /// Result of a room listing.
    Rooms { rooms: Vec<RoomSummary> },

    /// Request succeeded with no payload.
    Ack,

    /// Request failed.
    Error(RelayErrorBody),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Relay is shutting down.
    Shutdown { reason: String },
}

/// A response, correlated unless it is a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponseFrame {
    pub request_id: Option<RequestId>,
    pub body: RelayResponse,
}

impl RelayResponseFrame {
    /// Reply to a request.
    pub fn reply(request_id: RequestId, body: RelayResponse) -> Self {
        Self {
            request_id: Some(request_id),
            body,
        }
    }

    /// Uncorrelated push.
    pub fn push(body: RelayResponse) -> Self {
        Self {
            request_id: None,
            body,
        }
    }

    /// Error reply.
    pub fn error(request_id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            request_id,
            body: RelayResponse::Error(RelayErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

macro_rules! wire_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to JSON string.
            pub fn to_json(&self) -> Result<String, serde_json::Error> {
                serde_json::to_string(self)
            }

            /// Deserialize from JSON string.
            pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
                serde_json::from_str(s)
            }

            /// Serialize to binary (bincode).
            pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
                bincode::serialize(self)
            }

            /// Deserialize from binary.
            pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
                bincode::deserialize(data)
            }
        }
    };
}

wire_codec!(RelayRequestFrame);
wire_codec!(RelayResponseFrame);
