//! Network Layer
//!
//! Moves room records between clients. Nothing here decides game outcomes:
//! all rules run through `game/`, and this layer only carries partial writes
//! out and full rooms back.
//!
//! - `channel`: the shared state channel seam and the in-process store
//! - `relay`: WebSocket service holding the canonical room records
//! - `ws_channel`: channel client for the relay
//! - `identity`: who the local player is (JWT or fixed)
//! - `session`: the join protocol
//! - `replica`: a client's room copy and its loop

pub mod channel;
pub mod identity;
pub mod protocol;
pub mod relay;
pub mod replica;
pub mod session;
pub mod ws_channel;

pub use channel::{ChannelError, InMemoryChannel, RoomStore, StateChannel};
pub use identity::{AuthConfig, Identity, IdentityError, IdentityProvider, StaticIdentityProvider, TokenIdentityProvider};
pub use protocol::{RelayRequest, RelayRequestFrame, RelayResponse, RelayResponseFrame, RoomSummary};
pub use relay::{RelayConfig, RelayError, RelayServer};
pub use replica::{merge_remote, ArenaClient};
pub use session::{join_or_create, JoinError, JoinOutcome, JoinTicket};
pub use ws_channel::WsChannel;
