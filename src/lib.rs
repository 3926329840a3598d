//! # Blast Arena
//!
//! Room sync engine and simulation for a four-player grid bomb game in which
//! every client simulates its own copy of the room and writes into a shared
//! record. There is no authoritative server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BLAST ARENA                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── clock.rs    - Wall-clock and manual time sources        │
//! │  ├── vec2.rs     - Continuous positions and tile coords      │
//! │  ├── rng.rs      - Seeded Xorshift128+ for power-up drops    │
//! │  └── hash.rs     - Room digests for divergence checks        │
//! │                                                              │
//! │  config.rs       - Timing and tuning constants               │
//! │                                                              │
//! │  game/           - Rules, run by every client                │
//! │  ├── grid.rs     - Tile grid and arena generation            │
//! │  ├── state.rs    - Room, player, bomb, explosion records     │
//! │  ├── movement.rs - Local movement, lane snap, collision      │
//! │  ├── bomb.rs     - Placement, idempotent resolution, chains  │
//! │  ├── sudden_death.rs - Shrinking danger ring                 │
//! │  ├── session.rs  - lobby -> playing -> ended                 │
//! │  ├── update.rs   - Mergeable partial writes                  │
//! │  └── tick.rs     - One iteration of the local loop           │
//! │                                                              │
//! │  network/        - Carrying records between clients          │
//! │  ├── channel.rs  - Shared state channel and room store       │
//! │  ├── relay.rs    - WebSocket relay                           │
//! │  ├── session.rs  - Join protocol                             │
//! │  └── replica.rs  - Client loop, publish and merge            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Convergence
//!
//! Any client may resolve an expired bomb. Replicas converge because:
//! - resolution leaves a tombstone and a second resolution is a no-op
//! - every merged field only moves one way (lives down, stats up, status
//!   forward, crates to floor), so merge order does not matter
//! - power-up drops are seeded from the room seed and the bomb id, so two
//!   clients resolving the same bomb roll the same drop
//! - maps are `BTreeMap`, so iteration order is identical everywhere

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::ArenaConfig;
pub use core::clock::{Clock, ManualClock, Millis, SystemClock};
pub use core::rng::DeterministicRng;
pub use core::vec2::{TilePos, Vec2};
pub use game::input::{Direction, InputFrame};
pub use game::state::{PlayerId, Room, RoomId, RoomStatus};
pub use game::update::RoomUpdate;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Arena width in tiles
pub const GRID_WIDTH: usize = game::grid::GRID_WIDTH;

/// Arena height in tiles
pub const GRID_HEIGHT: usize = game::grid::GRID_HEIGHT;

/// Most players a room seats
pub const MAX_PLAYERS: usize = game::state::MAX_PLAYERS;
