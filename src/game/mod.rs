//! Game Logic Module
//!
//! Rules of the arena, run by every client over its own copy of the room.
//!
//! ## Module Structure
//!
//! - `grid`: Tile model and arena generation
//! - `state`: Room, player, bomb and explosion records
//! - `input`: Held-key state and direction resolution
//! - `collision`: Hit box against the tile grid
//! - `movement`: Local player movement and position throttling
//! - `bomb`: Placement, idempotent resolution, chain scheduling
//! - `sudden_death`: Shrinking danger ring
//! - `session`: Lobby, round start and round end
//! - `interpolation`: Render smoothing for remote players
//! - `update`: Mergeable partial writes
//! - `tick`: One iteration of the local loop
//! - `events`: Events for the presentation layer

pub mod bomb;
pub mod collision;
pub mod events;
pub mod grid;
pub mod input;
pub mod interpolation;
pub mod movement;
pub mod session;
pub mod state;
pub mod sudden_death;
pub mod tick;
pub mod update;

// Re-export key types
pub use bomb::{DetonationScheduler, ExplosionOutcome};
pub use events::{GameEvent, GameEventData};
pub use grid::{Grid, TileType};
pub use input::{Direction, InputFrame};
pub use interpolation::RemoteInterpolator;
pub use movement::SimContext;
pub use session::JoinRejection;
pub use state::{Bomb, BombId, Explosion, Player, PlayerId, Room, RoomId, RoomStatus};
pub use sudden_death::SuddenDeathState;
pub use tick::{LocalSimulation, TickResult};
pub use update::{MergeReport, RoomUpdate};
