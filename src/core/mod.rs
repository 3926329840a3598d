//! Core primitives.
//!
//! Time, randomness, continuous positions and state digests. Nothing in this
//! module knows about rooms or players.

pub mod clock;
pub mod hash;
pub mod rng;
pub mod vec2;

// Re-export core types
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use hash::{StateHash, StateHasher};
pub use rng::DeterministicRng;
pub use vec2::{TilePos, Vec2};
