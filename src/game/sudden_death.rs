//! Sudden Death
//!
//! Once the round timer runs out, a danger ring grows inward from the border
//! one tile every shrink interval. The level is a pure function of the
//! activation time, so every replica computes the same ring without
//! coordinating.

use serde::{Serialize, Deserialize};

use crate::config::ArenaConfig;
use crate::core::clock::Millis;
use crate::core::vec2::TilePos;
use crate::game::events::GameEvent;
use crate::game::state::{HitSource, PlayerId, Room, RoomStatus};

/// Shrinking-zone state stored in the room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuddenDeathState {
    /// Has the round timer expired?
    pub active: bool,
    /// Moment the round timer hit zero
    pub activated_at: Option<Millis>,
    /// Ring thickness in tiles
    pub shrink_level: u8,
}

impl SuddenDeathState {
    /// Whether a tile lies inside the danger ring.
    pub fn covers(&self, width: usize, height: usize, tile: TilePos) -> bool {
        self.active && in_zone(self.shrink_level, width, height, tile)
    }
}

/// Highest shrink level for a board, leaving an open interior.
///
/// 5 for the 15x13 arena.
pub fn max_shrink_level(width: usize, height: usize) -> u8 {
    (width.min(height) / 2).saturating_sub(1) as u8
}

/// Whether `tile` is within `level` tiles of any border.
#[inline]
pub fn in_zone(level: u8, width: usize, height: usize, tile: TilePos) -> bool {
    let level = level as i32;
    let (x, y) = tile;
    x < level || y < level || x >= width as i32 - level || y >= height as i32 - level
}

/// Time left on the round clock, `None` before the round starts.
pub fn round_time_remaining(room: &Room, now: Millis, config: &ArenaConfig) -> Option<Millis> {
    let started = room.started_at?;
    let deadline = started.saturating_add(config.round_duration_ms);
    Some(deadline.saturating_sub(now))
}

/// Advance the state machine for `now`.
///
/// Activation is one-way. Returns the events for any transition.
pub fn update(room: &mut Room, now: Millis, config: &ArenaConfig) -> Vec<GameEvent> {
    let mut events = Vec::new();
    if room.status != RoomStatus::Playing {
        return events;
    }
    let Some(started) = room.started_at else {
        return events;
    };

    let deadline = started.saturating_add(config.round_duration_ms);
    if !room.sudden_death.active {
        if now < deadline {
            return events;
        }
        room.sudden_death.active = true;
        room.sudden_death.activated_at = Some(deadline);
        events.push(GameEvent::sudden_death_started(now));
    }

    let activated = room.sudden_death.activated_at.unwrap_or(deadline);
    let steps = now.saturating_sub(activated) / config.shrink_interval_ms.max(1);
    let max = max_shrink_level(room.grid.width(), room.grid.height());
    let level = steps.min(max as u64) as u8;

    // Merged snapshots may already be ahead of our clock
    if level > room.sudden_death.shrink_level {
        room.sudden_death.shrink_level = level;
        events.push(GameEvent::zone_shrunk(now, level));
    }

    events
}

/// Per-player debounce for zone hits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZoneDebounce {
    last_hit: Option<Millis>,
}

impl ZoneDebounce {
    /// Whether a hit at `now` is allowed.
    pub fn ready(&self, now: Millis, cooldown: Millis) -> bool {
        match self.last_hit {
            Some(last) => now.saturating_sub(last) >= cooldown,
            None => true,
        }
    }

    /// Record a hit.
    pub fn record(&mut self, now: Millis) {
        self.last_hit = Some(now);
    }

    /// Time of the last recorded hit.
    pub fn last_hit(&self) -> Option<Millis> {
        self.last_hit
    }
}

/// Apply zone damage to one player if they stand in the ring and the
/// debounce window has passed.
pub fn try_zone_damage(
    room: &mut Room,
    player_id: &PlayerId,
    now: Millis,
    debounce: &mut ZoneDebounce,
    config: &ArenaConfig,
) -> Option<GameEvent> {
    let (width, height) = (room.grid.width(), room.grid.height());
    let zone = room.sudden_death;
    let player = room.players.get_mut(player_id)?;
    if !player.is_alive || !zone.covers(width, height, player.tile()) {
        return None;
    }
    if !debounce.ready(now, config.zone_damage_cooldown_ms) {
        return None;
    }

    debounce.record(now);
    let eliminated = player.lose_life(HitSource::Zone(now));
    Some(GameEvent::zone_damage(now, *player_id, player.lives, eliminated))
}
