//! Bomb & Explosion Engine
//!
//! Placement, idempotent resolution, pickups and chain-reaction scheduling.
//!
//! Any replica may resolve an expired bomb. Resolution removes the bomb and
//! records a tombstone; a second call for the same id returns `None`. Drop
//! rolls are seeded from the room seed and the bomb id, so two replicas that
//! both resolve a bomb write the same pickups.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ArenaConfig;
use crate::core::clock::Millis;
use crate::core::rng::DeterministicRng;
use crate::core::vec2::TilePos;
use crate::game::collision::players_on_tiles;
use crate::game::events::GameEvent;
use crate::game::grid::TileType;
use crate::game::input::Direction;
use crate::game::state::{BlastSpans, Bomb, BombId, Explosion, HitSource, PlayerId, Room, RoomStatus};
use crate::game::update::{CellPatch, PlayerPatch, RoomUpdate};

/// Crate drop weights: extra bomb, extra radius, extra speed, nothing.
pub const DROP_TABLE: [(Option<TileType>, u32); 4] = [
    (Some(TileType::PowerupBomb), 20),
    (Some(TileType::PowerupRadius), 18),
    (Some(TileType::PowerupSpeed), 12),
    (None, 50),
];

/// Score credited to a bomb owner per other player eliminated.
pub const SCORE_PER_KILL: u32 = 1;

// =============================================================================
// PLACEMENT
// =============================================================================

/// Drop a bomb on the player's tile.
///
/// Returns `None` when the room is not playing, the player is missing or
/// dead, at capacity, standing on a wall or crate, or the tile already holds
/// a bomb.
pub fn place_bomb(
    room: &mut Room,
    player_id: &PlayerId,
    bomb_id: BombId,
    now: Millis,
    config: &ArenaConfig,
) -> Option<Bomb> {
    if room.status != RoomStatus::Playing {
        return None;
    }
    let player = room.get_player(player_id)?;
    if !player.is_alive {
        return None;
    }
    if room.live_bombs_of(player_id) >= player.bomb_count as usize {
        return None;
    }

    let tile = player.tile();
    let terrain = room.grid.get(tile.0, tile.1)?;
    if terrain.blocks_movement() || room.bomb_at(tile).is_some() || room.is_resolved(&bomb_id) {
        return None;
    }

    let bomb = Bomb {
        id: bomb_id,
        tile_x: tile.0,
        tile_y: tile.1,
        owner_id: *player_id,
        placed_at: now,
        expires_at: now.saturating_add(config.fuse_ms),
        radius: player.blast_radius,
    };
    room.bombs.insert(bomb.id, bomb.clone());
    Some(bomb)
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Everything one detonation changed.
#[derive(Clone, Debug)]
pub struct ExplosionOutcome {
    /// Explosion record added to the room
    pub explosion: Explosion,
    /// Origin plus every tile the blast reached
    pub affected: Vec<TilePos>,
    /// Live bombs caught in the blast
    pub chain: Vec<BombId>,
    /// Players who lost a life
    pub hit: Vec<PlayerId>,
    /// Write to publish
    pub update: RoomUpdate,
    /// Events for presentation
    pub events: Vec<GameEvent>,
}

/// Roll the contents of a destroyed crate.
pub fn roll_drop(rng: &mut DeterministicRng) -> Option<TileType> {
    rng.weighted(&DROP_TABLE).flatten()
}

/// Drop RNG for one bomb. Identical on every replica.
pub fn drop_rng(room: &Room, bomb_id: &BombId) -> DeterministicRng {
    DeterministicRng::for_event(room.rng_seed, bomb_id.as_bytes())
}

/// Detonate a bomb.
///
/// Idempotent: returns `None` if the bomb is not present.
pub fn resolve_explosion(room: &mut Room, bomb_id: &BombId, now: Millis) -> Option<ExplosionOutcome> {
    let bomb = room.bombs.remove(bomb_id)?;
    room.resolved_bombs.insert(bomb.id);

    let mut rng = drop_rng(room, &bomb.id);
    let mut update = RoomUpdate {
        bombs_removed: vec![bomb.id],
        resolved_bombs: vec![bomb.id],
        ..Default::default()
    };
    let mut events = Vec::new();

    let origin = bomb.tile();
    let mut affected = vec![origin];
    let mut spans = BlastSpans::default();

    for direction in Direction::ALL {
        let (dx, dy) = direction.delta();
        let mut reach = 0u8;
        for step in 1..=bomb.radius as i32 {
            let (x, y) = (origin.0 + dx * step, origin.1 + dy * step);
            let tile = match room.grid.get(x, y) {
                None | Some(TileType::Wall) => break,
                Some(tile) => tile,
            };
            reach += 1;
            affected.push((x, y));
            if tile == TileType::Crate {
                let drop = roll_drop(&mut rng);
                let next = drop.unwrap_or(TileType::Empty);
                room.grid.set(x, y, next);
                update.grid_cells.push(CellPatch { x, y, tile: next });
                events.push(GameEvent::crate_destroyed(now, (x, y), drop));
                break;
            }
        }
        match direction {
            Direction::Up => spans.up = reach,
            Direction::Down => spans.down = reach,
            Direction::Left => spans.left = reach,
            Direction::Right => spans.right = reach,
        }
    }

    // Hit detection happens once, at detonation
    let hit = players_on_tiles(room, &affected);
    let mut kills = 0u32;
    for id in &hit {
        if let Some(player) = room.players.get_mut(id) {
            let eliminated = player.lose_life(HitSource::Blast(bomb.id));
            if eliminated && *id != bomb.owner_id {
                kills += 1;
            }
            update.patch_player(*id, PlayerPatch::vitals(player));
            events.push(GameEvent::blast_hit(now, *id, bomb.owner_id, player.lives, eliminated));
        }
    }
    if kills > 0 {
        if let Some(owner) = room.players.get_mut(&bomb.owner_id) {
            owner.score = owner.score.saturating_add(kills * SCORE_PER_KILL);
            update.patch_player(owner.id, PlayerPatch::vitals(owner));
        }
    }

    let chain: Vec<BombId> = room
        .bombs
        .values()
        .filter(|b| affected.contains(&b.tile()))
        .map(|b| b.id)
        .collect();

    let explosion = Explosion {
        id: bomb.id,
        origin_x: origin.0,
        origin_y: origin.1,
        radius: bomb.radius,
        created_at: now,
        spans,
    };
    room.explosions.insert(explosion.id, explosion.clone());
    update.explosions_added.push(explosion.clone());

    events.push(GameEvent::bomb_exploded(
        now,
        bomb.id,
        bomb.owner_id,
        origin,
        affected.len(),
        chain.len(),
    ));
    debug!(
        bomb = %bomb.id.short(),
        tiles = affected.len(),
        hit = hit.len(),
        chain = chain.len(),
        "Bomb resolved"
    );

    Some(ExplosionOutcome {
        explosion,
        affected,
        chain,
        hit,
        update,
        events,
    })
}

// =============================================================================
// PICKUPS & MAINTENANCE
// =============================================================================

/// Collect a pickup at `(x, y)` for a player.
///
/// Applies the boost and clears the tile. `None` if the tile is not a pickup.
pub fn apply_pickup(room: &mut Room, player_id: &PlayerId, x: i32, y: i32) -> Option<TileType> {
    let tile = room.grid.get(x, y)?;
    if !tile.is_powerup() {
        return None;
    }
    let player = room.players.get_mut(player_id)?;
    if !player.is_alive {
        return None;
    }
    player.apply_powerup(tile);
    room.grid.set(x, y, TileType::Empty);
    Some(tile)
}

/// Bombs whose fuse has run out, in id order.
pub fn expired_bombs(room: &Room, now: Millis) -> Vec<BombId> {
    room.bombs
        .values()
        .filter(|b| b.is_expired(now))
        .map(|b| b.id)
        .collect()
}

/// Drop explosions past their display window. Returns how many were removed.
pub fn prune_explosions(room: &mut Room, now: Millis, display_ms: Millis) -> usize {
    let before = room.explosions.len();
    room.explosions.retain(|_, e| !e.is_expired(now, display_ms));
    before - room.explosions.len()
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Local detonation deadlines.
///
/// Each bomb id is chain-scheduled at most once; a natural fuse deadline can
/// only be moved earlier.
#[derive(Clone, Debug, Default)]
pub struct DetonationScheduler {
    deadlines: BTreeMap<BombId, Millis>,
    chained: BTreeSet<BombId>,
}

impl DetonationScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a detonation. Keeps the earlier deadline if one exists.
    pub fn schedule(&mut self, bomb_id: BombId, at: Millis) {
        self.deadlines
            .entry(bomb_id)
            .and_modify(|d| *d = (*d).min(at))
            .or_insert(at);
    }

    /// Schedule a chain detonation. Returns false if this bomb was already
    /// chained.
    pub fn schedule_chain(&mut self, bomb_id: BombId, at: Millis) -> bool {
        if !self.chained.insert(bomb_id) {
            return false;
        }
        self.schedule(bomb_id, at);
        true
    }

    /// Cancel a pending detonation.
    pub fn cancel(&mut self, bomb_id: &BombId) -> bool {
        self.deadlines.remove(bomb_id).is_some()
    }

    /// Remove and return every bomb due at `now`, earliest first.
    pub fn due(&mut self, now: Millis) -> Vec<BombId> {
        let mut due: Vec<(Millis, BombId)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, at)| (*at, *id))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Whether a deadline is pending.
    pub fn is_scheduled(&self, bomb_id: &BombId) -> bool {
        self.deadlines.contains_key(bomb_id)
    }

    /// Pending deadlines.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Drop deadlines for bombs no longer in the room.
    pub fn retain_live(&mut self, room: &Room) {
        self.deadlines.retain(|id, _| room.bombs.contains_key(id));
    }
}
