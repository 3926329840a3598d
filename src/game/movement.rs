//! Local Movement Simulation
//!
//! Moves the local player one tick: single-axis input, lane snapping,
//! per-axis collision, pickups, zone damage and a throttled position publish.
//! Remote players are never stepped here.

use crate::config::ArenaConfig;
use crate::core::clock::Millis;
use crate::core::vec2::Vec2;
use crate::game::bomb::apply_pickup;
use crate::game::collision::can_occupy;
use crate::game::events::GameEvent;
use crate::game::grid::TileType;
use crate::game::input::{Direction, InputFrame};
use crate::game::state::{PlayerId, Room, RoomStatus};
use crate::game::sudden_death::{try_zone_damage, ZoneDebounce};
use crate::game::update::{CellPatch, PlayerPatch, RoomUpdate};

/// Longest move checked against the grid at once. Under one tile, so a wall
/// can never be stepped over.
pub const MAX_SUBSTEP_TILES: f32 = 0.5;

const MAX_SUBSTEPS: f32 = 256.0;

/// Mutable per-entity loop state, owned by the simulation and passed in each
/// tick.
#[derive(Clone, Debug, Default)]
pub struct SimContext {
    /// Simulated time accumulated from tick deltas
    pub sim_time_ms: Millis,
    /// Simulated time of the last position publish
    pub last_publish_sim_ms: Option<Millis>,
    /// Position carried by the last publish
    pub last_published_pos: Option<Vec2>,
    /// Zone damage debounce
    pub zone: ZoneDebounce,
    /// Last direction moved
    pub facing: Option<Direction>,
}

impl SimContext {
    /// Fresh context.
    pub fn new() -> Self {
        Self::default()
    }

    fn publish_due(&self, interval: Millis) -> bool {
        match self.last_publish_sim_ms {
            Some(last) => self.sim_time_ms.saturating_sub(last) >= interval,
            None => true,
        }
    }
}

/// Result of one movement step.
#[derive(Clone, Debug, Default)]
pub struct MovementOutcome {
    /// Applied displacement
    pub delta: Vec2,
    /// Whether the input axis was blocked
    pub blocked: bool,
    /// Write to publish, empty when nothing is due
    pub update: RoomUpdate,
    /// Events raised
    pub events: Vec<GameEvent>,
}

/// Move `value` toward `target` by at most `max_step`.
#[inline]
fn approach(value: f32, target: f32, max_step: f32) -> f32 {
    let diff = target - value;
    if diff.abs() <= max_step {
        diff
    } else {
        max_step.copysign(diff)
    }
}

/// One collision-checked move. Returns the new position and whether the
/// input axis was blocked.
fn substep(
    room: &Room,
    player_id: &PlayerId,
    position: Vec2,
    direction: Direction,
    distance: f32,
    snap: f32,
    half: f32,
) -> (Vec2, bool) {
    let unit = direction.unit().scale(distance);
    let (mut dx, mut dy) = if direction.is_horizontal() {
        (unit.x, approach(position.y, position.y.floor() + 0.5, snap))
    } else {
        (approach(position.x, position.x.floor() + 0.5, snap), unit.y)
    };

    let mut blocked = false;
    if dx != 0.0 && !can_occupy(room, Vec2::new(position.x + dx, position.y), half, player_id) {
        blocked |= direction.is_horizontal();
        dx = 0.0;
    }
    if dy != 0.0 && !can_occupy(room, Vec2::new(position.x + dx, position.y + dy), half, player_id) {
        blocked |= !direction.is_horizontal();
        dy = 0.0;
    }
    (position + Vec2::new(dx, dy), blocked)
}

/// Advance the local player by `dt_ms`.
///
/// Long frames are split so no single collision test moves the hit box more
/// than [`MAX_SUBSTEP_TILES`].
pub fn step_local_player(
    room: &mut Room,
    player_id: &PlayerId,
    input: &InputFrame,
    dt_ms: Millis,
    now: Millis,
    ctx: &mut SimContext,
    config: &ArenaConfig,
) -> MovementOutcome {
    let mut outcome = MovementOutcome::default();
    ctx.sim_time_ms = ctx.sim_time_ms.saturating_add(dt_ms);

    if room.status != RoomStatus::Playing {
        return outcome;
    }
    let Some(player) = room.get_player(player_id) else {
        return outcome;
    };
    if !player.is_alive {
        return outcome;
    }

    let start = player.position;
    let speed = player.speed;
    let dt = dt_ms as f32 / 1_000.0;

    // Displacement along the held axis, lane snap on the other
    let mut position = start;
    if let Some(direction) = input.direction() {
        ctx.facing = Some(direction);
        let distance = config.base_speed * speed * dt;
        let snap = config.lane_snap_rate * dt;
        let substeps = (distance.max(snap) / MAX_SUBSTEP_TILES).ceil().clamp(1.0, MAX_SUBSTEPS);
        for _ in 0..substeps as u32 {
            let (next, blocked) = substep(
                room,
                player_id,
                position,
                direction,
                distance / substeps,
                snap / substeps,
                config.hitbox_half_width,
            );
            position = next;
            outcome.blocked |= blocked;
        }
    }

    outcome.delta = position - start;
    let new_position = position;
    let tile = new_position.tile();
    if let Some(player) = room.get_player_mut(player_id) {
        player.position = new_position;
    }

    // Pickup
    if let Some(powerup) = apply_pickup(room, player_id, tile.0, tile.1) {
        outcome.update.grid_cells.push(CellPatch {
            x: tile.0,
            y: tile.1,
            tile: TileType::Empty,
        });
        if let Some(player) = room.get_player(player_id) {
            outcome.update.patch_player(*player_id, PlayerPatch::stats(player));
        }
        outcome.events.push(GameEvent::powerup_collected(now, *player_id, powerup, tile));
    }

    // Zone damage
    if let Some(event) = try_zone_damage(room, player_id, now, &mut ctx.zone, config) {
        if let Some(player) = room.get_player(player_id) {
            outcome.update.patch_player(*player_id, PlayerPatch::vitals(player));
        }
        outcome.events.push(event);
    }

    // Throttled position publish
    let changed = ctx.last_published_pos != Some(new_position);
    if changed && ctx.publish_due(config.position_publish_interval_ms) {
        outcome.update.patch_player(*player_id, PlayerPatch::position(new_position));
        ctx.last_publish_sim_ms = Some(ctx.sim_time_ms);
        ctx.last_published_pos = Some(new_position);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::Grid;
    use crate::game::state::{Bomb, BombId, Player, RoomId};
    use crate::game::sudden_death::SuddenDeathState;

    fn arena() -> (Room, PlayerId) {
        let mut grid = Grid::filled(7, 7, TileType::Empty);
        for i in 0..7 {
            grid.set(i, 0, TileType::Wall);
            grid.set(i, 6, TileType::Wall);
            grid.set(0, i, TileType::Wall);
            grid.set(6, i, TileType::Wall);
        }
        grid.set(2, 1, TileType::Wall);
        let mut room = Room::with_grid(RoomId::new([1; 16]), 0, grid, 3);
        room.status = RoomStatus::Playing;
        room.started_at = Some(0);
        let id = PlayerId::new([1; 16]);
        room.players.insert(id, Player::new(id, "me", 0, (1, 1)));
        (room, id)
    }

    fn set_pos(room: &mut Room, id: &PlayerId, x: f32, y: f32) {
        room.players.get_mut(id).unwrap().position = Vec2::new(x, y);
    }

    #[test]
    fn test_free_movement_distance() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.5, 3.5);
        let mut ctx = SimContext::new();

        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Down), 100, 0, &mut ctx, &config);
        assert!((outcome.delta.y - 0.4).abs() < 1e-5);
        assert_eq!(outcome.delta.x, 0.0);
        assert!((room.players[&id].position.y - 3.9).abs() < 1e-5);
        assert_eq!(ctx.facing, Some(Direction::Down));
    }

    #[test]
    fn test_wall_blocks_axis_but_snap_applies() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.58, 1.3);
        let mut ctx = SimContext::new();

        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Right), 16, 0, &mut ctx, &config);
        assert!(outcome.blocked);
        assert_eq!(outcome.delta.x, 0.0);
        // Snap of 10 tiles/s over 16ms
        assert!((outcome.delta.y - 0.16).abs() < 1e-5);
        let pos = room.players[&id].position;
        assert!((pos.x - 1.58).abs() < 1e-6);
        assert!((pos.y - 1.46).abs() < 1e-5);
    }

    #[test]
    fn test_long_frame_cannot_cross_pillar() {
        let config = ArenaConfig::default();
        let mut room = Room::with_density(RoomId::new([4; 16]), 0, 0);
        room.status = RoomStatus::Playing;
        let id = PlayerId::new([1; 16]);
        room.players.insert(id, Player::new(id, "me", 0, (1, 2)));
        assert_eq!(room.grid.get(2, 2), Some(TileType::Wall));
        assert_eq!(room.grid.get(3, 2), Some(TileType::Empty));
        let mut ctx = SimContext::new();

        // Two tiles of travel in one frame, open floor behind the pillar
        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Right), 500, 0, &mut ctx, &config);
        assert!(outcome.blocked);
        assert_eq!(room.players[&id].tile(), (1, 2));
        assert!(room.players[&id].position.x + config.hitbox_half_width < 2.0);
    }

    #[test]
    fn test_snap_never_overshoots() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.5, 3.45);
        let mut ctx = SimContext::new();

        step_local_player(&mut room, &id, &InputFrame::held(Direction::Right), 100, 0, &mut ctx, &config);
        assert_eq!(room.players[&id].position.y, 3.5);
    }

    #[test]
    fn test_other_players_bomb_blocks_own_does_not() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.5, 3.5);
        let other = PlayerId::new([2; 16]);
        let bomb = |owner| Bomb {
            id: BombId::new([1; 16]),
            tile_x: 2,
            tile_y: 3,
            owner_id: owner,
            placed_at: 0,
            expires_at: 3_000,
            radius: 1,
        };

        room.bombs.insert(BombId::new([1; 16]), bomb(other));
        let mut ctx = SimContext::new();
        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Right), 100, 0, &mut ctx, &config);
        assert!(outcome.blocked);

        room.bombs.insert(BombId::new([1; 16]), bomb(id));
        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Right), 100, 0, &mut ctx, &config);
        assert!(!outcome.blocked);
        assert!(outcome.delta.x > 0.0);
    }

    #[test]
    fn test_pickup_on_arrival() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.9, 3.5);
        room.grid.set(2, 3, TileType::PowerupBomb);
        let mut ctx = SimContext::new();

        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Right), 50, 0, &mut ctx, &config);
        assert_eq!(room.players[&id].bomb_count, 2);
        assert_eq!(room.grid.get(2, 3), Some(TileType::Empty));
        assert_eq!(outcome.update.grid_cells.len(), 1);
        assert_eq!(outcome.events.len(), 1);
    }

    #[test]
    fn test_position_publish_throttled() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.5, 2.5);
        let mut ctx = SimContext::new();
        let input = InputFrame::held(Direction::Down);

        let mut publishes = 0;
        // 12 ticks of 10ms: publishes at 10, 60, 110
        for _ in 0..12 {
            let outcome = step_local_player(&mut room, &id, &input, 10, 0, &mut ctx, &config);
            if !outcome.update.is_empty() {
                publishes += 1;
            }
        }
        assert_eq!(publishes, 3);

        // Catch-up publish of the last unpublished step, then silence
        let outcome = step_local_player(&mut room, &id, &InputFrame::new(), 100, 0, &mut ctx, &config);
        assert!(!outcome.update.is_empty());
        let outcome = step_local_player(&mut room, &id, &InputFrame::new(), 100, 0, &mut ctx, &config);
        assert!(outcome.update.is_empty());
    }

    #[test]
    fn test_zone_damage_while_walking() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        room.sudden_death = SuddenDeathState { active: true, activated_at: Some(0), shrink_level: 2 };
        let mut ctx = SimContext::new();

        let outcome = step_local_player(&mut room, &id, &InputFrame::new(), 16, 10_000, &mut ctx, &config);
        assert_eq!(room.players[&id].lives, 2);
        assert_eq!(outcome.events.len(), 1);

        step_local_player(&mut room, &id, &InputFrame::new(), 16, 10_500, &mut ctx, &config);
        assert_eq!(room.players[&id].lives, 2);
        step_local_player(&mut room, &id, &InputFrame::new(), 16, 11_000, &mut ctx, &config);
        assert_eq!(room.players[&id].lives, 1);
    }

    #[test]
    fn test_dead_or_lobby_player_does_not_move() {
        let config = ArenaConfig::default();
        let (mut room, id) = arena();
        set_pos(&mut room, &id, 1.5, 3.5);
        room.status = RoomStatus::Lobby;
        let mut ctx = SimContext::new();
        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Down), 100, 0, &mut ctx, &config);
        assert_eq!(outcome.delta, Vec2::ZERO);

        room.status = RoomStatus::Playing;
        room.players.get_mut(&id).unwrap().is_alive = false;
        let outcome = step_local_player(&mut room, &id, &InputFrame::held(Direction::Down), 100, 0, &mut ctx, &config);
        assert_eq!(outcome.delta, Vec2::ZERO);
    }
}
