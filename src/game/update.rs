//! Room Updates
//!
//! Partial writes against a room record. Every field merges monotonically so
//! applying updates in any order, or more than once, converges:
//!
//! - status only moves forward (`lobby < playing < ended`)
//! - hits are a grow-only set, lives only drop and never exceed what the
//!   hits leave, stats and scores only grow, death is permanent
//! - tiles only follow [`TileType::can_become`]
//! - a tombstoned bomb is never re-added
//! - seats follow the order of join claims, see [`Room::reseat_players`]
//!
//! Positions are the one last-writer-wins field.
//!
//! Tombstones grow by one id per resolved bomb for the length of a round.
//! Once a room has ended no bomb can be placed or detonated, so the bomb map
//! and the tombstones are dropped and stale writes carrying them are ignored.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::core::clock::Millis;
use crate::core::vec2::Vec2;
use crate::game::grid::TileType;
use crate::game::state::{Bomb, BombId, Explosion, HitSource, Player, PlayerId, Room, RoomStatus, MAX_PLAYERS};
use crate::game::sudden_death::SuddenDeathState;

/// Changed fields of one player.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerPatch {
    /// New position, last writer wins
    pub position: Option<Vec2>,
    /// Alive flag; only `false` sticks
    pub is_alive: Option<bool>,
    /// Lives as the writer saw them; the lower value wins
    pub lives: Option<u8>,
    /// Hits the writer knows of; unioned
    pub hits: BTreeSet<HitSource>,
    /// Bomb capacity; the higher value wins
    pub bomb_count: Option<u8>,
    /// Blast radius; the higher value wins
    pub blast_radius: Option<u8>,
    /// Speed multiplier; the higher value wins
    pub speed: Option<f32>,
    /// Score; the higher value wins
    pub score: Option<u32>,
}

impl PlayerPatch {
    /// Position-only patch.
    pub fn position(position: Vec2) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    /// Every mergeable field of a player.
    pub fn full(player: &Player) -> Self {
        Self {
            position: Some(player.position),
            is_alive: Some(player.is_alive),
            lives: Some(player.lives),
            hits: player.hits.clone(),
            bomb_count: Some(player.bomb_count),
            blast_radius: Some(player.blast_radius),
            speed: Some(player.speed),
            score: Some(player.score),
        }
    }

    /// Life and score fields, as written by a blast.
    pub fn vitals(player: &Player) -> Self {
        Self {
            is_alive: Some(player.is_alive),
            lives: Some(player.lives),
            hits: player.hits.clone(),
            score: Some(player.score),
            ..Default::default()
        }
    }

    /// Stat fields, as written by a pickup.
    pub fn stats(player: &Player) -> Self {
        Self {
            bomb_count: Some(player.bomb_count),
            blast_radius: Some(player.blast_radius),
            speed: Some(player.speed),
            ..Default::default()
        }
    }

    /// Fold a later patch for the same player into this one.
    pub fn absorb(&mut self, later: PlayerPatch) {
        self.position = later.position.or(self.position);
        self.is_alive = later.is_alive.or(self.is_alive);
        self.lives = later.lives.or(self.lives);
        self.hits.extend(later.hits);
        self.bomb_count = later.bomb_count.or(self.bomb_count);
        self.blast_radius = later.blast_radius.or(self.blast_radius);
        self.speed = later.speed.or(self.speed);
        self.score = later.score.or(self.score);
    }

    /// Merge into a player record.
    pub fn apply_to(&self, player: &mut Player) {
        if let Some(position) = self.position {
            if position.is_finite() {
                player.position = position;
            }
        }
        player.hits.extend(self.hits.iter().copied());
        if let Some(lives) = self.lives {
            player.lives = player.lives.min(lives);
        }
        if let Some(alive) = self.is_alive {
            player.is_alive &= alive;
        }
        player.settle_lives();
        if let Some(n) = self.bomb_count {
            player.bomb_count = player.bomb_count.max(n);
        }
        if let Some(r) = self.blast_radius {
            player.blast_radius = player.blast_radius.max(r);
        }
        if let Some(s) = self.speed {
            if s.is_finite() {
                player.speed = player.speed.max(s);
            }
        }
        if let Some(score) = self.score {
            player.score = player.score.max(score);
        }
    }
}

/// One grid cell write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPatch {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
    /// Tile written; ignored unless [`TileType::can_become`] allows it
    pub tile: TileType,
}

/// A partial write against one room.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomUpdate {
    /// Status; only moves forward
    pub status: Option<RoomStatus>,
    /// Countdown anchor; the earliest wins
    pub lobby_start_time: Option<Millis>,
    /// Round start; the earliest wins
    pub started_at: Option<Millis>,
    /// Winner; kept only while still alive after the merge
    pub winner_id: Option<PlayerId>,
    /// Joins, admitted while there is room
    pub players_added: Vec<Player>,
    /// Per-player field writes
    pub players: BTreeMap<PlayerId, PlayerPatch>,
    /// Grid cell writes
    pub grid_cells: Vec<CellPatch>,
    /// Placed bombs
    pub bombs_added: Vec<Bomb>,
    /// Bombs taken off the board
    pub bombs_removed: Vec<BombId>,
    /// New explosions
    pub explosions_added: Vec<Explosion>,
    /// Tombstones for resolved bombs
    pub resolved_bombs: Vec<BombId>,
    /// Sudden-death state; merged field by field
    pub sudden_death: Option<SuddenDeathState>,
}

/// What a merge changed, for callers that react to remote writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeReport {
    /// Players admitted by this merge
    pub players_added: Vec<PlayerId>,
    /// Players whose join was refused because the room was full
    pub players_rejected: Vec<PlayerId>,
    /// Players moved to another seat by a colliding join
    pub players_reseated: Vec<PlayerId>,
    /// Bombs that appeared
    pub bombs_added: Vec<BombId>,
    /// Bombs that disappeared
    pub bombs_removed: Vec<BombId>,
    /// Explosions seen for the first time
    pub explosions_added: Vec<BombId>,
    /// Status before the merge, if it changed
    pub status_changed: Option<(RoomStatus, RoomStatus)>,
}

impl RoomUpdate {
    /// Whether the update carries nothing.
    pub fn is_empty(&self) -> bool {
        *self == RoomUpdate::default()
    }

    /// Position write for one player.
    pub fn position(player_id: PlayerId, position: Vec2) -> Self {
        let mut update = Self::default();
        update.players.insert(player_id, PlayerPatch::position(position));
        update
    }

    /// Join write.
    pub fn join(player: Player) -> Self {
        Self {
            players_added: vec![player],
            ..Default::default()
        }
    }

    /// Everything in `room`, as a mergeable update.
    pub fn from_room(room: &Room) -> Self {
        Self {
            status: Some(room.status),
            lobby_start_time: room.lobby_start_time,
            started_at: room.started_at,
            winner_id: room.winner_id,
            players_added: room.players.values().cloned().collect(),
            players: room
                .players
                .values()
                .map(|p| (p.id, PlayerPatch::full(p)))
                .collect(),
            grid_cells: room
                .grid
                .iter()
                .map(|((x, y), tile)| CellPatch { x, y, tile })
                .collect(),
            bombs_added: room.bombs.values().cloned().collect(),
            bombs_removed: Vec::new(),
            explosions_added: room.explosions.values().cloned().collect(),
            resolved_bombs: room.resolved_bombs.iter().copied().collect(),
            sudden_death: Some(room.sudden_death),
        }
    }

    /// Merge a player patch into this update.
    pub fn patch_player(&mut self, player_id: PlayerId, patch: PlayerPatch) {
        self.players.entry(player_id).or_default().absorb(patch);
    }

    /// Fold a later update into this one.
    pub fn extend(&mut self, later: RoomUpdate) {
        self.status = max_opt(self.status, later.status);
        self.lobby_start_time = min_opt(self.lobby_start_time, later.lobby_start_time);
        self.started_at = min_opt(self.started_at, later.started_at);
        self.winner_id = self.winner_id.or(later.winner_id);
        self.players_added.extend(later.players_added);
        for (id, patch) in later.players {
            self.patch_player(id, patch);
        }
        self.grid_cells.extend(later.grid_cells);
        self.bombs_added.extend(later.bombs_added);
        self.bombs_removed.extend(later.bombs_removed);
        self.explosions_added.extend(later.explosions_added);
        self.resolved_bombs.extend(later.resolved_bombs);
        self.sudden_death = match (self.sudden_death, later.sudden_death) {
            (Some(a), Some(b)) => Some(merge_sudden_death(a, b)),
            (a, b) => a.or(b),
        };
    }

    /// Merge into a room.
    pub fn apply_to(&self, room: &mut Room) -> MergeReport {
        let mut report = MergeReport::default();

        // Bombs are finished business once the round is over
        let ended = room.status == RoomStatus::Ended || self.status == Some(RoomStatus::Ended);
        if !ended {
            // Tombstones first so a stale add in the same update stays dead
            for id in &self.resolved_bombs {
                room.resolved_bombs.insert(*id);
                if room.bombs.remove(id).is_some() {
                    report.bombs_removed.push(*id);
                }
            }
            for id in &self.bombs_removed {
                if room.bombs.remove(id).is_some() {
                    report.bombs_removed.push(*id);
                }
            }
            for bomb in &self.bombs_added {
                if room.is_resolved(&bomb.id) || room.bombs.contains_key(&bomb.id) {
                    continue;
                }
                room.bombs.insert(bomb.id, bomb.clone());
                report.bombs_added.push(bomb.id);
            }
        }

        for player in &self.players_added {
            if room.players.contains_key(&player.id) {
                continue;
            }
            if room.players.len() >= MAX_PLAYERS {
                report.players_rejected.push(player.id);
                continue;
            }
            room.players.insert(player.id, player.clone());
            report.players_added.push(player.id);
        }
        if !report.players_added.is_empty() {
            report.players_reseated = room.reseat_players();
        }
        for (id, patch) in &self.players {
            if let Some(player) = room.players.get_mut(id) {
                patch.apply_to(player);
            }
        }

        for cell in &self.grid_cells {
            if let Some(current) = room.grid.get(cell.x, cell.y) {
                if current.can_become(cell.tile) {
                    room.grid.set(cell.x, cell.y, cell.tile);
                }
            }
        }

        for explosion in &self.explosions_added {
            if !room.explosions.contains_key(&explosion.id) {
                room.explosions.insert(explosion.id, explosion.clone());
                report.explosions_added.push(explosion.id);
            }
        }

        room.lobby_start_time = min_opt(room.lobby_start_time, self.lobby_start_time);
        room.started_at = min_opt(room.started_at, self.started_at);
        // A winner must still be standing once deaths from both sides are in
        room.winner_id = [room.winner_id, self.winner_id]
            .into_iter()
            .flatten()
            .find(|id| room.players.get(id).is_some_and(|p| p.is_alive));
        if let Some(status) = self.status {
            if status > room.status {
                report.status_changed = Some((room.status, status));
                room.status = status;
            }
        }
        if let Some(sd) = self.sudden_death {
            room.sudden_death = merge_sudden_death(room.sudden_death, sd);
        }
        if ended {
            report.bombs_removed.extend(room.bombs.keys().copied());
            room.clear_bombs();
        }

        report
    }
}

fn min_opt(a: Option<Millis>, b: Option<Millis>) -> Option<Millis> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn merge_sudden_death(a: SuddenDeathState, b: SuddenDeathState) -> SuddenDeathState {
    let activated_at = match (a.activated_at, b.activated_at) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };
    SuddenDeathState {
        active: a.active || b.active,
        activated_at,
        shrink_level: a.shrink_level.max(b.shrink_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::RoomId;

    fn room_with_player() -> (Room, PlayerId) {
        let mut room = Room::new(RoomId::new([1; 16]), 0);
        let id = PlayerId::new([1; 16]);
        room.players.insert(id, Player::new(id, "ann", 0, (1, 1)));
        (room, id)
    }

    fn bomb(id: u8, owner: PlayerId) -> Bomb {
        Bomb {
            id: BombId::new([id; 16]),
            tile_x: 1,
            tile_y: 1,
            owner_id: owner,
            placed_at: 0,
            expires_at: 3_000,
            radius: 1,
        }
    }

    #[test]
    fn test_lives_never_increase() {
        let (mut room, id) = room_with_player();
        let mut hit = RoomUpdate::default();
        hit.patch_player(id, PlayerPatch { lives: Some(1), ..Default::default() });
        hit.apply_to(&mut room);

        let mut stale = RoomUpdate::default();
        stale.patch_player(id, PlayerPatch { lives: Some(3), is_alive: Some(true), ..Default::default() });
        stale.apply_to(&mut room);

        assert_eq!(room.players[&id].lives, 1);
    }

    #[test]
    fn test_death_is_permanent() {
        let (mut room, id) = room_with_player();
        let mut kill = RoomUpdate::default();
        kill.patch_player(id, PlayerPatch { lives: Some(0), is_alive: Some(false), ..Default::default() });
        kill.apply_to(&mut room);
        RoomUpdate::from_room(&Room::new(RoomId::new([1; 16]), 0)).apply_to(&mut room);

        let mut revive = RoomUpdate::default();
        revive.patch_player(id, PlayerPatch { is_alive: Some(true), ..Default::default() });
        revive.apply_to(&mut room);
        assert!(!room.players[&id].is_alive);
    }

    #[test]
    fn test_tombstoned_bomb_not_resurrected() {
        let (mut room, id) = room_with_player();
        let b = bomb(7, id);

        RoomUpdate { bombs_added: vec![b.clone()], ..Default::default() }.apply_to(&mut room);
        assert!(room.bombs.contains_key(&b.id));

        RoomUpdate { resolved_bombs: vec![b.id], ..Default::default() }.apply_to(&mut room);
        assert!(room.bombs.is_empty());

        // Stale snapshot still carrying the bomb
        let report = RoomUpdate { bombs_added: vec![b.clone()], ..Default::default() }.apply_to(&mut room);
        assert!(room.bombs.is_empty());
        assert!(report.bombs_added.is_empty());
    }

    #[test]
    fn test_crate_cannot_reappear() {
        let (mut room, _) = room_with_player();
        let (x, y) = room
            .grid
            .iter()
            .find(|(_, t)| *t == TileType::Crate)
            .map(|(pos, _)| pos)
            .unwrap();

        let cell = |tile| RoomUpdate {
            grid_cells: vec![CellPatch { x, y, tile }],
            ..Default::default()
        };
        cell(TileType::PowerupSpeed).apply_to(&mut room);
        cell(TileType::Crate).apply_to(&mut room);
        assert_eq!(room.grid.get(x, y), Some(TileType::PowerupSpeed));
        cell(TileType::Empty).apply_to(&mut room);
        cell(TileType::PowerupSpeed).apply_to(&mut room);
        assert_eq!(room.grid.get(x, y), Some(TileType::Empty));
    }

    #[test]
    fn test_status_only_moves_forward() {
        let (mut room, _) = room_with_player();
        let report = RoomUpdate { status: Some(RoomStatus::Playing), started_at: Some(10), ..Default::default() }
            .apply_to(&mut room);
        assert_eq!(report.status_changed, Some((RoomStatus::Lobby, RoomStatus::Playing)));
        RoomUpdate { status: Some(RoomStatus::Lobby), ..Default::default() }.apply_to(&mut room);
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.started_at, Some(10));
    }

    #[test]
    fn test_join_race_respects_capacity() {
        let mut room = Room::new(RoomId::new([2; 16]), 0);
        let spawns = room.grid.spawn_points();
        let mut update = RoomUpdate::default();
        for i in 0..5u8 {
            let id = PlayerId::new([i + 1; 16]);
            update.players_added.push(Player::new(id, "p", i.min(3), spawns[(i as usize).min(3)]));
        }
        let report = update.apply_to(&mut room);
        assert_eq!(room.players.len(), MAX_PLAYERS);
        assert_eq!(report.players_rejected, vec![PlayerId::new([5; 16])]);
    }

    #[test]
    fn test_apply_is_idempotent_and_order_free() {
        let (base, id) = room_with_player();
        let mut a = RoomUpdate::default();
        a.patch_player(id, PlayerPatch { lives: Some(2), bomb_count: Some(2), ..Default::default() });
        a.bombs_added.push(bomb(1, id));
        let mut b = RoomUpdate::default();
        b.patch_player(id, PlayerPatch { lives: Some(1), score: Some(1), ..Default::default() });
        b.resolved_bombs.push(BombId::new([1; 16]));

        let mut ab = base.clone();
        a.apply_to(&mut ab);
        b.apply_to(&mut ab);
        a.apply_to(&mut ab);

        let mut ba = base.clone();
        b.apply_to(&mut ba);
        a.apply_to(&mut ba);

        assert_eq!(ab, ba);
        assert_eq!(ab.players[&id].lives, 1);
        assert_eq!(ab.players[&id].bomb_count, 2);
        assert!(ab.bombs.is_empty());
    }

    #[test]
    fn test_conflicting_winners_settle_on_survivor() {
        let a = PlayerId::new([1; 16]);
        let b = PlayerId::new([2; 16]);
        let mut base = Room::new(RoomId::new([9; 16]), 0);
        base.players.insert(a, Player::new(a, "a", 0, (1, 1)));
        base.players.insert(b, Player::new(b, "b", 1, (13, 1)));
        base.status = RoomStatus::Playing;

        // Each replica saw the other die and crowned itself
        let mut from_a = RoomUpdate { status: Some(RoomStatus::Ended), winner_id: Some(a), ..Default::default() };
        from_a.patch_player(b, PlayerPatch { lives: Some(0), is_alive: Some(false), ..Default::default() });
        let mut from_b = RoomUpdate { status: Some(RoomStatus::Ended), winner_id: Some(b), ..Default::default() };
        from_b.patch_player(a, PlayerPatch { lives: Some(0), is_alive: Some(false), ..Default::default() });

        let mut ab = base.clone();
        from_a.apply_to(&mut ab);
        assert_eq!(ab.winner_id, Some(a));
        from_b.apply_to(&mut ab);

        let mut ba = base.clone();
        from_b.apply_to(&mut ba);
        from_a.apply_to(&mut ba);

        assert_eq!(ab.winner_id, None);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_colliding_join_claims_reseat_identically() {
        let mut base = Room::new(RoomId::new([5; 16]), 0);
        let spawns = base.grid.spawn_points();
        let host = PlayerId::new([1; 16]);
        base.players.insert(host, Player::new(host, "host", 0, spawns[0]));

        let (x, y) = (PlayerId::new([7; 16]), PlayerId::new([3; 16]));
        let join_x = RoomUpdate::join(Player::new(x, "x", 1, spawns[1]));
        let join_y = RoomUpdate::join(Player::new(y, "y", 1, spawns[1]));

        let mut xy = base.clone();
        join_x.apply_to(&mut xy);
        let report = join_y.apply_to(&mut xy);
        assert_eq!(report.players_reseated, vec![x]);

        let mut yx = base;
        join_y.apply_to(&mut yx);
        join_x.apply_to(&mut yx);

        assert_eq!(xy, yx);
        assert_eq!(xy.players[&y].seat, 1);
        assert_eq!(xy.players[&x].seat, 2);
        assert_eq!(xy.players[&x].tile(), spawns[2]);
        assert_ne!(xy.players[&x].color, xy.players[&y].color);
    }

    #[test]
    fn test_hits_union_across_writers() {
        let (mut room, id) = room_with_player();
        let hit = |n: u8| {
            let mut update = RoomUpdate::default();
            update.patch_player(
                id,
                PlayerPatch {
                    lives: Some(2),
                    hits: [HitSource::Blast(BombId::new([n; 16]))].into(),
                    ..Default::default()
                },
            );
            update
        };
        hit(1).apply_to(&mut room);
        hit(2).apply_to(&mut room);
        hit(2).apply_to(&mut room);
        assert_eq!(room.players[&id].lives, 1);
        assert_eq!(room.players[&id].hits.len(), 2);
        assert!(room.players[&id].is_alive);
    }

    #[test]
    fn test_ended_room_ignores_stale_bombs() {
        let (mut room, id) = room_with_player();
        room.status = RoomStatus::Playing;
        RoomUpdate { bombs_added: vec![bomb(1, id)], ..Default::default() }.apply_to(&mut room);
        let stale = RoomUpdate::from_room(&room);

        let report = RoomUpdate { status: Some(RoomStatus::Ended), ..Default::default() }.apply_to(&mut room);
        assert_eq!(report.bombs_removed, vec![BombId::new([1; 16])]);
        assert!(room.bombs.is_empty());

        stale.apply_to(&mut room);
        assert_eq!(room.status, RoomStatus::Ended);
        assert!(room.bombs.is_empty());
        assert!(room.resolved_bombs.is_empty());
    }

    #[test]
    fn test_extend_keeps_latest_position() {
        let id = PlayerId::new([1; 16]);
        let mut first = RoomUpdate::position(id, Vec2::new(1.5, 1.5));
        first.extend(RoomUpdate::position(id, Vec2::new(2.0, 1.5)));
        assert_eq!(first.players[&id].position, Some(Vec2::new(2.0, 1.5)));
        assert!(!first.is_empty());
        assert!(RoomUpdate::default().is_empty());
    }
}
