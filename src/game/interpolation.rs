//! Remote Entity Interpolation
//!
//! Render-side smoothing for players driven by other clients. Network
//! positions arrive at most twenty times a second; each render frame moves
//! the drawn position a fixed fraction of the way to the latest one. Nothing
//! here writes back into the room.

use std::collections::BTreeMap;

use crate::config::ArenaConfig;
use crate::core::vec2::Vec2;
use crate::game::state::{PlayerId, Room};

/// Drawn and target position of one remote player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpolatedEntity {
    /// Position being drawn
    pub current: Vec2,
    /// Latest authoritative position
    pub target: Vec2,
}

impl InterpolatedEntity {
    fn at(position: Vec2) -> Self {
        Self {
            current: position,
            target: position,
        }
    }

    /// Whether the drawn position has reached the target.
    pub fn settled(&self) -> bool {
        self.current == self.target
    }
}

/// Smoothing state for every non-local player.
#[derive(Clone, Debug)]
pub struct RemoteInterpolator {
    local: PlayerId,
    entities: BTreeMap<PlayerId, InterpolatedEntity>,
    factor: f32,
    epsilon: f32,
}

impl RemoteInterpolator {
    /// Create with explicit tuning.
    pub fn new(local: PlayerId, factor: f32, epsilon: f32) -> Self {
        Self {
            local,
            entities: BTreeMap::new(),
            factor,
            epsilon,
        }
    }

    /// Create with the configured tuning.
    pub fn from_config(local: PlayerId, config: &ArenaConfig) -> Self {
        Self::new(local, config.interpolation_factor, config.interpolation_epsilon)
    }

    /// Record a new authoritative position. The first sighting snaps.
    pub fn set_target(&mut self, id: PlayerId, target: Vec2) {
        if id == self.local || !target.is_finite() {
            return;
        }
        self.entities
            .entry(id)
            .and_modify(|e| e.target = target)
            .or_insert_with(|| InterpolatedEntity::at(target));
    }

    /// Pull targets from a merged room and forget players that left.
    pub fn sync_from_room(&mut self, room: &Room) {
        self.entities.retain(|id, _| room.players.contains_key(id));
        for player in room.players.values() {
            self.set_target(player.id, player.position);
        }
    }

    /// Advance every entity one render frame.
    pub fn step(&mut self) {
        let (factor, epsilon) = (self.factor, self.epsilon);
        for entity in self.entities.values_mut() {
            let next = entity.current.lerp(entity.target, factor);
            entity.current = if next.distance(entity.target) < epsilon {
                entity.target
            } else {
                next
            };
        }
    }

    /// Drawn position of a remote player.
    pub fn position(&self, id: &PlayerId) -> Option<Vec2> {
        self.entities.get(id).map(|e| e.current)
    }

    /// Tracked entity.
    pub fn entity(&self, id: &PlayerId) -> Option<&InterpolatedEntity> {
        self.entities.get(id)
    }

    /// Number of tracked players.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no players are tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Player, RoomId};

    fn ids() -> (PlayerId, PlayerId) {
        (PlayerId::new([1; 16]), PlayerId::new([2; 16]))
    }

    #[test]
    fn test_first_sighting_snaps() {
        let (local, remote) = ids();
        let mut interp = RemoteInterpolator::new(local, 0.15, 0.01);
        interp.set_target(remote, Vec2::new(3.5, 4.5));
        assert_eq!(interp.position(&remote), Some(Vec2::new(3.5, 4.5)));
        assert!(interp.entity(&remote).unwrap().settled());
    }

    #[test]
    fn test_local_player_ignored() {
        let (local, _) = ids();
        let mut interp = RemoteInterpolator::new(local, 0.15, 0.01);
        interp.set_target(local, Vec2::new(1.0, 1.0));
        assert!(interp.is_empty());
    }

    #[test]
    fn test_moves_fraction_of_remaining_distance() {
        let (local, remote) = ids();
        let mut interp = RemoteInterpolator::new(local, 0.15, 0.01);
        interp.set_target(remote, Vec2::new(0.0, 0.0));
        interp.set_target(remote, Vec2::new(1.0, 0.0));
        interp.step();
        let pos = interp.position(&remote).unwrap();
        assert!((pos.x - 0.15).abs() < 1e-6);
        interp.step();
        let pos = interp.position(&remote).unwrap();
        assert!((pos.x - (0.15 + 0.85 * 0.15)).abs() < 1e-6);
    }

    #[test]
    fn test_converges_and_snaps_within_epsilon() {
        let (local, remote) = ids();
        let mut interp = RemoteInterpolator::new(local, 0.15, 0.01);
        interp.set_target(remote, Vec2::new(1.5, 1.5));
        interp.set_target(remote, Vec2::new(9.5, 1.5));

        let mut frames = 0;
        while !interp.entity(&remote).unwrap().settled() {
            interp.step();
            frames += 1;
            assert!(frames < 200, "did not settle");
        }
        assert_eq!(interp.position(&remote), Some(Vec2::new(9.5, 1.5)));
        // Remaining distance 8 shrinks by 0.85 per frame until under 0.01
        assert!(frames > 30);
    }

    #[test]
    fn test_sync_drops_departed_players() {
        let (local, remote) = ids();
        let mut room = Room::new(RoomId::new([1; 16]), 0);
        room.players.insert(local, Player::new(local, "me", 0, (1, 1)));
        room.players.insert(remote, Player::new(remote, "you", 1, (13, 1)));

        let mut interp = RemoteInterpolator::new(local, 0.15, 0.01);
        interp.sync_from_room(&room);
        assert_eq!(interp.len(), 1);
        assert_eq!(interp.position(&remote), Some(Vec2::new(13.5, 1.5)));

        room.players.remove(&remote);
        interp.sync_from_room(&room);
        assert!(interp.is_empty());
    }
}
