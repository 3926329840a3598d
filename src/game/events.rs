//! Game Events
//!
//! Events produced by the local simulation and by merging remote state. The
//! presentation layer consumes them; nothing in the rules reads them back.

use serde::{Serialize, Deserialize};

use crate::core::clock::Millis;
use crate::core::vec2::TilePos;
use crate::game::grid::TileType;
use crate::game::state::{BombId, PlayerId, RoomStatus};

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Damage and deaths first
    PlayerHit = 0,
    /// Then pickups
    Pickup = 1,
    /// Then bomb lifecycle
    Bomb = 2,
    /// Then board changes
    Terrain = 3,
    /// Then phase changes
    Phase = 4,
    /// Lowest priority
    Other = 255,
}

/// What took a life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitCause {
    /// Caught in a bomb blast
    Blast {
        /// Owner of the bomb
        owner_id: PlayerId,
    },
    /// Standing in the sudden-death ring
    Zone,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Bomb placed by the local player
    BombPlaced {
        bomb_id: BombId,
        owner_id: PlayerId,
        tile: TilePos,
    },

    /// Bomb resolved by this replica
    BombExploded {
        bomb_id: BombId,
        owner_id: PlayerId,
        origin: TilePos,
        tiles: usize,
        chained: usize,
    },

    /// Crate destroyed, possibly leaving a pickup
    CrateDestroyed {
        tile: TilePos,
        drop: Option<TileType>,
    },

    /// Player lost a life
    PlayerHit {
        player_id: PlayerId,
        cause: HitCause,
        lives_left: u8,
        eliminated: bool,
    },

    /// Player walked over a pickup
    PowerupCollected {
        player_id: PlayerId,
        powerup: TileType,
        tile: TilePos,
    },

    /// Round timer expired
    SuddenDeathStarted,

    /// Danger ring grew
    ZoneShrunk { level: u8 },

    /// Room status moved forward
    StatusChanged {
        old_status: RoomStatus,
        new_status: RoomStatus,
    },

    /// Round finished
    RoundEnded { winner_id: Option<PlayerId> },

    /// Explosion learned from another replica
    ExplosionSeen { bomb_id: BombId, origin: TilePos },
}

/// A game event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Time the event happened
    pub at: Millis,

    /// Processing priority
    pub priority: EventPriority,

    /// Player involved (for tie-breaking)
    pub player_id: Option<PlayerId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(at: Millis, priority: EventPriority, data: GameEventData) -> Self {
        let player_id = match &data {
            GameEventData::BombPlaced { owner_id, .. } => Some(*owner_id),
            GameEventData::BombExploded { owner_id, .. } => Some(*owner_id),
            GameEventData::PlayerHit { player_id, .. } => Some(*player_id),
            GameEventData::PowerupCollected { player_id, .. } => Some(*player_id),
            GameEventData::RoundEnded { winner_id } => *winner_id,
            _ => None,
        };

        Self {
            at,
            priority,
            player_id,
            data,
        }
    }

    /// Bomb placed.
    pub fn bomb_placed(at: Millis, bomb_id: BombId, owner_id: PlayerId, tile: TilePos) -> Self {
        Self::new(
            at,
            EventPriority::Bomb,
            GameEventData::BombPlaced { bomb_id, owner_id, tile },
        )
    }

    /// Bomb exploded.
    pub fn bomb_exploded(
        at: Millis,
        bomb_id: BombId,
        owner_id: PlayerId,
        origin: TilePos,
        tiles: usize,
        chained: usize,
    ) -> Self {
        Self::new(
            at,
            EventPriority::Bomb,
            GameEventData::BombExploded {
                bomb_id,
                owner_id,
                origin,
                tiles,
                chained,
            },
        )
    }

    /// Crate destroyed.
    pub fn crate_destroyed(at: Millis, tile: TilePos, drop: Option<TileType>) -> Self {
        Self::new(at, EventPriority::Terrain, GameEventData::CrateDestroyed { tile, drop })
    }

    /// Player caught in a blast.
    pub fn blast_hit(
        at: Millis,
        player_id: PlayerId,
        owner_id: PlayerId,
        lives_left: u8,
        eliminated: bool,
    ) -> Self {
        Self::new(
            at,
            EventPriority::PlayerHit,
            GameEventData::PlayerHit {
                player_id,
                cause: HitCause::Blast { owner_id },
                lives_left,
                eliminated,
            },
        )
    }

    /// Player damaged by the danger ring.
    pub fn zone_damage(at: Millis, player_id: PlayerId, lives_left: u8, eliminated: bool) -> Self {
        Self::new(
            at,
            EventPriority::PlayerHit,
            GameEventData::PlayerHit {
                player_id,
                cause: HitCause::Zone,
                lives_left,
                eliminated,
            },
        )
    }

    /// Pickup collected.
    pub fn powerup_collected(at: Millis, player_id: PlayerId, powerup: TileType, tile: TilePos) -> Self {
        Self::new(
            at,
            EventPriority::Pickup,
            GameEventData::PowerupCollected { player_id, powerup, tile },
        )
    }

    /// Sudden death began.
    pub fn sudden_death_started(at: Millis) -> Self {
        Self::new(at, EventPriority::Phase, GameEventData::SuddenDeathStarted)
    }

    /// Ring grew to `level`.
    pub fn zone_shrunk(at: Millis, level: u8) -> Self {
        Self::new(at, EventPriority::Phase, GameEventData::ZoneShrunk { level })
    }

    /// Status transition.
    pub fn status_changed(at: Millis, old_status: RoomStatus, new_status: RoomStatus) -> Self {
        Self::new(
            at,
            EventPriority::Phase,
            GameEventData::StatusChanged { old_status, new_status },
        )
    }

    /// Round over.
    pub fn round_ended(at: Millis, winner_id: Option<PlayerId>) -> Self {
        Self::new(at, EventPriority::Phase, GameEventData::RoundEnded { winner_id })
    }

    /// Remote explosion observed for the first time.
    pub fn explosion_seen(at: Millis, bomb_id: BombId, origin: TilePos) -> Self {
        Self::new(at, EventPriority::Other, GameEventData::ExplosionSeen { bomb_id, origin })
    }

    /// Whether this event removed a player from the round.
    pub fn is_elimination(&self) -> bool {
        matches!(self.data, GameEventData::PlayerHit { eliminated: true, .. })
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
            && self.priority == other.priority
            && self.player_id == other.player_id
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: time, then priority, then player_id
        self.at
            .cmp(&other.at)
            .then(self.priority.cmp(&other.priority))
            .then(self.player_id.cmp(&other.player_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let id1 = PlayerId::new([1; 16]);
        let id2 = PlayerId::new([2; 16]);

        let hit1 = GameEvent::blast_hit(10, id1, id2, 2, false);
        let pickup = GameEvent::powerup_collected(10, id1, TileType::PowerupBomb, (3, 1));
        let hit2 = GameEvent::blast_hit(10, id2, id1, 0, true);

        // Same time, but hits before pickups
        assert!(hit1 < pickup);

        // Same time and priority, but id1 < id2
        assert!(hit1 < hit2);

        // Earlier time always first
        let early = GameEvent::zone_shrunk(5, 1);
        assert!(early < hit1);
    }

    #[test]
    fn test_involved_player() {
        let id = PlayerId::new([7; 16]);
        let event = GameEvent::zone_damage(0, id, 0, true);
        assert_eq!(event.player_id, Some(id));
        assert!(event.is_elimination());
        assert_eq!(GameEvent::sudden_death_started(0).player_id, None);
    }
}
