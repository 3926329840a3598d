//! World State Definitions
//!
//! The room record every replica holds a copy of. Maps are BTreeMaps so
//! iteration order, digests and serialized output are identical on every
//! client.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::clock::Millis;
use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::{derive_room_seed, DeterministicRng};
use crate::core::vec2::{TilePos, Vec2};
use crate::game::grid::{generate_grid_with, Grid, TileType, CRATE_DENSITY_PERCENT, GRID_HEIGHT, GRID_WIDTH};
use crate::game::sudden_death::SuddenDeathState;

/// Maximum players per room.
pub const MAX_PLAYERS: usize = 4;

/// Lives every player starts with.
pub const STARTING_LIVES: u8 = 3;

/// Starting bomb capacity.
pub const STARTING_BOMBS: u8 = 1;

/// Starting blast radius.
pub const STARTING_RADIUS: u8 = 1;

/// Starting speed multiplier.
pub const STARTING_SPEED: f32 = 1.0;

/// Speed gained per speed pickup.
pub const SPEED_PICKUP_STEP: f32 = 0.2;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Declares a 16-byte identifier that serializes as a hex string, so it can be
/// used as a JSON map key.
macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Create from raw bytes.
            pub const fn new(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Fresh random identifier.
            pub fn random() -> Self {
                Self(*uuid::Uuid::new_v4().as_bytes())
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// First four bytes in hex, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                hex::encode(id.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                let bytes = hex::decode(&s).map_err(|e| format!("invalid id {}: {}", s, e))?;
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| format!("invalid id {}: expected 16 bytes", s))?;
                Ok(Self(arr))
            }
        }
    };
}

hex_id!(
    /// Stable player identifier supplied by the identity provider.
    PlayerId
);

hex_id!(
    /// Room identifier.
    RoomId
);

hex_id!(
    /// Bomb identifier. Explosions reuse the id of the bomb that caused them.
    BombId
);

// =============================================================================
// PLAYER
// =============================================================================

/// Player colour, assigned by join order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerColor {
    /// First joiner
    Red,
    /// Second joiner
    Blue,
    /// Third joiner
    Green,
    /// Fourth joiner
    Yellow,
}

impl PlayerColor {
    /// Colour for a join slot.
    pub fn for_slot(slot: usize) -> Self {
        match slot % MAX_PLAYERS {
            0 => PlayerColor::Red,
            1 => PlayerColor::Blue,
            2 => PlayerColor::Green,
            _ => PlayerColor::Yellow,
        }
    }
}

/// What took a life. Each source counts once per player, so a hit reported
/// by several replicas is one hit and hits from different bombs all count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    /// Caught in a bomb's blast
    Blast(BombId),
    /// Standing in the sudden-death ring. Only the player's own client
    /// writes these, keyed by the hit time.
    Zone(Millis),
}

/// State of a single player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Stable identity
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Continuous position in tile units
    pub position: Vec2,
    /// Still in the round?
    pub is_alive: bool,
    /// Remaining lives (0..=3)
    pub lives: u8,
    /// Every distinct hit taken
    pub hits: BTreeSet<HitSource>,
    /// Maximum simultaneous live bombs
    pub bomb_count: u8,
    /// Blast reach in tiles
    pub blast_radius: u8,
    /// Movement multiplier
    pub speed: f32,
    /// Display colour
    pub color: PlayerColor,
    /// Eliminations credited to this player
    pub score: u32,
    /// Slot claimed at join time
    pub join_order: u8,
    /// Spawn and colour slot once concurrent claims are resolved
    pub seat: u8,
}

impl Player {
    /// Create a player standing on the centre of its spawn tile.
    pub fn new(id: PlayerId, name: impl Into<String>, join_order: u8, spawn: TilePos) -> Self {
        Self {
            id,
            name: name.into(),
            position: Vec2::tile_center(spawn),
            is_alive: true,
            lives: STARTING_LIVES,
            hits: BTreeSet::new(),
            bomb_count: STARTING_BOMBS,
            blast_radius: STARTING_RADIUS,
            speed: STARTING_SPEED,
            color: PlayerColor::for_slot(join_order as usize),
            score: 0,
            join_order,
            seat: join_order,
        }
    }

    /// Tile the player stands on.
    #[inline]
    pub fn tile(&self) -> TilePos {
        self.position.tile()
    }

    /// Take a hit. Returns true if this hit eliminated the player.
    ///
    /// Dead players and already recorded sources are unaffected.
    pub fn lose_life(&mut self, source: HitSource) -> bool {
        if !self.is_alive || !self.hits.insert(source) {
            return false;
        }
        self.lives = self.lives.saturating_sub(1);
        self.settle_lives()
    }

    /// Cap lives by the distinct hits recorded and clear `is_alive` at zero.
    /// Returns true if this call eliminated the player.
    pub fn settle_lives(&mut self) -> bool {
        let taken = self.hits.len().min(STARTING_LIVES as usize) as u8;
        self.lives = self.lives.min(STARTING_LIVES - taken);
        if self.lives == 0 && self.is_alive {
            self.is_alive = false;
            return true;
        }
        false
    }

    /// Apply the stat boost of a pickup tile. Returns false for non-pickups.
    pub fn apply_powerup(&mut self, tile: TileType) -> bool {
        match tile {
            TileType::PowerupBomb => self.bomb_count = self.bomb_count.saturating_add(1),
            TileType::PowerupRadius => self.blast_radius = self.blast_radius.saturating_add(1),
            TileType::PowerupSpeed => self.speed += SPEED_PICKUP_STEP,
            _ => return false,
        }
        true
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_id(&self.id.0);
        hasher.update_vec2(self.position);
        hasher.update_bool(self.is_alive);
        hasher.update_u8(self.lives);
        hasher.update_u8(self.bomb_count);
        hasher.update_u8(self.blast_radius);
        hasher.update_f32(self.speed);
        hasher.update_u32(self.score);
        hasher.update_u8(self.seat);
    }
}

// =============================================================================
// BOMB / EXPLOSION
// =============================================================================

/// A placed bomb waiting for its fuse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bomb {
    /// Unique id
    pub id: BombId,
    /// Tile column
    pub tile_x: i32,
    /// Tile row
    pub tile_y: i32,
    /// Player who placed it
    pub owner_id: PlayerId,
    /// Placement time
    pub placed_at: Millis,
    /// Natural detonation time
    pub expires_at: Millis,
    /// Blast reach captured at placement
    pub radius: u8,
}

impl Bomb {
    /// Tile of the bomb.
    #[inline]
    pub fn tile(&self) -> TilePos {
        (self.tile_x, self.tile_y)
    }

    /// Whether the fuse has run out.
    #[inline]
    pub fn is_expired(&self, now: Millis) -> bool {
        now >= self.expires_at
    }
}

/// How far a blast reached in each direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastSpans {
    /// Tiles reached toward row 0
    pub up: u8,
    /// Tiles reached toward the last row
    pub down: u8,
    /// Tiles reached toward column 0
    pub left: u8,
    /// Tiles reached toward the last column
    pub right: u8,
}

/// Record of a resolved bomb.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explosion {
    /// Id of the bomb that exploded
    pub id: BombId,
    /// Origin column
    pub origin_x: i32,
    /// Origin row
    pub origin_y: i32,
    /// Radius of the bomb
    pub radius: u8,
    /// Resolution time
    pub created_at: Millis,
    /// Reach per direction
    pub spans: BlastSpans,
}

impl Explosion {
    /// Every tile covered by the blast, origin first.
    pub fn tiles(&self) -> Vec<TilePos> {
        let (ox, oy) = (self.origin_x, self.origin_y);
        let mut tiles = vec![(ox, oy)];
        tiles.extend((1..=self.spans.up as i32).map(|d| (ox, oy - d)));
        tiles.extend((1..=self.spans.down as i32).map(|d| (ox, oy + d)));
        tiles.extend((1..=self.spans.left as i32).map(|d| (ox - d, oy)));
        tiles.extend((1..=self.spans.right as i32).map(|d| (ox + d, oy)));
        tiles
    }

    /// Whether the display window has passed.
    #[inline]
    pub fn is_expired(&self, now: Millis, display_ms: Millis) -> bool {
        now >= self.created_at.saturating_add(display_ms)
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// Lifecycle status of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum RoomStatus {
    /// Accepting players
    #[default]
    Lobby,
    /// Round in progress
    Playing,
    /// Round over
    Ended,
}

/// Complete state of one arena match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier
    pub id: RoomId,
    /// Lifecycle status
    pub status: RoomStatus,
    /// Tile board
    pub grid: Grid,
    /// Players by id
    pub players: BTreeMap<PlayerId, Player>,
    /// Live bombs by id
    pub bombs: BTreeMap<BombId, Bomb>,
    /// Recent explosions by bomb id
    pub explosions: BTreeMap<BombId, Explosion>,
    /// Bombs that have already been resolved somewhere. One id per resolved
    /// bomb, dropped when the round ends.
    pub resolved_bombs: BTreeSet<BombId>,
    /// Creation time
    pub created_at: Millis,
    /// Second-join time that anchors the lobby countdown
    pub lobby_start_time: Option<Millis>,
    /// Round start time
    pub started_at: Option<Millis>,
    /// Shrinking-zone phase
    pub sudden_death: SuddenDeathState,
    /// Last player standing
    pub winner_id: Option<PlayerId>,
    /// Seed for grid generation and drop rolls
    pub rng_seed: u64,
}

impl Room {
    /// Create a lobby with a freshly generated standard grid.
    pub fn new(id: RoomId, created_at: Millis) -> Self {
        Self::with_density(id, created_at, CRATE_DENSITY_PERCENT)
    }

    /// Create a lobby with a custom crate density.
    pub fn with_density(id: RoomId, created_at: Millis, crate_density_percent: u32) -> Self {
        let rng_seed = derive_room_seed(id.as_bytes());
        let mut rng = DeterministicRng::new(rng_seed);
        let grid = generate_grid_with(GRID_WIDTH, GRID_HEIGHT, crate_density_percent, &mut rng);
        Self::with_grid(id, created_at, grid, rng_seed)
    }

    /// Create a lobby around a prebuilt grid.
    pub fn with_grid(id: RoomId, created_at: Millis, grid: Grid, rng_seed: u64) -> Self {
        Self {
            id,
            status: RoomStatus::Lobby,
            grid,
            players: BTreeMap::new(),
            bombs: BTreeMap::new(),
            explosions: BTreeMap::new(),
            resolved_bombs: BTreeSet::new(),
            created_at,
            lobby_start_time: None,
            started_at: None,
            sudden_death: SuddenDeathState::default(),
            winner_id: None,
            rng_seed,
        }
    }

    /// Get a player by ID.
    pub fn get_player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    /// Get a player mutably by ID.
    pub fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    /// Number of players still alive.
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.is_alive).count()
    }

    /// Number of live bombs owned by a player.
    pub fn live_bombs_of(&self, owner: &PlayerId) -> usize {
        self.bombs.values().filter(|b| b.owner_id == *owner).count()
    }

    /// Bomb on a tile, if any.
    pub fn bomb_at(&self, tile: TilePos) -> Option<&Bomb> {
        self.bombs.values().find(|b| b.tile() == tile)
    }

    /// Whether the bomb id has been resolved by any replica we heard from.
    #[inline]
    pub fn is_resolved(&self, id: &BombId) -> bool {
        self.resolved_bombs.contains(id)
    }

    /// Resolve joins that claimed the same slot.
    ///
    /// Seats follow the order of `(join_order, id)`, which every replica
    /// agrees on once it holds the same players. In the lobby a reseated
    /// player is also moved to its new spawn corner. Returns who moved.
    pub fn reseat_players(&mut self) -> Vec<PlayerId> {
        let mut order: Vec<(u8, PlayerId)> = self.players.values().map(|p| (p.join_order, p.id)).collect();
        order.sort();

        let spawns = self.grid.spawn_points();
        let in_lobby = self.status == RoomStatus::Lobby;
        let mut moved = Vec::new();
        for (seat, (_, id)) in order.into_iter().enumerate() {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            if player.seat as usize == seat {
                continue;
            }
            player.seat = seat as u8;
            player.color = PlayerColor::for_slot(seat);
            if let (true, Some(spawn)) = (in_lobby, spawns.get(seat)) {
                player.position = Vec2::tile_center(*spawn);
            }
            moved.push(id);
        }
        moved
    }

    /// Drop live bombs and their tombstones once nothing can detonate.
    pub fn clear_bombs(&mut self) {
        self.bombs.clear();
        self.resolved_bombs.clear();
    }

    /// Whether a new identity could take a seat.
    pub fn is_joinable_by(&self, player: &PlayerId) -> bool {
        self.status == RoomStatus::Lobby
            && self.players.len() < MAX_PLAYERS
            && !self.players.contains_key(player)
    }

    /// Digest of the rule-relevant state.
    ///
    /// Explosions are cosmetic after creation and are left out.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_room_state();
        hasher.update_id(&self.id.0);
        hasher.update_u8(self.status as u8);
        for (_, tile) in self.grid.iter() {
            hasher.update_u8(tile as u8);
        }
        for player in self.players.values() {
            player.hash_into(&mut hasher);
        }
        for bomb in self.bombs.values() {
            hasher.update_id(&bomb.id.0);
            hasher.update_i32(bomb.tile_x);
            hasher.update_i32(bomb.tile_y);
            hasher.update_u64(bomb.expires_at);
        }
        for id in &self.resolved_bombs {
            hasher.update_id(&id.0);
        }
        hasher.update_bool(self.sudden_death.active);
        hasher.update_u8(self.sudden_death.shrink_level);
        hasher.finalize()
    }
}

// =============================================================================
// TESTS
// =============================================================================
