//! Arena Grid
//!
//! Classic pillar-and-crate layout: solid border, indestructible pillars on
//! every even/even tile, random crates everywhere else except the spawn
//! corners.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::core::vec2::{TilePos, Vec2};

/// Grid width in tiles.
pub const GRID_WIDTH: usize = 15;

/// Grid height in tiles.
pub const GRID_HEIGHT: usize = 13;

/// Default share of free tiles that start as crates.
pub const CRATE_DENSITY_PERCENT: u32 = 70;

/// Maximum Manhattan distance from a spawn kept clear of crates.
const SPAWN_SAFE_DISTANCE: i32 = 2;

/// Type of a single tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TileType {
    /// Open floor
    Empty = 0,
    /// Indestructible wall
    Wall = 1,
    /// Destructible crate
    Crate = 2,
    /// Pickup: +1 bomb capacity
    PowerupBomb = 3,
    /// Pickup: +1 blast radius
    PowerupRadius = 4,
    /// Pickup: +0.2 speed
    PowerupSpeed = 5,
}

impl TileType {
    /// Permanent terrain check. Only walls are never walkable.
    #[inline]
    pub fn is_walkable(self) -> bool {
        self != TileType::Wall
    }

    /// Whether the tile currently stops a moving player.
    #[inline]
    pub fn blocks_movement(self) -> bool {
        matches!(self, TileType::Wall | TileType::Crate)
    }

    /// Whether the tile is a pickup.
    #[inline]
    pub fn is_powerup(self) -> bool {
        matches!(
            self,
            TileType::PowerupBomb | TileType::PowerupRadius | TileType::PowerupSpeed
        )
    }

    /// Allowed in-round transitions: crates break, pickups get taken.
    ///
    /// Replicas use this to refuse stale writes that would put a crate back.
    pub fn can_become(self, next: TileType) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (TileType::Crate, b) => b == TileType::Empty || b.is_powerup(),
            (a, TileType::Empty) => a.is_powerup(),
            _ => false,
        }
    }

    /// Single-character form for debug output.
    pub fn glyph(self) -> char {
        match self {
            TileType::Empty => '.',
            TileType::Wall => '#',
            TileType::Crate => 'x',
            TileType::PowerupBomb => 'b',
            TileType::PowerupRadius => 'r',
            TileType::PowerupSpeed => 's',
        }
    }
}

/// Fixed-size tile matrix, row-major.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    tiles: Vec<TileType>,
}

impl Grid {
    /// Create a grid filled with one tile type.
    pub fn filled(width: usize, height: usize, tile: TileType) -> Self {
        Self {
            width,
            height,
            tiles: vec![tile; width * height],
        }
    }

    /// Width in tiles.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tiles.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether the coordinate lies on the board.
    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if self.in_bounds(x, y) {
            Some(y as usize * self.width + x as usize)
        } else {
            None
        }
    }

    /// Tile at a coordinate, `None` off the board.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> Option<TileType> {
        self.index(x, y).map(|i| self.tiles[i])
    }

    /// Overwrite a tile. Returns false off the board.
    pub fn set(&mut self, x: i32, y: i32, tile: TileType) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.tiles[i] = tile;
                true
            }
            None => false,
        }
    }

    /// Tile under a continuous position.
    #[inline]
    pub fn tile_at(&self, position: Vec2) -> Option<TileType> {
        let (x, y) = position.tile();
        self.get(x, y)
    }

    /// Number of tiles of the given type.
    pub fn count(&self, tile: TileType) -> usize {
        self.tiles.iter().filter(|t| **t == tile).count()
    }

    /// Iterate over `((x, y), tile)`.
    pub fn iter(&self) -> impl Iterator<Item = (TilePos, TileType)> + '_ {
        self.tiles.iter().enumerate().map(move |(i, t)| {
            (((i % self.width) as i32, (i / self.width) as i32), *t)
        })
    }

    /// The four spawn corners in join order.
    pub fn spawn_points(&self) -> [TilePos; 4] {
        spawn_points(self.width, self.height)
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.tiles.chunks(self.width) {
            let line: String = row.iter().map(|t| t.glyph()).collect();
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Spawn corners for a board of the given size: top-left, top-right,
/// bottom-left, bottom-right.
pub fn spawn_points(width: usize, height: usize) -> [TilePos; 4] {
    let right = width as i32 - 2;
    let bottom = height as i32 - 2;
    [(1, 1), (right, 1), (1, bottom), (right, bottom)]
}

/// Whether a tile is a permanent wall (border or pillar).
#[inline]
pub fn is_permanent_wall(width: usize, height: usize, x: i32, y: i32) -> bool {
    let on_border = x == 0 || y == 0 || x == width as i32 - 1 || y == height as i32 - 1;
    let pillar = x % 2 == 0 && y % 2 == 0;
    on_border || pillar
}

/// Whether a tile is kept clear around a spawn corner.
pub fn is_spawn_safe(width: usize, height: usize, x: i32, y: i32) -> bool {
    spawn_points(width, height)
        .iter()
        .any(|(sx, sy)| (x - sx).abs() + (y - sy).abs() <= SPAWN_SAFE_DISTANCE)
}

/// Generate the standard 15x13 arena.
pub fn generate_grid(rng: &mut DeterministicRng) -> Grid {
    generate_grid_with(GRID_WIDTH, GRID_HEIGHT, CRATE_DENSITY_PERCENT, rng)
}

/// Generate an arena of arbitrary size and crate density.
pub fn generate_grid_with(
    width: usize,
    height: usize,
    crate_density_percent: u32,
    rng: &mut DeterministicRng,
) -> Grid {
    let mut grid = Grid::filled(width, height, TileType::Empty);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let tile = if is_permanent_wall(width, height, x, y) {
                TileType::Wall
            } else if is_spawn_safe(width, height, x, y) {
                TileType::Empty
            } else if rng.percent(crate_density_percent) {
                TileType::Crate
            } else {
                TileType::Empty
            };
            grid.set(x, y, tile);
        }
    }

    grid
}
