//! Collision Detection
//!
//! Square hit box against the tile grid. A position is occupiable when all
//! four corners of the box land on tiles the mover may enter.

use crate::core::vec2::{TilePos, Vec2};
use crate::game::state::{PlayerId, Room};

/// Corner points of a square hit box centred on `center`.
#[inline]
pub fn corners(center: Vec2, half_width: f32) -> [Vec2; 4] {
    [
        Vec2::new(center.x - half_width, center.y - half_width),
        Vec2::new(center.x + half_width, center.y - half_width),
        Vec2::new(center.x - half_width, center.y + half_width),
        Vec2::new(center.x + half_width, center.y + half_width),
    ]
}

/// Whether a tile stops `mover`.
///
/// Walls, crates and the outside of the board always block. A bomb blocks
/// everyone except its owner.
pub fn tile_blocks(room: &Room, tile: TilePos, mover: &PlayerId) -> bool {
    let (x, y) = tile;
    match room.grid.get(x, y) {
        None => true,
        Some(t) if t.blocks_movement() => true,
        Some(_) => room
            .bomb_at(tile)
            .map(|bomb| bomb.owner_id != *mover)
            .unwrap_or(false),
    }
}

/// Whether `mover`'s hit box fits at `center`.
pub fn can_occupy(room: &Room, center: Vec2, half_width: f32, mover: &PlayerId) -> bool {
    corners(center, half_width)
        .iter()
        .all(|corner| !tile_blocks(room, corner.tile(), mover))
}

/// Living players whose tile is in `tiles`, in id order.
pub fn players_on_tiles(room: &Room, tiles: &[TilePos]) -> Vec<PlayerId> {
    room.players
        .values()
        .filter(|p| p.is_alive && tiles.contains(&p.tile()))
        .map(|p| p.id)
        .collect()
}
