//! Continuous 2D Vector
//!
//! Player positions are continuous floats in tile units. All rule checks
//! (collision, pickup, zone, hit detection) go through the integer tile
//! projection returned by [`Vec2::tile`].

use std::fmt;
use std::ops::{Add, Sub, Neg};
use serde::{Serialize, Deserialize};

/// Integer tile coordinate `(x, y)`.
pub type TilePos = (i32, i32);

/// 2D vector in tile units.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// X component (columns, grows to the right)
    pub x: f32,
    /// Y component (rows, grows downward)
    pub y: f32,
}

impl Vec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Center of the given tile.
    #[inline]
    pub fn tile_center(tile: TilePos) -> Self {
        Self {
            x: tile.0 as f32 + 0.5,
            y: tile.1 as f32 + 0.5,
        }
    }

    /// Tile this point lies in (`floor(x), floor(y)`).
    #[inline]
    pub fn tile(self) -> TilePos {
        (self.x.floor() as i32, self.y.floor() as i32)
    }

    /// Scale by a scalar.
    #[inline]
    pub fn scale(self, scalar: f32) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    /// Squared length.
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Length.
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Move `t` of the way toward `other`.
    #[inline]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self).scale(t)
    }

    /// True if both components are finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl fmt::Debug for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vec2({:.3}, {:.3})", self.x, self.y)
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_projection_floors() {
        assert_eq!(Vec2::new(1.5, 1.5).tile(), (1, 1));
        assert_eq!(Vec2::new(1.99, 2.01).tile(), (1, 2));
        assert_eq!(Vec2::new(-0.1, 0.0).tile(), (-1, 0));
    }

    #[test]
    fn test_tile_center() {
        let c = Vec2::tile_center((3, 4));
        assert_eq!(c, Vec2::new(3.5, 4.5));
        assert_eq!(c.tile(), (3, 4));
    }

    #[test]
    fn test_lerp() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(10.0, -10.0);
        assert_eq!(a.lerp(b, 0.5), Vec2::new(5.0, -5.0));
        assert_eq!(a.lerp(b, 1.0), b);
    }

    #[test]
    fn test_distance() {
        let a = Vec2::new(1.0, 1.0);
        let b = Vec2::new(4.0, 5.0);
        assert!((a.distance(b) - 5.0).abs() < 1e-6);
    }
}
