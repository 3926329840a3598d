//! Input Capture and Normalization
//!
//! Held-key state for the local player, reduced to at most one cardinal
//! direction per tick. Diagonals are never produced.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;

/// One of the four cardinal directions. Row indices grow downward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward row 0
    Up,
    /// Toward the last row
    Down,
    /// Toward column 0
    Left,
    /// Toward the last column
    Right,
}

impl Direction {
    /// All directions in blast-walk order.
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    /// Unit tile offset.
    #[inline]
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// Unit vector in tile space.
    #[inline]
    pub fn unit(self) -> Vec2 {
        let (dx, dy) = self.delta();
        Vec2::new(dx as f32, dy as f32)
    }

    /// Whether the direction moves along the x axis.
    #[inline]
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}

/// Raw input state for a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Action flags (packed bits):
    /// - Bit 0: up held
    /// - Bit 1: down held
    /// - Bit 2: left held
    /// - Bit 3: right held
    /// - Bit 4: place bomb pressed this frame
    /// - Bit 5-7: Reserved
    pub flags: u8,
}

impl InputFrame {
    /// Up flag bit
    pub const FLAG_UP: u8 = 0x01;

    /// Down flag bit
    pub const FLAG_DOWN: u8 = 0x02;

    /// Left flag bit
    pub const FLAG_LEFT: u8 = 0x04;

    /// Right flag bit
    pub const FLAG_RIGHT: u8 = 0x08;

    /// Place-bomb flag bit
    pub const FLAG_BOMB: u8 = 0x10;

    /// Create a new empty input frame.
    pub const fn new() -> Self {
        Self { flags: 0 }
    }

    /// Frame holding a single direction.
    pub const fn held(direction: Direction) -> Self {
        let flags = match direction {
            Direction::Up => Self::FLAG_UP,
            Direction::Down => Self::FLAG_DOWN,
            Direction::Left => Self::FLAG_LEFT,
            Direction::Right => Self::FLAG_RIGHT,
        };
        Self { flags }
    }

    /// Builder: also press the bomb key.
    pub const fn with_bomb(mut self) -> Self {
        self.flags |= Self::FLAG_BOMB;
        self
    }

    #[inline]
    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Set or clear a flag.
    #[inline]
    pub fn set(&mut self, flag: u8, pressed: bool) {
        if pressed {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Check if place-bomb was pressed this frame.
    #[inline]
    pub fn bomb_pressed(&self) -> bool {
        self.has(Self::FLAG_BOMB)
    }

    /// Check if this is an idle frame (no input).
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.flags == 0
    }

    /// Resolve held keys to a single direction.
    ///
    /// Vertical axis is checked first. Opposite keys on one axis cancel, which
    /// lets the other axis win.
    pub fn direction(&self) -> Option<Direction> {
        let vertical = match (self.has(Self::FLAG_UP), self.has(Self::FLAG_DOWN)) {
            (true, false) => Some(Direction::Up),
            (false, true) => Some(Direction::Down),
            _ => None,
        };
        let horizontal = match (self.has(Self::FLAG_LEFT), self.has(Self::FLAG_RIGHT)) {
            (true, false) => Some(Direction::Left),
            (false, true) => Some(Direction::Right),
            _ => None,
        };
        vertical.or(horizontal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_keys() {
        assert_eq!(InputFrame::held(Direction::Up).direction(), Some(Direction::Up));
        assert_eq!(InputFrame::held(Direction::Right).direction(), Some(Direction::Right));
        assert_eq!(InputFrame::new().direction(), None);
        assert!(InputFrame::new().is_idle());
    }

    #[test]
    fn test_no_diagonals() {
        let mut input = InputFrame::new();
        input.set(InputFrame::FLAG_UP, true);
        input.set(InputFrame::FLAG_RIGHT, true);
        assert_eq!(input.direction(), Some(Direction::Up));

        // Cancelled vertical axis hands over to horizontal
        input.set(InputFrame::FLAG_DOWN, true);
        assert_eq!(input.direction(), Some(Direction::Right));

        input.set(InputFrame::FLAG_LEFT, true);
        assert_eq!(input.direction(), None);
    }

    #[test]
    fn test_bomb_flag() {
        let input = InputFrame::held(Direction::Left).with_bomb();
        assert!(input.bomb_pressed());
        assert_eq!(input.direction(), Some(Direction::Left));

        let mut input = input;
        input.set(InputFrame::FLAG_BOMB, false);
        assert!(!input.bomb_pressed());
    }

    #[test]
    fn test_deltas_grow_downward() {
        assert_eq!(Direction::Up.delta(), (0, -1));
        assert_eq!(Direction::Down.delta(), (0, 1));
        assert_eq!(Direction::Left.unit(), Vec2::new(-1.0, 0.0));
        assert!(Direction::Right.is_horizontal());
        assert!(!Direction::Down.is_horizontal());
    }
}
