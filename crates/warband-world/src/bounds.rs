//! The circular playable area.
//!
//! The map is a disc centred on the origin. A position is inside when its
//! distance from the origin is at most half the diameter. The check is
//! done in integers: `4 * (x^2 + y^2) <= diameter^2`.

use serde::{Deserialize, Serialize};
use warband_types::Position;

/// Default map diameter in grid units.
pub const DEFAULT_MAP_DIAMETER: u32 = 60;

/// Circular map bounds centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapBounds {
    /// Diameter of the playable disc.
    pub diameter: u32,
}

impl Default for MapBounds {
    fn default() -> Self {
        Self {
            diameter: DEFAULT_MAP_DIAMETER,
        }
    }
}

impl MapBounds {
    /// Bounds with the given diameter.
    pub const fn new(diameter: u32) -> Self {
        Self { diameter }
    }

    /// Whether `position` lies on or inside the boundary circle.
    pub fn contains(&self, position: Position) -> bool {
        let x = i128::from(position.x);
        let y = i128::from(position.y);
        let d = i128::from(self.diameter);
        let lhs = x
            .saturating_mul(x)
            .saturating_add(y.saturating_mul(y))
            .saturating_mul(4);
        lhs <= d.saturating_mul(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_inside() {
        assert!(MapBounds::default().contains(Position::new(0, 0)));
    }

    #[test]
    fn edge_of_disc_is_inside() {
        let bounds = MapBounds::new(60);
        assert!(bounds.contains(Position::new(30, 0)));
        assert!(bounds.contains(Position::new(0, -30)));
        assert!(!bounds.contains(Position::new(31, 0)));
    }

    #[test]
    fn corner_of_square_is_outside() {
        let bounds = MapBounds::new(60);
        assert!(!bounds.contains(Position::new(30, 30)));
        assert!(bounds.contains(Position::new(21, 21)));
    }

    #[test]
    fn extreme_coordinates_are_outside() {
        assert!(!MapBounds::default().contains(Position::new(i32::MIN, i32::MAX)));
    }
}
