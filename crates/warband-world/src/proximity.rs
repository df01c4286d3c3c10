//! Euclidean distance between grid positions.

use warband_types::Position;

/// Euclidean distance between two positions.
pub fn distance(a: Position, b: Position) -> f64 {
    let dx = f64::from(a.x) - f64::from(b.x);
    let dy = f64::from(a.y) - f64::from(b.y);
    dx.hypot(dy)
}

/// Whether `b` is within `range` of `a` (inclusive).
pub fn within_range(a: Position, b: Position, range: f64) -> bool {
    distance(a, b) <= range
}
