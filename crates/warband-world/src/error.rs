//! Error types for the `warband-world` crate.

use warband_types::Position;

/// Errors that can occur during geometry calculations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// A distance was negative, NaN, or infinite.
    #[error("invalid distance: {0}")]
    InvalidDistance(f64),

    /// A movement cost does not fit the cost unit.
    #[error("movement cost overflow for distance {0}")]
    CostOverflow(f64),

    /// A terrain region has its corners swapped.
    #[error("terrain region corners out of order: {min} > {max}")]
    InvertedRegion {
        /// Lower-left corner as given.
        min: Position,
        /// Upper-right corner as given.
        max: Position,
    },
}
