//! Terrain movement profiles and the terrain map.
//!
//! | Terrain  | Speed | Death risk | Cost      |
//! |----------|-------|------------|-----------|
//! | Plains   | 1.0   | 0.00       | ceil(d)   |
//! | Mountain | 0.5   | 0.05       | ceil(2d)  |
//! | River    | 0.3   | 0.05       | ceil(3d)  |
//!
//! The terrain map defaults to [`Terrain::Plains`] everywhere. Rectangular
//! regions and single cells override it; a cell beats a region, and later
//! regions beat earlier ones.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use warband_types::{Position, Terrain};

use crate::error::WorldError;

// ---------------------------------------------------------------------------
// Movement profile
// ---------------------------------------------------------------------------

/// Speed, risk, and cost of moving a given distance into a terrain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementProfile {
    /// Fraction of baseline speed. Scales the move cooldown by its inverse.
    pub speed_multiplier: f64,
    /// Probability in `[0, 1]` that the mover dies on the way.
    pub death_risk: f64,
    /// Movement cost in whole units, rounded up.
    pub cost: u64,
}

impl MovementProfile {
    /// Roll the terrain death chance with the supplied random source.
    pub fn roll_death<R: Rng>(&self, rng: &mut R) -> bool {
        self.death_risk > 0.0 && rng.random::<f64>() < self.death_risk
    }
}

/// Speed multiplier, death risk, and cost multiplier for a terrain.
const fn terrain_factors(terrain: Terrain) -> (f64, f64, f64) {
    match terrain {
        Terrain::Plains => (1.0, 0.0, 1.0),
        Terrain::Mountain => (0.5, 0.05, 2.0),
        Terrain::River => (0.3, 0.05, 3.0),
    }
}

/// Compute the movement profile for travelling `distance` into `terrain`.
///
/// # Errors
///
/// Returns [`WorldError::InvalidDistance`] for negative or non-finite
/// distances and [`WorldError::CostOverflow`] when the rounded cost does
/// not fit in a `u64`.
pub fn movement_profile(terrain: Terrain, distance: f64) -> Result<MovementProfile, WorldError> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(WorldError::InvalidDistance(distance));
    }
    let (speed_multiplier, death_risk, cost_multiplier) = terrain_factors(terrain);
    let raw = (distance * cost_multiplier).ceil();
    #[allow(clippy::cast_precision_loss)]
    let ceiling = u64::MAX as f64;
    if raw >= ceiling {
        return Err(WorldError::CostOverflow(distance));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cost = raw as u64;
    Ok(MovementProfile {
        speed_multiplier,
        death_risk,
        cost,
    })
}

// ---------------------------------------------------------------------------
// Terrain map
// ---------------------------------------------------------------------------

/// A single-cell terrain override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainCell {
    /// Cell x.
    pub x: i32,
    /// Cell y.
    pub y: i32,
    /// Terrain of the cell.
    pub terrain: Terrain,
}

/// An inclusive rectangular terrain override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainRegion {
    /// Terrain inside the rectangle.
    pub terrain: Terrain,
    /// Lower-left corner.
    pub min: Position,
    /// Upper-right corner.
    pub max: Position,
}

impl TerrainRegion {
    fn contains(&self, position: Position) -> bool {
        (self.min.x..=self.max.x).contains(&position.x)
            && (self.min.y..=self.max.y).contains(&position.y)
    }
}

/// Terrain lookup for every map position.
#[derive(Debug, Clone, Default)]
pub struct TerrainMap {
    cells: BTreeMap<(i32, i32), Terrain>,
    regions: Vec<TerrainRegion>,
}

impl TerrainMap {
    /// A map that is plains everywhere.
    pub fn plains() -> Self {
        Self::default()
    }

    /// Build a map from configured cells and regions.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvertedRegion`] if a region's `min` corner is
    /// above or right of its `max` corner.
    pub fn from_parts(
        cells: &[TerrainCell],
        regions: Vec<TerrainRegion>,
    ) -> Result<Self, WorldError> {
        if let Some(bad) = regions
            .iter()
            .find(|r| r.min.x > r.max.x || r.min.y > r.max.y)
        {
            return Err(WorldError::InvertedRegion {
                min: bad.min,
                max: bad.max,
            });
        }
        let cells = cells.iter().map(|c| ((c.x, c.y), c.terrain)).collect();
        Ok(Self { cells, regions })
    }

    /// Override a single cell.
    pub fn set(&mut self, position: Position, terrain: Terrain) {
        self.cells.insert((position.x, position.y), terrain);
    }

    /// Terrain at `position`.
    pub fn terrain_at(&self, position: Position) -> Terrain {
        if let Some(terrain) = self.cells.get(&(position.x, position.y)) {
            return *terrain;
        }
        self.regions
            .iter()
            .rev()
            .find(|r| r.contains(position))
            .map_or(Terrain::Plains, |r| r.terrain)
    }
}
