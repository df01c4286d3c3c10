//! Map geometry, proximity, and terrain rules for the Warband engine.
//!
//! Everything in this crate is a pure function of its inputs. The only
//! random element, the terrain death roll, takes the random source as a
//! parameter so callers can seed it.
//!
//! # Modules
//!
//! - [`bounds`] -- The circular playable area.
//! - [`error`] -- Error types for geometry calculations.
//! - [`proximity`] -- Euclidean distance and interaction-range checks.
//! - [`terrain`] -- Per-terrain movement profiles and the terrain map.

pub mod bounds;
pub mod error;
pub mod proximity;
pub mod terrain;

pub use bounds::MapBounds;
pub use error::WorldError;
pub use proximity::{distance, within_range};
pub use terrain::{MovementProfile, TerrainCell, TerrainMap, TerrainRegion, movement_profile};
