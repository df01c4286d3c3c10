//! Shared type definitions for the Warband action and battle engine.
//!
//! This crate is the single source of truth for the records exchanged
//! between the validator, the battle resolver, the orchestrator, and the
//! external collaborators (ledger gateway, relational mirror, social
//! broadcaster, decision source).
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifiers (numeric agent ids, UUID record ids)
//! - [`enums`] -- Action kinds, terrain, battle and alliance lifecycles
//! - [`structs`] -- Agents, alliances, cooldowns, battles, game session
//! - [`actions`] -- Candidate actions and their structured rejection feedback
//! - [`events`] -- Narrative events handed to the social broadcaster

pub mod actions;
pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use actions::{GameAction, RejectionReason, ValidationFeedback};
pub use enums::{
    ActionKind, AllianceStatus, BattleSide, BattleStatus, BattleType, GameEndReason, Terrain,
};
pub use events::{DeathCause, NarrativeEvent, NarrativePayload};
pub use ids::{AgentId, AllianceId, EventId, GameId};
pub use structs::{
    Agent, Alliance, Battle, BattleOutcome, Cooldown, GameSession, IgnoreRecord, Position,
    StateChanges,
};
