//! Rules, bookkeeping, and battle math for the Warband engine.
//!
//! This crate is the logic layer: everything that reads or mutates game
//! state without touching I/O. The core crate wraps it with locking,
//! settlement calls, and persistence.
//!
//! # Modules
//!
//! - [`alliance`] -- Alliance history ([`AllianceBook`]).
//! - [`battle`] -- Grouping by open-battle marker and side construction.
//! - [`combat`] -- Outcome probability and loss percentage.
//! - [`config`] -- Tunable game rules ([`RulesConfig`]).
//! - [`cooldown`] -- Per-agent, per-kind cooldown windows ([`CooldownLedger`]).
//! - [`death`] -- Death rolls and consequences.
//! - [`error`] -- Bookkeeping errors ([`AgentError`]).
//! - [`handlers`] -- Local commit of validated actions and battle results.
//! - [`ignore`] -- Pairwise ignore windows ([`IgnoreBook`]).
//! - [`validation`] -- Structural checks producing an [`ActionPlan`].
//! - [`world_state`] -- The mutable state container ([`WorldState`]).

pub mod alliance;
pub mod battle;
pub mod combat;
pub mod config;
pub mod cooldown;
pub mod death;
pub mod error;
pub mod handlers;
pub mod ignore;
pub mod validation;
pub mod world_state;

pub use alliance::AllianceBook;
pub use battle::{GroupShape, group_by_marker, shape_group};
pub use combat::{CombatDraws, CombatOutcome, OutcomePolicy, decide_outcome, roll_outcome, side_power};
pub use config::RulesConfig;
pub use cooldown::{CooldownLedger, expiry_after};
pub use death::{apply_death, roll_battle_deaths};
pub use error::AgentError;
pub use handlers::{Applied, Resolution, apply_abandon, apply_plan, apply_resolution};
pub use ignore::IgnoreBook;
pub use validation::{ActionPlan, ValidationContext, lock_set, validate};
pub use world_state::{BattleLog, WorldState};
