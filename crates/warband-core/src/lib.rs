//! Engine core for Warband.
//!
//! This crate turns the pure rules of `warband-agents` into a running
//! game: it locks agents, talks to the settlement program, mirrors
//! results into local state, and drives the periodic loops.
//!
//! # Modules
//!
//! - [`config`] -- YAML engine configuration with environment overrides
//! - [`state`] -- shared [`GameContext`] and world seeding/restore
//! - [`locks`] -- per-agent mutexes acquired in ascending id order
//! - [`action_manager`] -- validate, settle and commit one action
//! - [`battle_resolver`] -- periodic settlement of open battles
//! - [`kills`] -- `killAgent` calls and the pending-kill queue
//! - [`perception`] -- per-agent views for the decision source
//! - [`decision`] -- the [`DecisionSource`] trait and simple sources
//! - [`social`] -- non-blocking narrative broadcast
//! - [`mirror`] -- the durable store seam
//! - [`orchestrator`] -- decision, executor, battle and cleanup loops
//! - [`retry`] -- bounded fixed-delay retries
//! - [`shutdown`] -- cooperative stop signal
//! - [`clock`] -- wall and manual clocks
//! - [`error`] -- orchestrator error classification

pub mod action_manager;
pub mod battle_resolver;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod kills;
pub mod locks;
pub mod mirror;
pub mod orchestrator;
pub mod perception;
pub mod retry;
pub mod shutdown;
pub mod social;
pub mod state;

pub use action_manager::{ActionError, ActionManager, ActionOutcome};
pub use battle_resolver::{BattleResolver, GroupResult, ResolveError, SkipReason, SweepReport};
pub use clock::{GameClock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use decision::{DecisionError, DecisionSource, ScriptedDecisionSource, StubDecisionSource};
pub use error::{OrchestratorError, RecoveryAction};
pub use locks::{AgentLocks, LockSet, MarkerReservation, MarkerReservations};
pub use mirror::{MirrorError, NoopMirror, StateMirror};
pub use orchestrator::{
    CleanupReport, Collaborators, GameOrchestrator, OrchestratorHandle, QueuedAction,
};
pub use perception::{AgentView, NearbyAgent, build_view};
pub use retry::{RetryError, RetryPolicy};
pub use shutdown::ShutdownSignal;
pub use social::{BroadcastError, BroadcastHandle, Broadcaster, LogBroadcaster, NullBroadcaster};
pub use state::{GameContext, RestoredRows, restore_world, seed_world};
