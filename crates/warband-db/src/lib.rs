//! Data layer for the Warband engine (`PostgreSQL` + `Dragonfly`).
//!
//! `PostgreSQL` is the durable mirror: every committed operation's
//! `StateChanges` set is upserted after the settlement program accepted it,
//! and the open session is reloaded from it on restart. `Dragonfly` caches
//! live cooldown rows with TTLs so other services can read them cheaply.
//!
//! ```text
//! Commit
//!     |
//!     +-- StateStore::apply_changes --> PostgreSQL (one transaction)
//!     +-- EventStore::batch_insert  --> PostgreSQL (narrative history)
//!     +-- DragonflyPool::set_cooldown --> Dragonfly (TTL keys)
//! ```
//!
//! # Modules
//!
//! - [`dragonfly`] -- Cooldown cache operations
//! - [`postgres`] -- Opening and verifying the mirror connection
//! - [`state_store`] -- Upserts, reloads, and history pruning
//! - [`event_store`] -- Narrative event history
//! - [`error`] -- Shared error types

pub mod dragonfly;
pub mod error;
pub mod event_store;
pub mod postgres;
pub mod state_store;

pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use event_store::{EventRow, EventStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use state_store::{SessionSnapshot, StateStore};
