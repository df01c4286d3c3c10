//! The durable mirror seam.
//!
//! The world state in memory is authoritative for the running engine;
//! the relational store is a mirror written after every commit and read
//! back on restart. [`StateMirror`] abstracts it so the core never depends
//! on a database driver. The engine implements it over `warband-db`.

use std::future::Future;

use chrono::{DateTime, Utc};
use warband_types::{Cooldown, NarrativeEvent, StateChanges};

use crate::error::OrchestratorError;

/// Errors raised by a mirror.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The store could not be reached.
    #[error("mirror unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A read or write was refused.
    #[error("mirror write failed: {message}")]
    Write {
        /// Description of the failure.
        message: String,
    },

    /// The cooldown cache failed.
    #[error("cooldown cache failed: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },
}

impl From<MirrorError> for OrchestratorError {
    fn from(e: MirrorError) -> Self {
        match e {
            MirrorError::Cache { message } => Self::Cache { message },
            MirrorError::Unavailable { message } | MirrorError::Write { message } => {
                Self::Store { message }
            }
        }
    }
}

/// Durable copy of the game state.
pub trait StateMirror: Send + Sync + 'static {
    /// Upsert the records one commit touched and append its events.
    fn persist(
        &self,
        changes: &StateChanges,
        events: &[NarrativeEvent],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), MirrorError>> + Send;

    /// Delete resolved history older than `cutoff`, returning rows removed.
    fn prune_history(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, MirrorError>> + Send;

    /// Drop the cooldown cache and rebuild it from `live`.
    fn reset_cooldown_cache(
        &self,
        live: &[Cooldown],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), MirrorError>> + Send;

    /// Re-establish the store connection.
    fn reconnect(&self) -> impl Future<Output = Result<(), MirrorError>> + Send;

    /// Release connections.
    fn close(&self) -> impl Future<Output = Result<(), MirrorError>> + Send;
}

/// A mirror that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMirror;

impl StateMirror for NoopMirror {
    async fn persist(
        &self,
        _changes: &StateChanges,
        _events: &[NarrativeEvent],
        _now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn prune_history(&self, _cutoff: DateTime<Utc>) -> Result<u64, MirrorError> {
        Ok(0)
    }

    async fn reset_cooldown_cache(
        &self,
        _live: &[Cooldown],
        _now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), MirrorError> {
        Ok(())
    }
}
