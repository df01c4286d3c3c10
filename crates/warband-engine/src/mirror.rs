//! [`StateMirror`] over `warband-db`.
//!
//! Each commit's change set goes to `PostgreSQL` in one transaction,
//! followed by its narrative events. Cooldown rows are also written to
//! `Dragonfly` when a cache is configured.

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use warband_core::{MirrorError, NoopMirror, StateMirror};
use warband_db::{DbError, DragonflyPool, EventStore, PostgresPool, StateStore};
use warband_types::{Cooldown, GameId, NarrativeEvent, StateChanges};

/// Relational mirror with an optional cooldown cache.
pub struct PgMirror {
    game: GameId,
    url: String,
    pg: RwLock<PostgresPool>,
    cache: Option<DragonflyPool>,
}

impl PgMirror {
    /// Wrap connected pools. `url` is used to reconnect.
    pub fn new(game: GameId, url: &str, pg: PostgresPool, cache: Option<DragonflyPool>) -> Self {
        Self {
            game,
            url: url.to_owned(),
            pg: RwLock::new(pg),
            cache,
        }
    }

    async fn pool(&self) -> PostgresPool {
        self.pg.read().await.clone()
    }
}

impl StateMirror for PgMirror {
    async fn persist(
        &self,
        changes: &StateChanges,
        events: &[NarrativeEvent],
        now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        let pg = self.pool().await;
        StateStore::new(pg.pool())
            .apply_changes(self.game, changes)
            .await
            .map_err(mirror_error)?;
        if !events.is_empty() {
            EventStore::new(pg.pool())
                .batch_insert(self.game, events)
                .await
                .map_err(mirror_error)?;
        }
        if let Some(cache) = &self.cache {
            for cooldown in &changes.cooldowns {
                cache
                    .set_cooldown(cooldown, now)
                    .await
                    .map_err(mirror_error)?;
            }
        }
        Ok(())
    }

    async fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<u64, MirrorError> {
        let pg = self.pool().await;
        StateStore::new(pg.pool())
            .prune_history(self.game, cutoff)
            .await
            .map_err(mirror_error)
    }

    async fn reset_cooldown_cache(
        &self,
        live: &[Cooldown],
        now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let removed = cache.reset_cooldowns().await.map_err(mirror_error)?;
        for cooldown in live {
            cache.set_cooldown(cooldown, now).await.map_err(mirror_error)?;
        }
        info!(removed, rebuilt = live.len(), "Cooldown cache rebuilt");
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), MirrorError> {
        let fresh = PostgresPool::reopen(&self.url).await.map_err(mirror_error)?;
        let stale = std::mem::replace(&mut *self.pg.write().await, fresh);
        stale.close().await;
        info!(game_id = %self.game, "PostgreSQL mirror reconnected");
        Ok(())
    }

    async fn close(&self) -> Result<(), MirrorError> {
        self.pg.read().await.close().await;
        if let Some(cache) = &self.cache
            && let Err(e) = cache.quit().await
        {
            warn!(error = %e, "Dragonfly quit failed");
            return Err(mirror_error(e));
        }
        Ok(())
    }
}

/// Classify a data layer failure for the orchestrator's recovery paths.
fn mirror_error(e: DbError) -> MirrorError {
    match e {
        e if e.is_connection_loss() => MirrorError::Unavailable {
            message: e.to_string(),
        },
        DbError::Dragonfly(e) => MirrorError::Cache {
            message: e.to_string(),
        },
        other => MirrorError::Write {
            message: other.to_string(),
        },
    }
}

/// The mirrors the binary can run with.
pub enum EngineMirror {
    /// `PostgreSQL` plus the optional cooldown cache.
    Postgres(PgMirror),
    /// Persistence disabled.
    Noop(NoopMirror),
}

impl StateMirror for EngineMirror {
    async fn persist(
        &self,
        changes: &StateChanges,
        events: &[NarrativeEvent],
        now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        match self {
            Self::Postgres(m) => m.persist(changes, events, now).await,
            Self::Noop(m) => m.persist(changes, events, now).await,
        }
    }

    async fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<u64, MirrorError> {
        match self {
            Self::Postgres(m) => m.prune_history(cutoff).await,
            Self::Noop(m) => m.prune_history(cutoff).await,
        }
    }

    async fn reset_cooldown_cache(
        &self,
        live: &[Cooldown],
        now: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        match self {
            Self::Postgres(m) => m.reset_cooldown_cache(live, now).await,
            Self::Noop(m) => m.reset_cooldown_cache(live, now).await,
        }
    }

    async fn reconnect(&self) -> Result<(), MirrorError> {
        match self {
            Self::Postgres(m) => m.reconnect().await,
            Self::Noop(m) => m.reconnect().await,
        }
    }

    async fn close(&self) -> Result<(), MirrorError> {
        match self {
            Self::Postgres(m) => m.close().await,
            Self::Noop(m) => m.close().await,
        }
    }
}
