//! Narrative event history.
//!
//! Every broadcast event is also appended here so the story of a game can
//! be replayed after the social service has forgotten it.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use warband_types::{GameId, NarrativeEvent};

use crate::error::DbError;

/// Default batch size for event inserts.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Operations on the `narrative_events` table.
pub struct EventStore<'a> {
    pool: &'a PgPool,
    batch_size: usize,
}

impl<'a> EventStore<'a> {
    /// Create an event store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the batch size for inserts.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Batch-insert events with one `UNNEST` insert per chunk.
    ///
    /// Re-inserting an event id is a no-op.
    pub async fn batch_insert(&self, game: GameId, events: &[NarrativeEvent]) -> Result<(), DbError> {
        if events.is_empty() {
            return Ok(());
        }
        let game_id = i64::try_from(game.get())
            .map_err(|_e| DbError::InvalidRow(format!("game id out of range: {game}")))?;

        for chunk in events.chunks(self.batch_size.max(1)) {
            let len = chunk.len();
            let mut ids = Vec::with_capacity(len);
            let mut types = Vec::with_capacity(len);
            let mut payloads = Vec::with_capacity(len);
            let mut times = Vec::with_capacity(len);
            for event in chunk {
                let payload = serde_json::to_value(event)?;
                ids.push(event.id.into_inner());
                types.push(
                    payload
                        .get("type")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("unknown")
                        .to_owned(),
                );
                payloads.push(payload);
                times.push(event.occurred_at);
            }

            sqlx::query(
                r"INSERT INTO narrative_events (event_id, game_id, event_type, payload, occurred_at)
                  SELECT u.id, $1, u.kind, u.payload, u.at
                  FROM UNNEST($2::UUID[], $3::TEXT[], $4::JSONB[], $5::TIMESTAMPTZ[])
                    AS u(id, kind, payload, at)
                  ON CONFLICT (event_id) DO NOTHING",
            )
            .bind(game_id)
            .bind(&ids)
            .bind(&types)
            .bind(&payloads)
            .bind(&times)
            .execute(self.pool)
            .await?;
        }

        tracing::debug!(count = events.len(), "Inserted narrative events");
        Ok(())
    }

    /// The most recent events of a game, newest first.
    pub async fn recent(&self, game: GameId, limit: u32) -> Result<Vec<EventRow>, DbError> {
        let game_id = i64::try_from(game.get())
            .map_err(|_e| DbError::InvalidRow(format!("game id out of range: {game}")))?;
        let rows = sqlx::query_as::<_, EventRow>(
            r"SELECT event_id, event_type, payload, occurred_at
              FROM narrative_events
              WHERE game_id = $1
              ORDER BY occurred_at DESC, event_id DESC
              LIMIT $2",
        )
        .bind(game_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}

/// A row from the `narrative_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event id.
    pub event_id: Uuid,
    /// Payload tag, e.g. `battle_resolved`.
    pub event_type: String,
    /// The full serialized event.
    pub payload: serde_json::Value,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

impl EventRow {
    /// Decode the stored event.
    pub fn decode(&self) -> Result<NarrativeEvent, DbError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
