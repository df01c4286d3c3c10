//! `Dragonfly` (Redis-compatible) cooldown cache.
//!
//! The cache holds one key per live cooldown row with a TTL equal to the
//! time left on the window, so expired rows disappear on their own. An
//! index set lists every key the engine wrote, which lets a reset delete
//! exactly the engine's keys.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `warband:{game}:cooldown:{agent}:{kind}` | String | RFC 3339 expiry, with TTL |
//! | `warband:{game}:cooldowns` | Set | Index of cooldown keys |

use chrono::{DateTime, Utc};
use fred::prelude::*;
use fred::types::Expiration;
use warband_types::{ActionKind, AgentId, Cooldown, GameId};

use crate::error::DbError;

const KINDS: [ActionKind; 4] = [
    ActionKind::Move,
    ActionKind::Battle,
    ActionKind::Alliance,
    ActionKind::Ignore,
];

/// Connection handle to a `Dragonfly` instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
    game_id: GameId,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL follows the Redis scheme: `redis://host:port[/db]`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed and
    /// [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str, game_id: GameId) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(game_id = %game_id, "Connected to Dragonfly");
        Ok(Self { client, game_id })
    }

    fn cooldown_key(&self, agent: AgentId, kind: ActionKind) -> String {
        format!("warband:{}:cooldown:{agent}:{}", self.game_id, kind.as_str())
    }

    fn index_key(&self) -> String {
        format!("warband:{}:cooldowns", self.game_id)
    }

    /// Write a cooldown row with a TTL matching its remaining window.
    ///
    /// Rows that already expired at `now` are not written.
    pub async fn set_cooldown(&self, cooldown: &Cooldown, now: DateTime<Utc>) -> Result<(), DbError> {
        let ttl_ms = cooldown
            .expires_at
            .signed_duration_since(now)
            .num_milliseconds();
        if ttl_ms <= 0 {
            return Ok(());
        }
        let key = self.cooldown_key(cooldown.agent, cooldown.kind);
        let value = cooldown.expires_at.to_rfc3339();
        let _: () = self
            .client
            .set(
                key.as_str(),
                value.as_str(),
                Some(Expiration::PX(ttl_ms)),
                None,
                false,
            )
            .await?;
        let _: u32 = self.client.sadd(self.index_key(), key.as_str()).await?;
        Ok(())
    }

    /// Read a cooldown expiry, if the key is still live.
    pub async fn get_cooldown(
        &self,
        agent: AgentId,
        kind: ActionKind,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let value: Option<String> = self.client.get(self.cooldown_key(agent, kind)).await?;
        value.map(|raw| parse_expiry(&raw)).transpose()
    }

    /// Read every live cooldown for the given agents.
    pub async fn load_cooldowns(&self, agents: &[AgentId]) -> Result<Vec<Cooldown>, DbError> {
        let mut rows = Vec::new();
        for agent in agents {
            for kind in KINDS {
                if let Some(expires_at) = self.get_cooldown(*agent, kind).await? {
                    rows.push(Cooldown {
                        agent: *agent,
                        kind,
                        expires_at,
                    });
                }
            }
        }
        Ok(rows)
    }

    /// Delete every cooldown key this game wrote.
    ///
    /// Returns the number of keys removed.
    pub async fn reset_cooldowns(&self) -> Result<u64, DbError> {
        let keys: Vec<String> = self.client.smembers(self.index_key()).await?;
        let mut removed: u64 = 0;
        for chunk in keys.chunks(256) {
            let n: u64 = self.client.del(chunk.to_vec()).await?;
            removed = removed.saturating_add(n);
        }
        let _: u32 = self.client.del(self.index_key()).await?;
        tracing::info!(game_id = %self.game_id, removed, "Cooldown cache reset");
        Ok(removed)
    }

    /// Flush all keys from the instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Close the connection.
    pub async fn quit(&self) -> Result<(), DbError> {
        self.client.quit().await?;
        Ok(())
    }
}

fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::InvalidRow(format!("bad cooldown expiry {raw:?}: {e}")))
}
