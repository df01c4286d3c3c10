//! Per-agent, per-action-kind cooldown windows.
//!
//! The ledger holds at most one row per `(agent, kind)`; refreshing a row
//! replaces its expiry. A row is active iff `now < expires_at`. Expired
//! rows are harmless and are pruned by the cleanup loop.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use warband_types::{ActionKind, AgentId, Cooldown};

/// `now + delta`, saturating at the latest representable instant.
pub fn expiry_after(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Cooldown rows keyed by agent and action kind.
#[derive(Debug, Clone, Default)]
pub struct CooldownLedger {
    rows: BTreeMap<(AgentId, ActionKind), DateTime<Utc>>,
}

impl CooldownLedger {
    /// An empty ledger.
    pub const fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    /// Seed the ledger from persisted rows. Later rows win.
    pub fn load(rows: impl IntoIterator<Item = Cooldown>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|c| ((c.agent, c.kind), c.expires_at))
                .collect(),
        }
    }

    /// True iff a row exists and `now` is before its expiry.
    pub fn is_on_cooldown(&self, agent: AgentId, kind: ActionKind, now: DateTime<Utc>) -> bool {
        self.rows
            .get(&(agent, kind))
            .is_some_and(|expires| now < *expires)
    }

    /// Time left on the window; zero when expired or absent.
    pub fn remaining(&self, agent: AgentId, kind: ActionKind, now: DateTime<Utc>) -> TimeDelta {
        self.rows
            .get(&(agent, kind))
            .map_or(TimeDelta::zero(), |expires| {
                expires.signed_duration_since(now).max(TimeDelta::zero())
            })
    }

    /// Expiry of the row, active or not.
    pub fn expires_at(&self, agent: AgentId, kind: ActionKind) -> Option<DateTime<Utc>> {
        self.rows.get(&(agent, kind)).copied()
    }

    /// Upsert the row to expire `duration` after `now`.
    pub fn refresh(
        &mut self,
        agent: AgentId,
        kind: ActionKind,
        duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> Cooldown {
        let expires_at = expiry_after(now, duration);
        self.rows.insert((agent, kind), expires_at);
        Cooldown {
            agent,
            kind,
            expires_at,
        }
    }

    /// Drop every expired row, returning how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, expires| now < *expires);
        before.saturating_sub(self.rows.len())
    }

    /// All rows as records.
    pub fn rows(&self) -> impl Iterator<Item = Cooldown> + '_ {
        self.rows.iter().map(|((agent, kind), expires_at)| Cooldown {
            agent: *agent,
            kind: *kind,
            expires_at: *expires_at,
        })
    }

    /// Number of rows, expired ones included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the ledger holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
