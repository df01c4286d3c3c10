//! Ignore windows between pairs of agents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use warband_types::{AgentId, IgnoreRecord};

/// Open ignore windows keyed by `(actor, target)`.
#[derive(Debug, Clone, Default)]
pub struct IgnoreBook {
    windows: BTreeMap<(AgentId, AgentId), DateTime<Utc>>,
}

impl IgnoreBook {
    /// An empty book.
    pub const fn new() -> Self {
        Self {
            windows: BTreeMap::new(),
        }
    }

    /// Seed the book from persisted records.
    pub fn load(records: impl IntoIterator<Item = IgnoreRecord>) -> Self {
        Self {
            windows: records
                .into_iter()
                .map(|r| ((r.actor, r.target), r.expires_at))
                .collect(),
        }
    }

    /// Whether `actor` is ignoring `target` at `now`.
    pub fn is_ignoring(&self, actor: AgentId, target: AgentId, now: DateTime<Utc>) -> bool {
        self.windows
            .get(&(actor, target))
            .is_some_and(|until| now < *until)
    }

    /// End of the window for the pair, if one was recorded.
    pub fn until(&self, actor: AgentId, target: AgentId) -> Option<DateTime<Utc>> {
        self.windows.get(&(actor, target)).copied()
    }

    /// Open (or replace) the window for the pair.
    pub fn record(
        &mut self,
        actor: AgentId,
        target: AgentId,
        expires_at: DateTime<Utc>,
    ) -> IgnoreRecord {
        self.windows.insert((actor, target), expires_at);
        IgnoreRecord {
            actor,
            target,
            expires_at,
        }
    }

    /// Targets `actor` is currently ignoring.
    pub fn ignored_by(&self, actor: AgentId, now: DateTime<Utc>) -> Vec<AgentId> {
        self.windows
            .iter()
            .filter(|((a, _), until)| *a == actor && now < **until)
            .map(|((_, t), _)| *t)
            .collect()
    }

    /// Drop every closed window, returning how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, until| now < *until);
        before.saturating_sub(self.windows.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    #[test]
    fn windows_are_directional() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut book = IgnoreBook::new();
        book.record(AgentId(1), AgentId(2), t0 + TimeDelta::hours(4));
        assert!(book.is_ignoring(AgentId(1), AgentId(2), t0));
        assert!(!book.is_ignoring(AgentId(2), AgentId(1), t0));
        assert_eq!(book.ignored_by(AgentId(1), t0), vec![AgentId(2)]);
    }

    #[test]
    fn prune_closes_expired_windows() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut book = IgnoreBook::new();
        book.record(AgentId(1), AgentId(2), t0 + TimeDelta::hours(1));
        book.record(AgentId(1), AgentId(3), t0 + TimeDelta::hours(5));
        assert_eq!(book.prune(t0 + TimeDelta::hours(4)), 1);
        assert!(!book.is_ignoring(AgentId(1), AgentId(2), t0));
        assert!(book.is_ignoring(AgentId(1), AgentId(3), t0 + TimeDelta::hours(4)));
    }
}
