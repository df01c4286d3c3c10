//! Per-agent linearization.
//!
//! Every operation that reads then writes an agent (an action, a battle
//! group, a pending kill) holds that agent's mutex for the whole
//! validate, submit, commit sequence. Mutexes are always taken in
//! ascending id order, so two operations with overlapping agent sets
//! cannot deadlock.
//!
//! Battle markers need one more guard. Two battles on disjoint agents run
//! in parallel, and a marker only reaches the world state after the ledger
//! accepted the battle. [`MarkerReservations`] holds each picked marker
//! from selection until the commit, so parallel battles never share one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use warband_types::AgentId;

/// Lazily created mutexes, one per agent.
#[derive(Debug, Default)]
pub struct AgentLocks {
    slots: Mutex<BTreeMap<AgentId, Arc<Mutex<()>>>>,
}

/// Guards for a set of agents, released on drop.
#[derive(Debug)]
pub struct LockSet {
    ids: Vec<AgentId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    /// The locked ids, ascending.
    pub fn ids(&self) -> &[AgentId] {
        &self.ids
    }

    /// Whether every id in `wanted` is already held.
    pub fn covers(&self, wanted: &[AgentId]) -> bool {
        wanted.iter().all(|id| self.ids.binary_search(id).is_ok())
    }
}

impl AgentLocks {
    /// An empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every agent in `ids`, in ascending order.
    ///
    /// Duplicates are ignored. An empty slice yields an empty set.
    pub async fn acquire(&self, ids: &[AgentId]) -> LockSet {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut slots = self.slots.lock().await;
            sorted
                .iter()
                .map(|id| Arc::clone(slots.entry(*id).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        LockSet {
            ids: sorted,
            _guards: guards,
        }
    }
}

type MarkerSet = Arc<std::sync::Mutex<BTreeSet<DateTime<Utc>>>>;

/// Battle markers picked but not yet committed.
#[derive(Debug, Default)]
pub struct MarkerReservations {
    taken: MarkerSet,
}

/// One reserved marker, released on drop.
#[derive(Debug)]
pub struct MarkerReservation {
    taken: MarkerSet,
    marker: DateTime<Utc>,
}

impl MarkerReservation {
    /// The reserved marker.
    pub const fn marker(&self) -> DateTime<Utc> {
        self.marker
    }
}

impl Drop for MarkerReservation {
    fn drop(&mut self) {
        self.taken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.marker);
    }
}

impl MarkerReservations {
    /// An empty reservation table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the marker `pick` chooses given the markers already held.
    pub fn reserve(
        &self,
        pick: impl FnOnce(&BTreeSet<DateTime<Utc>>) -> DateTime<Utc>,
    ) -> MarkerReservation {
        let mut taken = self.taken.lock().unwrap_or_else(PoisonError::into_inner);
        let marker = pick(&taken);
        taken.insert(marker);
        MarkerReservation {
            taken: Arc::clone(&self.taken),
            marker,
        }
    }

    /// Number of markers currently held.
    pub fn held(&self) -> usize {
        self.taken.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};

    use super::*;

    #[tokio::test]
    async fn overlapping_sets_serialize() {
        let locks = Arc::new(AgentLocks::new());
        let held = locks.acquire(&[AgentId(2), AgentId(1)]).await;
        assert_eq!(held.ids(), &[AgentId(1), AgentId(2)]);

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(&[AgentId(3), AgentId(2)]).await.ids().len() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        assert_eq!(contender.await.unwrap_or(0), 2);
    }

    #[tokio::test]
    async fn disjoint_sets_do_not_block() {
        let locks = AgentLocks::new();
        let _a = locks.acquire(&[AgentId(1)]).await;
        let b = locks.acquire(&[AgentId(2), AgentId(2)]).await;
        assert_eq!(b.ids(), &[AgentId(2)]);
        assert!(b.covers(&[AgentId(2)]));
        assert!(!b.covers(&[AgentId(1)]));
    }

    #[test]
    fn reserved_markers_are_skipped_until_released() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default();
        let step = |taken: &BTreeSet<DateTime<Utc>>| {
            let mut at = t0;
            while taken.contains(&at) {
                at += TimeDelta::microseconds(1);
            }
            at
        };
        let table = MarkerReservations::new();
        let first = table.reserve(step);
        let second = table.reserve(step);
        assert_eq!(first.marker(), t0);
        assert_eq!(second.marker(), t0 + TimeDelta::microseconds(1));
        assert_eq!(table.held(), 2);

        drop(first);
        assert_eq!(table.held(), 1);
        assert_eq!(table.reserve(step).marker(), t0);
    }
}
