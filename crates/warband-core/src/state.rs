//! Shared game context.
//!
//! [`GameContext`] bundles everything the
//! [`ActionManager`](crate::ActionManager), the
//! [`BattleResolver`](crate::BattleResolver) and the loops share: the mirrored world state behind a
//! `RwLock`, the per-agent lock table, the rules, the terrain, and the
//! seeded RNG. The `RwLock` is only held for in-memory reads and commits,
//! never across a ledger or store call.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::sync::{Mutex, RwLock};
use warband_agents::{
    AgentError, AllianceBook, Applied, BattleLog, CooldownLedger, IgnoreBook, RulesConfig,
    ValidationContext, WorldState,
};
use warband_ledger::AgentAccount;
use warband_types::{
    Agent, AgentId, Alliance, Battle, Cooldown, GameEndReason, GameSession, IgnoreRecord,
};
use warband_world::{MapBounds, TerrainMap};

use crate::config::AgentSeed;
use crate::locks::{AgentLocks, LockSet, MarkerReservation, MarkerReservations};

/// State shared by every engine component.
#[derive(Debug)]
pub struct GameContext {
    /// Mirrored world state.
    pub world: RwLock<WorldState>,
    /// Per-agent mutexes.
    pub locks: AgentLocks,
    /// Game rules.
    pub rules: RulesConfig,
    /// Map extent.
    pub bounds: MapBounds,
    /// Terrain lookup.
    pub terrain: TerrainMap,
    rng: Mutex<SmallRng>,
    markers: MarkerReservations,
    lock_attempts: u32,
    unpersisted: Mutex<Applied>,
}

impl GameContext {
    /// Wrap a world state.
    pub fn new(world: WorldState, rules: RulesConfig, terrain: TerrainMap, seed: u64) -> Self {
        let bounds = MapBounds::new(rules.map_diameter);
        Self {
            world: RwLock::new(world),
            locks: AgentLocks::new(),
            rules,
            bounds,
            terrain,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            markers: MarkerReservations::new(),
            lock_attempts: 3,
            unpersisted: Mutex::new(Applied::default()),
        }
    }

    /// Set how many times a participant set is re-locked before giving up.
    #[must_use]
    pub const fn with_lock_attempts(mut self, attempts: u32) -> Self {
        self.lock_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// A validation context over `state`.
    pub const fn validation<'a>(
        &'a self,
        state: &'a WorldState,
        now: DateTime<Utc>,
    ) -> ValidationContext<'a> {
        ValidationContext {
            state,
            rules: &self.rules,
            bounds: self.bounds,
            terrain: &self.terrain,
            now,
        }
    }

    /// Draw from the shared RNG.
    pub async fn roll<T>(&self, f: impl FnOnce(&mut SmallRng) -> T) -> T {
        let mut rng = self.rng.lock().await;
        f(&mut rng)
    }

    /// Reserve a battle marker at or after `from`.
    ///
    /// The marker is unused by any agent, battle record, or other live
    /// reservation. Hold the reservation until the battle is committed.
    pub async fn reserve_marker(&self, from: DateTime<Utc>) -> MarkerReservation {
        let state = self.world.read().await;
        self.markers
            .reserve(|reserved| state.unique_battle_start(from, reserved))
    }

    /// Lock the agents `participants` names, until the set is stable.
    ///
    /// The set is recomputed after locking; if it grew, the locks are
    /// released and the larger set is locked instead. Returns `None` when
    /// the set keeps changing for every attempt.
    pub async fn lock_stable(
        &self,
        participants: impl Fn(&WorldState) -> Vec<AgentId>,
    ) -> Option<LockSet> {
        let mut wanted = participants(&*self.world.read().await);
        for attempt in 1..=self.lock_attempts {
            let held = self.locks.acquire(&wanted).await;
            let current = participants(&*self.world.read().await);
            if held.covers(&current) {
                return Some(held);
            }
            tracing::debug!(attempt, "Participant set changed while locking");
            drop(held);
            wanted = current;
        }
        None
    }

    /// Mirror authoritative accounts into local state.
    ///
    /// Agents the ledger already reports dead go through the local death
    /// path without queueing a kill call.
    pub async fn sync_accounts(
        &self,
        accounts: &[AgentAccount],
        now: DateTime<Utc>,
    ) -> Result<Applied, AgentError> {
        let mut applied = Applied::default();
        let mut state = self.world.write().await;
        for account in accounts {
            if let Some(synced) = state.sync_account(account, &self.rules, now)? {
                applied.merge(synced);
            }
            if !account.alive {
                state.pending_kills.remove(&account.id);
            }
        }
        Ok(applied)
    }

    /// Close the session if it is still open.
    pub async fn close_session(&self, reason: GameEndReason, now: DateTime<Utc>) -> Option<GameSession> {
        let mut state = self.world.write().await;
        if !state.session.active {
            return None;
        }
        state.session.close(reason, now);
        tracing::info!(
            game_id = %state.session.game_id,
            reason = ?reason,
            alive = state.alive_count(),
            "Session closed"
        );
        Some(state.session)
    }

    /// Hold changes that were committed outside a returned outcome.
    pub async fn stash(&self, applied: Applied) {
        if !applied.is_empty() {
            self.unpersisted.lock().await.merge(applied);
        }
    }

    /// Take every stashed change.
    pub async fn take_stashed(&self) -> Applied {
        std::mem::take(&mut *self.unpersisted.lock().await)
    }
}

/// A fresh world for `session` populated from the roster.
pub fn seed_world(session: GameSession, roster: &[AgentSeed]) -> Result<WorldState, AgentError> {
    let mut world = WorldState::new(session);
    for seed in roster {
        world.add_agent(seed.to_agent())?;
    }
    Ok(world)
}

/// Rows reloaded from the relational mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredRows {
    /// Every agent of the session.
    pub agents: Vec<Agent>,
    /// Alliance history.
    pub alliances: Vec<Alliance>,
    /// Live cooldown rows.
    pub cooldowns: Vec<Cooldown>,
    /// Live ignore windows.
    pub ignores: Vec<IgnoreRecord>,
    /// Battle records.
    pub battles: Vec<Battle>,
}

/// Rebuild a world from mirrored rows.
pub fn restore_world(session: GameSession, rows: RestoredRows) -> Result<WorldState, AgentError> {
    let mut world = WorldState::new(session);
    for agent in rows.agents {
        world.add_agent(agent)?;
    }
    world.alliances = AllianceBook::load(rows.alliances);
    world.cooldowns = CooldownLedger::load(rows.cooldowns);
    world.ignores = IgnoreBook::load(rows.ignores);
    let mut log = BattleLog::default();
    for battle in rows.battles {
        log.insert(battle);
    }
    world.battles = log;

    let broken = world.asymmetric_alliances();
    if !broken.is_empty() {
        tracing::warn!(agents = ?broken, "Restored state has asymmetric alliances");
    }
    Ok(world)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use warband_types::{GameId, Position};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn roster() -> Vec<AgentSeed> {
        (1..=3)
            .map(|i| AgentSeed {
                id: AgentId(i),
                name: format!("agent-{i}"),
                x: 0,
                y: 0,
                balance: 100,
            })
            .collect()
    }

    fn context() -> GameContext {
        let world = seed_world(GameSession::open(GameId(1), t0()), &roster()).unwrap();
        GameContext::new(world, RulesConfig::default(), TerrainMap::plains(), 7)
    }

    #[tokio::test]
    async fn sync_marks_reported_deaths_without_queueing_kills() {
        let ctx = context();
        let mut account = AgentAccount::new(AgentId(2), Position::new(0, 0), 80);
        account.alive = false;
        let applied = ctx.sync_accounts(&[account], t0()).await.unwrap();
        assert!(!applied.events.is_empty());
        let state = ctx.world.read().await;
        assert!(!state.agent(AgentId(2)).unwrap().alive);
        assert!(state.pending_kills.is_empty());
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let ctx = context();
        assert!(ctx.close_session(GameEndReason::Operator, t0()).await.is_some());
        assert!(ctx.close_session(GameEndReason::Operator, t0()).await.is_none());
    }

    #[tokio::test]
    async fn stash_drains_once() {
        let ctx = context();
        let agent = ctx.world.read().await.agent(AgentId(1)).unwrap().clone();
        ctx.stash(Applied::touching(agent)).await;
        assert_eq!(ctx.take_stashed().await.changes.agents.len(), 1);
        assert!(ctx.take_stashed().await.is_empty());
    }

    #[tokio::test]
    async fn lock_stable_covers_allies() {
        let ctx = context();
        {
            let mut state = ctx.world.write().await;
            state.agent_mut(AgentId(1)).unwrap().alliance_with = Some(AgentId(3));
            state.agent_mut(AgentId(3)).unwrap().alliance_with = Some(AgentId(1));
        }
        let held = ctx
            .lock_stable(|state| {
                let mut ids = vec![AgentId(1)];
                ids.extend(state.ally_of(AgentId(1)));
                ids
            })
            .await
            .unwrap();
        assert_eq!(held.ids(), &[AgentId(1), AgentId(3)]);
    }

    #[test]
    fn restore_keeps_rows() {
        let session = GameSession::open(GameId(1), t0());
        let rows = RestoredRows {
            agents: roster().iter().map(AgentSeed::to_agent).collect(),
            alliances: vec![],
            cooldowns: vec![],
            ignores: vec![],
            battles: vec![Battle::new(
                t0(),
                warband_types::BattleType::Simple,
                vec![AgentId(1)],
                vec![AgentId(2)],
            )],
        };
        let world = restore_world(session, rows).unwrap();
        assert_eq!(world.agents.len(), 3);
        assert!(world.battles.contains(t0()));
    }

    #[tokio::test]
    async fn reserved_markers_stay_distinct() {
        let ctx = context();
        let first = ctx.reserve_marker(t0()).await;
        let second = ctx.reserve_marker(t0()).await;
        assert_eq!(first.marker(), t0());
        assert_ne!(second.marker(), first.marker());

        ctx.world.write().await.agent_mut(AgentId(1)).unwrap().battle_started_at = Some(t0());
        drop(first);
        let third = ctx.reserve_marker(t0()).await;
        assert_ne!(third.marker(), t0());
        assert_ne!(third.marker(), second.marker());
    }
}
