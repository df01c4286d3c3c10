//! The mutable game state shared by validation and resolution.
//!
//! [`WorldState`] mirrors the settlement program's agent accounts and adds
//! the bookkeeping the program does not hold: cooldown rows, alliance
//! history, ignore windows, battle records, and kills still owed to the
//! ledger.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use warband_ledger::AgentAccount;
use warband_types::{Agent, AgentId, Battle, DeathCause, GameSession};

use crate::alliance::AllianceBook;
use crate::config::RulesConfig;
use crate::cooldown::CooldownLedger;
use crate::death::apply_death;
use crate::error::AgentError;
use crate::handlers::Applied;
use crate::ignore::IgnoreBook;

// ---------------------------------------------------------------------------
// BattleLog
// ---------------------------------------------------------------------------

/// Battle records keyed by their shared start marker.
#[derive(Debug, Clone, Default)]
pub struct BattleLog {
    battles: BTreeMap<DateTime<Utc>, Battle>,
}

impl BattleLog {
    /// Record a battle, replacing any record with the same marker.
    pub fn insert(&mut self, battle: Battle) {
        self.battles.insert(battle.started_at, battle);
    }

    /// The record for `battle.started_at`, inserting `battle` when absent.
    pub fn get_or_insert(&mut self, battle: Battle) -> &mut Battle {
        self.battles.entry(battle.started_at).or_insert(battle)
    }

    /// Whether a record exists for the marker.
    pub fn contains(&self, started_at: DateTime<Utc>) -> bool {
        self.battles.contains_key(&started_at)
    }

    /// The record for a marker.
    pub fn get(&self, started_at: DateTime<Utc>) -> Option<&Battle> {
        self.battles.get(&started_at)
    }

    /// Mutable access to the record for a marker.
    pub fn get_mut(&mut self, started_at: DateTime<Utc>) -> Option<&mut Battle> {
        self.battles.get_mut(&started_at)
    }

    /// Records still waiting for resolution.
    pub fn active(&self) -> impl Iterator<Item = &Battle> {
        self.battles.values().filter(|b| b.is_active())
    }

    /// Drop resolved records that closed before `cutoff`.
    pub fn prune_resolved(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.battles.len();
        self.battles
            .retain(|_, b| b.is_active() || b.resolved_at.is_none_or(|at| at >= cutoff));
        before.saturating_sub(self.battles.len())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.battles.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.battles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

/// All mutable game state.
#[derive(Debug, Clone)]
pub struct WorldState {
    /// The owning session.
    pub session: GameSession,
    /// Every agent ever registered, dead ones included.
    pub agents: BTreeMap<AgentId, Agent>,
    /// Alliance history.
    pub alliances: AllianceBook,
    /// Cooldown rows.
    pub cooldowns: CooldownLedger,
    /// Ignore windows.
    pub ignores: IgnoreBook,
    /// Battle records.
    pub battles: BattleLog,
    /// Dead agents whose `killAgent` call has not been accepted yet.
    pub pending_kills: BTreeSet<AgentId>,
}

impl WorldState {
    /// Empty state for a session.
    pub fn new(session: GameSession) -> Self {
        Self {
            session,
            agents: BTreeMap::new(),
            alliances: AllianceBook::new(),
            cooldowns: CooldownLedger::new(),
            ignores: IgnoreBook::new(),
            battles: BattleLog::default(),
            pending_kills: BTreeSet::new(),
        }
    }

    /// Register an agent.
    pub fn add_agent(&mut self, agent: Agent) -> Result<(), AgentError> {
        if self.agents.contains_key(&agent.id) {
            return Err(AgentError::DuplicateAgent(agent.id));
        }
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    /// Look up an agent.
    pub fn agent(&self, id: AgentId) -> Result<&Agent, AgentError> {
        self.agents.get(&id).ok_or(AgentError::AgentNotFound(id))
    }

    /// Look up an agent mutably.
    pub fn agent_mut(&mut self, id: AgentId) -> Result<&mut Agent, AgentError> {
        self.agents.get_mut(&id).ok_or(AgentError::AgentNotFound(id))
    }

    /// Ids of alive agents, ascending.
    pub fn alive_ids(&self) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|a| a.alive)
            .map(|a| a.id)
            .collect()
    }

    /// Number of alive agents.
    pub fn alive_count(&self) -> usize {
        self.agents.values().filter(|a| a.alive).count()
    }

    /// The agent's current alliance partner.
    pub fn ally_of(&self, id: AgentId) -> Option<AgentId> {
        self.agents.get(&id).and_then(|a| a.alliance_with)
    }

    /// A battle marker at or after `now` that no record, agent, or entry of
    /// `reserved` uses yet.
    ///
    /// Collisions are resolved by stepping forward one microsecond.
    pub fn unique_battle_start(
        &self,
        now: DateTime<Utc>,
        reserved: &BTreeSet<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let taken: BTreeSet<DateTime<Utc>> = self
            .agents
            .values()
            .filter_map(|a| a.battle_started_at)
            .collect();
        let mut candidate = now;
        while self.battles.contains(candidate)
            || taken.contains(&candidate)
            || reserved.contains(&candidate)
        {
            match candidate.checked_add_signed(TimeDelta::microseconds(1)) {
                Some(next) => candidate = next,
                None => break,
            }
        }
        candidate
    }

    /// Refresh the mirrored alive flag and balance from a ledger account.
    ///
    /// An agent the ledger reports dead is put through the local death path.
    pub fn sync_account(
        &mut self,
        account: &AgentAccount,
        rules: &RulesConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<Applied>, AgentError> {
        let agent = self.agent_mut(account.id)?;
        let balance_changed = agent.token_balance != account.token_balance;
        agent.token_balance = account.token_balance;
        if agent.alive && !account.alive {
            tracing::warn!(agent_id = %account.id, "ledger reports agent dead; syncing");
            let applied = apply_death(self, account.id, DeathCause::Reported, rules, now)?;
            return Ok(Some(applied));
        }
        if balance_changed {
            let snapshot = self.agent(account.id)?.clone();
            return Ok(Some(Applied::touching(snapshot)));
        }
        Ok(None)
    }

    /// Check the alliance symmetry invariant, returning offending agents.
    pub fn asymmetric_alliances(&self) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|a| match a.alliance_with {
                Some(partner) => self.ally_of(partner) != Some(a.id),
                None => false,
            })
            .map(|a| a.id)
            .collect()
    }
}
