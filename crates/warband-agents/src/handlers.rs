//! Local commit of validated actions and battle results.
//!
//! These functions run only after the ledger accepted the matching
//! instruction. Each returns an [`Applied`]: the post-commit snapshot of
//! every touched record, the narrative events to broadcast, and short
//! side-effect notes for the caller's logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use warband_types::{
    ActionKind, Agent, AgentId, Battle, BattleOutcome, BattleSide, BattleStatus, BattleType,
    DeathCause, NarrativeEvent, NarrativePayload, StateChanges,
};

use crate::config::RulesConfig;
use crate::death::apply_death;
use crate::error::AgentError;
use crate::validation::ActionPlan;
use crate::world_state::WorldState;

/// Everything one commit produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Records to mirror.
    pub changes: StateChanges,
    /// Events to broadcast.
    pub events: Vec<NarrativeEvent>,
    /// Human-readable notes.
    pub side_effects: Vec<String>,
}

impl Applied {
    /// A result touching one agent and nothing else.
    pub fn touching(agent: Agent) -> Self {
        let mut applied = Self::default();
        applied.changes.agents.push(agent);
        applied
    }

    /// Whether nothing was touched or emitted.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.events.is_empty() && self.side_effects.is_empty()
    }

    /// Append another result to this one.
    pub fn merge(&mut self, other: Self) {
        self.changes.merge(other.changes);
        self.events.extend(other.events);
        self.side_effects.extend(other.side_effects);
    }

    fn snapshot(&mut self, state: &WorldState, id: AgentId) -> Result<(), AgentError> {
        self.changes.agents.push(state.agent(id)?.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Commit a validated action.
///
/// `terrain_death` is the outcome of the movement death roll and is only
/// read for moves; a mover that dies stays at its origin.
pub fn apply_plan(
    state: &mut WorldState,
    plan: &ActionPlan,
    terrain_death: bool,
    rules: &RulesConfig,
    now: DateTime<Utc>,
) -> Result<Applied, AgentError> {
    match plan {
        ActionPlan::Move {
            agent,
            from,
            to,
            terrain,
            profile,
        } => {
            if terrain_death {
                return apply_death(state, *agent, DeathCause::Terrain(*terrain), rules, now);
            }
            let mut applied = Applied::default();
            let mover = state.agent_mut(*agent)?;
            mover.position = *to;
            mover.last_move = Some(now);
            let cooldown = state.cooldowns.refresh(
                *agent,
                ActionKind::Move,
                rules.move_cooldown(profile.speed_multiplier),
                now,
            );
            applied.snapshot(state, *agent)?;
            applied.changes.cooldowns.push(cooldown);
            applied.events.push(NarrativeEvent::new(
                now,
                NarrativePayload::AgentMoved {
                    agent: *agent,
                    from: *from,
                    to: *to,
                },
            ));
            applied.side_effects.push(format!(
                "agent {agent} moved to {to} across {} (cost {})",
                terrain.as_str(),
                profile.cost
            ));
            Ok(applied)
        }
        ActionPlan::Battle {
            started_at,
            battle_type,
            side_a,
            side_b,
            ..
        } => {
            let mut applied = Applied::default();
            for id in side_a.iter().chain(side_b.iter()) {
                state.agent_mut(*id)?.battle_started_at = Some(*started_at);
                applied.snapshot(state, *id)?;
            }
            let battle = Battle::new(
                *started_at,
                *battle_type,
                side_a.clone(),
                side_b.clone(),
            );
            state.battles.insert(battle.clone());
            applied.changes.battles.push(battle);
            applied.events.push(NarrativeEvent::new(
                now,
                NarrativePayload::BattleStarted {
                    started_at: *started_at,
                    battle_type: *battle_type,
                    side_a: side_a.clone(),
                    side_b: side_b.clone(),
                },
            ));
            applied
                .side_effects
                .push(format!("{} battle opened", battle_type.as_str()));
            Ok(applied)
        }
        ActionPlan::Alliance { initiator, target } => {
            let mut applied = Applied::default();
            let record = state.alliances.form(*initiator, *target, now)?;
            link(state, *initiator, Some(*target), now)?;
            link(state, *target, Some(*initiator), now)?;
            for id in [*initiator, *target] {
                let cooldown =
                    state
                        .cooldowns
                        .refresh(id, ActionKind::Alliance, rules.alliance_cooldown(), now);
                applied.changes.cooldowns.push(cooldown);
                applied.snapshot(state, id)?;
            }
            applied.changes.alliances.push(record);
            applied.events.push(NarrativeEvent::new(
                now,
                NarrativePayload::AllianceFormed {
                    agent: *initiator,
                    partner: *target,
                },
            ));
            Ok(applied)
        }
        ActionPlan::BreakAlliance { initiator, partner } => {
            let mut applied = Applied::default();
            let record = state.alliances.dissolve_for(*initiator, now)?;
            link(state, *initiator, None, now)?;
            link(state, *partner, None, now)?;
            for id in [*initiator, *partner] {
                let cooldown =
                    state
                        .cooldowns
                        .refresh(id, ActionKind::Alliance, rules.alliance_cooldown(), now);
                applied.changes.cooldowns.push(cooldown);
                applied.snapshot(state, id)?;
            }
            applied.changes.alliances.push(record);
            applied.events.push(NarrativeEvent::new(
                now,
                NarrativePayload::AllianceBroken {
                    agent: *initiator,
                    partner: *partner,
                },
            ));
            Ok(applied)
        }
        ActionPlan::Ignore {
            agent,
            target,
            until,
        } => {
            let mut applied = Applied::default();
            let record = state.ignores.record(*agent, *target, *until);
            let cooldown = state.cooldowns.refresh(
                *agent,
                ActionKind::Ignore,
                until.signed_duration_since(now),
                now,
            );
            applied.changes.ignores.push(record);
            applied.changes.cooldowns.push(cooldown);
            applied.events.push(NarrativeEvent::new(
                now,
                NarrativePayload::AgentIgnored {
                    agent: *agent,
                    target: *target,
                    until: *until,
                },
            ));
            Ok(applied)
        }
    }
}

fn link(
    state: &mut WorldState,
    id: AgentId,
    partner: Option<AgentId>,
    now: DateTime<Utc>,
) -> Result<(), AgentError> {
    let agent = state.agent_mut(id)?;
    agent.alliance_with = partner;
    agent.last_alliance = Some(now);
    Ok(())
}

// ---------------------------------------------------------------------------
// Battle resolution
// ---------------------------------------------------------------------------

/// A settled battle, ready to commit locally.
///
/// The sides are the ones the outcome was decided on. They can differ from
/// the sides recorded at battle start when a participant died or an
/// alliance dissolved while the battle was open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Marker of the battle.
    pub started_at: DateTime<Utc>,
    /// Topology of the settled sides.
    pub battle_type: BattleType,
    /// Settled side holding the lowest id.
    pub side_a: Vec<AgentId>,
    /// The opposing settled side.
    pub side_b: Vec<AgentId>,
    /// Winning side.
    pub winning_side: BattleSide,
    /// Percentage taken from the losers.
    pub loss_percent: u8,
    /// Tokens moved, as reported by the ledger.
    pub tokens_transferred: u64,
    /// Post-settlement balances of the participants.
    pub balances: BTreeMap<AgentId, u64>,
    /// Losers that died in the post-battle roll.
    pub deaths: Vec<AgentId>,
}

impl Resolution {
    fn side(&self, side: BattleSide) -> &[AgentId] {
        match side {
            BattleSide::A => &self.side_a,
            BattleSide::B => &self.side_b,
        }
    }
}

/// Commit a settled battle.
///
/// Clears every settled participant's marker, stamps `last_battle`,
/// starts the battle cooldown, mirrors the new balances, then applies the
/// deaths. The battle record is rewritten with the settled sides, or
/// created when the battle was never recorded locally.
pub fn apply_resolution(
    state: &mut WorldState,
    resolution: &Resolution,
    rules: &RulesConfig,
    now: DateTime<Utc>,
) -> Result<Applied, AgentError> {
    let mut applied = Applied::default();

    for id in resolution.side_a.iter().chain(&resolution.side_b).copied() {
        let agent = state.agent_mut(id)?;
        agent.battle_started_at = None;
        agent.last_battle = Some(now);
        if let Some(balance) = resolution.balances.get(&id) {
            agent.token_balance = *balance;
        }
        let cooldown =
            state
                .cooldowns
                .refresh(id, ActionKind::Battle, rules.battle_cooldown(), now);
        applied.changes.cooldowns.push(cooldown);
        applied.snapshot(state, id)?;
    }

    let record = state.battles.get_or_insert(Battle::new(
        resolution.started_at,
        resolution.battle_type,
        resolution.side_a.clone(),
        resolution.side_b.clone(),
    ));
    if record.side_a != resolution.side_a || record.side_b != resolution.side_b {
        tracing::info!(
            started_at = %resolution.started_at,
            recorded_a = ?record.side_a,
            recorded_b = ?record.side_b,
            settled_a = ?resolution.side_a,
            settled_b = ?resolution.side_b,
            "battle settled on regrouped sides"
        );
    }
    record.battle_type = resolution.battle_type;
    record.side_a.clone_from(&resolution.side_a);
    record.side_b.clone_from(&resolution.side_b);
    record.status = BattleStatus::Resolved;
    record.outcome = Some(BattleOutcome {
        winning_side: resolution.winning_side,
        loss_percent: resolution.loss_percent,
        tokens_transferred: resolution.tokens_transferred,
        deaths: resolution.deaths.clone(),
    });
    record.resolved_at = Some(now);
    applied.changes.battles.push(record.clone());

    applied.events.push(NarrativeEvent::new(
        now,
        NarrativePayload::BattleResolved {
            started_at: resolution.started_at,
            battle_type: resolution.battle_type,
            winning_side: resolution.winning_side,
            winners: resolution.side(resolution.winning_side).to_vec(),
            losers: resolution.side(resolution.winning_side.opposite()).to_vec(),
            loss_percent: resolution.loss_percent,
            tokens_transferred: resolution.tokens_transferred,
        },
    ));
    applied.side_effects.push(format!(
        "{} battle resolved, {} tokens moved",
        resolution.battle_type.as_str(),
        resolution.tokens_transferred
    ));

    for id in &resolution.deaths {
        applied.merge(apply_death(state, *id, DeathCause::Battle, rules, now)?);
    }
    Ok(applied)
}

/// Release a battle group that can no longer be settled.
///
/// Markers are cleared without cooldowns or transfers. The battle record,
/// when one exists, closes with no outcome.
pub fn apply_abandon(
    state: &mut WorldState,
    started_at: DateTime<Utc>,
    members: &[AgentId],
    now: DateTime<Utc>,
) -> Result<Applied, AgentError> {
    let mut applied = Applied::default();
    for id in members {
        let agent = state.agent_mut(*id)?;
        if agent.battle_started_at == Some(started_at) {
            agent.battle_started_at = None;
            applied.snapshot(state, *id)?;
        }
    }
    if let Some(record) = state.battles.get_mut(started_at) {
        if record.is_active() {
            record.status = BattleStatus::Resolved;
            record.resolved_at = Some(now);
            applied.changes.battles.push(record.clone());
        }
    }
    applied
        .side_effects
        .push(format!("battle {started_at} abandoned"));
    tracing::warn!(%started_at, members = members.len(), "battle abandoned");
    Ok(applied)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use warband_types::{BattleType, GameId, GameSession, Position, Terrain};
    use warband_world::movement_profile;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn state(n: u32) -> WorldState {
        let mut state = WorldState::new(GameSession::open(GameId(1), t0()));
        for i in 1..=n {
            state
                .add_agent(Agent::new(AgentId(i), format!("a{i}"), Position::default(), 100))
                .unwrap();
        }
        state
    }

    fn move_plan(terrain: Terrain) -> ActionPlan {
        ActionPlan::Move {
            agent: AgentId(1),
            from: Position::default(),
            to: Position::new(1, 0),
            terrain,
            profile: movement_profile(terrain, 1.0).unwrap(),
        }
    }

    #[test]
    fn move_scales_cooldown_by_terrain() {
        let mut state = state(1);
        let rules = RulesConfig::default();
        let applied = apply_plan(&mut state, &move_plan(Terrain::Mountain), false, &rules, t0())
            .unwrap();
        let agent = state.agent(AgentId(1)).unwrap();
        assert_eq!(agent.position, Position::new(1, 0));
        assert_eq!(agent.last_move, Some(t0()));
        assert_eq!(
            applied.changes.cooldowns[0].expires_at,
            t0() + TimeDelta::hours(2)
        );
        assert_eq!(applied.events.len(), 1);
    }

    #[test]
    fn terrain_death_leaves_agent_at_origin() {
        let mut state = state(1);
        let rules = RulesConfig::default();
        let applied =
            apply_plan(&mut state, &move_plan(Terrain::River), true, &rules, t0()).unwrap();
        let agent = state.agent(AgentId(1)).unwrap();
        assert!(!agent.alive);
        assert_eq!(agent.position, Position::default());
        assert!(matches!(
            applied.events[0].payload,
            NarrativePayload::AgentDied {
                cause: DeathCause::Terrain(Terrain::River),
                ..
            }
        ));
    }

    #[test]
    fn alliance_round_trip_sets_cooldowns() {
        let mut state = state(2);
        let rules = RulesConfig::default();
        let form = ActionPlan::Alliance {
            initiator: AgentId(1),
            target: AgentId(2),
        };
        apply_plan(&mut state, &form, false, &rules, t0()).unwrap();
        assert_eq!(state.ally_of(AgentId(1)), Some(AgentId(2)));
        assert_eq!(state.ally_of(AgentId(2)), Some(AgentId(1)));
        assert!(state.cooldowns.is_on_cooldown(AgentId(2), ActionKind::Alliance, t0()));

        let later = t0() + TimeDelta::hours(30);
        let brk = ActionPlan::BreakAlliance {
            initiator: AgentId(2),
            partner: AgentId(1),
        };
        let applied = apply_plan(&mut state, &brk, false, &rules, later).unwrap();
        assert_eq!(state.ally_of(AgentId(1)), None);
        assert!(state.asymmetric_alliances().is_empty());
        assert_eq!(applied.changes.alliances.len(), 1);
        assert!(state.cooldowns.is_on_cooldown(AgentId(1), ActionKind::Alliance, later));
    }

    fn open_battle(state: &mut WorldState) {
        let plan = ActionPlan::Battle {
            attacker: AgentId(3),
            defender: AgentId(1),
            started_at: t0(),
            battle_type: BattleType::AgentVsAlliance,
            side_a: vec![AgentId(1), AgentId(2)],
            side_b: vec![AgentId(3)],
        };
        apply_plan(state, &plan, false, &RulesConfig::default(), t0()).unwrap();
    }

    #[test]
    fn battle_start_marks_everyone() {
        let mut state = state(3);
        open_battle(&mut state);
        for i in 1..=3 {
            assert_eq!(state.agent(AgentId(i)).unwrap().battle_started_at, Some(t0()));
        }
        assert_eq!(state.battles.active().count(), 1);
    }

    #[test]
    fn resolution_clears_markers_and_applies_deaths() {
        let mut state = state(3);
        open_battle(&mut state);
        let rules = RulesConfig::default();
        let resolution = Resolution {
            started_at: t0(),
            battle_type: BattleType::AgentVsAlliance,
            side_a: vec![AgentId(1), AgentId(2)],
            side_b: vec![AgentId(3)],
            winning_side: BattleSide::A,
            loss_percent: 25,
            tokens_transferred: 25,
            balances: BTreeMap::from([(AgentId(1), 113), (AgentId(2), 112), (AgentId(3), 75)]),
            deaths: vec![AgentId(3)],
        };
        let now = t0() + TimeDelta::hours(2);
        let applied = apply_resolution(&mut state, &resolution, &rules, now).unwrap();

        assert!(state.agents.values().all(|a| a.battle_started_at.is_none()));
        assert_eq!(state.agent(AgentId(1)).unwrap().token_balance, 113);
        assert!(!state.agent(AgentId(3)).unwrap().alive);
        assert!(state.cooldowns.is_on_cooldown(AgentId(2), ActionKind::Battle, now));
        let record = state.battles.get(t0()).unwrap();
        assert!(!record.is_active());
        assert_eq!(record.outcome.as_ref().unwrap().deaths, vec![AgentId(3)]);
        assert!(applied.events.iter().any(|e| matches!(
            &e.payload,
            NarrativePayload::BattleResolved { winners, .. } if winners == &vec![AgentId(1), AgentId(2)]
        )));
    }

    #[test]
    fn resolution_records_the_settled_sides() {
        // Agent 1 died while the battle was open; 2 and 3 fought it out.
        let mut state = state(3);
        open_battle(&mut state);
        let rules = RulesConfig::default();
        apply_death(&mut state, AgentId(1), DeathCause::Reported, &rules, t0()).unwrap();
        let resolution = Resolution {
            started_at: t0(),
            battle_type: BattleType::Simple,
            side_a: vec![AgentId(2)],
            side_b: vec![AgentId(3)],
            winning_side: BattleSide::B,
            loss_percent: 22,
            tokens_transferred: 22,
            balances: BTreeMap::from([(AgentId(2), 78), (AgentId(3), 122)]),
            deaths: Vec::new(),
        };
        let now = t0() + TimeDelta::hours(2);
        let applied = apply_resolution(&mut state, &resolution, &rules, now).unwrap();

        let record = state.battles.get(t0()).unwrap();
        assert_eq!(record.battle_type, BattleType::Simple);
        assert_eq!(record.side_a, vec![AgentId(2)]);
        assert_eq!(record.side(BattleSide::B), &[AgentId(3)]);
        assert!(!state.cooldowns.is_on_cooldown(AgentId(1), ActionKind::Battle, now));
        assert_eq!(state.agent(AgentId(1)).unwrap().last_battle, None);
        assert!(state.cooldowns.is_on_cooldown(AgentId(2), ActionKind::Battle, now));
        assert!(applied.events.iter().any(|e| matches!(
            &e.payload,
            NarrativePayload::BattleResolved { winners, losers, battle_type: BattleType::Simple, .. }
                if winners == &vec![AgentId(3)] && losers == &vec![AgentId(2)]
        )));
    }

    #[test]
    fn resolving_unrecorded_battle_creates_the_record() {
        let mut state = state(2);
        let resolution = Resolution {
            started_at: t0(),
            battle_type: BattleType::Simple,
            side_a: vec![AgentId(1)],
            side_b: vec![AgentId(2)],
            winning_side: BattleSide::A,
            loss_percent: 20,
            tokens_transferred: 0,
            balances: BTreeMap::new(),
            deaths: Vec::new(),
        };
        apply_resolution(&mut state, &resolution, &RulesConfig::default(), t0()).unwrap();
        let record = state.battles.get(t0()).unwrap();
        assert_eq!(record.status, BattleStatus::Resolved);
        assert_eq!(record.side_b, vec![AgentId(2)]);
    }

    #[test]
    fn abandon_releases_without_cooldown() {
        let mut state = state(3);
        open_battle(&mut state);
        let members = [AgentId(1), AgentId(2), AgentId(3)];
        apply_abandon(&mut state, t0(), &members, t0() + TimeDelta::days(2)).unwrap();
        assert!(state.agents.values().all(|a| a.battle_started_at.is_none()));
        assert!(!state.cooldowns.is_on_cooldown(AgentId(1), ActionKind::Battle, t0()));
        assert_eq!(state.battles.active().count(), 0);
    }
}
