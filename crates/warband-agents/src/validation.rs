//! Structural validation of candidate actions.
//!
//! [`validate`] checks a [`GameAction`] against the current [`WorldState`]
//! and either rejects it with [`ValidationFeedback`] or returns an
//! [`ActionPlan`]: everything needed to submit the ledger instruction and
//! commit the result. Validation never mutates state.
//!
//! Checks run in order and the first failure wins:
//!
//! 1. Session -- the game is active.
//! 2. Actor -- registered and alive.
//! 3. Kind-specific rules (bounds, range, markers, cooldowns, alliances).

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use warband_ledger::Instruction;
use warband_types::{
    ActionKind, AgentId, BattleType, GameAction, Position, RejectionReason, Terrain,
    ValidationFeedback,
};
use warband_world::{MapBounds, MovementProfile, TerrainMap, distance, movement_profile};

use crate::battle::normalize_sides;
use crate::config::RulesConfig;
use crate::cooldown::expiry_after;
use crate::world_state::WorldState;

/// Everything validation reads.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Current state.
    pub state: &'a WorldState,
    /// Game rules.
    pub rules: &'a RulesConfig,
    /// Playable area.
    pub bounds: MapBounds,
    /// Terrain lookup.
    pub terrain: &'a TerrainMap,
    /// Evaluation time.
    pub now: DateTime<Utc>,
}

/// A validated action, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPlan {
    /// Relocation.
    Move {
        /// The mover.
        agent: AgentId,
        /// Origin.
        from: Position,
        /// Destination.
        to: Position,
        /// Destination terrain.
        terrain: Terrain,
        /// Movement profile for the trip.
        profile: MovementProfile,
    },
    /// Battle start.
    Battle {
        /// Initiator.
        attacker: AgentId,
        /// Target.
        defender: AgentId,
        /// Marker to set on every participant. Free when validated; the
        /// caller reserves it before submitting.
        started_at: DateTime<Utc>,
        /// Topology.
        battle_type: BattleType,
        /// Side holding the lowest id.
        side_a: Vec<AgentId>,
        /// The opposing side.
        side_b: Vec<AgentId>,
    },
    /// Alliance formation.
    Alliance {
        /// Initiator.
        initiator: AgentId,
        /// Partner.
        target: AgentId,
    },
    /// Alliance dissolution.
    BreakAlliance {
        /// The breaking member.
        initiator: AgentId,
        /// The other member.
        partner: AgentId,
    },
    /// Ignore window.
    Ignore {
        /// The ignoring agent.
        agent: AgentId,
        /// The ignored agent.
        target: AgentId,
        /// End of the window.
        until: DateTime<Utc>,
    },
}

impl ActionPlan {
    /// The settlement instruction for this plan.
    pub fn instruction(&self) -> Instruction {
        match self {
            Self::Move { agent, to, .. } => Instruction::MoveAgent {
                agent: *agent,
                to: *to,
            },
            Self::Battle {
                attacker,
                defender,
                started_at,
                side_a,
                side_b,
                ..
            } => battle_instruction(*attacker, *defender, side_a, side_b, *started_at),
            Self::Alliance { initiator, target } => Instruction::FormAlliance {
                initiator: *initiator,
                target: *target,
            },
            Self::BreakAlliance { initiator, partner } => Instruction::BreakAlliance {
                initiator: *initiator,
                target: *partner,
            },
            Self::Ignore { agent, target, .. } => Instruction::IgnoreAgent {
                agent: *agent,
                target: *target,
            },
        }
    }

    /// Every agent the plan writes to.
    pub fn participants(&self) -> Vec<AgentId> {
        let mut ids = match self {
            Self::Move { agent, .. } => vec![*agent],
            Self::Battle { side_a, side_b, .. } => {
                side_a.iter().chain(side_b.iter()).copied().collect()
            }
            Self::Alliance { initiator, target } => vec![*initiator, *target],
            Self::BreakAlliance { initiator, partner } => vec![*initiator, *partner],
            Self::Ignore { agent, target, .. } => vec![*agent, *target],
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

fn pair(side: &[AgentId]) -> Option<[AgentId; 2]> {
    match side {
        [a, b] => Some([*a, *b]),
        _ => None,
    }
}

fn battle_instruction(
    attacker: AgentId,
    defender: AgentId,
    side_a: &[AgentId],
    side_b: &[AgentId],
    started_at: DateTime<Utc>,
) -> Instruction {
    match (side_a, side_b, pair(side_a), pair(side_b)) {
        (_, _, Some(side_a), Some(side_b)) => Instruction::StartBattleAllianceVsAlliance {
            side_a,
            side_b,
            started_at,
        },
        ([single], _, None, Some(pair)) | (_, [single], Some(pair), None) => {
            Instruction::StartBattleAgentVsAlliance {
                single: *single,
                pair,
                started_at,
            }
        }
        _ => Instruction::StartBattleSimple {
            attacker,
            defender,
            started_at,
        },
    }
}

/// Agents whose state the action reads and may write.
///
/// Used to take per-agent locks before validation. Battle actions include
/// both parties' allies, since allies can be pulled into a side.
pub fn lock_set(state: &WorldState, actor: AgentId, action: &GameAction) -> Vec<AgentId> {
    let mut ids = vec![actor];
    match action {
        GameAction::Move { .. } => {}
        GameAction::Battle { target } => {
            ids.push(*target);
            ids.extend(state.ally_of(actor));
            ids.extend(state.ally_of(*target));
        }
        GameAction::Alliance { target } | GameAction::Ignore { target, .. } => ids.push(*target),
        GameAction::BreakAlliance => ids.extend(state.ally_of(actor)),
    }
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Validate an action for `actor`.
pub fn validate(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    action: &GameAction,
) -> Result<ActionPlan, ValidationFeedback> {
    if !ctx.state.session.active {
        return Err(ValidationFeedback::new(RejectionReason::GameNotActive));
    }
    let agent = ctx
        .state
        .agent(actor)
        .map_err(|_e| ValidationFeedback::new(RejectionReason::UnknownAgent))?;
    if !agent.alive {
        return Err(ValidationFeedback::new(RejectionReason::AgentNotAlive));
    }

    match *action {
        GameAction::Move { x, y } => validate_move(ctx, actor, Position::new(x, y)),
        GameAction::Battle { target } => validate_battle(ctx, actor, target),
        GameAction::Alliance { target } => validate_alliance(ctx, actor, target),
        GameAction::BreakAlliance => validate_break(ctx, actor),
        GameAction::Ignore {
            target,
            duration_secs,
        } => validate_ignore(ctx, actor, target, duration_secs),
    }
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

fn reject(reason: RejectionReason) -> ValidationFeedback {
    ValidationFeedback::new(reason)
}

fn cooldown_check(
    ctx: &ValidationContext<'_>,
    agent: AgentId,
    kind: ActionKind,
    reason: RejectionReason,
) -> Result<(), ValidationFeedback> {
    if ctx.state.cooldowns.is_on_cooldown(agent, kind, ctx.now) {
        let until = ctx
            .state
            .cooldowns
            .expires_at(agent, kind)
            .unwrap_or(ctx.now);
        return Err(ValidationFeedback::wait_until(reason, until));
    }
    Ok(())
}

/// Target must exist, differ from the actor, and (when `need_alive`) be alive.
fn check_target(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    target: AgentId,
    need_alive: bool,
) -> Result<(), ValidationFeedback> {
    if target == actor {
        return Err(reject(RejectionReason::SelfTarget));
    }
    let target_agent = ctx
        .state
        .agent(target)
        .map_err(|_e| reject(RejectionReason::UnknownTarget))?;
    if need_alive && !target_agent.alive {
        return Err(reject(RejectionReason::TargetNotAlive));
    }
    Ok(())
}

fn check_range(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    target: AgentId,
) -> Result<(), ValidationFeedback> {
    let (Ok(a), Ok(b)) = (ctx.state.agent(actor), ctx.state.agent(target)) else {
        return Err(reject(RejectionReason::UnknownTarget));
    };
    let d = distance(a.position, b.position);
    if d > ctx.rules.interaction_range {
        return Err(ValidationFeedback::with_fix(
            RejectionReason::OutOfRange,
            format!(
                "move within {} of agent {target} (currently {d:.2} away)",
                ctx.rules.interaction_range
            ),
        ));
    }
    Ok(())
}

fn in_battle(ctx: &ValidationContext<'_>, id: AgentId) -> bool {
    ctx.state.agent(id).is_ok_and(|a| a.in_battle())
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

fn validate_move(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    to: Position,
) -> Result<ActionPlan, ValidationFeedback> {
    if !ctx.bounds.contains(to) {
        return Err(ValidationFeedback::with_fix(
            RejectionReason::OutOfBounds,
            format!("stay within radius {} of the origin", ctx.bounds.diameter / 2),
        ));
    }
    let from = ctx
        .state
        .agent(actor)
        .map_err(|_e| reject(RejectionReason::UnknownAgent))?
        .position;
    if from == to {
        return Err(reject(RejectionReason::SamePosition));
    }
    if in_battle(ctx, actor) {
        return Err(ValidationFeedback::with_fix(
            RejectionReason::InBattle,
            "wait for the battle to resolve",
        ));
    }
    cooldown_check(ctx, actor, ActionKind::Move, RejectionReason::MoveCooldown)?;

    let terrain = ctx.terrain.terrain_at(to);
    let profile = movement_profile(terrain, distance(from, to))
        .map_err(|_e| reject(RejectionReason::OutOfBounds))?;
    Ok(ActionPlan::Move {
        agent: actor,
        from,
        to,
        terrain,
        profile,
    })
}

// ---------------------------------------------------------------------------
// Battle
// ---------------------------------------------------------------------------

fn validate_battle(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    target: AgentId,
) -> Result<ActionPlan, ValidationFeedback> {
    check_target(ctx, actor, target, true)?;
    if ctx.state.ally_of(actor) == Some(target) {
        return Err(ValidationFeedback::with_fix(
            RejectionReason::TargetIsAlly,
            "break the alliance first",
        ));
    }
    check_range(ctx, actor, target)?;
    if in_battle(ctx, actor) {
        return Err(reject(RejectionReason::InBattle));
    }
    if in_battle(ctx, target) {
        return Err(reject(RejectionReason::TargetInBattle));
    }
    cooldown_check(ctx, actor, ActionKind::Battle, RejectionReason::BattleCooldown)?;
    cooldown_check(ctx, target, ActionKind::Battle, RejectionReason::BattleCooldown)?;
    if let Some(dissolved) = ctx.state.alliances.last_dissolved_between(actor, target) {
        let until = expiry_after(dissolved, ctx.rules.battle_block());
        if ctx.now < until {
            return Err(ValidationFeedback::wait_until(
                RejectionReason::BattleBlocked,
                until,
            ));
        }
    }

    let actor_side = side_with_ally(ctx, actor);
    let target_side = side_with_ally(ctx, target);
    let battle_type = BattleType::classify(actor_side.len(), target_side.len())
        .unwrap_or(BattleType::Simple);
    let (side_a, side_b) = normalize_sides(actor_side, target_side);
    Ok(ActionPlan::Battle {
        attacker: actor,
        defender: target,
        started_at: ctx.state.unique_battle_start(ctx.now, &BTreeSet::new()),
        battle_type,
        side_a,
        side_b,
    })
}

/// The agent plus its ally, when the ally is alive, idle, and off cooldown.
fn side_with_ally(ctx: &ValidationContext<'_>, id: AgentId) -> Vec<AgentId> {
    let mut side = vec![id];
    let joins = ctx.state.ally_of(id).filter(|ally| {
        ctx.state.agent(*ally).is_ok_and(|a| {
            a.alive
                && !a.in_battle()
                && a.alliance_with == Some(id)
                && !ctx
                    .state
                    .cooldowns
                    .is_on_cooldown(*ally, ActionKind::Battle, ctx.now)
        })
    });
    side.extend(joins);
    side
}

// ---------------------------------------------------------------------------
// Alliance
// ---------------------------------------------------------------------------

fn validate_alliance(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    target: AgentId,
) -> Result<ActionPlan, ValidationFeedback> {
    check_target(ctx, actor, target, true)?;
    check_range(ctx, actor, target)?;
    if ctx.state.alliances.active_for(actor).is_some() {
        return Err(ValidationFeedback::with_fix(
            RejectionReason::AllianceExists,
            "break the current alliance first",
        ));
    }
    if ctx.state.alliances.active_for(target).is_some() {
        return Err(reject(RejectionReason::AllianceExists));
    }
    if in_battle(ctx, actor) {
        return Err(reject(RejectionReason::InBattle));
    }
    if in_battle(ctx, target) {
        return Err(reject(RejectionReason::TargetInBattle));
    }
    cooldown_check(ctx, actor, ActionKind::Alliance, RejectionReason::AllianceCooldown)?;
    cooldown_check(ctx, target, ActionKind::Alliance, RejectionReason::AllianceCooldown)?;
    Ok(ActionPlan::Alliance {
        initiator: actor,
        target,
    })
}

fn validate_break(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
) -> Result<ActionPlan, ValidationFeedback> {
    let partner = ctx
        .state
        .alliances
        .active_for(actor)
        .and_then(|a| a.partner_of(actor))
        .ok_or_else(|| reject(RejectionReason::NoAllianceToBreak))?;
    if in_battle(ctx, actor) {
        return Err(ValidationFeedback::with_fix(
            RejectionReason::InBattle,
            "wait for the battle to resolve",
        ));
    }
    Ok(ActionPlan::BreakAlliance {
        initiator: actor,
        partner,
    })
}

// ---------------------------------------------------------------------------
// Ignore
// ---------------------------------------------------------------------------

fn validate_ignore(
    ctx: &ValidationContext<'_>,
    actor: AgentId,
    target: AgentId,
    duration_secs: Option<u64>,
) -> Result<ActionPlan, ValidationFeedback> {
    check_target(ctx, actor, target, false)?;
    let window = match duration_secs {
        Some(0) => return Err(reject(RejectionReason::InvalidDuration)),
        Some(secs) => crate::config::seconds(secs),
        None => ctx.rules.ignore_window(),
    };
    if ctx.state.ignores.is_ignoring(actor, target, ctx.now) {
        let until = ctx.state.ignores.until(actor, target).unwrap_or(ctx.now);
        return Err(ValidationFeedback::wait_until(
            RejectionReason::AlreadyIgnoring,
            until,
        ));
    }
    Ok(ActionPlan::Ignore {
        agent: actor,
        target,
        until: expiry_after(ctx.now, window.max(TimeDelta::seconds(1))),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use warband_types::{Agent, GameEndReason, GameId, GameSession};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    struct Fixture {
        state: WorldState,
        rules: RulesConfig,
        terrain: TerrainMap,
    }

    impl Fixture {
        fn new(agents: &[(u32, i32, i32, u64)]) -> Self {
            let mut state = WorldState::new(GameSession::open(GameId(1), t0()));
            for (id, x, y, balance) in agents {
                state
                    .add_agent(Agent::new(
                        AgentId(*id),
                        format!("agent-{id}"),
                        Position::new(*x, *y),
                        *balance,
                    ))
                    .unwrap();
            }
            Self {
                state,
                rules: RulesConfig::default(),
                terrain: TerrainMap::plains(),
            }
        }

        fn ally(&mut self, a: u32, b: u32) {
            self.state.alliances.form(AgentId(a), AgentId(b), t0()).unwrap();
            self.state.agent_mut(AgentId(a)).unwrap().alliance_with = Some(AgentId(b));
            self.state.agent_mut(AgentId(b)).unwrap().alliance_with = Some(AgentId(a));
        }

        fn check(&self, actor: u32, action: GameAction) -> Result<ActionPlan, ValidationFeedback> {
            let ctx = ValidationContext {
                state: &self.state,
                rules: &self.rules,
                bounds: MapBounds::default(),
                terrain: &self.terrain,
                now: t0(),
            };
            validate(&ctx, AgentId(actor), &action)
        }
    }

    fn reason(result: Result<ActionPlan, ValidationFeedback>) -> RejectionReason {
        result.unwrap_err().reason
    }

    #[test]
    fn battle_between_neighbours_is_simple() {
        let fx = Fixture::new(&[(1, 0, 0, 1_000), (2, 1, 1, 500)]);
        let plan = fx.check(1, GameAction::Battle { target: AgentId(2) }).unwrap();
        match &plan {
            ActionPlan::Battle {
                battle_type,
                side_a,
                side_b,
                started_at,
                ..
            } => {
                assert_eq!(*battle_type, BattleType::Simple);
                assert_eq!(side_a, &vec![AgentId(1)]);
                assert_eq!(side_b, &vec![AgentId(2)]);
                assert_eq!(*started_at, t0());
            }
            other => panic!("unexpected plan {other:?}"),
        }
        assert_eq!(plan.instruction().name(), "startBattleSimple");
    }

    #[test]
    fn battle_cooldown_rejects() {
        let mut fx = Fixture::new(&[(1, 0, 0, 1_000), (2, 1, 1, 500)]);
        fx.state
            .cooldowns
            .refresh(AgentId(1), ActionKind::Battle, TimeDelta::hours(4), t0());
        let feedback = fx
            .check(1, GameAction::Battle { target: AgentId(2) })
            .unwrap_err();
        assert_eq!(feedback.reason, RejectionReason::BattleCooldown);
        assert_eq!(feedback.reason.to_string(), "battle cooldown");
        assert_eq!(feedback.retry_at, Some(t0() + TimeDelta::hours(4)));
    }

    #[test]
    fn target_cooldown_also_rejects() {
        let mut fx = Fixture::new(&[(1, 0, 0, 1_000), (2, 1, 1, 500)]);
        fx.state
            .cooldowns
            .refresh(AgentId(2), ActionKind::Battle, TimeDelta::hours(1), t0());
        assert_eq!(
            reason(fx.check(1, GameAction::Battle { target: AgentId(2) })),
            RejectionReason::BattleCooldown
        );
    }

    #[test]
    fn battle_range_and_markers() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 3, 0, 10), (3, 0, 1, 10)]);
        assert_eq!(
            reason(fx.check(1, GameAction::Battle { target: AgentId(2) })),
            RejectionReason::OutOfRange
        );
        fx.state.agent_mut(AgentId(3)).unwrap().battle_started_at = Some(t0());
        assert_eq!(
            reason(fx.check(1, GameAction::Battle { target: AgentId(3) })),
            RejectionReason::TargetInBattle
        );
        assert_eq!(
            reason(fx.check(1, GameAction::Battle { target: AgentId(1) })),
            RejectionReason::SelfTarget
        );
        assert_eq!(
            reason(fx.check(1, GameAction::Battle { target: AgentId(9) })),
            RejectionReason::UnknownTarget
        );
    }

    #[test]
    fn allies_join_their_sides() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10), (3, 9, 9, 10), (4, 0, 1, 10)]);
        fx.ally(1, 3);
        let plan = fx.check(2, GameAction::Battle { target: AgentId(1) }).unwrap();
        assert_eq!(plan.participants(), vec![AgentId(1), AgentId(2), AgentId(3)]);
        assert_eq!(plan.instruction().name(), "startBattleAgentVsAlliance");

        fx.ally(2, 4);
        let plan = fx.check(2, GameAction::Battle { target: AgentId(1) }).unwrap();
        assert_eq!(plan.instruction().name(), "startBattleAllianceVsAlliance");
    }

    #[test]
    fn busy_ally_stays_out() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10), (3, 9, 9, 10)]);
        fx.ally(1, 3);
        fx.state
            .cooldowns
            .refresh(AgentId(3), ActionKind::Battle, TimeDelta::hours(1), t0());
        let plan = fx.check(2, GameAction::Battle { target: AgentId(1) }).unwrap();
        assert_eq!(plan.instruction().name(), "startBattleSimple");
    }

    #[test]
    fn cannot_battle_ally_or_recent_ally() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10)]);
        fx.ally(1, 2);
        assert_eq!(
            reason(fx.check(1, GameAction::Battle { target: AgentId(2) })),
            RejectionReason::TargetIsAlly
        );
        fx.state.alliances.dissolve_for(AgentId(1), t0()).unwrap();
        fx.state.agent_mut(AgentId(1)).unwrap().alliance_with = None;
        fx.state.agent_mut(AgentId(2)).unwrap().alliance_with = None;
        let feedback = fx
            .check(1, GameAction::Battle { target: AgentId(2) })
            .unwrap_err();
        assert_eq!(feedback.reason, RejectionReason::BattleBlocked);
        assert_eq!(feedback.retry_at, Some(t0() + TimeDelta::hours(4)));
    }

    #[test]
    fn move_rules() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10)]);
        assert_eq!(
            reason(fx.check(1, GameAction::Move { x: 40, y: 0 })),
            RejectionReason::OutOfBounds
        );
        assert_eq!(
            reason(fx.check(1, GameAction::Move { x: 0, y: 0 })),
            RejectionReason::SamePosition
        );
        fx.terrain.set(Position::new(3, 4), Terrain::Mountain);
        let plan = fx.check(1, GameAction::Move { x: 3, y: 4 }).unwrap();
        match plan {
            ActionPlan::Move {
                terrain, profile, ..
            } => {
                assert_eq!(terrain, Terrain::Mountain);
                assert_eq!(profile.cost, 10);
            }
            other => panic!("unexpected plan {other:?}"),
        }
        fx.state
            .cooldowns
            .refresh(AgentId(1), ActionKind::Move, TimeDelta::minutes(5), t0());
        assert_eq!(
            reason(fx.check(1, GameAction::Move { x: 1, y: 0 })),
            RejectionReason::MoveCooldown
        );
        fx.state.agent_mut(AgentId(1)).unwrap().battle_started_at = Some(t0());
        assert_eq!(
            reason(fx.check(1, GameAction::Move { x: 1, y: 0 })),
            RejectionReason::InBattle
        );
    }

    #[test]
    fn alliance_rules() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10), (3, 0, 1, 10)]);
        assert!(fx.check(1, GameAction::Alliance { target: AgentId(2) }).is_ok());
        fx.ally(2, 3);
        assert_eq!(
            reason(fx.check(1, GameAction::Alliance { target: AgentId(2) })),
            RejectionReason::AllianceExists
        );
        fx.state
            .cooldowns
            .refresh(AgentId(1), ActionKind::Alliance, TimeDelta::hours(24), t0());
        fx.state.alliances.dissolve_for(AgentId(2), t0()).unwrap();
        fx.state.agent_mut(AgentId(2)).unwrap().alliance_with = None;
        fx.state.agent_mut(AgentId(3)).unwrap().alliance_with = None;
        assert_eq!(
            reason(fx.check(1, GameAction::Alliance { target: AgentId(2) })),
            RejectionReason::AllianceCooldown
        );
    }

    #[test]
    fn break_requires_alliance() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10)]);
        assert_eq!(
            reason(fx.check(1, GameAction::BreakAlliance)),
            RejectionReason::NoAllianceToBreak
        );
        fx.ally(1, 2);
        assert_eq!(
            fx.check(2, GameAction::BreakAlliance).unwrap(),
            ActionPlan::BreakAlliance {
                initiator: AgentId(2),
                partner: AgentId(1)
            }
        );
    }

    #[test]
    fn ignore_rules() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 20, 0, 10)]);
        fx.state.agent_mut(AgentId(2)).unwrap().alive = false;
        let plan = fx
            .check(
                1,
                GameAction::Ignore {
                    target: AgentId(2),
                    duration_secs: None,
                },
            )
            .unwrap();
        assert_eq!(
            plan,
            ActionPlan::Ignore {
                agent: AgentId(1),
                target: AgentId(2),
                until: t0() + TimeDelta::hours(4)
            }
        );
        fx.state
            .ignores
            .record(AgentId(1), AgentId(2), t0() + TimeDelta::hours(1));
        assert_eq!(
            reason(fx.check(
                1,
                GameAction::Ignore {
                    target: AgentId(2),
                    duration_secs: Some(60)
                }
            )),
            RejectionReason::AlreadyIgnoring
        );
        assert_eq!(
            reason(fx.check(
                1,
                GameAction::Ignore {
                    target: AgentId(2),
                    duration_secs: Some(0)
                }
            )),
            RejectionReason::InvalidDuration
        );
    }

    #[test]
    fn closed_session_and_dead_actor() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10)]);
        fx.state.agent_mut(AgentId(2)).unwrap().alive = false;
        assert_eq!(
            reason(fx.check(2, GameAction::Move { x: 2, y: 2 })),
            RejectionReason::AgentNotAlive
        );
        fx.state.session.close(GameEndReason::Operator, t0());
        assert_eq!(
            reason(fx.check(1, GameAction::Move { x: 2, y: 2 })),
            RejectionReason::GameNotActive
        );
    }

    #[test]
    fn lock_set_covers_allies() {
        let mut fx = Fixture::new(&[(1, 0, 0, 10), (2, 1, 0, 10), (3, 9, 9, 10), (4, 0, 1, 10)]);
        fx.ally(1, 3);
        fx.ally(2, 4);
        assert_eq!(
            lock_set(&fx.state, AgentId(2), &GameAction::Battle { target: AgentId(1) }),
            vec![AgentId(1), AgentId(2), AgentId(3), AgentId(4)]
        );
        assert_eq!(
            lock_set(&fx.state, AgentId(4), &GameAction::BreakAlliance),
            vec![AgentId(2), AgentId(4)]
        );
    }
}
