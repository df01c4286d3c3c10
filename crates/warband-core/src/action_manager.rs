//! Action validation and execution.
//!
//! [`ActionManager::execute`] takes one untrusted [`GameAction`] through
//! the full pipeline under the per-agent locks of every agent it touches:
//!
//! 1. Lock the participant set (actor, target, and the allies that may
//!    join a battle), re-locking if the set changed while waiting.
//! 2. Fetch the authoritative accounts and mirror alive flags and
//!    balances into local state.
//! 3. Validate. A rejection is returned as structured feedback and
//!    nothing is submitted. A battle reserves its marker until the commit.
//! 4. Submit the matching ledger instruction. A failure leaves local
//!    state untouched.
//! 5. Commit locally. Moves roll the destination's death chance; a
//!    fatal crossing is followed by a `killAgent` call.
//!
//! The manager holds no per-call state, so a retry starts over at step 1
//! and re-validates against whatever the previous attempt left behind.

use std::sync::Arc;

use warband_agents::{ActionPlan, AgentError, Applied, apply_plan, lock_set, validate};
use warband_ledger::{AgentAccount, LedgerClient, LedgerError};
use warband_types::{
    AgentId, GameAction, NarrativeEvent, RejectionReason, StateChanges, ValidationFeedback,
};

use crate::clock::GameClock;
use crate::kills::settle_kills;
use crate::state::GameContext;

/// Why an action did not execute.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// A rule rejected the action. Never retried.
    #[error("action rejected: {0}")]
    Validation(ValidationFeedback),

    /// The ledger call failed; nothing was committed locally.
    #[error("ledger execution failed: {0}")]
    LedgerExecution(#[from] LedgerError),

    /// Local bookkeeping failed after the ledger accepted the call.
    #[error("local commit failed: {0}")]
    State(#[from] AgentError),

    /// The participant set kept changing while locking.
    #[error("could not lock a stable participant set for agent {0}")]
    LockContention(AgentId),
}

impl ActionError {
    /// Whether running the action again can succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::LedgerExecution(e) => e.is_transient(),
            Self::LockContention(_) => true,
            Self::Validation(_) | Self::State(_) => false,
        }
    }
}

/// A successfully executed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// False only when the actor died crossing hostile terrain.
    pub succeeded: bool,
    /// Human-readable notes about what happened.
    pub side_effects: Vec<String>,
    /// Reference of the accepted ledger instruction.
    pub settlement_reference: Option<String>,
    /// Records to mirror.
    pub changes: StateChanges,
    /// Events to broadcast.
    pub events: Vec<NarrativeEvent>,
}

/// Validates and executes agent actions.
pub struct ActionManager<L> {
    ctx: Arc<GameContext>,
    ledger: Arc<L>,
    clock: Arc<dyn GameClock>,
}

impl<L: LedgerClient> ActionManager<L> {
    /// Create a manager over shared state.
    pub fn new(ctx: Arc<GameContext>, ledger: Arc<L>, clock: Arc<dyn GameClock>) -> Self {
        Self { ctx, ledger, clock }
    }

    /// Validate and execute one action for `actor`.
    ///
    /// Account refreshes made before a rejection are stashed on the
    /// context so the caller can still mirror them.
    pub async fn execute(
        &self,
        actor: AgentId,
        action: &GameAction,
    ) -> Result<ActionOutcome, ActionError> {
        let Some(_held) = self
            .ctx
            .lock_stable(|state| lock_set(state, actor, action))
            .await
        else {
            return Err(ActionError::LockContention(actor));
        };

        let mut applied = Applied::default();
        match self.execute_locked(actor, action, &mut applied).await {
            Ok((reference, survived)) => {
                tracing::info!(
                    agent_id = %actor,
                    action = action.label(),
                    reference = %reference,
                    "Action executed"
                );
                Ok(ActionOutcome {
                    succeeded: survived,
                    side_effects: applied.side_effects,
                    settlement_reference: Some(reference),
                    changes: applied.changes,
                    events: applied.events,
                })
            }
            Err(e) => {
                self.ctx.stash(applied).await;
                Err(e)
            }
        }
    }

    async fn execute_locked(
        &self,
        actor: AgentId,
        action: &GameAction,
        applied: &mut Applied,
    ) -> Result<(String, bool), ActionError> {
        let now = self.clock.now();

        // 1. Authoritative refresh.
        let game = self.ledger.fetch_game().await?;
        if !game.active {
            return Err(ActionError::Validation(ValidationFeedback::new(
                RejectionReason::GameNotActive,
            )));
        }
        let accounts = self.fetch_accounts(actor, action).await?;
        applied.merge(self.ctx.sync_accounts(&accounts, now).await?);

        // 2. Structural checks.
        let mut plan = {
            let state = self.ctx.world.read().await;
            validate(&self.ctx.validation(&state, now), actor, action)
        }
        .map_err(ActionError::Validation)?;
        let reserved = match &mut plan {
            ActionPlan::Battle { started_at, .. } => {
                let reservation = self.ctx.reserve_marker(*started_at).await;
                *started_at = reservation.marker();
                Some(reservation)
            }
            _ => None,
        };

        // 3. Settlement.
        let instruction = plan.instruction();
        tracing::debug!(agent_id = %actor, instruction = instruction.name(), "Submitting");
        let receipt = self.ledger.submit(instruction).await?;

        // 4. Local commit.
        let terrain_death = match &plan {
            ActionPlan::Move { profile, .. } => self.ctx.roll(|rng| profile.roll_death(rng)).await,
            _ => false,
        };
        let committed = {
            let mut state = self.ctx.world.write().await;
            apply_plan(&mut state, &plan, terrain_death, &self.ctx.rules, now)?
        };
        drop(reserved);
        applied.merge(committed);
        if terrain_death {
            let notes = settle_kills(&self.ctx, &*self.ledger, &[actor]).await;
            applied.side_effects.extend(notes);
        }
        Ok((receipt.reference, !terrain_death))
    }

    /// Load every locally known participant from the ledger.
    async fn fetch_accounts(
        &self,
        actor: AgentId,
        action: &GameAction,
    ) -> Result<Vec<AgentAccount>, ActionError> {
        let ids: Vec<AgentId> = {
            let state = self.ctx.world.read().await;
            lock_set(&state, actor, action)
                .into_iter()
                .filter(|id| state.agents.contains_key(id))
                .collect()
        };
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            match self.ledger.fetch_agent(id).await {
                Ok(account) => accounts.push(account),
                Err(LedgerError::AccountNotFound(missing)) if missing == actor => {
                    return Err(ActionError::Validation(ValidationFeedback::new(
                        RejectionReason::UnknownAgent,
                    )));
                }
                Err(LedgerError::AccountNotFound(missing)) if Some(missing) == action.target() => {
                    return Err(ActionError::Validation(ValidationFeedback::new(
                        RejectionReason::UnknownTarget,
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(accounts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use warband_agents::RulesConfig;
    use warband_ledger::{GameAccount, InMemoryLedger, Instruction, SettlementReceipt};
    use warband_types::{ActionKind, GameId, GameSession, Position, Terrain};
    use warband_world::TerrainMap;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AgentSeed;
    use crate::state::seed_world;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    struct Fixture {
        ctx: Arc<GameContext>,
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        manager: ActionManager<InMemoryLedger>,
    }

    async fn fixture(agents: &[(u32, i32, i32)], terrain: TerrainMap, rules: RulesConfig) -> Fixture {
        let roster: Vec<AgentSeed> = agents
            .iter()
            .map(|(id, x, y)| AgentSeed {
                id: AgentId(*id),
                name: format!("agent-{id}"),
                x: *x,
                y: *y,
                balance: 1_000,
            })
            .collect();
        let ledger = Arc::new(InMemoryLedger::new(GameId(1)));
        for seed in &roster {
            ledger
                .register(AgentAccount::new(seed.id, seed.position(), seed.balance))
                .await
                .unwrap();
        }
        let world = seed_world(GameSession::open(GameId(1), t0()), &roster).unwrap();
        let ctx = Arc::new(GameContext::new(world, rules, terrain, 11));
        let clock = Arc::new(ManualClock::new(t0()));
        let manager = ActionManager::new(Arc::clone(&ctx), Arc::clone(&ledger), clock.clone());
        Fixture {
            ctx,
            ledger,
            clock,
            manager,
        }
    }

    async fn plains(agents: &[(u32, i32, i32)]) -> Fixture {
        fixture(agents, TerrainMap::plains(), RulesConfig::default()).await
    }

    fn rejection(result: Result<ActionOutcome, ActionError>) -> RejectionReason {
        match result {
            Err(ActionError::Validation(feedback)) => feedback.reason,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn move_settles_and_sets_cooldown() {
        let fx = plains(&[(1, 0, 0)]).await;
        let outcome = fx
            .manager
            .execute(AgentId(1), &GameAction::Move { x: 1, y: 0 })
            .await
            .unwrap();
        assert!(outcome.succeeded);
        assert!(outcome.settlement_reference.is_some());
        assert_eq!(outcome.events.len(), 1);

        let state = fx.ctx.world.read().await;
        assert_eq!(state.agent(AgentId(1)).unwrap().position, Position::new(1, 0));
        assert!(state.cooldowns.is_on_cooldown(AgentId(1), ActionKind::Move, t0()));
        assert_eq!(
            fx.ledger.account(AgentId(1)).await.unwrap().position,
            Position::new(1, 0)
        );
    }

    #[tokio::test]
    async fn second_move_hits_cooldown_until_expiry() {
        let fx = plains(&[(1, 0, 0)]).await;
        fx.manager
            .execute(AgentId(1), &GameAction::Move { x: 1, y: 0 })
            .await
            .unwrap();
        let again = fx.manager.execute(AgentId(1), &GameAction::Move { x: 2, y: 0 }).await;
        assert_eq!(rejection(again), RejectionReason::MoveCooldown);

        fx.clock.advance(TimeDelta::hours(1));
        assert!(
            fx.manager
                .execute(AgentId(1), &GameAction::Move { x: 2, y: 0 })
                .await
                .is_ok()
        );
        assert_eq!(fx.ledger.count("moveAgent").await, 2);
    }

    #[tokio::test]
    async fn rejection_submits_nothing() {
        let fx = plains(&[(1, 0, 0), (2, 10, 0)]).await;
        let result = fx
            .manager
            .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
            .await;
        assert_eq!(rejection(result), RejectionReason::OutOfRange);
        assert!(fx.ledger.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn ledger_failure_leaves_state_untouched() {
        let fx = plains(&[(1, 0, 0), (2, 1, 0)]).await;
        fx.ledger.fail_next(1).await;
        let result = fx
            .manager
            .execute(AgentId(1), &GameAction::Alliance { target: AgentId(2) })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        let state = fx.ctx.world.read().await;
        assert_eq!(state.agent(AgentId(1)).unwrap().alliance_with, None);
        assert!(!state.cooldowns.is_on_cooldown(AgentId(1), ActionKind::Alliance, t0()));
    }

    #[tokio::test]
    async fn retry_after_transient_failure_revalidates() {
        let fx = plains(&[(1, 0, 0), (2, 1, 0)]).await;
        fx.ledger.fail_next(1).await;
        let action = GameAction::Alliance { target: AgentId(2) };
        assert!(fx.manager.execute(AgentId(1), &action).await.is_err());
        assert!(fx.manager.execute(AgentId(1), &action).await.is_ok());
        // A third attempt is rejected by the fresh checks, not resubmitted.
        let third = fx.manager.execute(AgentId(1), &action).await;
        assert_eq!(rejection(third), RejectionReason::AllianceExists);
        assert_eq!(fx.ledger.count("formAlliance").await, 1);
    }

    #[tokio::test]
    async fn battle_marks_both_sides() {
        let fx = plains(&[(1, 0, 0), (2, 1, 0)]).await;
        let outcome = fx
            .manager
            .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
            .await
            .unwrap();
        assert_eq!(outcome.changes.battles.len(), 1);
        let state = fx.ctx.world.read().await;
        let a = state.agent(AgentId(1)).unwrap().battle_started_at;
        assert_eq!(a, Some(t0()));
        assert_eq!(state.agent(AgentId(2)).unwrap().battle_started_at, a);
        assert!(matches!(
            fx.ledger.submitted().await.first(),
            Some(Instruction::StartBattleSimple { .. })
        ));
    }

    #[tokio::test]
    async fn closed_game_rejects_everything() {
        let fx = plains(&[(1, 0, 0)]).await;
        fx.ledger.end_game().await;
        let result = fx.manager.execute(AgentId(1), &GameAction::Move { x: 1, y: 0 }).await;
        assert_eq!(rejection(result), RejectionReason::GameNotActive);
    }

    #[tokio::test]
    async fn ledger_death_is_mirrored_before_validation() {
        let fx = plains(&[(1, 0, 0), (2, 1, 0)]).await;
        fx.ledger
            .submit(Instruction::KillAgent { agent: AgentId(2) })
            .await
            .unwrap();
        let result = fx
            .manager
            .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
            .await;
        assert_eq!(rejection(result), RejectionReason::TargetNotAlive);
        assert!(!fx.ctx.world.read().await.agent(AgentId(2)).unwrap().alive);
        // The death is waiting to be mirrored.
        assert!(!fx.ctx.take_stashed().await.is_empty());
    }

    #[tokio::test]
    async fn fatal_crossing_kills_at_origin() {
        let mut terrain = TerrainMap::plains();
        terrain.set(Position::new(1, 0), Terrain::River);
        let fx = fixture(&[(1, 0, 0)], terrain, RulesConfig::default()).await;

        // Reseed until the roll is fatal; the river death chance is 5%.
        let mut died = false;
        for _ in 0..200 {
            let outcome = fx
                .manager
                .execute(AgentId(1), &GameAction::Move { x: 1, y: 0 })
                .await;
            match outcome {
                Ok(o) if !o.succeeded => {
                    died = true;
                    break;
                }
                Ok(_) => {
                    // Walk back and wait out the cooldown.
                    fx.clock.advance(TimeDelta::hours(4));
                    fx.manager
                        .execute(AgentId(1), &GameAction::Move { x: 0, y: 0 })
                        .await
                        .unwrap();
                    fx.clock.advance(TimeDelta::hours(4));
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(died);
        let state = fx.ctx.world.read().await;
        let agent = state.agent(AgentId(1)).unwrap();
        assert!(!agent.alive);
        assert_eq!(agent.position, Position::new(0, 0));
        assert!(state.pending_kills.is_empty());
        assert!(!fx.ledger.account(AgentId(1)).await.unwrap().alive);
    }

    /// Delays every submission so concurrent calls overlap on the ledger.
    struct SlowLedger {
        inner: Arc<InMemoryLedger>,
        delay: Duration,
    }

    impl LedgerClient for SlowLedger {
        async fn fetch_game(&self) -> Result<GameAccount, LedgerError> {
            self.inner.fetch_game().await
        }

        async fn fetch_agent(&self, agent: AgentId) -> Result<AgentAccount, LedgerError> {
            self.inner.fetch_agent(agent).await
        }

        async fn submit(&self, instruction: Instruction) -> Result<SettlementReceipt, LedgerError> {
            tokio::time::sleep(self.delay).await;
            self.inner.submit(instruction).await
        }

        async fn close(&self) -> Result<(), LedgerError> {
            self.inner.close().await
        }
    }

    fn slow_manager(fx: &Fixture) -> Arc<ActionManager<SlowLedger>> {
        let ledger = Arc::new(SlowLedger {
            inner: Arc::clone(&fx.ledger),
            delay: Duration::from_millis(20),
        });
        Arc::new(ActionManager::new(
            Arc::clone(&fx.ctx),
            ledger,
            fx.clock.clone(),
        ))
    }

    #[tokio::test]
    async fn concurrent_attacks_on_one_target_open_one_battle() {
        let fx = plains(&[(1, 0, 0), (2, 1, 0), (3, 2, 0)]).await;
        let manager = slow_manager(&fx);
        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
                    .await
            })
        };
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute(AgentId(3), &GameAction::Battle { target: AgentId(2) })
                    .await
            })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let rejected: Vec<RejectionReason> = results
            .into_iter()
            .filter_map(|r| match r {
                Err(ActionError::Validation(feedback)) => Some(feedback.reason),
                _ => None,
            })
            .collect();
        assert_eq!(rejected, vec![RejectionReason::TargetInBattle]);
        assert_eq!(fx.ledger.count("startBattleSimple").await, 1);

        let state = fx.ctx.world.read().await;
        assert_eq!(state.battles.active().count(), 1);
        let in_battle = [1, 2, 3]
            .iter()
            .filter(|id| state.agent(AgentId(**id)).unwrap().in_battle())
            .count();
        assert_eq!(in_battle, 2);
    }

    #[tokio::test]
    async fn concurrent_battles_on_disjoint_pairs_get_distinct_markers() {
        let fx = plains(&[(1, 0, 0), (2, 1, 0), (3, 10, 0), (4, 11, 0)]).await;
        let manager = slow_manager(&fx);
        let left = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
                    .await
            })
        };
        let right = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute(AgentId(3), &GameAction::Battle { target: AgentId(4) })
                    .await
            })
        };
        left.await.unwrap().unwrap();
        right.await.unwrap().unwrap();

        let state = fx.ctx.world.read().await;
        let marker = |id: u32| state.agent(AgentId(id)).unwrap().battle_started_at.unwrap();
        assert_eq!(marker(1), marker(2));
        assert_eq!(marker(3), marker(4));
        assert_ne!(marker(1), marker(3));
        assert_eq!(state.battles.active().count(), 2);
    }
}
