//! Periodic battle settlement.
//!
//! Every participant of one battle carries the same open-battle marker.
//! A sweep groups marked agents by marker, rebuilds the two sides from
//! direct alliances, and settles each group that has been open for at
//! least the minimum duration. Groups touch disjoint agents and run
//! concurrently, each under the locks of its own members. A group that
//! cannot be settled (one side left, or more than two sides) is released
//! without an outcome once it outlives the maximum battle duration.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use warband_agents::{
    AgentError, Applied, GroupShape, OutcomePolicy, Resolution, WorldState, apply_abandon,
    apply_resolution, group_by_marker, roll_battle_deaths, roll_outcome, shape_group, side_power,
};
use warband_ledger::{AgentAccount, Instruction, LedgerClient, LedgerError};
use warband_types::{AgentId, BattleSide, BattleType};

use crate::clock::GameClock;
use crate::kills::settle_kills;
use crate::state::GameContext;

/// Why a group could not be settled.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A ledger call failed.
    #[error("ledger call failed: {0}")]
    Ledger(#[from] LedgerError),

    /// Local bookkeeping failed.
    #[error("local commit failed: {0}")]
    State(#[from] AgentError),

    /// The instruction could not be built from the sides.
    #[error("battle {started_at} has sides {side_a} v {side_b} that no instruction fits")]
    Shape {
        /// Marker of the group.
        started_at: DateTime<Utc>,
        /// Size of side A.
        side_a: usize,
        /// Size of side B.
        side_b: usize,
    },
}

/// Why a group was left alone this sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Open for less than the minimum duration.
    TooYoung,
    /// Only one side is left and the group is not old enough to abandon.
    SingleSide,
    /// More than two sides, or an unsupported size, and not old enough to
    /// abandon.
    Malformed,
    /// The ledger reports a participant dead.
    DeadParticipant,
    /// The members changed while locking.
    LockContention,
    /// Every member left the group before it was locked.
    Vanished,
}

/// What happened to one group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupResult {
    /// Settled on the ledger and committed.
    Resolved {
        /// Marker of the battle.
        started_at: DateTime<Utc>,
        /// Winning side.
        winning_side: BattleSide,
        /// Losers that died afterwards.
        deaths: Vec<AgentId>,
    },
    /// Left for a later sweep.
    Skipped(SkipReason),
    /// Markers cleared without an outcome.
    Abandoned,
}

/// Totals of one sweep.
#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    /// Groups settled.
    pub resolved: usize,
    /// Groups left for later.
    pub skipped: usize,
    /// Groups released without an outcome.
    pub abandoned: usize,
    /// Groups whose settlement failed.
    pub failed: usize,
    /// Every committed change, for mirroring and broadcast.
    pub applied: Applied,
}

/// Settles battles once they have been open long enough.
pub struct BattleResolver<L> {
    ctx: Arc<GameContext>,
    ledger: Arc<L>,
    clock: Arc<dyn GameClock>,
}

impl<L: LedgerClient> BattleResolver<L> {
    /// Create a resolver over shared state.
    pub fn new(ctx: Arc<GameContext>, ledger: Arc<L>, clock: Arc<dyn GameClock>) -> Self {
        Self { ctx, ledger, clock }
    }

    /// Run one pass over every open battle.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let groups = {
            let state = self.ctx.world.read().await;
            if !state.session.active {
                return SweepReport::default();
            }
            group_by_marker(state.agents.values())
        };
        if groups.is_empty() {
            return SweepReport::default();
        }
        tracing::debug!(groups = groups.len(), "Sweeping battles");

        let results = join_all(
            groups
                .into_iter()
                .map(|(marker, members)| self.settle_group(marker, members, now)),
        )
        .await;

        let mut report = SweepReport::default();
        for result in results {
            match result {
                Ok((GroupResult::Resolved { .. }, applied)) => {
                    report.resolved = report.resolved.saturating_add(1);
                    report.applied.merge(applied);
                }
                Ok((GroupResult::Abandoned, applied)) => {
                    report.abandoned = report.abandoned.saturating_add(1);
                    report.applied.merge(applied);
                }
                Ok((GroupResult::Skipped(_), applied)) => {
                    report.skipped = report.skipped.saturating_add(1);
                    report.applied.merge(applied);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Battle settlement failed; will retry next sweep");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        if report.resolved > 0 || report.abandoned > 0 || report.failed > 0 {
            tracing::info!(
                resolved = report.resolved,
                abandoned = report.abandoned,
                skipped = report.skipped,
                failed = report.failed,
                "Battle sweep complete"
            );
        }
        report
    }

    async fn settle_group(
        &self,
        marker: DateTime<Utc>,
        members: Vec<AgentId>,
        now: DateTime<Utc>,
    ) -> Result<(GroupResult, Applied), ResolveError> {
        let age = now.signed_duration_since(marker);
        if age < self.ctx.rules.min_battle() {
            return Ok((GroupResult::Skipped(SkipReason::TooYoung), Applied::default()));
        }

        let Some(_held) = self.ctx.lock_stable(|state| marked(state, marker)).await else {
            tracing::debug!(%marker, members = ?members, "Battle group kept changing while locking");
            return Ok((GroupResult::Skipped(SkipReason::LockContention), Applied::default()));
        };

        let (members, shape) = {
            let state = self.ctx.world.read().await;
            let members = marked(&state, marker);
            let shape = shape_group(&members, |id| state.ally_of(id));
            (members, shape)
        };
        if members.is_empty() {
            return Ok((GroupResult::Skipped(SkipReason::Vanished), Applied::default()));
        }

        match shape {
            GroupShape::Ready {
                battle_type,
                side_a,
                side_b,
            } => {
                let mut applied = Applied::default();
                let result = self
                    .settle_ready(marker, battle_type, side_a, side_b, now, &mut applied)
                    .await;
                match result {
                    Ok(outcome) => Ok((outcome, applied)),
                    Err(e) => {
                        self.ctx.stash(applied).await;
                        Err(e)
                    }
                }
            }
            GroupShape::SingleSide(side) => {
                if age <= self.ctx.rules.max_battle() {
                    tracing::debug!(%marker, side = ?side, "Battle has one side left; waiting");
                    return Ok((GroupResult::Skipped(SkipReason::SingleSide), Applied::default()));
                }
                let applied = {
                    let mut state = self.ctx.world.write().await;
                    apply_abandon(&mut state, marker, &members, now)?
                };
                Ok((GroupResult::Abandoned, applied))
            }
            GroupShape::Malformed(sides) => {
                if age <= self.ctx.rules.max_battle() {
                    tracing::warn!(%marker, sides = ?sides, "Malformed battle group; skipping");
                    return Ok((GroupResult::Skipped(SkipReason::Malformed), Applied::default()));
                }
                tracing::warn!(%marker, sides = ?sides, "Malformed battle group expired; releasing");
                let applied = {
                    let mut state = self.ctx.world.write().await;
                    apply_abandon(&mut state, marker, &members, now)?
                };
                Ok((GroupResult::Abandoned, applied))
            }
        }
    }

    async fn settle_ready(
        &self,
        marker: DateTime<Utc>,
        battle_type: BattleType,
        side_a: Vec<AgentId>,
        side_b: Vec<AgentId>,
        now: DateTime<Utc>,
        applied: &mut Applied,
    ) -> Result<GroupResult, ResolveError> {
        let participants: Vec<AgentId> = side_a.iter().chain(&side_b).copied().collect();

        // 1. Authoritative balances and liveness.
        let accounts = self.fetch_all(&participants).await?;
        applied.merge(self.ctx.sync_accounts(&accounts, now).await?);
        if accounts.iter().any(|a| !a.alive) {
            tracing::info!(%marker, "Battle participant died before settlement; regrouping next sweep");
            return Ok(GroupResult::Skipped(SkipReason::DeadParticipant));
        }
        if accounts.iter().any(|a| a.battle_started_at != Some(marker)) {
            // The ledger no longer holds this battle; there is nothing to settle.
            tracing::warn!(%marker, "Ledger does not hold the battle marker; releasing locally");
            let mut state = self.ctx.world.write().await;
            applied.merge(apply_abandon(&mut state, marker, &participants, now)?);
            return Ok(GroupResult::Abandoned);
        }
        let balances: BTreeMap<AgentId, u64> =
            accounts.iter().map(|a| (a.id, a.token_balance)).collect();
        let power = |side: &[AgentId]| {
            side_power(side.iter().filter_map(|id| balances.get(id).copied()))
        };
        let (power_a, power_b) = (power(&side_a), power(&side_b));

        // 2. Outcome and settlement.
        let policy = OutcomePolicy::from(&self.ctx.rules);
        let outcome = self
            .ctx
            .roll(|rng| roll_outcome(power_a, power_b, policy, rng))
            .await;
        let instruction =
            resolve_instruction(marker, &side_a, &side_b, outcome.winner, outcome.loss_percent)?;
        tracing::debug!(
            %marker,
            battle_type = battle_type.as_str(),
            power_a = %power_a,
            power_b = %power_b,
            win_probability = outcome.win_probability,
            "Submitting resolution"
        );
        let receipt = self.ledger.submit(instruction).await?;

        // 3. Post-settlement balances. A failed read leaves the local balance
        // for the next sync to correct.
        let mut settled = BTreeMap::new();
        for id in &participants {
            match self.ledger.fetch_agent(*id).await {
                Ok(account) => {
                    settled.insert(*id, account.token_balance);
                }
                Err(e) => {
                    tracing::warn!(agent_id = %id, error = %e, "Could not re-read balance after battle");
                }
            }
        }

        // 4. Deaths and local commit.
        let losers = match outcome.winner {
            BattleSide::A => side_b.clone(),
            BattleSide::B => side_a.clone(),
        };
        let chance = self.ctx.rules.battle_death_chance;
        let deaths = self
            .ctx
            .roll(|rng| roll_battle_deaths(&losers, chance, rng))
            .await;
        let resolution = Resolution {
            started_at: marker,
            battle_type,
            side_a,
            side_b,
            winning_side: outcome.winner,
            loss_percent: outcome.loss_percent,
            tokens_transferred: receipt.tokens_transferred,
            balances: settled,
            deaths: deaths.clone(),
        };
        let committed = {
            let mut state = self.ctx.world.write().await;
            apply_resolution(&mut state, &resolution, &self.ctx.rules, now)?
        };
        applied.merge(committed);
        if !deaths.is_empty() {
            let notes = settle_kills(&self.ctx, &*self.ledger, &deaths).await;
            applied.side_effects.extend(notes);
        }
        tracing::info!(
            %marker,
            winner = ?outcome.winner,
            loss_percent = outcome.loss_percent,
            tokens = receipt.tokens_transferred,
            deaths = deaths.len(),
            "Battle resolved"
        );
        Ok(GroupResult::Resolved {
            started_at: marker,
            winning_side: outcome.winner,
            deaths,
        })
    }

    async fn fetch_all(&self, ids: &[AgentId]) -> Result<Vec<AgentAccount>, LedgerError> {
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            accounts.push(self.ledger.fetch_agent(*id).await?);
        }
        Ok(accounts)
    }
}

/// Alive agents carrying `marker`, ascending.
fn marked(state: &WorldState, marker: DateTime<Utc>) -> Vec<AgentId> {
    state
        .agents
        .values()
        .filter(|a| a.alive && a.battle_started_at == Some(marker))
        .map(|a| a.id)
        .collect()
}

/// The settlement call for a decided battle.
fn resolve_instruction(
    marker: DateTime<Utc>,
    side_a: &[AgentId],
    side_b: &[AgentId],
    winner: BattleSide,
    loss_percent: u8,
) -> Result<Instruction, ResolveError> {
    let shape_error = || ResolveError::Shape {
        started_at: marker,
        side_a: side_a.len(),
        side_b: side_b.len(),
    };
    let a_wins = winner == BattleSide::A;
    match (side_a, side_b) {
        ([a], [b]) => {
            let (winner, loser) = if a_wins { (*a, *b) } else { (*b, *a) };
            Ok(Instruction::ResolveBattleSimple {
                winner,
                loser,
                loss_percent,
            })
        }
        ([single], pair) | (pair, [single]) => {
            let single_is_a = side_a.len() == 1;
            Ok(Instruction::ResolveBattleAgentVsAlliance {
                single: *single,
                pair: <[AgentId; 2]>::try_from(pair).map_err(|_e| shape_error())?,
                loss_percent,
                single_wins: single_is_a == a_wins,
            })
        }
        (a, b) => Ok(Instruction::ResolveBattleAllianceVsAlliance {
            side_a: <[AgentId; 2]>::try_from(a).map_err(|_e| shape_error())?,
            side_b: <[AgentId; 2]>::try_from(b).map_err(|_e| shape_error())?,
            loss_percent,
            side_a_wins: a_wins,
        }),
    }
}
