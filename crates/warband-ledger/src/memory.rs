//! A simulated settlement program.
//!
//! [`InMemoryLedger`] enforces the same invariants as the real program
//! (alive participants, exclusive battle markers, symmetric alliances),
//! transfers tokens on battle resolution, and keeps an append-only log of
//! every accepted instruction.
//!
//! # Failure injection
//!
//! [`InMemoryLedger::fail_next`] makes the next `n` submissions fail with
//! [`LedgerError::Transient`] without touching state, which lets callers
//! exercise their retry paths deterministically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use warband_types::{AgentId, GameId};

use crate::LedgerError;
use crate::client::{AgentAccount, GameAccount, LedgerClient, SettlementReceipt};
use crate::conservation::{SupplyResult, verify_supply};
use crate::instruction::Instruction;

/// One accepted instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// The settlement reference returned to the caller.
    pub reference: String,
    /// The accepted instruction.
    pub instruction: Instruction,
    /// Tokens moved by the instruction.
    pub tokens_transferred: u64,
}

#[derive(Debug)]
struct Inner {
    game: GameAccount,
    agents: BTreeMap<AgentId, AgentAccount>,
    log: Vec<LogEntry>,
    registered_supply: u128,
    fail_next: u32,
    closed: bool,
}

/// Simulated settlement program for a single game.
#[derive(Debug)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    /// An active game with no agents.
    pub fn new(game_id: GameId) -> Self {
        Self {
            inner: Mutex::new(Inner {
                game: GameAccount {
                    game_id,
                    active: true,
                },
                agents: BTreeMap::new(),
                log: Vec::new(),
                registered_supply: 0,
                fail_next: 0,
                closed: false,
            }),
        }
    }

    /// Register an agent account and add its balance to the supply.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Rejected`] if the id is already registered.
    pub async fn register(&self, account: AgentAccount) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if inner.agents.contains_key(&account.id) {
            return Err(LedgerError::rejected("registerAgent", "agent already registered"));
        }
        inner.registered_supply = inner
            .registered_supply
            .checked_add(u128::from(account.token_balance))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        inner.agents.insert(account.id, account);
        Ok(())
    }

    /// Fail the next `count` submissions with a transient error.
    pub async fn fail_next(&self, count: u32) {
        self.inner.lock().await.fail_next = count;
    }

    /// Close the game on the program side.
    pub async fn end_game(&self) {
        self.inner.lock().await.game.active = false;
    }

    /// Every accepted instruction, in order.
    pub async fn submitted(&self) -> Vec<Instruction> {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .map(|e| e.instruction.clone())
            .collect()
    }

    /// The full instruction log.
    pub async fn log(&self) -> Vec<LogEntry> {
        self.inner.lock().await.log.clone()
    }

    /// Number of accepted instructions with the given program name.
    pub async fn count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|e| e.instruction.name() == name)
            .count()
    }

    /// Current account state, ignoring the closed flag.
    pub async fn account(&self, agent: AgentId) -> Option<AgentAccount> {
        self.inner.lock().await.agents.get(&agent).copied()
    }

    /// Check that no tokens were minted or burned.
    pub async fn verify_conservation(&self) -> SupplyResult {
        let inner = self.inner.lock().await;
        verify_supply(
            inner.registered_supply,
            inner.agents.values().map(|a| a.token_balance),
        )
    }
}

impl LedgerClient for InMemoryLedger {
    async fn fetch_game(&self) -> Result<GameAccount, LedgerError> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(LedgerError::Closed);
        }
        Ok(inner.game)
    }

    async fn fetch_agent(&self, agent: AgentId) -> Result<AgentAccount, LedgerError> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(LedgerError::Closed);
        }
        inner
            .agents
            .get(&agent)
            .copied()
            .ok_or(LedgerError::AccountNotFound(agent))
    }

    async fn submit(&self, instruction: Instruction) -> Result<SettlementReceipt, LedgerError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(LedgerError::Closed);
        }
        if inner.fail_next > 0 {
            inner.fail_next = inner.fail_next.saturating_sub(1);
            tracing::debug!(instruction = instruction.name(), "injected transient failure");
            return Err(LedgerError::Transient(String::from("injected failure")));
        }
        if !inner.game.active {
            return Err(LedgerError::rejected(instruction.name(), "game not active"));
        }

        let tokens_transferred = inner.apply(&instruction)?;

        let sequence = u64::try_from(inner.log.len())
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let reference = format!("sim-{sequence:08}");
        tracing::debug!(
            instruction = instruction.name(),
            reference = %reference,
            tokens_transferred,
            "instruction accepted"
        );
        inner.log.push(LogEntry {
            sequence,
            reference: reference.clone(),
            instruction,
            tokens_transferred,
        });
        Ok(SettlementReceipt {
            reference,
            tokens_transferred,
        })
    }

    async fn close(&self) -> Result<(), LedgerError> {
        self.inner.lock().await.closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Instruction semantics
// ---------------------------------------------------------------------------

impl Inner {
    /// Apply an instruction, returning the tokens it moved.
    fn apply(&mut self, instruction: &Instruction) -> Result<u64, LedgerError> {
        let name = instruction.name();
        let participants = instruction.participants();
        let mut seen = participants.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != participants.len() {
            return Err(LedgerError::rejected(name, "duplicate participant"));
        }

        match instruction {
            Instruction::MoveAgent { agent, to } => {
                let account = self.alive_mut(*agent, name)?;
                if account.battle_started_at.is_some() {
                    return Err(LedgerError::rejected(name, "agent in battle"));
                }
                account.position = *to;
                Ok(0)
            }
            Instruction::StartBattleSimple {
                attacker,
                defender,
                started_at,
            } => {
                self.require_unallied(*attacker, *defender, name)?;
                self.start_battle(&participants, *started_at, name)
            }
            Instruction::StartBattleAgentVsAlliance {
                single,
                pair,
                started_at,
            } => {
                self.require_pair(*pair, name)?;
                for member in pair {
                    self.require_unallied(*single, *member, name)?;
                }
                self.start_battle(&participants, *started_at, name)
            }
            Instruction::StartBattleAllianceVsAlliance {
                side_a,
                side_b,
                started_at,
            } => {
                self.require_pair(*side_a, name)?;
                self.require_pair(*side_b, name)?;
                self.start_battle(&participants, *started_at, name)
            }
            Instruction::ResolveBattleSimple {
                winner,
                loser,
                loss_percent,
            } => self.resolve_battle(&[*winner], &[*loser], *loss_percent, name),
            Instruction::ResolveBattleAgentVsAlliance {
                single,
                pair,
                loss_percent,
                single_wins,
            } => {
                let single = [*single];
                if *single_wins {
                    self.resolve_battle(&single, pair, *loss_percent, name)
                } else {
                    self.resolve_battle(pair, &single, *loss_percent, name)
                }
            }
            Instruction::ResolveBattleAllianceVsAlliance {
                side_a,
                side_b,
                loss_percent,
                side_a_wins,
            } => {
                if *side_a_wins {
                    self.resolve_battle(side_a, side_b, *loss_percent, name)
                } else {
                    self.resolve_battle(side_b, side_a, *loss_percent, name)
                }
            }
            Instruction::FormAlliance { initiator, target } => {
                for id in [*initiator, *target] {
                    if self.alive(id, name)?.alliance_with.is_some() {
                        return Err(LedgerError::rejected(name, "alliance already exists"));
                    }
                }
                self.alive_mut(*initiator, name)?.alliance_with = Some(*target);
                self.alive_mut(*target, name)?.alliance_with = Some(*initiator);
                Ok(0)
            }
            Instruction::BreakAlliance { initiator, target } => {
                if self.alive(*initiator, name)?.alliance_with != Some(*target) {
                    return Err(LedgerError::rejected(name, "no alliance to break"));
                }
                self.account_mut(*initiator)?.alliance_with = None;
                self.account_mut(*target)?.alliance_with = None;
                Ok(0)
            }
            Instruction::IgnoreAgent { agent, target } => {
                self.alive(*agent, name)?;
                self.account(*target)?;
                Ok(0)
            }
            Instruction::KillAgent { agent } => {
                let account = self.alive_mut(*agent, name)?;
                account.alive = false;
                if let Some(partner) = account.alliance_with.take() {
                    if let Some(p) = self.agents.get_mut(&partner) {
                        p.alliance_with = None;
                    }
                }
                Ok(0)
            }
        }
    }

    fn account(&self, id: AgentId) -> Result<&AgentAccount, LedgerError> {
        self.agents.get(&id).ok_or(LedgerError::AccountNotFound(id))
    }

    fn account_mut(&mut self, id: AgentId) -> Result<&mut AgentAccount, LedgerError> {
        self.agents
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    fn alive(&self, id: AgentId, name: &'static str) -> Result<&AgentAccount, LedgerError> {
        let account = self.account(id)?;
        if !account.alive {
            return Err(LedgerError::rejected(name, format!("agent {id} not alive")));
        }
        Ok(account)
    }

    fn alive_mut(
        &mut self,
        id: AgentId,
        name: &'static str,
    ) -> Result<&mut AgentAccount, LedgerError> {
        let account = self.account_mut(id)?;
        if !account.alive {
            return Err(LedgerError::rejected(name, format!("agent {id} not alive")));
        }
        Ok(account)
    }

    fn require_pair(&self, pair: [AgentId; 2], name: &'static str) -> Result<(), LedgerError> {
        let [a, b] = pair;
        if self.alive(a, name)?.alliance_with != Some(b) {
            return Err(LedgerError::rejected(name, format!("{a} and {b} are not allied")));
        }
        Ok(())
    }

    fn require_unallied(
        &self,
        a: AgentId,
        b: AgentId,
        name: &'static str,
    ) -> Result<(), LedgerError> {
        if self.alive(a, name)?.alliance_with == Some(b) {
            return Err(LedgerError::rejected(name, "cannot battle an ally"));
        }
        Ok(())
    }

    fn start_battle(
        &mut self,
        participants: &[AgentId],
        started_at: DateTime<Utc>,
        name: &'static str,
    ) -> Result<u64, LedgerError> {
        for id in participants {
            if self.alive(*id, name)?.battle_started_at.is_some() {
                return Err(LedgerError::rejected(name, format!("agent {id} already in battle")));
            }
        }
        for id in participants {
            self.account_mut(*id)?.battle_started_at = Some(started_at);
        }
        Ok(0)
    }

    fn resolve_battle(
        &mut self,
        winners: &[AgentId],
        losers: &[AgentId],
        loss_percent: u8,
        name: &'static str,
    ) -> Result<u64, LedgerError> {
        if loss_percent > 100 {
            return Err(LedgerError::rejected(name, "loss percent above 100"));
        }
        let mut marker = None;
        for id in winners.iter().chain(losers) {
            let started = self
                .alive(*id, name)?
                .battle_started_at
                .ok_or_else(|| LedgerError::rejected(name, format!("agent {id} not in battle")))?;
            if *marker.get_or_insert(started) != started {
                return Err(LedgerError::rejected(name, "participants in different battles"));
            }
        }

        let mut taken: u128 = 0;
        for id in losers {
            let account = self.account_mut(*id)?;
            let loss = u128::from(account.token_balance)
                .checked_mul(u128::from(loss_percent))
                .and_then(|v| v.checked_div(100))
                .ok_or(LedgerError::ArithmeticOverflow)?;
            let loss_u64 = u64::try_from(loss).map_err(|e| {
                tracing::error!(error = %e, "loss exceeds balance width");
                LedgerError::ArithmeticOverflow
            })?;
            account.token_balance = account
                .token_balance
                .checked_sub(loss_u64)
                .ok_or(LedgerError::ArithmeticOverflow)?;
            taken = taken
                .checked_add(loss)
                .ok_or(LedgerError::ArithmeticOverflow)?;
        }

        let weights: Vec<u128> = winners
            .iter()
            .map(|id| self.account(*id).map(|a| u128::from(a.token_balance)))
            .collect::<Result<_, _>>()?;
        let total_weight = weights.iter().sum::<u128>();
        let winner_count = u128::try_from(winners.len()).map_err(|e| {
            tracing::error!(error = %e, "winner count exceeds width");
            LedgerError::ArithmeticOverflow
        })?;

        let mut distributed: u128 = 0;
        for (id, weight) in winners.iter().zip(&weights) {
            let share = if total_weight == 0 {
                taken.checked_div(winner_count)
            } else {
                taken
                    .checked_mul(*weight)
                    .and_then(|v| v.checked_div(total_weight))
            }
            .ok_or(LedgerError::ArithmeticOverflow)?;
            self.credit(*id, share)?;
            distributed = distributed
                .checked_add(share)
                .ok_or(LedgerError::ArithmeticOverflow)?;
        }
        let remainder = taken
            .checked_sub(distributed)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        if remainder > 0 {
            if let Some(first) = winners.first() {
                self.credit(*first, remainder)?;
            }
        }

        for id in winners.iter().chain(losers) {
            self.account_mut(*id)?.battle_started_at = None;
        }
        u64::try_from(taken).map_err(|e| {
            tracing::error!(error = %e, "transfer exceeds balance width");
            LedgerError::ArithmeticOverflow
        })
    }

    fn credit(&mut self, id: AgentId, amount: u128) -> Result<(), LedgerError> {
        let amount = u64::try_from(amount).map_err(|e| {
            tracing::error!(error = %e, "credit exceeds balance width");
            LedgerError::ArithmeticOverflow
        })?;
        let account = self.account_mut(id)?;
        account.token_balance = account
            .token_balance
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use warband_types::Position;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    async fn ledger_with(balances: &[(u32, u64)]) -> InMemoryLedger {
        let ledger = InMemoryLedger::new(GameId(1));
        for (id, balance) in balances {
            ledger
                .register(AgentAccount::new(AgentId(*id), Position::new(0, 0), *balance))
                .await
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn simple_resolution_moves_loss_to_winner() {
        let ledger = ledger_with(&[(1, 900), (2, 300)]).await;
        ledger
            .submit(Instruction::StartBattleSimple {
                attacker: AgentId(1),
                defender: AgentId(2),
                started_at: t0(),
            })
            .await
            .unwrap();
        let receipt = ledger
            .submit(Instruction::ResolveBattleSimple {
                winner: AgentId(1),
                loser: AgentId(2),
                loss_percent: 25,
            })
            .await
            .unwrap();
        assert_eq!(receipt.tokens_transferred, 75);
        assert_eq!(ledger.account(AgentId(1)).await.unwrap().token_balance, 975);
        assert_eq!(ledger.account(AgentId(2)).await.unwrap().token_balance, 225);
        assert!(ledger.account(AgentId(2)).await.unwrap().battle_started_at.is_none());
        assert!(ledger.verify_conservation().await.is_conserved());
    }

    #[tokio::test]
    async fn resolution_twice_is_rejected() {
        let ledger = ledger_with(&[(1, 100), (2, 100)]).await;
        ledger
            .submit(Instruction::StartBattleSimple {
                attacker: AgentId(1),
                defender: AgentId(2),
                started_at: t0(),
            })
            .await
            .unwrap();
        let resolve = Instruction::ResolveBattleSimple {
            winner: AgentId(2),
            loser: AgentId(1),
            loss_percent: 20,
        };
        ledger.submit(resolve.clone()).await.unwrap();
        let err = ledger.submit(resolve).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected { .. }));
        assert_eq!(ledger.count("resolveBattleSimple").await, 1);
    }

    #[tokio::test]
    async fn double_battle_is_rejected() {
        let ledger = ledger_with(&[(1, 100), (2, 100), (3, 100)]).await;
        ledger
            .submit(Instruction::StartBattleSimple {
                attacker: AgentId(1),
                defender: AgentId(2),
                started_at: t0(),
            })
            .await
            .unwrap();
        let err = ledger
            .submit(Instruction::StartBattleSimple {
                attacker: AgentId(3),
                defender: AgentId(2),
                started_at: t0(),
            })
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(ledger.account(AgentId(3)).await.unwrap().battle_started_at.is_none());
    }

    #[tokio::test]
    async fn alliance_pair_split_by_weight() {
        let ledger = ledger_with(&[(1, 600), (2, 300), (3, 100), (4, 400)]).await;
        for (a, b) in [(1, 2), (3, 4)] {
            ledger
                .submit(Instruction::FormAlliance {
                    initiator: AgentId(a),
                    target: AgentId(b),
                })
                .await
                .unwrap();
        }
        ledger
            .submit(Instruction::StartBattleAllianceVsAlliance {
                side_a: [AgentId(1), AgentId(2)],
                side_b: [AgentId(3), AgentId(4)],
                started_at: t0(),
            })
            .await
            .unwrap();
        let receipt = ledger
            .submit(Instruction::ResolveBattleAllianceVsAlliance {
                side_a: [AgentId(1), AgentId(2)],
                side_b: [AgentId(3), AgentId(4)],
                loss_percent: 30,
                side_a_wins: true,
            })
            .await
            .unwrap();
        // 30 + 120 taken, split 2:1 between 600 and 300.
        assert_eq!(receipt.tokens_transferred, 150);
        assert_eq!(ledger.account(AgentId(1)).await.unwrap().token_balance, 700);
        assert_eq!(ledger.account(AgentId(2)).await.unwrap().token_balance, 350);
        assert!(ledger.verify_conservation().await.is_conserved());
    }

    #[tokio::test]
    async fn injected_failures_do_not_apply() {
        let ledger = ledger_with(&[(1, 100)]).await;
        ledger.fail_next(2).await;
        let mv = Instruction::MoveAgent {
            agent: AgentId(1),
            to: Position::new(3, 4),
        };
        assert!(ledger.submit(mv.clone()).await.unwrap_err().is_transient());
        assert!(ledger.submit(mv.clone()).await.unwrap_err().is_transient());
        assert_eq!(ledger.account(AgentId(1)).await.unwrap().position, Position::new(0, 0));
        ledger.submit(mv).await.unwrap();
        assert_eq!(ledger.account(AgentId(1)).await.unwrap().position, Position::new(3, 4));
        assert_eq!(ledger.log().await.len(), 1);
    }

    #[tokio::test]
    async fn kill_unlinks_partner() {
        let ledger = ledger_with(&[(1, 100), (2, 100)]).await;
        ledger
            .submit(Instruction::FormAlliance {
                initiator: AgentId(1),
                target: AgentId(2),
            })
            .await
            .unwrap();
        ledger
            .submit(Instruction::KillAgent { agent: AgentId(1) })
            .await
            .unwrap();
        let dead = ledger.account(AgentId(1)).await.unwrap();
        assert!(!dead.alive);
        assert_eq!(ledger.account(AgentId(2)).await.unwrap().alliance_with, None);
        let err = ledger
            .submit(Instruction::KillAgent { agent: AgentId(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn closed_game_rejects_everything() {
        let ledger = ledger_with(&[(1, 100)]).await;
        ledger.end_game().await;
        assert!(!ledger.fetch_game().await.unwrap().active);
        let err = ledger
            .submit(Instruction::KillAgent { agent: AgentId(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn closed_client_refuses_calls() {
        let ledger = ledger_with(&[(1, 100)]).await;
        ledger.close().await.unwrap();
        assert!(matches!(
            ledger.fetch_agent(AgentId(1)).await,
            Err(LedgerError::Closed)
        ));
    }
}
