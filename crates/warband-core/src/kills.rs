//! Settling deaths with the ledger.
//!
//! A local death queues the agent in `pending_kills`. The matching
//! `killAgent` call is attempted right away by whoever caused the death;
//! transient failures leave the agent queued for the cleanup loop. A kill
//! is dropped from the queue once the ledger reports the agent dead or
//! refuses the call outright.

use warband_ledger::{Instruction, LedgerClient, LedgerError};
use warband_types::AgentId;

use crate::state::GameContext;

/// What happened to one queued kill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// The ledger accepted the call.
    Settled(String),
    /// A transient failure; the agent stays queued.
    Deferred,
    /// Removed from the queue without a settlement.
    Dropped,
}

/// Submit `killAgent` for one agent and update the queue.
pub async fn settle_kill<L: LedgerClient>(ctx: &GameContext, ledger: &L, agent: AgentId) -> KillOutcome {
    let outcome = match ledger.submit(Instruction::KillAgent { agent }).await {
        Ok(receipt) => KillOutcome::Settled(receipt.reference),
        Err(e) if e.is_transient() => {
            tracing::warn!(agent_id = %agent, error = %e, "killAgent deferred");
            return KillOutcome::Deferred;
        }
        Err(e) => {
            tracing::warn!(agent_id = %agent, error = %e, "killAgent refused; dropping");
            KillOutcome::Dropped
        }
    };
    ctx.world.write().await.pending_kills.remove(&agent);
    outcome
}

/// Settle kills for agents that just died, returning side-effect notes.
pub async fn settle_kills<L: LedgerClient>(ctx: &GameContext, ledger: &L, agents: &[AgentId]) -> Vec<String> {
    let mut notes = Vec::new();
    for agent in agents {
        match settle_kill(ctx, ledger, *agent).await {
            KillOutcome::Settled(reference) => {
                notes.push(format!("killAgent {agent} settled as {reference}"));
            }
            KillOutcome::Deferred => notes.push(format!("killAgent {agent} queued for retry")),
            KillOutcome::Dropped => {}
        }
    }
    notes
}

/// Retry every queued kill under the agent's lock.
///
/// Returns how many kills were settled. Only transient ledger errors are
/// surfaced; everything else is resolved per agent.
pub async fn retry_pending_kills<L: LedgerClient>(ctx: &GameContext, ledger: &L) -> Result<usize, LedgerError> {
    let queued: Vec<AgentId> = ctx.world.read().await.pending_kills.iter().copied().collect();
    let mut settled: usize = 0;
    for agent in queued {
        let _held = ctx.locks.acquire(&[agent]).await;
        if !ctx.world.read().await.pending_kills.contains(&agent) {
            continue;
        }
        match ledger.fetch_agent(agent).await {
            Ok(account) if !account.alive => {
                tracing::debug!(agent_id = %agent, "Ledger already reports agent dead");
                ctx.world.write().await.pending_kills.remove(&agent);
                continue;
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                tracing::warn!(agent_id = %agent, error = %e, "Dropping queued kill");
                ctx.world.write().await.pending_kills.remove(&agent);
                continue;
            }
        }
        match settle_kill(ctx, ledger, agent).await {
            KillOutcome::Settled(_) => settled = settled.saturating_add(1),
            KillOutcome::Deferred => {
                return Err(LedgerError::Transient(format!("killAgent {agent} deferred")));
            }
            KillOutcome::Dropped => {}
        }
    }
    Ok(settled)
}
