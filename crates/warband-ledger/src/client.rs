//! The settlement program client interface.
//!
//! A client is bound to a single game. Implementations are either the
//! simulated [`InMemoryLedger`](crate::InMemoryLedger) or a gateway client
//! that forwards calls over the network.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warband_types::{AgentId, GameId, Position};

use crate::LedgerError;
use crate::instruction::Instruction;

/// Snapshot of the game account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAccount {
    /// Program game id.
    pub game_id: GameId,
    /// Whether the program still accepts instructions for this game.
    pub active: bool,
}

/// Snapshot of an agent account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAccount {
    /// Agent id.
    pub id: AgentId,
    /// Position as recorded by the program.
    pub position: Position,
    /// Alive flag.
    pub alive: bool,
    /// Authoritative token balance.
    pub token_balance: u64,
    /// Alliance partner.
    pub alliance_with: Option<AgentId>,
    /// Open-battle marker.
    pub battle_started_at: Option<DateTime<Utc>>,
}

impl AgentAccount {
    /// A fresh, alive account.
    pub const fn new(id: AgentId, position: Position, token_balance: u64) -> Self {
        Self {
            id,
            position,
            alive: true,
            token_balance,
            alliance_with: None,
            battle_started_at: None,
        }
    }
}

/// Acknowledgement of an accepted instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Opaque settlement reference (transaction signature).
    pub reference: String,
    /// Tokens moved by a battle resolution; zero otherwise.
    #[serde(default)]
    pub tokens_transferred: u64,
}

/// A client for the settlement program.
///
/// Every call is a suspension point. Instructions are not idempotent:
/// callers must re-validate preconditions before resubmitting.
pub trait LedgerClient: Send + Sync {
    /// Load the game account.
    fn fetch_game(&self) -> impl Future<Output = Result<GameAccount, LedgerError>> + Send;

    /// Load an agent account.
    fn fetch_agent(
        &self,
        agent: AgentId,
    ) -> impl Future<Output = Result<AgentAccount, LedgerError>> + Send;

    /// Submit an instruction.
    fn submit(
        &self,
        instruction: Instruction,
    ) -> impl Future<Output = Result<SettlementReceipt, LedgerError>> + Send;

    /// Release the connection. Later calls fail with [`LedgerError::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), LedgerError>> + Send;
}
