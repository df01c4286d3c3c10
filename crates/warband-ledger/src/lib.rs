//! Settlement program interface for the Warband engine.
//!
//! The settlement program is the authoritative holder of agent balances,
//! alive flags, alliance links, and open-battle markers. The engine never
//! writes local state for an action until the matching instruction has
//! been accepted here.
//!
//! # Architecture
//!
//! - [`client`] -- The [`LedgerClient`] trait and the account snapshots it
//!   returns.
//! - [`instruction`] -- The eleven settlement [`Instruction`]s.
//! - [`memory`] -- [`InMemoryLedger`], a simulated settlement program with
//!   an append-only instruction log and failure injection.
//! - [`conservation`] -- Token supply verification.
//!
//! # Conservation Law
//!
//! Battles move tokens between agents; nothing mints or burns them. For
//! every simulated program:
//!
//! ```text
//! sum(balances now) == sum(balances at registration)
//! ```
//!
//! # Usage
//!
//! ```
//! use warband_ledger::{AgentAccount, InMemoryLedger, Instruction, LedgerClient};
//! use warband_types::{AgentId, GameId, Position};
//!
//! # async fn demo() -> Result<(), warband_ledger::LedgerError> {
//! let ledger = InMemoryLedger::new(GameId(1));
//! ledger.register(AgentAccount::new(AgentId(1), Position::new(0, 0), 1_000)).await?;
//! let receipt = ledger
//!     .submit(Instruction::MoveAgent { agent: AgentId(1), to: Position::new(1, 0) })
//!     .await?;
//! assert!(!receipt.reference.is_empty());
//! assert!(ledger.verify_conservation().await.is_conserved());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod conservation;
pub mod instruction;
pub mod memory;

// Re-export primary types at crate root.
pub use client::{AgentAccount, GameAccount, LedgerClient, SettlementReceipt};
pub use conservation::SupplyResult;
pub use instruction::Instruction;
pub use memory::InMemoryLedger;

use warband_types::AgentId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors returned by a settlement program client.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The call failed in transport or consensus and may succeed if retried.
    #[error("transient ledger failure: {0}")]
    Transient(String),

    /// The program refused the instruction.
    #[error("{instruction} rejected: {reason}")]
    Rejected {
        /// Name of the refused instruction.
        instruction: &'static str,
        /// Reason given by the program.
        reason: String,
    },

    /// No account exists for the agent.
    #[error("agent account not found: {0}")]
    AccountNotFound(AgentId),

    /// The game account could not be loaded.
    #[error("game account not found")]
    GameNotFound,

    /// The client has been closed.
    #[error("ledger client closed")]
    Closed,

    /// The gateway answered with something that could not be decoded.
    #[error("malformed ledger response: {0}")]
    Malformed(String),

    /// Token arithmetic overflowed.
    #[error("arithmetic overflow in settlement")]
    ArithmeticOverflow,
}

impl LedgerError {
    /// Whether retrying the same call can succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Shorthand for a [`LedgerError::Rejected`].
    pub fn rejected(instruction: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            instruction,
            reason: reason.into(),
        }
    }
}
