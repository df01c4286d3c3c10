//! Error types for the warband-agents crate.
//!
//! Rule violations are not errors here: validation reports them as
//! [`ValidationFeedback`](warband_types::ValidationFeedback). These variants
//! cover broken bookkeeping and bad configuration.

use warband_types::AgentId;

/// Errors that can occur while mutating agent state.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Agent with the given ID was not found.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// An agent with the same ID is already registered.
    #[error("duplicate agent id: {0}")]
    DuplicateAgent(AgentId),

    /// The agent already holds an active alliance.
    #[error("agent {0} already holds an active alliance")]
    AllianceExists(AgentId),

    /// The agent holds no active alliance.
    #[error("agent {0} holds no active alliance")]
    NoActiveAlliance(AgentId),

    /// A rules value is out of range.
    #[error("invalid rules configuration: {0}")]
    InvalidConfig(String),
}
