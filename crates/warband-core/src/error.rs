//! Orchestrator error classification.
//!
//! Every failure that reaches a loop is classified into an
//! [`OrchestratorError`]. Non-fatal kinds carry a [`RecoveryAction`] the
//! loop runs before continuing; fatal kinds stop the engine.

use warband_types::AgentId;

/// What a loop does about a non-fatal error before its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-establish the social broadcast connection.
    ReconnectSocial,
    /// Drop and rebuild the cooldown cache.
    ResetCooldownCache,
    /// Re-establish the relational store connection.
    ReconnectStore,
    /// Nothing to do; the loop simply continues.
    None,
}

/// Errors surfaced by the orchestrator loops.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Startup failed: configuration, initial state, or collaborators.
    #[error("initialization failed: {message}")]
    Initialization {
        /// Description of the failure.
        message: String,
    },

    /// Processing a single agent failed.
    #[error("processing agent {agent} failed: {message}")]
    AgentProcessing {
        /// The agent being processed.
        agent: AgentId,
        /// Description of the failure.
        message: String,
    },

    /// The cooldown cache is unreachable or inconsistent.
    #[error("cooldown cache error: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },

    /// A ledger or social client lost its connection.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// The relational mirror rejected a read or write.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// A recovery action failed, or a loop exhausted its retries.
    #[error("recovery failed: {message}")]
    Recovery {
        /// Description of the failure.
        message: String,
    },

    /// Releasing collaborators during shutdown failed.
    #[error("shutdown failed: {message}")]
    Shutdown {
        /// Description of the failure.
        message: String,
    },
}

impl OrchestratorError {
    /// Whether the error stops the engine.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Initialization { .. } | Self::Recovery { .. } | Self::Shutdown { .. }
        )
    }

    /// The recovery step for a non-fatal error.
    pub const fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::Connection { .. } => RecoveryAction::ReconnectSocial,
            Self::Cache { .. } => RecoveryAction::ResetCooldownCache,
            Self::Store { .. } => RecoveryAction::ReconnectStore,
            Self::AgentProcessing { .. }
            | Self::Initialization { .. }
            | Self::Recovery { .. }
            | Self::Shutdown { .. } => RecoveryAction::None,
        }
    }

    /// Stable label used in logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Initialization { .. } => "initialization",
            Self::AgentProcessing { .. } => "agent_processing",
            Self::Cache { .. } => "cache",
            Self::Connection { .. } => "connection",
            Self::Store { .. } => "store",
            Self::Recovery { .. } => "recovery",
            Self::Shutdown { .. } => "shutdown",
        }
    }

    /// Shorthand for an [`OrchestratorError::Recovery`].
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(OrchestratorError::recovery("x").is_fatal());
        assert!(
            OrchestratorError::Shutdown {
                message: String::new()
            }
            .is_fatal()
        );
        assert!(
            !OrchestratorError::Store {
                message: String::new()
            }
            .is_fatal()
        );
    }

    #[test]
    fn recovery_actions_follow_kind() {
        let cache = OrchestratorError::Cache {
            message: String::from("timeout"),
        };
        assert_eq!(cache.recovery_action(), RecoveryAction::ResetCooldownCache);
        let agent = OrchestratorError::AgentProcessing {
            agent: AgentId(3),
            message: String::from("bad"),
        };
        assert_eq!(agent.recovery_action(), RecoveryAction::None);
        assert_eq!(agent.kind(), "agent_processing");
    }
}
