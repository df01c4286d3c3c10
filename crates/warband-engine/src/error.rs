//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and while the loops run.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: warband_core::ConfigError,
    },

    /// The relational mirror or cooldown cache failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying data layer error.
        #[from]
        source: warband_db::DbError,
    },

    /// Seeding or restoring the world failed.
    #[error("world state error: {source}")]
    State {
        /// The underlying state error.
        #[from]
        source: warband_agents::AgentError,
    },

    /// The settlement gateway failed.
    #[error("ledger error: {source}")]
    Ledger {
        /// The underlying ledger error.
        #[from]
        source: warband_ledger::LedgerError,
    },

    /// The orchestrator stopped with an error.
    #[error("orchestrator error: {source}")]
    Orchestrator {
        /// The underlying orchestrator error.
        #[from]
        source: warband_core::OrchestratorError,
    },

    /// Prompt templates could not be loaded or rendered.
    #[error("template error: {message}")]
    Template {
        /// Description of the failure.
        message: String,
    },

    /// A model response could not be turned into an action.
    #[error("response parse error: {message}")]
    Parse {
        /// Description of the failure.
        message: String,
    },

    /// An HTTP client could not be built.
    #[error("HTTP client error: {message}")]
    Http {
        /// Description of the failure.
        message: String,
    },
}
