//! Decision source trait and simple implementations.
//!
//! During each decision round the orchestrator presents every alive agent
//! with an [`AgentView`] and asks a [`DecisionSource`] for at most one
//! [`GameAction`]. The answer is untrusted: it goes through full
//! validation before anything reaches the ledger. Rejections are reported
//! back through [`DecisionSource::report`] and also surface in the agent's
//! next view.
//!
//! [`StubDecisionSource`] idles every agent, which lets the loops run end
//! to end without a model backend. [`ScriptedDecisionSource`] replays
//! queued actions per agent.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;

use warband_types::{AgentId, GameAction, ValidationFeedback};

use crate::perception::AgentView;

/// Errors that can occur while asking for a decision.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The backend did not answer within the deadline.
    #[error("agent {agent_id} timed out (deadline: {deadline_ms}ms)")]
    Timeout {
        /// The agent being decided for.
        agent_id: AgentId,
        /// The deadline in milliseconds.
        deadline_ms: u64,
    },

    /// The backend answered with something that is not an action.
    #[error("unparseable decision for agent {agent_id}: {message}")]
    Unparseable {
        /// The agent being decided for.
        agent_id: AgentId,
        /// What went wrong.
        message: String,
    },

    /// An internal error in the decision source.
    #[error("decision source error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

/// A source of agent decisions.
pub trait DecisionSource: Send + Sync {
    /// The next action for the viewed agent, or `None` to idle this round.
    fn next_action(
        &self,
        view: &AgentView,
    ) -> impl Future<Output = Result<Option<GameAction>, DecisionError>> + Send;

    /// Hear about a rejected action.
    fn report(&self, agent: AgentId, feedback: &ValidationFeedback) {
        tracing::debug!(agent_id = %agent, reason = %feedback.reason, "Action rejected");
    }
}

/// A decision source that never acts.
#[derive(Debug, Clone, Default)]
pub struct StubDecisionSource;

impl StubDecisionSource {
    /// Create a new stub decision source.
    pub const fn new() -> Self {
        Self
    }
}

impl DecisionSource for StubDecisionSource {
    async fn next_action(&self, _view: &AgentView) -> Result<Option<GameAction>, DecisionError> {
        Ok(None)
    }
}

/// Replays queued actions, one per agent per round.
#[derive(Debug, Default)]
pub struct ScriptedDecisionSource {
    script: Mutex<BTreeMap<AgentId, VecDeque<GameAction>>>,
    reports: Mutex<Vec<(AgentId, ValidationFeedback)>>,
}

impl ScriptedDecisionSource {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action for `agent`.
    pub fn push(&self, agent: AgentId, action: GameAction) {
        if let Ok(mut script) = self.script.lock() {
            script.entry(agent).or_default().push_back(action);
        }
    }

    /// Every rejection reported so far.
    pub fn reports(&self) -> Vec<(AgentId, ValidationFeedback)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn pop(&self, agent: AgentId) -> Result<Option<GameAction>, DecisionError> {
        let mut script = self.script.lock().map_err(|e| DecisionError::Internal {
            message: e.to_string(),
        })?;
        Ok(script.get_mut(&agent).and_then(VecDeque::pop_front))
    }
}

impl DecisionSource for ScriptedDecisionSource {
    async fn next_action(&self, view: &AgentView) -> Result<Option<GameAction>, DecisionError> {
        self.pop(view.agent_id())
    }

    fn report(&self, agent: AgentId, feedback: &ValidationFeedback) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((agent, feedback.clone()));
        }
    }
}
