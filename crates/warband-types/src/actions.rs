//! Candidate actions and structured rejection feedback.
//!
//! A [`GameAction`] is untrusted input: it comes from the decision source
//! and is fully validated before anything is submitted to the ledger. A
//! rejection carries a [`ValidationFeedback`] that is reported back to the
//! decision source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::ActionKind;
use crate::ids::AgentId;

/// An action proposed for a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GameAction {
    /// Relocate to the given coordinates.
    Move {
        /// Destination x.
        x: i32,
        /// Destination y.
        y: i32,
    },
    /// Engage another agent.
    Battle {
        /// The agent to attack.
        target: AgentId,
    },
    /// Form an alliance with another agent.
    Alliance {
        /// The prospective partner.
        target: AgentId,
    },
    /// Dissolve the actor's active alliance.
    BreakAlliance,
    /// Ignore another agent for a window of time.
    Ignore {
        /// The agent to ignore.
        target: AgentId,
        /// Window length in seconds. `None` uses the configured default.
        #[serde(default)]
        duration_secs: Option<u64>,
    },
}

impl GameAction {
    /// The cooldown kind this action is gated by and refreshes.
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Battle { .. } => ActionKind::Battle,
            Self::Alliance { .. } | Self::BreakAlliance => ActionKind::Alliance,
            Self::Ignore { .. } => ActionKind::Ignore,
        }
    }

    /// The targeted agent, for actions that have one.
    pub const fn target(&self) -> Option<AgentId> {
        match self {
            Self::Battle { target } | Self::Alliance { target } | Self::Ignore { target, .. } => {
                Some(*target)
            }
            Self::Move { .. } | Self::BreakAlliance => None,
        }
    }

    /// Stable label used in logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Battle { .. } => "battle",
            Self::Alliance { .. } => "alliance",
            Self::BreakAlliance => "break_alliance",
            Self::Ignore { .. } => "ignore",
        }
    }
}

/// Why an action was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The game session is closed.
    GameNotActive,
    /// The acting agent is dead.
    AgentNotAlive,
    /// The acting agent is not registered.
    UnknownAgent,
    /// The target is not registered.
    UnknownTarget,
    /// The target is dead.
    TargetNotAlive,
    /// The action targets the actor itself.
    SelfTarget,
    /// The destination lies outside the map.
    OutOfBounds,
    /// The destination equals the current position.
    SamePosition,
    /// The actor carries an open-battle marker.
    InBattle,
    /// The target carries an open-battle marker.
    TargetInBattle,
    /// The target is beyond the interaction range.
    OutOfRange,
    /// The actor's move cooldown is active.
    MoveCooldown,
    /// A battle cooldown is active for the actor or the target.
    BattleCooldown,
    /// An alliance cooldown is active for the actor or the target.
    AllianceCooldown,
    /// The pair dissolved an alliance too recently to fight.
    BattleBlocked,
    /// The target is the actor's ally.
    TargetIsAlly,
    /// The actor or the target already holds an active alliance.
    AllianceExists,
    /// The actor has no alliance to break.
    NoAllianceToBreak,
    /// The actor is already ignoring the target.
    AlreadyIgnoring,
    /// The requested ignore window is empty.
    InvalidDuration,
}

impl RejectionReason {
    /// Human-readable reason, as reported to the decision source.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GameNotActive => "game not active",
            Self::AgentNotAlive => "agent not alive",
            Self::UnknownAgent => "unknown agent",
            Self::UnknownTarget => "unknown target",
            Self::TargetNotAlive => "target not alive",
            Self::SelfTarget => "cannot target self",
            Self::OutOfBounds => "destination out of bounds",
            Self::SamePosition => "already at destination",
            Self::InBattle => "agent in battle",
            Self::TargetInBattle => "target in battle",
            Self::OutOfRange => "target out of range",
            Self::MoveCooldown => "move cooldown",
            Self::BattleCooldown => "battle cooldown",
            Self::AllianceCooldown => "alliance cooldown",
            Self::BattleBlocked => "recently allied",
            Self::TargetIsAlly => "target is ally",
            Self::AllianceExists => "alliance already exists",
            Self::NoAllianceToBreak => "no alliance to break",
            Self::AlreadyIgnoring => "already ignoring target",
            Self::InvalidDuration => "invalid ignore duration",
        }
    }
}

impl core::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured rejection returned to the decision source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFeedback {
    /// Which rule rejected the action.
    pub reason: RejectionReason,
    /// A remedy, e.g. "wait until ...".
    pub suggested_fix: Option<String>,
    /// When the blocking condition lifts, for time-based rejections.
    pub retry_at: Option<DateTime<Utc>>,
}

impl ValidationFeedback {
    /// Feedback with no suggested remedy.
    pub const fn new(reason: RejectionReason) -> Self {
        Self {
            reason,
            suggested_fix: None,
            retry_at: None,
        }
    }

    /// Feedback with a free-form remedy.
    pub fn with_fix(reason: RejectionReason, fix: impl Into<String>) -> Self {
        Self {
            reason,
            suggested_fix: Some(fix.into()),
            retry_at: None,
        }
    }

    /// Feedback telling the caller to wait until `until`.
    pub fn wait_until(reason: RejectionReason, until: DateTime<Utc>) -> Self {
        Self {
            reason,
            suggested_fix: Some(format!("wait until {}", until.to_rfc3339())),
            retry_at: Some(until),
        }
    }
}

impl core::fmt::Display for ValidationFeedback {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.suggested_fix {
            Some(fix) => write!(f, "{} ({fix})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn action_parses_from_tagged_json() {
        let action: GameAction =
            serde_json::from_str(r#"{"action":"battle","target":2}"#).unwrap();
        assert_eq!(action, GameAction::Battle { target: AgentId(2) });

        let ignore: GameAction =
            serde_json::from_str(r#"{"action":"ignore","target":4}"#).unwrap();
        assert_eq!(
            ignore,
            GameAction::Ignore {
                target: AgentId(4),
                duration_secs: None
            }
        );
    }

    #[test]
    fn break_alliance_is_gated_by_alliance_kind() {
        assert_eq!(GameAction::BreakAlliance.kind(), ActionKind::Alliance);
        assert_eq!(GameAction::BreakAlliance.target(), None);
    }

    #[test]
    fn battle_cooldown_reason_text() {
        assert_eq!(RejectionReason::BattleCooldown.to_string(), "battle cooldown");
    }

    #[test]
    fn wait_until_sets_fix_and_retry() {
        let until = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let feedback = ValidationFeedback::wait_until(RejectionReason::MoveCooldown, until);
        assert_eq!(feedback.retry_at, Some(until));
        assert!(feedback.suggested_fix.unwrap().starts_with("wait until 2025-03-01T12:00:00"));
    }
}
