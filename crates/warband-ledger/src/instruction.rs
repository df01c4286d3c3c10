//! Settlement instructions.
//!
//! One variant per program call. Serialized with the program's camelCase
//! instruction name as the tag so the gateway can forward it unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warband_types::{AgentId, Position};

/// A call to the settlement program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "camelCase")]
pub enum Instruction {
    /// Relocate an agent.
    MoveAgent {
        /// The mover.
        agent: AgentId,
        /// Destination.
        to: Position,
    },
    /// Open a one-on-one battle.
    StartBattleSimple {
        /// Initiator.
        attacker: AgentId,
        /// Target.
        defender: AgentId,
        /// Shared open-battle marker.
        started_at: DateTime<Utc>,
    },
    /// Open a battle between a lone agent and an allied pair.
    StartBattleAgentVsAlliance {
        /// The lone agent.
        single: AgentId,
        /// The allied pair.
        pair: [AgentId; 2],
        /// Shared open-battle marker.
        started_at: DateTime<Utc>,
    },
    /// Open a battle between two allied pairs.
    StartBattleAllianceVsAlliance {
        /// First pair.
        side_a: [AgentId; 2],
        /// Second pair.
        side_b: [AgentId; 2],
        /// Shared open-battle marker.
        started_at: DateTime<Utc>,
    },
    /// Settle a one-on-one battle.
    ResolveBattleSimple {
        /// Winning agent.
        winner: AgentId,
        /// Losing agent.
        loser: AgentId,
        /// Percentage of the loser's balance transferred.
        loss_percent: u8,
    },
    /// Settle a lone agent against an allied pair.
    ResolveBattleAgentVsAlliance {
        /// The lone agent.
        single: AgentId,
        /// The allied pair.
        pair: [AgentId; 2],
        /// Percentage of the losing side's balance transferred.
        loss_percent: u8,
        /// True when the lone agent won.
        single_wins: bool,
    },
    /// Settle two allied pairs.
    ResolveBattleAllianceVsAlliance {
        /// First pair.
        side_a: [AgentId; 2],
        /// Second pair.
        side_b: [AgentId; 2],
        /// Percentage of the losing side's balance transferred.
        loss_percent: u8,
        /// True when the first pair won.
        side_a_wins: bool,
    },
    /// Link two agents.
    FormAlliance {
        /// Initiator.
        initiator: AgentId,
        /// Partner.
        target: AgentId,
    },
    /// Unlink an alliance.
    BreakAlliance {
        /// The breaking member.
        initiator: AgentId,
        /// The other member.
        target: AgentId,
    },
    /// Record that one agent ignores another.
    IgnoreAgent {
        /// The ignoring agent.
        agent: AgentId,
        /// The ignored agent.
        target: AgentId,
    },
    /// Mark an agent dead.
    KillAgent {
        /// The agent.
        agent: AgentId,
    },
}

impl Instruction {
    /// The program's name for this call.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MoveAgent { .. } => "moveAgent",
            Self::StartBattleSimple { .. } => "startBattleSimple",
            Self::StartBattleAgentVsAlliance { .. } => "startBattleAgentVsAlliance",
            Self::StartBattleAllianceVsAlliance { .. } => "startBattleAllianceVsAlliance",
            Self::ResolveBattleSimple { .. } => "resolveBattleSimple",
            Self::ResolveBattleAgentVsAlliance { .. } => "resolveBattleAgentVsAlliance",
            Self::ResolveBattleAllianceVsAlliance { .. } => "resolveBattleAllianceVsAlliance",
            Self::FormAlliance { .. } => "formAlliance",
            Self::BreakAlliance { .. } => "breakAlliance",
            Self::IgnoreAgent { .. } => "ignoreAgent",
            Self::KillAgent { .. } => "killAgent",
        }
    }

    /// Every agent the instruction touches.
    pub fn participants(&self) -> Vec<AgentId> {
        match self {
            Self::MoveAgent { agent, .. } | Self::KillAgent { agent } => vec![*agent],
            Self::StartBattleSimple {
                attacker, defender, ..
            } => vec![*attacker, *defender],
            Self::StartBattleAgentVsAlliance { single, pair, .. }
            | Self::ResolveBattleAgentVsAlliance { single, pair, .. } => {
                vec![*single, pair[0], pair[1]]
            }
            Self::StartBattleAllianceVsAlliance { side_a, side_b, .. }
            | Self::ResolveBattleAllianceVsAlliance { side_a, side_b, .. } => {
                vec![side_a[0], side_a[1], side_b[0], side_b[1]]
            }
            Self::ResolveBattleSimple { winner, loser, .. } => vec![*winner, *loser],
            Self::FormAlliance { initiator, target } | Self::BreakAlliance { initiator, target } => {
                vec![*initiator, *target]
            }
            Self::IgnoreAgent { agent, target } => vec![*agent, *target],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tag_uses_program_name() {
        let json = serde_json::to_value(Instruction::KillAgent { agent: AgentId(3) }).unwrap();
        assert_eq!(json["instruction"], "killAgent");
        assert_eq!(Instruction::KillAgent { agent: AgentId(3) }.name(), "killAgent");
    }

    #[test]
    fn alliance_battle_lists_all_four() {
        let instruction = Instruction::ResolveBattleAllianceVsAlliance {
            side_a: [AgentId(1), AgentId(2)],
            side_b: [AgentId(3), AgentId(4)],
            loss_percent: 20,
            side_a_wins: true,
        };
        assert_eq!(
            instruction.participants(),
            vec![AgentId(1), AgentId(2), AgentId(3), AgentId(4)]
        );
    }
}
