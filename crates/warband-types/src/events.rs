//! Narrative events handed to the social broadcaster.
//!
//! Events are emitted after a successful commit and are fire-and-forget:
//! losing one never affects game state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{BattleSide, BattleType, Terrain};
use crate::ids::{AgentId, EventId};
use crate::structs::Position;

/// How an agent died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    /// Lost to the terrain while moving.
    Terrain(Terrain),
    /// Fell in the roll after losing a battle.
    Battle,
    /// Marked dead by the settlement program.
    Reported,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarrativePayload {
    /// An agent reached a new position.
    AgentMoved {
        /// The mover.
        agent: AgentId,
        /// Origin.
        from: Position,
        /// Destination.
        to: Position,
    },
    /// An agent died.
    AgentDied {
        /// The deceased.
        agent: AgentId,
        /// Where it died.
        position: Position,
        /// Why it died.
        cause: DeathCause,
    },
    /// Two sides engaged.
    BattleStarted {
        /// Shared open-battle marker.
        started_at: DateTime<Utc>,
        /// Topology.
        battle_type: BattleType,
        /// Side A members.
        side_a: Vec<AgentId>,
        /// Side B members.
        side_b: Vec<AgentId>,
    },
    /// A battle was settled.
    BattleResolved {
        /// Shared open-battle marker.
        started_at: DateTime<Utc>,
        /// Topology.
        battle_type: BattleType,
        /// Which side won.
        winning_side: BattleSide,
        /// Winning members.
        winners: Vec<AgentId>,
        /// Losing members.
        losers: Vec<AgentId>,
        /// Percentage taken from the losers.
        loss_percent: u8,
        /// Tokens moved to the winners.
        tokens_transferred: u64,
    },
    /// Two agents allied.
    AllianceFormed {
        /// Initiator.
        agent: AgentId,
        /// Partner.
        partner: AgentId,
    },
    /// An alliance ended.
    AllianceBroken {
        /// The agent that broke it (or died).
        agent: AgentId,
        /// Former partner.
        partner: AgentId,
    },
    /// One agent started ignoring another.
    AgentIgnored {
        /// The ignoring agent.
        agent: AgentId,
        /// The ignored agent.
        target: AgentId,
        /// End of the window.
        until: DateTime<Utc>,
    },
}

/// A timestamped narrative event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeEvent {
    /// Event identifier.
    pub id: EventId,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub payload: NarrativePayload,
}

impl NarrativeEvent {
    /// Wrap a payload with a fresh id.
    pub fn new(occurred_at: DateTime<Utc>, payload: NarrativePayload) -> Self {
        Self {
            id: EventId::new(),
            occurred_at,
            payload,
        }
    }

    /// One-line plain summary, used as the broadcast text.
    pub fn summary(&self) -> String {
        match &self.payload {
            NarrativePayload::AgentMoved { agent, from, to } => {
                format!("Agent {agent} moved from {from} to {to}")
            }
            NarrativePayload::AgentDied {
                agent,
                position,
                cause,
            } => match cause {
                DeathCause::Terrain(terrain) => {
                    format!("Agent {agent} perished crossing {} at {position}", terrain.as_str())
                }
                DeathCause::Battle => format!("Agent {agent} fell in battle at {position}"),
                DeathCause::Reported => format!("Agent {agent} was removed from play at {position}"),
            },
            NarrativePayload::BattleStarted {
                battle_type,
                side_a,
                side_b,
                ..
            } => format!(
                "Battle ({}) started: {} vs {}",
                battle_type.as_str(),
                join_ids(side_a),
                join_ids(side_b)
            ),
            NarrativePayload::BattleResolved {
                winners,
                losers,
                loss_percent,
                tokens_transferred,
                ..
            } => format!(
                "{} defeated {} and took {tokens_transferred} tokens ({loss_percent}%)",
                join_ids(winners),
                join_ids(losers)
            ),
            NarrativePayload::AllianceFormed { agent, partner } => {
                format!("Agent {agent} allied with agent {partner}")
            }
            NarrativePayload::AllianceBroken { agent, partner } => {
                format!("Agent {agent} broke the alliance with agent {partner}")
            }
            NarrativePayload::AgentIgnored { agent, target, .. } => {
                format!("Agent {agent} is ignoring agent {target}")
            }
        }
    }
}

fn join_ids(ids: &[AgentId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" & ")
}
