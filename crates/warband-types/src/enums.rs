//! Enumeration types shared across the engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// The kind of an action, used as the cooldown key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Relocation on the map.
    Move,
    /// Engaging another agent (cooldown applied at resolution).
    Battle,
    /// Forming (or, after dissolution, re-forming) an alliance.
    Alliance,
    /// Ignoring another agent for a window of time.
    Ignore,
}

impl ActionKind {
    /// Stable lowercase label used in logs and the relational mirror.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Battle => "battle",
            Self::Alliance => "alliance",
            Self::Ignore => "ignore",
        }
    }
}

impl core::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Terrain
// ---------------------------------------------------------------------------

/// Terrain of a map cell. Affects movement speed, cost, and death risk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    /// Baseline terrain.
    #[default]
    Plains,
    /// Halves speed, doubles cost, carries a death risk.
    Mountain,
    /// Cuts speed to 30%, triples cost, carries a death risk.
    River,
}

impl Terrain {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plains => "plains",
            Self::Mountain => "mountain",
            Self::River => "river",
        }
    }
}

// ---------------------------------------------------------------------------
// Alliances
// ---------------------------------------------------------------------------

/// Lifecycle of an alliance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllianceStatus {
    /// Both members currently reference each other.
    Active,
    /// Broken by a member or by a member's death.
    Dissolved,
}

impl AllianceStatus {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dissolved => "dissolved",
        }
    }
}

// ---------------------------------------------------------------------------
// Battles
// ---------------------------------------------------------------------------

/// Battle topology, derived from side sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleType {
    /// One agent against one agent.
    Simple,
    /// A lone agent against an allied pair (either order).
    AgentVsAlliance,
    /// Two allied pairs.
    AllianceVsAlliance,
}

impl BattleType {
    /// Classify a battle from the sizes of its two sides.
    ///
    /// Returns `None` unless both sizes are 1 or 2.
    pub const fn classify(side_a: usize, side_b: usize) -> Option<Self> {
        match (side_a, side_b) {
            (1, 1) => Some(Self::Simple),
            (1, 2) | (2, 1) => Some(Self::AgentVsAlliance),
            (2, 2) => Some(Self::AllianceVsAlliance),
            _ => None,
        }
    }

    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::AgentVsAlliance => "agent_vs_alliance",
            Self::AllianceVsAlliance => "alliance_vs_alliance",
        }
    }
}

/// Lifecycle of a battle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    /// Markers are set, waiting for the minimum duration to elapse.
    Active,
    /// Settled on the ledger; markers cleared.
    Resolved,
}

impl BattleStatus {
    /// Stable lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
        }
    }
}

/// One of the two sides of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleSide {
    /// The side containing the lowest agent id of the group.
    A,
    /// The opposing side.
    B,
}

impl BattleSide {
    /// The other side.
    pub const fn opposite(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

// ---------------------------------------------------------------------------
// Game session
// ---------------------------------------------------------------------------

/// Why a game session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEndReason {
    /// At most one agent is left alive.
    LastAgentStanding,
    /// An operator (or the settlement program) closed the game.
    Operator,
}
