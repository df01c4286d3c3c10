//! Core entity structs for the Warband engine.
//!
//! Covers `Agent`, `Alliance`, `Cooldown`, `IgnoreRecord`, `Battle`,
//! `GameSession`, and the `StateChanges` snapshot produced by every
//! committed operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{
    ActionKind, AllianceStatus, BattleSide, BattleStatus, BattleType, GameEndReason,
};
use crate::ids::{AgentId, AllianceId, GameId};

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Integer grid coordinates on the shared map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Position {
    /// Construct a position from its coordinates.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// A player entity, mirrored from the settlement program.
///
/// Agents are never deleted. A defeated agent transitions to
/// `alive = false` and stops being eligible for actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable numeric identifier.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Current map position.
    pub position: Position,
    /// Whether the agent is still in play.
    pub alive: bool,
    /// Staked tokens in base units. The ledger holds the authoritative copy.
    pub token_balance: u64,
    /// Current alliance partner. Symmetric across the pair.
    pub alliance_with: Option<AgentId>,
    /// When the agent last moved.
    pub last_move: Option<DateTime<Utc>>,
    /// When the agent's last battle was resolved.
    pub last_battle: Option<DateTime<Utc>>,
    /// When the agent last formed or broke an alliance.
    pub last_alliance: Option<DateTime<Utc>>,
    /// Open-battle marker. All participants of one battle share the value.
    pub battle_started_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Create a fresh, alive agent with no alliance and no history.
    pub const fn new(id: AgentId, name: String, position: Position, token_balance: u64) -> Self {
        Self {
            id,
            name,
            position,
            alive: true,
            token_balance,
            alliance_with: None,
            last_move: None,
            last_battle: None,
            last_alliance: None,
            battle_started_at: None,
        }
    }

    /// Whether the agent currently carries an open-battle marker.
    pub const fn in_battle(&self) -> bool {
        self.battle_started_at.is_some()
    }

    /// Whether `other` is this agent's current alliance partner.
    pub fn is_allied_with(&self, other: AgentId) -> bool {
        self.alliance_with == Some(other)
    }
}

// ---------------------------------------------------------------------------
// Alliance
// ---------------------------------------------------------------------------

/// A mutual, exclusive pairing of two agents.
///
/// The member pair is stored with the lower id first. Records are kept
/// after dissolution so the re-alliance and battle blocks can be computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alliance {
    /// Record identifier.
    pub id: AllianceId,
    /// The two members, lower id first.
    pub members: (AgentId, AgentId),
    /// Lifecycle state.
    pub status: AllianceStatus,
    /// When the alliance was formed.
    pub formed_at: DateTime<Utc>,
    /// When the alliance was dissolved, if it has been.
    pub dissolved_at: Option<DateTime<Utc>>,
}

impl Alliance {
    /// Create an active alliance between two agents.
    pub fn new(a: AgentId, b: AgentId, formed_at: DateTime<Utc>) -> Self {
        let members = if a <= b { (a, b) } else { (b, a) };
        Self {
            id: AllianceId::new(),
            members,
            status: AllianceStatus::Active,
            formed_at,
            dissolved_at: None,
        }
    }

    /// Whether the alliance is still active.
    pub fn is_active(&self) -> bool {
        self.status == AllianceStatus::Active
    }

    /// Whether `agent` is one of the two members.
    pub fn involves(&self, agent: AgentId) -> bool {
        self.members.0 == agent || self.members.1 == agent
    }

    /// Whether this record pairs exactly `a` and `b`, in either order.
    pub fn pairs(&self, a: AgentId, b: AgentId) -> bool {
        self.involves(a) && self.involves(b) && a != b
    }

    /// The other member, if `agent` is a member.
    pub fn partner_of(&self, agent: AgentId) -> Option<AgentId> {
        if self.members.0 == agent {
            Some(self.members.1)
        } else if self.members.1 == agent {
            Some(self.members.0)
        } else {
            None
        }
    }

    /// Transition to `Dissolved`. A no-op on an already dissolved record.
    pub fn dissolve(&mut self, at: DateTime<Utc>) {
        if self.is_active() {
            self.status = AllianceStatus::Dissolved;
            self.dissolved_at = Some(at);
        }
    }
}

// ---------------------------------------------------------------------------
// Cooldowns and ignores
// ---------------------------------------------------------------------------

/// A window during which an agent may not repeat an action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    /// The restricted agent.
    pub agent: AgentId,
    /// The restricted action kind.
    pub kind: ActionKind,
    /// First instant at which the action is allowed again.
    pub expires_at: DateTime<Utc>,
}

impl Cooldown {
    /// True iff `now` is strictly before the expiry.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// One agent ignoring another until a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRecord {
    /// The agent doing the ignoring.
    pub actor: AgentId,
    /// The ignored agent.
    pub target: AgentId,
    /// End of the ignore window.
    pub expires_at: DateTime<Utc>,
}

impl IgnoreRecord {
    /// True while the window is open.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Battles
// ---------------------------------------------------------------------------

/// Result of a resolved battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleOutcome {
    /// The side that won.
    pub winning_side: BattleSide,
    /// Percentage of the losing side's stake transferred to the winners.
    pub loss_percent: u8,
    /// Tokens moved from losers to winners, as reported by the ledger.
    pub tokens_transferred: u64,
    /// Losing agents that died in the post-battle roll.
    pub deaths: Vec<AgentId>,
}

/// A battle group, keyed by the shared open-battle marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battle {
    /// Shared open-battle marker of every participant.
    pub started_at: DateTime<Utc>,
    /// Topology derived from the side sizes.
    pub battle_type: BattleType,
    /// One or two agents; contains the lowest participant id.
    pub side_a: Vec<AgentId>,
    /// One or two agents.
    pub side_b: Vec<AgentId>,
    /// Lifecycle state.
    pub status: BattleStatus,
    /// Set once the battle is resolved.
    pub outcome: Option<BattleOutcome>,
    /// When the battle was resolved or abandoned.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Battle {
    /// Create an active battle record.
    pub const fn new(
        started_at: DateTime<Utc>,
        battle_type: BattleType,
        side_a: Vec<AgentId>,
        side_b: Vec<AgentId>,
    ) -> Self {
        Self {
            started_at,
            battle_type,
            side_a,
            side_b,
            status: BattleStatus::Active,
            outcome: None,
            resolved_at: None,
        }
    }

    /// Every participant, side A first.
    pub fn participants(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.side_a.iter().chain(self.side_b.iter()).copied()
    }

    /// The side `agent` fights on, if it participates.
    pub fn side_of(&self, agent: AgentId) -> Option<BattleSide> {
        if self.side_a.contains(&agent) {
            Some(BattleSide::A)
        } else if self.side_b.contains(&agent) {
            Some(BattleSide::B)
        } else {
            None
        }
    }

    /// Members of the given side.
    pub fn side(&self, side: BattleSide) -> &[AgentId] {
        match side {
            BattleSide::A => &self.side_a,
            BattleSide::B => &self.side_b,
        }
    }

    /// Whether the battle is still waiting for resolution.
    pub fn is_active(&self) -> bool {
        self.status == BattleStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Game session
// ---------------------------------------------------------------------------

/// The owning game session. A closed session rejects every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    /// Settlement program game id.
    pub game_id: GameId,
    /// Whether actions are accepted.
    pub active: bool,
    /// When the session opened.
    pub started_at: DateTime<Utc>,
    /// When the session closed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the session closed.
    pub end_reason: Option<GameEndReason>,
}

impl GameSession {
    /// Open a new session.
    pub const fn open(game_id: GameId, started_at: DateTime<Utc>) -> Self {
        Self {
            game_id,
            active: true,
            started_at,
            ended_at: None,
            end_reason: None,
        }
    }

    /// Close the session. Closing twice keeps the first reason.
    pub const fn close(&mut self, reason: GameEndReason, at: DateTime<Utc>) {
        if self.active {
            self.active = false;
            self.ended_at = Some(at);
            self.end_reason = Some(reason);
        }
    }
}

// ---------------------------------------------------------------------------
// State changes
// ---------------------------------------------------------------------------

/// Post-commit snapshot of every record an operation touched.
///
/// The orchestrator hands this to the relational mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    /// Agents whose mirrored fields changed.
    pub agents: Vec<Agent>,
    /// Alliances created or dissolved.
    pub alliances: Vec<Alliance>,
    /// Cooldown rows written.
    pub cooldowns: Vec<Cooldown>,
    /// Ignore windows written.
    pub ignores: Vec<IgnoreRecord>,
    /// Battles created, resolved, or abandoned.
    pub battles: Vec<Battle>,
    /// Session state, when it changed.
    pub session: Option<GameSession>,
}

impl StateChanges {
    /// True when nothing was touched.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
            && self.alliances.is_empty()
            && self.cooldowns.is_empty()
            && self.ignores.is_empty()
            && self.battles.is_empty()
            && self.session.is_none()
    }

    /// Append another change set to this one.
    pub fn merge(&mut self, other: Self) {
        self.agents.extend(other.agents);
        self.alliances.extend(other.alliances);
        self.cooldowns.extend(other.cooldowns);
        self.ignores.extend(other.ignores);
        self.battles.extend(other.battles);
        if other.session.is_some() {
            self.session = other.session;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn alliance_members_are_normalized() {
        let alliance = Alliance::new(AgentId(9), AgentId(3), t0());
        assert_eq!(alliance.members, (AgentId(3), AgentId(9)));
        assert!(alliance.pairs(AgentId(9), AgentId(3)));
        assert_eq!(alliance.partner_of(AgentId(9)), Some(AgentId(3)));
        assert_eq!(alliance.partner_of(AgentId(4)), None);
    }

    #[test]
    fn dissolve_is_idempotent() {
        let mut alliance = Alliance::new(AgentId(1), AgentId(2), t0());
        let first = t0() + chrono::Duration::hours(1);
        alliance.dissolve(first);
        alliance.dissolve(first + chrono::Duration::hours(1));
        assert!(!alliance.is_active());
        assert_eq!(alliance.dissolved_at, Some(first));
    }

    #[test]
    fn cooldown_expiry_is_exclusive() {
        let cooldown = Cooldown {
            agent: AgentId(1),
            kind: ActionKind::Move,
            expires_at: t0(),
        };
        assert!(cooldown.is_active(t0() - chrono::Duration::seconds(1)));
        assert!(!cooldown.is_active(t0()));
    }

    #[test]
    fn battle_side_lookup() {
        let battle = Battle::new(
            t0(),
            BattleType::AgentVsAlliance,
            vec![AgentId(1)],
            vec![AgentId(2), AgentId(3)],
        );
        assert_eq!(battle.side_of(AgentId(3)), Some(BattleSide::B));
        assert_eq!(battle.side_of(AgentId(7)), None);
        assert_eq!(battle.participants().count(), 3);
    }

    #[test]
    fn session_close_keeps_first_reason() {
        let mut session = GameSession::open(GameId(1), t0());
        session.close(GameEndReason::LastAgentStanding, t0());
        session.close(GameEndReason::Operator, t0());
        assert!(!session.active);
        assert_eq!(session.end_reason, Some(GameEndReason::LastAgentStanding));
    }

    #[test]
    fn state_changes_merge() {
        let mut changes = StateChanges::default();
        assert!(changes.is_empty());
        changes.merge(StateChanges {
            cooldowns: vec![Cooldown {
                agent: AgentId(1),
                kind: ActionKind::Battle,
                expires_at: t0(),
            }],
            ..StateChanges::default()
        });
        assert!(!changes.is_empty());
        assert_eq!(changes.cooldowns.len(), 1);
    }
}
