//! Per-agent view assembly for the decision loop.
//!
//! Before asking the decision source for an agent's next action, the
//! orchestrator builds an [`AgentView`]: the agent's own record, the
//! terrain under it, its live cooldowns, and the other alive agents
//! sorted by distance. Agents the viewer is ignoring are left out of the
//! nearby list; that is the whole effect of an ignore window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use warband_agents::{RulesConfig, WorldState};
use warband_types::{ActionKind, Agent, AgentId, Position, Terrain, ValidationFeedback};
use warband_world::{TerrainMap, distance};

/// Maximum number of other agents listed in a view.
pub const NEARBY_LIMIT: usize = 8;

const KINDS: [ActionKind; 4] = [
    ActionKind::Move,
    ActionKind::Battle,
    ActionKind::Alliance,
    ActionKind::Ignore,
];

/// Another agent as seen by the viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyAgent {
    /// Agent id.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Current position.
    pub position: Position,
    /// Euclidean distance from the viewer.
    pub distance: f64,
    /// Whether battle and alliance can target it from here.
    pub in_range: bool,
    /// Token stake.
    pub token_balance: u64,
    /// Whether it is the viewer's ally.
    pub is_ally: bool,
    /// Whether it is currently fighting.
    pub in_battle: bool,
}

/// A cooldown that is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CooldownView {
    /// Gated action kind.
    pub kind: ActionKind,
    /// When the kind becomes available again.
    pub ready_at: DateTime<Utc>,
    /// Whole seconds left.
    pub remaining_secs: i64,
}

/// Everything an agent is shown before deciding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentView {
    /// The agent's own record.
    pub agent: Agent,
    /// Terrain under the agent.
    pub terrain: Terrain,
    /// Other alive agents, nearest first.
    pub nearby: Vec<NearbyAgent>,
    /// Cooldowns that block actions right now.
    pub cooldowns: Vec<CooldownView>,
    /// Agents currently ignored by the viewer.
    pub ignoring: Vec<AgentId>,
    /// Alive agents in the game, including the viewer.
    pub alive_count: usize,
    /// Map diameter.
    pub map_diameter: u32,
    /// Battle and alliance range.
    pub interaction_range: f64,
    /// Why the agent's previous action was rejected, if it was.
    pub last_feedback: Option<ValidationFeedback>,
    /// When the view was taken.
    pub now: DateTime<Utc>,
}

impl AgentView {
    /// The agent this view belongs to.
    pub const fn agent_id(&self) -> AgentId {
        self.agent.id
    }

    /// Whether an action of `kind` is on cooldown.
    pub fn blocked(&self, kind: ActionKind) -> bool {
        self.cooldowns.iter().any(|c| c.kind == kind)
    }
}

/// Build the view for `id`, or `None` if the agent is unknown or dead.
pub fn build_view(
    state: &WorldState,
    terrain: &TerrainMap,
    rules: &RulesConfig,
    id: AgentId,
    now: DateTime<Utc>,
) -> Option<AgentView> {
    let agent = state.agents.get(&id).filter(|a| a.alive)?;
    let ignoring = state.ignores.ignored_by(id, now);

    let mut nearby: Vec<NearbyAgent> = state
        .agents
        .values()
        .filter(|other| other.alive && other.id != id && !ignoring.contains(&other.id))
        .map(|other| {
            let d = distance(agent.position, other.position);
            NearbyAgent {
                id: other.id,
                name: other.name.clone(),
                position: other.position,
                distance: d,
                in_range: d <= rules.interaction_range,
                token_balance: other.token_balance,
                is_ally: agent.alliance_with == Some(other.id),
                in_battle: other.in_battle(),
            }
        })
        .collect();
    nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    nearby.truncate(NEARBY_LIMIT);

    let cooldowns = KINDS
        .iter()
        .filter(|kind| state.cooldowns.is_on_cooldown(id, **kind, now))
        .filter_map(|kind| {
            let ready_at = state.cooldowns.expires_at(id, *kind)?;
            Some(CooldownView {
                kind: *kind,
                ready_at,
                remaining_secs: state.cooldowns.remaining(id, *kind, now).num_seconds(),
            })
        })
        .collect();

    Some(AgentView {
        agent: agent.clone(),
        terrain: terrain.terrain_at(agent.position),
        nearby,
        cooldowns,
        ignoring,
        alive_count: state.alive_count(),
        map_diameter: rules.map_diameter,
        interaction_range: rules.interaction_range,
        last_feedback: None,
        now,
    })
}
