//! Battle grouping and side construction.
//!
//! Every participant of one battle carries the same open-battle marker,
//! so grouping is a single pass that indexes agents by marker value.
//! Within a group, sides are built by walking ids in ascending order: an
//! unassigned agent starts a side and pulls in its direct ally only if the
//! ally is in the same group. Allies of allies are never merged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use warband_types::{Agent, AgentId, BattleType};

/// Index alive agents by their open-battle marker.
///
/// Member lists are in ascending id order when `agents` is.
pub fn group_by_marker<'a>(
    agents: impl IntoIterator<Item = &'a Agent>,
) -> BTreeMap<DateTime<Utc>, Vec<AgentId>> {
    let mut groups: BTreeMap<DateTime<Utc>, Vec<AgentId>> = BTreeMap::new();
    for agent in agents {
        if let (true, Some(marker)) = (agent.alive, agent.battle_started_at) {
            groups.entry(marker).or_default().push(agent.id);
        }
    }
    for members in groups.values_mut() {
        members.sort_unstable();
    }
    groups
}

/// Split a group into sides of at most two direct allies.
pub fn build_sides(
    members: &[AgentId],
    ally_of: impl Fn(AgentId) -> Option<AgentId>,
) -> Vec<Vec<AgentId>> {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut assigned: Vec<AgentId> = Vec::with_capacity(sorted.len());
    let mut sides = Vec::new();
    for id in &sorted {
        if assigned.contains(id) {
            continue;
        }
        let mut side = vec![*id];
        assigned.push(*id);
        if let Some(ally) = ally_of(*id) {
            if sorted.binary_search(&ally).is_ok() && !assigned.contains(&ally) {
                side.push(ally);
                assigned.push(ally);
            }
        }
        sides.push(side);
    }
    sides
}

/// Order two sides so the one holding the lowest id comes first.
pub fn normalize_sides(
    mut a: Vec<AgentId>,
    mut b: Vec<AgentId>,
) -> (Vec<AgentId>, Vec<AgentId>) {
    a.sort_unstable();
    b.sort_unstable();
    match (a.first(), b.first()) {
        (Some(x), Some(y)) if y < x => (b, a),
        _ => (a, b),
    }
}

/// The shape of a battle group after side construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupShape {
    /// Two sides of one or two agents each.
    Ready {
        /// Topology.
        battle_type: BattleType,
        /// Side holding the lowest id.
        side_a: Vec<AgentId>,
        /// The opposing side.
        side_b: Vec<AgentId>,
    },
    /// Only one side is left (the opponent died or left).
    SingleSide(Vec<AgentId>),
    /// More than two sides, or none.
    Malformed(Vec<Vec<AgentId>>),
}

/// Build sides for a group and classify the result.
pub fn shape_group(
    members: &[AgentId],
    ally_of: impl Fn(AgentId) -> Option<AgentId>,
) -> GroupShape {
    let mut sides = build_sides(members, ally_of);
    match sides.len() {
        1 => GroupShape::SingleSide(sides.remove(0)),
        2 => {
            let side_b = sides.remove(1);
            let side_a = sides.remove(0);
            match BattleType::classify(side_a.len(), side_b.len()) {
                Some(battle_type) => {
                    let (side_a, side_b) = normalize_sides(side_a, side_b);
                    GroupShape::Ready {
                        battle_type,
                        side_a,
                        side_b,
                    }
                }
                None => GroupShape::Malformed(vec![side_a, side_b]),
            }
        }
        _ => GroupShape::Malformed(sides),
    }
}
