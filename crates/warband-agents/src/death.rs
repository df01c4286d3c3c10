//! Death rolls and consequences.
//!
//! On death an agent transitions to `alive = false` and keeps its record.
//! Its open-battle marker is cleared and its active alliance is dissolved;
//! the surviving partner gets the usual re-alliance cooldown. The agent is
//! queued in [`WorldState::pending_kills`] until the ledger accepts the
//! matching `killAgent` call.

use chrono::{DateTime, Utc};
use rand::Rng;
use warband_types::{ActionKind, AgentId, DeathCause, NarrativeEvent, NarrativePayload};

use crate::config::RulesConfig;
use crate::error::AgentError;
use crate::handlers::Applied;
use crate::world_state::WorldState;

/// Roll `chance` once per loser; return those who die.
pub fn roll_battle_deaths<R: Rng>(losers: &[AgentId], chance: f64, rng: &mut R) -> Vec<AgentId> {
    if chance <= 0.0 {
        return Vec::new();
    }
    losers
        .iter()
        .copied()
        .filter(|_| rng.random::<f64>() < chance)
        .collect()
}

/// Mark an agent dead and apply the consequences.
///
/// A no-op (empty result) for agents that are already dead.
pub fn apply_death(
    state: &mut WorldState,
    agent_id: AgentId,
    cause: DeathCause,
    rules: &RulesConfig,
    now: DateTime<Utc>,
) -> Result<Applied, AgentError> {
    let mut applied = Applied::default();
    let agent = state.agent_mut(agent_id)?;
    if !agent.alive {
        return Ok(applied);
    }
    agent.alive = false;
    agent.battle_started_at = None;
    let position = agent.position;
    let partner = agent.alliance_with.take();

    if let Some(partner_id) = partner {
        let record = state.alliances.dissolve_for(agent_id, now)?;
        let survivor = state.agent_mut(partner_id)?;
        survivor.alliance_with = None;
        survivor.last_alliance = Some(now);
        let survivor = survivor.clone();
        let cooldown =
            state
                .cooldowns
                .refresh(partner_id, ActionKind::Alliance, rules.alliance_cooldown(), now);
        applied.changes.alliances.push(record);
        applied.changes.cooldowns.push(cooldown);
        applied.changes.agents.push(survivor);
        applied.events.push(NarrativeEvent::new(
            now,
            NarrativePayload::AllianceBroken {
                agent: agent_id,
                partner: partner_id,
            },
        ));
    }

    state.pending_kills.insert(agent_id);
    applied.changes.agents.push(state.agent(agent_id)?.clone());
    applied.events.push(NarrativeEvent::new(
        now,
        NarrativePayload::AgentDied {
            agent: agent_id,
            position,
            cause,
        },
    ));
    applied
        .side_effects
        .push(format!("agent {agent_id} died ({})", cause_label(cause)));
    tracing::info!(agent_id = %agent_id, cause = cause_label(cause), "agent died");
    Ok(applied)
}

const fn cause_label(cause: DeathCause) -> &'static str {
    match cause {
        DeathCause::Terrain(terrain) => terrain.as_str(),
        DeathCause::Battle => "battle",
        DeathCause::Reported => "reported",
    }
}
