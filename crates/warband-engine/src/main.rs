//! Engine binary for Warband.
//!
//! This is the main entry point that wires the settlement gateway, the
//! relational mirror, the decision source, and the social publisher into
//! a [`GameOrchestrator`], then runs its loops until the game ends or the
//! process is interrupted.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load and validate configuration from `warband-config.yaml`
//! 3. Build the terrain map
//! 4. Connect to `PostgreSQL` and `Dragonfly` (when persistence is enabled)
//! 5. Resume the open session or seed a new one
//! 6. Connect to the settlement gateway and mirror its accounts
//! 7. Choose the decision source, publisher, and mirror
//! 8. Start the orchestrator and wait for Ctrl-C or game end
//! 9. Drain and release every collaborator

mod error;
mod llm;
mod mirror;
mod parse;
mod prompt;
mod rpc_ledger;
mod social;
#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warband_agents::WorldState;
use warband_core::{
    Collaborators, EngineConfig, GameClock, GameContext, GameOrchestrator, LogBroadcaster,
    NoopMirror, RestoredRows, StubDecisionSource, SystemClock, restore_world, seed_world,
};
use warband_db::{DragonflyPool, PostgresPool, StateStore};
use warband_ledger::{LedgerClient, LedgerError};
use warband_types::{GameSession, StateChanges};

use crate::error::EngineError;
use crate::llm::{EngineDecisions, LlmDecisionSource};
use crate::mirror::{EngineMirror, PgMirror};
use crate::rpc_ledger::RpcLedger;
use crate::social::{EngineBroadcaster, HttpBroadcaster};

/// How long in-flight work may take to drain after a stop request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails or the orchestrator
/// stops on a fatal error.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("warband-engine starting");

    // 2. Load configuration.
    let config = load_config()?;
    config.validate()?;
    let game_id = config.game.id();
    info!(
        game_id = %game_id,
        seed = config.game.seed,
        roster = config.agents.len(),
        decision_interval_secs = config.loops.decision_interval_secs,
        battle_interval_secs = config.loops.battle_interval_secs,
        "Configuration loaded"
    );

    // 3. Build the terrain map.
    let terrain = config.terrain.build()?;
    info!(map_diameter = config.rules.map_diameter, "Terrain map built");

    // 4. Connect to the relational mirror and cooldown cache.
    let infra = &config.infrastructure;
    let stores = if infra.persistence_enabled {
        let pg = PostgresPool::open_url(&infra.postgres_url).await?;
        let cache = if infra.dragonfly_url.is_empty() {
            None
        } else {
            Some(DragonflyPool::connect(&infra.dragonfly_url, game_id).await?)
        };
        info!(cache = cache.is_some(), "Persistence connected");
        Some((pg, cache))
    } else {
        info!("Persistence disabled, state lives in memory only");
        None
    };

    // 5. Resume or seed the session.
    let clock: Arc<dyn GameClock> = Arc::new(SystemClock);
    let now = clock.now();
    let world = match &stores {
        Some((pg, _)) => load_or_seed(&config, pg, now).await?,
        None => seed_world(GameSession::open(game_id, now), &config.agents)?,
    };
    info!(
        started_at = %world.session.started_at,
        agents = world.agents.len(),
        alive = world.alive_count(),
        "World ready"
    );

    // 6. Connect to the settlement gateway and mirror its accounts.
    let timeout = Duration::from_millis(infra.http_timeout_ms);
    let ledger = Arc::new(RpcLedger::new(&infra.ledger_url, game_id, timeout)?);
    let game = ledger.fetch_game().await?;
    if !game.active {
        warn!(game_id = %game_id, "Settlement program reports the game closed");
    }
    let ctx = Arc::new(
        GameContext::new(world, config.rules.clone(), terrain, config.game.seed)
            .with_lock_attempts(config.loops.lock_attempts),
    );
    sync_from_ledger(&ctx, &*ledger, now).await?;

    // 7. Choose the decision source, publisher, and mirror.
    let decisions = if config.llm.enabled {
        EngineDecisions::Llm(Box::new(LlmDecisionSource::new(&config.llm)?))
    } else {
        EngineDecisions::Stub(StubDecisionSource::new())
    };
    let broadcaster = if infra.social_url.is_empty() {
        EngineBroadcaster::Log(LogBroadcaster)
    } else {
        EngineBroadcaster::Http(HttpBroadcaster::new(&infra.social_url, timeout)?)
    };
    let mirror = match stores {
        Some((pg, cache)) => {
            EngineMirror::Postgres(PgMirror::new(game_id, &infra.postgres_url, pg, cache))
        }
        None => EngineMirror::Noop(NoopMirror),
    };
    info!(
        decisions = decisions.name(),
        ledger_url = %infra.ledger_url,
        social = !infra.social_url.is_empty(),
        "Collaborators ready"
    );

    // 8. Start the orchestrator.
    let orchestrator = Arc::new(GameOrchestrator::new(
        ctx,
        Collaborators {
            ledger,
            decisions: Arc::new(decisions),
            mirror: Arc::new(mirror),
            broadcaster: Arc::new(broadcaster),
            clock,
        },
        config.loops.clone(),
    ));
    let handle = orchestrator.start();
    let signal = handle.shutdown_signal();
    info!("Orchestrator loops running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Interrupt received, stopping");
            handle.stop();
        }
        () = signal.wait() => {
            info!("Orchestrator requested shutdown");
        }
    }

    // 9. Drain and release.
    handle.shutdown(SHUTDOWN_GRACE).await.map_err(EngineError::from)?;
    info!("warband-engine stopped");
    Ok(())
}

/// Load configuration from `warband-config.yaml` if it exists.
fn load_config() -> Result<EngineConfig, EngineError> {
    let config_path = Path::new("warband-config.yaml");
    if config_path.exists() {
        Ok(EngineConfig::from_file(config_path)?)
    } else {
        info!("Config file not found, using defaults");
        Ok(EngineConfig::parse("")?)
    }
}

/// Reload the open session from the mirror, or seed and save a new one.
async fn load_or_seed(
    config: &EngineConfig,
    pg: &PostgresPool,
    now: DateTime<Utc>,
) -> Result<WorldState, EngineError> {
    let store = StateStore::new(pg.pool());
    let game_id = config.game.id();

    if config.game.resume
        && let Some(session) = store.latest_active_session().await?
        && session.game_id == game_id
        && let Some(snapshot) = store.load_session(game_id, now).await?
    {
        info!(
            game_id = %game_id,
            started_at = %session.started_at,
            agents = snapshot.agents.len(),
            battles = snapshot.battles.len(),
            "Resuming open session"
        );
        let rows = RestoredRows {
            agents: snapshot.agents,
            alliances: snapshot.alliances,
            cooldowns: snapshot.cooldowns,
            ignores: snapshot.ignores,
            battles: snapshot.battles,
        };
        return Ok(restore_world(snapshot.session, rows)?);
    }

    let session = GameSession::open(game_id, now);
    let world = seed_world(session, &config.agents)?;
    let changes = StateChanges {
        agents: world.agents.values().cloned().collect(),
        session: Some(session),
        ..StateChanges::default()
    };
    store.apply_changes(game_id, &changes).await?;
    info!(game_id = %game_id, agents = changes.agents.len(), "Seeded new session");
    Ok(world)
}

/// Mirror every known agent's account into local state.
///
/// Agents the gateway does not know are left as seeded. The resulting
/// changes are stashed and written with the first commit.
async fn sync_from_ledger<L: LedgerClient>(
    ctx: &GameContext,
    ledger: &L,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let ids: Vec<_> = ctx.world.read().await.agents.keys().copied().collect();
    let mut accounts = Vec::with_capacity(ids.len());
    for id in ids {
        match ledger.fetch_agent(id).await {
            Ok(account) => accounts.push(account),
            Err(LedgerError::AccountNotFound(_)) => {
                warn!(agent_id = %id, "No settlement account for agent");
            }
            Err(e) => return Err(e.into()),
        }
    }
    let applied = ctx.sync_accounts(&accounts, now).await?;
    info!(
        accounts = accounts.len(),
        changed = applied.changes.agents.len(),
        "Accounts mirrored from the settlement program"
    );
    ctx.stash(applied).await;
    Ok(())
}
