//! The game loops.
//!
//! [`GameOrchestrator`] owns three schedules plus one executor task:
//!
//! - **Decision loop**: every `decision_interval`, each alive agent (in
//!   id order, `inter_agent_delay` apart) is shown its [`AgentView`] and
//!   asked for an action. Answers are queued on a bounded channel.
//! - **Executor**: drains the queue in order, runs each action through
//!   the [`ActionManager`] under the shared [`RetryPolicy`], mirrors the
//!   result and hands events to the broadcast pump.
//! - **Battle loop**: a [`BattleResolver`] sweep every `battle_interval`.
//! - **Cleanup loop**: prunes expired rows, retries queued kills, prunes
//!   mirror history and ends the game when it is over.
//!
//! A loop tick that fails with a non-fatal error runs the matching
//! [`RecoveryAction`] and is retried; a tick that exhausts its attempts
//! halts the engine. Fatal errors trigger the [`ShutdownSignal`] at once.
//!
//! [`AgentView`]: crate::perception::AgentView

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use warband_agents::Applied;
use warband_ledger::LedgerClient;
use warband_types::{
    AgentId, Cooldown, GameAction, GameEndReason, StateChanges, ValidationFeedback,
};

use crate::action_manager::{ActionError, ActionManager, ActionOutcome};
use crate::battle_resolver::{BattleResolver, SweepReport};
use crate::clock::GameClock;
use crate::config::LoopConfig;
use crate::decision::DecisionSource;
use crate::error::{OrchestratorError, RecoveryAction};
use crate::kills::retry_pending_kills;
use crate::mirror::StateMirror;
use crate::perception::build_view;
use crate::retry::{RetryError, RetryPolicy};
use crate::shutdown::ShutdownSignal;
use crate::social::{BroadcastHandle, Broadcaster, spawn_pump};
use crate::state::GameContext;

/// An action waiting for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAction {
    /// The acting agent.
    pub agent: AgentId,
    /// The requested action.
    pub action: GameAction,
}

/// The external services an orchestrator drives.
pub struct Collaborators<L, D, M, B> {
    /// Settlement program client.
    pub ledger: Arc<L>,
    /// Where actions come from.
    pub decisions: Arc<D>,
    /// Durable copy of the state.
    pub mirror: Arc<M>,
    /// Social publisher.
    pub broadcaster: Arc<B>,
    /// Time source.
    pub clock: Arc<dyn GameClock>,
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired cooldown rows dropped.
    pub cooldowns_pruned: usize,
    /// Expired ignore windows dropped.
    pub ignores_pruned: usize,
    /// Resolved battles dropped from memory.
    pub battles_pruned: usize,
    /// Queued kills settled.
    pub kills_settled: usize,
    /// Mirror rows removed.
    pub history_pruned: u64,
    /// Set when this pass ended the game.
    pub session_closed: Option<GameEndReason>,
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    Battle,
    Cleanup,
}

impl Schedule {
    const fn label(self) -> &'static str {
        match self {
            Self::Battle => "battle",
            Self::Cleanup => "cleanup",
        }
    }
}

/// Drives the decision, executor, battle and cleanup tasks.
pub struct GameOrchestrator<L, D, M, B> {
    ctx: Arc<GameContext>,
    ledger: Arc<L>,
    decisions: Arc<D>,
    mirror: Arc<M>,
    broadcaster: Arc<B>,
    clock: Arc<dyn GameClock>,
    actions: ActionManager<L>,
    resolver: BattleResolver<L>,
    loops: LoopConfig,
    retry: RetryPolicy,
    shutdown: Arc<ShutdownSignal>,
    broadcast: BroadcastHandle,
    pump: Mutex<Option<JoinHandle<()>>>,
    feedback: Mutex<BTreeMap<AgentId, ValidationFeedback>>,
    fatal: Mutex<Option<String>>,
}

impl<L, D, M, B> GameOrchestrator<L, D, M, B>
where
    L: LedgerClient + 'static,
    D: DecisionSource + 'static,
    M: StateMirror,
    B: Broadcaster,
{
    /// Wire the components and start the broadcast pump.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(ctx: Arc<GameContext>, parts: Collaborators<L, D, M, B>, loops: LoopConfig) -> Self {
        let shutdown = Arc::new(ShutdownSignal::new());
        let (broadcast, pump) = spawn_pump(
            Arc::clone(&parts.broadcaster),
            loops.broadcast_queue_capacity,
            Arc::clone(&shutdown),
        );
        let actions = ActionManager::new(
            Arc::clone(&ctx),
            Arc::clone(&parts.ledger),
            Arc::clone(&parts.clock),
        );
        let resolver = BattleResolver::new(
            Arc::clone(&ctx),
            Arc::clone(&parts.ledger),
            Arc::clone(&parts.clock),
        );
        Self {
            retry: RetryPolicy::new(loops.retry_max_attempts, loops.retry_delay()),
            ctx,
            ledger: parts.ledger,
            decisions: parts.decisions,
            mirror: parts.mirror,
            broadcaster: parts.broadcaster,
            clock: parts.clock,
            actions,
            resolver,
            loops,
            shutdown,
            broadcast,
            pump: Mutex::new(Some(pump)),
            feedback: Mutex::new(BTreeMap::new()),
            fatal: Mutex::new(None),
        }
    }

    /// The shared stop flag.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    /// The shared game context.
    pub const fn context(&self) -> &Arc<GameContext> {
        &self.ctx
    }

    /// Spawn every loop.
    pub fn start(self: &Arc<Self>) -> OrchestratorHandle<L, D, M, B> {
        let (tx, rx) = mpsc::channel(self.loops.action_queue_capacity.max(1));
        tracing::info!(
            decision_interval_secs = self.loops.decision_interval_secs,
            battle_interval_secs = self.loops.battle_interval_secs,
            cleanup_interval_secs = self.loops.cleanup_interval_secs,
            "Starting game loops"
        );
        let tasks = vec![
            tokio::spawn(Arc::clone(self).executor_loop(rx)),
            tokio::spawn(Arc::clone(self).decision_loop(tx)),
            tokio::spawn(Arc::clone(self).periodic_loop(Schedule::Battle)),
            tokio::spawn(Arc::clone(self).periodic_loop(Schedule::Cleanup)),
        ];
        OrchestratorHandle {
            orchestrator: Arc::clone(self),
            tasks,
        }
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    /// Ask the decision source for `agent`'s next action.
    ///
    /// Dead or unknown agents idle. The feedback of the agent's last
    /// rejection is shown once, in this view.
    pub async fn decide(&self, agent: AgentId) -> Result<Option<GameAction>, OrchestratorError> {
        let now = self.clock.now();
        let view = {
            let state = self.ctx.world.read().await;
            build_view(&state, &self.ctx.terrain, &self.ctx.rules, agent, now)
        };
        let Some(mut view) = view else {
            return Ok(None);
        };
        view.last_feedback = self.feedback.lock().await.remove(&agent);
        self.decisions
            .next_action(&view)
            .await
            .map_err(|e| OrchestratorError::AgentProcessing {
                agent,
                message: e.to_string(),
            })
    }

    /// Ask every alive agent for an action and queue the answers.
    ///
    /// Returns how many actions were queued.
    pub async fn decision_round(&self, queue: &mpsc::Sender<QueuedAction>) -> usize {
        let agents = {
            let state = self.ctx.world.read().await;
            if !state.session.active {
                return 0;
            }
            state.alive_ids()
        };
        let mut queued: usize = 0;
        for (index, agent) in agents.into_iter().enumerate() {
            if index > 0 && self.shutdown.sleep(self.loops.inter_agent_delay()).await {
                break;
            }
            match self.decide(agent).await {
                Ok(Some(action)) => {
                    tracing::debug!(agent_id = %agent, action = action.label(), "Action queued");
                    if queue.send(QueuedAction { agent, action }).await.is_err() {
                        break;
                    }
                    queued = queued.saturating_add(1);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Decision failed; agent idles this round"),
            }
        }
        queued
    }

    /// Execute one action, mirror it and broadcast its events.
    ///
    /// A rejection is not an error: it is reported to the decision source
    /// and `Ok(None)` is returned.
    pub async fn execute(
        &self,
        agent: AgentId,
        action: &GameAction,
    ) -> Result<Option<ActionOutcome>, OrchestratorError> {
        let result = self
            .retry
            .run("action", &self.shutdown, ActionError::is_retryable, |_| {
                self.actions.execute(agent, action)
            })
            .await;
        match result {
            Ok(outcome) => {
                self.commit(Applied {
                    changes: outcome.changes.clone(),
                    events: outcome.events.clone(),
                    side_effects: outcome.side_effects.clone(),
                })
                .await?;
                Ok(Some(outcome))
            }
            Err(RetryError::Permanent(ActionError::Validation(feedback))) => {
                tracing::info!(
                    agent_id = %agent,
                    action = action.label(),
                    reason = %feedback.reason,
                    "Action rejected"
                );
                self.decisions.report(agent, &feedback);
                self.feedback.lock().await.insert(agent, feedback);
                self.commit(Applied::default()).await?;
                Ok(None)
            }
            Err(e) => {
                self.commit(Applied::default()).await?;
                Err(OrchestratorError::AgentProcessing {
                    agent,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Run one battle sweep and mirror its results.
    pub async fn battle_tick(&self) -> Result<SweepReport, OrchestratorError> {
        let mut report = self.resolver.sweep().await;
        self.commit(std::mem::take(&mut report.applied)).await?;
        Ok(report)
    }

    /// Run one cleanup pass.
    pub async fn cleanup_tick(&self) -> Result<CleanupReport, OrchestratorError> {
        let now = self.clock.now();
        let cutoff = now
            .checked_sub_signed(self.loops.history_retention())
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let mut report = CleanupReport::default();

        {
            let mut state = self.ctx.world.write().await;
            report.cooldowns_pruned = state.cooldowns.prune(now);
            report.ignores_pruned = state.ignores.prune(now);
            report.battles_pruned = state.battles.prune_resolved(cutoff);
        }

        match retry_pending_kills(&self.ctx, &*self.ledger).await {
            Ok(settled) => report.kills_settled = settled,
            Err(e) => tracing::warn!(error = %e, "Queued kills deferred to the next cleanup"),
        }

        report.history_pruned = self.mirror.prune_history(cutoff).await?;

        match self.ledger.fetch_game().await {
            Ok(game) if !game.active => {
                report.session_closed = self.end_game(GameEndReason::Operator).await?;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not check game status"),
        }
        if report.session_closed.is_none() && self.ctx.world.read().await.alive_count() <= 1 {
            report.session_closed = self.end_game(GameEndReason::LastAgentStanding).await?;
        }

        self.commit(Applied::default()).await?;
        tracing::info!(
            cooldowns = report.cooldowns_pruned,
            ignores = report.ignores_pruned,
            battles = report.battles_pruned,
            kills = report.kills_settled,
            history = report.history_pruned,
            "Cleanup complete"
        );
        Ok(report)
    }

    async fn end_game(
        &self,
        reason: GameEndReason,
    ) -> Result<Option<GameEndReason>, OrchestratorError> {
        let Some(session) = self.ctx.close_session(reason, self.clock.now()).await else {
            return Ok(None);
        };
        self.commit(Applied {
            changes: StateChanges {
                session: Some(session),
                ..StateChanges::default()
            },
            ..Applied::default()
        })
        .await?;
        self.shutdown.trigger();
        Ok(Some(reason))
    }

    /// Mirror `applied` together with any stashed changes, then broadcast.
    ///
    /// On failure everything is stashed again for the next commit.
    async fn commit(&self, applied: Applied) -> Result<(), OrchestratorError> {
        let mut pending = self.ctx.take_stashed().await;
        pending.merge(applied);
        if pending.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        if let Err(e) = self
            .mirror
            .persist(&pending.changes, &pending.events, now)
            .await
        {
            self.ctx.stash(pending).await;
            return Err(e.into());
        }
        self.broadcast.emit(&pending.events);
        Ok(())
    }

    /// Run the recovery step for a non-fatal error.
    async fn recover(&self, error: &OrchestratorError) -> Result<(), OrchestratorError> {
        let action = error.recovery_action();
        let result = match action {
            RecoveryAction::None => return Ok(()),
            RecoveryAction::ReconnectSocial => {
                self.broadcaster.reconnect().await.map_err(|e| e.to_string())
            }
            RecoveryAction::ReconnectStore => {
                self.mirror.reconnect().await.map_err(|e| e.to_string())
            }
            RecoveryAction::ResetCooldownCache => {
                let live: Vec<Cooldown> = self.ctx.world.read().await.cooldowns.rows().collect();
                self.mirror
                    .reset_cooldown_cache(&live, self.clock.now())
                    .await
                    .map_err(|e| e.to_string())
            }
        };
        match result {
            Ok(()) => {
                tracing::info!(action = ?action, kind = error.kind(), "Recovered");
                Ok(())
            }
            Err(message) => Err(OrchestratorError::recovery(format!(
                "{action:?} failed: {message}"
            ))),
        }
    }

    async fn halt(&self, error: &OrchestratorError) {
        tracing::error!(kind = error.kind(), error = %error, "Fatal error; shutting down");
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            *fatal = Some(error.to_string());
        }
        drop(fatal);
        self.shutdown.trigger();
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn decision_loop(self: Arc<Self>, queue: mpsc::Sender<QueuedAction>) {
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            let queued = self.decision_round(&queue).await;
            tracing::debug!(queued, "Decision round complete");
            if self.shutdown.sleep(self.loops.decision_interval()).await {
                break;
            }
        }
        tracing::info!("Decision loop stopped");
    }

    async fn executor_loop(self: Arc<Self>, mut queue: mpsc::Receiver<QueuedAction>) {
        let mut skipped: usize = 0;
        while let Some(job) = queue.recv().await {
            if self.shutdown.is_triggered() {
                skipped = skipped.saturating_add(1);
                continue;
            }
            match self.execute(job.agent, &job.action).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => self.halt(&e).await,
                Err(e) => {
                    tracing::warn!(kind = e.kind(), error = %e, "Action failed");
                    if let Err(fatal) = self.recover(&e).await {
                        self.halt(&fatal).await;
                    }
                }
            }
        }
        tracing::info!(skipped, "Executor stopped");
    }

    async fn periodic_loop(self: Arc<Self>, schedule: Schedule) {
        let interval = match schedule {
            Schedule::Battle => self.loops.battle_interval(),
            Schedule::Cleanup => self.loops.cleanup_interval(),
        };
        while !self.shutdown.sleep(interval).await {
            let outcome = self
                .retry
                .run(
                    schedule.label(),
                    &self.shutdown,
                    |e: &OrchestratorError| !e.is_fatal(),
                    |_| self.tick(schedule),
                )
                .await;
            match outcome {
                Ok(()) => {}
                Err(RetryError::Interrupted(e)) => {
                    tracing::info!(task = schedule.label(), error = %e, "Tick abandoned for shutdown");
                }
                Err(RetryError::Permanent(e)) => self.halt(&e).await,
                Err(RetryError::Exhausted { attempts, last }) => {
                    let halted = OrchestratorError::recovery(format!(
                        "{} loop halted after {attempts} attempts: {last}",
                        schedule.label()
                    ));
                    self.halt(&halted).await;
                }
            }
        }
        tracing::info!(task = schedule.label(), "Loop stopped");
    }

    async fn tick(&self, schedule: Schedule) -> Result<(), OrchestratorError> {
        let result = match schedule {
            Schedule::Battle => self.battle_tick().await.map(drop),
            Schedule::Cleanup => self.cleanup_tick().await.map(drop),
        };
        if let Err(e) = &result {
            if !e.is_fatal() {
                tracing::warn!(task = schedule.label(), kind = e.kind(), error = %e, "Tick failed");
                self.recover(e).await?;
            }
        }
        result
    }

    /// Flush, stop the pump and release the collaborators.
    async fn finish(&self) -> Result<(), OrchestratorError> {
        self.shutdown.trigger();
        if let Err(e) = self.commit(Applied::default()).await {
            tracing::warn!(error = %e, "Final flush to the mirror failed");
        }
        if let Some(pump) = self.pump.lock().await.take() {
            if let Err(e) = pump.await {
                tracing::warn!(error = %e, "Broadcast pump ended abnormally");
            }
        }
        tracing::info!(dropped_events = self.broadcast.dropped(), "Broadcast drained");

        let mut failures = Vec::new();
        if let Err(e) = self.mirror.close().await {
            failures.push(format!("mirror: {e}"));
        }
        if let Err(e) = self.ledger.close().await {
            failures.push(format!("ledger: {e}"));
        }
        if !failures.is_empty() {
            return Err(OrchestratorError::Shutdown {
                message: failures.join("; "),
            });
        }
        if let Some(message) = self.fatal.lock().await.take() {
            return Err(OrchestratorError::recovery(message));
        }
        Ok(())
    }
}

/// Running loops of a [`GameOrchestrator`].
pub struct OrchestratorHandle<L, D, M, B> {
    orchestrator: Arc<GameOrchestrator<L, D, M, B>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<L, D, M, B> OrchestratorHandle<L, D, M, B>
where
    L: LedgerClient + 'static,
    D: DecisionSource + 'static,
    M: StateMirror,
    B: Broadcaster,
{
    /// Ask every loop to stop after its current tick.
    pub fn stop(&self) {
        self.orchestrator.shutdown.trigger();
    }

    /// The shared stop flag.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.orchestrator.shutdown_signal()
    }

    /// Wait for every loop, then release the collaborators.
    ///
    /// Returns the first fatal error that stopped the engine, if any.
    pub async fn join(self) -> Result<(), OrchestratorError> {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Loop task panicked");
            }
        }
        self.orchestrator.finish().await
    }

    /// Stop and wait, bounded by `grace`.
    pub async fn shutdown(self, grace: Duration) -> Result<(), OrchestratorError> {
        self.stop();
        tokio::time::timeout(grace, self.join())
            .await
            .map_err(|_e| OrchestratorError::Shutdown {
                message: format!("loops did not stop within {}ms", grace.as_millis()),
            })?
    }
}
