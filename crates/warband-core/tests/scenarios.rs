//! End-to-end battle scenarios against the simulated settlement program.
//!
//! Each test wires an [`ActionManager`] and a [`BattleResolver`] over an
//! [`InMemoryLedger`] and a manual clock, then checks both the local
//! mirror and the ledger's books.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use warband_agents::{CombatDraws, OutcomePolicy, RulesConfig, decide_outcome};
use warband_core::config::AgentSeed;
use warband_core::{
    ActionError, ActionManager, BattleResolver, GameClock, GameContext, ManualClock, seed_world,
};
use warband_ledger::{AgentAccount, InMemoryLedger};
use warband_types::{
    ActionKind, AgentId, BattleSide, BattleStatus, GameAction, GameId, GameSession,
    RejectionReason,
};
use warband_world::TerrainMap;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

struct Arena {
    ctx: Arc<GameContext>,
    ledger: Arc<InMemoryLedger>,
    clock: Arc<ManualClock>,
    actions: ActionManager<InMemoryLedger>,
    resolver: BattleResolver<InMemoryLedger>,
}

/// Agent 1 at (0,0) and agent 2 at (1,1), distance ~1.41.
async fn arena(balance_1: u64, balance_2: u64, rules: RulesConfig) -> Arena {
    let roster = vec![
        AgentSeed {
            id: AgentId(1),
            name: String::from("Aldric"),
            x: 0,
            y: 0,
            balance: balance_1,
        },
        AgentSeed {
            id: AgentId(2),
            name: String::from("Brenna"),
            x: 1,
            y: 1,
            balance: balance_2,
        },
    ];
    let ledger = Arc::new(InMemoryLedger::new(GameId(7)));
    for seed in &roster {
        ledger
            .register(AgentAccount::new(seed.id, seed.position(), seed.balance))
            .await
            .unwrap();
    }
    let world = seed_world(GameSession::open(GameId(7), t0()), &roster).unwrap();
    let ctx = Arc::new(GameContext::new(world, rules, TerrainMap::plains(), 2024));
    let clock = Arc::new(ManualClock::new(t0()));
    Arena {
        actions: ActionManager::new(Arc::clone(&ctx), Arc::clone(&ledger), clock.clone()),
        resolver: BattleResolver::new(Arc::clone(&ctx), Arc::clone(&ledger), clock.clone()),
        ctx,
        ledger,
        clock,
    }
}

#[tokio::test]
async fn battle_marks_both_agents_without_cooldown() {
    let arena = arena(1_000, 500, RulesConfig::default()).await;
    let outcome = arena
        .actions
        .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
        .await
        .unwrap();
    assert!(outcome.succeeded);

    let state = arena.ctx.world.read().await;
    let a = state.agent(AgentId(1)).unwrap();
    let b = state.agent(AgentId(2)).unwrap();
    assert!(a.battle_started_at.is_some());
    assert_eq!(a.battle_started_at, b.battle_started_at);
    for id in [AgentId(1), AgentId(2)] {
        assert!(!state.cooldowns.is_on_cooldown(id, ActionKind::Battle, t0()));
    }
    let ledger_marker = arena.ledger.account(AgentId(2)).await.unwrap().battle_started_at;
    assert_eq!(ledger_marker, a.battle_started_at);
}

#[tokio::test]
async fn battle_cooldown_rejects_without_a_ledger_call() {
    let arena = arena(1_000, 500, RulesConfig::default()).await;
    arena
        .ctx
        .world
        .write()
        .await
        .cooldowns
        .refresh(AgentId(1), ActionKind::Battle, TimeDelta::hours(2), t0());

    let err = arena
        .actions
        .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
        .await
        .unwrap_err();
    let ActionError::Validation(feedback) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(feedback.reason, RejectionReason::BattleCooldown);
    assert_eq!(feedback.reason.to_string(), "battle cooldown");
    assert!(arena.ledger.submitted().await.is_empty());
    assert!(!arena.ctx.world.read().await.agent(AgentId(2)).unwrap().in_battle());
}

#[test]
fn low_draw_hands_the_stronger_side_the_win() {
    let policy = OutcomePolicy::from(&RulesConfig::default());
    let draws = CombatDraws {
        noise: 0.5,
        decide: 0.1,
        loss: 0.0,
    };
    let outcome = decide_outcome(900, 300, draws, policy);
    assert_eq!(outcome.winner, BattleSide::A);
    assert!(draws.decide < outcome.win_probability);
    assert!((policy.loss_min..=policy.loss_max).contains(&outcome.loss_percent));
}

#[tokio::test]
async fn simple_battle_settles_within_the_loss_band() {
    let rules = RulesConfig {
        battle_death_chance: 0.0,
        ..RulesConfig::default()
    };
    let arena = arena(900, 300, rules).await;
    arena
        .actions
        .execute(AgentId(1), &GameAction::Battle { target: AgentId(2) })
        .await
        .unwrap();
    arena.clock.advance(TimeDelta::minutes(61));

    let report = arena.resolver.sweep().await;
    assert_eq!(report.resolved, 1);

    let state = arena.ctx.world.read().await;
    let battle = state.battles.get(t0()).unwrap();
    assert_eq!(battle.status, BattleStatus::Resolved);
    let outcome = battle.outcome.clone().unwrap();
    assert!((20..=30).contains(&outcome.loss_percent));

    let (winner, loser, loser_start) = match outcome.winning_side {
        BattleSide::A => (AgentId(1), AgentId(2), 300_u64),
        BattleSide::B => (AgentId(2), AgentId(1), 900_u64),
    };
    let expected = loser_start * u64::from(outcome.loss_percent) / 100;
    assert_eq!(outcome.tokens_transferred, expected);
    assert_eq!(
        state.agent(loser).unwrap().token_balance,
        loser_start - expected
    );
    assert_eq!(
        state.agent(winner).unwrap().token_balance,
        1_200 - (loser_start - expected)
    );
    for id in [AgentId(1), AgentId(2)] {
        let agent = state.agent(id).unwrap();
        assert!(!agent.in_battle());
        assert!(state.cooldowns.is_on_cooldown(id, ActionKind::Battle, arena.clock.now()));
        let account = arena.ledger.account(id).await.unwrap();
        assert_eq!(account.token_balance, agent.token_balance);
        assert!(account.battle_started_at.is_none());
    }
    assert!(arena.ledger.verify_conservation().await.is_conserved());
}
