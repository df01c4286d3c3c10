//! Battle outcome math.
//!
//! ## Outcome flow
//!
//! 1. Side power is the sum of the members' token balances.
//! 2. `p = power_a / (power_a + power_b)`, or 0.5 when both are zero.
//! 3. `blended = w * p + (1 - w) * u` with `u` uniform in `[0, 1)` and
//!    `w` the configured power weight (0.7).
//! 4. The loss percentage is drawn from the band, nudged up by
//!    `imbalance * (max - min)` where `imbalance = |2p - 1|`, then clamped
//!    to the band.
//! 5. Side A wins iff a fresh draw is below `blended`.
//!
//! [`decide_outcome`] is pure over explicit draws; [`roll_outcome`] takes
//! the draws from a supplied random source.

use rand::Rng;
use warband_types::BattleSide;

use crate::config::RulesConfig;

/// The knobs that shape an outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomePolicy {
    /// Weight of the power ratio in the blended probability.
    pub power_weight: f64,
    /// Lower bound of the loss band, in percent.
    pub loss_min: u8,
    /// Upper bound of the loss band, in percent.
    pub loss_max: u8,
}

impl From<&RulesConfig> for OutcomePolicy {
    fn from(rules: &RulesConfig) -> Self {
        Self {
            power_weight: rules.power_weight,
            loss_min: rules.loss_percent_min,
            loss_max: rules.loss_percent_max,
        }
    }
}

/// Uniform draws in `[0, 1)` consumed by one outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatDraws {
    /// Noise blended into the win probability.
    pub noise: f64,
    /// Compared against the blended probability to pick the winner.
    pub decide: f64,
    /// Position inside the loss band before the imbalance nudge.
    pub loss: f64,
}

impl CombatDraws {
    /// Take three draws from `rng`.
    pub fn sample<R: Rng>(rng: &mut R) -> Self {
        Self {
            noise: rng.random(),
            decide: rng.random(),
            loss: rng.random(),
        }
    }
}

/// The decided result of a battle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatOutcome {
    /// Winning side.
    pub winner: BattleSide,
    /// Percentage of the losers' balance to transfer.
    pub loss_percent: u8,
    /// Side A's blended win probability.
    pub win_probability: f64,
}

/// Side A's power-derived win probability.
pub fn power_ratio(power_a: u128, power_b: u128) -> f64 {
    let total = power_a.saturating_add(power_b);
    if total == 0 {
        return 0.5;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = power_a as f64 / total as f64;
    ratio
}

/// Sum of member balances.
pub fn side_power(balances: impl IntoIterator<Item = u64>) -> u128 {
    balances
        .into_iter()
        .fold(0_u128, |acc, b| acc.saturating_add(u128::from(b)))
}

/// Decide an outcome from explicit draws.
pub fn decide_outcome(
    power_a: u128,
    power_b: u128,
    draws: CombatDraws,
    policy: OutcomePolicy,
) -> CombatOutcome {
    let p = power_ratio(power_a, power_b);
    let weight = policy.power_weight.clamp(0.0, 1.0);
    let blended = weight.mul_add(p, (1.0 - weight) * draws.noise.clamp(0.0, 1.0));

    let (lo, hi) = if policy.loss_min <= policy.loss_max {
        (policy.loss_min, policy.loss_max)
    } else {
        (policy.loss_max, policy.loss_min)
    };
    let span = f64::from(hi.saturating_sub(lo));
    let imbalance = 2.0_f64.mul_add(p, -1.0).abs();
    let drawn = (draws.loss.clamp(0.0, 1.0) * (span + 1.0)).floor().min(span);
    let nudge = (imbalance * span).round();
    let raw = (f64::from(lo) + drawn + nudge).clamp(f64::from(lo), f64::from(hi));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let loss_percent = raw as u8;

    let winner = if draws.decide < blended {
        BattleSide::A
    } else {
        BattleSide::B
    };
    CombatOutcome {
        winner,
        loss_percent,
        win_probability: blended,
    }
}

/// Decide an outcome with draws from `rng`.
pub fn roll_outcome<R: Rng>(
    power_a: u128,
    power_b: u128,
    policy: OutcomePolicy,
    rng: &mut R,
) -> CombatOutcome {
    decide_outcome(power_a, power_b, CombatDraws::sample(rng), policy)
}
