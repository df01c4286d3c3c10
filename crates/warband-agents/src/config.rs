//! Tunable game rules.
//!
//! These values correspond to the `rules` section of
//! `warband-config.yaml`. The [`RulesConfig`] struct bundles every tunable
//! so that callers (the engine, tests) can override the defaults.

use chrono::TimeDelta;
use serde::Deserialize;

use crate::error::AgentError;

/// Game rules applied by validation and battle resolution.
///
/// Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RulesConfig {
    /// Maximum distance for battle and alliance targets (default: 2.0).
    #[serde(default = "default_interaction_range")]
    pub interaction_range: f64,

    /// Diameter of the circular map (default: 60).
    #[serde(default = "default_map_diameter")]
    pub map_diameter: u32,

    /// Base move cooldown on plains (default: 1h). Divided by the
    /// destination terrain's speed multiplier.
    #[serde(default = "default_move_cooldown")]
    pub move_cooldown_secs: u64,

    /// Cooldown applied to every participant when a battle resolves
    /// (default: 4h).
    #[serde(default = "default_battle_cooldown")]
    pub battle_cooldown_secs: u64,

    /// Re-alliance block applied on formation and dissolution (default: 24h).
    #[serde(default = "default_alliance_cooldown")]
    pub alliance_cooldown_secs: u64,

    /// How long two former allies may not fight each other (default: 4h).
    #[serde(default = "default_battle_block")]
    pub battle_block_secs: u64,

    /// Ignore window when the action does not name one (default: 4h).
    #[serde(default = "default_ignore_window")]
    pub ignore_window_secs: u64,

    /// Minimum age of a battle before it can resolve (default: 1h).
    #[serde(default = "default_min_battle")]
    pub min_battle_secs: u64,

    /// Age after which a battle with no opponent is abandoned (default: 24h).
    #[serde(default = "default_max_battle")]
    pub max_battle_secs: u64,

    /// Lower bound of the loss band, in percent (default: 20).
    #[serde(default = "default_loss_min")]
    pub loss_percent_min: u8,

    /// Upper bound of the loss band, in percent (default: 30).
    #[serde(default = "default_loss_max")]
    pub loss_percent_max: u8,

    /// Death chance per losing agent (default: 0.10).
    #[serde(default = "default_battle_death_chance")]
    pub battle_death_chance: f64,

    /// Weight of the power ratio in the win probability (default: 0.7).
    /// The remainder is uniform noise.
    #[serde(default = "default_power_weight")]
    pub power_weight: f64,
}

const fn default_interaction_range() -> f64 {
    2.0
}
const fn default_map_diameter() -> u32 {
    60
}
const fn default_move_cooldown() -> u64 {
    3_600
}
const fn default_battle_cooldown() -> u64 {
    14_400
}
const fn default_alliance_cooldown() -> u64 {
    86_400
}
const fn default_battle_block() -> u64 {
    14_400
}
const fn default_ignore_window() -> u64 {
    14_400
}
const fn default_min_battle() -> u64 {
    3_600
}
const fn default_max_battle() -> u64 {
    86_400
}
const fn default_loss_min() -> u8 {
    20
}
const fn default_loss_max() -> u8 {
    30
}
const fn default_battle_death_chance() -> f64 {
    0.10
}
const fn default_power_weight() -> f64 {
    0.7
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            interaction_range: default_interaction_range(),
            map_diameter: default_map_diameter(),
            move_cooldown_secs: default_move_cooldown(),
            battle_cooldown_secs: default_battle_cooldown(),
            alliance_cooldown_secs: default_alliance_cooldown(),
            battle_block_secs: default_battle_block(),
            ignore_window_secs: default_ignore_window(),
            min_battle_secs: default_min_battle(),
            max_battle_secs: default_max_battle(),
            loss_percent_min: default_loss_min(),
            loss_percent_max: default_loss_max(),
            battle_death_chance: default_battle_death_chance(),
            power_weight: default_power_weight(),
        }
    }
}

/// Convert whole seconds to a [`TimeDelta`], saturating at the maximum.
pub fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl RulesConfig {
    /// Check that probabilities and bands are coherent.
    pub fn validate(&self) -> Result<(), AgentError> {
        let invalid = |msg: &str| Err(AgentError::InvalidConfig(msg.to_owned()));
        if !(self.interaction_range.is_finite() && self.interaction_range >= 0.0) {
            return invalid("interaction_range must be a non-negative number");
        }
        if self.loss_percent_min > self.loss_percent_max || self.loss_percent_max > 100 {
            return invalid("loss band must satisfy min <= max <= 100");
        }
        if !(0.0..=1.0).contains(&self.battle_death_chance) {
            return invalid("battle_death_chance must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.power_weight) {
            return invalid("power_weight must be within [0, 1]");
        }
        if self.min_battle_secs > self.max_battle_secs {
            return invalid("min_battle_secs must not exceed max_battle_secs");
        }
        Ok(())
    }

    /// Move cooldown for a destination with the given speed multiplier.
    ///
    /// Slower terrain means a longer cooldown: `base / speed`, rounded up
    /// to the second. A non-positive multiplier yields the base cooldown.
    pub fn move_cooldown(&self, speed_multiplier: f64) -> TimeDelta {
        if !(speed_multiplier.is_finite() && speed_multiplier > 0.0) {
            return seconds(self.move_cooldown_secs);
        }
        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.move_cooldown_secs as f64 / speed_multiplier).ceil();
        #[allow(clippy::cast_precision_loss)]
        let ceiling = i64::MAX as f64;
        if scaled >= ceiling {
            return TimeDelta::MAX;
        }
        #[allow(clippy::cast_possible_truncation)]
        let secs = scaled as i64;
        TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
    }

    /// Cooldown applied at battle resolution.
    pub fn battle_cooldown(&self) -> TimeDelta {
        seconds(self.battle_cooldown_secs)
    }

    /// Re-alliance block.
    pub fn alliance_cooldown(&self) -> TimeDelta {
        seconds(self.alliance_cooldown_secs)
    }

    /// Post-dissolution battle block between the former partners.
    pub fn battle_block(&self) -> TimeDelta {
        seconds(self.battle_block_secs)
    }

    /// Default ignore window.
    pub fn ignore_window(&self) -> TimeDelta {
        seconds(self.ignore_window_secs)
    }

    /// Minimum battle duration.
    pub fn min_battle(&self) -> TimeDelta {
        seconds(self.min_battle_secs)
    }

    /// Abandonment age for battles with a single side.
    pub fn max_battle(&self) -> TimeDelta {
        seconds(self.max_battle_secs)
    }
}
