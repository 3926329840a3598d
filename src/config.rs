//! Arena Configuration
//!
//! Every timing and tuning constant of the simulation lives here so a room can
//! be replayed or tested with different parameters. Defaults match the live
//! game; a JSON file named by `ARENA_CONFIG` can override any subset.

use std::path::Path;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::clock::Millis;

/// Longest frame the simulation accepts, in ticks. Longer gaps are clamped.
pub const MAX_FRAME_TICKS: Millis = 4;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Simulation and session tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Local simulation loop rate (Hz).
    pub tick_rate_hz: u32,
    /// Bomb fuse.
    pub fuse_ms: Millis,
    /// Delay before a bomb caught in a blast detonates.
    pub chain_delay_ms: Millis,
    /// How long an explosion stays visible before removal.
    pub explosion_display_ms: Millis,
    /// Lobby auto-start countdown, anchored at the second join.
    pub lobby_countdown_ms: Millis,
    /// Round length before sudden death.
    pub round_duration_ms: Millis,
    /// Time between sudden-death shrink steps.
    pub shrink_interval_ms: Millis,
    /// Minimum spacing between two zone hits on the same player.
    pub zone_damage_cooldown_ms: Millis,
    /// Minimum simulated time between two position publishes.
    pub position_publish_interval_ms: Millis,
    /// Full snapshot refetch period.
    pub snapshot_interval_ms: Millis,
    /// Movement speed at `speed == 1.0`, in tiles per second.
    pub base_speed: f32,
    /// Lane snapping rate, in tiles per second.
    pub lane_snap_rate: f32,
    /// Half width of the square player hit box.
    pub hitbox_half_width: f32,
    /// Fraction of the remaining distance a remote player covers per frame.
    pub interpolation_factor: f32,
    /// Residual distance under which a remote player snaps to its target.
    pub interpolation_epsilon: f32,
    /// Percent of free tiles that start as crates.
    pub crate_density_percent: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            fuse_ms: 3_000,
            chain_delay_ms: 50,
            explosion_display_ms: 500,
            lobby_countdown_ms: 60_000,
            round_duration_ms: 180_000,
            shrink_interval_ms: 5_000,
            zone_damage_cooldown_ms: 1_000,
            position_publish_interval_ms: 50,
            snapshot_interval_ms: 2_000,
            base_speed: 4.0,
            lane_snap_rate: 10.0,
            hitbox_half_width: 0.40,
            interpolation_factor: 0.15,
            interpolation_epsilon: 0.01,
            crate_density_percent: 70,
        }
    }
}

impl ArenaConfig {
    /// Environment variable naming a JSON config file.
    pub const ENV_VAR: &'static str = "ARENA_CONFIG";

    /// Parse from a JSON string. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Load from the file named by `ARENA_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(Self::ENV_VAR) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Duration of one loop tick.
    pub fn tick_interval_ms(&self) -> Millis {
        (1_000 / self.tick_rate_hz.max(1)) as Millis
    }

    /// Largest frame delta fed to one tick.
    pub fn max_frame_ms(&self) -> Millis {
        self.tick_interval_ms().max(1) * MAX_FRAME_TICKS
    }

    /// Check ranges that would break the simulation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1_000 {
            return Err(ConfigError::Invalid(format!("tick_rate_hz {}", self.tick_rate_hz)));
        }
        if self.fuse_ms == 0 {
            return Err(ConfigError::Invalid("fuse_ms must be positive".into()));
        }
        if self.shrink_interval_ms == 0 {
            return Err(ConfigError::Invalid("shrink_interval_ms must be positive".into()));
        }
        if !(0.0..0.5).contains(&self.hitbox_half_width) || self.hitbox_half_width == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "hitbox_half_width {} must be in (0, 0.5)",
                self.hitbox_half_width
            )));
        }
        if !(0.0..=1.0).contains(&self.interpolation_factor) || self.interpolation_factor == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "interpolation_factor {} must be in (0, 1]",
                self.interpolation_factor
            )));
        }
        if self.crate_density_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "crate_density_percent {}",
                self.crate_density_percent
            )));
        }
        if self.base_speed <= 0.0 || self.lane_snap_rate < 0.0 {
            return Err(ConfigError::Invalid("speeds must be positive".into()));
        }
        Ok(())
    }
}
