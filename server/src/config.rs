//! Tunable world parameters
//!
//! Parameters are fixed for the lifetime of a world. They can be loaded from
//! a JSON file; any field missing from the file keeps its default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldParams {
    /// World width in world units.
    pub width: f64,
    /// World height in world units.
    pub height: f64,
    /// Simulation ticks per second.
    pub heartbeats_per_second: u32,
    /// Mass of a regular food cube.
    pub food_mass: f64,
    /// Mass of a virus.
    pub virus_mass: f64,
    /// Chance (0-100) that a spawned cube is a virus.
    pub virus_percent: u32,
    /// Chance (0-100) that spawned food carries double mass.
    pub double_food_percent: u32,
    /// Target food plus virus population.
    pub max_food_count: usize,
    /// Upper bound on cubes spawned during a single tick.
    pub food_per_heartbeat: usize,
    /// Mass every player starts with; attrition never goes below it.
    pub player_start_mass: f64,
    /// Speed of the lightest cells.
    pub max_speed: f64,
    /// Speed of the heaviest cells.
    pub min_speed: f64,
    /// Fraction of mass a player loses every tick.
    pub attrition_rate: f64,
    /// Minimum mass a cell needs before it may split.
    pub min_split_mass: f64,
    /// Offset used when a virus throws split cells away from the contact point.
    pub max_split_distance: f64,
    /// Maximum number of cells in one split group.
    pub max_split_count: usize,
    /// Mass destroyed when a cell hits a virus.
    pub virus_split_overhead: f64,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 1000.0,
            heartbeats_per_second: 30,
            food_mass: 1.0,
            virus_mass: 30.0,
            virus_percent: 2,
            double_food_percent: 1,
            max_food_count: 5000,
            food_per_heartbeat: 25,
            player_start_mass: 10.0,
            max_speed: 1.0,
            min_speed: 0.4,
            attrition_rate: 0.0005,
            min_split_mass: 25.0,
            max_split_distance: 30.0,
            max_split_count: 15,
            virus_split_overhead: 10.0,
        }
    }
}

impl WorldParams {
    /// Loads and validates parameters from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let params: WorldParams =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if !(self.width > 0.0 && self.width.is_finite()) {
            return Err(invalid("width", "must be a positive number"));
        }
        if !(self.height > 0.0 && self.height.is_finite()) {
            return Err(invalid("height", "must be a positive number"));
        }
        if self.heartbeats_per_second == 0 || self.heartbeats_per_second > 1000 {
            return Err(invalid("heartbeats_per_second", "must be between 1 and 1000"));
        }
        if self.virus_percent > 100 {
            return Err(invalid("virus_percent", "must be at most 100"));
        }
        if self.double_food_percent > 100 {
            return Err(invalid("double_food_percent", "must be at most 100"));
        }
        if !(self.attrition_rate > 0.0 && self.attrition_rate < 1.0) {
            return Err(invalid("attrition_rate", "must lie strictly between 0 and 1"));
        }
        if self.min_speed < 0.0 || self.min_speed > self.max_speed {
            return Err(invalid("min_speed", "must lie between 0 and max_speed"));
        }
        if self.food_mass <= 0.0 || self.virus_mass <= 0.0 || self.player_start_mass <= 0.0 {
            return Err(invalid("food_mass", "cube masses must be positive"));
        }
        // The speed curve runs from the start mass up to this mass
        let heavy_mass = 1.0 / (10.0 * self.attrition_rate);
        if !(heavy_mass - self.player_start_mass > heavy_mass * 1e-9) {
            return Err(invalid(
                "player_start_mass",
                format!("must be below {} for this attrition_rate", heavy_mass),
            ));
        }
        if self.max_split_count < 1 {
            return Err(invalid("max_split_count", "must allow at least one cell"));
        }
        if self.virus_split_overhead < 0.0 {
            return Err(invalid("virus_split_overhead", "must not be negative"));
        }
        if self.virus_split_overhead >= self.virus_mass {
            return Err(invalid("virus_split_overhead", "must be below virus_mass"));
        }
        Ok(())
    }

    /// Time between two ticks.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.heartbeats_per_second.max(1)))
    }
}
