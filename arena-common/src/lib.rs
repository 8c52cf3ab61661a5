// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::f64::consts::PI;

use regex::Regex;
use serde::{Deserialize, Serialize};

mod bot;
mod registry;

pub use bot::{
    Bot, BotOptions, Cell, default_bot_name, generate_bot_id, generate_cell_id, is_valid_mass,
    mass_to_radius, radius_to_mass, random_color, speed_for_mass,
};
pub use registry::{BotRegistry, Elimination, PopulationLimit};

pub const WORLD_WIDTH: f64 = 3000.0;
pub const WORLD_HEIGHT: f64 = 3000.0;
/// Upper bound on cells per bot. Nothing splits cells yet; `Bot::add_cell` enforces it.
pub const BOT_MAX_CELLS: usize = 4;
pub const BOT_INITIAL_MASS: f64 = PI * 15.0 * 15.0;
pub const BOT_BASE_SPEED: f64 = 2.5;
pub const BOT_MIN_SPEED: f64 = 0.5;
/// Spawn positions keep this distance from every arena edge.
pub const SPAWN_MARGIN: f64 = 100.0;
pub const RETARGET_DISTANCE: f64 = 50.0;
/// Per-tick chance of picking a new wander target while still far away.
pub const RETARGET_CHANCE: f64 = 0.01;
/// A bot of `initial_mass * SPEED_MASS_FACTOR` moves at half the base speed.
pub const SPEED_MASS_FACTOR: f64 = 20.0;
/// Speeds are expressed in units per 1/60 s.
pub const TICK_RATE_SCALE: f64 = 60.0;
pub const DEFAULT_BOT_COUNT: usize = 10;
/// Largest population a reset or startup fill may create.
pub const MAX_BOT_COUNT: usize = 1_000;

pub const BOT_ID_PREFIX: &str = "pybot_";
pub const BOT_NAME_PREFIX: &str = "PyBot";

pub type BotId = String;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub mass: f64,
    pub radius: f64,
}

/// Wire shape of a bot as polled by the game client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSnapshot {
    pub id: BotId,
    pub name: String,
    pub color: String,
    pub cells: Vec<CellSnapshot>,
    pub target: Point,
    pub total_mass: f64,
    /// Marks bots served by this backend rather than by human players.
    pub is_python_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Arena width in world units.
    pub width: f64,
    /// Arena height in world units.
    pub height: f64,
    pub max_cells: usize,
    /// Mass of the single cell every bot spawns with.
    pub initial_mass: f64,
    pub base_speed: f64,
    /// Floor applied after mass slowdown.
    pub min_speed: f64,
    pub spawn_margin: f64,
    /// A bot closer than this to its target picks a new one.
    pub retarget_distance: f64,
    pub retarget_chance: f64,
    /// Bots created at startup before the server accepts traffic.
    pub initial_bot_count: usize,
    /// Registry refuses to grow past this many bots.
    pub max_bot_count: usize,
    /// Fixed RNG seed for reproducible runs. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            max_cells: BOT_MAX_CELLS,
            initial_mass: BOT_INITIAL_MASS,
            base_speed: BOT_BASE_SPEED,
            min_speed: BOT_MIN_SPEED,
            spawn_margin: SPAWN_MARGIN,
            retarget_distance: RETARGET_DISTANCE,
            retarget_chance: RETARGET_CHANCE,
            initial_bot_count: DEFAULT_BOT_COUNT,
            max_bot_count: MAX_BOT_COUNT,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArenaConfigError {
    InvalidArenaSize { width: f64, height: f64 },
    SpawnMarginTooLarge { margin: f64 },
    InvalidInitialMass(f64),
    InvalidBaseSpeed(f64),
    InvalidMinSpeed(f64),
    InvalidRetargetDistance(f64),
    InvalidRetargetChance(f64),
    InvalidMaxCells,
    InitialBotCountTooLarge { initial: usize, max: usize },
}

impl std::fmt::Display for ArenaConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArenaSize { width, height } => {
                write!(f, "arena size must be positive and finite, got {width}x{height}")
            }
            Self::SpawnMarginTooLarge { margin } => write!(
                f,
                "spawn_margin {margin} must be non-negative and leave room inside the arena"
            ),
            Self::InvalidInitialMass(mass) => {
                write!(f, "initial_mass must be positive and finite, got {mass}")
            }
            Self::InvalidBaseSpeed(speed) => {
                write!(f, "base_speed must be positive and finite, got {speed}")
            }
            Self::InvalidMinSpeed(speed) => {
                write!(f, "min_speed must be non-negative and finite, got {speed}")
            }
            Self::InvalidRetargetDistance(distance) => {
                write!(f, "retarget_distance must be non-negative, got {distance}")
            }
            Self::InvalidRetargetChance(chance) => {
                write!(f, "retarget_chance must be within [0, 1], got {chance}")
            }
            Self::InvalidMaxCells => write!(f, "max_cells must be at least 1"),
            Self::InitialBotCountTooLarge { initial, max } => write!(
                f,
                "initial_bot_count {initial} exceeds max_bot_count {max}"
            ),
        }
    }
}

impl std::error::Error for ArenaConfigError {}

impl ArenaConfig {
    pub fn validate(&self) -> Result<(), ArenaConfigError> {
        let positive = |value: f64| value.is_finite() && value > 0.0;

        if !(positive(self.width) && positive(self.height)) {
            return Err(ArenaConfigError::InvalidArenaSize {
                width: self.width,
                height: self.height,
            });
        }
        let margin = self.spawn_margin;
        if !(margin.is_finite() && margin >= 0.0)
            || margin * 2.0 > self.width
            || margin * 2.0 > self.height
        {
            return Err(ArenaConfigError::SpawnMarginTooLarge { margin });
        }
        if !positive(self.initial_mass) {
            return Err(ArenaConfigError::InvalidInitialMass(self.initial_mass));
        }
        if !positive(self.base_speed) {
            return Err(ArenaConfigError::InvalidBaseSpeed(self.base_speed));
        }
        if !(self.min_speed.is_finite() && self.min_speed >= 0.0) {
            return Err(ArenaConfigError::InvalidMinSpeed(self.min_speed));
        }
        if !(self.retarget_distance.is_finite() && self.retarget_distance >= 0.0) {
            return Err(ArenaConfigError::InvalidRetargetDistance(
                self.retarget_distance,
            ));
        }
        if !(0.0..=1.0).contains(&self.retarget_chance) {
            return Err(ArenaConfigError::InvalidRetargetChance(self.retarget_chance));
        }
        if self.max_cells == 0 {
            return Err(ArenaConfigError::InvalidMaxCells);
        }
        if self.initial_bot_count > self.max_bot_count {
            return Err(ArenaConfigError::InitialBotCountTooLarge {
                initial: self.initial_bot_count,
                max: self.max_bot_count,
            });
        }
        Ok(())
    }
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> Result<String, regex::Error> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}
