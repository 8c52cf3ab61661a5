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

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::{
    ArenaConfig, BOT_ID_PREFIX, BOT_NAME_PREFIX, BotId, BotSnapshot, CellSnapshot, Point,
    SPEED_MASS_FACTOR, TICK_RATE_SCALE,
};

pub fn mass_to_radius(mass: f64) -> f64 {
    (mass / PI).sqrt()
}

pub fn radius_to_mass(radius: f64) -> f64 {
    PI * radius * radius
}

/// Cells owned by a bot always carry a positive, finite mass.
pub fn is_valid_mass(mass: f64) -> bool {
    mass.is_finite() && mass > 0.0
}

/// Scalar speed of a bot with `total_mass`, in units per 1/60 s.
///
/// Heavier bots are slower; the result never drops below `config.min_speed`.
pub fn speed_for_mass(total_mass: f64, config: &ArenaConfig) -> f64 {
    let slowdown = 1.0 + total_mass / (config.initial_mass * SPEED_MASS_FACTOR);
    (config.base_speed / slowdown).max(config.min_speed)
}

fn random_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    let uuid = uuid::Builder::from_random_bytes(rng.random()).into_uuid();
    let mut token = uuid.simple().to_string();
    token.truncate(len);
    token
}

pub fn generate_bot_id<R: Rng + ?Sized>(rng: &mut R) -> BotId {
    format!("{BOT_ID_PREFIX}{}", random_token(rng, 8))
}

pub fn generate_cell_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    random_token(rng, 6)
}

/// Display name built from the last three characters of the bot id.
pub fn default_bot_name(bot_id: &str) -> String {
    let mut tail: Vec<char> = bot_id.chars().rev().take(3).collect();
    tail.reverse();
    format!("{BOT_NAME_PREFIX} {}", tail.into_iter().collect::<String>())
}

pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("#{:06x}", rng.random_range(0..=0xFF_FFFF_u32))
}

fn random_arena_point<R: Rng + ?Sized>(config: &ArenaConfig, rng: &mut R) -> Point {
    Point::new(
        rng.random_range(0.0..=config.width),
        rng.random_range(0.0..=config.height),
    )
}

fn random_spawn_point<R: Rng + ?Sized>(config: &ArenaConfig, rng: &mut R) -> Point {
    let margin = config.spawn_margin;
    Point::new(
        rng.random_range(margin..=config.width - margin),
        rng.random_range(margin..=config.height - margin),
    )
}

/// A circular, mass-bearing part of a bot. The radius always follows the mass.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: String,
    pub x: f64,
    pub y: f64,
    mass: f64,
    radius: f64,
}

impl Cell {
    pub fn with_id(id: impl Into<String>, x: f64, y: f64, mass: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            mass,
            radius: mass_to_radius(mass),
        }
    }

    pub fn new<R: Rng + ?Sized>(x: f64, y: f64, mass: f64, rng: &mut R) -> Self {
        Self::with_id(generate_cell_id(rng), x, y, mass)
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn set_mass(&mut self, mass: f64) {
        self.mass = mass;
        self.radius = mass_to_radius(mass);
    }

    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            mass: self.mass,
            radius: self.radius,
        }
    }
}

/// Construction overrides for [`Bot::spawn`]. Unset fields are generated.
#[derive(Debug, Clone, Default)]
pub struct BotOptions {
    pub id: Option<BotId>,
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Bot {
    id: BotId,
    name: String,
    color: String,
    cells: Vec<Cell>,
    max_cells: usize,
    target: Point,
    last_update: DateTime<Utc>,
    total_mass: f64,
}

impl Bot {
    /// Create a bot with one cell of `config.initial_mass` placed inside the spawn margin
    /// and a wander target anywhere in the arena.
    pub fn spawn<R: Rng + ?Sized>(
        options: BotOptions,
        config: &ArenaConfig,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Self {
        let id = options.id.unwrap_or_else(|| generate_bot_id(rng));
        let name = options.name.unwrap_or_else(|| default_bot_name(&id));
        let color = options.color.unwrap_or_else(|| random_color(rng));
        let target = random_arena_point(config, rng);

        let spawn = random_spawn_point(config, rng);
        let cell = Cell::new(spawn.x, spawn.y, config.initial_mass, rng);

        let mut bot = Self {
            id,
            name,
            color,
            cells: Vec::with_capacity(config.max_cells),
            max_cells: config.max_cells,
            target,
            last_update: now,
            total_mass: 0.0,
        };
        bot.cells.push(cell);
        bot.recalculate_total_mass();
        bot
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn target(&self) -> Point {
        self.target
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn total_mass(&self) -> f64 {
        self.total_mass
    }

    pub fn is_alive(&self) -> bool {
        !self.cells.is_empty()
    }

    /// Returns `false` without touching the bot once it already holds `max_cells` cells
    /// or when the cell's mass is not positive and finite.
    pub fn add_cell(&mut self, cell: Cell) -> bool {
        if self.cells.len() >= self.max_cells || !is_valid_mass(cell.mass) {
            return false;
        }
        self.cells.push(cell);
        self.recalculate_total_mass();
        true
    }

    pub fn remove_cell(&mut self, cell_id: &str) -> Option<Cell> {
        let index = self.cells.iter().position(|cell| cell.id == cell_id)?;
        let removed = self.cells.remove(index);
        self.recalculate_total_mass();
        Some(removed)
    }

    /// Returns `false` for an unknown cell or a mass that is not positive and finite.
    pub fn set_cell_mass(&mut self, cell_id: &str, mass: f64) -> bool {
        if !is_valid_mass(mass) {
            return false;
        }
        let Some(cell) = self.cells.iter_mut().find(|cell| cell.id == cell_id) else {
            return false;
        };
        cell.set_mass(mass);
        self.recalculate_total_mass();
        true
    }

    pub fn clear_cells(&mut self) {
        self.cells.clear();
        self.recalculate_total_mass();
    }

    fn recalculate_total_mass(&mut self) {
        self.total_mass = self.cells.iter().map(Cell::mass).sum();
    }

    /// Mass-weighted average of the cell positions.
    ///
    /// Falls back to the first cell when the total mass is zero and to the
    /// wander target when there are no cells.
    pub fn center_of_mass(&self) -> Point {
        let Some(first) = self.cells.first() else {
            return self.target;
        };
        if self.total_mass == 0.0 {
            return first.position();
        }
        let (sum_x, sum_y) = self.cells.iter().fold((0.0, 0.0), |(sx, sy), cell| {
            (sx + cell.x * cell.mass, sy + cell.y * cell.mass)
        });
        Point::new(sum_x / self.total_mass, sum_y / self.total_mass)
    }

    /// Seconds since the last motion update, zero if `now` is earlier.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_update)
            .to_std()
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Advance the bot by `delta_seconds` toward its wander target.
    ///
    /// All cells move by the same vector and are then clamped so each one stays
    /// fully inside the arena. A bot without cells is left untouched.
    pub fn update_position<R: Rng + ?Sized>(
        &mut self,
        delta_seconds: f64,
        now: DateTime<Utc>,
        config: &ArenaConfig,
        rng: &mut R,
    ) {
        if self.cells.is_empty() {
            return;
        }

        let center = self.center_of_mass();
        if center.distance_to(self.target) < config.retarget_distance
            || rng.random::<f64>() < config.retarget_chance
        {
            self.target = random_arena_point(config, rng);
        }

        let angle = (self.target.y - center.y).atan2(self.target.x - center.x);
        let step = speed_for_mass(self.total_mass, config) * delta_seconds * TICK_RATE_SCALE;
        let (move_x, move_y) = (angle.cos() * step, angle.sin() * step);

        for cell in &mut self.cells {
            // min before max: a cell wider than the arena pins to its radius
            cell.x = (cell.x + move_x).min(config.width - cell.radius).max(cell.radius);
            cell.y = (cell.y + move_y).min(config.height - cell.radius).max(cell.radius);
        }

        self.last_update = now;
    }

    pub fn snapshot(&self) -> BotSnapshot {
        BotSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            cells: self.cells.iter().map(Cell::snapshot).collect(),
            target: self.target,
            total_mass: self.total_mass,
            is_python_bot: true,
        }
    }
}
