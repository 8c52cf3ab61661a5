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

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::{ArenaConfig, ArenaConfigError, Bot, BotId, BotOptions, BotSnapshot};

/// Outcome of a successful [`BotRegistry::eliminate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elimination {
    pub removed_id: BotId,
    pub spawned_id: BotId,
}

/// A reset or fill would push the population past `ArenaConfig::max_bot_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationLimit {
    pub requested: usize,
    pub max: usize,
}

impl std::fmt::Display for PopulationLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "population of {} bots exceeds the limit of {}",
            self.requested, self.max
        )
    }
}

impl std::error::Error for PopulationLimit {}

/// All live bots, keyed by id.
///
/// Operations take `&mut self`; callers sharing a registry between request
/// handlers hold one lock across each whole call so that advancing, resetting
/// and eliminating never interleave.
pub struct BotRegistry {
    bots: HashMap<BotId, Bot>,
    config: ArenaConfig,
    rng: StdRng,
}

impl BotRegistry {
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaConfigError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            bots: HashMap::new(),
            config,
            rng,
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    pub fn get(&self, bot_id: &str) -> Option<&Bot> {
        self.bots.get(bot_id)
    }

    pub fn contains(&self, bot_id: &str) -> bool {
        self.bots.contains_key(bot_id)
    }

    fn spawn_bot(&mut self, now: DateTime<Utc>) -> BotId {
        loop {
            let bot = Bot::spawn(BotOptions::default(), &self.config, now, &mut self.rng);
            if self.bots.contains_key(bot.id()) {
                continue;
            }
            let bot_id = bot.id().to_string();
            self.bots.insert(bot_id.clone(), bot);
            return bot_id;
        }
    }

    fn live_snapshots(&self) -> Vec<BotSnapshot> {
        self.bots
            .values()
            .filter(|bot| bot.is_alive())
            .map(Bot::snapshot)
            .collect()
    }

    fn prune_empty(&mut self) {
        let before = self.bots.len();
        self.bots.retain(|_, bot| bot.is_alive());
        let evicted = before - self.bots.len();
        if evicted > 0 {
            debug!(evicted, "evicted bots without cells");
        }
    }

    fn check_population(&self, requested: usize) -> Result<(), PopulationLimit> {
        let max = self.config.max_bot_count;
        if requested > max {
            return Err(PopulationLimit { requested, max });
        }
        Ok(())
    }

    /// Add `count` fresh bots alongside the existing ones.
    ///
    /// Nothing is spawned if the result would exceed `max_bot_count`.
    pub fn populate(&mut self, count: usize, now: DateTime<Utc>) -> Result<(), PopulationLimit> {
        self.prune_empty();
        let requested = self.bots.len().saturating_add(count);
        self.check_population(requested)?;
        for _ in 0..count {
            self.spawn_bot(now);
        }
        Ok(())
    }

    /// Drop every bot and spawn `count` new ones.
    ///
    /// An oversized `count` is refused before any bot is removed.
    pub fn reset(
        &mut self,
        count: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<BotSnapshot>, PopulationLimit> {
        self.check_population(count)?;
        self.bots.clear();
        self.populate(count, now)?;
        info!(bot_count = self.bots.len(), "reset bots");
        Ok(self.live_snapshots())
    }

    /// Move every bot by the time elapsed since its last update and return the
    /// bots that still have cells. Bots left without cells are removed.
    pub fn list_and_advance(&mut self, now: DateTime<Utc>) -> Vec<BotSnapshot> {
        let mut active = Vec::with_capacity(self.bots.len());
        let mut evicted = Vec::new();

        for (bot_id, bot) in self.bots.iter_mut() {
            let delta_seconds = bot.elapsed_seconds(now);
            bot.update_position(delta_seconds, now, &self.config, &mut self.rng);
            if bot.is_alive() {
                active.push(bot.snapshot());
            } else {
                evicted.push(bot_id.clone());
            }
        }

        for bot_id in evicted {
            debug!(bot_id = %bot_id, "bot has no cells, removing");
            self.bots.remove(&bot_id);
        }
        active
    }

    /// Remove a bot reported as eaten and spawn one replacement.
    ///
    /// Returns `None` and leaves the registry untouched when `bot_id` is unknown.
    pub fn eliminate(&mut self, bot_id: &str, now: DateTime<Utc>) -> Option<Elimination> {
        self.prune_empty();
        self.bots.remove(bot_id)?;
        info!(bot_id = %bot_id, "bot reported as eaten by client");

        let spawned_id = self.spawn_bot(now);
        info!(bot_id = %bot_id, spawned_id = %spawned_id, "bot removed, replacement spawned");
        Some(Elimination {
            removed_id: bot_id.to_string(),
            spawned_id,
        })
    }

    /// Run `f` against one bot. The bot is evicted if `f` leaves it without cells.
    pub fn update_bot<T>(&mut self, bot_id: &str, f: impl FnOnce(&mut Bot) -> T) -> Option<T> {
        let bot = self.bots.get_mut(bot_id)?;
        let result = f(bot);
        if !bot.is_alive() {
            debug!(bot_id = %bot_id, "bot has no cells, removing");
            self.bots.remove(bot_id);
        }
        Some(result)
    }
}
