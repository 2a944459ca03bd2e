// Copyright (C) 2025 AmbonMUD contributors. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Mob wandering and respawns. Wandering mobs drift through random exits
//! within locally-owned zones; mobs never cross onto another engine. At
//! most `mob.maxMovesPerTick` moves happen per wander tick.

use crate::engine::Engine;
use ambonmud_common::ids::{Direction, MobId};
use rand::seq::IteratorRandom;
use rand::Rng;

pub fn run(engine: &mut Engine, now_ms: u64) {
    let cfg = engine.config.engine.mob.clone();
    if now_ms.saturating_sub(engine.last_wander_ms) < cfg.wander_tick_millis {
        return;
    }
    engine.last_wander_ms = now_ms;

    for mob_id in engine.mobs.apply_respawns(now_ms) {
        if let Some(mob) = engine.mobs.get(&mob_id) {
            let line = format!("{} arrives.", mob.name);
            engine.room_broadcast(&mob.room.clone(), None, &line);
        }
    }

    let wanderers: Vec<MobId> = engine
        .mobs
        .ids()
        .into_iter()
        .filter(|id| {
            engine
                .mobs
                .get(id)
                .is_some_and(|m| m.wanders && m.combat_target.is_none())
        })
        .collect();
    if wanderers.is_empty() {
        engine.carry_wander = 0;
        return;
    }

    let budget = cfg.max_moves_per_tick.min(wanderers.len());
    let start = engine.carry_wander % wanderers.len();
    for i in 0..budget {
        let mob_id = &wanderers[(start + i) % wanderers.len()];
        maybe_wander(engine, mob_id, cfg.wander_chance_percent);
    }
    engine.carry_wander = (start + budget) % wanderers.len();
}

fn maybe_wander(engine: &mut Engine, mob_id: &MobId, chance_percent: u32) {
    if rand::rng().random_range(0..100) >= chance_percent {
        return;
    }
    let Some(mob) = engine.mobs.get(mob_id) else {
        return;
    };
    let from = mob.room.clone();
    let name = mob.name.clone();

    let exit: Option<(Direction, _)> = engine.world.room(&from).and_then(|room| {
        room.exits
            .iter()
            .filter(|(_, target)| !engine.is_remote_zone(&target.zone()))
            .map(|(dir, target)| (*dir, target.clone()))
            .choose(&mut rand::rng())
    });
    let Some((dir, to)) = exit else {
        return;
    };

    engine.mobs.relocate(mob_id, to.clone());
    engine.room_broadcast(&from, None, &format!("{name} wanders off {dir}."));
    engine.room_broadcast(&to, None, &format!("{name} wanders in."));
}
