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

//! Combat rounds. Damage is `base + equipment bonus`, mitigated by armor;
//! players dodge at `min(dex * dexDodgePerPoint, maxDodgePercent)` percent.
//! At most `maxCombatsPerTick` fights advance per combat tick, round-robin
//! with a carry-over index.

use crate::engine::{Engine, MOB_RESPAWN_MS};
use ambonmud_common::ids::SessionId;
use ambonmud_common::model::MobSpawn;
use rand::Rng;
use tracing::debug;

/// Cumulative experience required to reach `level`.
pub fn xp_for_level(level: u32) -> u64 {
    let level = level as u64;
    100 * level * (level - 1) / 2
}

pub fn run(engine: &mut Engine, now_ms: u64) {
    let tick_millis = engine.config.engine.combat.tick_millis;
    if now_ms.saturating_sub(engine.last_combat_ms) < tick_millis {
        return;
    }
    engine.last_combat_ms = now_ms;

    let mut fighters: Vec<SessionId> = engine
        .players
        .iter()
        .filter(|p| p.combat_target.is_some())
        .map(|p| p.session_id)
        .collect();
    if fighters.is_empty() {
        engine.carry_combat = 0;
        return;
    }
    fighters.sort();

    let budget = engine
        .config
        .engine
        .combat
        .max_combats_per_tick
        .min(fighters.len());
    let start = engine.carry_combat % fighters.len();
    for i in 0..budget {
        let session_id = fighters[(start + i) % fighters.len()];
        fight_round(engine, session_id);
    }
    engine.carry_combat = (start + budget) % fighters.len().max(1);
}

fn fight_round(engine: &mut Engine, session_id: SessionId) {
    let Some(player) = engine.players.get(session_id) else {
        return;
    };
    let Some(mob_id) = player.combat_target.clone() else {
        return;
    };
    let player_room = player.record.room_id.clone();

    // Target may have died to someone else or wandered off this tick.
    let target_gone = match engine.mobs.get(&mob_id) {
        Some(mob) => mob.room != player_room,
        None => true,
    };
    if target_gone {
        if let Some(player) = engine.players.get_mut(session_id) {
            player.combat_target = None;
        }
        engine.send_info(session_id, "Your target is gone.");
        engine.prompt(session_id);
        return;
    }

    // Player strikes first.
    let combat_cfg = engine.config.engine.combat.clone();
    let equip_bonus = engine
        .players
        .get(session_id)
        .map(|p| engine.equip_damage_bonus(p))
        .unwrap_or(0);
    let (mob_name, mob_dead, mob_damage) = {
        let Some(mob) = engine.mobs.get_mut(&mob_id) else {
            return;
        };
        let dmg = (combat_cfg.base_damage + equip_bonus - mob.armor).max(1);
        mob.hp -= dmg;
        mob.combat_target.get_or_insert(session_id);
        (mob.name.clone(), mob.hp <= 0, mob.damage)
    };
    engine.send_text(session_id, format!("You hit {mob_name}."));

    if mob_dead {
        mob_killed(engine, session_id, &mob_id);
        return;
    }

    // Mob strikes back, unless dodged.
    let (dex, armor_bonus) = engine
        .players
        .get(session_id)
        .map(|p| (p.record.stats.dexterity, engine.equip_armor_bonus(p)))
        .unwrap_or((0, 0));
    let dodge_chance = (dex as f64 * combat_cfg.dex_dodge_per_point)
        .min(combat_cfg.max_dodge_percent);
    if rand::rng().random_range(0.0..100.0) < dodge_chance {
        engine.send_text(session_id, format!("You dodge {mob_name}'s attack."));
    } else {
        let dmg = (mob_damage - armor_bonus).max(1);
        let defeated = {
            let Some(player) = engine.players.get_mut(session_id) else {
                return;
            };
            player.record.hp -= dmg;
            player.record.hp <= 0
        };
        engine.send_text(session_id, format!("{mob_name} hits you."));
        if defeated {
            player_defeated(engine, session_id, &mob_name);
            return;
        }
    }

    if let Some(player) = engine.players.get(session_id) {
        engine.db.save(player.record.clone());
    }
    engine.prompt(session_id);
}

fn mob_killed(engine: &mut Engine, session_id: SessionId, mob_id: &ambonmud_common::ids::MobId) {
    let Some(mob) = engine.mobs.remove(mob_id) else {
        return;
    };
    debug!(mob = %mob.id, "mob killed");
    engine.mobs.schedule_respawn(
        MobSpawn {
            id: mob.id.clone(),
            name: mob.name.clone(),
            room: mob.room.clone(),
            hp: mob.max_hp,
            damage: mob.damage,
            armor: mob.armor,
            xp_reward: mob.xp_reward,
            aggressive: mob.aggressive,
            wanders: mob.wanders,
        },
        engine.now_ms + MOB_RESPAWN_MS,
    );

    // Anyone fighting this mob stands down.
    for other in engine.players.sessions() {
        if let Some(player) = engine.players.get_mut(other) {
            if player.combat_target.as_ref() == Some(mob_id) {
                player.combat_target = None;
            }
        }
    }

    engine.send_text(session_id, format!("{} dies!", mob.name));
    engine.room_broadcast(
        &mob.room,
        Some(session_id),
        &format!("{} dies!", mob.name),
    );
    award_xp(engine, session_id, mob.xp_reward);
    engine.prompt(session_id);
}

fn award_xp(engine: &mut Engine, session_id: SessionId, xp: u64) {
    let leveled = {
        let Some(player) = engine.players.get_mut(session_id) else {
            return;
        };
        player.record.xp_total += xp;
        let mut leveled = false;
        while player.record.xp_total >= xp_for_level(player.record.level + 1) {
            player.record.level += 1;
            player.record.max_hp += 5;
            player.record.max_mana += 3;
            player.record.hp = player.record.max_hp;
            player.record.mana = player.record.max_mana;
            leveled = true;
        }
        leveled
    };
    engine.send_info(session_id, format!("You gain {xp} experience."));
    if leveled {
        let level = engine
            .players
            .get(session_id)
            .map(|p| p.record.level)
            .unwrap_or(0);
        engine.send_info(session_id, format!("You are now level {level}!"));
    }
    if let Some(player) = engine.players.get(session_id) {
        engine.db.save(player.record.clone());
    }
}

fn player_defeated(engine: &mut Engine, session_id: SessionId, mob_name: &str) {
    let start_room = engine.world.start_room.clone();
    let (name, old_room) = {
        let Some(player) = engine.players.get_mut(session_id) else {
            return;
        };
        player.combat_target = None;
        player.record.hp = (player.record.max_hp / 4).max(1);
        (player.record.name.clone(), player.record.room_id.clone())
    };
    // Any mob fighting this player loses its target.
    for mob_id in engine.mobs.in_room(&old_room) {
        if let Some(mob) = engine.mobs.get_mut(&mob_id) {
            if mob.combat_target == Some(session_id) {
                mob.combat_target = None;
            }
        }
    }

    engine.send_error(session_id, format!("{mob_name} knocks you out!"));
    engine.room_broadcast(&old_room, Some(session_id), &format!("{name} collapses."));
    engine.players.relocate(session_id, start_room.clone());
    engine.room_broadcast(
        &start_room,
        Some(session_id),
        &format!("{name} staggers in, barely conscious."),
    );
    engine.send_info(session_id, "You come to somewhere safe.");
    if let Some(player) = engine.players.get(session_id) {
        engine.db.save(player.record.clone());
    }
    engine.look(session_id);
    engine.prompt(session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn level_curve_is_monotonic_triangular() {
        assert_eq!(xp_for_level(1), 0);
        assert_eq!(xp_for_level(2), 100);
        assert_eq!(xp_for_level(3), 300);
        assert_eq!(xp_for_level(4), 600);
    }
}
