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

//! HP and mana regeneration. Each resource ticks on its own cadence,
//! `max(minInterval, baseInterval - stat * msPerStat)`: constitution drives
//! hp, intelligence drives mana. Combatants do not regenerate. At most
//! `maxPlayersPerTick` players are considered per tick, round-robin.

use crate::engine::Engine;
use ambonmud_common::ids::SessionId;

pub(crate) fn cadence_ms(base_ms: u64, min_ms: u64, stat: i32, ms_per_stat: u64) -> u64 {
    let reduction = (stat.max(0) as u64).saturating_mul(ms_per_stat);
    base_ms.saturating_sub(reduction).max(min_ms)
}

pub fn run(engine: &mut Engine, now_ms: u64) {
    let mut ids: Vec<SessionId> = engine.players.sessions();
    if ids.is_empty() {
        engine.carry_regen = 0;
        return;
    }
    ids.sort();

    let cfg = engine.config.engine.regen.clone();
    let budget = cfg.max_players_per_tick.min(ids.len());
    let start = engine.carry_regen % ids.len();
    for i in 0..budget {
        let session_id = ids[(start + i) % ids.len()];
        regen_player(engine, session_id, now_ms);
    }
    engine.carry_regen = (start + budget) % ids.len();
}

fn regen_player(engine: &mut Engine, session_id: SessionId, now_ms: u64) {
    let cfg = engine.config.engine.regen.clone();
    let Some(player) = engine.players.get_mut(session_id) else {
        return;
    };
    if player.combat_target.is_some() {
        return;
    }

    let mut changed = false;
    let hp_cadence = cadence_ms(
        cfg.base_interval_ms,
        cfg.min_interval_ms,
        player.record.stats.constitution,
        cfg.ms_per_stat,
    );
    if player.record.hp < player.record.max_hp
        && now_ms.saturating_sub(player.last_hp_regen_ms) >= hp_cadence
    {
        player.record.hp = (player.record.hp + cfg.hp_per_tick).min(player.record.max_hp);
        player.last_hp_regen_ms = now_ms;
        changed = true;
    }

    let mana_cadence = cadence_ms(
        cfg.base_interval_ms,
        cfg.min_interval_ms,
        player.record.stats.intelligence,
        cfg.ms_per_stat,
    );
    if player.record.mana < player.record.max_mana
        && now_ms.saturating_sub(player.last_mana_regen_ms) >= mana_cadence
    {
        player.record.mana = (player.record.mana + cfg.mana_per_tick).min(player.record.max_mana);
        player.last_mana_regen_ms = now_ms;
        changed = true;
    }

    if changed {
        let record = player.record.clone();
        engine.db.save(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cadence_is_floored_at_min_interval() {
        assert_eq!(cadence_ms(10_000, 2_000, 10, 300), 7_000);
        assert_eq!(cadence_ms(10_000, 2_000, 100, 300), 2_000);
        assert_eq!(cadence_ms(10_000, 2_000, -5, 300), 10_000);
    }
}
