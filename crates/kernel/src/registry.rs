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

//! Runtime registries for players, mobs and ground items. The engine loop
//! is the sole writer; no locks.

use ambonmud_common::events::TransportKind;
use ambonmud_common::ids::{EngineId, MobId, PlayerId, RoomId, SessionId, ZoneId};
use ambonmud_common::model::{MobSpawn, PlayerRecord, SerializedPlayerState};
use std::collections::{HashMap, HashSet};

/// In-memory state of an authed player. Created on auth success, destroyed
/// on logout or a successful handoff away.
pub struct Player {
    pub session_id: SessionId,
    pub record: PlayerRecord,
    pub ansi_enabled: bool,
    pub transport: TransportKind,
    pub combat_target: Option<MobId>,
    /// Epoch ms of the last hp/mana regen application; cadences differ per
    /// stat so they are tracked separately.
    pub last_hp_regen_ms: u64,
    pub last_mana_regen_ms: u64,
    /// Last instance used per zone, for sticky instance selection.
    pub sticky_instances: HashMap<ZoneId, EngineId>,
}

impl Player {
    pub fn from_record(
        session_id: SessionId,
        record: PlayerRecord,
        transport: TransportKind,
        now_ms: u64,
    ) -> Self {
        Self {
            session_id,
            record,
            ansi_enabled: false,
            transport,
            combat_target: None,
            last_hp_regen_ms: now_ms,
            last_mana_regen_ms: now_ms,
            sticky_instances: HashMap::new(),
        }
    }

    pub fn from_serialized(
        session_id: SessionId,
        state: SerializedPlayerState,
        now_ms: u64,
    ) -> Self {
        Self {
            session_id,
            ansi_enabled: state.ansi_enabled,
            transport: state.transport,
            record: state.record,
            combat_target: None,
            last_hp_regen_ms: now_ms,
            last_mana_regen_ms: now_ms,
            sticky_instances: HashMap::new(),
        }
    }

    pub fn serialize(&self) -> SerializedPlayerState {
        SerializedPlayerState {
            record: self.record.clone(),
            ansi_enabled: self.ansi_enabled,
            transport: self.transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Total equipment damage bonus, looked up against loaded templates by
    /// the combat system.
    pub fn room_id(&self) -> &RoomId {
        &self.record.room_id
    }
}

/// Players online on this engine, indexed by session, by lowercased name and
/// by room. Name uniqueness among online players is enforced here.
#[derive(Default)]
pub struct PlayerRegistry {
    by_session: HashMap<SessionId, Player>,
    name_to_session: HashMap<String, SessionId>,
    id_to_session: HashMap<PlayerId, SessionId>,
    room_members: HashMap<RoomId, HashSet<SessionId>>,
}

impl PlayerRegistry {
    pub fn insert(&mut self, player: Player) {
        let session_id = player.session_id;
        self.name_to_session
            .insert(player.record.name_lower(), session_id);
        self.id_to_session.insert(player.record.id, session_id);
        self.room_members
            .entry(player.record.room_id.clone())
            .or_default()
            .insert(session_id);
        self.by_session.insert(session_id, player);
    }

    pub fn remove(&mut self, session_id: SessionId) -> Option<Player> {
        let player = self.by_session.remove(&session_id)?;
        self.name_to_session.remove(&player.record.name_lower());
        self.id_to_session.remove(&player.record.id);
        if let Some(members) = self.room_members.get_mut(&player.record.room_id) {
            members.remove(&session_id);
            if members.is_empty() {
                self.room_members.remove(&player.record.room_id);
            }
        }
        Some(player)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Player> {
        self.by_session.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut Player> {
        self.by_session.get_mut(&session_id)
    }

    pub fn contains_session(&self, session_id: SessionId) -> bool {
        self.by_session.contains_key(&session_id)
    }

    pub fn session_by_name(&self, name: &str) -> Option<SessionId> {
        self.name_to_session.get(&name.to_lowercase()).copied()
    }

    pub fn session_by_player_id(&self, id: PlayerId) -> Option<SessionId> {
        self.id_to_session.get(&id).copied()
    }

    pub fn is_name_online(&self, name: &str) -> bool {
        self.name_to_session.contains_key(&name.to_lowercase())
    }

    /// Sessions in a room; used for room-scoped broadcasts.
    pub fn members_of(&self, room: &RoomId) -> Vec<SessionId> {
        self.room_members
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Moves a player between rooms, keeping the room index consistent.
    pub fn relocate(&mut self, session_id: SessionId, to: RoomId) {
        let Some(player) = self.by_session.get_mut(&session_id) else {
            return;
        };
        let from = player.record.room_id.clone();
        if let Some(members) = self.room_members.get_mut(&from) {
            members.remove(&session_id);
            if members.is_empty() {
                self.room_members.remove(&from);
            }
        }
        self.room_members
            .entry(to.clone())
            .or_default()
            .insert(session_id);
        player.record.room_id = to;
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.by_session.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.by_session.values()
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }

    /// Online player count per zone, for instancing load reports.
    pub fn counts_by_zone(&self) -> HashMap<ZoneId, usize> {
        let mut counts = HashMap::new();
        for player in self.by_session.values() {
            *counts.entry(player.record.room_id.zone()).or_insert(0) += 1;
        }
        counts
    }
}

/// A live mob. Owned by the engine that owns its zone.
pub struct Mob {
    pub id: MobId,
    pub name: String,
    pub room: RoomId,
    pub hp: i32,
    pub max_hp: i32,
    pub damage: i32,
    pub armor: i32,
    pub xp_reward: u64,
    pub aggressive: bool,
    pub wanders: bool,
    pub combat_target: Option<SessionId>,
}

impl Mob {
    pub fn from_spawn(spawn: &MobSpawn) -> Self {
        Self {
            id: spawn.id.clone(),
            name: spawn.name.clone(),
            room: spawn.room.clone(),
            hp: spawn.hp,
            max_hp: spawn.hp,
            damage: spawn.damage,
            armor: spawn.armor,
            xp_reward: spawn.xp_reward,
            aggressive: spawn.aggressive,
            wanders: spawn.wanders,
            combat_target: None,
        }
    }
}

#[derive(Default)]
pub struct MobRegistry {
    mobs: HashMap<MobId, Mob>,
    by_room: HashMap<RoomId, HashSet<MobId>>,
    /// Killed mobs waiting to respawn: (respawn epoch ms, spawn definition).
    pending_respawns: Vec<(u64, MobSpawn)>,
}

impl MobRegistry {
    pub fn spawn_all(&mut self, spawns: &[MobSpawn], local_zones: Option<&HashSet<ZoneId>>) {
        for spawn in spawns {
            if let Some(zones) = local_zones {
                if !zones.contains(&spawn.room.zone()) {
                    continue;
                }
            }
            self.insert(Mob::from_spawn(spawn));
        }
    }

    pub fn insert(&mut self, mob: Mob) {
        self.by_room
            .entry(mob.room.clone())
            .or_default()
            .insert(mob.id.clone());
        self.mobs.insert(mob.id.clone(), mob);
    }

    pub fn remove(&mut self, id: &MobId) -> Option<Mob> {
        let mob = self.mobs.remove(id)?;
        if let Some(room) = self.by_room.get_mut(&mob.room) {
            room.remove(id);
            if room.is_empty() {
                self.by_room.remove(&mob.room);
            }
        }
        Some(mob)
    }

    pub fn get(&self, id: &MobId) -> Option<&Mob> {
        self.mobs.get(id)
    }

    pub fn get_mut(&mut self, id: &MobId) -> Option<&mut Mob> {
        self.mobs.get_mut(id)
    }

    pub fn in_room(&self, room: &RoomId) -> Vec<MobId> {
        self.by_room
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// First mob in the room whose name contains `keyword`.
    pub fn find_in_room(&self, room: &RoomId, keyword: &str) -> Option<MobId> {
        let keyword = keyword.to_lowercase();
        let mut ids = self.in_room(room);
        ids.sort();
        ids.into_iter()
            .find(|id| {
                self.mobs
                    .get(id)
                    .is_some_and(|m| m.name.to_lowercase().contains(&keyword))
            })
    }

    pub fn relocate(&mut self, id: &MobId, to: RoomId) {
        let Some(mob) = self.mobs.get_mut(id) else {
            return;
        };
        let from = mob.room.clone();
        if let Some(room) = self.by_room.get_mut(&from) {
            room.remove(id);
            if room.is_empty() {
                self.by_room.remove(&from);
            }
        }
        self.by_room.entry(to.clone()).or_default().insert(id.clone());
        mob.room = to;
    }

    pub fn ids(&self) -> Vec<MobId> {
        let mut ids: Vec<_> = self.mobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn schedule_respawn(&mut self, spawn: MobSpawn, at_ms: u64) {
        self.pending_respawns.push((at_ms, spawn));
    }

    /// Re-inserts mobs whose respawn time has passed.
    pub fn apply_respawns(&mut self, now_ms: u64) -> Vec<MobId> {
        let due: Vec<_> = {
            let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_respawns)
                .into_iter()
                .partition(|(at, _)| *at <= now_ms);
            self.pending_respawns = rest;
            due
        };
        let mut respawned = Vec::new();
        for (_, spawn) in due {
            respawned.push(spawn.id.clone());
            self.insert(Mob::from_spawn(&spawn));
        }
        respawned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambonmud_common::ids::PlayerId;
    use pretty_assertions::assert_eq;

    fn record(id: u64, name: &str, room: &str) -> PlayerRecord {
        PlayerRecord {
            id: PlayerId(id),
            name: name.to_string(),
            password_hash: None,
            room_id: room.parse().unwrap(),
            hp: 20,
            max_hp: 20,
            mana: 10,
            max_mana: 10,
            level: 1,
            xp_total: 0,
            stats: Default::default(),
            is_staff: false,
            account_bound: false,
            inventory: vec![],
            equipment: Default::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn registry_indexes_stay_consistent_through_relocate_and_remove() {
        let mut registry = PlayerRegistry::default();
        let player = Player::from_record(
            SessionId(1),
            record(10, "Brin", "z:a"),
            TransportKind::Telnet,
            0,
        );
        registry.insert(player);

        assert_eq!(registry.session_by_name("bRIN"), Some(SessionId(1)));
        assert_eq!(registry.members_of(&"z:a".parse().unwrap()), vec![SessionId(1)]);

        registry.relocate(SessionId(1), "z:b".parse().unwrap());
        assert!(registry.members_of(&"z:a".parse().unwrap()).is_empty());
        assert_eq!(registry.members_of(&"z:b".parse().unwrap()), vec![SessionId(1)]);

        let removed = registry.remove(SessionId(1)).unwrap();
        assert_eq!(removed.record.name, "Brin");
        assert!(registry.session_by_name("brin").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn mob_respawn_cycle() {
        let spawn = MobSpawn {
            id: "z:rat.1".parse().unwrap(),
            name: "a rat".into(),
            room: "z:a".parse().unwrap(),
            hp: 5,
            damage: 1,
            armor: 0,
            xp_reward: 10,
            aggressive: false,
            wanders: false,
        };
        let mut mobs = MobRegistry::default();
        mobs.spawn_all(std::slice::from_ref(&spawn), None);
        let id: MobId = "z:rat.1".parse().unwrap();
        assert!(mobs.get(&id).is_some());

        mobs.remove(&id);
        mobs.schedule_respawn(spawn, 1_000);
        assert!(mobs.apply_respawns(500).is_empty());
        assert_eq!(mobs.apply_respawns(1_500), vec![id.clone()]);
        assert!(mobs.get(&id).is_some());
    }
}
