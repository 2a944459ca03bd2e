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

//! Entity model shared between the kernel, the persistence layer and the
//! cluster fabric. World content (rooms, mob spawns, item templates) is
//! immutable once loaded; player records are the unit of persistence.

use crate::events::TransportKind;
use crate::ids::{Direction, EngineId, ItemTemplateId, MobId, PlayerId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable world content. Loaded at startup, never mutated at runtime.
/// Exits hold room ids, never references; cycles are table lookups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub exits: BTreeMap<Direction, RoomId>,
}

/// Equipment slots. An item template without a slot cannot be equipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipSlot {
    Weapon,
    Head,
    Body,
    Hands,
    Feet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: ItemTemplateId,
    pub name: String,
    #[serde(default)]
    pub slot: Option<EquipSlot>,
    #[serde(default)]
    pub damage_bonus: i32,
    #[serde(default)]
    pub armor_bonus: i32,
}

/// A stack of items held in an inventory or lying in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInstance {
    pub template: ItemTemplateId,
    pub qty: u32,
}

/// Mob spawn definition from world content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MobSpawn {
    pub id: MobId,
    pub name: String,
    pub room: RoomId,
    pub hp: i32,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub armor: i32,
    #[serde(default)]
    pub xp_reward: u64,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default)]
    pub wanders: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
        }
    }
}

/// The persisted shape of a player. This is what the repository stores and
/// what travels inside a cross-engine handoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    /// Argon2 PHC string; `None` for guest accounts.
    #[serde(default)]
    pub password_hash: Option<String>,
    pub room_id: RoomId,
    pub hp: i32,
    pub max_hp: i32,
    pub mana: i32,
    pub max_mana: i32,
    pub level: u32,
    pub xp_total: u64,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub is_staff: bool,
    /// True once the record is bound to a created account rather than a guest.
    #[serde(default)]
    pub account_bound: bool,
    #[serde(default)]
    pub inventory: Vec<ItemInstance>,
    #[serde(default)]
    pub equipment: BTreeMap<EquipSlot, ItemTemplateId>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl PlayerRecord {
    pub fn name_lower(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Network address of an engine, as published in the zone registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineAddress {
    pub engine_id: EngineId,
    pub host: String,
    pub port: u16,
}

/// Full snapshot of a player carried by a `PlayerHandoff` message. A
/// serialize/deserialize round trip yields a state equal on all persisted
/// fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedPlayerState {
    pub record: PlayerRecord,
    pub ansi_enabled: bool,
    pub transport: TransportKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub fn test_record(name: &str) -> PlayerRecord {
        PlayerRecord {
            id: PlayerId(7),
            name: name.to_string(),
            password_hash: Some("$argon2id$stub".to_string()),
            room_id: "midgaard:temple".parse().unwrap(),
            hp: 18,
            max_hp: 20,
            mana: 5,
            max_mana: 10,
            level: 3,
            xp_total: 420,
            stats: Stats::default(),
            is_staff: false,
            account_bound: true,
            inventory: vec![ItemInstance {
                template: "midgaard:short_sword".parse().unwrap(),
                qty: 1,
            }],
            equipment: BTreeMap::from([(
                EquipSlot::Weapon,
                "midgaard:short_sword".parse().unwrap(),
            )]),
            created_at_ms: 1_000,
            updated_at_ms: 2_000,
        }
    }

    #[test]
    fn serialized_player_state_roundtrip() {
        let state = SerializedPlayerState {
            record: test_record("Brin"),
            ansi_enabled: true,
            transport: TransportKind::Telnet,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: SerializedPlayerState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
