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

//! Immutable world content, loaded once at startup from YAML resources.
//! Rooms live in a flat table keyed by `RoomId`; exits hold ids, never
//! references. Load failures are fatal.

use ambonmud_common::ids::{ItemTemplateId, RoomId, ZoneId};
use ambonmud_common::model::{ItemInstance, ItemTemplate, MobSpawn, Room};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("cannot read world file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse world file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("duplicate room id `{0}`")]
    DuplicateRoom(RoomId),
    #[error("duplicate item template `{0}`")]
    DuplicateItem(ItemTemplateId),
    #[error("room `{room}` has an exit to unknown room `{target}`")]
    DanglingExit { room: RoomId, target: RoomId },
    #[error("mob `{0}` spawns in unknown room `{1}`")]
    DanglingMobRoom(String, RoomId),
    #[error("item placement references unknown room `{0}`")]
    DanglingPlacementRoom(RoomId),
    #[error("item placement references unknown template `{0}`")]
    DanglingPlacementItem(ItemTemplateId),
    #[error("no rooms were loaded")]
    Empty,
    #[error("start room `{0}` does not exist")]
    MissingStartRoom(RoomId),
    #[error("no world file declares a start_room")]
    NoStartRoom,
}

#[derive(Debug, Deserialize)]
struct ItemPlacement {
    room: RoomId,
    item: ItemTemplateId,
    #[serde(default = "one")]
    qty: u32,
}

fn one() -> u32 {
    1
}

/// On-disk shape of one world resource.
#[derive(Debug, Deserialize)]
struct WorldFile {
    #[serde(default)]
    start_room: Option<RoomId>,
    #[serde(default)]
    rooms: Vec<Room>,
    #[serde(default)]
    items: Vec<ItemTemplate>,
    #[serde(default)]
    mobs: Vec<MobSpawn>,
    #[serde(default)]
    placements: Vec<ItemPlacement>,
}

#[derive(Debug)]
pub struct World {
    pub rooms: HashMap<RoomId, Room>,
    pub item_templates: HashMap<ItemTemplateId, ItemTemplate>,
    pub mob_spawns: Vec<MobSpawn>,
    /// Items initially lying on the ground, by room.
    pub initial_ground: HashMap<RoomId, Vec<ItemInstance>>,
    pub start_room: RoomId,
}

impl World {
    /// Loads and validates all resources. Any inconsistency refuses startup.
    pub fn load(resources: &[PathBuf]) -> Result<Self, WorldError> {
        let mut rooms: HashMap<RoomId, Room> = HashMap::new();
        let mut item_templates: HashMap<ItemTemplateId, ItemTemplate> = HashMap::new();
        let mut mob_spawns = Vec::new();
        let mut placements = Vec::new();
        let mut start_room = None;

        for path in resources {
            let file = load_file(path)?;
            if let Some(start) = file.start_room {
                start_room.get_or_insert(start);
            }
            for room in file.rooms {
                if rooms.contains_key(&room.id) {
                    return Err(WorldError::DuplicateRoom(room.id));
                }
                rooms.insert(room.id.clone(), room);
            }
            for item in file.items {
                if item_templates.contains_key(&item.id) {
                    return Err(WorldError::DuplicateItem(item.id));
                }
                item_templates.insert(item.id.clone(), item);
            }
            mob_spawns.extend(file.mobs);
            placements.extend(file.placements);
        }

        if rooms.is_empty() {
            return Err(WorldError::Empty);
        }
        for room in rooms.values() {
            for target in room.exits.values() {
                if !rooms.contains_key(target) {
                    return Err(WorldError::DanglingExit {
                        room: room.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        for spawn in &mob_spawns {
            if !rooms.contains_key(&spawn.room) {
                return Err(WorldError::DanglingMobRoom(
                    spawn.name.clone(),
                    spawn.room.clone(),
                ));
            }
        }

        let mut initial_ground: HashMap<RoomId, Vec<ItemInstance>> = HashMap::new();
        for placement in placements {
            if !rooms.contains_key(&placement.room) {
                return Err(WorldError::DanglingPlacementRoom(placement.room));
            }
            if !item_templates.contains_key(&placement.item) {
                return Err(WorldError::DanglingPlacementItem(placement.item));
            }
            initial_ground
                .entry(placement.room)
                .or_default()
                .push(ItemInstance {
                    template: placement.item,
                    qty: placement.qty,
                });
        }

        let start_room = start_room.ok_or(WorldError::NoStartRoom)?;
        if !rooms.contains_key(&start_room) {
            return Err(WorldError::MissingStartRoom(start_room));
        }

        info!(
            rooms = rooms.len(),
            items = item_templates.len(),
            mobs = mob_spawns.len(),
            "world loaded"
        );
        Ok(Self {
            rooms,
            item_templates,
            mob_spawns,
            initial_ground,
            start_room,
        })
    }

    /// Builds a world directly from parsed content; used by tests.
    pub fn from_parts(
        rooms: Vec<Room>,
        item_templates: Vec<ItemTemplate>,
        mob_spawns: Vec<MobSpawn>,
        start_room: RoomId,
    ) -> Self {
        Self {
            rooms: rooms.into_iter().map(|r| (r.id.clone(), r)).collect(),
            item_templates: item_templates
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect(),
            mob_spawns,
            initial_ground: HashMap::new(),
            start_room,
        }
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Every zone named by at least one room.
    pub fn zones(&self) -> BTreeSet<ZoneId> {
        self.rooms.keys().map(|id| id.zone()).collect()
    }
}

fn load_file(path: &Path) -> Result<WorldFile, WorldError> {
    let text = std::fs::read_to_string(path).map_err(|source| WorldError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| WorldError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const MIDGAARD: &str = r#"
start_room: midgaard:temple
rooms:
  - id: midgaard:temple
    title: The Temple Square
    description: A broad square before the temple.
    exits:
      north: midgaard:market
  - id: midgaard:market
    title: The Market
    description: Stalls crowd the street.
    exits:
      south: midgaard:temple
items:
  - id: midgaard:short_sword
    name: a short sword
    slot: weapon
    damage_bonus: 2
mobs:
  - id: midgaard:rat.1
    name: a sewer rat
    room: midgaard:market
    hp: 8
    damage: 2
    xp_reward: 25
    wanders: true
placements:
  - room: midgaard:temple
    item: midgaard:short_sword
"#;

    fn write_world(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_valid_world() {
        let file = write_world(MIDGAARD);
        let world = World::load(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(world.rooms.len(), 2);
        assert_eq!(world.start_room, "midgaard:temple".parse().unwrap());
        assert_eq!(world.zones().len(), 1);
        let ground = world
            .initial_ground
            .get(&"midgaard:temple".parse().unwrap())
            .unwrap();
        assert_eq!(ground.len(), 1);
    }

    #[test]
    fn dangling_exit_is_fatal() {
        let file = write_world(
            r#"
start_room: z:a
rooms:
  - id: z:a
    title: A
    description: a room
    exits:
      east: z:missing
"#,
        );
        let err = World::load(&[file.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, WorldError::DanglingExit { .. }));
    }

    #[test]
    fn duplicate_room_is_fatal() {
        let file = write_world(
            r#"
start_room: z:a
rooms:
  - id: z:a
    title: A
    description: one
  - id: z:a
    title: A again
    description: two
"#,
        );
        let err = World::load(&[file.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, WorldError::DuplicateRoom(_)));
    }

    #[test]
    fn missing_start_room_is_fatal() {
        let file = write_world(
            r#"
rooms:
  - id: z:a
    title: A
    description: a room
"#,
        );
        let err = World::load(&[file.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, WorldError::NoStartRoom));
    }
}
