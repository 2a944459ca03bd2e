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

use ambonmud_common::ids::{PlayerId, RoomId};
use ambonmud_common::model::PlayerRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("player name already taken")]
    NameTaken,
    #[error("player {0} not found")]
    NotFound(PlayerId),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage contract for player records. Name lookups are case-insensitive;
/// `create` atomically reserves the name and allocates an id.
#[async_trait]
pub trait PlayerRepository: Send + Sync {
    async fn find_by_id(&self, id: PlayerId) -> Result<Option<PlayerRecord>, RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<PlayerRecord>, RepositoryError> {
        self.find_by_name_lower(&name.to_lowercase()).await
    }

    async fn find_by_name_lower(
        &self,
        name_lower: &str,
    ) -> Result<Option<PlayerRecord>, RepositoryError>;

    async fn create(
        &self,
        name: &str,
        start_room: RoomId,
        now_ms: u64,
    ) -> Result<PlayerRecord, RepositoryError>;

    async fn save(&self, record: &PlayerRecord) -> Result<(), RepositoryError>;

    async fn delete(&self, id: PlayerId) -> Result<(), RepositoryError>;
}

/// Filesystem-safe slug of a player name; the file backend names records with
/// it. Lowercased, with anything outside `[a-z0-9_]` mapped to `_`.
pub fn slugify_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A fresh level-1 record with default vitals, shared by both backends.
pub(crate) fn new_record(
    id: PlayerId,
    name: &str,
    start_room: RoomId,
    now_ms: u64,
) -> PlayerRecord {
    PlayerRecord {
        id,
        name: name.to_string(),
        password_hash: None,
        room_id: start_room,
        hp: 20,
        max_hp: 20,
        mana: 10,
        max_mana: 10,
        level: 1,
        xp_total: 0,
        stats: Default::default(),
        is_staff: false,
        account_bound: false,
        inventory: Vec::new(),
        equipment: Default::default(),
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slug_is_filesystem_safe() {
        assert_eq!(slugify_name("Brin"), "brin");
        assert_eq!(slugify_name("Guest42"), "guest42");
        assert_eq!(slugify_name("../../etc/passwd"), "_________etc_passwd");
        assert_eq!(slugify_name("sûr prise"), "s_r_prise");
    }
}
