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

//! Relational backend: one row per player, one upsert per save. Inventory
//! and equipment ride along as JSONB so the schema does not chase the item
//! model.

use crate::repository::{new_record, PlayerRepository, RepositoryError};
use ambonmud_common::ids::{PlayerId, RoomId};
use ambonmud_common::model::PlayerRecord;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS players (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    name_lower  TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    room_id     TEXT NOT NULL,
    hp          INTEGER NOT NULL,
    max_hp      INTEGER NOT NULL,
    mana        INTEGER NOT NULL,
    max_mana    INTEGER NOT NULL,
    level       INTEGER NOT NULL,
    xp_total    BIGINT NOT NULL,
    stats       JSONB NOT NULL,
    is_staff    BOOLEAN NOT NULL DEFAULT FALSE,
    account_bound BOOLEAN NOT NULL DEFAULT FALSE,
    inventory   JSONB NOT NULL DEFAULT '[]',
    equipment   JSONB NOT NULL DEFAULT '{}',
    created_at_ms BIGINT NOT NULL,
    updated_at_ms BIGINT NOT NULL
)
"#;

pub struct PgPlayerRepository {
    pool: PgPool,
}

impl PgPlayerRepository {
    /// Connects and ensures the schema exists.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPool::connect(url).await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<PlayerRecord, RepositoryError> {
    let room_id: String = row.get("room_id");
    let room_id: RoomId = room_id
        .parse()
        .map_err(|_| RepositoryError::Json(serde::de::Error::custom("malformed room id")))?;
    Ok(PlayerRecord {
        id: PlayerId(row.get::<i64, _>("id") as u64),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        room_id,
        hp: row.get("hp"),
        max_hp: row.get("max_hp"),
        mana: row.get("mana"),
        max_mana: row.get("max_mana"),
        level: row.get::<i32, _>("level") as u32,
        xp_total: row.get::<i64, _>("xp_total") as u64,
        stats: serde_json::from_value(row.get("stats"))?,
        is_staff: row.get("is_staff"),
        account_bound: row.get("account_bound"),
        inventory: serde_json::from_value(row.get("inventory"))?,
        equipment: serde_json::from_value(row.get("equipment"))?,
        created_at_ms: row.get::<i64, _>("created_at_ms") as u64,
        updated_at_ms: row.get::<i64, _>("updated_at_ms") as u64,
    })
}

#[async_trait]
impl PlayerRepository for PgPlayerRepository {
    async fn find_by_id(&self, id: PlayerId) -> Result<Option<PlayerRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM players WHERE id = $1")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_name_lower(
        &self,
        name_lower: &str,
    ) -> Result<Option<PlayerRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM players WHERE name_lower = $1")
            .bind(name_lower)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn create(
        &self,
        name: &str,
        start_room: RoomId,
        now_ms: u64,
    ) -> Result<PlayerRecord, RepositoryError> {
        let template = new_record(PlayerId(0), name, start_room, now_ms);
        let result = sqlx::query(
            r#"
            INSERT INTO players
                (name, name_lower, room_id, hp, max_hp, mana, max_mana, level,
                 xp_total, stats, created_at_ms, updated_at_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (name_lower) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&template.name)
        .bind(template.name_lower())
        .bind(template.room_id.as_str())
        .bind(template.hp)
        .bind(template.max_hp)
        .bind(template.mana)
        .bind(template.max_mana)
        .bind(template.level as i32)
        .bind(template.xp_total as i64)
        .bind(serde_json::to_value(template.stats)?)
        .bind(template.created_at_ms as i64)
        .bind(template.updated_at_ms as i64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = result else {
            return Err(RepositoryError::NameTaken);
        };
        Ok(PlayerRecord {
            id: PlayerId(row.get::<i64, _>("id") as u64),
            ..template
        })
    }

    async fn save(&self, record: &PlayerRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO players
                (id, name, name_lower, password_hash, room_id, hp, max_hp,
                 mana, max_mana, level, xp_total, stats, is_staff,
                 account_bound, inventory, equipment, created_at_ms, updated_at_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                name_lower = EXCLUDED.name_lower,
                password_hash = EXCLUDED.password_hash,
                room_id = EXCLUDED.room_id,
                hp = EXCLUDED.hp,
                max_hp = EXCLUDED.max_hp,
                mana = EXCLUDED.mana,
                max_mana = EXCLUDED.max_mana,
                level = EXCLUDED.level,
                xp_total = EXCLUDED.xp_total,
                stats = EXCLUDED.stats,
                is_staff = EXCLUDED.is_staff,
                account_bound = EXCLUDED.account_bound,
                inventory = EXCLUDED.inventory,
                equipment = EXCLUDED.equipment,
                updated_at_ms = EXCLUDED.updated_at_ms
            "#,
        )
        .bind(record.id.0 as i64)
        .bind(&record.name)
        .bind(record.name_lower())
        .bind(&record.password_hash)
        .bind(record.room_id.as_str())
        .bind(record.hp)
        .bind(record.max_hp)
        .bind(record.mana)
        .bind(record.max_mana)
        .bind(record.level as i32)
        .bind(record.xp_total as i64)
        .bind(serde_json::to_value(record.stats)?)
        .bind(record.is_staff)
        .bind(record.account_bound)
        .bind(serde_json::to_value(&record.inventory)?)
        .bind(serde_json::to_value(&record.equipment)?)
        .bind(record.created_at_ms as i64)
        .bind(record.updated_at_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: PlayerId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM players WHERE id = $1")
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}
