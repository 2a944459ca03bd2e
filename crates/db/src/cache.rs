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

//! Optional L2 read cache over a repository, backed by the cluster's Redis.
//! Keyed by id and by lowercased name; populated on read, invalidated on
//! write-through. Any cache miss or Redis failure falls through to the
//! underlying repository transparently.

use crate::repository::{PlayerRepository, RepositoryError};
use ambonmud_common::ids::{PlayerId, RoomId};
use ambonmud_common::model::PlayerRecord;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::warn;

pub struct CachedRepository {
    inner: Arc<dyn PlayerRepository>,
    redis: ConnectionManager,
    key_prefix: String,
    ttl_seconds: Option<u64>,
}

impl CachedRepository {
    pub fn new(
        inner: Arc<dyn PlayerRepository>,
        redis: ConnectionManager,
        key_prefix: &str,
        ttl_seconds: Option<u64>,
    ) -> Self {
        Self {
            inner,
            redis,
            key_prefix: key_prefix.to_string(),
            ttl_seconds,
        }
    }

    fn id_key(&self, id: PlayerId) -> String {
        format!("{}:player:id:{}", self.key_prefix, id)
    }

    fn name_key(&self, name_lower: &str) -> String {
        format!("{}:player:name:{}", self.key_prefix, name_lower)
    }

    async fn cache_get(&self, key: &str) -> Option<String> {
        let mut redis = self.redis.clone();
        match redis.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "player cache read failed");
                None
            }
        }
    }

    async fn cache_put(&self, key: &str, value: &str) {
        let mut redis = self.redis.clone();
        let result = match self.ttl_seconds {
            Some(ttl) => redis.set_ex::<_, _, ()>(key, value, ttl).await,
            None => redis.set::<_, _, ()>(key, value).await,
        };
        if let Err(e) = result {
            warn!(key, error = %e, "player cache write failed");
        }
    }

    async fn invalidate(&self, record: &PlayerRecord) {
        let mut redis = self.redis.clone();
        let keys = [self.id_key(record.id), self.name_key(&record.name_lower())];
        if let Err(e) = redis.del::<_, ()>(&keys).await {
            warn!(player_id = %record.id, error = %e, "player cache invalidation failed");
        }
    }

    async fn populate(&self, record: &PlayerRecord) {
        let Ok(json) = serde_json::to_string(record) else {
            return;
        };
        self.cache_put(&self.id_key(record.id), &json).await;
        self.cache_put(&self.name_key(&record.name_lower()), &record.id.to_string())
            .await;
    }
}

#[async_trait]
impl PlayerRepository for CachedRepository {
    async fn find_by_id(&self, id: PlayerId) -> Result<Option<PlayerRecord>, RepositoryError> {
        if let Some(json) = self.cache_get(&self.id_key(id)).await {
            if let Ok(record) = serde_json::from_str(&json) {
                return Ok(Some(record));
            }
        }
        let found = self.inner.find_by_id(id).await?;
        if let Some(record) = &found {
            self.populate(record).await;
        }
        Ok(found)
    }

    async fn find_by_name_lower(
        &self,
        name_lower: &str,
    ) -> Result<Option<PlayerRecord>, RepositoryError> {
        if let Some(id) = self.cache_get(&self.name_key(name_lower)).await {
            if let Ok(id) = id.parse::<u64>() {
                if let Some(record) = self.find_by_id(PlayerId(id)).await? {
                    return Ok(Some(record));
                }
            }
        }
        let found = self.inner.find_by_name_lower(name_lower).await?;
        if let Some(record) = &found {
            self.populate(record).await;
        }
        Ok(found)
    }

    async fn create(
        &self,
        name: &str,
        start_room: RoomId,
        now_ms: u64,
    ) -> Result<PlayerRecord, RepositoryError> {
        self.inner.create(name, start_room, now_ms).await
    }

    async fn save(&self, record: &PlayerRecord) -> Result<(), RepositoryError> {
        self.inner.save(record).await?;
        self.invalidate(record).await;
        Ok(())
    }

    async fn delete(&self, id: PlayerId) -> Result<(), RepositoryError> {
        if let Some(record) = self.inner.find_by_id(id).await? {
            self.invalidate(&record).await;
        }
        self.inner.delete(id).await
    }
}
