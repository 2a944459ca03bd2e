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

//! Lease-backed zone registry. Classic mode writes one TTL'd key per zone;
//! instancing mode keeps per-engine entries in a hash keyed by zone, each
//! with its own lease key, and readers filter out entries whose lease has
//! expired. An absent key means an absent owner.

use crate::registry::{RegistryError, ZoneInstance, ZoneRegistry};
use ambonmud_common::ids::{EngineId, ZoneId};
use ambonmud_common::model::EngineAddress;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

struct ClaimState {
    address: Option<EngineAddress>,
    zones: Vec<ZoneId>,
}

/// Cursor-based SCAN so large registries never block the server.
async fn scan_keys(
    redis: &mut ConnectionManager,
    pattern: &str,
) -> Result<Vec<String>, RegistryError> {
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(100)
            .query_async(&mut *redis)
            .await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}

pub struct RedisZoneRegistry {
    redis: ConnectionManager,
    key_prefix: String,
    lease_ttl_seconds: u64,
    instancing: bool,
    capacity_per_instance: usize,
    claimed: Mutex<ClaimState>,
}

impl RedisZoneRegistry {
    pub fn new(
        redis: ConnectionManager,
        key_prefix: &str,
        lease_ttl_seconds: u64,
        instancing: bool,
        capacity_per_instance: usize,
    ) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.to_string(),
            lease_ttl_seconds,
            instancing,
            capacity_per_instance,
            claimed: Mutex::new(ClaimState {
                address: None,
                zones: Vec::new(),
            }),
        }
    }

    fn zone_key(&self, zone: &ZoneId) -> String {
        format!("{}:zone:{}", self.key_prefix, zone)
    }

    fn instances_key(&self, zone: &ZoneId) -> String {
        format!("{}:zone_instances:{}", self.key_prefix, zone)
    }

    fn lease_key(&self, zone: &ZoneId, engine_id: &EngineId) -> String {
        format!("{}:zone_lease:{}:{}", self.key_prefix, zone, engine_id)
    }

    fn claimed_snapshot(&self) -> (Option<EngineAddress>, Vec<ZoneId>) {
        let state = self.claimed.lock().expect("claim state poisoned");
        (state.address.clone(), state.zones.clone())
    }

    async fn live_instances(&self, zone: &ZoneId) -> Result<Vec<ZoneInstance>, RegistryError> {
        let mut redis = self.redis.clone();
        let entries: HashMap<String, String> = redis.hgetall(self.instances_key(zone)).await?;
        let mut live = Vec::new();
        for (engine, json) in entries {
            let engine_id = EngineId(engine);
            let lease_alive: bool = redis.exists(self.lease_key(zone, &engine_id)).await?;
            if !lease_alive {
                continue;
            }
            let instance: ZoneInstance = serde_json::from_str(&json)
                .map_err(|e| RegistryError::Malformed(e.to_string()))?;
            live.push(instance);
        }
        // Deterministic order for selection and tests.
        live.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));
        Ok(live)
    }
}

#[async_trait]
impl ZoneRegistry for RedisZoneRegistry {
    async fn owner_of(&self, zone: &ZoneId) -> Result<Option<EngineAddress>, RegistryError> {
        if self.instancing {
            return Ok(self
                .live_instances(zone)
                .await?
                .first()
                .map(|i| i.address.clone()));
        }
        let mut redis = self.redis.clone();
        let value: Option<String> = redis.get(self.zone_key(zone)).await?;
        value
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| RegistryError::Malformed(e.to_string()))
            })
            .transpose()
    }

    async fn claim_zones(
        &self,
        engine_id: &EngineId,
        address: &EngineAddress,
        zones: &[ZoneId],
    ) -> Result<(), RegistryError> {
        let mut redis = self.redis.clone();
        for zone in zones {
            if self.instancing {
                let instance = ZoneInstance {
                    engine_id: engine_id.clone(),
                    address: address.clone(),
                    zone: zone.clone(),
                    player_count: 0,
                    capacity: self.capacity_per_instance,
                };
                let json = serde_json::to_string(&instance)
                    .map_err(|e| RegistryError::Malformed(e.to_string()))?;
                redis
                    .hset::<_, _, _, ()>(self.instances_key(zone), engine_id.as_str(), json)
                    .await?;
                redis
                    .set_ex::<_, _, ()>(
                        self.lease_key(zone, engine_id),
                        1,
                        self.lease_ttl_seconds,
                    )
                    .await?;
            } else {
                let json = serde_json::to_string(address)
                    .map_err(|e| RegistryError::Malformed(e.to_string()))?;
                redis
                    .set_ex::<_, _, ()>(self.zone_key(zone), json, self.lease_ttl_seconds)
                    .await?;
            }
        }
        let mut state = self.claimed.lock().expect("claim state poisoned");
        state.address = Some(address.clone());
        state.zones = zones.to_vec();
        debug!(%engine_id, zones = zones.len(), "zones claimed");
        Ok(())
    }

    async fn renew_lease(&self, engine_id: &EngineId) -> Result<(), RegistryError> {
        let (_, zones) = self.claimed_snapshot();
        let mut redis = self.redis.clone();
        for zone in &zones {
            let key = if self.instancing {
                self.lease_key(zone, engine_id)
            } else {
                self.zone_key(zone)
            };
            redis
                .expire::<_, ()>(key, self.lease_ttl_seconds as i64)
                .await?;
        }
        Ok(())
    }

    async fn all_assignments(&self) -> Result<HashMap<ZoneId, EngineAddress>, RegistryError> {
        let mut redis = self.redis.clone();
        let mut assignments = HashMap::new();

        if self.instancing {
            let pattern = format!("{}:zone_instances:*", self.key_prefix);
            let keys = scan_keys(&mut redis, &pattern).await?;
            let strip = format!("{}:zone_instances:", self.key_prefix);
            for key in keys {
                let zone = ZoneId(key.trim_start_matches(&strip).to_string());
                if let Some(first) = self.live_instances(&zone).await?.into_iter().next() {
                    assignments.insert(zone, first.address);
                }
            }
            return Ok(assignments);
        }

        let pattern = format!("{}:zone:*", self.key_prefix);
        let keys = scan_keys(&mut redis, &pattern).await?;
        let strip = format!("{}:zone:", self.key_prefix);
        for key in keys {
            let value: Option<String> = redis.get(&key).await?;
            let Some(json) = value else {
                // Lease expired between scan and read.
                continue;
            };
            let address: EngineAddress = serde_json::from_str(&json)
                .map_err(|e| RegistryError::Malformed(e.to_string()))?;
            assignments.insert(ZoneId(key.trim_start_matches(&strip).to_string()), address);
        }
        Ok(assignments)
    }

    async fn is_local(&self, zone: &ZoneId, engine_id: &EngineId) -> Result<bool, RegistryError> {
        if self.instancing {
            return Ok(self
                .live_instances(zone)
                .await?
                .iter()
                .any(|i| &i.engine_id == engine_id));
        }
        Ok(self
            .owner_of(zone)
            .await?
            .is_some_and(|addr| &addr.engine_id == engine_id))
    }

    async fn instances_of(&self, zone: &ZoneId) -> Result<Vec<ZoneInstance>, RegistryError> {
        if self.instancing {
            return self.live_instances(zone).await;
        }
        Ok(self
            .owner_of(zone)
            .await?
            .map(|address| {
                vec![ZoneInstance {
                    engine_id: address.engine_id.clone(),
                    address,
                    zone: zone.clone(),
                    player_count: 0,
                    capacity: 0,
                }]
            })
            .unwrap_or_default())
    }

    async fn report_load(
        &self,
        engine_id: &EngineId,
        zone_counts: &HashMap<ZoneId, usize>,
    ) -> Result<(), RegistryError> {
        if !self.instancing {
            return Ok(());
        }
        let (address, _) = self.claimed_snapshot();
        let Some(address) = address else {
            return Ok(());
        };
        let mut redis = self.redis.clone();
        for (zone, count) in zone_counts {
            let instance = ZoneInstance {
                engine_id: engine_id.clone(),
                address: address.clone(),
                zone: zone.clone(),
                player_count: *count,
                capacity: self.capacity_per_instance,
            };
            let json = serde_json::to_string(&instance)
                .map_err(|e| RegistryError::Malformed(e.to_string()))?;
            redis
                .hset::<_, _, _, ()>(self.instances_key(zone), engine_id.as_str(), json)
                .await?;
        }
        Ok(())
    }

    fn instancing_enabled(&self) -> bool {
        self.instancing
    }
}
