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

//! Zone ownership. The registry trait is async because the lease-backed
//! implementation talks to Redis; the engine loop itself never calls it.
//! Instead it reads an `AssignmentsView` snapshot that a background task
//! refreshes, so ownership checks on the hot path are a map lookup.

use crate::instancing::select_instance;
use ambonmud_common::ids::{EngineId, ZoneId};
use ambonmud_common::model::EngineAddress;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("zone `{0}` is already owned by engine `{1}`")]
    DuplicateZone(ZoneId, EngineId),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed registry entry: {0}")]
    Malformed(String),
}

/// One engine's presence in a zone, in instancing mode.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ZoneInstance {
    pub engine_id: EngineId,
    pub address: EngineAddress,
    pub zone: ZoneId,
    pub player_count: usize,
    pub capacity: usize,
}

#[async_trait]
pub trait ZoneRegistry: Send + Sync {
    async fn owner_of(&self, zone: &ZoneId) -> Result<Option<EngineAddress>, RegistryError>;

    async fn claim_zones(
        &self,
        engine_id: &EngineId,
        address: &EngineAddress,
        zones: &[ZoneId],
    ) -> Result<(), RegistryError>;

    async fn renew_lease(&self, engine_id: &EngineId) -> Result<(), RegistryError>;

    async fn all_assignments(&self) -> Result<HashMap<ZoneId, EngineAddress>, RegistryError>;

    async fn is_local(&self, zone: &ZoneId, engine_id: &EngineId) -> Result<bool, RegistryError> {
        Ok(self
            .owner_of(zone)
            .await?
            .is_some_and(|addr| &addr.engine_id == engine_id))
    }

    /// All live instances of a zone. Non-instancing registries return the
    /// single owner, if any.
    async fn instances_of(&self, zone: &ZoneId) -> Result<Vec<ZoneInstance>, RegistryError> {
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
        _engine_id: &EngineId,
        _zone_counts: &HashMap<ZoneId, usize>,
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    fn instancing_enabled(&self) -> bool {
        false
    }
}

/// Static registry built once from configuration. Claims and lease renewals
/// are no-ops; duplicate zone assignments are a startup error.
pub struct StaticZoneRegistry {
    assignments: HashMap<ZoneId, EngineAddress>,
}

impl StaticZoneRegistry {
    pub fn build(
        entries: impl IntoIterator<Item = (EngineAddress, Vec<ZoneId>)>,
    ) -> Result<Self, RegistryError> {
        let mut assignments: HashMap<ZoneId, EngineAddress> = HashMap::new();
        for (address, zones) in entries {
            for zone in zones {
                if let Some(existing) = assignments.get(&zone) {
                    let owner = existing.engine_id.clone();
                    return Err(RegistryError::DuplicateZone(zone, owner));
                }
                assignments.insert(zone, address.clone());
            }
        }
        Ok(Self { assignments })
    }
}

#[async_trait]
impl ZoneRegistry for StaticZoneRegistry {
    async fn owner_of(&self, zone: &ZoneId) -> Result<Option<EngineAddress>, RegistryError> {
        Ok(self.assignments.get(zone).cloned())
    }

    async fn claim_zones(
        &self,
        _engine_id: &EngineId,
        _address: &EngineAddress,
        _zones: &[ZoneId],
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn renew_lease(&self, _engine_id: &EngineId) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn all_assignments(&self) -> Result<HashMap<ZoneId, EngineAddress>, RegistryError> {
        Ok(self.assignments.clone())
    }
}

/// Hot-path snapshot of zone ownership. The engine reads it synchronously;
/// a refresher task swaps in fresh maps pulled from the registry.
pub struct AssignmentsView {
    assignments: ArcSwap<HashMap<ZoneId, EngineAddress>>,
    instances: ArcSwap<HashMap<ZoneId, Vec<ZoneInstance>>>,
}

impl AssignmentsView {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            assignments: ArcSwap::from_pointee(HashMap::new()),
            instances: ArcSwap::from_pointee(HashMap::new()),
        })
    }

    pub fn owner_of(&self, zone: &ZoneId) -> Option<EngineAddress> {
        self.assignments.load().get(zone).cloned()
    }

    pub fn is_local(&self, zone: &ZoneId, engine_id: &EngineId) -> bool {
        self.owner_of(zone)
            .is_some_and(|addr| &addr.engine_id == engine_id)
    }

    /// Picks an instance for a player entering `zone`, honoring group and
    /// sticky hints. Falls back to plain ownership when not instancing.
    pub fn select_for(
        &self,
        zone: &ZoneId,
        group_hint: Option<&EngineId>,
        sticky_hint: Option<&EngineId>,
    ) -> Option<EngineAddress> {
        let instances = self.instances.load();
        match instances.get(zone) {
            Some(list) if !list.is_empty() => {
                select_instance(list, group_hint, sticky_hint).map(|i| i.address.clone())
            }
            _ => self.owner_of(zone),
        }
    }

    pub fn store(
        &self,
        assignments: HashMap<ZoneId, EngineAddress>,
        instances: HashMap<ZoneId, Vec<ZoneInstance>>,
    ) {
        self.assignments.store(Arc::new(assignments));
        self.instances.store(Arc::new(instances));
    }

    /// Periodically refreshes the snapshot from the registry until the kill
    /// switch flips.
    pub async fn refresh_loop(
        self: Arc<Self>,
        registry: Arc<dyn ZoneRegistry>,
        zones_of_interest: Vec<ZoneId>,
        period: Duration,
        kill_switch: Arc<AtomicBool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if kill_switch.load(Ordering::Relaxed) {
                break;
            }
            match registry.all_assignments().await {
                Ok(assignments) => {
                    let mut instances = HashMap::new();
                    if registry.instancing_enabled() {
                        for zone in &zones_of_interest {
                            match registry.instances_of(zone).await {
                                Ok(list) => {
                                    instances.insert(zone.clone(), list);
                                }
                                Err(e) => {
                                    warn!(%zone, error = %e, "instance refresh failed")
                                }
                            }
                        }
                    }
                    self.store(assignments, instances);
                }
                Err(e) => warn!(error = %e, "zone assignment refresh failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(engine: &str, port: u16) -> EngineAddress {
        EngineAddress {
            engine_id: EngineId::from(engine),
            host: "10.0.0.1".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn static_registry_resolves_owners() {
        let registry = StaticZoneRegistry::build([
            (addr("engine-a", 4000), vec![ZoneId::from("zone1")]),
            (addr("engine-b", 4001), vec![ZoneId::from("zone2")]),
        ])
        .unwrap();

        let owner = registry.owner_of(&ZoneId::from("zone2")).await.unwrap();
        assert_eq!(owner.unwrap().engine_id, EngineId::from("engine-b"));
        assert!(registry
            .is_local(&ZoneId::from("zone1"), &EngineId::from("engine-a"))
            .await
            .unwrap());
        assert!(registry
            .owner_of(&ZoneId::from("zone3"))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_static_zone_is_an_error() {
        let result = StaticZoneRegistry::build([
            (addr("engine-a", 4000), vec![ZoneId::from("zone1")]),
            (addr("engine-b", 4001), vec![ZoneId::from("zone1")]),
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateZone(..))));
    }

    #[test]
    fn view_snapshot_reads() {
        let view = AssignmentsView::empty();
        assert!(view.owner_of(&ZoneId::from("zone1")).is_none());
        view.store(
            HashMap::from([(ZoneId::from("zone1"), addr("engine-a", 4000))]),
            HashMap::new(),
        );
        assert!(view.is_local(&ZoneId::from("zone1"), &EngineId::from("engine-a")));
        assert!(!view.is_local(&ZoneId::from("zone1"), &EngineId::from("engine-b")));
    }
}
