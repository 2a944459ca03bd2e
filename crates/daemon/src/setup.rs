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

//! Cluster wiring: bus, zone registry, assignment snapshots, leases, the
//! player location index and the instancing reporter/scaler tasks.

use ambonmud_cluster::{
    AssignmentsView, InterEngineBus, LocalBus, NullPlayerIndex, PlayerLocationIndex, RedisBus,
    RedisPlayerIndex, RedisZoneRegistry, StaticZoneRegistry, ThresholdScaler, ZoneRegistry,
};
use ambonmud_common::config::{Config, RegistryKind};
use ambonmud_common::ids::{EngineId, ZoneId};
use ambonmud_common::model::EngineAddress;
use ambonmud_kernel::now_ms;
use ambonmud_kernel::world::World;
use eyre::WrapErr;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ClusterHandles {
    pub bus: Arc<dyn InterEngineBus>,
    pub assignments: Arc<AssignmentsView>,
    pub player_index: Arc<dyn PlayerLocationIndex>,
    pub load_tx: Option<flume::Sender<HashMap<ZoneId, usize>>>,
}

pub async fn build(
    config: &Config,
    world: &Arc<World>,
    kill_switch: Arc<AtomicBool>,
) -> eyre::Result<ClusterHandles> {
    let sharding = &config.sharding;
    let engine_id = EngineId(sharding.engine_id.clone());

    if !sharding.enabled {
        let bus = Arc::new(LocalBus::new(
            engine_id,
            config.server.inbound_channel_capacity,
        ));
        bus.start();
        return Ok(ClusterHandles {
            bus,
            assignments: AssignmentsView::empty(),
            player_index: Arc::new(NullPlayerIndex),
            load_tx: None,
        });
    }

    let bus: Arc<dyn InterEngineBus> = match &sharding.redis_url {
        Some(url) => Arc::new(RedisBus::new(
            engine_id.clone(),
            &sharding.key_prefix,
            url,
            config.server.inbound_channel_capacity,
            kill_switch.clone(),
        )),
        None => {
            warn!("sharding enabled without redis_url; inter-engine bus is process-local");
            Arc::new(LocalBus::new(
                engine_id.clone(),
                config.server.inbound_channel_capacity,
            ))
        }
    };
    bus.start();

    let registry: Arc<dyn ZoneRegistry> = match sharding.registry.kind {
        RegistryKind::Static => {
            let entries = sharding.registry.assignments.iter().map(|a| {
                (
                    EngineAddress {
                        engine_id: EngineId(a.engine_id.clone()),
                        host: a.host.clone(),
                        port: a.port,
                    },
                    a.zones.iter().map(|z| ZoneId(z.clone())).collect(),
                )
            });
            Arc::new(StaticZoneRegistry::build(entries).wrap_err("building static zone registry")?)
        }
        RegistryKind::Redis => {
            let url = sharding
                .redis_url
                .as_deref()
                .expect("validated: redis registry requires redis_url");
            let client = redis::Client::open(url).wrap_err("opening redis for zone registry")?;
            let manager = client
                .get_connection_manager()
                .await
                .wrap_err("connecting to redis for zone registry")?;
            Arc::new(RedisZoneRegistry::new(
                manager,
                &sharding.key_prefix,
                sharding.registry.lease_ttl_seconds,
                sharding.instancing.enabled,
                sharding.instancing.capacity_per_instance,
            ))
        }
    };

    let address = EngineAddress {
        engine_id: engine_id.clone(),
        host: sharding.advertise_host.clone(),
        port: sharding.advertise_port.unwrap_or(config.server.telnet_port),
    };
    let zones = sharding.zone_ids();
    registry
        .claim_zones(&engine_id, &address, &zones)
        .await
        .wrap_err("claiming zones")?;
    info!(%engine_id, zones = zones.len(), "zones claimed");

    let assignments = AssignmentsView::empty();
    assignments.store(
        registry
            .all_assignments()
            .await
            .wrap_err("reading initial zone assignments")?,
        HashMap::new(),
    );
    let refresh_period = Duration::from_secs(sharding.registry.lease_ttl_seconds.max(3) / 3);
    tokio::spawn(assignments.clone().refresh_loop(
        registry.clone(),
        world.zones().into_iter().collect(),
        refresh_period,
        kill_switch.clone(),
    ));

    if sharding.registry.kind == RegistryKind::Redis {
        let registry = registry.clone();
        let renew_engine = engine_id.clone();
        let renew_kill = kill_switch.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if renew_kill.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = registry.renew_lease(&renew_engine).await {
                    warn!(error = %e, "lease renewal failed");
                }
            }
        });
    }

    let player_index: Arc<dyn PlayerLocationIndex> = if sharding.player_index.enabled {
        let url = sharding
            .redis_url
            .as_deref()
            .expect("validated: player index requires redis_url");
        let index = RedisPlayerIndex::connect(
            engine_id.clone(),
            &sharding.key_prefix,
            url,
            sharding.player_index.ttl_seconds,
            kill_switch.clone(),
        )
        .await
        .wrap_err("connecting player location index")?;
        index.start_heartbeat(sharding.player_index.heartbeat_ms, kill_switch.clone());
        index
    } else {
        Arc::new(NullPlayerIndex)
    };

    let load_tx = if sharding.instancing.enabled {
        let (load_tx, load_rx) = flume::unbounded::<HashMap<ZoneId, usize>>();
        spawn_load_reporter(registry.clone(), engine_id.clone(), load_rx, kill_switch.clone());
        spawn_scaler(config, registry, world.zones().into_iter().collect(), kill_switch).await;
        Some(load_tx)
    } else {
        None
    };

    Ok(ClusterHandles {
        bus,
        assignments,
        player_index,
        load_tx,
    })
}

fn spawn_load_reporter(
    registry: Arc<dyn ZoneRegistry>,
    engine_id: EngineId,
    load_rx: flume::Receiver<HashMap<ZoneId, usize>>,
    kill_switch: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Ok(counts) = load_rx.recv_async().await {
            if kill_switch.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = registry.report_load(&engine_id, &counts).await {
                warn!(error = %e, "load report failed");
            }
        }
    });
}

/// Advisory scaler: evaluates every known zone on a fixed period and
/// publishes decisions for an external operator. Never spawns processes.
async fn spawn_scaler(
    config: &Config,
    registry: Arc<dyn ZoneRegistry>,
    zones: Vec<ZoneId>,
    kill_switch: Arc<AtomicBool>,
) {
    let instancing = config.sharding.instancing.clone();
    let key_prefix = config.sharding.key_prefix.clone();
    let publisher = match &config.sharding.redis_url {
        Some(url) => match redis::Client::open(url.as_str()) {
            Ok(client) => client.get_connection_manager().await.ok(),
            Err(_) => None,
        },
        None => None,
    };

    tokio::spawn(async move {
        let mut scaler = ThresholdScaler::new(
            instancing.scale_up_threshold,
            instancing.scale_down_threshold,
            instancing.min_instances,
            instancing.cooldown_ms,
        );
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if kill_switch.load(Ordering::Relaxed) {
                break;
            }
            for zone in &zones {
                let instances = match registry.instances_of(zone).await {
                    Ok(instances) => instances,
                    Err(e) => {
                        warn!(%zone, error = %e, "scaler could not read instances");
                        continue;
                    }
                };
                let Some(decision) = scaler.evaluate(zone, &instances, now_ms()) else {
                    continue;
                };
                info!(?decision, "scaling decision");
                let Some(mut conn) = publisher.clone() else {
                    continue;
                };
                let Ok(payload) = serde_json::to_string(&decision) else {
                    continue;
                };
                let channel = format!("{key_prefix}:scaling");
                let published: redis::RedisResult<()> = redis::cmd("PUBLISH")
                    .arg(&channel)
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = published {
                    warn!(error = %e, "scaling decision publish failed");
                }
            }
        }
    });
}
