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

//! Player location index: name → owning engine, for O(1) cross-engine
//! routing of tells and transfers. Writes are fire-and-forget through an
//! internal op queue so the engine thread never blocks on Redis; unregister
//! and TTL refresh are conditional on this engine still owning the entry,
//! which keeps a losing handoff race from evicting the new owner.

use ambonmud_common::ids::EngineId;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait PlayerLocationIndex: Send + Sync {
    /// Record this engine as the owner of `player_name`. Fire-and-forget.
    fn register(&self, player_name: &str);

    /// Conditional delete: only removes the entry if it still points at this
    /// engine.
    fn unregister(&self, player_name: &str);

    /// Which engine hosts this player, if any. May suspend on I/O; never
    /// called from the engine loop directly.
    async fn lookup_engine_id(&self, player_name: &str) -> Option<EngineId>;

    /// Extend the TTL on every name this engine has registered.
    fn refresh_ttls(&self);
}

/// Index used when sharding or the player index is disabled.
pub struct NullPlayerIndex;

#[async_trait]
impl PlayerLocationIndex for NullPlayerIndex {
    fn register(&self, _player_name: &str) {}
    fn unregister(&self, _player_name: &str) {}
    async fn lookup_engine_id(&self, _player_name: &str) -> Option<EngineId> {
        None
    }
    fn refresh_ttls(&self) {}
}

enum IndexOp {
    Register(String),
    Unregister(String),
    RefreshAll,
}

/// Delete only when the stored owner is still us.
const UNREGISTER_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Extend the TTL only when the stored owner is still us.
const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

pub struct RedisPlayerIndex {
    key_prefix: String,
    redis: ConnectionManager,
    ops_tx: flume::Sender<IndexOp>,
}

impl RedisPlayerIndex {
    /// Connects and spawns the op worker. The heartbeat that drives TTL
    /// refresh is started separately so its cadence stays configurable.
    pub async fn connect(
        engine_id: EngineId,
        key_prefix: &str,
        redis_url: &str,
        ttl_seconds: u64,
        kill_switch: Arc<AtomicBool>,
    ) -> Result<Arc<Self>, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let redis = client.get_connection_manager().await?;
        let (ops_tx, ops_rx) = flume::unbounded();
        let index = Arc::new(Self {
            key_prefix: key_prefix.to_string(),
            redis: redis.clone(),
            ops_tx,
        });
        tokio::spawn(Self::worker_loop(
            engine_id,
            index.key_prefix.clone(),
            redis,
            ttl_seconds,
            ops_rx,
            kill_switch,
        ));
        Ok(index)
    }

    pub fn start_heartbeat(
        self: &Arc<Self>,
        heartbeat_ms: u64,
        kill_switch: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let index = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if kill_switch.load(Ordering::Relaxed) {
                    break;
                }
                index.refresh_ttls();
            }
        })
    }

    fn name_key(key_prefix: &str, name_lower: &str) -> String {
        format!("{key_prefix}:player_loc:{name_lower}")
    }

    async fn worker_loop(
        engine_id: EngineId,
        key_prefix: String,
        mut redis: ConnectionManager,
        ttl_seconds: u64,
        ops: flume::Receiver<IndexOp>,
        kill_switch: Arc<AtomicBool>,
    ) {
        let unregister = redis::Script::new(UNREGISTER_SCRIPT);
        let refresh = redis::Script::new(REFRESH_SCRIPT);
        // Names this engine believes it owns, for RefreshAll.
        let mut registered: HashSet<String> = HashSet::new();

        while let Ok(op) = ops.recv_async().await {
            if kill_switch.load(Ordering::Relaxed) {
                break;
            }
            match op {
                IndexOp::Register(name) => {
                    let key = Self::name_key(&key_prefix, &name);
                    if let Err(e) = redis
                        .set_ex::<_, _, ()>(&key, engine_id.as_str(), ttl_seconds)
                        .await
                    {
                        warn!(name, error = %e, "player index register failed");
                        continue;
                    }
                    registered.insert(name);
                }
                IndexOp::Unregister(name) => {
                    let key = Self::name_key(&key_prefix, &name);
                    let result: Result<i64, _> = unregister
                        .key(&key)
                        .arg(engine_id.as_str())
                        .invoke_async(&mut redis)
                        .await;
                    if let Err(e) = result {
                        warn!(name, error = %e, "player index unregister failed");
                    }
                    registered.remove(&name);
                }
                IndexOp::RefreshAll => {
                    let names: Vec<String> = registered.iter().cloned().collect();
                    for name in names {
                        let key = Self::name_key(&key_prefix, &name);
                        let result: Result<i64, _> = refresh
                            .key(&key)
                            .arg(engine_id.as_str())
                            .arg(ttl_seconds)
                            .invoke_async(&mut redis)
                            .await;
                        match result {
                            // Somebody else owns the name now; stop tracking it.
                            Ok(0) => {
                                registered.remove(&name);
                            }
                            Ok(_) => {}
                            Err(e) => warn!(name, error = %e, "player index refresh failed"),
                        }
                    }
                }
            }
        }
        debug!("player index worker stopped");
    }
}

#[async_trait]
impl PlayerLocationIndex for RedisPlayerIndex {
    fn register(&self, player_name: &str) {
        let _ = self
            .ops_tx
            .send(IndexOp::Register(player_name.to_lowercase()));
    }

    fn unregister(&self, player_name: &str) {
        let _ = self
            .ops_tx
            .send(IndexOp::Unregister(player_name.to_lowercase()));
    }

    async fn lookup_engine_id(&self, player_name: &str) -> Option<EngineId> {
        let key = Self::name_key(&self.key_prefix, &player_name.to_lowercase());
        let mut redis = self.redis.clone();
        match redis.get::<_, Option<String>>(&key).await {
            Ok(engine) => engine.map(EngineId),
            Err(e) => {
                warn!(player_name, error = %e, "player index lookup failed");
                None
            }
        }
    }

    fn refresh_ttls(&self) {
        let _ = self.ops_tx.send(IndexOp::RefreshAll);
    }
}
