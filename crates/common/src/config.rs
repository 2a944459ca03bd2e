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

//! Configuration surface. One layered document: serialized defaults, merged
//! with a YAML file, overridden by `AMBONMUD_<SECTION>_<KEY>` environment
//! variables. The document carries no logic; validation is a standalone pass
//! that fails startup with a precise dotted path.

use crate::ids::ZoneId;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration at `{path}`: {problem}")]
    Invalid { path: String, problem: String },
}

fn invalid(path: &str, problem: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_string(),
        problem: problem.into(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub world: WorldConfig,
    pub persistence: PersistenceConfig,
    pub login: LoginConfig,
    pub engine: EngineConfig,
    pub transport: TransportConfig,
    /// Split-topology only; parsed and validated but unused when the hosts
    /// run in-process.
    pub grpc: Option<GrpcConfig>,
    pub sharding: ShardingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            world: WorldConfig::default(),
            persistence: PersistenceConfig::default(),
            login: LoginConfig::default(),
            engine: EngineConfig::default(),
            transport: TransportConfig::default(),
            grpc: None,
            sharding: ShardingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub telnet_port: u16,
    pub web_port: u16,
    pub inbound_channel_capacity: usize,
    pub outbound_channel_capacity: usize,
    pub session_outbound_queue_capacity: usize,
    pub max_inbound_events_per_tick: usize,
    pub tick_millis: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            telnet_port: 4000,
            web_port: 8080,
            inbound_channel_capacity: 1024,
            outbound_channel_capacity: 1024,
            session_outbound_queue_capacity: 64,
            max_inbound_events_per_tick: 128,
            tick_millis: 100,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// World content files, loaded in order at startup.
    pub resources: Vec<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    File,
    Relational,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    pub root_dir: PathBuf,
    /// Connection URL for the relational backend.
    pub url: Option<String>,
    pub worker: PersistenceWorkerConfig,
    pub cache: CacheConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::File,
            root_dir: PathBuf::from("data/players"),
            url: None,
            worker: PersistenceWorkerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceWorkerConfig {
    pub flush_interval_ms: u64,
}

impl Default for PersistenceWorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Redis URL; falls back to `sharding.redis_url` when unset.
    pub url: Option<String>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub max_wrong_password_retries: u32,
    pub max_failed_attempts_before_disconnect: u32,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_wrong_password_retries: 3,
            max_failed_attempts_before_disconnect: 10,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mob: MobConfig,
    pub combat: CombatConfig,
    pub regen: RegenConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobConfig {
    pub wander_tick_millis: u64,
    pub max_moves_per_tick: usize,
    pub wander_chance_percent: u32,
}

impl Default for MobConfig {
    fn default() -> Self {
        Self {
            wander_tick_millis: 4_000,
            max_moves_per_tick: 16,
            wander_chance_percent: 25,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub tick_millis: u64,
    pub max_combats_per_tick: usize,
    pub base_damage: i32,
    pub dex_dodge_per_point: f64,
    pub max_dodge_percent: f64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            tick_millis: 2_000,
            max_combats_per_tick: 32,
            base_damage: 4,
            dex_dodge_per_point: 1.5,
            max_dodge_percent: 40.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenConfig {
    pub base_interval_ms: u64,
    pub min_interval_ms: u64,
    pub ms_per_stat: u64,
    pub hp_per_tick: i32,
    pub mana_per_tick: i32,
    pub max_players_per_tick: usize,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 10_000,
            min_interval_ms: 2_000,
            ms_per_stat: 300,
            hp_per_tick: 2,
            mana_per_tick: 2,
            max_players_per_tick: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_actions_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_actions_per_tick: 256,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub telnet: TelnetTransportConfig,
    pub max_inbound_backpressure_failures: MaxBackpressureFailures,
    pub websocket: WebsocketTransportConfig,
}

/// Newtype so `#[serde(default)]` on the parent picks a sane nonzero value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxBackpressureFailures(pub u32);

impl Default for MaxBackpressureFailures {
    fn default() -> Self {
        Self(3)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelnetTransportConfig {
    pub max_line_len: usize,
    pub max_non_printable_per_line: usize,
}

impl Default for TelnetTransportConfig {
    fn default() -> Self {
        Self {
            max_line_len: 512,
            max_non_printable_per_line: 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketTransportConfig {
    pub host: String,
    pub stop_grace_millis: u64,
    pub stop_timeout_millis: u64,
}

impl Default for WebsocketTransportConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            stop_grace_millis: 250,
            stop_timeout_millis: 2_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrpcConfig {
    pub server: GrpcServerConfig,
    pub client: GrpcClientConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrpcServerConfig {
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrpcClientConfig {
    pub engine_host: String,
    pub engine_port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Static,
    Redis,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticAssignment {
    pub engine_id: String,
    pub host: String,
    pub port: u16,
    pub zones: Vec<String>,
}

impl Default for StaticAssignment {
    fn default() -> Self {
        Self {
            engine_id: String::new(),
            host: "127.0.0.1".to_string(),
            port: 0,
            zones: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    #[serde(rename = "type")]
    pub kind: RegistryKind,
    pub lease_ttl_seconds: u64,
    pub assignments: Vec<StaticAssignment>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Static,
            lease_ttl_seconds: 30,
            assignments: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub ack_timeout_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerIndexConfig {
    pub enabled: bool,
    pub heartbeat_ms: u64,
    pub ttl_seconds: u64,
}

impl Default for PlayerIndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_ms: 10_000,
            ttl_seconds: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancingConfig {
    pub enabled: bool,
    pub capacity_per_instance: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub min_instances: usize,
    pub cooldown_ms: u64,
}

impl Default for InstancingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity_per_instance: 50,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            min_instances: 1,
            cooldown_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub enabled: bool,
    pub engine_id: String,
    /// Zones this engine claims at startup.
    pub zones: Vec<String>,
    pub registry: RegistryConfig,
    pub handoff: HandoffConfig,
    pub advertise_host: String,
    pub advertise_port: Option<u16>,
    pub player_index: PlayerIndexConfig,
    pub instancing: InstancingConfig,
    /// Redis connection URL for the bus, lease registry, player index and
    /// the optional persistence cache.
    pub redis_url: Option<String>,
    /// Key prefix on every Redis key and channel this cluster touches.
    pub key_prefix: String,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            engine_id: "engine-1".to_string(),
            zones: Vec::new(),
            registry: RegistryConfig::default(),
            handoff: HandoffConfig::default(),
            advertise_host: "127.0.0.1".to_string(),
            advertise_port: None,
            player_index: PlayerIndexConfig::default(),
            instancing: InstancingConfig::default(),
            redis_url: None,
            key_prefix: "ambonmud".to_string(),
        }
    }
}

impl ShardingConfig {
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.zones.iter().map(|z| ZoneId(z.clone())).collect()
    }
}

/// Environment variables use the convention `AMBONMUD_<SECTION>_<KEY>`:
/// lowercased, with the section separator becoming a dot. Sections with
/// nested tables are expanded here, longest prefix first, so that underscores
/// inside leaf keys survive.
const NESTED_SECTIONS: &[&str] = &[
    "persistence_worker",
    "persistence_cache",
    "engine_mob",
    "engine_combat",
    "engine_regen",
    "engine_scheduler",
    "transport_telnet",
    "transport_websocket",
    "grpc_server",
    "grpc_client",
    "sharding_registry",
    "sharding_handoff",
    "sharding_player_index",
    "sharding_instancing",
];

const SECTIONS: &[&str] = &[
    "server",
    "world",
    "persistence",
    "login",
    "engine",
    "transport",
    "grpc",
    "sharding",
];

pub(crate) fn env_key_to_path(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for prefix in NESTED_SECTIONS {
        if let Some(rest) = key.strip_prefix(&format!("{prefix}_")) {
            return format!("{}.{}", prefix.replace('_', "."), rest);
        }
    }
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(&format!("{section}_")) {
            return format!("{section}.{rest}");
        }
    }
    key
}

/// Loads and validates the full configuration document.
pub fn load(config_file: Option<&Path>) -> Result<Config, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Yaml::file(path));
    }
    figment = figment.merge(
        Env::prefixed("AMBONMUD_")
            .map(|key| env_key_to_path(key.as_str()).into())
            .split("."),
    );
    let config: Config = figment.extract().map_err(Box::new)?;
    validate(&config)?;
    Ok(config)
}

/// Startup validation. Failures are fatal and name the offending dotted path.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let s = &config.server;
    if s.tick_millis == 0 {
        return Err(invalid("server.tick_millis", "must be > 0"));
    }
    if s.inbound_channel_capacity == 0 {
        return Err(invalid("server.inbound_channel_capacity", "must be > 0"));
    }
    if s.outbound_channel_capacity == 0 {
        return Err(invalid("server.outbound_channel_capacity", "must be > 0"));
    }
    if s.session_outbound_queue_capacity == 0 {
        return Err(invalid(
            "server.session_outbound_queue_capacity",
            "must be > 0",
        ));
    }
    if s.max_inbound_events_per_tick == 0 {
        return Err(invalid("server.max_inbound_events_per_tick", "must be > 0"));
    }

    if config.world.resources.is_empty() {
        return Err(invalid("world.resources", "at least one world file"));
    }

    let p = &config.persistence;
    if p.worker.flush_interval_ms == 0 {
        return Err(invalid("persistence.worker.flush_interval_ms", "must be > 0"));
    }
    if p.backend == PersistenceBackend::Relational && p.url.is_none() {
        return Err(invalid(
            "persistence.url",
            "required for the relational backend",
        ));
    }
    if p.cache.enabled && p.cache.url.is_none() && config.sharding.redis_url.is_none() {
        return Err(invalid(
            "persistence.cache.url",
            "required when the cache is enabled and sharding.redis_url is unset",
        ));
    }

    let t = &config.transport.telnet;
    if t.max_line_len == 0 {
        return Err(invalid("transport.telnet.max_line_len", "must be > 0"));
    }
    if config.transport.max_inbound_backpressure_failures.0 == 0 {
        return Err(invalid(
            "transport.max_inbound_backpressure_failures",
            "must be > 0",
        ));
    }

    if let Some(grpc) = &config.grpc {
        if grpc.server.port == 0 {
            return Err(invalid("grpc.server.port", "must be > 0"));
        }
        if grpc.client.engine_host.is_empty() {
            return Err(invalid("grpc.client.engine_host", "must not be empty"));
        }
    }

    let sh = &config.sharding;
    if sh.enabled {
        if sh.engine_id.is_empty() {
            return Err(invalid("sharding.engine_id", "must not be empty"));
        }
        if sh.zones.is_empty() {
            return Err(invalid("sharding.zones", "must claim at least one zone"));
        }
        match sh.registry.kind {
            RegistryKind::Static => {
                if sh.registry.assignments.is_empty() {
                    return Err(invalid(
                        "sharding.registry.assignments",
                        "required for the static registry",
                    ));
                }
                // Duplicate zone ownership is a startup error in static mode.
                let mut seen = BTreeSet::new();
                for assignment in &sh.registry.assignments {
                    for zone in &assignment.zones {
                        if !seen.insert(zone.clone()) {
                            return Err(invalid(
                                "sharding.registry.assignments",
                                format!("zone `{zone}` assigned to more than one engine"),
                            ));
                        }
                    }
                }
            }
            RegistryKind::Redis => {
                if sh.redis_url.is_none() {
                    return Err(invalid(
                        "sharding.redis_url",
                        "required for the redis registry",
                    ));
                }
                if sh.registry.lease_ttl_seconds == 0 {
                    return Err(invalid("sharding.registry.lease_ttl_seconds", "must be > 0"));
                }
            }
        }
        if sh.handoff.ack_timeout_ms == 0 {
            return Err(invalid("sharding.handoff.ack_timeout_ms", "must be > 0"));
        }
        if sh.player_index.enabled {
            if sh.redis_url.is_none() {
                return Err(invalid(
                    "sharding.redis_url",
                    "required for the player location index",
                ));
            }
            // The heartbeat must come in under the TTL or entries flap.
            if sh.player_index.heartbeat_ms / 1_000 >= sh.player_index.ttl_seconds {
                return Err(invalid(
                    "sharding.player_index.heartbeat_ms",
                    "heartbeat cadence must be shorter than the TTL",
                ));
            }
        }
        if sh.instancing.enabled {
            if sh.instancing.capacity_per_instance == 0 {
                return Err(invalid(
                    "sharding.instancing.capacity_per_instance",
                    "must be > 0",
                ));
            }
            if sh.instancing.scale_down_threshold >= sh.instancing.scale_up_threshold {
                return Err(invalid(
                    "sharding.instancing.scale_down_threshold",
                    "must be below scale_up_threshold",
                ));
            }
            if sh.instancing.min_instances == 0 {
                return Err(invalid("sharding.instancing.min_instances", "must be > 0"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            world: WorldConfig {
                resources: vec![PathBuf::from("world/midgaard.yaml")],
            },
            ..Config::default()
        }
    }

    #[test]
    fn env_key_mapping() {
        assert_eq!(env_key_to_path("SERVER_TICK_MILLIS"), "server.tick_millis");
        assert_eq!(
            env_key_to_path("PERSISTENCE_WORKER_FLUSH_INTERVAL_MS"),
            "persistence.worker.flush_interval_ms"
        );
        assert_eq!(
            env_key_to_path("SHARDING_PLAYER_INDEX_HEARTBEAT_MS"),
            "sharding.player_index.heartbeat_ms"
        );
        assert_eq!(env_key_to_path("SHARDING_ENABLED"), "sharding.enabled");
        assert_eq!(
            env_key_to_path("ENGINE_COMBAT_TICK_MILLIS"),
            "engine.combat.tick_millis"
        );
    }

    #[test]
    fn defaults_validate_with_a_world() {
        validate(&valid_config()).unwrap();
    }

    #[test]
    fn empty_world_is_fatal() {
        let err = validate(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("world.resources"));
    }

    #[test]
    fn relational_backend_requires_url() {
        let mut config = valid_config();
        config.persistence.backend = PersistenceBackend::Relational;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("persistence.url"));
    }

    #[test]
    fn duplicate_static_zone_is_fatal() {
        let mut config = valid_config();
        config.sharding.enabled = true;
        config.sharding.zones = vec!["midgaard".into()];
        config.sharding.registry.assignments = vec![
            StaticAssignment {
                engine_id: "engine-1".into(),
                host: "10.0.0.1".into(),
                port: 4000,
                zones: vec!["midgaard".into()],
            },
            StaticAssignment {
                engine_id: "engine-2".into(),
                host: "10.0.0.2".into(),
                port: 4000,
                zones: vec!["midgaard".into()],
            },
        ];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("assigned to more than one engine"));
    }

    #[test]
    fn heartbeat_must_undercut_ttl() {
        let mut config = valid_config();
        config.sharding.enabled = true;
        config.sharding.zones = vec!["midgaard".into()];
        config.sharding.redis_url = Some("redis://localhost".into());
        config.sharding.registry.kind = RegistryKind::Redis;
        config.sharding.player_index.enabled = true;
        config.sharding.player_index.heartbeat_ms = 60_000;
        config.sharding.player_index.ttl_seconds = 30;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("player_index.heartbeat_ms"));
    }

    #[test]
    fn yaml_then_env_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  telnet_port: 5555\nworld:\n  resources: [world/midgaard.yaml]"
        )
        .unwrap();
        // Env overlay wins over the file layer.
        figment::Jail::expect_with(|jail| {
            jail.set_env("AMBONMUD_SERVER_TICK_MILLIS", "50");
            let config = load(Some(file.path())).expect("load");
            assert_eq!(config.server.telnet_port, 5555);
            assert_eq!(config.server.tick_millis, 50);
            Ok(())
        });
    }
}
