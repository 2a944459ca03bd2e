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

use crate::args::Args;
use ambonmud_common::config::{self, PersistenceBackend};
use ambonmud_common::ids::EngineId;
use ambonmud_common::tracing::init_tracing;
use ambonmud_common::InboundBus;
use ambonmud_db::{
    CachedRepository, FilePlayerRepository, PgPlayerRepository, PlayerRepository, WriteBehind,
    WriteBehindWorker,
};
use ambonmud_kernel::engine::{Engine, EngineDeps};
use ambonmud_kernel::router::CommandRouter;
use ambonmud_kernel::world::World;
use ambonmud_session::OutboundRouter;
use ambonmud_telnet_host::TelnetHost;
use ambonmud_web_host::{WebHost, WebHostState};
use clap::Parser;
use eyre::WrapErr;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

mod args;
mod setup;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing(args.debug)?;

    let config = config::load(args.config.as_deref()).wrap_err("loading configuration")?;
    let world = Arc::new(World::load(&config.world.resources).wrap_err("loading world")?);
    let kill_switch = Arc::new(AtomicBool::new(false));

    // Persistence stack: backend, optional L2 cache, write-behind on top.
    let mut repo: Arc<dyn PlayerRepository> = match config.persistence.backend {
        PersistenceBackend::File => Arc::new(
            FilePlayerRepository::open(&config.persistence.root_dir)
                .await
                .wrap_err("opening player directory")?,
        ),
        PersistenceBackend::Relational => {
            let url = config
                .persistence
                .url
                .as_deref()
                .expect("validated: relational backend requires persistence.url");
            Arc::new(
                PgPlayerRepository::connect(url)
                    .await
                    .wrap_err("connecting player database")?,
            )
        }
    };
    if config.persistence.cache.enabled {
        let cache_url = config
            .persistence
            .cache
            .url
            .clone()
            .or_else(|| config.sharding.redis_url.clone())
            .expect("validated: cache requires a redis url");
        let client = redis::Client::open(cache_url.as_str()).wrap_err("opening cache redis")?;
        let manager = client
            .get_connection_manager()
            .await
            .wrap_err("connecting cache redis")?;
        repo = Arc::new(CachedRepository::new(
            repo,
            manager,
            &config.sharding.key_prefix,
            config.persistence.cache.ttl_seconds,
        ));
        info!("player read cache enabled");
    }
    let db = WriteBehind::new(repo);
    let flush_worker = WriteBehindWorker::new(
        db.clone(),
        config.persistence.worker.flush_interval_ms,
        kill_switch.clone(),
    )
    .spawn();

    // Outbound router.
    let (router_handle, router_join) = OutboundRouter::start(
        config.server.outbound_channel_capacity,
        kill_switch.clone(),
    );

    // Cluster fabric (loopback + static when sharding is off).
    let cluster = setup::build(&config, &world, kill_switch.clone())
        .await
        .wrap_err("building cluster fabric")?;

    // Engine.
    let engine_id = EngineId(config.sharding.engine_id.clone());
    let (inbound_tx, inbound_bus) = InboundBus::new(config.server.inbound_channel_capacity);
    let (engine, auth_worker) = Engine::new(EngineDeps {
        config: config.clone(),
        world: world.clone(),
        router: router_handle.clone(),
        db: db.clone(),
        bus: cluster.bus.clone(),
        assignments: cluster.assignments.clone(),
        player_index: cluster.player_index.clone(),
        engine_id: engine_id.clone(),
        kill_switch: kill_switch.clone(),
        load_tx: cluster.load_tx.clone(),
    });
    auth_worker.spawn();
    let engine_join = tokio::spawn(engine.run(CommandRouter::default(), inbound_bus));

    // Transports share one session id allocator.
    let session_ids = Arc::new(AtomicU64::new(1));

    let telnet_addr: SocketAddr = format!("0.0.0.0:{}", config.server.telnet_port)
        .parse()
        .wrap_err("telnet listen address")?;
    let telnet = TelnetHost {
        inbound: inbound_tx.clone(),
        router: router_handle.clone(),
        transport_config: config.transport.clone(),
        queue_capacity: config.server.session_outbound_queue_capacity,
        session_ids: session_ids.clone(),
        kill_switch: kill_switch.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = telnet.run(telnet_addr).await {
            error!(error = %e, "telnet listener failed");
        }
    });

    let web_addr: SocketAddr = format!(
        "{}:{}",
        config.transport.websocket.host, config.server.web_port
    )
    .parse()
    .wrap_err("websocket listen address")?;
    let web = WebHost {
        state: WebHostState {
            inbound: inbound_tx.clone(),
            router: router_handle.clone(),
            transport_config: config.transport.clone(),
            queue_capacity: config.server.session_outbound_queue_capacity,
            session_ids: session_ids.clone(),
            kill_switch: kill_switch.clone(),
            stop_grace_millis: config.transport.websocket.stop_grace_millis,
        },
    };
    tokio::spawn(async move {
        if let Err(e) = web.run(web_addr).await {
            error!(error = %e, "websocket listener failed");
        }
    });

    info!(%engine_id, "AmbonMUD is up");

    // Shutdown: signal -> kill switch -> engine persists -> final flush.
    let mut interrupt =
        signal(SignalKind::interrupt()).expect("Unable to register INT signal handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("Unable to register TERM signal handler");
    tokio::select! {
        _ = interrupt.recv() => info!("interrupt received"),
        _ = terminate.recv() => info!("terminate received"),
        _ = watch_kill_switch(kill_switch.clone()) => info!("shutdown requested in-game"),
    }
    kill_switch.store(true, Ordering::Relaxed);
    cluster.bus.close();

    if let Err(e) = engine_join.await {
        warn!(error = %e, "engine task ended abnormally");
    }
    if let Err(e) = flush_worker.await {
        warn!(error = %e, "flush worker ended abnormally");
    }
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), router_join).await;

    info!("AmbonMUD stopped");
    Ok(())
}

async fn watch_kill_switch(kill_switch: Arc<AtomicBool>) {
    loop {
        if kill_switch.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
}
