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

//! The engine loop: the single logical writer of world state. Each tick
//! drains the inbound bus under a budget, drains the inter-engine bus, runs
//! the periodic systems in fixed order and emits outbound events. All I/O
//! is behind channels; a misbehaving client can cost this loop nothing but
//! its own session.

use crate::auth::{self, AuthCmd, AuthReply, AuthState, AuthWorker};
use crate::command::parse_command;
use crate::handoff::{HandoffManager, InitiateOutcome, PendingHandoff};
use crate::registry::{MobRegistry, Player, PlayerRegistry};
use crate::router::CommandRouter;
use crate::systems;
use crate::world::World;
use ambonmud_cluster::{
    AssignmentsView, EngineMessage, InterEngineBus, PlayerLocationIndex, WhoPlayer,
};
use ambonmud_common::config::Config;
use ambonmud_common::events::TransportKind;
use ambonmud_common::ids::{Direction, EngineId, RoomId, SessionId, ZoneId};
use ambonmud_common::model::{ItemInstance, PlayerRecord};
use ambonmud_common::{InboundBus, InboundEvent, Outbound, PromptSpec};
use ambonmud_db::WriteBehind;
use ambonmud_session::RouterHandle;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long `who` waits for remote engines before printing.
pub(crate) const WHO_AGGREGATION_MS: u64 = 750;

/// Downed mobs return this long after dying.
pub(crate) const MOB_RESPAWN_MS: u64 = 60_000;

pub struct SessionState {
    pub auth: AuthState,
    pub transport: TransportKind,
    /// Set once a Close has been emitted; suppresses further input.
    pub closing: bool,
    /// A repository round trip is in flight for this session.
    pub auth_pending: bool,
    pub wrong_password_count: u32,
    pub total_auth_failures: u32,
}

pub(crate) struct PendingWho {
    pub requester: SessionId,
    pub players: Vec<WhoPlayer>,
    pub deadline_ms: u64,
}

/// Everything the engine needs from the outside, wired by the daemon.
pub struct EngineDeps {
    pub config: Config,
    pub world: Arc<World>,
    pub router: RouterHandle,
    pub db: Arc<WriteBehind>,
    pub bus: Arc<dyn InterEngineBus>,
    pub assignments: Arc<AssignmentsView>,
    pub player_index: Arc<dyn PlayerLocationIndex>,
    pub engine_id: EngineId,
    pub kill_switch: Arc<AtomicBool>,
    /// Per-zone player counts for instancing load reports; `None` when
    /// instancing is off. Drained by a daemon task that talks to the
    /// registry, keeping the engine free of registry I/O.
    pub load_tx: Option<flume::Sender<HashMap<ZoneId, usize>>>,
}

pub struct Engine {
    pub(crate) config: Config,
    pub(crate) world: Arc<World>,
    pub(crate) router: RouterHandle,
    pub(crate) db: Arc<WriteBehind>,
    pub(crate) bus: Arc<dyn InterEngineBus>,
    pub(crate) bus_rx: flume::Receiver<EngineMessage>,
    pub(crate) assignments: Arc<AssignmentsView>,
    pub(crate) player_index: Arc<dyn PlayerLocationIndex>,
    pub(crate) engine_id: EngineId,
    pub(crate) kill_switch: Arc<AtomicBool>,

    pub(crate) sessions: HashMap<SessionId, SessionState>,
    pub(crate) players: PlayerRegistry,
    pub(crate) mobs: MobRegistry,
    pub(crate) ground: HashMap<RoomId, Vec<ItemInstance>>,
    pub(crate) handoffs: HandoffManager,
    pub(crate) local_zones: HashSet<ZoneId>,
    pub(crate) sharding_enabled: bool,

    pub(crate) auth_tx: flume::Sender<AuthCmd>,
    pub(crate) auth_rx: flume::Receiver<AuthReply>,
    pub(crate) pending_who: HashMap<Uuid, PendingWho>,

    /// Wall clock for the current tick; systems and handlers read this
    /// instead of sampling the OS clock repeatedly.
    pub(crate) now_ms: u64,
    pub(crate) suppress_prompt: bool,

    pub(crate) carry_combat: usize,
    pub(crate) carry_regen: usize,
    pub(crate) carry_wander: usize,
    pub(crate) last_combat_ms: u64,
    pub(crate) last_wander_ms: u64,

    pub(crate) load_tx: Option<flume::Sender<HashMap<ZoneId, usize>>>,
    pub(crate) last_load_report_ms: u64,
}

impl Engine {
    /// Builds the engine and its auth worker. The worker must be spawned by
    /// the caller (it owns the repository I/O side of the auth flow).
    pub fn new(deps: EngineDeps) -> (Self, AuthWorker) {
        let EngineDeps {
            config,
            world,
            router,
            db,
            bus,
            assignments,
            player_index,
            engine_id,
            kill_switch,
            load_tx,
        } = deps;

        let sharding_enabled = config.sharding.enabled;
        let local_zones: HashSet<ZoneId> = if sharding_enabled {
            config.sharding.zone_ids().into_iter().collect()
        } else {
            world.zones().into_iter().collect()
        };

        let mut mobs = MobRegistry::default();
        mobs.spawn_all(&world.mob_spawns, Some(&local_zones));

        let ground: HashMap<RoomId, Vec<ItemInstance>> = world
            .initial_ground
            .iter()
            .filter(|(room, _)| local_zones.contains(&room.zone()))
            .map(|(room, items)| (room.clone(), items.clone()))
            .collect();

        let (auth_tx, auth_rx, worker) = AuthWorker::new(db.clone(), world.start_room.clone());
        let handoffs = HandoffManager::new(config.sharding.handoff.ack_timeout_ms);
        let bus_rx = bus.incoming();

        let engine = Self {
            config,
            world,
            router,
            db,
            bus,
            bus_rx,
            assignments,
            player_index,
            engine_id,
            kill_switch,
            sessions: HashMap::new(),
            players: PlayerRegistry::default(),
            mobs,
            ground,
            handoffs,
            local_zones,
            sharding_enabled,
            auth_tx,
            auth_rx,
            pending_who: HashMap::new(),
            now_ms: crate::now_ms(),
            suppress_prompt: false,
            carry_combat: 0,
            carry_regen: 0,
            carry_wander: 0,
            last_combat_ms: 0,
            last_wander_ms: 0,
            load_tx,
            last_load_report_ms: 0,
        };
        (engine, worker)
    }

    /// The production loop. Ticks at the configured period until the kill
    /// switch flips, then persists every online player and exits.
    pub async fn run(mut self, command_router: CommandRouter, inbound: InboundBus) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.server.tick_millis));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(engine_id = %self.engine_id, "engine loop started");
        loop {
            tick.tick().await;
            if self.kill_switch.load(Ordering::Relaxed) {
                break;
            }
            self.tick(&command_router, &inbound, crate::now_ms());
        }
        for session_id in self.players.sessions() {
            if let Some(player) = self.players.get(session_id) {
                self.db.save(player.record.clone());
            }
        }
        info!(engine_id = %self.engine_id, "engine loop stopped");
    }

    /// One tick, in the fixed order the design requires. Public so tests can
    /// drive the engine deterministically.
    pub fn tick(&mut self, command_router: &CommandRouter, inbound: &InboundBus, now_ms: u64) {
        self.now_ms = now_ms;

        for event in inbound.drain_up_to(self.config.server.max_inbound_events_per_tick) {
            self.handle_inbound(command_router, event);
        }
        while let Ok(reply) = self.auth_rx.try_recv() {
            auth::apply_reply(self, reply);
        }
        let mut bus_budget = self.config.engine.scheduler.max_actions_per_tick;
        while bus_budget > 0 {
            match self.bus_rx.try_recv() {
                Ok(msg) => self.handle_bus_message(msg),
                Err(_) => break,
            }
            bus_budget -= 1;
        }

        systems::combat::run(self, now_ms);
        systems::wander::run(self, now_ms);
        systems::regen::run(self, now_ms);
        self.sweep_expired_handoffs(now_ms);
        self.flush_due_who(now_ms);
        self.report_load(now_ms);
    }

    /// Ships per-zone player counts to the instancing reporter every few
    /// seconds. `try_send` only: a stalled reporter costs nothing here.
    fn report_load(&mut self, now_ms: u64) {
        const LOAD_REPORT_INTERVAL_MS: u64 = 5_000;
        let Some(tx) = &self.load_tx else {
            return;
        };
        if now_ms.saturating_sub(self.last_load_report_ms) < LOAD_REPORT_INTERVAL_MS {
            return;
        }
        self.last_load_report_ms = now_ms;
        let _ = tx.try_send(self.players.counts_by_zone());
    }

    // ---- inbound events ---------------------------------------------------

    fn handle_inbound(&mut self, command_router: &CommandRouter, event: InboundEvent) {
        match event {
            InboundEvent::Connected {
                session_id,
                transport,
            } => {
                debug!(%session_id, ?transport, "session connected");
                self.sessions.insert(
                    session_id,
                    SessionState {
                        auth: AuthState::Menu,
                        transport,
                        closing: false,
                        auth_pending: false,
                        wrong_password_count: 0,
                        total_auth_failures: 0,
                    },
                );
                self.emit(session_id, Outbound::ShowLoginScreen);
                self.auth_prompt(session_id, "> ");
            }
            InboundEvent::LineReceived { session_id, line } => {
                let Some(session) = self.sessions.get(&session_id) else {
                    return;
                };
                if session.closing {
                    return;
                }
                if !matches!(session.auth, AuthState::Authed { .. }) {
                    auth::handle_line(self, session_id, &line);
                    return;
                }
                let command = parse_command(&line);
                self.suppress_prompt = false;
                command_router.handle(self, session_id, command);
                let still_here = self
                    .sessions
                    .get(&session_id)
                    .is_some_and(|s| !s.closing);
                if still_here && !self.suppress_prompt && !self.handoffs.is_in_transit(session_id)
                {
                    self.prompt(session_id);
                }
            }
            InboundEvent::StructuredReceived {
                session_id,
                package,
                data,
            } => self.handle_structured(session_id, &package, data),
            InboundEvent::Disconnected { session_id, reason } => {
                self.teardown_session(session_id, &reason);
            }
        }
    }

    /// Out-of-band state updates bypass the command parser entirely.
    fn handle_structured(&mut self, session_id: SessionId, package: &str, data: Value) {
        match package {
            "Session.Prefs" => {
                if let Some(ansi) = data.get("ansi").and_then(Value::as_bool) {
                    if let Some(player) = self.players.get_mut(session_id) {
                        player.ansi_enabled = ansi;
                    }
                    self.emit(session_id, Outbound::SetAnsi(ansi));
                }
            }
            "Core.Ping" => {
                self.emit(
                    session_id,
                    Outbound::Structured {
                        package: "Core.Pong".to_string(),
                        data: Value::Null,
                    },
                );
            }
            other => debug!(%session_id, package = other, "ignoring unknown gmcp package"),
        }
    }

    fn teardown_session(&mut self, session_id: SessionId, reason: &str) {
        debug!(%session_id, reason, "session torn down");
        self.handoffs.cancel_if_pending(session_id);
        if let Some(player) = self.players.remove(session_id) {
            let name = player.record.name.clone();
            let room = player.record.room_id.clone();
            self.db.save(player.record);
            self.player_index.unregister(&name);
            self.room_broadcast(&room, Some(session_id), &format!("{name} vanishes."));
        }
        self.sessions.remove(&session_id);
        self.router.unregister(session_id);
    }

    // ---- cluster bus ------------------------------------------------------

    fn handle_bus_message(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::GlobalBroadcast {
                kind,
                sender_name,
                text,
                source_engine_id,
            } => {
                // Local delivery already happened on the sending engine.
                if source_engine_id == self.engine_id {
                    return;
                }
                self.deliver_global(&kind, &sender_name, &text);
            }
            EngineMessage::TellMessage { from, to, text } => {
                if let Some(target) = self.players.session_by_name(&to) {
                    self.send_text(target, format!("{from} tells you: {text}"));
                    self.prompt(target);
                } else {
                    debug!(to, "tell for a player no longer here");
                }
            }
            EngineMessage::WhoRequest {
                request_id,
                reply_to_engine_id,
            } => {
                let players = self.local_who();
                self.bus.send_to(
                    &reply_to_engine_id,
                    EngineMessage::WhoResponse {
                        request_id,
                        players,
                    },
                );
            }
            EngineMessage::WhoResponse {
                request_id,
                players,
            } => {
                if let Some(pending) = self.pending_who.get_mut(&request_id) {
                    pending.players.extend(players);
                }
            }
            EngineMessage::KickRequest { target_name } => {
                if let Some(session_id) = self.players.session_by_name(&target_name) {
                    self.close_session(session_id, "kicked by staff");
                }
            }
            EngineMessage::ShutdownRequest { initiator } => {
                info!(initiator, "shutdown requested over the bus");
                for session_id in self.players.sessions() {
                    self.send_info(session_id, "The world is shutting down.");
                }
                self.kill_switch.store(true, Ordering::Relaxed);
            }
            EngineMessage::PlayerHandoff { .. } => self.accept_handoff(msg),
            EngineMessage::HandoffAck {
                session_id,
                success,
                error_message,
            } => self.finish_handoff(session_id, success, error_message),
            EngineMessage::SessionRedirect {
                session_id,
                new_engine_id,
                new_host,
                new_port,
            } => {
                // This engine doubles as the gateway in standalone topology.
                self.emit(
                    session_id,
                    Outbound::SessionRedirect {
                        new_engine_id,
                        new_host,
                        new_port,
                    },
                );
            }
            EngineMessage::TransferRequest {
                staff,
                target,
                target_room_id,
            } => {
                if let Some(session_id) = self.players.session_by_name(&target) {
                    info!(staff, target, room = %target_room_id, "staff transfer");
                    self.transfer_to_room(session_id, target_room_id);
                }
            }
        }
    }

    pub(crate) fn deliver_global(&mut self, kind: &str, sender_name: &str, text: &str) {
        let line = format!("[{kind}] {sender_name}: {text}");
        for session_id in self.players.sessions() {
            self.send_info(session_id, line.clone());
            self.prompt(session_id);
        }
    }

    pub(crate) fn local_who(&self) -> Vec<WhoPlayer> {
        let mut players: Vec<WhoPlayer> = self
            .players
            .iter()
            .map(|p| WhoPlayer {
                name: p.record.name.clone(),
                level: p.record.level,
                zone: p.record.room_id.zone().to_string(),
            })
            .collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));
        players
    }

    fn flush_due_who(&mut self, now_ms: u64) {
        let due: Vec<Uuid> = self
            .pending_who
            .iter()
            .filter(|(_, w)| w.deadline_ms <= now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            let Some(mut pending) = self.pending_who.remove(&id) else {
                continue;
            };
            pending.players.sort_by(|a, b| a.name.cmp(&b.name));
            pending.players.dedup_by(|a, b| a.name == b.name);
            self.send_info(
                pending.requester,
                format!("Online players ({}):", pending.players.len()),
            );
            for p in &pending.players {
                self.send_text(
                    pending.requester,
                    format!("  {:<16} level {:<3} [{}]", p.name, p.level, p.zone),
                );
            }
            self.prompt(pending.requester);
        }
    }

    // ---- auth plumbing ----------------------------------------------------

    pub(crate) fn set_auth(&mut self, session_id: SessionId, state: AuthState) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.auth = state;
        }
    }

    pub(crate) fn mark_auth_pending(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.auth_pending = true;
        }
    }

    pub(crate) fn clear_auth_pending(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.auth_pending = false;
        }
    }

    pub(crate) fn send_auth_cmd(&self, cmd: AuthCmd) {
        let _ = self.auth_tx.send(cmd);
    }

    /// Binds an authed record to the session: the moment a Player exists.
    pub(crate) fn bind_player(&mut self, session_id: SessionId, record: PlayerRecord) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.auth = AuthState::Authed {
            player_id: record.id,
        };
        session.wrong_password_count = 0;
        let transport = session.transport;
        let name = record.name.clone();
        let room = record.room_id.clone();

        let player = Player::from_record(session_id, record, transport, self.now_ms);
        self.players.insert(player);
        self.player_index.register(&name);

        self.send_info(session_id, format!("Welcome, {name}!"));
        self.room_broadcast(&room, Some(session_id), &format!("{name} appears."));
        self.look(session_id);
        self.prompt(session_id);
        info!(%session_id, name, "player bound");
    }

    // ---- movement and handoff --------------------------------------------

    pub(crate) fn try_move(&mut self, session_id: SessionId, dir: Direction) {
        let Some(player) = self.players.get(session_id) else {
            return;
        };
        if player.combat_target.is_some() {
            self.send_error(session_id, "You are in combat.");
            return;
        }
        let from = player.record.room_id.clone();
        let Some(room) = self.world.room(&from) else {
            warn!(%session_id, room = %from, "player in unknown room");
            return;
        };
        let Some(target) = room.exits.get(&dir).cloned() else {
            self.send_error(session_id, "You can't go that way.");
            return;
        };

        if self.is_remote_zone(&target.zone()) {
            self.initiate_handoff(session_id, target);
            return;
        }
        self.move_to(session_id, target, Some(dir));
    }

    pub(crate) fn is_remote_zone(&self, zone: &ZoneId) -> bool {
        self.sharding_enabled && !self.local_zones.contains(zone)
    }

    pub(crate) fn move_to(&mut self, session_id: SessionId, to: RoomId, dir: Option<Direction>) {
        let Some(player) = self.players.get(session_id) else {
            return;
        };
        let name = player.record.name.clone();
        let from = player.record.room_id.clone();

        let leave_line = match dir {
            Some(dir) => format!("{name} leaves {dir}."),
            None => format!("{name} leaves."),
        };
        self.room_broadcast(&from, Some(session_id), &leave_line);
        self.players.relocate(session_id, to.clone());
        self.room_broadcast(&to, Some(session_id), &format!("{name} arrives."));

        if let Some(player) = self.players.get(session_id) {
            self.db.save(player.record.clone());
        }
        self.look(session_id);
        self.check_aggression(session_id);
    }

    /// Staff transfer to an arbitrary room, local or remote.
    pub(crate) fn transfer_to_room(&mut self, session_id: SessionId, room: RoomId) {
        if !self.world.rooms.contains_key(&room) && !self.is_remote_zone(&room.zone()) {
            self.send_error(session_id, "That room does not exist.");
            return;
        }
        self.send_info(session_id, "A strange force seizes you.");
        if self.is_remote_zone(&room.zone()) {
            self.initiate_handoff(session_id, room);
        } else {
            self.move_to(session_id, room, None);
            self.prompt(session_id);
        }
    }

    pub(crate) fn initiate_handoff(&mut self, session_id: SessionId, target_room: RoomId) {
        let outcome = self.start_handoff(session_id, target_room);
        match outcome {
            InitiateOutcome::Initiated(_) => {
                self.send_info(session_id, "The world shimmers around you...");
            }
            InitiateOutcome::AlreadyInTransit => {
                self.send_error(session_id, "You are already between worlds.");
            }
            InitiateOutcome::PlayerNotFound => {}
            InitiateOutcome::NoEngineForZone => {
                self.send_error(session_id, "A strange force holds you back.");
            }
        }
    }

    /// Source-side steps 1-5 of the handoff protocol.
    pub(crate) fn start_handoff(
        &mut self,
        session_id: SessionId,
        target_room: RoomId,
    ) -> InitiateOutcome {
        if self.handoffs.is_in_transit(session_id) {
            return InitiateOutcome::AlreadyInTransit;
        }
        let Some(player) = self.players.get(session_id) else {
            return InitiateOutcome::PlayerNotFound;
        };
        let zone = target_room.zone();
        let sticky = player.sticky_instances.get(&zone);
        let Some(target_engine) = self.assignments.select_for(&zone, None, sticky) else {
            warn!(%session_id, %zone, "no engine owns the destination zone");
            return InitiateOutcome::NoEngineForZone;
        };

        let state = player.serialize();
        let player_name = player.record.name.clone();
        let from_room = player.record.room_id.clone();

        self.bus.send_to(
            &target_engine.engine_id,
            EngineMessage::PlayerHandoff {
                session_id,
                target_room_id: target_room.clone(),
                player_state: state,
                gateway_id: self.engine_id.to_string(),
                source_engine_id: self.engine_id.clone(),
            },
        );
        let outcome = self.handoffs.begin(
            session_id,
            &player_name,
            from_room,
            target_room,
            target_engine,
            self.now_ms,
        );
        debug!(%session_id, "handoff initiated");
        outcome
    }

    /// Source-side completion: ack arrived (either way).
    fn finish_handoff(
        &mut self,
        session_id: SessionId,
        success: bool,
        error_message: Option<String>,
    ) {
        let Some(pending) = self.handoffs.handle_ack(session_id) else {
            // Timed out locally, then the target answered anyway. The
            // gateway reconciles via SessionRedirect; nothing to do here.
            debug!(%session_id, "late handoff ack ignored");
            return;
        };
        if !success {
            warn!(%session_id, error = ?error_message, "handoff rejected by target");
            self.send_error(
                session_id,
                "The shimmer fades; the world refuses to let you pass.",
            );
            self.prompt(session_id);
            return;
        }

        self.room_broadcast(
            &pending.from_room_id,
            Some(session_id),
            &format!("{} leaves.", pending.player_name),
        );
        if let Some(player) = self.players.remove(session_id) {
            self.player_index.unregister(&player.record.name);
        }
        self.sessions.remove(&session_id);
        self.emit(
            session_id,
            Outbound::SessionRedirect {
                new_engine_id: pending.target_engine.engine_id.clone(),
                new_host: pending.target_engine.host.clone(),
                new_port: pending.target_engine.port,
            },
        );
        info!(%session_id, player = %pending.player_name, target = %pending.target_engine.engine_id, "handoff complete");
    }

    /// Target-side protocol for an arriving `PlayerHandoff`.
    fn accept_handoff(&mut self, msg: EngineMessage) {
        let EngineMessage::PlayerHandoff {
            session_id,
            target_room_id,
            player_state,
            gateway_id: _,
            source_engine_id,
        } = msg
        else {
            return;
        };

        let reject = |engine: &Engine, error: &str| {
            engine.bus.send_to(
                &source_engine_id,
                EngineMessage::HandoffAck {
                    session_id,
                    success: false,
                    error_message: Some(error.to_string()),
                },
            );
        };

        if self.is_remote_zone(&target_room_id.zone())
            || !self.world.rooms.contains_key(&target_room_id)
        {
            reject(self, "Target room is not hosted on this engine");
            return;
        }
        if self.sessions.contains_key(&session_id)
            || self.players.is_name_online(&player_state.record.name)
        {
            reject(self, "Session already exists on target engine");
            return;
        }

        let mut player = Player::from_serialized(session_id, player_state, self.now_ms);
        player.record.room_id = target_room_id.clone();
        let name = player.record.name.clone();
        let transport = player.transport;

        self.sessions.insert(
            session_id,
            SessionState {
                auth: AuthState::Authed {
                    player_id: player.record.id,
                },
                transport,
                closing: false,
                auth_pending: false,
                wrong_password_count: 0,
                total_auth_failures: 0,
            },
        );
        self.db.save(player.record.clone());
        self.players.insert(player);
        self.player_index.register(&name);

        self.room_broadcast(&target_room_id, Some(session_id), &format!("{name} enters."));
        self.bus.send_to(
            &source_engine_id,
            EngineMessage::HandoffAck {
                session_id,
                success: true,
                error_message: None,
            },
        );
        info!(%session_id, name, "handoff accepted");
    }

    fn sweep_expired_handoffs(&mut self, now_ms: u64) {
        let expired: Vec<PendingHandoff> = self.handoffs.expire_timed_out(now_ms);
        for pending in expired {
            warn!(session_id = %pending.session_id, player = %pending.player_name, "handoff timed out, rolling back");
            self.send_error(
                pending.session_id,
                "The shimmer fades; you are where you were.",
            );
            self.prompt(pending.session_id);
        }
    }

    // ---- emission helpers -------------------------------------------------

    pub(crate) fn emit(&self, session_id: SessionId, event: Outbound) {
        self.router.emit(session_id, event);
    }

    pub(crate) fn send_text(&self, session_id: SessionId, text: impl Into<String>) {
        self.emit(session_id, Outbound::SendText(text.into()));
    }

    pub(crate) fn send_info(&self, session_id: SessionId, text: impl Into<String>) {
        self.emit(session_id, Outbound::SendInfo(text.into()));
    }

    pub(crate) fn send_error(&self, session_id: SessionId, text: impl Into<String>) {
        self.emit(session_id, Outbound::SendError(text.into()));
    }

    pub(crate) fn prompt(&self, session_id: SessionId) {
        let spec = match self.players.get(session_id) {
            Some(player) => PromptSpec {
                text: ambonmud_common::DEFAULT_PROMPT.to_string(),
                hp: player.record.hp,
                max_hp: player.record.max_hp,
                mana: player.record.mana,
                max_mana: player.record.max_mana,
            },
            None => PromptSpec::default(),
        };
        self.emit(session_id, Outbound::SendPrompt(spec));
    }

    /// Prompt with custom text, used by the auth flow ("Username: " etc).
    pub(crate) fn auth_prompt(&self, session_id: SessionId, text: &str) {
        self.emit(
            session_id,
            Outbound::SendPrompt(PromptSpec {
                text: text.to_string(),
                ..PromptSpec::default()
            }),
        );
    }

    pub(crate) fn close_session(&mut self, session_id: SessionId, reason: &str) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.closing = true;
        }
        self.emit(
            session_id,
            Outbound::Close {
                reason: reason.to_string(),
            },
        );
    }

    /// Line to everyone in a room, optionally excluding one session.
    pub(crate) fn room_broadcast(&self, room: &RoomId, exclude: Option<SessionId>, text: &str) {
        for member in self.players.members_of(room) {
            if Some(member) == exclude {
                continue;
            }
            self.send_text(member, text.to_string());
            self.prompt(member);
        }
    }

    // ---- shared queries ---------------------------------------------------

    pub(crate) fn equip_damage_bonus(&self, player: &Player) -> i32 {
        player
            .record
            .equipment
            .values()
            .filter_map(|id| self.world.item_templates.get(id))
            .map(|t| t.damage_bonus)
            .sum()
    }

    pub(crate) fn equip_armor_bonus(&self, player: &Player) -> i32 {
        player
            .record
            .equipment
            .values()
            .filter_map(|id| self.world.item_templates.get(id))
            .map(|t| t.armor_bonus)
            .sum()
    }

    /// Aggressive, unengaged mobs jump a player entering their room.
    pub(crate) fn check_aggression(&mut self, session_id: SessionId) {
        let Some(player) = self.players.get(session_id) else {
            return;
        };
        if player.combat_target.is_some() {
            return;
        }
        let room = player.record.room_id.clone();
        let candidates = self.mobs.in_room(&room);
        for mob_id in candidates {
            let Some(mob) = self.mobs.get_mut(&mob_id) else {
                continue;
            };
            if mob.aggressive && mob.combat_target.is_none() {
                mob.combat_target = Some(session_id);
                let mob_name = mob.name.clone();
                if let Some(player) = self.players.get_mut(session_id) {
                    player.combat_target = Some(mob_id);
                }
                self.send_text(session_id, format!("{mob_name} snarls and attacks you!"));
                break;
            }
        }
    }

    /// Room description shown on arrival and on `look`: title, description,
    /// exits, ground items, mobs and other players.
    pub(crate) fn look(&self, session_id: SessionId) {
        let Some(player) = self.players.get(session_id) else {
            return;
        };
        let room_id = &player.record.room_id;
        let Some(room) = self.world.room(room_id) else {
            return;
        };
        self.send_info(session_id, room.title.clone());
        self.send_text(session_id, room.description.clone());

        if !room.exits.is_empty() {
            let mut dirs: Vec<String> =
                room.exits.keys().map(|d| d.to_string()).collect();
            dirs.sort();
            self.send_text(session_id, format!("Exits: {}.", dirs.join(", ")));
        } else {
            self.send_text(session_id, "There are no obvious exits.");
        }

        if let Some(items) = self.ground.get(room_id) {
            for item in items {
                if let Some(template) = self.world.item_templates.get(&item.template) {
                    let line = if item.qty > 1 {
                        format!("{} (x{}) lies here.", template.name, item.qty)
                    } else {
                        format!("{} lies here.", template.name)
                    };
                    self.send_text(session_id, line);
                }
            }
        }
        for mob_id in self.mobs.in_room(room_id) {
            if let Some(mob) = self.mobs.get(&mob_id) {
                self.send_text(session_id, format!("{} is here.", mob.name));
            }
        }
        for other in self.players.members_of(room_id) {
            if other == session_id {
                continue;
            }
            if let Some(other_player) = self.players.get(other) {
                self.send_text(
                    session_id,
                    format!("{} is standing here.", other_player.record.name),
                );
            }
        }
    }
}
