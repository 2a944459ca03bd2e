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

//! End-to-end engine scenarios, driven deterministically: the test owns the
//! clock passed to `tick` and pumps the outbound router by hand. Only the
//! auth worker runs as a real task.

use ambonmud_cluster::{
    AssignmentsView, EngineMessage, InterEngineBus, LocalBus, NullPlayerIndex,
};
use ambonmud_common::config::{Config, WorldConfig};
use ambonmud_common::ids::{EngineId, SessionId, ZoneId};
use ambonmud_common::model::{EngineAddress, ItemTemplate, MobSpawn, Room};
use ambonmud_common::{InboundBus, InboundBusSender, InboundEvent, TransportKind};
use ambonmud_db::{FilePlayerRepository, WriteBehind};
use ambonmud_kernel::engine::{Engine, EngineDeps};
use ambonmud_kernel::router::CommandRouter;
use ambonmud_kernel::world::World;
use ambonmud_session::{
    Frame, OutboundRouter, PlainRenderer, RouterControl, RouterHandle, SessionSink,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn room(id: &str, title: &str, exits: &[(&str, &str)]) -> Room {
    Room {
        id: id.parse().unwrap(),
        title: title.to_string(),
        description: format!("You are in {title}."),
        exits: exits
            .iter()
            .map(|(dir, target)| {
                (
                    ambonmud_common::Direction::parse(dir).unwrap(),
                    target.parse().unwrap(),
                )
            })
            .collect(),
    }
}

/// Two zones, one exit between them, a rat and a sword in zone1.
fn test_world() -> World {
    let mut world = World::from_parts(
        vec![
            room("zone1:r1", "Temple Square", &[("east", "zone2:r1"), ("north", "zone1:r2")]),
            room("zone1:r2", "Market", &[("south", "zone1:r1")]),
            room("zone2:r1", "Far Meadow", &[("west", "zone1:r1")]),
        ],
        vec![ItemTemplate {
            id: "zone1:short_sword".parse().unwrap(),
            name: "a short sword".to_string(),
            slot: Some(ambonmud_common::model::EquipSlot::Weapon),
            damage_bonus: 2,
            armor_bonus: 0,
        }],
        vec![MobSpawn {
            id: "zone1:rat.1".parse().unwrap(),
            name: "a sewer rat".to_string(),
            room: "zone1:r2".parse().unwrap(),
            hp: 1_000,
            damage: 0,
            armor: 0,
            xp_reward: 25,
            aggressive: false,
            wanders: false,
        }],
        "zone1:r1".parse().unwrap(),
    );
    world.initial_ground.insert(
        "zone1:r1".parse().unwrap(),
        vec![ambonmud_common::model::ItemInstance {
            template: "zone1:short_sword".parse().unwrap(),
            qty: 1,
        }],
    );
    world
}

/// Routes targeted sends between two engines in-process; broadcasts reach
/// everyone including the sender, like the loopback bus.
struct PairBus {
    engine_id: EngineId,
    incoming_tx: flume::Sender<EngineMessage>,
    incoming_rx: flume::Receiver<EngineMessage>,
    peers: Mutex<HashMap<EngineId, flume::Sender<EngineMessage>>>,
    drop_outgoing: AtomicBool,
}

impl PairBus {
    fn new(engine_id: &str) -> Arc<Self> {
        let (incoming_tx, incoming_rx) = flume::bounded(256);
        Arc::new(Self {
            engine_id: EngineId::from(engine_id),
            incoming_tx,
            incoming_rx,
            peers: Mutex::new(HashMap::new()),
            drop_outgoing: AtomicBool::new(false),
        })
    }

    fn link(a: &Arc<Self>, b: &Arc<Self>) {
        a.peers
            .lock()
            .unwrap()
            .insert(b.engine_id.clone(), b.incoming_tx.clone());
        b.peers
            .lock()
            .unwrap()
            .insert(a.engine_id.clone(), a.incoming_tx.clone());
    }
}

impl InterEngineBus for PairBus {
    fn send_to(&self, target: &EngineId, message: EngineMessage) {
        if self.drop_outgoing.load(Ordering::SeqCst) {
            return;
        }
        if target == &self.engine_id {
            let _ = self.incoming_tx.try_send(message);
        } else if let Some(peer) = self.peers.lock().unwrap().get(target) {
            let _ = peer.try_send(message);
        }
    }

    fn broadcast(&self, message: EngineMessage) {
        if self.drop_outgoing.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.incoming_tx.try_send(message.clone());
        for peer in self.peers.lock().unwrap().values() {
            let _ = peer.try_send(message.clone());
        }
    }

    fn incoming(&self) -> flume::Receiver<EngineMessage> {
        self.incoming_rx.clone()
    }

    fn start(&self) {}

    fn close(&self) {}
}

struct TestClient {
    session_id: SessionId,
    frames: flume::Receiver<Frame>,
    collected: Vec<String>,
    close_count: Arc<AtomicUsize>,
}

impl TestClient {
    /// Drains newly delivered frames into the transcript and returns it.
    fn transcript(&mut self) -> &[String] {
        for frame in self.frames.drain() {
            match frame {
                Frame::Text(text) => self.collected.push(text),
                Frame::Structured { package, data } => {
                    self.collected.push(format!("<{package}>{data}"))
                }
            }
        }
        &self.collected
    }

    fn saw(&mut self, needle: &str) -> bool {
        self.transcript().iter().any(|line| line.contains(needle))
    }
}

struct TestEngine {
    engine: Engine,
    commands: CommandRouter,
    inbound: InboundBus,
    inbound_tx: InboundBusSender,
    handle: RouterHandle,
    out_router: OutboundRouter,
    event_rx: flume::Receiver<ambonmud_common::OutboundEvent>,
    control_rx: flume::Receiver<RouterControl>,
    db: Arc<WriteBehind>,
    assignments: Arc<AssignmentsView>,
    _dir: tempfile::TempDir,
}

impl TestEngine {
    async fn new(engine_id: &str, zones: &[&str], bus: Arc<dyn InterEngineBus>, sharded: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePlayerRepository::open(dir.path()).await.unwrap();
        let db = WriteBehind::new(Arc::new(repo));

        let mut config = Config {
            world: WorldConfig {
                resources: vec![PathBuf::from("unused.yaml")],
            },
            ..Config::default()
        };
        config.sharding.enabled = sharded;
        config.sharding.engine_id = engine_id.to_string();
        config.sharding.zones = zones.iter().map(|z| z.to_string()).collect();

        let assignments = AssignmentsView::empty();
        let (handle, event_rx, control_rx) = OutboundRouter::channels(256);
        let (engine, worker) = Engine::new(EngineDeps {
            config,
            world: Arc::new(test_world()),
            router: handle.clone(),
            db: db.clone(),
            bus,
            assignments: assignments.clone(),
            player_index: Arc::new(NullPlayerIndex),
            engine_id: EngineId::from(engine_id),
            kill_switch: Arc::new(AtomicBool::new(false)),
            load_tx: None,
        });
        worker.spawn();
        let (inbound_tx, inbound) = InboundBus::new(256);

        Self {
            engine,
            commands: CommandRouter::default(),
            inbound,
            inbound_tx,
            handle,
            out_router: OutboundRouter::new(),
            event_rx,
            control_rx,
            db,
            assignments,
            _dir: dir,
        }
    }

    fn seed_assignment(&self, zone: &str, engine_id: &str, port: u16) {
        self.assignments.store(
            HashMap::from([(
                ZoneId::from(zone),
                EngineAddress {
                    engine_id: EngineId::from(engine_id),
                    host: "127.0.0.1".to_string(),
                    port,
                },
            )]),
            HashMap::new(),
        );
    }

    fn tick(&mut self, now_ms: u64) {
        self.engine.tick(&self.commands, &self.inbound, now_ms);
        self.pump();
    }

    fn pump(&mut self) {
        loop {
            let mut progressed = false;
            for control in self.control_rx.drain() {
                self.out_router.apply_control(control);
                progressed = true;
            }
            for event in self.event_rx.drain() {
                self.out_router.dispatch(event);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Registers a sink for a brand-new session and announces it.
    fn connect(&mut self, session: u64, now_ms: u64) -> TestClient {
        let client = self.connect_existing(session);
        self.inbound_tx
            .try_send(InboundEvent::Connected {
                session_id: client.session_id,
                transport: TransportKind::Telnet,
            })
            .unwrap();
        self.tick(now_ms);
        client
    }

    /// Registers a sink only; used on a handoff target where the engine
    /// already holds the session.
    fn connect_existing(&mut self, session: u64) -> TestClient {
        let session_id = SessionId(session);
        let (tx, rx) = flume::bounded(256);
        let close_count = Arc::new(AtomicUsize::new(0));
        let counter = close_count.clone();
        self.handle.register(SessionSink::new(
            session_id,
            TransportKind::Telnet,
            tx,
            Box::new(PlainRenderer),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        self.pump();
        TestClient {
            session_id,
            frames: rx,
            collected: Vec::new(),
            close_count,
        }
    }

    fn line(&mut self, client: &TestClient, text: &str, now_ms: u64) {
        self.inbound_tx
            .try_send(InboundEvent::LineReceived {
                session_id: client.session_id,
                line: text.to_string(),
            })
            .unwrap();
        self.tick(now_ms);
    }

    /// Ticks until the client transcript contains `needle` (the auth worker
    /// is a real task, so replies land asynchronously).
    async fn settle_until(&mut self, client: &mut TestClient, needle: &str, now_ms: u64) {
        for _ in 0..200 {
            if client.saw(needle) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            self.tick(now_ms);
        }
        panic!(
            "never saw {needle:?}; transcript: {:#?}",
            client.transcript()
        );
    }

    async fn login_guest(&mut self, session: u64, now_ms: u64) -> TestClient {
        let mut client = self.connect(session, now_ms);
        self.line(&client, "3", now_ms);
        self.settle_until(&mut client, "Welcome, Guest", now_ms).await;
        client
    }
}

#[tokio::test]
async fn guest_login_shows_room_and_persists() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;

    let mut client = engine.connect(1, 0);
    assert!(client.saw("Welcome to AmbonMUD"));
    assert!(client.saw("3) play as a guest"));

    engine.line(&client, "3", 0);
    engine.settle_until(&mut client, "Welcome, Guest1!", 0).await;
    assert!(client.saw("Temple Square"));
    assert!(client.saw("Exits: east, north."));
    // The last delivered frame is the prompt.
    assert_eq!(client.transcript().last().unwrap(), "> ");

    // The write-behind layer flushes the new record to the backing store.
    engine.db.flush_now().await;
    let stored = engine
        .db
        .find_by_name_lower("guest1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.name, "Guest1");
}

#[tokio::test]
async fn unknown_command_gets_error_and_single_prompt() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;
    let mut client = engine.login_guest(1, 0).await;

    engine.line(&client, "dance wildly", 10);
    assert!(client.saw("is not a command"));
    let prompts = client
        .transcript()
        .iter()
        .filter(|l| l.as_str() == "> ")
        .count();
    assert!(prompts >= 1);
}

#[tokio::test]
async fn signup_flow_validates_and_creates_account() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;
    let mut client = engine.connect(1, 0);

    engine.line(&client, "2", 0);
    assert!(client.saw("Choose a username: "));

    engine.line(&client, "Brin the Bold", 0);
    assert!(client.saw("letters, digits and underscores"));

    engine.line(&client, "Brin", 0);
    engine.settle_until(&mut client, "Password: ", 0).await;

    engine.line(&client, "abc", 0);
    assert!(client.saw("at least 6 characters"));

    engine.line(&client, "hunter42", 0);
    assert!(client.saw("Confirm password: "));

    engine.line(&client, "different", 0);
    assert!(client.saw("Passwords do not match."));

    engine.line(&client, "hunter42", 0);
    engine.line(&client, "hunter42", 0);
    engine.settle_until(&mut client, "Welcome, Brin!", 0).await;

    // A second session logging into the same character is refused while the
    // first is online.
    let mut second = engine.connect(2, 0);
    engine.line(&second, "1", 0);
    engine.line(&second, "Brin", 0);
    engine.line(&second, "hunter42", 0);
    engine
        .settle_until(&mut second, "already playing", 0)
        .await;
}

#[tokio::test]
async fn combat_blocks_movement() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;
    let mut client = engine.login_guest(1, 0).await;

    engine.line(&client, "north", 0);
    assert!(client.saw("Market"));
    engine.line(&client, "attack rat", 0);
    assert!(client.saw("You attack a sewer rat!"));

    engine.line(&client, "south", 0);
    assert!(client.saw("You are in combat."));

    engine.line(&client, "flee", 0);
    assert!(client.saw("You flee!"));
}

#[tokio::test]
async fn say_reaches_roommates_only() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;
    let mut alice = engine.login_guest(1, 0).await;
    let mut bob = engine.login_guest(2, 0).await;
    let mut carol = engine.login_guest(3, 0).await;

    // Carol moves away; she must not hear the say.
    engine.line(&carol, "north", 0);

    engine.line(&alice, "'hello there", 0);
    assert!(alice.saw("You say, 'hello there'"));
    assert!(bob.saw("Guest1 says, 'hello there'"));
    assert!(!carol.saw("hello there"));
}

#[tokio::test]
async fn quit_closes_the_session_exactly_once() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;
    let mut client = engine.login_guest(1, 0).await;

    engine.line(&client, "quit", 0);
    assert!(client.saw("Goodbye. (quit)"));
    assert_eq!(client.close_count.load(Ordering::SeqCst), 1);

    // The transport reports the disconnect; teardown is idempotent.
    engine
        .inbound_tx
        .try_send(InboundEvent::Disconnected {
            session_id: client.session_id,
            reason: "quit".to_string(),
        })
        .unwrap();
    engine.tick(10);
    assert_eq!(client.close_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn who_lists_online_players() {
    let bus = LocalBus::new(EngineId::from("engine-1"), 64);
    let mut engine = TestEngine::new("engine-1", &[], Arc::new(bus), false).await;
    let mut alice = engine.login_guest(1, 0).await;
    let _bob = engine.login_guest(2, 0).await;

    engine.line(&alice, "who", 0);
    assert!(alice.saw("Online players (2):"));
    assert!(alice.saw("Guest1"));
    assert!(alice.saw("Guest2"));
}

#[tokio::test]
async fn cross_zone_handoff_happy_path() {
    let bus_a = PairBus::new("engine-a");
    let bus_b = PairBus::new("engine-b");
    PairBus::link(&bus_a, &bus_b);

    let mut a = TestEngine::new("engine-a", &["zone1"], bus_a.clone(), true).await;
    let mut b = TestEngine::new("engine-b", &["zone2"], bus_b.clone(), true).await;
    a.seed_assignment("zone2", "engine-b", 4001);
    b.seed_assignment("zone1", "engine-a", 4000);

    let mut traveler = a.login_guest(1, 0).await;
    let mut bystander = a.login_guest(2, 0).await;

    // Equip state that must survive the handoff.
    a.line(&traveler, "get sword", 0);
    a.line(&traveler, "equip sword", 0);
    assert!(traveler.saw("You equip a short sword."));

    a.line(&traveler, "east", 100);
    assert!(traveler.saw("The world shimmers around you..."));

    // Target engine binds the player and acks; source finalizes.
    b.tick(150);
    a.tick(200);
    assert!(bystander.saw("Guest1 leaves."));
    assert!(traveler.saw("Reconnecting you to 127.0.0.1:4001"));

    // The player now exists on B with inventory intact: drive a command
    // through B for the same session.
    let mut on_b = b.connect_existing(1);
    b.line(&on_b, "look", 300);
    assert!(on_b.saw("Far Meadow"));
    b.line(&on_b, "inventory", 300);
    assert!(on_b.saw("a short sword (equipped"));

    // Source no longer routes the session: a line on A is ignored.
    a.line(&traveler, "look", 400);
    assert!(!traveler.saw("Far Meadow"));
}

#[tokio::test]
async fn handoff_timeout_rolls_back() {
    let bus_a = PairBus::new("engine-a");
    let bus_b = PairBus::new("engine-b");
    PairBus::link(&bus_a, &bus_b);

    let mut a = TestEngine::new("engine-a", &["zone1"], bus_a.clone(), true).await;
    a.seed_assignment("zone2", "engine-b", 4001);

    let mut traveler = a.login_guest(1, 0).await;

    // The target never answers.
    bus_a.drop_outgoing.store(true, Ordering::SeqCst);
    a.line(&traveler, "east", 1_000);
    assert!(traveler.saw("The world shimmers around you..."));

    let timeout = 5_000;
    a.tick(1_000 + timeout + 1);
    assert!(traveler.saw("you are where you were"));

    // Fully functional on the source engine, in the original room.
    a.line(&traveler, "look", 10_000);
    assert!(traveler.saw("Temple Square"));
}

#[tokio::test]
async fn gossip_crosses_engines_once() {
    let bus_a = PairBus::new("engine-a");
    let bus_b = PairBus::new("engine-b");
    PairBus::link(&bus_a, &bus_b);

    let mut a = TestEngine::new("engine-a", &["zone1"], bus_a.clone(), true).await;
    let mut b = TestEngine::new("engine-b", &["zone2"], bus_b.clone(), true).await;

    let mut alice = a.login_guest(1, 0).await;
    let mut remote = b.login_guest(2, 0).await;

    a.line(&alice, "gossip anyone out there?", 0);
    b.tick(50);

    assert!(alice.saw("[gossip] Guest1: anyone out there?"));
    assert!(remote.saw("[gossip] Guest1: anyone out there?"));
    let count = alice
        .transcript()
        .iter()
        .filter(|l| l.contains("anyone out there?"))
        .count();
    assert_eq!(count, 1, "sender must hear the gossip exactly once");
}
