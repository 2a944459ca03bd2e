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

//! Redis pub/sub bus. Two subscriptions per engine: the shared broadcast
//! channel and this engine's targeted channel. Publishes ride an internal
//! queue to a publisher task so callers (the engine loop included) never
//! block on Redis.

use crate::bus::InterEngineBus;
use crate::messages::{Envelope, EngineMessage};
use ambonmud_common::ids::EngineId;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RedisBus {
    engine_id: EngineId,
    key_prefix: String,
    redis_url: String,
    outgoing_tx: flume::Sender<Envelope>,
    outgoing_rx: flume::Receiver<Envelope>,
    incoming_tx: flume::Sender<EngineMessage>,
    incoming_rx: flume::Receiver<EngineMessage>,
    kill_switch: Arc<AtomicBool>,
}

impl RedisBus {
    pub fn new(
        engine_id: EngineId,
        key_prefix: &str,
        redis_url: &str,
        incoming_capacity: usize,
        kill_switch: Arc<AtomicBool>,
    ) -> Self {
        let (outgoing_tx, outgoing_rx) = flume::unbounded();
        let (incoming_tx, incoming_rx) = flume::bounded(incoming_capacity);
        Self {
            engine_id,
            key_prefix: key_prefix.to_string(),
            redis_url: redis_url.to_string(),
            outgoing_tx,
            outgoing_rx,
            incoming_tx,
            incoming_rx,
            kill_switch,
        }
    }

    fn broadcast_channel(&self) -> String {
        format!("{}:broadcast", self.key_prefix)
    }

    fn targeted_channel(&self, engine: &EngineId) -> String {
        format!("{}:{}", self.key_prefix, engine)
    }

    fn enqueue(&self, envelope: Envelope) {
        // Unbounded internally; the publisher task applies the I/O pacing.
        let _ = self.outgoing_tx.send(envelope);
    }

    async fn publisher_loop(
        redis_url: String,
        key_prefix: String,
        outgoing: flume::Receiver<Envelope>,
        kill_switch: Arc<AtomicBool>,
    ) {
        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "bus publisher could not open redis client");
                return;
            }
        };
        let mut conn = match client.get_connection_manager().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "bus publisher could not connect");
                return;
            }
        };
        while let Ok(envelope) = outgoing.recv_async().await {
            if kill_switch.load(Ordering::Relaxed) {
                break;
            }
            let channel = match &envelope.target_engine_id {
                Some(target) => format!("{key_prefix}:{target}"),
                None => format!("{key_prefix}:broadcast"),
            };
            let payload = match serde_json::to_string(&envelope) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "dropping unserializable envelope");
                    continue;
                }
            };
            let published: redis::RedisResult<()> = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(&payload)
                .query_async(&mut conn)
                .await;
            if let Err(e) = published {
                warn!(channel, error = %e, "bus publish failed");
            }
        }
        debug!("bus publisher stopped");
    }

    async fn subscriber_loop(
        redis_url: String,
        engine_id: EngineId,
        broadcast_channel: String,
        targeted_channel: String,
        incoming: flume::Sender<EngineMessage>,
        kill_switch: Arc<AtomicBool>,
    ) {
        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "bus subscriber could not open redis client");
                return;
            }
        };
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "bus subscriber could not connect");
                return;
            }
        };
        for channel in [&broadcast_channel, &targeted_channel] {
            if let Err(e) = pubsub.subscribe(channel).await {
                warn!(channel, error = %e, "bus subscribe failed");
                return;
            }
        }
        info!(%engine_id, "inter-engine bus subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            if kill_switch.load(Ordering::Relaxed) {
                break;
            }
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "bus message had a non-text payload");
                    continue;
                }
            };
            let envelope: Envelope = match serde_json::from_str(&payload) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "dropping malformed bus envelope");
                    continue;
                }
            };
            // Our own broadcasts come back to us on the broadcast channel;
            // drop them to avoid duplicate delivery.
            if envelope.target_engine_id.is_none() && envelope.sender_engine_id == engine_id {
                continue;
            }
            if incoming.try_send(envelope.payload).is_err() {
                warn!("incoming bus channel full, dropping envelope");
            }
        }
        debug!("bus subscriber stopped");
    }
}

impl InterEngineBus for RedisBus {
    fn send_to(&self, target: &EngineId, message: EngineMessage) {
        self.enqueue(Envelope {
            sender_engine_id: self.engine_id.clone(),
            target_engine_id: Some(target.clone()),
            payload: message,
        });
    }

    fn broadcast(&self, message: EngineMessage) {
        self.enqueue(Envelope {
            sender_engine_id: self.engine_id.clone(),
            target_engine_id: None,
            payload: message,
        });
    }

    fn incoming(&self) -> flume::Receiver<EngineMessage> {
        self.incoming_rx.clone()
    }

    fn start(&self) {
        tokio::spawn(Self::publisher_loop(
            self.redis_url.clone(),
            self.key_prefix.clone(),
            self.outgoing_rx.clone(),
            self.kill_switch.clone(),
        ));
        tokio::spawn(Self::subscriber_loop(
            self.redis_url.clone(),
            self.engine_id.clone(),
            self.broadcast_channel(),
            self.targeted_channel(&self.engine_id),
            self.incoming_tx.clone(),
            self.kill_switch.clone(),
        ));
    }

    fn close(&self) {
        self.kill_switch.store(true, Ordering::Relaxed);
    }
}
