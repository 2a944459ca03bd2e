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

//! The inter-engine bus contract and the single-process loopback
//! implementation. Sends are non-blocking on the caller; the engine loop
//! drains `incoming()` once per tick.

use crate::messages::EngineMessage;
use ambonmud_common::ids::EngineId;
use tracing::warn;

pub trait InterEngineBus: Send + Sync {
    /// Targeted delivery to one engine. Fire-and-forget.
    fn send_to(&self, target: &EngineId, message: EngineMessage);

    /// Fan-out to every engine. Consumers of the loopback bus see their own
    /// broadcasts; the pub/sub bus filters self-origin envelopes.
    fn broadcast(&self, message: EngineMessage);

    /// The receive channel of messages delivered to this engine.
    fn incoming(&self) -> flume::Receiver<EngineMessage>;

    fn start(&self);

    fn close(&self);
}

/// Loopback bus for a single-process deployment: `send_to` and `broadcast`
/// both enqueue once onto the local incoming channel.
pub struct LocalBus {
    engine_id: EngineId,
    tx: flume::Sender<EngineMessage>,
    rx: flume::Receiver<EngineMessage>,
}

impl LocalBus {
    pub fn new(engine_id: EngineId, capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { engine_id, tx, rx }
    }

    fn enqueue(&self, message: EngineMessage) {
        if self.tx.try_send(message).is_err() {
            warn!(engine_id = %self.engine_id, "local bus full, dropping message");
        }
    }
}

impl InterEngineBus for LocalBus {
    fn send_to(&self, _target: &EngineId, message: EngineMessage) {
        self.enqueue(message);
    }

    fn broadcast(&self, message: EngineMessage) {
        self.enqueue(message);
    }

    fn incoming(&self) -> flume::Receiver<EngineMessage> {
        self.rx.clone()
    }

    fn start(&self) {}

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loopback_delivers_own_broadcasts() {
        let bus = LocalBus::new(EngineId::from("engine-1"), 8);
        bus.broadcast(EngineMessage::ShutdownRequest {
            initiator: "ops".into(),
        });
        bus.send_to(
            &EngineId::from("engine-1"),
            EngineMessage::KickRequest {
                target_name: "Brin".into(),
            },
        );
        let rx = bus.incoming();
        assert_eq!(rx.try_recv().is_ok(), true);
        assert_eq!(rx.try_recv().is_ok(), true);
        assert!(rx.try_recv().is_err());
    }
}
