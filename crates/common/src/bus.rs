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

//! The inbound bus: a bounded many-producer, single-consumer queue of inbound
//! events. Transports hold cloned senders; the engine loop is the sole
//! consumer. Sends never block; a full bus is surfaced to the transport so it
//! can drive its backpressure counter.

use crate::events::InboundEvent;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum InboundSendError {
    #[error("inbound bus full")]
    Full,
    #[error("inbound bus closed")]
    Closed,
}

/// Cloneable producer half handed to every transport session.
#[derive(Clone)]
pub struct InboundBusSender {
    tx: flume::Sender<InboundEvent>,
}

impl InboundBusSender {
    pub fn try_send(&self, event: InboundEvent) -> Result<(), InboundSendError> {
        self.tx.try_send(event).map_err(|e| match e {
            flume::TrySendError::Full(_) => InboundSendError::Full,
            flume::TrySendError::Disconnected(_) => InboundSendError::Closed,
        })
    }
}

/// Consumer half owned by the engine loop.
pub struct InboundBus {
    rx: flume::Receiver<InboundEvent>,
}

impl InboundBus {
    pub fn new(capacity: usize) -> (InboundBusSender, InboundBus) {
        let (tx, rx) = flume::bounded(capacity);
        (InboundBusSender { tx }, InboundBus { rx })
    }

    /// Non-blocking drain of at most `budget` events, in arrival order.
    pub fn drain_up_to(&self, budget: usize) -> Vec<InboundEvent> {
        let mut out = Vec::new();
        while out.len() < budget {
            match self.rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(_) => break,
            }
        }
        out
    }

    /// Awaits the next event; used by the engine to idle between ticks in
    /// tests. The production loop polls on the tick interval instead.
    pub async fn recv(&self) -> Option<InboundEvent> {
        self.rx.recv_async().await.ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InboundEvent;
    use crate::ids::SessionId;
    use pretty_assertions::assert_eq;

    fn line(n: u64, text: &str) -> InboundEvent {
        InboundEvent::LineReceived {
            session_id: SessionId(n),
            line: text.to_string(),
        }
    }

    #[test]
    fn refuses_when_full() {
        let (tx, bus) = InboundBus::new(2);
        tx.try_send(line(1, "a")).unwrap();
        tx.try_send(line(1, "b")).unwrap();
        assert_eq!(tx.try_send(line(1, "c")), Err(InboundSendError::Full));
        let drained = bus.drain_up_to(16);
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn drain_respects_budget_and_order() {
        let (tx, bus) = InboundBus::new(16);
        for i in 0..5 {
            tx.try_send(line(1, &format!("l{i}"))).unwrap();
        }
        let first = bus.drain_up_to(3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], line(1, "l0"));
        let rest = bus.drain_up_to(3);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1], line(1, "l4"));
    }
}
