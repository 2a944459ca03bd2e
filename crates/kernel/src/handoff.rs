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

//! Source-side bookkeeping for cross-engine player migration. At most one
//! pending handoff per session; a pending entry either finalizes on ack or
//! expires and rolls back. The in-transit guard here, combined with the
//! target's duplicate-session guard, gives the transfer its at-most-once
//! property.

use ambonmud_common::ids::{RoomId, SessionId};
use ambonmud_common::model::EngineAddress;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct PendingHandoff {
    pub session_id: SessionId,
    pub player_name: String,
    pub from_room_id: RoomId,
    pub target_room_id: RoomId,
    pub target_engine: EngineAddress,
    pub deadline_epoch_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InitiateOutcome {
    Initiated(EngineAddress),
    PlayerNotFound,
    NoEngineForZone,
    AlreadyInTransit,
}

pub struct HandoffManager {
    pending: HashMap<SessionId, PendingHandoff>,
    ack_timeout_ms: u64,
}

impl HandoffManager {
    pub fn new(ack_timeout_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            ack_timeout_ms,
        }
    }

    /// Records the pending transfer. The caller has already resolved the
    /// target engine and serialized the player; this guards the in-transit
    /// invariant and owns the deadline.
    pub fn begin(
        &mut self,
        session_id: SessionId,
        player_name: &str,
        from_room_id: RoomId,
        target_room_id: RoomId,
        target_engine: EngineAddress,
        now_ms: u64,
    ) -> InitiateOutcome {
        if self.pending.contains_key(&session_id) {
            return InitiateOutcome::AlreadyInTransit;
        }
        let outcome = InitiateOutcome::Initiated(target_engine.clone());
        self.pending.insert(
            session_id,
            PendingHandoff {
                session_id,
                player_name: player_name.to_string(),
                from_room_id,
                target_room_id,
                target_engine,
                deadline_epoch_ms: now_ms + self.ack_timeout_ms,
            },
        );
        outcome
    }

    /// Consumes the pending entry for an arriving ack; `None` when the
    /// handoff already expired or was never initiated (a late ack).
    pub fn handle_ack(&mut self, session_id: SessionId) -> Option<PendingHandoff> {
        self.pending.remove(&session_id)
    }

    /// Removes and returns every pending handoff whose deadline has passed,
    /// for rollback messaging.
    pub fn expire_timed_out(&mut self, now_ms: u64) -> Vec<PendingHandoff> {
        let expired: Vec<SessionId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline_epoch_ms <= now_ms)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect()
    }

    pub fn is_in_transit(&self, session_id: SessionId) -> bool {
        self.pending.contains_key(&session_id)
    }

    pub fn cancel_if_pending(&mut self, session_id: SessionId) -> Option<PendingHandoff> {
        self.pending.remove(&session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambonmud_common::ids::EngineId;
    use pretty_assertions::assert_eq;

    fn target() -> EngineAddress {
        EngineAddress {
            engine_id: EngineId::from("engine-b"),
            host: "10.0.0.2".into(),
            port: 4000,
        }
    }

    fn begin(manager: &mut HandoffManager, session: u64, now: u64) -> InitiateOutcome {
        manager.begin(
            SessionId(session),
            "Brin",
            "zone1:r1".parse().unwrap(),
            "zone2:r1".parse().unwrap(),
            target(),
            now,
        )
    }

    #[test]
    fn second_initiation_is_rejected_while_in_transit() {
        let mut manager = HandoffManager::new(5_000);
        assert_eq!(
            begin(&mut manager, 1, 0),
            InitiateOutcome::Initiated(target())
        );
        assert_eq!(begin(&mut manager, 1, 10), InitiateOutcome::AlreadyInTransit);
        assert!(manager.is_in_transit(SessionId(1)));
    }

    #[test]
    fn ack_consumes_the_pending_entry() {
        let mut manager = HandoffManager::new(5_000);
        begin(&mut manager, 1, 0);
        let pending = manager.handle_ack(SessionId(1)).unwrap();
        assert_eq!(pending.target_room_id, "zone2:r1".parse().unwrap());
        // A late duplicate ack finds nothing.
        assert!(manager.handle_ack(SessionId(1)).is_none());
    }

    #[test]
    fn expiry_sweep_returns_only_overdue_entries() {
        let mut manager = HandoffManager::new(5_000);
        begin(&mut manager, 1, 0);
        begin(&mut manager, 2, 3_000);

        assert!(manager.expire_timed_out(4_999).is_empty());
        let expired = manager.expire_timed_out(5_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, SessionId(1));
        assert!(manager.is_in_transit(SessionId(2)));
    }

    #[test]
    fn cancel_clears_pending_state() {
        let mut manager = HandoffManager::new(5_000);
        begin(&mut manager, 1, 0);
        assert!(manager.cancel_if_pending(SessionId(1)).is_some());
        assert!(!manager.is_in_transit(SessionId(1)));
    }
}
