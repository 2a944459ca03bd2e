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

//! The inter-engine message taxonomy. Serialized as JSON with a `type`
//! discriminator; the envelope carries routing metadata on the wire.

use ambonmud_common::ids::{EngineId, RoomId, SessionId};
use ambonmud_common::model::SerializedPlayerState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WhoPlayer {
    pub name: String,
    pub level: u32,
    pub zone: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineMessage {
    /// A game-wide channel line (gossip, announcements).
    GlobalBroadcast {
        kind: String,
        sender_name: String,
        text: String,
        source_engine_id: EngineId,
    },
    /// A private message routed to whichever engine hosts `to`.
    TellMessage {
        from: String,
        to: String,
        text: String,
    },
    WhoRequest {
        request_id: Uuid,
        reply_to_engine_id: EngineId,
    },
    WhoResponse {
        request_id: Uuid,
        players: Vec<WhoPlayer>,
    },
    KickRequest {
        target_name: String,
    },
    ShutdownRequest {
        initiator: String,
    },
    /// The full migration payload sent to the engine that owns the
    /// destination zone.
    PlayerHandoff {
        session_id: SessionId,
        target_room_id: RoomId,
        player_state: SerializedPlayerState,
        gateway_id: String,
        source_engine_id: EngineId,
    },
    HandoffAck {
        session_id: SessionId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    /// Tells the gateway hosting `session_id` to re-home the connection.
    SessionRedirect {
        session_id: SessionId,
        new_engine_id: EngineId,
        new_host: String,
        new_port: u16,
    },
    /// Staff-initiated transfer of a player to a room, possibly remote.
    TransferRequest {
        staff: String,
        target: String,
        target_room_id: RoomId,
    },
}

/// Wire envelope for the pub/sub fabric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_engine_id: EngineId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_engine_id: Option<EngineId>,
    pub payload: EngineMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambonmud_common::model::{PlayerRecord, Stats};
    use pretty_assertions::assert_eq;

    #[test]
    fn discriminator_is_the_variant_name() {
        let msg = EngineMessage::KickRequest {
            target_name: "Brin".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "KickRequest");
    }

    #[test]
    fn envelope_roundtrip_with_handoff_payload() {
        let record = PlayerRecord {
            id: ambonmud_common::PlayerId(3),
            name: "Brin".into(),
            password_hash: None,
            room_id: "zone2:r1".parse().unwrap(),
            hp: 11,
            max_hp: 20,
            mana: 4,
            max_mana: 10,
            level: 2,
            xp_total: 150,
            stats: Stats::default(),
            is_staff: false,
            account_bound: true,
            inventory: vec![],
            equipment: Default::default(),
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        let envelope = Envelope {
            sender_engine_id: EngineId::from("engine-a"),
            target_engine_id: Some(EngineId::from("engine-b")),
            payload: EngineMessage::PlayerHandoff {
                session_id: SessionId(9),
                target_room_id: "zone2:r1".parse().unwrap(),
                player_state: SerializedPlayerState {
                    record,
                    ansi_enabled: false,
                    transport: ambonmud_common::TransportKind::Telnet,
                },
                gateway_id: "gw-1".into(),
                source_engine_id: EngineId::from("engine-a"),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }
}
