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

//! Inbound and outbound event types. Transports produce inbound events onto
//! the inbound bus; the engine produces outbound events consumed by the
//! outbound router, which renders them into frames on per-session queues.

use crate::ids::{EngineId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which transport a session arrived over. Affects the default renderer and
/// whether structured frames are deliverable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Telnet,
    WebSocket,
}

/// Events produced by transports, consumed by the engine loop. For a given
/// session, events preserve arrival order into the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// A client finished connecting and its outbound sink is registered.
    Connected {
        session_id: SessionId,
        transport: TransportKind,
    },
    /// One complete, sanitized input line.
    LineReceived { session_id: SessionId, line: String },
    /// An out-of-band structured payload (web transport only); bypasses the
    /// command parser entirely.
    StructuredReceived {
        session_id: SessionId,
        package: String,
        data: Value,
    },
    /// The connection terminated, either by the client or by policy.
    Disconnected { session_id: SessionId, reason: String },
}

impl InboundEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            InboundEvent::Connected { session_id, .. }
            | InboundEvent::LineReceived { session_id, .. }
            | InboundEvent::StructuredReceived { session_id, .. }
            | InboundEvent::Disconnected { session_id, .. } => *session_id,
        }
    }
}

/// Classification of a rendered line, used by the ANSI renderer to pick SGR
/// styling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Info,
    Error,
}

/// What a prompt looks like. Carried on the event rather than looked up at
/// render time so the router stays stateless about player data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSpec {
    pub text: String,
    pub hp: i32,
    pub max_hp: i32,
    pub mana: i32,
    pub max_mana: i32,
}

impl Default for PromptSpec {
    fn default() -> Self {
        Self {
            text: crate::DEFAULT_PROMPT.to_string(),
            hp: 0,
            max_hp: 0,
            mana: 0,
            max_mana: 0,
        }
    }
}

/// A typed outbound event tagged with the session it targets.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundEvent {
    pub session_id: SessionId,
    pub event: Outbound,
}

impl OutboundEvent {
    pub fn new(session_id: SessionId, event: Outbound) -> Self {
        Self { session_id, event }
    }
}

/// The outbound event taxonomy drained by the router.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    SendText(String),
    SendInfo(String),
    SendError(String),
    SendPrompt(PromptSpec),
    SetAnsi(bool),
    ClearScreen,
    ShowAnsiDemo,
    ShowLoginScreen,
    /// Out-of-band structured payload for framed clients.
    Structured { package: String, data: Value },
    /// Instructs the gateway to re-home this session onto another engine.
    SessionRedirect {
        new_engine_id: EngineId,
        new_host: String,
        new_port: u16,
    },
    /// Goodbye line, then the session's close function is invoked.
    Close { reason: String },
}
