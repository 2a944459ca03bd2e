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

//! The set of identifiers, entities and event types used across the system,
//! plus the layered configuration surface and tracing initialization.

pub mod bus;
pub mod config;
pub mod events;
pub mod ids;
pub mod model;
pub mod tracing;

pub use bus::{InboundBus, InboundBusSender, InboundSendError};
pub use events::{InboundEvent, MessageKind, Outbound, OutboundEvent, PromptSpec, TransportKind};
pub use ids::{Direction, EngineId, ItemTemplateId, MobId, PlayerId, RoomId, SessionId, ZoneId};

/// The default command prompt, rendered after every completed command path.
pub const DEFAULT_PROMPT: &str = "> ";
