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

//! The engine kernel: authoritative world state and the single-writer tick
//! loop that mutates it. Everything the engine needs from the outside world
//! (sockets, Redis, the database) arrives through channels or is delegated
//! to workers; the tick loop itself never blocks on I/O.

pub mod auth;
pub mod command;
pub mod commands;
pub mod engine;
pub mod handoff;
pub mod registry;
pub mod router;
pub mod systems;
pub mod world;

pub use command::{parse_command, Command};
pub use engine::{Engine, EngineDeps};
pub use handoff::{HandoffManager, InitiateOutcome, PendingHandoff};
pub use world::{World, WorldError};

/// Milliseconds since the Unix epoch. All engine timestamps use this clock.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
