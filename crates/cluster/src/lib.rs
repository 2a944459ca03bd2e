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

//! The cluster fabric: inter-engine messaging, zone ownership, instancing
//! and the distributed player location index. A single-engine deployment
//! uses the loopback bus and the static registry; a sharded one swaps in
//! the Redis-backed implementations without touching the kernel.

mod bus;
mod instancing;
mod messages;
mod player_index;
mod redis_bus;
mod redis_registry;
mod registry;

pub use bus::{InterEngineBus, LocalBus};
pub use instancing::{select_instance, ScaleAction, ScaleDecision, ThresholdScaler};
pub use messages::{Envelope, EngineMessage, WhoPlayer};
pub use player_index::{NullPlayerIndex, PlayerLocationIndex, RedisPlayerIndex};
pub use redis_bus::RedisBus;
pub use redis_registry::RedisZoneRegistry;
pub use registry::{
    AssignmentsView, RegistryError, StaticZoneRegistry, ZoneInstance, ZoneRegistry,
};
