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

//! Session-side half of the transport layer: the outbound router fans a
//! single stream of engine events out to bounded per-session frame queues,
//! applying rendering, prompt coalescing and the outbound backpressure
//! policy. Transports own the other half: socket I/O and line decoding.

mod renderer;
mod router;
mod sink;

pub use renderer::{AnsiRenderer, PlainRenderer, Renderer};
pub use router::{OutboundRouter, RouterControl, RouterHandle};
pub use sink::{CloseFn, Frame, SessionSink};

/// Reason string used when a session is terminated for not draining its
/// outbound queue. Matched verbatim by tests and operational alarms.
pub const BACKPRESSURE_CLOSE_REASON: &str = "client too slow (outbound backpressure)";
