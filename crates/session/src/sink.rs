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

use crate::renderer::Renderer;
use ambonmud_common::{SessionId, TransportKind};
use serde_json::Value;

/// Frames are what actually travels on a session's outbound queue. The
/// transport write loop drains these to the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Text(String),
    Structured { package: String, data: Value },
}

/// Invoked at most once to forcefully terminate the transport connection.
pub type CloseFn = Box<dyn FnOnce(String) + Send>;

/// Router-side state for one connected client. Exactly one outbound queue
/// per live session; the transport holds the receiver half.
pub struct SessionSink {
    pub session_id: SessionId,
    pub transport: TransportKind,
    pub queue: flume::Sender<Frame>,
    pub renderer: Box<dyn Renderer>,
    pub last_enqueued_was_prompt: bool,
    close_fn: Option<CloseFn>,
}

impl SessionSink {
    pub fn new(
        session_id: SessionId,
        transport: TransportKind,
        queue: flume::Sender<Frame>,
        renderer: Box<dyn Renderer>,
        close_fn: CloseFn,
    ) -> Self {
        Self {
            session_id,
            transport,
            queue,
            renderer,
            last_enqueued_was_prompt: false,
            close_fn: Some(close_fn),
        }
    }

    /// Invokes the transport close function, exactly once. Subsequent calls
    /// are no-ops.
    pub fn close(&mut self, reason: &str) {
        if let Some(close_fn) = self.close_fn.take() {
            close_fn(reason.to_string());
        }
    }
}
