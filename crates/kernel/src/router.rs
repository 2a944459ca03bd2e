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

//! Command dispatch: a manual table from command discriminant to handler,
//! populated at startup. A command with no registered handler is silently
//! ignored.

use crate::command::{Command, CommandKind};
use crate::engine::Engine;
use ambonmud_common::ids::SessionId;
use std::collections::HashMap;
use tracing::trace;

pub type Handler = fn(&mut Engine, SessionId, Command);

pub struct CommandRouter {
    handlers: HashMap<CommandKind, Handler>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: CommandKind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    pub fn handle(&self, engine: &mut Engine, session_id: SessionId, command: Command) {
        match self.handlers.get(&command.kind()) {
            Some(handler) => handler(engine, session_id, command),
            None => trace!(%session_id, kind = ?command.kind(), "no handler registered"),
        }
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        crate::commands::default_router()
    }
}
