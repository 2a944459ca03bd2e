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

//! The persistence pipeline. The engine saves eagerly on every mutation of
//! interest; the write-behind layer coalesces those saves in a dirty set and
//! a background worker flushes them to the backing store. Persistence
//! failures never propagate into the engine.

mod cache;
mod repository;
mod sql;
mod write_behind;
mod yaml;

pub use cache::CachedRepository;
pub use repository::{slugify_name, PlayerRepository, RepositoryError};
pub use sql::PgPlayerRepository;
pub use write_behind::{WriteBehind, WriteBehindWorker};
pub use yaml::FilePlayerRepository;
