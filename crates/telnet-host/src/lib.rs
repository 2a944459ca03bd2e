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

//! The raw TCP transport. One listener task accepts connections; each
//! connection runs a reader loop (line decoding, inbound backpressure) and a
//! writer loop (draining the session's frame queue to the wire).

mod codec;
mod connection;
mod listen;

pub use codec::{LineDecoder, ProtocolViolation};
pub use listen::TelnetHost;
