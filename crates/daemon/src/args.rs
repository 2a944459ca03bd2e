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

use clap_derive::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ambonmud-daemon", about = "The AmbonMUD server daemon")]
pub struct Args {
    /// Layered YAML configuration file; AMBONMUD_* environment variables
    /// override individual keys.
    #[arg(long, value_name = "config", help = "Path to the server configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}
