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

use crate::connection::TelnetConnection;
use ambonmud_common::config::TransportConfig;
use ambonmud_common::{InboundBusSender, SessionId};
use ambonmud_session::RouterHandle;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// The telnet listener. Session ids come from an allocator shared with the
/// other transports so ids stay unique across the whole gateway.
pub struct TelnetHost {
    pub inbound: InboundBusSender,
    pub router: RouterHandle,
    pub transport_config: TransportConfig,
    pub queue_capacity: usize,
    pub session_ids: Arc<AtomicU64>,
    pub kill_switch: Arc<AtomicBool>,
}

impl TelnetHost {
    pub async fn run(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "telnet listener up");
        let mut shutdown_poll = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = shutdown_poll.tick() => {
                    if self.kill_switch.load(Ordering::Relaxed) {
                        info!("telnet listener stopping");
                        return Ok(());
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let session_id = SessionId(self.session_ids.fetch_add(1, Ordering::SeqCst));
                    info!(%session_id, %peer, "telnet connection accepted");
                    let connection = TelnetConnection {
                        session_id,
                        stream,
                        inbound: self.inbound.clone(),
                        router: self.router.clone(),
                        transport_config: self.transport_config.clone(),
                        queue_capacity: self.queue_capacity,
                    };
                    tokio::spawn(connection.run());
                }
            }
        }
    }
}
