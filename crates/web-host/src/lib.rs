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

//! The framed (WebSocket) transport. Text frames split into sanitized
//! lines; frames shaped `{"gmcp": "<Package>", "data": <json>}` bypass line
//! handling entirely and arrive as structured events.

mod ws;

pub use ws::{parse_gmcp_envelope, split_frame_lines, WebHost, WebHostState};

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::info;

impl WebHost {
    pub async fn run(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let state = self.state.clone();
        let app = Router::new()
            .route("/ws", get(ws::ws_upgrade))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "websocket listener up");

        let kill_switch = self.state.kill_switch.clone();
        let grace = Duration::from_millis(self.state.stop_grace_millis);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                loop {
                    if kill_switch.load(Ordering::Relaxed) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                // Grace period lets in-flight goodbyes drain.
                tokio::time::sleep(grace).await;
            })
            .await?;
        info!("websocket listener stopped");
        Ok(())
    }
}
