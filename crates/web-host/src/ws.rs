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

use ambonmud_common::config::TransportConfig;
use ambonmud_common::{InboundBusSender, InboundEvent, InboundSendError, SessionId, TransportKind};
use ambonmud_session::{Frame, PlainRenderer, RouterHandle, SessionSink};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Clone)]
pub struct WebHostState {
    pub inbound: InboundBusSender,
    pub router: RouterHandle,
    pub transport_config: TransportConfig,
    pub queue_capacity: usize,
    pub session_ids: Arc<AtomicU64>,
    pub kill_switch: Arc<AtomicBool>,
    pub stop_grace_millis: u64,
}

pub struct WebHost {
    pub state: WebHostState,
}

/// Splits one inbound text frame into lines on `\r\n`, `\n` or `\r`, with
/// the same sanitization rules as the telnet decoder. An empty frame yields
/// a single empty line.
pub fn split_frame_lines(
    frame: &str,
    max_line_len: usize,
    max_non_printable_per_line: usize,
) -> Result<Vec<String>, String> {
    let mut lines = Vec::new();
    for raw in frame.split(['\n', '\r']).map(str::to_string) {
        if raw.len() > max_line_len {
            return Err(format!("line exceeds {max_line_len} bytes"));
        }
        let non_printable = raw
            .bytes()
            .filter(|b| !((0x20..=0x7E).contains(b) || *b == b'\t'))
            .count();
        if non_printable > max_non_printable_per_line {
            return Err("too many non-printable bytes in one line".to_string());
        }
        lines.push(raw);
    }
    // "\r\n" shows up as an empty middle element from the double split;
    // collapse those while keeping a genuinely empty frame as one line.
    if lines.len() > 1 {
        lines.retain(|l| !l.is_empty());
        if lines.is_empty() {
            lines.push(String::new());
        }
    }
    Ok(lines)
}

/// Parses the out-of-band envelope `{"gmcp": "<Package>", "data": <json>}`.
/// Anything that is not exactly that shape is ordinary line input.
pub fn parse_gmcp_envelope(frame: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(frame).ok()?;
    let obj = value.as_object()?;
    let package = obj.get("gmcp")?.as_str()?.to_string();
    let data = obj.get("data")?.clone();
    Some((package, data))
}

pub async fn ws_upgrade(
    State(state): State<WebHostState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: WebHostState, socket: WebSocket) {
    let session_id = SessionId(state.session_ids.fetch_add(1, Ordering::SeqCst));
    info!(%session_id, "websocket connection accepted");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, frame_rx) = flume::bounded::<Frame>(state.queue_capacity);
    let (close_tx, close_rx) = flume::bounded::<String>(1);

    state.router.register(SessionSink::new(
        session_id,
        TransportKind::WebSocket,
        frame_tx,
        Box::new(PlainRenderer),
        Box::new(move |reason| {
            let _ = close_tx.try_send(reason);
        }),
    ));
    if state
        .inbound
        .try_send(InboundEvent::Connected {
            session_id,
            transport: TransportKind::WebSocket,
        })
        .is_err()
    {
        warn!(%session_id, "inbound bus refused Connected, dropping connection");
        state.router.unregister(session_id);
        return;
    }

    // Writer: frame queue -> websocket messages.
    let writer = tokio::spawn(async move {
        while let Ok(frame) = frame_rx.recv_async().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text.into()),
                Frame::Structured { package, data } => {
                    match serde_json::to_string(&json!({ "gmcp": package, "data": data })) {
                        Ok(envelope) => Message::Text(envelope.into()),
                        Err(e) => {
                            warn!(error = %e, "unserializable structured frame");
                            continue;
                        }
                    }
                }
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let telnet_limits = &state.transport_config.telnet;
    let max_failures = state.transport_config.max_inbound_backpressure_failures.0;
    let mut backpressure_failures = 0u32;

    let reason: String = loop {
        tokio::select! {
            closed = close_rx.recv_async() => {
                break closed.unwrap_or_else(|_| "connection closed".to_string());
            }
            incoming = ws_rx.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => break format!("websocket error: {e}"),
                    None => break "client disconnected".to_string(),
                };
                match message {
                    Message::Text(text) => {
                        let mut events = Vec::new();
                        if let Some((package, data)) = parse_gmcp_envelope(&text) {
                            trace!(%session_id, package, "gmcp frame");
                            events.push(InboundEvent::StructuredReceived {
                                session_id,
                                package,
                                data,
                            });
                        } else {
                            match split_frame_lines(
                                &text,
                                telnet_limits.max_line_len,
                                telnet_limits.max_non_printable_per_line,
                            ) {
                                Ok(lines) => events.extend(lines.into_iter().map(|line| {
                                    InboundEvent::LineReceived { session_id, line }
                                })),
                                Err(violation) => {
                                    debug!(%session_id, violation, "protocol violation");
                                    break format!("protocol violation: {violation}");
                                }
                            }
                        }
                        let mut failed = false;
                        for event in events {
                            match state.inbound.try_send(event) {
                                Ok(()) => backpressure_failures = 0,
                                Err(InboundSendError::Full) => {
                                    backpressure_failures += 1;
                                    if backpressure_failures >= max_failures {
                                        failed = true;
                                        break;
                                    }
                                }
                                Err(InboundSendError::Closed) => {
                                    failed = true;
                                    break;
                                }
                            }
                        }
                        if failed {
                            break "inbound backpressure".to_string();
                        }
                    }
                    Message::Close(_) => break "client disconnected".to_string(),
                    // Binary, ping and pong frames carry no game input.
                    _ => {}
                }
            }
        }
    };

    debug!(%session_id, reason, "websocket connection ended");
    state.router.unregister(session_id);
    let _ = state
        .inbound
        .try_send(InboundEvent::Disconnected { session_id, reason });
    let _ = tokio::time::timeout(
        std::time::Duration::from_millis(state.transport_config.websocket.stop_timeout_millis),
        writer,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frames_split_on_all_line_endings() {
        let lines = split_frame_lines("look\r\nnorth\rsouth\n", 512, 8).unwrap();
        assert_eq!(
            lines,
            vec!["look".to_string(), "north".to_string(), "south".to_string()]
        );
    }

    #[test]
    fn empty_frame_is_one_empty_line() {
        assert_eq!(split_frame_lines("", 512, 8).unwrap(), vec![String::new()]);
    }

    #[test]
    fn single_line_without_terminator() {
        assert_eq!(
            split_frame_lines("look", 512, 8).unwrap(),
            vec!["look".to_string()]
        );
    }

    #[test]
    fn oversized_line_is_a_violation() {
        assert!(split_frame_lines("abcdefghi", 8, 8).is_err());
        assert!(split_frame_lines("abcdefgh", 8, 8).is_ok());
    }

    #[test]
    fn gmcp_envelope_parses_with_tolerant_whitespace() {
        let (package, data) =
            parse_gmcp_envelope("  { \"gmcp\" : \"Session.Prefs\", \"data\": {\"ansi\": true} } ")
                .unwrap();
        assert_eq!(package, "Session.Prefs");
        assert_eq!(data["ansi"], true);
    }

    #[test]
    fn non_envelopes_fall_through_to_lines() {
        assert!(parse_gmcp_envelope("look").is_none());
        assert!(parse_gmcp_envelope("{\"gmcp\": 42, \"data\": {}}").is_none());
        assert!(parse_gmcp_envelope("{\"gmcp\": \"X\"}").is_none());
    }
}
