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

//! Single consumer of the engine's outbound event stream. Renders events
//! into frames and enqueues them onto per-session bounded queues.
//!
//! The backpressure policy is the load-bearing invariant here: enqueue is
//! always non-blocking. Prompts are disposable and silently dropped when the
//! queue refuses them; any other refused frame terminates the session.

use crate::sink::{Frame, SessionSink};
use crate::renderer::{AnsiRenderer, PlainRenderer};
use crate::BACKPRESSURE_CLOSE_REASON;
use ambonmud_common::{MessageKind, Outbound, OutboundEvent, SessionId, TransportKind};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Sink registration and removal, delivered out-of-band from the event
/// stream so transports never race the engine for the routing map.
pub enum RouterControl {
    Register(SessionSink),
    Unregister(SessionId),
}

/// Cloneable producer half used by the engine and by transports.
#[derive(Clone)]
pub struct RouterHandle {
    events: flume::Sender<OutboundEvent>,
    control: flume::Sender<RouterControl>,
}

impl RouterHandle {
    /// Emit one outbound event. Non-blocking; a full event channel drops the
    /// event with a warning rather than stalling the caller.
    pub fn emit(&self, session_id: SessionId, event: Outbound) {
        if self
            .events
            .try_send(OutboundEvent::new(session_id, event))
            .is_err()
        {
            warn!(%session_id, "outbound event channel full, dropping event");
        }
    }

    pub fn register(&self, sink: SessionSink) {
        let _ = self.control.send(RouterControl::Register(sink));
    }

    pub fn unregister(&self, session_id: SessionId) {
        let _ = self.control.send(RouterControl::Unregister(session_id));
    }
}

pub struct OutboundRouter {
    sessions: HashMap<SessionId, SessionSink>,
}

impl OutboundRouter {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Builds the router channel pair without spawning anything; callers
    /// drive `run` (production) or pump the receivers directly (tests).
    pub fn channels(
        event_capacity: usize,
    ) -> (
        RouterHandle,
        flume::Receiver<OutboundEvent>,
        flume::Receiver<RouterControl>,
    ) {
        let (event_tx, event_rx) = flume::bounded(event_capacity);
        let (control_tx, control_rx) = flume::unbounded();
        let handle = RouterHandle {
            events: event_tx,
            control: control_tx,
        };
        (handle, event_rx, control_rx)
    }

    /// Builds the router channels and spawns the drain loop.
    pub fn start(
        event_capacity: usize,
        kill_switch: Arc<AtomicBool>,
    ) -> (RouterHandle, tokio::task::JoinHandle<()>) {
        let (handle, event_rx, control_rx) = Self::channels(event_capacity);
        let router = OutboundRouter::new();
        let join = tokio::spawn(router.run(event_rx, control_rx, kill_switch));
        (handle, join)
    }

    pub async fn run(
        mut self,
        events: flume::Receiver<OutboundEvent>,
        control: flume::Receiver<RouterControl>,
        kill_switch: Arc<AtomicBool>,
    ) {
        loop {
            if kill_switch.load(Ordering::Relaxed) {
                debug!("outbound router stopping");
                break;
            }
            tokio::select! {
                msg = control.recv_async() => match msg {
                    Ok(msg) => self.apply_control(msg),
                    Err(_) => break,
                },
                ev = events.recv_async() => match ev {
                    Ok(ev) => self.dispatch(ev),
                    Err(_) => break,
                },
            }
        }
        // Orderly teardown of whatever sinks remain.
        let ids: Vec<_> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(mut sink) = self.sessions.remove(&id) {
                sink.close("server shutting down");
            }
        }
    }

    pub fn apply_control(&mut self, msg: RouterControl) {
        match msg {
            RouterControl::Register(sink) => {
                trace!(session_id = %sink.session_id, "sink registered");
                self.sessions.insert(sink.session_id, sink);
            }
            RouterControl::Unregister(session_id) => {
                trace!(%session_id, "sink unregistered");
                self.sessions.remove(&session_id);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn dispatch(&mut self, ev: OutboundEvent) {
        let OutboundEvent { session_id, event } = ev;
        let Some(sink) = self.sessions.get_mut(&session_id) else {
            // Session already gone; late events are expected and dropped.
            return;
        };

        let frame = match event {
            Outbound::SendText(text) => {
                Some((Frame::Text(sink.renderer.render_line(&text, MessageKind::Normal)), false))
            }
            Outbound::SendInfo(text) => {
                Some((Frame::Text(sink.renderer.render_line(&text, MessageKind::Info)), false))
            }
            Outbound::SendError(text) => {
                Some((Frame::Text(sink.renderer.render_line(&text, MessageKind::Error)), false))
            }
            Outbound::SendPrompt(spec) => {
                if sink.last_enqueued_was_prompt {
                    // Coalesce: the client already has a prompt pending.
                    return;
                }
                Some((Frame::Text(sink.renderer.render_prompt(&spec)), true))
            }
            Outbound::SetAnsi(enabled) => {
                sink.renderer = if enabled {
                    Box::new(AnsiRenderer)
                } else {
                    Box::new(PlainRenderer)
                };
                None
            }
            Outbound::ClearScreen => Some((Frame::Text(sink.renderer.clear_screen()), false)),
            Outbound::ShowAnsiDemo => Some((Frame::Text(sink.renderer.ansi_demo()), false)),
            Outbound::ShowLoginScreen => Some((Frame::Text(sink.renderer.login_screen()), false)),
            Outbound::Structured { package, data } => match sink.transport {
                TransportKind::WebSocket => Some((Frame::Structured { package, data }, false)),
                // Line-based clients have no out-of-band channel.
                TransportKind::Telnet => None,
            },
            Outbound::SessionRedirect {
                new_engine_id,
                new_host,
                new_port,
            } => match sink.transport {
                TransportKind::WebSocket => Some((
                    Frame::Structured {
                        package: "Session.Redirect".to_string(),
                        data: json!({
                            "engineId": new_engine_id.as_str(),
                            "host": new_host,
                            "port": new_port,
                        }),
                    },
                    false,
                )),
                TransportKind::Telnet => Some((
                    Frame::Text(sink.renderer.render_line(
                        &format!("Reconnecting you to {new_host}:{new_port}..."),
                        MessageKind::Info,
                    )),
                    false,
                )),
            },
            Outbound::Close { reason } => {
                let goodbye = sink
                    .renderer
                    .render_line(&format!("Goodbye. ({reason})"), MessageKind::Info);
                // Best effort; the session is going away either way.
                let _ = sink.queue.try_send(Frame::Text(goodbye));
                let mut sink = self
                    .sessions
                    .remove(&session_id)
                    .expect("sink present above");
                sink.close(&reason);
                return;
            }
        };

        let Some((frame, is_prompt)) = frame else {
            return;
        };

        match sink.queue.try_send(frame) {
            Ok(()) => {
                sink.last_enqueued_was_prompt = is_prompt;
            }
            Err(_) if is_prompt => {
                // Prompts are disposable.
                trace!(%session_id, "prompt dropped on full queue");
            }
            Err(_) => {
                // A slow client refused a real frame: terminate it. Removing
                // the sink drops the queue sender, which closes the queue.
                warn!(%session_id, "outbound queue refused frame, disconnecting slow client");
                let mut sink = self
                    .sessions
                    .remove(&session_id)
                    .expect("sink present above");
                sink.close(BACKPRESSURE_CLOSE_REASON);
            }
        }
    }
}

impl Default for OutboundRouter {
    fn default() -> Self {
        Self::new()
    }
}
