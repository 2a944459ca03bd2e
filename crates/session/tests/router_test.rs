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

use ambonmud_common::{Outbound, OutboundEvent, PromptSpec, SessionId, TransportKind};
use ambonmud_session::{
    Frame, OutboundRouter, PlainRenderer, RouterControl, SessionSink, BACKPRESSURE_CLOSE_REASON,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn attach(
    router: &mut OutboundRouter,
    id: u64,
    capacity: usize,
) -> (flume::Receiver<Frame>, Arc<AtomicUsize>, Arc<Mutex<String>>) {
    let (tx, rx) = flume::bounded(capacity);
    let close_count = Arc::new(AtomicUsize::new(0));
    let close_reason = Arc::new(Mutex::new(String::new()));
    let count = close_count.clone();
    let reason = close_reason.clone();
    let sink = SessionSink::new(
        SessionId(id),
        TransportKind::Telnet,
        tx,
        Box::new(PlainRenderer),
        Box::new(move |r| {
            count.fetch_add(1, Ordering::SeqCst);
            *reason.lock().unwrap() = r;
        }),
    );
    router.apply_control(RouterControl::Register(sink));
    (rx, close_count, close_reason)
}

fn ev(id: u64, event: Outbound) -> OutboundEvent {
    OutboundEvent::new(SessionId(id), event)
}

#[test]
fn prompt_coalescing() {
    let mut router = OutboundRouter::new();
    let (rx, ..) = attach(&mut router, 1, 16);

    router.dispatch(ev(1, Outbound::SendText("hi".into())));
    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));
    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));
    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));

    let frames: Vec<_> = rx.drain().collect();
    assert_eq!(
        frames,
        vec![Frame::Text("hi\r\n".into()), Frame::Text("> ".into())]
    );
}

#[test]
fn non_prompt_clears_coalescing_flag() {
    let mut router = OutboundRouter::new();
    let (rx, ..) = attach(&mut router, 1, 16);

    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));
    router.dispatch(ev(1, Outbound::SendText("tick".into())));
    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));

    assert_eq!(rx.drain().count(), 3);
}

#[test]
fn queue_capacity_one_coalesces_rapid_prompts() {
    let mut router = OutboundRouter::new();
    let (rx, close_count, _) = attach(&mut router, 1, 1);

    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));
    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));

    assert_eq!(rx.drain().count(), 1);
    assert_eq!(close_count.load(Ordering::SeqCst), 0);
}

#[test]
fn slow_client_disconnects_exactly_once() {
    let mut router = OutboundRouter::new();
    let (rx, close_count, close_reason) = attach(&mut router, 1, 2);

    for i in 0..10 {
        router.dispatch(ev(1, Outbound::SendText(format!("line {i}"))));
    }

    // Exactly the first two frames were delivered, then the session died.
    let frames: Vec<_> = rx.drain().collect();
    assert_eq!(
        frames,
        vec![
            Frame::Text("line 0\r\n".into()),
            Frame::Text("line 1\r\n".into())
        ]
    );
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
    assert_eq!(*close_reason.lock().unwrap(), BACKPRESSURE_CLOSE_REASON);
    assert_eq!(router.session_count(), 0);
}

#[test]
fn overflowing_prompt_is_dropped_without_close() {
    let mut router = OutboundRouter::new();
    let (rx, close_count, _) = attach(&mut router, 1, 1);

    router.dispatch(ev(1, Outbound::SendText("hold".into())));
    // Queue is now full; a prompt must be silently discarded.
    router.dispatch(ev(1, Outbound::SendPrompt(PromptSpec::default())));

    assert_eq!(rx.drain().count(), 1);
    assert_eq!(close_count.load(Ordering::SeqCst), 0);
    assert_eq!(router.session_count(), 1);
}

#[test]
fn structured_frames_are_dropped_for_telnet() {
    let mut router = OutboundRouter::new();
    let (rx, ..) = attach(&mut router, 1, 16);

    router.dispatch(ev(
        1,
        Outbound::Structured {
            package: "Char.Vitals".into(),
            data: serde_json::json!({"hp": 10}),
        },
    ));
    assert_eq!(rx.drain().count(), 0);
}

#[test]
fn close_delivers_goodbye_and_unregisters() {
    let mut router = OutboundRouter::new();
    let (rx, close_count, close_reason) = attach(&mut router, 1, 16);

    router.dispatch(ev(
        1,
        Outbound::Close {
            reason: "quit".into(),
        },
    ));

    let frames: Vec<_> = rx.drain().collect();
    assert_eq!(frames, vec![Frame::Text("Goodbye. (quit)\r\n".into())]);
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
    assert_eq!(*close_reason.lock().unwrap(), "quit");
    assert_eq!(router.session_count(), 0);
}

#[test]
fn events_for_unknown_sessions_are_ignored() {
    let mut router = OutboundRouter::new();
    router.dispatch(ev(42, Outbound::SendText("into the void".into())));
    assert_eq!(router.session_count(), 0);
}
