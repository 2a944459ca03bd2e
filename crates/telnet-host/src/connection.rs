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

//! One accepted TCP connection: a reader loop feeding the inbound bus and a
//! writer loop draining the session's frame queue. The reader owns the
//! single `Disconnected` emission.

use crate::codec::LineDecoder;
use ambonmud_common::config::TransportConfig;
use ambonmud_common::{InboundBusSender, InboundEvent, InboundSendError, SessionId, TransportKind};
use ambonmud_session::{Frame, PlainRenderer, RouterHandle, SessionSink};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

pub(crate) struct TelnetConnection {
    pub session_id: SessionId,
    pub stream: TcpStream,
    pub inbound: InboundBusSender,
    pub router: RouterHandle,
    pub transport_config: TransportConfig,
    pub queue_capacity: usize,
}

impl TelnetConnection {
    pub async fn run(self) {
        let TelnetConnection {
            session_id,
            stream,
            inbound,
            router,
            transport_config,
            queue_capacity,
        } = self;

        let (read_half, mut write_half) = stream.into_split();
        let (frame_tx, frame_rx) = flume::bounded::<Frame>(queue_capacity);
        let (close_tx, close_rx) = flume::bounded::<String>(1);

        router.register(SessionSink::new(
            session_id,
            TransportKind::Telnet,
            frame_tx,
            Box::new(PlainRenderer),
            Box::new(move |reason| {
                let _ = close_tx.try_send(reason);
            }),
        ));

        if inbound
            .try_send(InboundEvent::Connected {
                session_id,
                transport: TransportKind::Telnet,
            })
            .is_err()
        {
            warn!(%session_id, "inbound bus refused Connected, dropping connection");
            router.unregister(session_id);
            return;
        }

        // Writer: session queue -> socket. Ends when the sink is dropped
        // (backpressure kill or unregister) or the socket dies.
        let writer = tokio::spawn(async move {
            while let Ok(frame) = frame_rx.recv_async().await {
                let Frame::Text(text) = frame else {
                    // Structured frames have no representation on raw telnet.
                    continue;
                };
                if write_half.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        // Reader: socket -> inbound bus, with the line decoder enforcing
        // protocol limits and a counter enforcing inbound backpressure.
        let decoder = LineDecoder::new(
            transport_config.telnet.max_line_len,
            transport_config.telnet.max_non_printable_per_line,
        );
        let mut lines = FramedRead::new(read_half, decoder);
        let max_failures = transport_config.max_inbound_backpressure_failures.0;
        let mut backpressure_failures = 0u32;

        let reason: String = loop {
            tokio::select! {
                closed = close_rx.recv_async() => {
                    break closed.unwrap_or_else(|_| "connection closed".to_string());
                }
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        trace!(%session_id, ?line, "line received");
                        match inbound.try_send(InboundEvent::LineReceived { session_id, line }) {
                            Ok(()) => backpressure_failures = 0,
                            Err(InboundSendError::Full) => {
                                backpressure_failures += 1;
                                if backpressure_failures >= max_failures {
                                    break "inbound backpressure".to_string();
                                }
                            }
                            Err(InboundSendError::Closed) => {
                                break "server shutting down".to_string();
                            }
                        }
                    }
                    Some(Err(violation)) => {
                        debug!(%session_id, %violation, "protocol violation");
                        break format!("protocol violation: {violation}");
                    }
                    None => break "client disconnected".to_string(),
                },
            }
        };

        debug!(%session_id, reason, "telnet connection ended");
        // Unregistering drops the queue sender, so the writer drains any
        // goodbye frames and exits on its own.
        router.unregister(session_id);
        let _ = inbound.try_send(InboundEvent::Disconnected { session_id, reason });
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), writer).await;
    }
}
