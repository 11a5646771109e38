/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! WebSocket session lifecycle: `Idle → Connecting → Open → Ready →
//! Closed`, with `Reconnecting` looping back to `Connecting` on
//! unexpected closure.
//!
//! There's no socket of its own in the HTTP-bridge variant of this
//! protocol (its `communications` crate talks HTTP); this module is
//! grounded on `helius-labs-laserstream-sdk`'s
//! `client.rs` reconnect-with-backoff loop, adapted to the state names
//! and settle delay this protocol needs, and wired to `tokio-tungstenite`
//! the way that SDK wires its own streaming transport.

use crate::config::PushConfiguration;
use crate::error::{PushError, Result};
use crate::message::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    /// TCP/TLS/WS handshake complete, `hello` sent but not yet
    /// acknowledged.
    Open,
    /// `hello` acknowledged and the settle delay has elapsed; normal
    /// traffic flows.
    Ready,
    Reconnecting,
    Closed,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the live connection and the channel the rest of the client uses
/// to push outbound frames at it. Reconnection with exponential backoff
/// is the caller's loop (`run`); this type exposes the primitives it
/// needs rather than hiding the loop inside a spawn the caller can't
/// observe.
pub struct Socket {
    config: PushConfiguration,
    state: SocketState,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<ClientMessage>>,
    cancel: Arc<Notify>,
}

impl Socket {
    pub fn new(config: PushConfiguration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: SocketState::Idle,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            cancel: Arc::new(Notify::new()),
        }
    }

    /// Starts a new connection attempt's cancellation handle, replacing
    /// any handle left over from a previous attempt — a watchdog that
    /// fires late for an old attempt must not be able to cancel a new
    /// one. The caller hands the returned handle to whatever should be
    /// able to cut this attempt short (e.g. a hello-timeout watchdog).
    pub fn begin_attempt(&mut self) -> Arc<Notify> {
        self.cancel = Arc::new(Notify::new());
        self.cancel.clone()
    }

    /// Cancels the current connection attempt, as if the transport had
    /// failed. Used by a hello-timeout watchdog; a plain reader/writer
    /// failure takes the ordinary error path instead.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Queues a frame for send. Valid from any state; frames queued while
    /// not `Ready` wait in the channel until the connection catches up —
    /// a `subscribe()` racing a reconnect is not guaranteed to land
    /// before the next `hello`.
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .map_err(|_| PushError::TransportError("outbound channel closed".to_string()))
    }

    async fn connect(&mut self) -> Result<WsStream> {
        self.state = SocketState::Connecting;
        let (stream, _response) = tokio_tungstenite::connect_async(&self.config.server_url)
            .await
            .map_err(|e| PushError::TransportError(format!("connect failed: {e}")))?;
        self.state = SocketState::Open;
        Ok(stream)
    }

    /// Reads one frame off the wire, parsing it as a [`ServerMessage`].
    /// Text frames are the only wire shape this protocol uses; anything
    /// else is a protocol error rather than silently ignored.
    async fn read_one(stream: &mut WsStream) -> Result<ServerMessage> {
        loop {
            let Some(frame) = stream.next().await else {
                return Err(PushError::TransportError(
                    "connection closed by peer".to_string(),
                ));
            };
            match frame.map_err(|e| PushError::TransportError(format!("read failed: {e}")))? {
                WsMessage::Text(text) => {
                    return serde_json::from_str(&text).map_err(|e| {
                        PushError::ProtocolError(format!("malformed frame: {e}"))
                    });
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => {
                    return Err(PushError::TransportError("peer sent close".to_string()))
                }
                WsMessage::Binary(_) | WsMessage::Frame(_) => {
                    return Err(PushError::ProtocolError(
                        "unexpected binary frame".to_string(),
                    ))
                }
            }
        }
    }

    async fn write_one(stream: &mut WsStream, msg: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| PushError::TransportError(format!("write failed: {e}")))
    }

    pub fn mark_ready(&mut self) {
        self.state = SocketState::Ready;
    }

    pub fn mark_reconnecting(&mut self) {
        self.state = SocketState::Reconnecting;
    }

    pub fn mark_closed(&mut self) {
        self.state = SocketState::Closed;
    }

    /// Drives one connection attempt to completion: connects, then pumps
    /// inbound frames to `inbound_tx` and outbound frames from the queue
    /// until the socket closes or errors. Returns when the connection
    /// drops, leaving reconnect/backoff decisions to the caller rather
    /// than buried in the transport.
    pub async fn run_once(&mut self, inbound_tx: &mpsc::UnboundedSender<ServerMessage>) -> Result<()> {
        let mut stream = self.connect().await?;
        let mut outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| PushError::Misuse("socket is already running".to_string()))?;
        let cancel = self.cancel.clone();

        let result = loop {
            tokio::select! {
                frame = Self::read_one(&mut stream) => {
                    match frame {
                        Ok(msg) => {
                            if inbound_tx.send(msg).is_err() {
                                break Ok(());
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if let Err(e) = Self::write_one(&mut stream, &msg).await {
                                break Err(e);
                            }
                        }
                        None => break Ok(()),
                    }
                }
                _ = cancel.notified() => {
                    break Err(PushError::TransportError(
                        "connection attempt cancelled".to_string(),
                    ));
                }
            }
        };

        self.outbound_rx = Some(outbound_rx);
        result
    }
}

/// Exponential backoff sequence for reconnect attempts, capped at `max`.
/// Kept as a free function so it's testable without a real socket.
pub fn next_backoff(current: std::time::Duration, max: std::time::Duration) -> std::time::Duration {
    let doubled = current.saturating_mul(2);
    if doubled > max {
        max
    } else {
        doubled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_RECONNECT_INITIAL_BACKOFF, DEFAULT_RECONNECT_MAX_BACKOFF};

    #[test]
    fn backoff_doubles_until_the_cap() {
        let mut backoff = DEFAULT_RECONNECT_INITIAL_BACKOFF;
        for _ in 0..10 {
            backoff = next_backoff(backoff, DEFAULT_RECONNECT_MAX_BACKOFF);
            assert!(backoff <= DEFAULT_RECONNECT_MAX_BACKOFF);
        }
        assert_eq!(backoff, DEFAULT_RECONNECT_MAX_BACKOFF);
    }

    #[test]
    fn fresh_socket_starts_idle() {
        let socket = Socket::new(PushConfiguration::default());
        assert_eq!(socket.state(), SocketState::Idle);
    }

    #[test]
    fn state_transitions_follow_the_expected_order() {
        let mut socket = Socket::new(PushConfiguration::default());
        socket.mark_ready();
        assert_eq!(socket.state(), SocketState::Ready);
        socket.mark_reconnecting();
        assert_eq!(socket.state(), SocketState::Reconnecting);
        socket.mark_closed();
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[test]
    fn send_before_connect_is_queued_not_rejected() {
        let socket = Socket::new(PushConfiguration::default());
        assert!(socket.send(ClientMessage::Ping {}).is_ok());
    }

    #[test]
    fn begin_attempt_replaces_the_cancel_handle() {
        let mut socket = Socket::new(PushConfiguration::default());
        let first = socket.begin_attempt();
        let second = socket.begin_attempt();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn cancel_wakes_a_waiter_on_the_current_attempt_handle() {
        let mut socket = Socket::new(PushConfiguration::default());
        let handle = socket.begin_attempt();
        let waiter = tokio::spawn(async move {
            handle.notified().await;
        });
        socket.cancel();
        waiter.await.unwrap();
    }
}
