/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Client → server frame builders.
//!
//! Each sender is a small, independently testable unit that turns typed
//! inputs into a [`ClientMessage`]. The ping spacing rule mirrors
//! `PersistedRateLimiter`, but tracks an in-memory `Instant` rather than
//! a persisted counter — spacing only needs to hold within
//! the life of one socket session, not across restarts.

use crate::error::{PushError, Result};
use crate::message::{AckUpdate, ClientMessage};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Builds the `hello` frame that opens every session.
pub struct HelloSender;

impl HelloSender {
    pub fn build(uaid: Option<&str>, channel_ids: &[String]) -> ClientMessage {
        ClientMessage::Hello {
            uaid: uaid.unwrap_or("").to_string(),
            channel_ids: channel_ids.to_vec(),
            use_webpush: true,
        }
    }
}

/// Builds a `register` frame for a new channel-id. A channel can only be
/// registered once `hello` has completed and the session has a UAID —
/// registering beforehand would ask the server to file a channel under
/// an agent it hasn't assigned yet.
pub struct RegisterSender;

impl RegisterSender {
    /// Mints a fresh channel-id and builds the frame that registers it.
    /// Returns the minted id alongside the message so the caller can
    /// correlate the eventual reply without generating it twice.
    pub fn build(uaid: Option<&str>, application_server_key: Option<&str>) -> Result<(String, ClientMessage)> {
        if uaid.is_none() {
            return Err(PushError::Misuse(
                "cannot register a channel before hello completes".to_string(),
            ));
        }
        let channel_id = Uuid::new_v4().to_string();
        let msg = ClientMessage::Register {
            channel_id: channel_id.clone(),
            key: application_server_key.map(str::to_string),
        };
        Ok((channel_id, msg))
    }
}

/// Builds an `unregister` frame for a channel-id the host is dropping.
pub struct UnregisterSender;

impl UnregisterSender {
    pub fn build(channel_id: &str) -> ClientMessage {
        ClientMessage::Unregister {
            channel_id: channel_id.to_string(),
            code: crate::message::UNREGISTER_USER_UNSUBSCRIBED,
        }
    }
}

/// Builds a batched `ack` frame from the dispositions accumulated since
/// the last flush.
pub struct AckSender;

impl AckSender {
    pub fn build(updates: Vec<AckUpdate>) -> ClientMessage {
        ClientMessage::Ack { updates }
    }
}

/// `nack` is reserved by the protocol for server-requested negative
/// acknowledgement; this client never has cause to send one proactively,
/// but keeps the builder so a future handler can wire it up without
/// touching the message layer.
pub struct NackSender;

impl NackSender {
    pub fn build(channel_id: &str, version: &str, code: u16) -> ClientMessage {
        ClientMessage::Nack {
            channel_id: channel_id.to_string(),
            version: version.to_string(),
            code,
        }
    }
}

/// Reserved: broadcast subscription is not exercised by this client, but
/// the builder exists so a host that does use broadcasts isn't blocked
/// on a message-layer change.
pub struct BroadcastSubscribeSender;

impl BroadcastSubscribeSender {
    pub fn build(broadcasts: HashMap<String, String>) -> ClientMessage {
        ClientMessage::BroadcastSubscribe { broadcasts }
    }
}

/// Keeps the socket alive with periodic `ping` frames, enforcing a
/// minimum 30-minute spacing between sends. Grounded on
/// `PersistedRateLimiter`'s reset-after-interval/count-within-interval
/// shape, simplified to a single last-sent timestamp since only spacing
/// (not a request quota) is required here.
pub struct PingSender {
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl PingSender {
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(30 * 60);

    pub fn new() -> Self {
        Self::with_min_interval(Self::DEFAULT_MIN_INTERVAL)
    }

    pub fn with_min_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: Mutex::new(None),
        }
    }

    /// Returns a `ping` frame if enough time has passed since the last
    /// one, recording the attempt either way isn't needed: only a send we
    /// actually emit updates `last_sent`.
    pub fn try_build(&self) -> Option<ClientMessage> {
        let mut last_sent = self.last_sent.lock().unwrap();
        let now = Instant::now();
        let allowed = match *last_sent {
            None => true,
            Some(t) => now.duration_since(t) >= self.min_interval,
        };
        if !allowed {
            return None;
        }
        *last_sent = Some(now);
        Some(ClientMessage::Ping {})
    }
}

impl Default for PingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_sender_defaults_uaid_to_empty_string() {
        let msg = HelloSender::build(None, &[]);
        match msg {
            ClientMessage::Hello { uaid, .. } => assert_eq!(uaid, ""),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn register_sender_mints_a_channel_id_and_carries_through_the_key() {
        let (channel_id, msg) = RegisterSender::build(Some("uaid-1"), Some("vapid-key")).unwrap();
        match msg {
            ClientMessage::Register { channel_id: wire_channel_id, key } => {
                assert_eq!(wire_channel_id, channel_id);
                assert_eq!(key.as_deref(), Some("vapid-key"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn register_sender_refuses_to_build_before_hello_completes() {
        let err = RegisterSender::build(None, Some("vapid-key")).unwrap_err();
        assert!(matches!(err, PushError::Misuse(_)));
    }

    #[test]
    fn ping_sender_blocks_a_second_call_within_the_interval() {
        let sender = PingSender::with_min_interval(Duration::from_secs(60));
        assert!(sender.try_build().is_some());
        assert!(sender.try_build().is_none());
    }

    #[test]
    fn ping_sender_allows_a_call_after_the_interval_elapses() {
        let sender = PingSender::with_min_interval(Duration::from_millis(10));
        assert!(sender.try_build().is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(sender.try_build().is_some());
    }
}
