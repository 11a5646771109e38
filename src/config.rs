/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Push manager configuration.
//!
//! Mirrors `internal::config::PushConfiguration`: a plain
//! struct of connection parameters, `Display`-able where the wire needs a
//! string, with a `#[cfg(test)]`-only `Default` so production code is
//! forced to be explicit about the server it's talking to.

use std::time::Duration;

/// Minimum time between `ping` frames on an otherwise idle socket.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// How long a batch of notification acks is held before being flushed.
pub const DEFAULT_ACK_INTERVAL: Duration = Duration::from_millis(30_000);

/// How long the socket waits after sending `hello` for the server's ack
/// before treating the handshake as stalled.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Settle delay after a successful `hello` before the socket is promoted
/// from `Open` to `Ready` and queued sends are flushed — gives
/// late-arriving `register` acks for channels from a previous session a
/// chance to land before new traffic starts.
pub const DEFAULT_HELLO_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Initial and maximum backoff between reconnect attempts.
pub const DEFAULT_RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct PushConfiguration {
    /// Autopush WebSocket endpoint, e.g. `wss://push.services.mozilla.com/`.
    pub server_url: String,

    pub ping_interval: Duration,
    pub ack_interval: Duration,
    pub hello_timeout: Duration,
    pub hello_settle_delay: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
}

#[cfg(test)]
impl Default for PushConfiguration {
    fn default() -> Self {
        Self {
            server_url: "wss://push.services.mozilla.com/".to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            ack_interval: DEFAULT_ACK_INTERVAL,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            hello_settle_delay: DEFAULT_HELLO_SETTLE_DELAY,
            reconnect_initial_backoff: DEFAULT_RECONNECT_INITIAL_BACKOFF,
            reconnect_max_backoff: DEFAULT_RECONNECT_MAX_BACKOFF,
        }
    }
}

impl PushConfiguration {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            ack_interval: DEFAULT_ACK_INTERVAL,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            hello_settle_delay: DEFAULT_HELLO_SETTLE_DELAY,
            reconnect_initial_backoff: DEFAULT_RECONNECT_INITIAL_BACKOFF,
            reconnect_max_backoff: DEFAULT_RECONNECT_MAX_BACKOFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_the_standard_defaults() {
        let config = PushConfiguration::new("wss://example.test/");
        assert_eq!(config.server_url, "wss://example.test/");
        assert_eq!(config.ping_interval, DEFAULT_PING_INTERVAL);
        assert_eq!(config.ack_interval, DEFAULT_ACK_INTERVAL);
    }
}
