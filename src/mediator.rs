/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Mediates between the socket, the sender/handler registries, and the
//! subscription registry.
//!
//! The HTTP-bridge variant of this protocol splits this concern across
//! `Connection` (communications) and `PushManager` (orchestration). This
//! crate's WebSocket transport multiplexes every frame type over one
//! connection, so the mediator owns what the `Connection` trait
//! abstracted there: routing inbound frames to the right handler and
//! batching outbound acks, grounded on
//! `communications::Connection`'s per-operation method shape and on the
//! `notifier` crate's "distributes them to the appropriate handlers"
//! framing.

use crate::crypto::Cryptography;
use crate::error::{PushError, Result};
use crate::handlers::{
    BroadcastHandler, HelloHandler, NotificationHandler, PingHandler, RegisterHandler,
    RegisterOutcome, UnregisterHandler, UnregisterOutcome,
};
use crate::message::{AckUpdate, ClientMessage, ServerMessage};
use crate::senders::{AckSender, PingSender};
use crate::storage::KvStore;
use crate::subscription::registry::SubscriptionRegistry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of feeding one inbound frame to the mediator.
pub enum Dispatch {
    /// `hello` completed; carries the UAID the server confirmed, `Some`
    /// only when it differs from what was sent (a rotation).
    HelloAck { rotated_uaid: Option<String> },
    RegisterAck { channel_id: String, endpoint: String },
    /// A `register` needs retrying, either immediately (409) or after
    /// `delay` (500). `channel_id` is the one that just failed — the
    /// caller mints a new one for the retry.
    RegisterRetry {
        channel_id: String,
        application_server_key: Option<String>,
        delay: Option<Duration>,
    },
    /// A 200 `register` reply arrived for a channel-id the registering
    /// queue no longer has an entry for; the caller should tear the
    /// channel back down on the server.
    RegisterAbandoned { channel_id: String },
    UnregisterAck { channel_id: String },
    /// An `unregister` needs retrying after `delay`.
    UnregisterRetry { channel_id: String, delay: Duration },
    /// A notification was processed (successfully or not) and its ack
    /// entry queued for the next batch flush.
    NotificationAcked,
    /// Frame handled with no further action needed (ping, broadcast).
    Handled,
}

/// Default interval between `ack` batch flushes.
pub const DEFAULT_ACK_INTERVAL: Duration = Duration::from_millis(30_000);

/// How long a `register` is given to come back before its registering-queue
/// entry is treated as stale and a late reply is abandoned instead of
/// resolved.
const REGISTERING_EXPIRY: Duration = Duration::from_secs(60);

struct RegisteringEntry {
    application_server_key: Option<String>,
    queued_at: Instant,
}

pub struct Mediator<S> {
    registry: SubscriptionRegistry<S>,
    pending_acks: Mutex<Vec<AckUpdate>>,
    ping_sender: PingSender,
    ack_interval: Duration,
    registering: Mutex<HashMap<String, RegisteringEntry>>,
}

impl<S> Mediator<S>
where
    S: AsRef<dyn KvStore> + Clone,
{
    pub fn new(registry: SubscriptionRegistry<S>) -> Self {
        Self::with_ack_interval(registry, DEFAULT_ACK_INTERVAL)
    }

    pub fn with_ack_interval(registry: SubscriptionRegistry<S>, ack_interval: Duration) -> Self {
        Self {
            registry,
            pending_acks: Mutex::new(Vec::new()),
            ping_sender: PingSender::new(),
            ack_interval,
            registering: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry<S> {
        &self.registry
    }

    pub fn ack_interval(&self) -> Duration {
        self.ack_interval
    }

    /// Records that a `register` for `channel_id` is in flight, so its
    /// eventual reply can be told apart from one nobody is waiting on.
    pub fn expect_register(&self, channel_id: &str, application_server_key: Option<&str>) {
        self.registering.lock().unwrap().insert(
            channel_id.to_string(),
            RegisteringEntry {
                application_server_key: application_server_key.map(str::to_string),
                queued_at: Instant::now(),
            },
        );
    }

    /// Removes and returns the registering-queue entry for `channel_id`,
    /// if there is one that hasn't expired.
    fn take_registering(&self, channel_id: &str) -> Option<RegisteringEntry> {
        let entry = self.registering.lock().unwrap().remove(channel_id)?;
        if entry.queued_at.elapsed() > REGISTERING_EXPIRY {
            None
        } else {
            Some(entry)
        }
    }

    /// Routes one inbound frame to its handler, queuing any ack it
    /// produces rather than sending it immediately — acks are batched,
    /// not sent per-notification.
    pub fn handle(
        &self,
        previous_uaid: Option<&str>,
        crypto: &dyn Cryptography,
        msg: &ServerMessage,
    ) -> Result<Dispatch> {
        match msg {
            ServerMessage::Hello { .. } => {
                let rotated_uaid = HelloHandler::handle(previous_uaid, msg)?;
                Ok(Dispatch::HelloAck { rotated_uaid })
            }
            ServerMessage::Register { channel_id, .. } => {
                let expected = self.take_registering(channel_id);
                let had_expected_entry = expected.is_some();
                let application_server_key =
                    expected.and_then(|e| e.application_server_key);
                match RegisterHandler::handle(msg, had_expected_entry, application_server_key.as_deref())? {
                    RegisterOutcome::Registered(endpoint) => Ok(Dispatch::RegisterAck {
                        channel_id: channel_id.clone(),
                        endpoint,
                    }),
                    RegisterOutcome::Retry {
                        application_server_key,
                        delay,
                    } => Ok(Dispatch::RegisterRetry {
                        channel_id: channel_id.clone(),
                        application_server_key,
                        delay,
                    }),
                    RegisterOutcome::Abandoned => Ok(Dispatch::RegisterAbandoned {
                        channel_id: channel_id.clone(),
                    }),
                }
            }
            ServerMessage::Unregister { channel_id, .. } => {
                match UnregisterHandler::handle(msg)? {
                    UnregisterOutcome::Unregistered => Ok(Dispatch::UnregisterAck {
                        channel_id: channel_id.clone(),
                    }),
                    UnregisterOutcome::Retry => Ok(Dispatch::UnregisterRetry {
                        channel_id: channel_id.clone(),
                        delay: crate::handlers::UNREGISTER_RETRY_DELAY,
                    }),
                }
            }
            ServerMessage::Notification { .. } => {
                let outcome = NotificationHandler::handle(&self.registry, crypto, msg);
                self.pending_acks.lock().unwrap().push(outcome.ack);
                Ok(Dispatch::NotificationAcked)
            }
            ServerMessage::Broadcast { .. } => {
                BroadcastHandler::handle(msg)?;
                Ok(Dispatch::Handled)
            }
            ServerMessage::Ping {} => {
                PingHandler::handle(msg)?;
                Ok(Dispatch::Handled)
            }
        }
    }

    /// Drains the pending-ack queue into a single `ack` frame, or `None`
    /// if there's nothing to send.
    pub fn flush_acks(&self) -> Option<ClientMessage> {
        let mut pending = self.pending_acks.lock().unwrap();
        if pending.is_empty() {
            return None;
        }
        Some(AckSender::build(std::mem::take(&mut pending)))
    }

    /// Builds a `ping` frame if the minimum spacing has elapsed.
    pub fn try_ping(&self) -> Option<ClientMessage> {
        self.ping_sender.try_build()
    }

    /// Called when the socket is torn down: anything still pending is
    /// dropped rather than replayed on reconnect — acks are best-effort,
    /// the server will redeliver unacked notifications.
    pub fn destroy(&self) {
        self.pending_acks.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Crypto;
    use crate::storage::memory::MemoryKvStore;
    use std::sync::Arc;

    fn mediator() -> Mediator<Arc<dyn KvStore>> {
        Mediator::new(SubscriptionRegistry::new())
    }

    #[test]
    fn hello_dispatch_reports_rotation() {
        let mediator = mediator();
        let crypto = Crypto::new();
        let msg = ServerMessage::Hello {
            status: 200,
            uaid: "new".to_string(),
            use_webpush: true,
        };
        match mediator.handle(Some("old"), &crypto, &msg).unwrap() {
            Dispatch::HelloAck { rotated_uaid } => {
                assert_eq!(rotated_uaid, Some("new".to_string()))
            }
            _ => panic!("wrong dispatch"),
        }
    }

    #[test]
    fn register_dispatch_resolves_when_expected() {
        let mediator = mediator();
        let crypto = Crypto::new();
        mediator.expect_register("chan-1", Some("vapid-key"));
        let msg = ServerMessage::Register {
            status: 200,
            channel_id: "chan-1".to_string(),
            push_endpoint: Some("https://push.example/chan-1".to_string()),
        };
        match mediator.handle(None, &crypto, &msg).unwrap() {
            Dispatch::RegisterAck { channel_id, endpoint } => {
                assert_eq!(channel_id, "chan-1");
                assert_eq!(endpoint, "https://push.example/chan-1");
            }
            _ => panic!("wrong dispatch"),
        }
    }

    #[test]
    fn register_dispatch_abandons_an_unexpected_200() {
        let mediator = mediator();
        let crypto = Crypto::new();
        let msg = ServerMessage::Register {
            status: 200,
            channel_id: "chan-1".to_string(),
            push_endpoint: Some("https://push.example/chan-1".to_string()),
        };
        match mediator.handle(None, &crypto, &msg).unwrap() {
            Dispatch::RegisterAbandoned { channel_id } => assert_eq!(channel_id, "chan-1"),
            _ => panic!("wrong dispatch"),
        }
    }

    #[test]
    fn register_dispatch_retries_a_409_immediately() {
        let mediator = mediator();
        let crypto = Crypto::new();
        mediator.expect_register("chan-1", Some("vapid-key"));
        let msg = ServerMessage::Register {
            status: 409,
            channel_id: "chan-1".to_string(),
            push_endpoint: None,
        };
        match mediator.handle(None, &crypto, &msg).unwrap() {
            Dispatch::RegisterRetry {
                channel_id,
                application_server_key,
                delay,
            } => {
                assert_eq!(channel_id, "chan-1");
                assert_eq!(application_server_key.as_deref(), Some("vapid-key"));
                assert_eq!(delay, None);
            }
            _ => panic!("wrong dispatch"),
        }
    }

    #[tokio::test]
    async fn notification_dispatch_queues_an_ack_for_later_flush() {
        use crate::storage::NamespacedStorage;
        use crate::subscription::PushSubscription;

        let storage =
            NamespacedStorage::new(Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>);
        let crypto = Crypto::new();
        let sub = PushSubscription::create(
            &storage,
            &crypto,
            "chan-1",
            "https://push.example/c1".to_string(),
            None,
        )
        .await
        .unwrap();
        let registry = SubscriptionRegistry::new();
        registry.insert(sub);
        let mediator = Mediator::new(registry);

        assert!(mediator.flush_acks().is_none());

        let msg = ServerMessage::Notification {
            channel_id: "chan-1".to_string(),
            version: "v1".to_string(),
            ttl: 0,
            data: None,
            headers: None,
        };
        mediator.handle(None, &crypto, &msg).unwrap();

        match mediator.flush_acks().unwrap() {
            ClientMessage::Ack { updates } => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].channel_id, "chan-1");
            }
            _ => panic!("wrong message"),
        }
        assert!(mediator.flush_acks().is_none());
    }

    #[test]
    fn destroy_clears_pending_acks() {
        let mediator = mediator();
        mediator
            .pending_acks
            .lock()
            .unwrap()
            .push(AckUpdate::new(
                "c1".to_string(),
                "v1".to_string(),
                crate::error::AckCode::Success,
            ));
        mediator.destroy();
        assert!(mediator.flush_acks().is_none());
    }
}
