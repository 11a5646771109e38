/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Server → client frame handlers.
//!
//! Grounded on the `notifier` crate's stub description of the workhorse
//! that turns incoming frames into dispatched events, and on
//! `communications::Connection`'s `RegisterResponse`/status handling for
//! how a register/unregister confirmation maps onto success vs. server
//! error.

use crate::crypto::Cryptography;
use crate::error::{AckCode, PushError, Result};
use crate::message::{AckUpdate, ServerMessage};
use crate::storage::KvStore;
use crate::subscription::registry::SubscriptionRegistry;
use std::time::Duration;

/// Fixed delay before retrying a `register` that failed with a
/// transient (500) server error.
pub const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Fixed delay before retrying an `unregister` that failed with a
/// transient (500) server error.
pub const UNREGISTER_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Disposition of a single `notification` frame, fed to the mediator's
/// ack batching queue.
pub struct NotificationOutcome {
    pub ack: AckUpdate,
}

/// Handles `hello` acknowledgement: records whether the server minted a
/// new UAID — a changed UAID means every prior channel-id is now invalid
/// and subscriptions must be rebuilt.
pub struct HelloHandler;

impl HelloHandler {
    /// Returns `Some(new_uaid)` if the server's UAID differs from the one
    /// the client sent, signalling a rotation the caller must react to.
    pub fn handle(previous_uaid: Option<&str>, msg: &ServerMessage) -> Result<Option<String>> {
        match msg {
            ServerMessage::Hello { status, uaid, .. } => {
                if *status >= 500 {
                    return Err(PushError::ServerTransientError(format!(
                        "hello failed with status {status}"
                    )));
                }
                if *status >= 400 {
                    return Err(PushError::ProtocolError(format!(
                        "hello rejected with status {status}"
                    )));
                }
                if previous_uaid.is_some() && previous_uaid != Some(uaid.as_str()) {
                    Ok(Some(uaid.clone()))
                } else {
                    Ok(None)
                }
            }
            _ => Err(PushError::ProtocolError(
                "expected a hello frame".to_string(),
            )),
        }
    }
}

/// Disposition of a `register` reply.
pub enum RegisterOutcome {
    /// 200 with an endpoint, and a registering-queue entry was waiting
    /// for it.
    Registered(String),
    /// 409 (retry immediately, `delay: None`) or 500 (retry after
    /// `delay`), reusing the application server key the caller was
    /// originally registering with.
    Retry {
        application_server_key: Option<String>,
        delay: Option<Duration>,
    },
    /// A 200 with no matching registering-queue entry — the reply
    /// arrived too late, or for a channel-id this session never asked
    /// for. The channel must be torn down on the server rather than
    /// left to linger.
    Abandoned,
}

/// Handles `register` acknowledgement, surfacing the endpoint, a retry
/// signal, or an abandoned registration. `had_expected_entry` reflects
/// whether the mediator's registering queue still had an entry for this
/// channel-id when the reply arrived.
pub struct RegisterHandler;

impl RegisterHandler {
    pub fn handle(
        msg: &ServerMessage,
        had_expected_entry: bool,
        application_server_key: Option<&str>,
    ) -> Result<RegisterOutcome> {
        match msg {
            ServerMessage::Register {
                status,
                push_endpoint,
                ..
            } => match status {
                200 => {
                    if !had_expected_entry {
                        return Ok(RegisterOutcome::Abandoned);
                    }
                    let endpoint = push_endpoint.clone().ok_or_else(|| {
                        PushError::ProtocolError(
                            "register succeeded with no endpoint".to_string(),
                        )
                    })?;
                    Ok(RegisterOutcome::Registered(endpoint))
                }
                409 => Ok(RegisterOutcome::Retry {
                    application_server_key: application_server_key.map(str::to_string),
                    delay: None,
                }),
                s if *s >= 500 => Ok(RegisterOutcome::Retry {
                    application_server_key: application_server_key.map(str::to_string),
                    delay: Some(REGISTER_RETRY_DELAY),
                }),
                s => Err(PushError::ProtocolError(format!(
                    "register rejected with status {s}"
                ))),
            },
            _ => Err(PushError::ProtocolError(
                "expected a register frame".to_string(),
            )),
        }
    }
}

/// Disposition of an `unregister` reply.
pub enum UnregisterOutcome {
    Unregistered,
    /// 500: retry after a fixed delay.
    Retry,
}

/// Handles `unregister` acknowledgement. The server accepting an
/// unregister for a channel it doesn't recognize is treated as success
/// (the end state — no registration — already holds).
pub struct UnregisterHandler;

impl UnregisterHandler {
    pub fn handle(msg: &ServerMessage) -> Result<UnregisterOutcome> {
        match msg {
            ServerMessage::Unregister { status, .. } if *status < 300 => {
                Ok(UnregisterOutcome::Unregistered)
            }
            ServerMessage::Unregister { status, .. } if *status >= 500 => {
                Ok(UnregisterOutcome::Retry)
            }
            ServerMessage::Unregister { status, channel_id } => Err(PushError::ProtocolError(
                format!("unregister of {channel_id} failed with status {status}"),
            )),
            _ => Err(PushError::ProtocolError(
                "expected an unregister frame".to_string(),
            )),
        }
    }
}

/// Handles `notification`: decrypts (when there's a payload) and
/// dispatches to the owning subscription, returning the ack entry the
/// mediator should queue.
pub struct NotificationHandler;

impl NotificationHandler {
    pub fn handle<S>(
        registry: &SubscriptionRegistry<S>,
        crypto: &dyn Cryptography,
        msg: &ServerMessage,
    ) -> NotificationOutcome
    where
        S: AsRef<dyn KvStore> + Clone,
    {
        let ServerMessage::Notification {
            channel_id,
            version,
            data,
            ..
        } = msg
        else {
            unreachable!("caller must only pass Notification frames")
        };

        let result = registry.with(channel_id, |sub| {
            sub.handle_notification(crypto, data.as_deref())
        });

        let code = match result {
            Ok(Ok(())) => AckCode::Success,
            Ok(Err(e)) | Err(e) => e.to_ack_code(),
        };

        NotificationOutcome {
            ack: AckUpdate::new(channel_id.clone(), version.clone(), code),
        }
    }
}

/// Responds to a server `ping` with nothing — pings are a keepalive, not
/// a request needing application-level data back.
pub struct PingHandler;

impl PingHandler {
    pub fn handle(msg: &ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::Ping {} => Ok(()),
            _ => Err(PushError::ProtocolError("expected a ping frame".to_string())),
        }
    }
}

/// Broadcast channels are accepted on the wire but not acted on — this
/// client doesn't subscribe to any broadcast ids, so a `broadcast` frame
/// is always a no-op.
pub struct BroadcastHandler;

impl BroadcastHandler {
    pub fn handle(_msg: &ServerMessage) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_handler_detects_uaid_rotation() {
        let msg = ServerMessage::Hello {
            status: 200,
            uaid: "new-uaid".to_string(),
            use_webpush: true,
        };
        let rotated = HelloHandler::handle(Some("old-uaid"), &msg).unwrap();
        assert_eq!(rotated, Some("new-uaid".to_string()));
    }

    #[test]
    fn hello_handler_reports_no_rotation_on_matching_uaid() {
        let msg = ServerMessage::Hello {
            status: 200,
            uaid: "same".to_string(),
            use_webpush: true,
        };
        assert_eq!(HelloHandler::handle(Some("same"), &msg).unwrap(), None);
    }

    #[test]
    fn hello_handler_maps_server_error_to_transient() {
        let msg = ServerMessage::Hello {
            status: 503,
            uaid: String::new(),
            use_webpush: true,
        };
        let err = HelloHandler::handle(None, &msg).unwrap_err();
        assert!(matches!(err, PushError::ServerTransientError(_)));
    }

    #[test]
    fn register_handler_returns_endpoint_on_success_with_an_expected_entry() {
        let msg = ServerMessage::Register {
            status: 200,
            channel_id: "c1".to_string(),
            push_endpoint: Some("https://push.example/c1".to_string()),
        };
        match RegisterHandler::handle(&msg, true, None).unwrap() {
            RegisterOutcome::Registered(endpoint) => {
                assert_eq!(endpoint, "https://push.example/c1")
            }
            _ => panic!("wrong outcome"),
        }
    }

    #[test]
    fn register_handler_abandons_a_200_with_no_expected_entry() {
        let msg = ServerMessage::Register {
            status: 200,
            channel_id: "c1".to_string(),
            push_endpoint: Some("https://push.example/c1".to_string()),
        };
        assert!(matches!(
            RegisterHandler::handle(&msg, false, None).unwrap(),
            RegisterOutcome::Abandoned
        ));
    }

    #[test]
    fn register_handler_retries_immediately_on_409() {
        let msg = ServerMessage::Register {
            status: 409,
            channel_id: "c1".to_string(),
            push_endpoint: None,
        };
        match RegisterHandler::handle(&msg, true, Some("vapid-key")).unwrap() {
            RegisterOutcome::Retry {
                application_server_key,
                delay,
            } => {
                assert_eq!(application_server_key.as_deref(), Some("vapid-key"));
                assert_eq!(delay, None);
            }
            _ => panic!("wrong outcome"),
        }
    }

    #[test]
    fn register_handler_retries_after_a_delay_on_500() {
        let msg = ServerMessage::Register {
            status: 503,
            channel_id: "c1".to_string(),
            push_endpoint: None,
        };
        match RegisterHandler::handle(&msg, true, None).unwrap() {
            RegisterOutcome::Retry { delay, .. } => assert_eq!(delay, Some(REGISTER_RETRY_DELAY)),
            _ => panic!("wrong outcome"),
        }
    }

    #[test]
    fn unregister_handler_succeeds_on_2xx() {
        let msg = ServerMessage::Unregister {
            status: 200,
            channel_id: "c1".to_string(),
        };
        assert!(matches!(
            UnregisterHandler::handle(&msg).unwrap(),
            UnregisterOutcome::Unregistered
        ));
    }

    #[test]
    fn unregister_handler_retries_on_500() {
        let msg = ServerMessage::Unregister {
            status: 503,
            channel_id: "c1".to_string(),
        };
        assert!(matches!(
            UnregisterHandler::handle(&msg).unwrap(),
            UnregisterOutcome::Retry
        ));
    }

    #[test]
    fn ping_handler_accepts_ping_frame() {
        assert!(PingHandler::handle(&ServerMessage::Ping {}).is_ok());
    }

    #[tokio::test]
    async fn notification_handler_acks_decrypt_fail_for_bad_payload() {
        use crate::crypto::Crypto;
        use crate::storage::memory::MemoryKvStore;
        use crate::storage::NamespacedStorage;
        use crate::subscription::PushSubscription;
        use std::sync::Arc;

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

        let bogus = crate::codec::to_base64url(&vec![0u8; 40]);
        let msg = ServerMessage::Notification {
            channel_id: "chan-1".to_string(),
            version: "v1".to_string(),
            ttl: 60,
            data: Some(bogus),
            headers: None,
        };
        let outcome = NotificationHandler::handle(&registry, &crypto, &msg);
        assert_eq!(outcome.ack.code, AckCode::DecryptFail as u16);
    }

    #[tokio::test]
    async fn notification_handler_acks_other_fail_for_unknown_channel() {
        use crate::crypto::Crypto;

        let registry: SubscriptionRegistry<std::sync::Arc<dyn KvStore>> =
            SubscriptionRegistry::new();
        let crypto = Crypto::new();
        let msg = ServerMessage::Notification {
            channel_id: "ghost".to_string(),
            version: "v1".to_string(),
            ttl: 60,
            data: None,
            headers: None,
        };
        let outcome = NotificationHandler::handle(&registry, &crypto, &msg);
        assert_eq!(outcome.ack.code, AckCode::OtherFail as u16);
    }
}
