/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `PushSubscription`: one channel-id's worth of crypto state, endpoint,
//! and listener registration.
//!
//! Grounded on `subscriber::PushManager::subscribe`/`unsubscribe`
//! for the persist-then-respond shape, and on `SubscriptionInfo`/`KeyInfo`
//! in `lib.rs` for the host-facing JSON projection.

pub mod registry;

use crate::codec::to_base64url;
use crate::crypto::jwk::PrivateKeyJwk;
use crate::crypto::Cryptography;
use crate::error::{PushError, Result};
use crate::events::{EventManager, ListenerId, PushEvent};
use crate::storage::{KvStore, NamespacedStorage};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Length in bytes of a per-subscription auth secret.
const AUTH_SECRET_LEN: usize = 16;

/// What gets persisted under `<channel-id>:options` in the namespaced
/// store, alongside `endpoint`, `auth`, and `privateEncKey` as three
/// further separate keys. `application_server_key` is the raw VAPID
/// public key the host supplied at subscribe time, retained so `re_init`
/// can re-register with the same key after a UAID rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    #[serde(rename = "userVisibleOnly")]
    pub user_visible_only: bool,
    #[serde(rename = "applicationServerKey")]
    pub application_server_key: Option<String>,
}

#[derive(Debug, Clone)]
struct SubscriptionRecord {
    endpoint: String,
    options: SubscriptionOptions,
    auth: String,
    private_key: PrivateKeyJwk,
}

pub struct PushSubscription<S> {
    pub channel_id: String,
    storage: NamespacedStorage<S>,
    events: EventManager,
    record: SubscriptionRecord,
}

impl<S> PushSubscription<S>
where
    S: AsRef<dyn KvStore> + Clone,
{
    /// Generates fresh crypto state for a brand-new subscription and
    /// persists it under `storage.extend(channel_id)`, across four
    /// separate keys (`endpoint`, `options`, `auth`, `privateEncKey`)
    /// rather than one bundled blob.
    pub async fn create(
        storage: &NamespacedStorage<S>,
        crypto: &dyn Cryptography,
        channel_id: &str,
        endpoint: String,
        application_server_key: Option<String>,
    ) -> Result<Self> {
        let private_key = crypto.generate_key()?;
        let auth = to_base64url(&crypto.random_bytes(AUTH_SECRET_LEN));
        let options = SubscriptionOptions {
            user_visible_only: true,
            application_server_key,
        };
        let channel_storage = storage.extend(channel_id);
        channel_storage.write("endpoint", &endpoint).await?;
        channel_storage.write("options", &options).await?;
        channel_storage.write("auth", &auth).await?;
        channel_storage.write("privateEncKey", &private_key).await?;

        Ok(Self {
            channel_id: channel_id.to_string(),
            storage: channel_storage,
            events: EventManager::new(),
            record: SubscriptionRecord {
                endpoint,
                options,
                auth,
                private_key,
            },
        })
    }

    /// Reloads a previously-persisted subscription. Returns `None` if
    /// nothing is stored under this channel-id — recovery after a host
    /// restart.
    pub async fn recover(
        storage: &NamespacedStorage<S>,
        channel_id: &str,
    ) -> Result<Option<Self>> {
        let channel_storage = storage.extend(channel_id);
        let endpoint: Option<String> = channel_storage.read("endpoint").await?;
        let Some(endpoint) = endpoint else {
            return Ok(None);
        };
        let options: SubscriptionOptions = channel_storage
            .read("options")
            .await?
            .ok_or_else(|| PushError::StorageError(format!("{channel_id}: missing options")))?;
        let auth: String = channel_storage
            .read("auth")
            .await?
            .ok_or_else(|| PushError::StorageError(format!("{channel_id}: missing auth")))?;
        let private_key: PrivateKeyJwk = channel_storage
            .read("privateEncKey")
            .await?
            .ok_or_else(|| {
                PushError::StorageError(format!("{channel_id}: missing privateEncKey"))
            })?;

        Ok(Some(Self {
            channel_id: channel_id.to_string(),
            storage: channel_storage,
            events: EventManager::new(),
            record: SubscriptionRecord {
                endpoint,
                options,
                auth,
                private_key,
            },
        }))
    }

    /// Re-registers under a freshly generated channel-id and crypto state
    /// after a UAID rotation. `old`'s persisted state is destroyed and its
    /// event listeners carry over to the returned subscription, so a
    /// `pushsubscriptionchange` dispatched here actually reaches whoever
    /// was already listening on the old one.
    pub async fn re_init(
        old: Self,
        storage: &NamespacedStorage<S>,
        crypto: &dyn Cryptography,
        new_channel_id: &str,
        new_endpoint: String,
    ) -> Result<Self> {
        let application_server_key = old.record.options.application_server_key.clone();
        let events = old.events;
        old.destroy().await?;

        let private_key = crypto.generate_key()?;
        let auth = to_base64url(&crypto.random_bytes(AUTH_SECRET_LEN));
        let options = SubscriptionOptions {
            user_visible_only: true,
            application_server_key,
        };
        let channel_storage = storage.extend(new_channel_id);
        channel_storage.write("endpoint", &new_endpoint).await?;
        channel_storage.write("options", &options).await?;
        channel_storage.write("auth", &auth).await?;
        channel_storage.write("privateEncKey", &private_key).await?;

        let fresh = Self {
            channel_id: new_channel_id.to_string(),
            storage: channel_storage,
            events,
            record: SubscriptionRecord {
                endpoint: new_endpoint,
                options,
                auth,
                private_key,
            },
        };
        fresh
            .events
            .dispatch_event(PushEvent::SubscriptionChange(fresh.to_json()));
        Ok(fresh)
    }

    pub fn endpoint(&self) -> &str {
        &self.record.endpoint
    }

    pub fn application_server_key(&self) -> Option<&str> {
        self.record.options.application_server_key.as_deref()
    }

    /// The base64url-encoded value for `"p256dh"` or `"auth"`, the two
    /// keys the host-facing `getKey()` API exposes.
    pub fn get_key(&self, name: &str) -> Result<String> {
        match name {
            "auth" => Ok(self.record.auth.clone()),
            "p256dh" => Ok(to_base64url(&self.record.private_key.public_key_raw()?)),
            other => Err(PushError::Misuse(format!("unknown subscription key {other}"))),
        }
    }

    /// The JSON shape handed back to the host from `subscribe`/`to_json`,
    /// mirroring `SubscriptionInfo`/`KeyInfo`.
    pub fn to_json(&self) -> serde_json::Value {
        let p256dh = self
            .record
            .private_key
            .public_key_raw()
            .map(|raw| to_base64url(&raw))
            .unwrap_or_default();
        json!({
            "channelID": self.channel_id,
            "endpoint": self.record.endpoint,
            "keys": {
                "auth": self.record.auth,
                "p256dh": p256dh,
            },
        })
    }

    /// Decrypts an inbound notification payload and dispatches the
    /// resulting `PushEvent` to this subscription's listeners. `data` is
    /// `None` for a data-less keepalive notification.
    pub fn handle_notification(
        &self,
        crypto: &dyn Cryptography,
        data: Option<&str>,
    ) -> Result<()> {
        let plaintext = match data {
            None => None,
            Some(encoded) => Some(self.decrypt(crypto, encoded)?),
        };
        self.events
            .dispatch_event(PushEvent::Notification(plaintext));
        Ok(())
    }

    fn decrypt(&self, crypto: &dyn Cryptography, encoded: &str) -> Result<String> {
        let record = crate::codec::from_base64url(encoded)?;
        if record.len() < 21 {
            return Err(PushError::CryptoError(
                "aes128gcm record shorter than its header".to_string(),
            ));
        }
        let salt = &record[0..16];
        let idlen = record[20] as usize;
        if record.len() < 21 + idlen {
            return Err(PushError::CryptoError(
                "aes128gcm record truncated before keyid".to_string(),
            ));
        }
        let sender_public_raw = &record[21..21 + idlen];
        let ciphertext = record[21 + idlen..].to_vec();

        let auth_secret = crate::codec::from_base64url(&self.record.auth)?;
        let prep = crypto.web_push_decrypt_prep(
            &self.record.private_key,
            &auth_secret,
            sender_public_raw,
            salt,
            ciphertext,
        )?;
        let padded = crypto.aes_gcm_decrypt(&prep.cek, &prep.nonce, &prep.ciphertext)?;
        let plaintext = crypto.remove_padding(padded)?;
        crate::codec::to_utf8(plaintext)
    }

    pub fn add_event_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        self.events.add_event_listener(callback)
    }

    pub fn remove_event_listener(&self, id: ListenerId) {
        self.events.remove_event_listener(id)
    }

    /// Removes this subscription's persisted state. The caller is
    /// responsible for removing it from the registry too.
    pub async fn destroy(&self) -> Result<()> {
        self.storage.remove("endpoint").await?;
        self.storage.remove("options").await?;
        self.storage.remove("auth").await?;
        self.storage.remove("privateEncKey").await?;
        Ok(())
    }
}
