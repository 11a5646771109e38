/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Channel-id → subscription map.
//!
//! Grounded on `Store` as the keeper-of-all-records, but scoped down to
//! an in-memory index over live `PushSubscription`s — the durable copy of
//! each record already lives under the subscription's own namespaced
//! storage.

use crate::error::{PushError, Result};
use crate::storage::{KvStore, NamespacedStorage};
use crate::subscription::PushSubscription;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct SubscriptionRegistry<S> {
    subscriptions: RwLock<HashMap<String, PushSubscription<S>>>,
}

impl<S> SubscriptionRegistry<S>
where
    S: AsRef<dyn KvStore> + Clone,
{
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds the registry from whatever channel-ids are passed in (the
    /// push manager tracks the live channel-id list separately; this
    /// registry never enumerates storage on its own).
    pub async fn load(storage: &NamespacedStorage<S>, channel_ids: &[String]) -> Result<Self> {
        let registry = Self::new();
        for channel_id in channel_ids {
            if let Some(sub) = PushSubscription::recover(storage, channel_id).await? {
                registry.insert(sub);
            }
        }
        Ok(registry)
    }

    pub fn insert(&self, subscription: PushSubscription<S>) {
        self.subscriptions
            .write()
            .unwrap()
            .insert(subscription.channel_id.clone(), subscription);
    }

    pub fn remove(&self, channel_id: &str) -> Option<PushSubscription<S>> {
        self.subscriptions.write().unwrap().remove(channel_id)
    }

    pub fn get(&self, channel_id: &str) -> Result<()> {
        if self.subscriptions.read().unwrap().contains_key(channel_id) {
            Ok(())
        } else {
            Err(PushError::UnknownSubscription(channel_id.to_string()))
        }
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.subscriptions.read().unwrap().contains_key(channel_id)
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.subscriptions.read().unwrap().keys().cloned().collect()
    }

    pub fn with<F, R>(&self, channel_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&PushSubscription<S>) -> Result<R>,
    {
        let guard = self.subscriptions.read().unwrap();
        let sub = guard
            .get(channel_id)
            .ok_or_else(|| PushError::UnknownSubscription(channel_id.to_string()))?;
        f(sub)
    }

    /// Finds the channel-id registered with a given application server
    /// key, used to dedupe a second `subscribe()` call for the same
    /// VAPID key onto the same channel.
    pub fn find_by_application_server_key(&self, key: Option<&str>) -> Option<String> {
        self.subscriptions
            .read()
            .unwrap()
            .values()
            .find(|sub| sub.application_server_key() == key)
            .map(|sub| sub.channel_id.clone())
    }

    /// Re-registers every live subscription after a UAID rotation: each
    /// one gets a fresh channel-id, a fresh `register` round trip (via
    /// `register`, reusing the old `applicationServerKey`), and fresh
    /// crypto state, replacing the old subscription in place. A
    /// subscription whose re-register fails is logged and left out of
    /// the registry rather than retried here — the host will notice it's
    /// gone the next time it calls `get_subscription`.
    ///
    /// Returns the channel-id set after the sweep, for the caller to
    /// persist.
    pub async fn re_init_all<F, Fut>(
        &self,
        storage: &NamespacedStorage<S>,
        crypto: &dyn crate::crypto::Cryptography,
        mut register: F,
    ) -> Vec<String>
    where
        F: FnMut(Option<&str>) -> Fut,
        Fut: std::future::Future<Output = Result<(String, String)>>,
    {
        for old_channel_id in self.channel_ids() {
            let Some(old) = self.remove(&old_channel_id) else {
                continue;
            };
            let application_server_key = old.application_server_key().map(str::to_string);

            let (new_channel_id, new_endpoint) =
                match register(application_server_key.as_deref()).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::error!("re-register failed for channel {old_channel_id}: {e}");
                        continue;
                    }
                };

            match PushSubscription::re_init(old, storage, crypto, &new_channel_id, new_endpoint)
                .await
            {
                Ok(fresh) => self.insert(fresh),
                Err(e) => log::error!(
                    "failed to persist re-registered subscription for {old_channel_id}: {e}"
                ),
            }
        }
        self.channel_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Crypto;
    use crate::storage::memory::MemoryKvStore;
    use std::sync::Arc;

    fn storage() -> NamespacedStorage<Arc<dyn KvStore>> {
        NamespacedStorage::new(Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>)
    }

    #[tokio::test]
    async fn insert_then_get_succeeds() {
        let storage = storage();
        let crypto = Crypto::new();
        let sub = PushSubscription::create(
            &storage,
            &crypto,
            "chan-1",
            "https://push.example/a".to_string(),
            None,
        )
        .await
        .unwrap();
        let registry = SubscriptionRegistry::new();
        registry.insert(sub);
        assert!(registry.get("chan-1").is_ok());
        assert!(registry.get("chan-2").is_err());
    }

    #[tokio::test]
    async fn find_by_application_server_key_matches_existing() {
        let storage = storage();
        let crypto = Crypto::new();
        let sub = PushSubscription::create(
            &storage,
            &crypto,
            "chan-1",
            "https://push.example/a".to_string(),
            Some("server-key".to_string()),
        )
        .await
        .unwrap();
        let registry = SubscriptionRegistry::new();
        registry.insert(sub);
        assert_eq!(
            registry.find_by_application_server_key(Some("server-key")),
            Some("chan-1".to_string())
        );
        assert_eq!(registry.find_by_application_server_key(Some("other")), None);
    }

    #[tokio::test]
    async fn re_init_all_replaces_every_subscription_with_a_new_channel_id() {
        let storage = storage();
        let crypto = Crypto::new();
        let sub = PushSubscription::create(
            &storage,
            &crypto,
            "chan-old",
            "https://push.example/old".to_string(),
            Some("server-key".to_string()),
        )
        .await
        .unwrap();
        let registry = SubscriptionRegistry::new();
        registry.insert(sub);

        let channel_ids = registry
            .re_init_all(&storage, &crypto, |application_server_key| {
                let application_server_key = application_server_key.map(str::to_string);
                async move {
                    assert_eq!(application_server_key.as_deref(), Some("server-key"));
                    Ok(("chan-new".to_string(), "https://push.example/new".to_string()))
                }
            })
            .await;

        assert_eq!(channel_ids, vec!["chan-new".to_string()]);
        assert!(!registry.contains("chan-old"));
        assert!(registry.contains("chan-new"));
        registry
            .with("chan-new", |sub| {
                assert_eq!(sub.endpoint(), "https://push.example/new");
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn re_init_all_skips_a_subscription_whose_register_fails() {
        let storage = storage();
        let crypto = Crypto::new();
        let sub = PushSubscription::create(
            &storage,
            &crypto,
            "chan-old",
            "https://push.example/old".to_string(),
            None,
        )
        .await
        .unwrap();
        let registry = SubscriptionRegistry::new();
        registry.insert(sub);

        let channel_ids = registry
            .re_init_all(&storage, &crypto, |_| async {
                Err(PushError::TransportError("no route to server".to_string()))
            })
            .await;

        assert!(channel_ids.is_empty());
        assert!(!registry.contains("chan-old"));
    }

    #[tokio::test]
    async fn remove_drops_subscription() {
        let storage = storage();
        let crypto = Crypto::new();
        let sub = PushSubscription::create(
            &storage,
            &crypto,
            "chan-1",
            "https://push.example/a".to_string(),
            None,
        )
        .await
        .unwrap();
        let registry = SubscriptionRegistry::new();
        registry.insert(sub);
        assert!(registry.remove("chan-1").is_some());
        assert!(!registry.contains("chan-1"));
    }
}
