/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Namespaced storage wrapper.
//!
//! `internal::storage::Storage` is a SQL-backed, domain-specific store
//! (`get_record`, `set_uaid`, ...). This crate's storage facade is
//! deliberately the opposite shape: a tiny opaque key/value backend
//! wrapped by a `NamespacedStorage` that JSON-encodes values and
//! colon-joins keys, the way `PersistedRateLimiter` layers meaning on
//! top of `Storage::get_meta`/`set_meta` string pairs.

pub mod memory;

use crate::codec::join_namespaces;
use crate::error::{PushError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// The opaque key/value backend a host plugs in: any implementation
/// (sqlite, a browser extension's storage.local, a mobile
/// keychain-backed store, ...) is acceptable as long as reads/writes are
/// serialized per key and errors propagate unchanged.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Wraps a `KvStore` with a colon-joined namespace prefix and JSON
/// (de)serialization. `extend` nests a further namespace segment, the way
/// `PushSubscription::create` extends storage with the channel-id before
/// writing `endpoint`/`options`/`auth`/`privateEncKey`.
#[derive(Clone)]
pub struct NamespacedStorage<S> {
    backend: S,
    prefix: String,
}

impl<S> NamespacedStorage<S>
where
    S: AsRef<dyn KvStore> + Clone,
{
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            prefix: String::new(),
        }
    }

    /// Nests a further namespace segment under the current one.
    pub fn extend(&self, suffix: &str) -> Self {
        Self {
            backend: self.backend.clone(),
            prefix: join_namespaces(&self.prefix, suffix),
        }
    }

    fn full_key(&self, key: &str) -> String {
        join_namespaces(&self.prefix, key)
    }

    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full = self.full_key(key);
        match self.backend.as_ref().read(&full).await? {
            None => Ok(None),
            Some(raw) => {
                let value: serde_json::Value = serde_json::from_str(&raw)?;
                if value.is_null() {
                    Ok(None)
                } else {
                    Ok(Some(serde_json::from_value(value).map_err(|e| {
                        PushError::StorageError(format!("malformed value at {full}: {e}"))
                    })?))
                }
            }
        }
    }

    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let full = self.full_key(key);
        let raw = serde_json::to_string(value)?;
        self.backend.as_ref().write(&full, raw).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.backend.as_ref().remove(&full).await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryKvStore;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn read_write_round_trips_json() {
        let storage = NamespacedStorage::new(Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>);
        storage.write("uaid", &"abc-123".to_string()).await.unwrap();
        let value: Option<String> = storage.read("uaid").await.unwrap();
        assert_eq!(value, Some("abc-123".to_string()));
    }

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let storage = NamespacedStorage::new(Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>);
        let value: Option<String> = storage.read("missing").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn extend_namespaces_do_not_collide() {
        let backend = Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>;
        let a = NamespacedStorage::new(backend.clone()).extend("chan-a");
        let b = NamespacedStorage::new(backend).extend("chan-b");
        a.write("endpoint", &"https://a".to_string()).await.unwrap();
        b.write("endpoint", &"https://b".to_string()).await.unwrap();
        let a_val: Option<String> = a.read("endpoint").await.unwrap();
        let b_val: Option<String> = b.read("endpoint").await.unwrap();
        assert_eq!(a_val, Some("https://a".to_string()));
        assert_eq!(b_val, Some("https://b".to_string()));
    }

    #[tokio::test]
    async fn remove_clears_value() {
        let storage = NamespacedStorage::new(Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>);
        storage.write("uaid", &"abc".to_string()).await.unwrap();
        storage.remove("uaid").await.unwrap();
        let value: Option<String> = storage.read("uaid").await.unwrap();
        assert_eq!(value, None);
    }
}
