/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `PushManager`: the host-facing entry point.
//!
//! Owns the socket's reconnect loop, the mediator, and the subscription
//! registry, and exposes the small API surface a host actually calls:
//! `subscribe`, `unsubscribe`, `get_subscription`, `destroy`. Each call
//! resolves a `register`/`unregister` round trip over the shared socket
//! via a correlated oneshot rather than a dedicated HTTP request.

use crate::config::PushConfiguration;
use crate::crypto::Cryptography;
use crate::error::{PushError, Result};
use crate::mediator::{Dispatch, Mediator};
use crate::message::ServerMessage;
use crate::senders::{HelloSender, RegisterSender, UnregisterSender};
use crate::socket::Socket;
use crate::storage::{KvStore, NamespacedStorage};
use crate::subscription::registry::SubscriptionRegistry;
use crate::subscription::PushSubscription;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Resolves to the channel-id the server actually registered (which may
/// differ from the one first sent, after a retry mints a new one) and
/// the endpoint it handed back.
type RegisterWaiters = StdMutex<HashMap<String, oneshot::Sender<Result<(String, String)>>>>;
type UnregisterWaiters = StdMutex<HashMap<String, oneshot::Sender<Result<()>>>>;

pub struct PushManager<S> {
    config: PushConfiguration,
    storage: NamespacedStorage<S>,
    mediator: Arc<Mediator<S>>,
    crypto: Arc<dyn Cryptography + Send + Sync>,
    socket: Arc<AsyncMutex<Socket>>,
    uaid: Arc<AsyncMutex<Option<String>>>,
    pending_registers: Arc<RegisterWaiters>,
    pending_unregisters: Arc<UnregisterWaiters>,
    hello_watchdog: StdMutex<Option<JoinHandle<()>>>,
}

impl<S> PushManager<S>
where
    S: AsRef<dyn KvStore> + Clone + Send + Sync + 'static,
{
    /// Loads persisted UAID/subscription state. Does not open a
    /// connection — call [`PushManager::connect`] once the returned
    /// handle is in its final `Arc`, so the background tasks it spawns
    /// can hold a clone of it for the lifetime of the connection.
    pub async fn create(
        config: PushConfiguration,
        backend: S,
        crypto: Arc<dyn Cryptography + Send + Sync>,
    ) -> Result<Arc<Self>> {
        let storage = NamespacedStorage::new(backend);
        let uaid: Option<String> = storage.read("uaid").await?;
        let channel_ids: Vec<String> = storage.read("channelIDs").await?.unwrap_or_default();
        let registry = SubscriptionRegistry::load(&storage, &channel_ids).await?;
        let mediator = Arc::new(Mediator::with_ack_interval(registry, config.ack_interval));

        Ok(Arc::new(Self {
            socket: Arc::new(AsyncMutex::new(Socket::new(config.clone()))),
            config,
            storage,
            mediator,
            crypto,
            uaid: Arc::new(AsyncMutex::new(uaid)),
            pending_registers: Arc::new(StdMutex::new(HashMap::new())),
            pending_unregisters: Arc::new(StdMutex::new(HashMap::new())),
            hello_watchdog: StdMutex::new(None),
        }))
    }

    /// Starts the reconnect loop and the ack/ping maintenance loop.
    /// Idempotent calls would spawn duplicate tasks, so this is the
    /// host's job to call exactly once per manager instance.
    pub fn connect(self: &Arc<Self>) {
        self.clone().spawn_connection_loop();
        self.clone().spawn_maintenance_loop();
    }

    /// Returns the subscription already registered under
    /// `application_server_key`, registering a new one with the server
    /// if none exists yet — one subscription per application server
    /// key, never per host-supplied channel-id.
    pub async fn subscribe(
        &self,
        application_server_key: Option<String>,
    ) -> Result<serde_json::Value> {
        if let Some(channel_id) = self
            .mediator
            .registry()
            .find_by_application_server_key(application_server_key.as_deref())
        {
            return self
                .mediator
                .registry()
                .with(&channel_id, |sub| Ok(sub.to_json()));
        }

        let (channel_id, endpoint) = self.register_channel(application_server_key.clone()).await?;

        let subscription = PushSubscription::create(
            &self.storage,
            self.crypto.as_ref(),
            &channel_id,
            endpoint,
            application_server_key,
        )
        .await?;
        let json = subscription.to_json();
        self.mediator.registry().insert(subscription);
        self.persist_channel_ids().await?;
        Ok(json)
    }

    /// Mints a channel-id, sends `register`, and resolves once the
    /// server's reply (after however many 409/500 retries it took)
    /// lands. Shared by `subscribe` and the post-rotation re-register
    /// sweep.
    async fn register_channel(&self, application_server_key: Option<String>) -> Result<(String, String)> {
        let uaid = self.uaid.lock().await.clone();
        let (channel_id, register_msg) =
            RegisterSender::build(uaid.as_deref(), application_server_key.as_deref())?;

        let (tx, rx) = oneshot::channel();
        self.pending_registers
            .lock()
            .unwrap()
            .insert(channel_id.clone(), tx);
        self.mediator
            .expect_register(&channel_id, application_server_key.as_deref());
        self.socket.lock().await.send(register_msg)?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(PushError::TransportError(
                "register never acknowledged".to_string(),
            )),
        }
    }

    /// Drops a subscription, notifying the server and clearing persisted
    /// state.
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<()> {
        self.mediator.registry().get(channel_id)?;

        let (tx, rx) = oneshot::channel();
        self.pending_unregisters
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), tx);
        self.socket
            .lock()
            .await
            .send(UnregisterSender::build(channel_id))?;
        rx.await
            .map_err(|_| PushError::TransportError("unregister never acknowledged".to_string()))??;

        if let Some(subscription) = self.mediator.registry().remove(channel_id) {
            subscription.destroy().await?;
        }
        self.persist_channel_ids().await
    }

    /// Current subscription JSON for `channel_id`, or `UnknownSubscription`
    /// if none exists.
    pub fn get_subscription(&self, channel_id: &str) -> Result<serde_json::Value> {
        self.mediator.registry().with(channel_id, |sub| Ok(sub.to_json()))
    }

    pub fn add_event_listener<F>(&self, channel_id: &str, callback: F) -> Result<crate::events::ListenerId>
    where
        F: Fn(&crate::events::PushEvent) + Send + Sync + 'static,
    {
        self.mediator
            .registry()
            .with(channel_id, |sub| Ok(sub.add_event_listener(callback)))
    }

    /// Tears down the connection and stops the background tasks. Does
    /// not clear persisted subscriptions — those survive a `destroy()`
    /// the same way a closed socket doesn't invalidate them.
    pub async fn destroy(&self) {
        self.mediator.destroy();
        self.socket.lock().await.mark_closed();
    }

    async fn persist_channel_ids(&self) -> Result<()> {
        self.storage
            .write("channelIDs", &self.mediator.registry().channel_ids())
            .await
    }

    fn spawn_connection_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut backoff = self.config.reconnect_initial_backoff;
            loop {
                let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

                // A fresh cancel handle per attempt: a watchdog that
                // fires after this attempt already succeeded or failed
                // must not be able to reach into a later attempt.
                let cancel = self.socket.lock().await.begin_attempt();
                {
                    let uaid = self.uaid.lock().await.clone();
                    let channel_ids = self.mediator.registry().channel_ids();
                    if let Err(e) = self
                        .socket
                        .lock()
                        .await
                        .send(HelloSender::build(uaid.as_deref(), &channel_ids))
                    {
                        log::error!("failed to queue hello: {e}");
                    }
                }

                let hello_timeout = self.config.hello_timeout;
                let watchdog = tokio::spawn(async move {
                    tokio::time::sleep(hello_timeout).await;
                    cancel.notify_one();
                });
                *self.hello_watchdog.lock().unwrap() = Some(watchdog);

                let manager = self.clone();
                let inbound_task = tokio::spawn(async move {
                    while let Some(msg) = inbound_rx.recv().await {
                        manager.handle_inbound(msg).await;
                    }
                });

                let run_result = self.socket.lock().await.run_once(&inbound_tx).await;
                inbound_task.abort();
                if let Some(watchdog) = self.hello_watchdog.lock().unwrap().take() {
                    watchdog.abort();
                }

                match run_result {
                    Ok(()) => {
                        log::info!("socket closed cleanly");
                        return;
                    }
                    Err(e) => {
                        log::warn!("socket dropped: {e}, reconnecting in {backoff:?}");
                        self.socket.lock().await.mark_reconnecting();
                        tokio::time::sleep(backoff).await;
                        backoff = crate::socket::next_backoff(backoff, self.config.reconnect_max_backoff);
                    }
                }
            }
        });
    }

    /// Re-registers every live subscription after a UAID rotation,
    /// reusing each one's application server key, and persists the
    /// resulting channel-id set.
    async fn reinit_subscriptions_after_rotation(self: &Arc<Self>) {
        let channel_ids = self
            .mediator
            .registry()
            .re_init_all(&self.storage, self.crypto.as_ref(), |application_server_key| {
                let manager = self.clone();
                let application_server_key = application_server_key.map(str::to_string);
                async move { manager.register_channel(application_server_key).await }
            })
            .await;
        if let Err(e) = self.storage.write("channelIDs", &channel_ids).await {
            log::error!("failed to persist channel ids after UAID rotation: {e}");
        }
    }

    fn spawn_maintenance_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.ack_interval);
            loop {
                ticker.tick().await;
                let socket = self.socket.lock().await;
                if let Some(ack) = self.mediator.flush_acks() {
                    let _ = socket.send(ack);
                }
                if let Some(ping) = self.mediator.try_ping() {
                    let _ = socket.send(ping);
                }
            }
        });
    }

    async fn handle_inbound(self: &Arc<Self>, msg: ServerMessage) {
        let previous_uaid = self.uaid.lock().await.clone();
        match self
            .mediator
            .handle(previous_uaid.as_deref(), self.crypto.as_ref(), &msg)
        {
            Ok(Dispatch::HelloAck { rotated_uaid }) => {
                if let Some(watchdog) = self.hello_watchdog.lock().unwrap().take() {
                    watchdog.abort();
                }
                if let ServerMessage::Hello { uaid, .. } = &msg {
                    *self.uaid.lock().await = Some(uaid.clone());
                    let _ = self.storage.write("uaid", uaid).await;
                }

                let manager = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(manager.config.hello_settle_delay).await;
                    if rotated_uaid.is_some() {
                        log::warn!("UAID rotated; re-registering existing subscriptions");
                        manager.reinit_subscriptions_after_rotation().await;
                    }
                    manager.socket.lock().await.mark_ready();
                });
            }
            Ok(Dispatch::RegisterAck { channel_id, endpoint }) => {
                if let Some(tx) = self.pending_registers.lock().unwrap().remove(&channel_id) {
                    let _ = tx.send(Ok((channel_id, endpoint)));
                }
            }
            Ok(Dispatch::RegisterRetry {
                channel_id,
                application_server_key,
                delay,
            }) => {
                let Some(waiter) = self.pending_registers.lock().unwrap().remove(&channel_id) else {
                    log::debug!("register retry for {channel_id} has no waiter, dropping");
                    return;
                };
                let manager = self.clone();
                tokio::spawn(async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    let result = manager.register_channel(application_server_key).await;
                    let _ = waiter.send(result);
                });
            }
            Ok(Dispatch::RegisterAbandoned { channel_id }) => {
                log::warn!("register ack for {channel_id} had no matching request; cleaning up");
                let _ = self
                    .socket
                    .lock()
                    .await
                    .send(UnregisterSender::build(&channel_id));
            }
            Ok(Dispatch::UnregisterAck { channel_id }) => {
                if let Some(tx) = self.pending_unregisters.lock().unwrap().remove(&channel_id) {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Dispatch::UnregisterRetry { channel_id, delay }) => {
                let Some(waiter) = self.pending_unregisters.lock().unwrap().remove(&channel_id) else {
                    log::debug!("unregister retry for {channel_id} has no waiter, dropping");
                    return;
                };
                let manager = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let (tx, rx) = oneshot::channel();
                    manager
                        .pending_unregisters
                        .lock()
                        .unwrap()
                        .insert(channel_id.clone(), tx);
                    if let Err(e) = manager
                        .socket
                        .lock()
                        .await
                        .send(UnregisterSender::build(&channel_id))
                    {
                        manager.pending_unregisters.lock().unwrap().remove(&channel_id);
                        let _ = waiter.send(Err(e));
                        return;
                    }
                    let result = match rx.await {
                        Ok(result) => result,
                        Err(_) => Err(PushError::TransportError(
                            "unregister never acknowledged".to_string(),
                        )),
                    };
                    let _ = waiter.send(result);
                });
            }
            Ok(Dispatch::NotificationAcked) | Ok(Dispatch::Handled) => {}
            Err(e) => {
                log::error!("failed to handle inbound frame: {e}");
                if let ServerMessage::Register { channel_id, .. } = &msg {
                    if let Some(tx) = self.pending_registers.lock().unwrap().remove(channel_id) {
                        let _ = tx.send(Err(e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Crypto;
    use crate::storage::memory::MemoryKvStore;

    #[tokio::test]
    async fn get_subscription_of_unknown_channel_is_unknown_subscription_error() {
        let config = PushConfiguration::default();
        let backend = Arc::new(MemoryKvStore::new()) as Arc<dyn KvStore>;
        let manager = PushManager::create(config, backend, Arc::new(Crypto::new()))
            .await
            .unwrap();
        let err = manager.get_subscription("nope").unwrap_err();
        assert!(matches!(err, PushError::UnknownSubscription(_)));
        manager.destroy().await;
    }
}
