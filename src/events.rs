/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Event manager: a topic → listener map with UUID-identified listeners,
//! synchronous in-order dispatch.
//!
//! Grounded on the `notifier` crate's stub ("Workhorse function that
//! handles incoming notifications ... distributing them to the appropriate
//! handlers via the internal event bus") — this is that event bus, made
//! concrete.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub type ListenerId = Uuid;

/// The events a [`crate::subscription::PushSubscription`] can fire.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A decrypted payload, or `None` for a data-less keepalive notification.
    Notification(Option<String>),
    /// Fired when a UAID rotation forces a subscription to be recreated.
    /// Carries the JSON projection from `PushSubscription::to_json`.
    SubscriptionChange(serde_json::Value),
}

type Listener = Box<dyn Fn(&PushEvent) + Send + Sync>;

/// Dispatch is synchronous, in listener-registration order. A panicking
/// listener is caught and logged rather than aborting dispatch to later
/// listeners.
#[derive(Default)]
pub struct EventManager {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners.lock().unwrap().push((id, Box::new(callback)));
        id
    }

    pub fn remove_event_listener(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    /// Dispatches to a snapshot of the current listener list, so a listener
    /// that adds/removes listeners mid-dispatch doesn't affect this pass.
    pub fn dispatch_event(&self, event: PushEvent) {
        let snapshot: Vec<ListenerId> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(id, _)| *id).collect()
        };
        for id in snapshot {
            let callback_ran = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let guard = self.listeners.lock().unwrap();
                if let Some((_, cb)) = guard.iter().find(|(lid, _)| *lid == id) {
                    cb(&event);
                    true
                } else {
                    // Listener removed itself (or another listener) mid-dispatch.
                    false
                }
            }));
            if let Err(e) = callback_ran {
                log::error!("event listener panicked: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_runs_listeners_in_registration_order() {
        let manager = EventManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        manager.add_event_listener(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        manager.add_event_listener(move |_| o2.lock().unwrap().push(2));
        manager.dispatch_event(PushEvent::Notification(None));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn remove_event_listener_stops_future_dispatch() {
        let manager = EventManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = manager.add_event_listener(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        manager.dispatch_event(PushEvent::Notification(None));
        manager.remove_event_listener(id);
        manager.dispatch_event(PushEvent::Notification(None));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_panicking_listener_does_not_block_others() {
        let manager = EventManager::new();
        manager.add_event_listener(|_| panic!("boom"));
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        manager.add_event_listener(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        manager.dispatch_event(PushEvent::Notification(None));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
