//! Subscription registry.
//!
//! Maps a [`SubscriptionId`] to a topic and a callback. Every [`crate::Bus`]
//! owns exactly one registry; cloning a [`Registry`] clones the handle, not
//! the table.
//!
//! # Dispatch
//!
//! [`Registry::dispatch`] snapshots the matching ids under the lock, then
//! resolves and fires each callback with the lock released. Callbacks may
//! therefore call [`Registry::subscribe`] or [`Registry::unsubscribe`]
//! (including on themselves) without deadlocking. An entry removed earlier in
//! the same pass is skipped; an entry added during the pass waits for the next
//! frame.
//!
//! # Single-fire subscriptions
//!
//! [`Registry::subscribe_once`] entries are removed from the table in the same
//! critical section that hands out their callback, so two concurrent
//! dispatches can never both fire one.

// Rust guideline compliant 2026-02

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::frame::Frame;

/// Identifier of a live subscription.
///
/// Allocated from a per-registry monotonic counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw counter value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Callback for persistent subscriptions: `(id, code, value)`.
pub type Callback = Arc<dyn Fn(SubscriptionId, &str, &Value) + Send + Sync>;

/// Callback for single-fire subscriptions: `(id, code, value)`.
pub type OnceCallback = Box<dyn FnOnce(SubscriptionId, &str, &Value) + Send>;

/// Delivery policy of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Invoked for every matching frame until unsubscribed.
    Persistent,
    /// Invoked for the first matching frame, then removed.
    Once,
}

enum Handler {
    Persistent(Callback),
    Once(OnceCallback),
}

struct Subscription {
    topic: String,
    handler: Handler,
}

impl Subscription {
    fn delivery(&self) -> Delivery {
        match self.handler {
            Handler::Persistent(_) => Delivery::Persistent,
            Handler::Once(_) => Delivery::Once,
        }
    }
}

/// A callback resolved under the lock, ready to fire without it.
enum Ready {
    Persistent(Callback),
    Once(OnceCallback),
}

#[derive(Default)]
struct RegistryInner {
    /// Ordered by id, which is registration order.
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_id: u64,
}

impl RegistryInner {
    fn insert(&mut self, topic: String, handler: Handler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.insert(id, Subscription { topic, handler });
        id
    }
}

/// Thread-safe handle to a subscription table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Registry")
            .field("subscriptions", &inner.subscriptions.len())
            .field("next_id", &inner.next_id)
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("Registry mutex poisoned")
    }

    /// Register `callback` for every frame on `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(SubscriptionId, &str, &Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self
            .lock()
            .insert(topic.clone(), Handler::Persistent(Arc::new(callback)));
        log::debug!("[registry] Subscribed {} to '{}'", id, topic);
        id
    }

    /// Register `callback` for the next frame on `topic` only.
    ///
    /// The entry is removed before the callback runs.
    pub fn subscribe_once<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: FnOnce(SubscriptionId, &str, &Value) + Send + 'static,
    {
        let topic = topic.into();
        let id = self.lock().insert(topic.clone(), Handler::Once(Box::new(callback)));
        log::debug!("[registry] Subscribed {} to '{}' (once)", id, topic);
        id
    }

    /// Remove a subscription.
    ///
    /// Unknown or already-removed ids are ignored. Returns whether an entry
    /// was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().subscriptions.remove(&id).is_some();
        if removed {
            log::debug!("[registry] Unsubscribed {}", id);
        }
        removed
    }

    /// Whether `id` is still live.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.lock().subscriptions.contains_key(&id)
    }

    /// Delivery policy of a live subscription.
    #[must_use]
    pub fn delivery(&self, id: SubscriptionId) -> Option<Delivery> {
        self.lock().subscriptions.get(&id).map(Subscription::delivery)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Whether there are no live subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().subscriptions.is_empty()
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn topic_count(&self, topic: &str) -> usize {
        self.lock()
            .subscriptions
            .values()
            .filter(|sub| sub.topic == topic)
            .count()
    }

    /// Deliver `frame` to every subscription on its topic.
    ///
    /// Callbacks run in registration order with the lock released. A
    /// panicking callback is logged and does not stop delivery to the rest.
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        // Phase 1: snapshot matching ids.
        let matching: Vec<SubscriptionId> = {
            let inner = self.lock();
            inner
                .subscriptions
                .iter()
                .filter(|(_, sub)| sub.topic == frame.topic)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut invoked = 0;

        // Phase 2: resolve each id under the lock, fire without it.
        for id in matching {
            let Some(ready) = self.take_ready(id) else {
                continue;
            };

            let result = catch_unwind(AssertUnwindSafe(|| match ready {
                Ready::Persistent(callback) => callback(id, &frame.code, &frame.value),
                Ready::Once(callback) => callback(id, &frame.code, &frame.value),
            }));
            if result.is_err() {
                log::error!(
                    "[registry] Callback for {} panicked on topic '{}'",
                    id,
                    frame.topic
                );
            }
            invoked += 1;
        }

        invoked
    }

    /// Look up a live entry for dispatch, removing it if it is single-fire.
    fn take_ready(&self, id: SubscriptionId) -> Option<Ready> {
        let mut inner = self.lock();
        let once = matches!(inner.subscriptions.get(&id)?.handler, Handler::Once(_));
        if once {
            match inner.subscriptions.remove(&id)?.handler {
                Handler::Once(callback) => Some(Ready::Once(callback)),
                Handler::Persistent(_) => None,
            }
        } else {
            match &inner.subscriptions.get(&id)?.handler {
                Handler::Persistent(callback) => Some(Ready::Persistent(Arc::clone(callback))),
                Handler::Once(_) => None,
            }
        }
    }
}
