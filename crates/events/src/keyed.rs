//! Keyed multicast: subscribers register under a key and only see values
//! published under that exact key.
//!
//! Per-key channels are created lazily on first subscribe and removed
//! again when their last subscriber goes away, so idle keys cost nothing.
//! A sentinel key (for example `Option::<UserAddress>::None` for "no
//! user") is an ordinary key, distinct from every other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{DeliveryMode, Event, Subscription};

struct KeyedInner<K, T> {
    channels: Mutex<HashMap<K, Event<T>>>,
}

/// In-process multicast event with per-key subscriber sets.
///
/// Cloning a `KeyedEvent` yields another handle to the same channel map.
/// Delivery semantics within one key are exactly those of [`Event`].
pub struct KeyedEvent<K, T> {
    inner: Arc<KeyedInner<K, T>>,
}

impl<K, T> Clone for KeyedEvent<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> Default for KeyedEvent<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> KeyedEvent<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    /// Create a keyed event with no channels.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(KeyedInner {
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe `callback` under `key`.
    ///
    /// Only values published under the same key reach this subscription.
    /// Must be called from within a Tokio runtime (spawns the
    /// subscription's worker task).
    pub fn subscribe(
        &self,
        key: K,
        mode: DeliveryMode,
        callback: impl Fn(T) + Send + 'static,
    ) -> Subscription {
        // Subscribing while holding the map lock keeps channel creation
        // and subscription atomic with respect to last-subscriber GC.
        let subscription = {
            let mut channels = self.inner.channels.lock();
            channels
                .entry(key.clone())
                .or_default()
                .subscribe(mode, callback)
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || match weak.upgrade() {
            Some(inner) => {
                let mut channels = inner.channels.lock();
                subscription.unsubscribe();
                // Remove the per-key channel with its last subscriber.
                if let Some(event) = channels.get(&key) {
                    if event.subscriber_count() == 0 {
                        channels.remove(&key);
                    }
                }
            }
            None => subscription.unsubscribe(),
        })
    }

    /// Publish `value` to every subscriber registered under `key` without
    /// waiting for any callback to run.
    ///
    /// A key with no subscribers is a cheap no-op.
    pub fn notify(&self, key: &K, value: T) {
        if let Some(event) = self.channel(key) {
            event.notify(value);
        }
    }

    /// Publish `value` under `key` and wait until every subscription live
    /// at publication time has finished running its callback for it.
    pub async fn notify_and_wait(&self, key: &K, value: T) {
        if let Some(event) = self.channel(key) {
            event.notify_and_wait(value).await;
        }
    }

    /// Number of subscriptions currently registered under `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner
            .channels
            .lock()
            .get(key)
            .map_or(0, Event::subscriber_count)
    }

    /// Number of keys that currently have at least one subscription.
    pub fn key_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Clone out the channel for `key` so delivery happens outside the
    /// map lock.
    fn channel(&self, key: &K) -> Option<Event<T>> {
        self.inner.channels.lock().get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
