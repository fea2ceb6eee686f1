//! Payload-less events for signal-style notifications.

use crate::event::{DeliveryMode, Event, Subscription};

/// A multicast event that carries no value.
///
/// Same delivery semantics as [`Event`], for cases where the fact that
/// something happened is the entire message (consent granted, state
/// invalidated, and so on).
#[derive(Clone, Default)]
pub struct NoArgEvent {
    inner: Event<()>,
}

impl NoArgEvent {
    /// Create an event with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Event::new(),
        }
    }

    /// Subscribe `callback` to this event.
    ///
    /// Must be called from within a Tokio runtime (spawns the
    /// subscription's worker task).
    pub fn subscribe(
        &self,
        mode: DeliveryMode,
        callback: impl Fn() + Send + 'static,
    ) -> Subscription {
        self.inner.subscribe(mode, move |()| callback())
    }

    /// Fire the event without waiting for any callback to run.
    pub fn notify(&self) {
        self.inner.notify(());
    }

    /// Fire the event and wait until every subscription live at
    /// publication time has finished running its callback.
    pub async fn notify_and_wait(&self) {
        self.inner.notify_and_wait(()).await;
    }

    /// Number of currently registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fires_subscribed_callbacks() {
        let event = NoArgEvent::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        let _s1 = event.subscribe(DeliveryMode::BufferAll, move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        let _s2 = event.subscribe(DeliveryMode::BufferAll, move || {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        event.notify_and_wait().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribed_callback_no_longer_fires() {
        let event = NoArgEvent::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let subscription = event.subscribe(DeliveryMode::BufferAll, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        event.notify_and_wait().await;
        subscription.unsubscribe();
        event.notify_and_wait().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
