//! Subscription guards handed out by the notification manager.
//!
//! Both guards follow the same RAII contract as
//! [`herald_events::Subscription`]: dropping the guard detaches the
//! subscriber, and [`unsubscribe`](NotificationSubscription::unsubscribe)
//! does the same explicitly. Teardown is idempotent.

use tokio_util::sync::CancellationToken;

use herald_events::Subscription;

// ---------------------------------------------------------------------------
// NotificationSubscription
// ---------------------------------------------------------------------------

/// Guard for a notification subscriber registered through
/// [`NotificationManager::subscribe_to_notifications_for_user`].
///
/// Tearing down cancels any in-flight replay of persisted notifications,
/// detaches the subscriber from every recipient group it joined, and
/// removes the on-group-created hook that would have joined it to future
/// groups. Notifications still queued for the subscriber are discarded.
///
/// [`NotificationManager::subscribe_to_notifications_for_user`]:
/// crate::NotificationManager::subscribe_to_notifications_for_user
pub struct NotificationSubscription {
    replay_cancel: CancellationToken,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl NotificationSubscription {
    pub(crate) fn new(
        replay_cancel: CancellationToken,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            replay_cancel,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Detaches the subscriber. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            // Stop the replay task before detaching so no further
            // callbacks fire once teardown completes.
            self.replay_cancel.cancel();
            teardown();
        }
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl std::fmt::Debug for NotificationSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSubscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ReadSubscription
// ---------------------------------------------------------------------------

/// Guard for a read-activity subscriber registered through
/// [`NotificationManager::subscribe_to_reads_for_user`].
///
/// An anonymous subscriber gets an inert guard whose teardown does
/// nothing, so callers can treat both cases uniformly.
///
/// [`NotificationManager::subscribe_to_reads_for_user`]:
/// crate::NotificationManager::subscribe_to_reads_for_user
#[derive(Debug)]
pub struct ReadSubscription {
    guards: Vec<Subscription>,
}

impl ReadSubscription {
    pub(crate) fn inert() -> Self {
        Self { guards: Vec::new() }
    }

    pub(crate) fn active(on_read: Subscription, on_cleared: Subscription) -> Self {
        Self {
            guards: vec![on_read, on_cleared],
        }
    }

    /// Detaches the subscriber. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
