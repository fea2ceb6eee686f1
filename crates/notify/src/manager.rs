//! Notification routing, persistence, replay, and read tracking.
//!
//! The [`NotificationManager`] is the single entry point for publishing
//! notifications and for subscribing to them. Publishing never blocks on
//! subscribers; persisted notifications are replayed to late subscribers
//! and cleared on expiry or once every addressed user has read them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use herald_core::{Notification, PersistencyKey, Recipient, RecipientId, Timestamp, UserAddress};
use herald_events::{DeliveryMode, Event, KeyedEvent, Subscription};

use crate::subscription::{NotificationSubscription, ReadSubscription};

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Callback shared between the direct channel, every group channel a
/// subscriber joins, and its replay task.
type SharedCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// Hook run under the registry lock whenever a group container is
/// created, so existing subscribers can join it before its first
/// notification is delivered. Hooks must never call back into the
/// manager.
type GroupCreatedHook = Box<dyn FnMut(&RecipientId, &mut GroupContainer) + Send>;

/// Group subscriptions owned by one notification subscriber. The
/// on-group-created hook appends to this for as long as the
/// subscription lives.
type GroupAttachments = Arc<Mutex<Vec<(RecipientId, Subscription)>>>;

/// A multi-user recipient that currently has at least one subscriber.
struct GroupContainer {
    recipient: Recipient,
    event: Event<Notification>,
    subscriber_count: usize,
}

/// Group containers plus the hooks that join subscribers to new ones.
/// Both live under one lock so that container creation and subscriber
/// attachment are a single atomic step.
struct GroupRegistry {
    containers: HashMap<RecipientId, GroupContainer>,
    hooks: HashMap<u64, GroupCreatedHook>,
    next_hook_id: u64,
}

/// A retained notification together with its read state. Keeping the
/// read set inside the entry means it exists exactly as long as the
/// entry does.
struct PersistedEntry {
    notification: Notification,
    read_by: HashSet<UserAddress>,
    monitor_cancel: CancellationToken,
}

type PersistedStore = HashMap<PersistencyKey, PersistedEntry>;

struct ManagerShared {
    groups: Mutex<GroupRegistry>,
    persisted: RwLock<PersistedStore>,
    /// Single-user deliveries, keyed by address. `None` is the channel
    /// for subscribers with no user identity.
    direct: KeyedEvent<Option<UserAddress>, Notification>,
    /// Read receipts, keyed by the address of the user that read.
    reads: KeyedEvent<UserAddress, PersistencyKey>,
    /// Fired once whenever a persisted notification is removed.
    cleared: Event<PersistencyKey>,
}

impl ManagerShared {
    /// Remove `key` from the store, stop its expiration monitor, and
    /// fire the cleared event. A no-op when the key is not present, so
    /// clearing is idempotent. The caller holds the store's write lock.
    fn clear_entry_locked(&self, persisted: &mut PersistedStore, key: &PersistencyKey) {
        if let Some(entry) = persisted.remove(key) {
            entry.monitor_cancel.cancel();
            tracing::debug!(key = %key, "Cleared persisted notification");
            self.cleared.notify(key.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationManager
// ---------------------------------------------------------------------------

/// Routes notifications to subscribers, retains the ones that ask for
/// it, and tracks which users have read them.
///
/// Delivery runs over three channels: a keyed channel for single-user
/// notifications, one broadcast channel per active recipient group, and
/// a keyed channel plus a broadcast channel for read activity. Group
/// channels exist only while they have subscribers; subscribing and
/// group creation synchronize on one lock so a subscriber never misses
/// a notification published after its subscribe call.
///
/// Publishing is fire-and-forget. Subscriber callbacks run on their own
/// tasks and cannot slow a publisher down.
///
/// Cloning is cheap; clones share all state. Subscribe and publish
/// operations spawn background tasks and must run inside a Tokio
/// runtime.
#[derive(Clone)]
pub struct NotificationManager {
    shared: Arc<ManagerShared>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                groups: Mutex::new(GroupRegistry {
                    containers: HashMap::new(),
                    hooks: HashMap::new(),
                    next_hook_id: 0,
                }),
                persisted: RwLock::new(HashMap::new()),
                direct: KeyedEvent::new(),
                reads: KeyedEvent::new(),
                cleared: Event::new(),
            }),
        }
    }

    /// Publish `notification` to every current subscriber it addresses.
    ///
    /// If the notification carries persistence instructions it is
    /// retained first, superseding any previous notification under the
    /// same key, so a subscriber arriving mid-publish sees it either
    /// live or via replay. Delivery to a recipient group that has no
    /// subscribers is dropped; single-user notifications never create
    /// group state.
    pub fn notify(&self, notification: Notification) {
        self.maybe_persist(&notification);

        if let Recipient::User(address) = &notification.recipient {
            let channel = Some(address.clone());
            self.shared.direct.notify(&channel, notification);
            return;
        }

        self.notify_group(notification);
    }

    /// Subscribe `callback` to every notification addressed to `user`,
    /// with `None` subscribing an anonymous consumer that only sees
    /// notifications addressed to everyone.
    ///
    /// The subscriber is attached to all matching channels before this
    /// call returns, so no notification published afterwards is missed.
    /// Persisted notifications the user has not read yet are then
    /// replayed asynchronously; a replayed notification may also arrive
    /// live if its publication raced the subscribe call.
    pub fn subscribe_to_notifications_for_user(
        &self,
        user: Option<&UserAddress>,
        callback: impl Fn(Notification) + Send + Sync + 'static,
    ) -> NotificationSubscription {
        let callback: SharedCallback = Arc::new(callback);
        let user: Option<UserAddress> = user.cloned();
        let attachments: GroupAttachments = Arc::new(Mutex::new(Vec::new()));

        // Join all existing groups and install the hook that joins
        // future ones in one critical section, so a group created by a
        // concurrent publish cannot slip between the two.
        let hook_id = {
            let mut registry = self.shared.groups.lock();

            for (recipient_id, container) in registry.containers.iter_mut() {
                attach_if_member(recipient_id, container, user.as_ref(), &callback, &attachments);
            }

            let hook_user = user.clone();
            let hook_callback = Arc::clone(&callback);
            let hook_attachments = Arc::clone(&attachments);
            let hook: GroupCreatedHook = Box::new(move |recipient_id, container| {
                attach_if_member(
                    recipient_id,
                    container,
                    hook_user.as_ref(),
                    &hook_callback,
                    &hook_attachments,
                );
            });

            let hook_id = registry.next_hook_id;
            registry.next_hook_id += 1;
            registry.hooks.insert(hook_id, hook);
            hook_id
        };

        let direct_callback = Arc::clone(&callback);
        let direct = self.shared.direct.subscribe(
            user.clone(),
            DeliveryMode::BufferAll,
            move |notification| direct_callback(notification),
        );

        // Replay persisted notifications off the caller's thread. Only
        // identified users have read state, so only they get a replay.
        let replay_cancel = CancellationToken::new();
        if let Some(address) = user {
            tokio::spawn(replay_persisted(
                Arc::downgrade(&self.shared),
                address,
                Arc::clone(&callback),
                replay_cancel.clone(),
            ));
        }

        let weak = Arc::downgrade(&self.shared);
        NotificationSubscription::new(replay_cancel, move || {
            if let Some(shared) = weak.upgrade() {
                let mut registry = shared.groups.lock();
                registry.hooks.remove(&hook_id);

                let joined = std::mem::take(&mut *attachments.lock());
                for (recipient_id, guard) in joined {
                    guard.unsubscribe();
                    let now_empty = match registry.containers.get_mut(&recipient_id) {
                        Some(container) => {
                            container.subscriber_count -= 1;
                            container.subscriber_count == 0
                        }
                        None => false,
                    };
                    if now_empty {
                        registry.containers.remove(&recipient_id);
                        tracing::debug!(
                            recipient = %recipient_id,
                            "Removed recipient group with no subscribers"
                        );
                    }
                }
            }
            drop(direct);
        })
    }

    /// Record that `user` has read the persisted notification stored
    /// under `key`.
    ///
    /// Fires the read event for that user, and clears the notification
    /// once its recipient is fully contained in the set of users that
    /// have read it. Unknown keys and anonymous users are no-ops.
    pub fn mark_as_read(&self, key: &PersistencyKey, user: Option<&UserAddress>) {
        let Some(address) = user else { return };

        let mut persisted = self.shared.persisted.write();
        let Some(entry) = persisted.get_mut(key) else {
            return;
        };

        entry.read_by.insert(address.clone());
        let fully_read = entry
            .notification
            .recipient
            .fully_contained_within(&entry.read_by);

        tracing::trace!(key = %key, user = %address, "Notification marked as read");
        self.shared.reads.notify(address, key.clone());

        if fully_read {
            self.shared.clear_entry_locked(&mut persisted, key);
        }
    }

    /// Remove the persisted notification stored under `key`, if any.
    /// Safe to call for keys that were never persisted or were already
    /// cleared.
    pub fn clear_persisted_notification(&self, key: &PersistencyKey) {
        let mut persisted = self.shared.persisted.write();
        self.shared.clear_entry_locked(&mut persisted, key);
    }

    /// Remove every persisted notification whose key starts with
    /// `prefix`. A linear scan; the store is sized for administrative
    /// housekeeping, not bulk churn.
    pub fn clear_persisted_notifications_with_key_prefix(&self, prefix: &str) {
        let mut persisted = self.shared.persisted.write();
        let matching: Vec<PersistencyKey> = persisted
            .keys()
            .filter(|key| key.has_prefix(prefix))
            .cloned()
            .collect();
        for key in matching {
            self.shared.clear_entry_locked(&mut persisted, &key);
        }
    }

    /// Subscribe `callback` to read activity relevant to `user`: keys
    /// the user marks as read, and keys cleared for any reason.
    ///
    /// Consumers use this to retire notifications from their own views
    /// without polling. Anonymous users have no read state, so `None`
    /// returns an inert guard.
    pub fn subscribe_to_reads_for_user(
        &self,
        user: Option<&UserAddress>,
        callback: impl Fn(PersistencyKey) + Send + Sync + 'static,
    ) -> ReadSubscription {
        let Some(address) = user else {
            return ReadSubscription::inert();
        };

        let callback = Arc::new(callback);
        let read_callback = Arc::clone(&callback);
        let on_read = self.shared.reads.subscribe(
            address.clone(),
            DeliveryMode::BufferAll,
            move |key| read_callback(key),
        );
        let on_cleared = self
            .shared
            .cleared
            .subscribe(DeliveryMode::BufferAll, move |key| callback(key));

        ReadSubscription::active(on_read, on_cleared)
    }

    /// Number of recipient groups that currently have subscribers.
    /// Intended for tests and diagnostics.
    pub fn recipient_group_count(&self) -> usize {
        self.shared.groups.lock().containers.len()
    }

    /// Number of notifications currently persisted. Intended for tests
    /// and diagnostics.
    pub fn persisted_notification_count(&self) -> usize {
        self.shared.persisted.read().len()
    }

    /// Deliver to the recipient's group channel, creating the channel
    /// on first use.
    fn notify_group(&self, notification: Notification) {
        let recipient_id = notification.recipient.id();
        let mut registry = self.shared.groups.lock();

        if let Some(container) = registry.containers.get(&recipient_id) {
            container.event.notify(notification);
            return;
        }

        // First notification for this recipient. Build the container
        // and let every live subscriber join it through its hook, all
        // inside the registry lock, so concurrent subscribe calls and
        // this delivery agree on who was attached.
        let mut container = GroupContainer {
            recipient: notification.recipient.clone(),
            event: Event::new(),
            subscriber_count: 0,
        };
        for hook in registry.hooks.values_mut() {
            hook(&recipient_id, &mut container);
        }

        if container.subscriber_count > 0 {
            tracing::debug!(
                recipient = %recipient_id,
                subscribers = container.subscriber_count,
                "Created recipient group"
            );
            container.event.notify(notification);
            registry.containers.insert(recipient_id, container);
        } else {
            // Nobody is listening; an empty container would only leak.
            tracing::trace!(
                recipient = %recipient_id,
                "Dropped notification for recipient with no subscribers"
            );
        }
    }

    /// Retain the notification if it carries persistence instructions,
    /// superseding any previous entry under the same key, and start its
    /// expiration monitor.
    fn maybe_persist(&self, notification: &Notification) {
        let Some(persistence) = &notification.persistence else {
            return;
        };
        let key = persistence.key.clone();
        let monitor_cancel = CancellationToken::new();

        {
            let mut persisted = self.shared.persisted.write();

            if let Some(previous) = persisted.remove(&key) {
                previous.monitor_cancel.cancel();
                if previous.notification.recipient.id() != notification.recipient.id() {
                    // The key changed hands. Announce the old entry as
                    // cleared so read state never carries over between
                    // unrelated recipients.
                    tracing::debug!(
                        key = %key,
                        "Cleared superseded notification with a different recipient"
                    );
                    self.shared.cleared.notify(key.clone());
                } else {
                    tracing::debug!(key = %key, "Superseded persisted notification");
                }
            }

            persisted.insert(
                key.clone(),
                PersistedEntry {
                    notification: notification.clone(),
                    read_by: HashSet::new(),
                    monitor_cancel: monitor_cancel.clone(),
                },
            );
            tracing::debug!(key = %key, kind = %notification.kind, "Persisted notification");
        }

        // The monitor starts outside the write lock; its token check
        // makes it exit harmlessly if the entry was already superseded.
        tokio::spawn(expiration_monitor(
            Arc::downgrade(&self.shared),
            key,
            persistence.expires_at,
            monitor_cancel,
        ));
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("recipient_groups", &self.recipient_group_count())
            .field("persisted_notifications", &self.persisted_notification_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Group attachment
// ---------------------------------------------------------------------------

/// Join `user`'s callback to a group container when the group contains
/// the user. Runs under the registry lock, both during subscribe and
/// from the on-group-created hook.
fn attach_if_member(
    recipient_id: &RecipientId,
    container: &mut GroupContainer,
    user: Option<&UserAddress>,
    callback: &SharedCallback,
    attachments: &GroupAttachments,
) {
    if !container.recipient.contains_user(user) {
        return;
    }

    container.subscriber_count += 1;
    let callback = Arc::clone(callback);
    let guard = container
        .event
        .subscribe(DeliveryMode::BufferAll, move |notification| {
            callback(notification)
        });
    attachments.lock().push((recipient_id.clone(), guard));
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Deliver persisted notifications addressed to `address` that it has
/// not read yet. The snapshot is taken under one read lock; delivery
/// happens outside it and stops at the first cancellation check that
/// fails.
async fn replay_persisted(
    shared: Weak<ManagerShared>,
    address: UserAddress,
    callback: SharedCallback,
    cancel: CancellationToken,
) {
    let pending: Vec<Notification> = {
        let Some(shared) = shared.upgrade() else { return };
        let persisted = shared.persisted.read();
        persisted
            .values()
            .filter(|entry| {
                entry.notification.recipient.contains_user(Some(&address))
                    && !entry.read_by.contains(&address)
            })
            .map(|entry| entry.notification.clone())
            .collect()
    };

    if pending.is_empty() {
        return;
    }
    tracing::debug!(user = %address, count = pending.len(), "Replaying persisted notifications");

    for notification in pending {
        if cancel.is_cancelled() {
            return;
        }
        callback(notification);
    }
}

/// Sleep until `expires_at` and clear `key`, unless the entry is
/// cleared or superseded first.
async fn expiration_monitor(
    shared: Weak<ManagerShared>,
    key: PersistencyKey,
    expires_at: Timestamp,
    cancel: CancellationToken,
) {
    let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(until_expiry) => {
            let Some(shared) = shared.upgrade() else { return };
            let mut persisted = shared.persisted.write();
            // A supersession may have raced the timer. The newer entry
            // under this key is not ours to clear.
            if cancel.is_cancelled() {
                return;
            }
            tracing::debug!(key = %key, "Persisted notification expired");
            shared.clear_entry_locked(&mut persisted, &key);
        }
    }
}
