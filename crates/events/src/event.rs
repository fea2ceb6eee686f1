//! Plain multicast event with per-subscriber worker tasks.
//!
//! [`Event`] fans a published value out to N subscribers. Each subscription
//! owns an independent delivery queue drained by its own worker task, so a
//! slow or blocking callback never stalls the producer or any other
//! subscriber, and each subscriber observes values in publication order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};

/// Pending-queue depth at which a warning is logged for one subscription.
/// Crossing it usually means the callback is stuck or too slow for the
/// publication rate it is seeing.
const QUEUE_DEPTH_WARN_THRESHOLD: usize = 1024;

// ---------------------------------------------------------------------------
// DeliveryMode
// ---------------------------------------------------------------------------

/// How pending values are queued for a subscriber while its callback is
/// busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every value is queued and delivered in publication order. The queue
    /// is unbounded; a slow callback delays only its own subscription.
    BufferAll,

    /// Only the most recent pending value is kept; older pending values
    /// are overwritten before delivery. For subscribers that only render
    /// current state.
    LatestOnly,
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for one subscription.
///
/// Dropping the guard, or calling
/// [`unsubscribe`](Subscription::unsubscribe), stops further delivery to
/// the callback; values still queued at that point are discarded. Teardown
/// runs at most once and is safe to race with in-flight deliveries. The
/// guard holds only a weak reference to the event, so it never keeps a
/// dropped event alive.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Stop delivery to this subscription's callback.
    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Internal delivery plumbing
// ---------------------------------------------------------------------------

/// One queued delivery: the value plus an optional acknowledgement sender
/// used by [`Event::notify_and_wait`].
struct Envelope<T> {
    value: T,
    ack: Option<oneshot::Sender<()>>,
}

/// Conflation slot shared between the producer and a `LatestOnly` worker.
struct LatestSlot<T> {
    pending: Mutex<Option<Envelope<T>>>,
    wakeup: Notify,
}

/// Producer-side handle to one subscriber's queue.
enum Channel<T> {
    Buffered {
        sender: mpsc::UnboundedSender<Envelope<T>>,
        depth: Arc<AtomicUsize>,
    },
    Latest(Arc<LatestSlot<T>>),
}

struct SubscriberEntry<T> {
    channel: Channel<T>,
    /// Cleared by the worker's drop guard when the task stops for any
    /// reason, including a panicking callback.
    alive: Arc<AtomicBool>,
}

struct SubscriberTable<T> {
    entries: HashMap<u64, SubscriberEntry<T>>,
    next_id: u64,
}

struct EventInner<T> {
    subscribers: Mutex<SubscriberTable<T>>,
}

/// Clears the subscription's liveness flag when its worker task stops,
/// whether it exited normally or unwound out of a panicking callback.
struct WorkerGuard {
    alive: Arc<AtomicBool>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// In-process multicast event.
///
/// Cloning an `Event` yields another handle to the same subscriber set.
/// Publication is non-blocking: [`notify`](Event::notify) enqueues for
/// every subscriber and returns without waiting for any callback.
///
/// # Usage
///
/// ```rust
/// use herald_events::{DeliveryMode, Event};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let event: Event<u32> = Event::new();
/// let subscription = event.subscribe(DeliveryMode::BufferAll, |value| {
///     println!("got {value}");
/// });
///
/// event.notify(42);
/// # drop(subscription);
/// # }
/// ```
pub struct Event<T> {
    inner: Arc<EventInner<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Event<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Event<T>
where
    T: Clone + Send + 'static,
{
    /// Create an event with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                subscribers: Mutex::new(SubscriberTable {
                    entries: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Subscribe `callback` to this event.
    ///
    /// Spawns one worker task that drains this subscription's queue, so
    /// this must be called from within a Tokio runtime. The callback runs
    /// on that worker: it may block without affecting other subscribers,
    /// and a panic inside it only kills this subscription.
    pub fn subscribe(
        &self,
        mode: DeliveryMode,
        callback: impl Fn(T) + Send + 'static,
    ) -> Subscription {
        let alive = Arc::new(AtomicBool::new(true));
        let cancelled = Arc::new(AtomicBool::new(false));
        let guard = WorkerGuard {
            alive: Arc::clone(&alive),
        };
        let worker_cancelled = Arc::clone(&cancelled);

        let channel = match mode {
            DeliveryMode::BufferAll => {
                let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope<T>>();
                let depth = Arc::new(AtomicUsize::new(0));
                let worker_depth = Arc::clone(&depth);
                tokio::spawn(async move {
                    let _guard = guard;
                    while let Some(envelope) = receiver.recv().await {
                        if worker_cancelled.load(Ordering::Acquire) {
                            break;
                        }
                        worker_depth.fetch_sub(1, Ordering::Relaxed);
                        callback(envelope.value);
                        if let Some(ack) = envelope.ack {
                            let _ = ack.send(());
                        }
                    }
                });
                Channel::Buffered { sender, depth }
            }
            DeliveryMode::LatestOnly => {
                let slot = Arc::new(LatestSlot {
                    pending: Mutex::new(None),
                    wakeup: Notify::new(),
                });
                let worker_slot = Arc::clone(&slot);
                tokio::spawn(async move {
                    let _guard = guard;
                    loop {
                        if worker_cancelled.load(Ordering::Acquire) {
                            break;
                        }
                        let next = worker_slot.pending.lock().take();
                        match next {
                            Some(envelope) => {
                                callback(envelope.value);
                                if let Some(ack) = envelope.ack {
                                    let _ = ack.send(());
                                }
                            }
                            None => worker_slot.wakeup.notified().await,
                        }
                    }
                });
                Channel::Latest(slot)
            }
        };

        // The teardown wakes a parked LatestOnly worker so it can observe
        // the cancel flag; a parked BufferAll worker wakes when its sender
        // is dropped with the registry entry.
        let wakeup = match &channel {
            Channel::Latest(slot) => Some(Arc::clone(slot)),
            Channel::Buffered { .. } => None,
        };

        let id = {
            let mut table = self.inner.subscribers.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.insert(id, SubscriberEntry { channel, alive });
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            cancelled.store(true, Ordering::Release);
            if let Some(slot) = &wakeup {
                slot.wakeup.notify_one();
            }
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().entries.remove(&id);
            }
        })
    }

    /// Publish `value` to every current subscriber without waiting for any
    /// callback to run.
    pub fn notify(&self, value: T) {
        let _ = self.fan_out(value, false);
    }

    /// Publish `value` and wait until every subscription live at
    /// publication time has finished running its callback for it.
    ///
    /// Subscriptions that unsubscribe, conflate the value away
    /// (`LatestOnly`), or fail before acknowledging count as finished.
    pub async fn notify_and_wait(&self, value: T) {
        let acks = self.fan_out(value, true);
        let _ = futures::future::join_all(acks).await;
    }

    /// Number of currently registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().entries.len()
    }

    /// Enqueue `value` for every live subscriber, pruning subscriptions
    /// whose worker has died. Returns one acknowledgement receiver per
    /// delivery when `with_acks` is set.
    fn fan_out(&self, value: T, with_acks: bool) -> Vec<oneshot::Receiver<()>> {
        let mut table = self.inner.subscribers.lock();
        let mut acks = Vec::new();
        let mut dead = Vec::new();

        for (&id, entry) in table.entries.iter() {
            if !entry.alive.load(Ordering::Acquire) {
                dead.push(id);
                continue;
            }

            let ack = with_acks.then(|| {
                let (ack_tx, ack_rx) = oneshot::channel();
                acks.push(ack_rx);
                ack_tx
            });
            let envelope = Envelope {
                value: value.clone(),
                ack,
            };

            match &entry.channel {
                Channel::Buffered { sender, depth } => {
                    // The worker decrements right after recv; counting the
                    // envelope before sending it keeps that decrement from
                    // ever landing first and wrapping the counter.
                    let pending = depth.fetch_add(1, Ordering::Relaxed) + 1;
                    if sender.send(envelope).is_err() {
                        depth.fetch_sub(1, Ordering::Relaxed);
                        dead.push(id);
                        continue;
                    }
                    if pending == QUEUE_DEPTH_WARN_THRESHOLD {
                        tracing::warn!(
                            subscriber = id,
                            depth = pending,
                            "Subscriber queue depth crossed warning threshold"
                        );
                    }
                }
                Channel::Latest(slot) => {
                    // Overwriting a pending envelope drops its ack sender,
                    // which resolves the waiter: conflated counts as done.
                    *slot.pending.lock() = Some(envelope);
                    slot.wakeup.notify_one();
                }
            }
        }

        for id in dead {
            table.entries.remove(&id);
        }

        acks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::timeout;

    /// A subscription callback that forwards every value into a channel
    /// the test can await on.
    fn capture<T: Send + 'static>() -> (impl Fn(T) + Send + 'static, mpsc::UnboundedReceiver<T>)
    {
        let (tx, rx) = unbounded_channel();
        let callback = move |value| {
            let _ = tx.send(value);
        };
        (callback, rx)
    }

    #[tokio::test]
    async fn subscriber_receives_published_value() {
        let event: Event<u32> = Event::new();
        let (callback, mut rx) = capture();
        let _subscription = event.subscribe(DeliveryMode::BufferAll, callback);

        event.notify(42);

        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("should not time out")
            .expect("should receive the value");
        assert_eq!(received, 42);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_value() {
        let event: Event<&'static str> = Event::new();
        let (cb1, mut rx1) = capture();
        let (cb2, mut rx2) = capture();
        let _s1 = event.subscribe(DeliveryMode::BufferAll, cb1);
        let _s2 = event.subscribe(DeliveryMode::BufferAll, cb2);

        event.notify("hello");

        assert_eq!(rx1.recv().await, Some("hello"));
        assert_eq!(rx2.recv().await, Some("hello"));
    }

    #[test]
    fn notify_with_no_subscribers_does_not_panic() {
        let event: Event<u32> = Event::new();
        // No subscribers -- this must not panic or block.
        event.notify(1);
    }

    #[tokio::test]
    async fn values_arrive_in_publication_order() {
        let event: Event<u32> = Event::new();
        let (callback, mut rx) = capture();
        let _subscription = event.subscribe(DeliveryMode::BufferAll, callback);

        for value in 0..100 {
            event.notify(value);
        }

        for expected in 0..100 {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_subscriber_does_not_stall_others() {
        let event: Event<u32> = Event::new();

        // First subscriber blocks inside its callback until released.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let _slow = event.subscribe(DeliveryMode::BufferAll, move |_| {
            let _ = gate_rx.recv();
        });

        let (callback, mut rx) = capture();
        let _fast = event.subscribe(DeliveryMode::BufferAll, callback);

        event.notify(1);
        event.notify(2);

        // The fast subscriber sees both values while the slow one is stuck.
        let first = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("fast subscriber should not be stalled");
        assert_eq!(first, Some(1));
        assert_eq!(rx.recv().await, Some(2));

        gate_tx.send(()).expect("release slow subscriber");
        gate_tx.send(()).expect("release slow subscriber");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let event: Event<u32> = Event::new();
        let (callback, mut rx) = capture();
        let subscription = event.subscribe(DeliveryMode::BufferAll, callback);

        subscription.unsubscribe();
        event.notify(1);

        let outcome = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(outcome.is_err(), "no value should arrive after unsubscribe");
        assert_eq!(event.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_guard_unsubscribes() {
        let event: Event<u32> = Event::new();
        let (callback, _rx) = capture();
        let subscription = event.subscribe(DeliveryMode::BufferAll, callback);
        assert_eq!(event.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(event.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queued_values_are_discarded_on_unsubscribe() {
        let event: Event<u32> = Event::new();

        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (tx, mut rx) = unbounded_channel();
        let subscription = event.subscribe(DeliveryMode::BufferAll, move |value: u32| {
            let _ = tx.send(value);
            if value == 1 {
                let _ = gate_rx.recv();
            }
        });

        event.notify(1);
        // Wait until the callback is inside the blocked first delivery.
        assert_eq!(rx.recv().await, Some(1));

        event.notify(2);
        event.notify(3);
        subscription.unsubscribe();
        gate_tx.send(()).expect("release subscriber");

        // The queued 2 and 3 must never be delivered.
        match timeout(Duration::from_millis(100), rx.recv()).await {
            Err(_) | Ok(None) => {}
            Ok(Some(value)) => panic!("unexpected delivery after unsubscribe: {value}"),
        }
    }

    #[tokio::test]
    async fn notify_and_wait_returns_after_all_callbacks_ran() {
        let event: Event<u32> = Event::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        let _s1 = event.subscribe(DeliveryMode::BufferAll, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        let _s2 = event.subscribe(DeliveryMode::BufferAll, move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        event.notify_and_wait(7).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn latest_only_conflates_while_busy() {
        let event: Event<u32> = Event::new();

        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (tx, mut rx) = unbounded_channel();
        let _subscription = event.subscribe(DeliveryMode::LatestOnly, move |value: u32| {
            let _ = tx.send(value);
            if value == 1 {
                let _ = gate_rx.recv();
            }
        });

        event.notify(1);
        assert_eq!(rx.recv().await, Some(1));

        // Published while the callback is busy; only the last one survives.
        event.notify(2);
        event.notify(3);
        event.notify(4);
        gate_tx.send(()).expect("release subscriber");

        assert_eq!(rx.recv().await, Some(4));
        let outcome = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(outcome.is_err(), "intermediate values must be conflated");
    }

    #[tokio::test]
    async fn panicking_callback_only_kills_its_own_subscription() {
        let event: Event<u32> = Event::new();

        let _bad = event.subscribe(DeliveryMode::BufferAll, |_| {
            panic!("subscriber failure");
        });
        let (callback, mut rx) = capture();
        let _good = event.subscribe(DeliveryMode::BufferAll, callback);
        assert_eq!(event.subscriber_count(), 2);

        event.notify(1);
        assert_eq!(rx.recv().await, Some(1));

        // Let the panicked worker finish unwinding before publishing again.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        event.notify(2);
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(
            event.subscriber_count(),
            1,
            "dead subscription should be pruned on publish"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_depth_accounting_survives_a_fast_consumer() {
        let event: Event<u32> = Event::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let _subscription = event.subscribe(DeliveryMode::BufferAll, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // A consumer that drains instantly keeps the queue at depth zero,
        // so its decrement races the publisher's increment on every
        // delivery; the counter must never wrap below zero.
        for value in 0..10_000 {
            event.notify_and_wait(value).await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 10_000);
    }
}
