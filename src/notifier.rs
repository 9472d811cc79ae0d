//! Subscriber registry and fan-out for asynchronous events.
//!
//! Every subscriber owns an unbounded queue drained by its own consumer task,
//! so [`EventNotifier::publish`] never waits on a handler. Publishing holds the
//! registry lock while enqueueing, which gives all subscribers the same global
//! event order.
//!
//! Queues are never truncated: a handler that stops making progress grows its
//! queue without limit. The backlog is logged when it reaches the configured
//! warn depth and again each time it doubles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Opaque handle returned by [`EventNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(u64);

struct SubscriberSlot<E> {
    tx: mpsc::UnboundedSender<E>,
    active: Arc<AtomicBool>,
    /// Events queued but not yet handled (callback subscribers only).
    pending: Option<Arc<AtomicUsize>>,
}

struct NotifierInner<E> {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<u64, SubscriberSlot<E>>>,
    warn_depth: usize,
}

/// Thread-safe event fan-out. Cheap to clone; clones share one registry.
pub struct EventNotifier<E> {
    inner: Arc<NotifierInner<E>>,
}

impl<E> Clone for EventNotifier<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventNotifier<E> {
    fn default() -> Self {
        Self::new(crate::config::EventsConfig::default().subscriber_warn_depth)
    }
}

impl<E: Clone + Send + 'static> EventNotifier<E> {
    /// Create a notifier that warns once a subscriber has `warn_depth`
    /// undelivered events.
    #[must_use]
    pub fn new(warn_depth: usize) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(BTreeMap::new()),
                warn_depth: warn_depth.max(1),
            }),
        }
    }

    /// Register a handler for every subsequently published event.
    ///
    /// The handler runs on a dedicated consumer task (or thread, when called
    /// outside a Tokio runtime) and sees events in publish order. It may call
    /// [`unsubscribe`](Self::unsubscribe), including for its own handle.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(E) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<E>();
        let active = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));
        let id = self.register(SubscriberSlot {
            tx,
            active: Arc::clone(&active),
            pending: Some(Arc::clone(&pending)),
        });

        let mut deliver = move |event: E| -> bool {
            pending.fetch_sub(1, Ordering::AcqRel);
            if !active.load(Ordering::Acquire) {
                return false;
            }
            handler(event);
            true
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if !deliver(event) {
                            break;
                        }
                    }
                });
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name(format!("event-subscriber-{id}"))
                    .spawn(move || {
                        while let Some(event) = rx.blocking_recv() {
                            if !deliver(event) {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    tracing::error!(subscriber = id, error = %e, "failed to spawn subscriber thread");
                    self.unsubscribe(Subscription(id));
                }
            }
        }

        tracing::debug!(subscriber = id, "event subscriber registered");
        Subscription(id)
    }

    /// Register a subscriber that receives events through a channel instead of
    /// a callback.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(SubscriberSlot {
            tx,
            active: Arc::new(AtomicBool::new(true)),
            pending: None,
        });
        (Subscription(id), rx)
    }

    /// Remove a subscriber. Events still queued for it are discarded.
    ///
    /// Returns `false` if the handle was not registered.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let removed = self.lock().remove(&subscription.0);
        match removed {
            Some(slot) => {
                slot.active.store(false, Ordering::Release);
                tracing::debug!(subscriber = subscription.0, "event subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every current subscriber without waiting for any
    /// handler to run.
    pub fn publish(&self, event: E) {
        let mut subscribers = self.lock();
        let mut closed = Vec::new();

        for (id, slot) in subscribers.iter() {
            if let Some(pending) = &slot.pending {
                let depth = pending.fetch_add(1, Ordering::AcqRel) + 1;
                if crosses_warn_mark(depth, self.inner.warn_depth) {
                    tracing::warn!(
                        subscriber = id,
                        depth,
                        "event subscriber is falling behind"
                    );
                }
            }
            if slot.tx.send(event.clone()).is_err() {
                closed.push(*id);
            }
        }

        for id in closed {
            subscribers.remove(&id);
            tracing::debug!(subscriber = id, "dropped closed event subscriber");
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn register(&self, slot: SubscriberSlot<E>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, slot);
        id
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, SubscriberSlot<E>>> {
        match self.inner.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// `true` when `depth` is `warn_depth` times a power of two.
fn crosses_warn_mark(depth: usize, warn_depth: usize) -> bool {
    depth >= warn_depth && depth % warn_depth == 0 && (depth / warn_depth).is_power_of_two()
}
