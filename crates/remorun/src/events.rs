//! Subscriber lists for events emitted by proxies, objects and discovery.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Returns `false` once it can no longer receive events.
type Listener<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A thread-safe list of callbacks for one event type.
///
/// Callbacks run on the emitting thread, outside of any internal lock, so a
/// callback may subscribe or unsubscribe.
pub struct Emitter<E> {
    next_id: AtomicU64,
    listeners: DashMap<u64, Listener<E>>,
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: DashMap::new(),
        }
    }

    pub fn subscribe(&self, f: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        self.attach(Arc::new(move |event: &E| {
            f(event);
            true
        }))
    }

    fn attach(&self, listener: Listener<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }

    pub fn emit(&self, event: &E) {
        let mut ids: Vec<u64> = self.listeners.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        let listeners: Vec<(u64, Listener<E>)> = ids
            .into_iter()
            .filter_map(|id| self.listeners.get(&id).map(|l| (id, l.value().clone())))
            .collect();
        for (id, listener) in listeners {
            if !listener(event) {
                self.listeners.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: Clone + Send + 'static> Emitter<E> {
    /// Subscribes a channel; every later event is cloned into it. The
    /// subscription is dropped at the first event after the receiver is.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(Arc::new(move |event: &E| tx.send(event.clone()).is_ok()));
        rx
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
