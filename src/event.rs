//! Multicast listener registry and the latched "state-aware event" built on
//! top of it.
//!
//! [`Listeners<T>`] is a plain fan-out: every live subscriber gets every
//! emission, in order, and nothing is remembered once delivered.
//! [`StateAwareEvent<T>`] adds replay-last-value behaviour for per-frame
//! `load`/`domcontentloaded` equivalents.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;

/// Handle returned by `subscribe`, used to remove a listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct Inner<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

/// A plain multicast: every subscriber receives every `emit` from the point
/// it subscribed onward. No replay.
pub struct Listeners<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a listener, returning a disposable id. The listener is
    /// invoked for every subsequent `emit`, never for past ones.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        self.subscribe_arc(Arc::new(listener))
    }

    fn subscribe_arc(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Registers a listener that unsubscribes itself after its first call —
    /// used by [`crate::barrier::SignalBarrier`] to watch a frame's next
    /// navigation exactly once.
    ///
    /// Holds only a [`std::sync::Weak`] back-reference to its own registry
    /// rather than a clone of `self` — a strong clone stored inside the very
    /// listener list it belongs to would be a self-reference cycle, keeping
    /// the registry alive forever if the listener is never called (e.g. the
    /// owning event is dropped before firing).
    pub fn subscribe_once(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let weak_inner = Arc::downgrade(&self.inner);
        // Filled in once we know our own id, so the closure can dispose itself.
        let id_cell: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let id_cell2 = id_cell.clone();
        let id = self.subscribe(move |value| {
            listener(value);
            if let Some(id) = id_cell2.lock().take() {
                if let Some(inner) = weak_inner.upgrade() {
                    Listeners { inner }.unsubscribe(id);
                }
            }
        });
        *id_cell.lock() = Some(id);
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Delivers `value` to every currently-subscribed listener, in
    /// subscription order. Listener panics are caught and discarded so one
    /// faulty subscriber can't poison dispatch for the rest.
    pub fn emit(&self, value: &T) {
        // Snapshot under the lock, then call outside of it: a listener that
        // subscribes or unsubscribes during dispatch must not deadlock on a
        // non-reentrant mutex.
        let snapshot: Vec<Listener<T>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| listener(value)));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Latch<T> {
    has_fired: bool,
    last: Option<T>,
}

/// A latched event: remembers its last firing and replays it synchronously
/// to any subscriber that arrives after the fact. Used for
/// per-frame lifecycle flags (`load`, `domcontentloaded`) so a listener
/// attached after the page already finished loading still observes
/// completion without polling.
pub struct StateAwareEvent<T: Clone + Send + Sync + 'static> {
    latch: Mutex<Latch<T>>,
    listeners: Listeners<T>,
}

impl<T: Clone + Send + Sync + 'static> Default for StateAwareEvent<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> StateAwareEvent<T> {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(Latch {
                has_fired: false,
                last: None,
            }),
            listeners: Listeners::new(),
        }
    }

    /// Marks the event as fired and delivers `value` to current subscribers.
    pub fn fire(&self, value: T) {
        {
            let mut latch = self.latch.lock();
            latch.has_fired = true;
            latch.last = Some(value.clone());
        }
        self.listeners.emit(&value);
    }

    /// Subscribes for future firings. If the event has already fired, the
    /// listener is also invoked synchronously, before this call returns,
    /// with the last fired value.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let listener: Listener<T> = Arc::new(listener);
        let id = self.listeners.subscribe_arc(listener.clone());
        let replay = {
            let latch = self.latch.lock();
            if latch.has_fired {
                latch.last.clone()
            } else {
                None
            }
        };
        if let Some(value) = replay {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&value)));
        }
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.unsubscribe(id);
    }

    /// Clears `hasFired` and the last value, without touching subscribers.
    /// Called on new-document navigation.
    pub fn reset(&self) {
        let mut latch = self.latch.lock();
        latch.has_fired = false;
        latch.last = None;
    }

    pub fn has_fired(&self) -> bool {
        self.latch.lock().has_fired
    }

    pub fn last(&self) -> Option<T> {
        self.latch.lock().last.clone()
    }

    /// A future that resolves with the last fired value, either immediately
    /// (if already fired) or on the next `fire` — the async counterpart to
    /// `subscribe`'s synchronous replay. Used for one-shot "promise" style
    /// handles such as `FrameManager`'s main-frame promise.
    ///
    /// Resolves to `None` if this event is dropped (its owner torn down)
    /// before ever firing, rather than panicking the awaiting task — a
    /// dropped owner is a valid outcome (e.g. the page closed while a
    /// background task was still awaiting the main-frame promise), not a
    /// programming error.
    pub fn wait(&self) -> Pin<Box<dyn Future<Output = Option<T>> + Send>>
    where
        T: Send,
    {
        if let Some(value) = self.last() {
            return Box::pin(async move { Some(value) });
        }
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.listeners.subscribe_once(move |value: &T| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(value.clone());
            }
        });
        Box::pin(async move { rx.await.ok() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listeners_deliver_only_future_emissions() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        listeners.emit(&1);

        let seen2 = seen.clone();
        listeners.subscribe(move |v| seen2.lock().push(*v));
        listeners.emit(&2);
        listeners.emit(&3);

        assert_eq!(*seen.lock(), vec![2, 3]);
    }

    #[test]
    fn subscribe_once_fires_exactly_once() {
        let listeners: Listeners<u32> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        listeners.subscribe_once(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        listeners.emit(&1);
        listeners.emit(&2);
        listeners.emit(&3);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_aware_event_replays_last_value_synchronously() {
        let event: StateAwareEvent<&'static str> = StateAwareEvent::new();
        event.fire("loaded");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        event.subscribe(move |v| seen2.lock().push(*v));
        // Replay must have already happened by the time subscribe returns.
        assert_eq!(*seen.lock(), vec!["loaded"]);

        event.fire("loaded-again");
        assert_eq!(*seen.lock(), vec!["loaded", "loaded-again"]);
    }

    #[test]
    fn reset_clears_latch_but_keeps_listeners() {
        let event: StateAwareEvent<u32> = StateAwareEvent::new();
        event.fire(1);
        assert!(event.has_fired());
        event.reset();
        assert!(!event.has_fired());
        assert_eq!(event.last(), None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        event.subscribe(move |v| seen2.lock().push(*v));
        assert!(seen.lock().is_empty());
        event.fire(2);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn listener_panic_does_not_poison_dispatch() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        listeners.subscribe(|_| panic!("boom"));
        let seen2 = seen.clone();
        listeners.subscribe(move |v| seen2.lock().push(*v));
        listeners.emit(&1);
        assert_eq!(*seen.lock(), vec![1]);
    }
}
