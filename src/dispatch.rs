// ===============================
// src/dispatch.rs
// ===============================
//
// Listener registry shared by the order router and the market data tickers:
// one lock around the structural set, snapshot-then-notify so listener
// callbacks never run under the lock.
//
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Ticket returned by [`Dispatcher::add`]; the only way to remove a
/// registration, since trait objects carry no identity of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

struct Slot<E: 'static> {
    id: u64,
    listener: Arc<dyn Listener<E>>,
}

pub struct Dispatcher<E: 'static> {
    slots: Mutex<Vec<Slot<E>>>,
    next_id: AtomicU64,
}

impl<E: 'static> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: impl Listener<E> + 'static) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().unwrap().push(Slot {
            id,
            listener: Arc::new(listener),
        });
        ListenerHandle(id)
    }

    /// Returns false when the handle was already removed.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|s| s.id != handle.0);
        slots.len() != before
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event to every listener registered at the moment of the
    /// call, in registration order. The lock is held only while snapshotting
    /// the set, so callbacks are free to add or remove registrations,
    /// including their own. A panicking listener is logged and skipped; the
    /// rest still get the event.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Arc<dyn Listener<E>>> = self
            .slots
            .lock()
            .unwrap()
            .iter()
            .map(|s| Arc::clone(&s.listener))
            .collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!("listener panicked, continuing with the rest");
            }
        }
    }
}

impl<E: 'static> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_to_every_listener_in_order() {
        let dispatcher = Dispatcher::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            dispatcher.add(move |event: &u32| {
                seen.lock().unwrap().push(format!("{tag}:{event}"));
            });
        }

        dispatcher.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a:7", "b:7"]);
    }

    #[test]
    fn removed_listener_is_skipped() {
        let dispatcher = Dispatcher::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let handle = {
            let hits = Arc::clone(&hits);
            dispatcher.add(move |_: &u32| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        dispatcher.notify(&1);
        assert!(dispatcher.remove(handle));
        assert!(!dispatcher.remove(handle));
        dispatcher.notify(&2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let dispatcher = Dispatcher::<u32>::new();
        dispatcher.add(|_: &u32| panic!("boom"));

        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            dispatcher.add(move |_: &u32| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        dispatcher.notify(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_remove_itself_mid_dispatch() {
        let dispatcher = Arc::new(Dispatcher::<u32>::new());
        let own_handle = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let handle = {
            let registry = Arc::clone(&dispatcher);
            let own_handle = Arc::clone(&own_handle);
            let hits = Arc::clone(&hits);
            dispatcher.add(move |_: &u32| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(h) = own_handle.lock().unwrap().take() {
                    registry.remove(h);
                }
            })
        };
        *own_handle.lock().unwrap() = Some(handle);

        dispatcher.notify(&1);
        dispatcher.notify(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
