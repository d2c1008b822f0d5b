//! Sync state store
//!
//! Holds the current `ToolbarSyncState` and notifies subscribers. Consumers
//! can only read and subscribe; all writes go through the sync engine.
//!
//! ## Usage
//!
//! ```ignore
//! let store = engine.store();
//! let subscription = store.subscribe(|state| {
//!     println!("{} flags, {}", state.flags.len(), state.connection_status);
//! });
//! // ... later
//! subscription.unsubscribe();
//! ```

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

use crate::models::ToolbarSyncState;

type Listener = Arc<dyn Fn(&ToolbarSyncState) + Send + Sync>;

/// Observable holder of the toolbar's sync state
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct SyncStateStore {
    shared: Arc<Shared>,
}

/// Lock order: `state`, then `listeners`, then `dispatch`.
/// No lock is held while a listener runs.
#[derive(Default)]
struct Shared {
    state: Mutex<Revisioned>,
    listeners: Mutex<Listeners>,
    dispatch: Mutex<Dispatch>,
}

#[derive(Default)]
struct Revisioned {
    revision: u64,
    state: ToolbarSyncState,
    destroyed: bool,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<Entry>,
}

struct Entry {
    id: u64,
    /// Revision delivered on subscribe; only newer broadcasts reach it
    since: u64,
    listener: Listener,
}

/// Committed states waiting for delivery, in revision order
#[derive(Default)]
struct Dispatch {
    queue: VecDeque<Delivery>,
    draining: bool,
}

struct Delivery {
    revision: u64,
    state: ToolbarSyncState,
    /// Initial delivery to a single new listener
    target: Option<u64>,
}

impl SyncStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state
    pub fn get_state(&self) -> ToolbarSyncState {
        lock(&self.shared.state).state.clone()
    }

    /// Register a listener
    ///
    /// The listener gets the current state first, then every later change,
    /// always in commit order. A panicking listener is logged and does not
    /// stop the others.
    ///
    /// Listeners run one delivery at a time on whichever writer's thread is
    /// delivering, with no store lock held. They may call back into the
    /// store or the engine; changes they cause are delivered after they
    /// return.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ToolbarSyncState) + Send + Sync + 'static,
    {
        let id = {
            let guard = lock(&self.shared.state);
            let mut listeners = lock(&self.shared.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push(Entry {
                id,
                since: guard.revision,
                listener: Arc::new(listener),
            });
            lock(&self.shared.dispatch).queue.push_back(Delivery {
                revision: guard.revision,
                state: guard.state.clone(),
                target: Some(id),
            });
            id
        };

        self.drain();

        Subscription {
            shared: Arc::downgrade(&self.shared),
            id: Some(id),
        }
    }

    /// Drop all listeners and reset the state
    ///
    /// Later writes are ignored. Calling this more than once is harmless.
    pub fn destroy(&self) {
        {
            let mut guard = lock(&self.shared.state);
            guard.destroyed = true;
            guard.state = ToolbarSyncState::default();
        }
        lock(&self.shared.listeners).entries.clear();
        lock(&self.shared.dispatch).queue.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.shared.state).destroyed
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).entries.len()
    }

    /// Apply `mutate` under the state lock and notify if it reports a change
    ///
    /// Returns whether the change was committed.
    pub(crate) fn update_if<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut ToolbarSyncState) -> bool,
    {
        {
            let mut guard = lock(&self.shared.state);
            if guard.destroyed || !mutate(&mut guard.state) {
                return false;
            }
            guard.revision += 1;
            let delivery = Delivery {
                revision: guard.revision,
                state: guard.state.clone(),
                target: None,
            };
            lock(&self.shared.dispatch).queue.push_back(delivery);
        }

        self.drain();
        true
    }

    pub(crate) fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ToolbarSyncState),
    {
        self.update_if(|state| {
            mutate(state);
            true
        });
    }

    /// Deliver queued states unless another call is already doing so
    ///
    /// That call, possibly further up this thread's stack, picks up
    /// whatever was queued here.
    fn drain(&self) {
        {
            let mut dispatch = lock(&self.shared.dispatch);
            if dispatch.draining {
                return;
            }
            dispatch.draining = true;
        }

        loop {
            let delivery = {
                let mut dispatch = lock(&self.shared.dispatch);
                match dispatch.queue.pop_front() {
                    Some(delivery) => delivery,
                    None => {
                        dispatch.draining = false;
                        return;
                    }
                }
            };

            let listeners: Vec<Listener> = lock(&self.shared.listeners)
                .entries
                .iter()
                .filter(|entry| match delivery.target {
                    Some(id) => entry.id == id,
                    None => entry.since < delivery.revision,
                })
                .map(|entry| entry.listener.clone())
                .collect();

            for listener in &listeners {
                invoke(listener, &delivery.state);
            }
        }
    }
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateStore")
            .field("state", &self.get_state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by `subscribe`
///
/// Dropping it removes the listener.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.listeners).entries.retain(|entry| entry.id != id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

fn invoke(listener: &Listener, state: &ToolbarSyncState) {
    if panic::catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
        warn!("State listener panicked; continuing with remaining listeners");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionStatus;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&ToolbarSyncState) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &ToolbarSyncState| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_subscribe_calls_immediately() {
        let store = SyncStateStore::new();
        let (count, listener) = counter();

        let _sub = store.subscribe(listener);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_notifies() {
        let store = SyncStateStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.subscribe(move |state| {
            sink.lock().unwrap().push(state.connection_status);
        });

        store.update(|state| state.connection_status = ConnectionStatus::Connected);
        store.update(|state| state.connection_status = ConnectionStatus::Error);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connected,
                ConnectionStatus::Error
            ]
        );
    }

    #[test]
    fn test_update_if_false_skips_notification() {
        let store = SyncStateStore::new();
        let (count, listener) = counter();
        let _sub = store.subscribe(listener);

        let committed = store.update_if(|state| {
            state.is_loading = true;
            false
        });

        assert!(!committed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_state_is_a_copy() {
        let store = SyncStateStore::new();
        let mut copy = store.get_state();
        copy.error = Some("local edit".to_string());

        assert!(store.get_state().error.is_none());
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let store = SyncStateStore::new();
        let (count, listener) = counter();

        let _bad = store.subscribe(|state: &ToolbarSyncState| {
            if state.is_loading {
                panic!("listener failure");
            }
        });
        let _good = store.subscribe(listener);

        store.update(|state| state.is_loading = true);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let store = SyncStateStore::new();
        let (count, listener) = counter();

        let sub = store.subscribe(listener);
        sub.unsubscribe();
        store.update(|state| state.is_loading = true);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let store = SyncStateStore::new();
        {
            let _sub = store.subscribe(|_| {});
            assert_eq!(store.listener_count(), 1);
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let store = SyncStateStore::new();
        let (count, listener) = counter();
        let _sub = store.subscribe(listener);
        store.update(|state| state.error = Some("boom".to_string()));

        store.destroy();
        store.destroy();

        assert!(store.is_destroyed());
        assert_eq!(store.listener_count(), 0);
        assert!(store.get_state().error.is_none());

        // Writes after destroy are ignored
        assert!(!store.update_if(|state| {
            state.is_loading = true;
            true
        }));
        assert!(!store.get_state().is_loading);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_can_write_back() {
        let store = SyncStateStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let writer = store.clone();
        let sub = store.subscribe(move |state| {
            sink.lock().unwrap().push((state.is_loading, state.error.clone()));
            if state.is_loading && state.error.is_none() {
                writer.update(|state| state.error = Some("from listener".to_string()));
            }
        });

        store.update(|state| state.is_loading = true);

        assert_eq!(store.get_state().error.as_deref(), Some("from listener"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (false, None),
                (true, None),
                (true, Some("from listener".to_string()))
            ]
        );
        sub.unsubscribe();
    }

    #[test]
    fn test_subscribe_from_listener() {
        let store = SyncStateStore::new();
        let (count, inner_listener) = counter();
        let inner_listener = Arc::new(inner_listener);
        let nested = Arc::new(Mutex::new(Vec::new()));

        let registry = nested.clone();
        let handle = store.clone();
        let _outer = store.subscribe(move |state| {
            if state.is_loading {
                let listener = inner_listener.clone();
                let sub = handle.subscribe(move |s| (*listener)(s));
                registry.lock().unwrap().push(sub);
            }
        });

        store.update(|state| state.is_loading = true);

        assert_eq!(nested.lock().unwrap().len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listeners_never_see_older_state() {
        const WRITERS: i64 = 4;
        const WRITES: i64 = 200;

        let store = SyncStateStore::new();
        let regressions = Arc::new(AtomicUsize::new(0));

        let subscriber = {
            let store = store.clone();
            let regressions = regressions.clone();
            tokio::spawn(async move {
                let mut subs = Vec::new();
                let mut last_seen = Vec::new();
                for _ in 0..50 {
                    let last = Arc::new(AtomicI64::new(-1));
                    let seen = last.clone();
                    let regressions = regressions.clone();
                    subs.push(store.subscribe(move |state| {
                        let current = state.last_synced_from_source.unwrap_or(0);
                        if seen.swap(current, Ordering::SeqCst) > current {
                            regressions.fetch_add(1, Ordering::SeqCst);
                        }
                    }));
                    last_seen.push(last);
                    tokio::task::yield_now().await;
                }
                (subs, last_seen)
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..WRITES {
                        store.update(|state| {
                            let next = state.last_synced_from_source.unwrap_or(0) + 1;
                            state.last_synced_from_source = Some(next);
                        });
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.await.unwrap();
        }
        let (subs, last_seen) = subscriber.await.unwrap();

        let total = WRITERS * WRITES;
        assert_eq!(store.get_state().last_synced_from_source, Some(total));
        assert_eq!(regressions.load(Ordering::SeqCst), 0);
        for last in &last_seen {
            assert_eq!(last.load(Ordering::SeqCst), total);
        }
        drop(subs);
    }

    #[test]
    fn test_slow_listener_does_not_block_other_writers() {
        let store = SyncStateStore::new();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let _sub = store.subscribe(move |state| {
            if state.is_loading {
                let _ = entered_tx.send(());
                let _ = release_rx.lock().unwrap().recv();
            }
        });

        let blocked = store.clone();
        let first = std::thread::spawn(move || blocked.update(|state| state.is_loading = true));
        entered_rx.recv().unwrap();

        // The first writer is stuck inside the listener; this one still commits
        store.update(|state| state.error = Some("second".to_string()));
        assert_eq!(store.get_state().error.as_deref(), Some("second"));

        // Closing the channel releases the listener for good
        drop(release_tx);
        first.join().unwrap();
        assert_eq!(store.get_state().error.as_deref(), Some("second"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = SyncStateStore::new();
        let other = store.clone();
        store.update(|state| state.current_project_key = Some("p".to_string()));
        assert_eq!(other.get_state().current_project_key.as_deref(), Some("p"));
    }
}
