//! Per-key refresh coalescing: a `DashMap<String, ...>` tracks keys with a refresh in
//! flight, with a drop guard that removes the map entry once the holder is done, so the
//! map never grows unbounded. Concurrent callers that arrive while a refresh is in
//! flight get a broadcast `Receiver` on the same outcome instead of re-running the
//! factory, rather than blocking on a bare mutex. `acquire` takes `self: &Arc<Self>` so
//! the returned [`LeaderGuard`] is `'static` and can be moved into a detached
//! `tokio::spawn`ed refresh task (needed for the soft-timeout background-refresh path in
//! [`crate::orchestrator`]).

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One in-flight refresh task for a single key. Exactly one task per key exists at a
/// time; callers racing to create it are coalesced onto the same sender.
struct InFlight<T> {
    tx: broadcast::Sender<Arc<T>>,
}

/// Outcome handed to a caller that joined an in-flight refresh rather than starting one
/// itself.
pub enum Joined<T> {
    /// The refresh finished and produced a value.
    Value(Arc<T>),
    /// The channel closed (sender dropped, e.g. on panic) without a value ever being
    /// published.
    Lost,
}

/// Guard returned to whichever caller becomes the leader for a key: it owns publishing
/// the eventual result and removing the map entry exactly once, on drop.
pub struct LeaderGuard<T> {
    map: Arc<StampedeGuard<T>>,
    key: String,
    published: bool,
    tx: broadcast::Sender<Arc<T>>,
}

impl<T> LeaderGuard<T> {
    /// Publish the refresh's result to every waiter subscribed via
    /// [`StampedeGuard::acquire`].
    pub fn publish(mut self, value: Arc<T>) {
        let _ = self.tx.send(value);
        self.published = true;
    }
}

impl<T> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        // Dropping the sender without a prior send wakes any follower's
        // `recv()` with a `RecvError`, which `join` turns into `Joined::Lost`.
        self.map.entries.remove(&self.key);
        let _ = self.published;
    }
}

/// What a caller gets back from [`StampedeGuard::acquire`].
pub enum Acquired<T> {
    /// This caller is the leader: it must run the factory and call [`LeaderGuard::publish`]
    /// (or drop the guard on failure).
    Lead(LeaderGuard<T>),
    /// Another caller is already refreshing this key; await the given receiver.
    Follow(broadcast::Receiver<Arc<T>>),
}

/// Process-wide mapping from key to in-flight refresh task.
pub struct StampedeGuard<T> {
    entries: DashMap<String, InFlight<T>>,
}

impl<T> Default for StampedeGuard<T> {
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<T> StampedeGuard<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key` if no refresh is in flight, otherwise return a receiver
    /// following the existing one. At most one leader exists per key at any time (spec
    /// invariant, §8).
    pub fn acquire(self: &Arc<Self>, key: &str) -> Acquired<T> {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Acquired::Follow(existing.get().tx.subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, _rx) = broadcast::channel(1);
                slot.insert(InFlight { tx: tx.clone() });
                Acquired::Lead(LeaderGuard { map: Arc::clone(self), key: key.to_string(), published: false, tx })
            }
        }
    }

    /// Number of keys currently being refreshed. Exposed for tests asserting the coalescing
    /// invariant and for metrics.
    pub fn in_flight_count(&self) -> usize {
        self.entries.len()
    }
}

/// Await a follower's receiver, translating a closed/lagged channel into [`Joined::Lost`]
/// rather than propagating a channel error — a stampede follower always has a stale-or-
/// error fallback path available to it.
pub async fn join<T>(mut rx: broadcast::Receiver<Arc<T>>) -> Joined<T> {
    match rx.recv().await {
        Ok(value) => Joined::Value(value),
        Err(_) => Joined::Lost,
    }
}
