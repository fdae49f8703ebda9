//! A per-key wait list, so that threads can block until a value is
//! delivered for a specific key.
//!
//! See the [`WaitRegistry`] type's documentation for details.

use crate::{
    Cancelled, WaitResult,
    cancel::CancelToken,
    deadline::Deadline,
    util::lock,
};
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, OnceLock},
    thread::{self, Thread},
    time::Duration,
};


/// A registry of waiters keyed by `K`, each waiting for one `V` to be
/// delivered for their key.
///
/// This is the wait/notify pattern of
/// [`TransferQueue`](crate::TransferQueue) applied per key: any number of
/// threads [`wait_with`] on a key and are all released by the single
/// [`deliver`] for that key (values are [`Clone`] so one delivery can
/// satisfy every waiter). It is the building block for *blocking read*
/// operations over a plain map — a reader that misses registers itself
/// here, and the write path delivers.
///
/// An entry for a key exists only while at least one waiter is pending:
/// delivery removes the entry as it fulfils it, and the last waiter to give
/// up (by timeout or cancellation) removes an unfulfilled entry on its way
/// out.
///
/// [`wait_with`]: Self::wait_with
/// [`deliver`]: Self::deliver
pub struct WaitRegistry<K, V> {
    map: Mutex<HashMap<K, Entry<V>>>,
}

struct Entry<V> {
    shared: Arc<Shared<V>>,
    /// Threads blocked on this key. Drained (and unparked) by `deliver`;
    /// a waiter that gives up removes its own handle.
    waiters: Vec<Thread>,
}

/// The delivery slot, shared between the map entry and every waiter on the
/// key so a delivered value outlives the entry's removal from the map.
struct Shared<V> {
    value: OnceLock<V>,
}

impl<V> Entry<V> {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                value: OnceLock::new(),
            }),
            waiters: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> WaitRegistry<K, V> {
    /// Returns a new registry with no pending waiters.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until a value is delivered for `key`, the timeout elapses, or
    /// `cancel` fires.
    ///
    /// Before enqueueing, `check` is run *while holding the registry lock*;
    /// if it produces a value, that value is returned immediately. This is
    /// the hook for the backing store the registry guards: because delivery
    /// for a freshly written key also takes the registry lock, a writer
    /// cannot slip between the caller's probe and its enqueue — the probe
    /// either sees the write, or the delivery sees the waiter.
    ///
    /// Returns `Ok(None)` on timeout (immediately if the timeout is zero
    /// and `check` comes up empty), and `Err(`[`Cancelled`]`)` if `cancel`
    /// fires first. A delivery racing the timeout wins: if the value
    /// arrives as the deadline expires, it is returned rather than `None`.
    pub fn wait_with(
        &self,
        key: K,
        timeout: Duration,
        cancel: &CancelToken,
        check: impl FnOnce() -> Option<V>,
    ) -> WaitResult<Option<V>> {
        let me = thread::current();
        let shared = {
            let mut map = lock(&self.map);
            if let Some(value) = check() {
                return Ok(Some(value));
            }
            if Deadline::is_immediate(timeout) {
                return Ok(None);
            }
            let entry = map.entry(key.clone()).or_insert_with(Entry::new);
            entry.waiters.push(me.clone());
            entry.shared.clone()
        };
        tracing::trace!("waiting for delivery");

        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        let result = loop {
            if let Some(value) = shared.value.get() {
                break Ok(Some(value.clone()));
            }
            if cancel.is_cancelled() {
                break Err(Cancelled::new());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                break Ok(None);
            }
            thread::park_timeout(remaining);
        };

        // dequeue ourselves; the last waiter out removes a still-pending
        // entry so the map does not accumulate dead keys
        {
            let mut map = lock(&self.map);
            if let Some(entry) = map.get_mut(&key) {
                if Arc::ptr_eq(&entry.shared, &shared) {
                    if let Some(i) = entry.waiters.iter().position(|t| t.id() == me.id()) {
                        entry.waiters.swap_remove(i);
                    }
                    if entry.waiters.is_empty() {
                        map.remove(&key);
                    }
                }
            }
        }

        // a delivery that raced the deadline still wins
        if matches!(result, Ok(None)) {
            if let Some(value) = shared.value.get() {
                return Ok(Some(value.clone()));
            }
        }
        result
    }

    /// Delivers `value` to every thread currently waiting on `key`,
    /// removing the key's entry.
    ///
    /// Returns `true` if there was an entry (i.e. at least one waiter was
    /// pending), `false` if nobody was waiting. Delivering to a key with no
    /// waiters is not an error; the value is simply dropped — the backing
    /// store, not the registry, is the system of record.
    pub fn deliver(&self, key: &K, value: V) -> bool {
        let entry = lock(&self.map).remove(key);
        match entry {
            Some(entry) => {
                tracing::trace!(waiters = entry.waiters.len(), "delivering value");
                // the slot is written at most once per entry: delivery is
                // the only writer, and it consumes the entry
                let _ = entry.shared.value.set(value);
                for thread in entry.waiters {
                    thread.unpark();
                }
                true
            }
            None => false,
        }
    }

    /// Returns the number of threads currently waiting on `key`.
    pub fn waiter_count(&self, key: &K) -> usize {
        lock(&self.map).get(key).map_or(0, |e| e.waiters.len())
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for WaitRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> core::fmt::Debug for WaitRegistry<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitRegistry")
            .field("pending_keys", &lock(&self.map).len())
            .finish()
    }
}
