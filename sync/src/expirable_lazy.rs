//! A memoized value with a time-to-live, recomputed lazily and
//! single-flight.
//!
//! See the [`ExpirableLazy`] type's documentation for details.

use crate::{
    Cancelled,
    cancel::CancelToken,
    util::lock,
};
use std::{
    collections::VecDeque,
    sync::Mutex,
    thread::{self, Thread, ThreadId},
    time::{Duration, Instant},
};

#[cfg(test)]
mod tests;

/// Error returned by [`ExpirableLazy::get`].
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// The wait for a value was interrupted by the caller's [`CancelToken`].
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The value provider failed.
    ///
    /// This is only surfaced to the caller whose thread actually ran the
    /// provider; other callers blocked on the same computation are woken so
    /// that one of them can retry.
    #[error("the value provider failed")]
    Provider(#[source] E),
}

/// A lazily computed value that stays valid for a fixed time-to-live.
///
/// The value is produced by a caller-supplied provider, invoked on first
/// access and again whenever the cached value has expired. Computation is
/// *single-flight*: however many threads call [`get`] concurrently, at most
/// one provider invocation is in progress per instance, and every waiting
/// caller observes its result. If the provider fails, the error propagates
/// to the caller that ran it, and exactly one waiter is woken to attempt the
/// computation anew — waking all of them would only stampede a computation
/// that just failed.
///
/// # Implementation notes
///
/// The cache slot is a three-state machine (`Empty`, `Computing`,
/// `Valid { value, expires_at }`) behind the instance mutex; claiming the
/// `Computing` state in that critical section is what makes the computation
/// single-flight. The provider itself always runs with the lock released,
/// so readers of a still-valid value are never blocked behind a slow
/// recomputation, and waiters park their threads exactly like the other
/// primitives in this crate.
///
/// [`get`]: Self::get
pub struct ExpirableLazy<T, E> {
    provider: Box<dyn Fn() -> Result<T, E> + Send + Sync>,
    ttl: Duration,
    state: Mutex<State<T>>,
}

struct State<T> {
    slot: Slot<T>,
    /// Set when the last computation failed and a waiter has been woken to
    /// retry; a waiter that gets cancelled while this is set passes its
    /// wake-up on before propagating, so the retry is never lost.
    retry: bool,
    /// Threads parked in [`ExpirableLazy::get`] waiting for the slot to
    /// change.
    waiters: VecDeque<Thread>,
}

enum Slot<T> {
    Empty,
    Computing,
    Valid { value: T, expires_at: Instant },
}

impl<T> State<T> {
    fn remove_waiter(&mut self, id: ThreadId) {
        self.waiters.retain(|t| t.id() != id);
    }

    fn wake_one(&mut self) {
        if let Some(thread) = self.waiters.pop_front() {
            thread.unpark();
        }
    }

    fn wake_all(&mut self) {
        for thread in self.waiters.drain(..) {
            thread.unpark();
        }
    }
}

/// Reverts a claimed `Computing` slot if the provider unwinds, so a panicky
/// provider cannot wedge every future caller in the waiting state.
struct ComputeGuard<'a, T> {
    state: &'a Mutex<State<T>>,
    armed: bool,
}

impl<T> Drop for ComputeGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock(self.state);
            state.slot = Slot::Empty;
            state.retry = true;
            state.wake_one();
        }
    }
}

impl<T: Clone, E> ExpirableLazy<T, E> {
    /// Returns a new cell that computes its value with `provider` and keeps
    /// each computed value for `ttl`.
    pub fn new(
        provider: impl Fn() -> Result<T, E> + Send + Sync + 'static,
        ttl: Duration,
    ) -> Self {
        Self {
            provider: Box::new(provider),
            ttl,
            state: Mutex::new(State {
                slot: Slot::Empty,
                retry: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Returns the current value, computing or waiting for it as needed.
    ///
    /// If a valid value is cached, it is returned immediately. If no valid
    /// value exists and no computation is in flight, the calling thread runs
    /// the provider itself; a provider error is returned to this caller as
    /// [`Error::Provider`] after waking one waiter to retry. If another
    /// thread is already computing, the call blocks — with no deadline, but
    /// interruptibly through `cancel` — until the slot changes.
    pub fn get(&self, cancel: &CancelToken) -> Result<T, Error<E>> {
        let me = thread::current();
        let _registration = cancel.register_current();
        loop {
            let mut state = lock(&self.state);
            match &state.slot {
                Slot::Valid { value, expires_at } if *expires_at > Instant::now() => {
                    let value = value.clone();
                    state.remove_waiter(me.id());
                    return Ok(value);
                }
                _ => {}
            }

            // cancellation beats both retrying and enqueueing: a cancelled
            // caller never runs the provider, it hands the retry on instead
            if cancel.is_cancelled() {
                state.remove_waiter(me.id());
                if state.retry {
                    state.wake_one();
                }
                return Err(Error::Cancelled(Cancelled::new()));
            }

            // no valid value: either claim the computation or wait for the
            // thread that already has
            if !matches!(state.slot, Slot::Computing) {
                state.slot = Slot::Computing;
                state.remove_waiter(me.id());
                drop(state);
                return self.compute();
            }
            state.remove_waiter(me.id());
            state.waiters.push_back(me.clone());
            drop(state);
            thread::park();
        }
    }

    /// Runs the provider with the slot claimed as `Computing` and the lock
    /// released.
    fn compute(&self) -> Result<T, Error<E>> {
        let mut guard = ComputeGuard {
            state: &self.state,
            armed: true,
        };
        let result = (self.provider)();
        guard.armed = false;

        let mut state = lock(&self.state);
        match result {
            Ok(value) => {
                tracing::trace!("provider succeeded; caching value");
                state.slot = Slot::Valid {
                    value: value.clone(),
                    expires_at: Instant::now() + self.ttl,
                };
                state.retry = false;
                state.wake_all();
                Ok(value)
            }
            Err(error) => {
                tracing::trace!("provider failed; waking one waiter to retry");
                state.slot = Slot::Empty;
                state.retry = true;
                state.wake_one();
                Err(Error::Provider(error))
            }
        }
    }
}

impl<T, E> core::fmt::Debug for ExpirableLazy<T, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.state);
        let slot = match &state.slot {
            Slot::Empty => "Empty",
            Slot::Computing => "Computing",
            Slot::Valid { .. } => "Valid",
        };
        f.debug_struct("ExpirableLazy")
            .field("slot", &slot)
            .field("ttl", &self.ttl)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
