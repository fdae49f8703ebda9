//! A two-sided rendezvous that matches one value of type `T` with one value
//! of type `U`.
//!
//! See the [`Pairing`] type's documentation for details.

use crate::{
    Cancelled, WaitResult,
    cancel::CancelToken,
    deadline::Deadline,
    util::lock,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread::{self, Thread},
    time::Duration,
};

#[cfg(test)]
mod tests;

/// A rendezvous point pairing values offered by two independent groups of
/// callers.
///
/// Callers on the left side offer a `T` via [`provide_left`]; callers on the
/// right side offer a `U` via [`provide_right`]. Each offer either matches
/// the oldest pending offer from the opposite side immediately, or waits —
/// up to its timeout — for one to arrive. Both matched callers return the
/// same combined pair, always ordered `(T, U)` regardless of which side
/// arrived first.
///
/// An offer is matched at most once, and only while its `provide` call is
/// still in progress: once a call returns (by timeout or cancellation), its
/// value can never be handed to a future caller. This is enforced by
/// removing the offer from its queue on every exit path before returning.
///
/// Both value types must be [`Clone`], because a successful match produces
/// the combined pair twice — once for each of the two callers.
///
/// # Implementation notes
///
/// Pending offers live in two FIFOs behind one [`Mutex`], and blocked
/// providers park their thread (the wait model shared by
/// [`TransferQueue`](crate::TransferQueue)). The matcher pops the opposite
/// head, takes ownership of its value, deposits the combined pair into the
/// owner's result slot, and unparks it; "this offer has been matched" and
/// "this offer holds a result" are therefore the same condition.
pub struct Pairing<T, U> {
    state: Mutex<State<T, U>>,
}

struct State<T, U> {
    /// Pending left-side offers: the offered value and its owner's handle.
    left: VecDeque<(T, Arc<OfferHandle<T, U>>)>,
    /// Pending right-side offers.
    right: VecDeque<(U, Arc<OfferHandle<T, U>>)>,
}

/// The waiting half of a pending offer.
struct OfferHandle<T, U> {
    /// Filled exactly once, by the matching caller from the opposite side.
    /// Only accessed with the pairing lock held.
    result: Mutex<Option<(T, U)>>,
    thread: Thread,
}

impl<T, U> OfferHandle<T, U> {
    fn for_current() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            thread: thread::current(),
        })
    }

    fn complete(&self, pair: (T, U)) {
        *lock(&self.result) = Some(pair);
        self.thread.unpark();
    }

    fn take_result(&self) -> Option<(T, U)> {
        lock(&self.result).take()
    }
}

impl<T: Clone, U: Clone> Pairing<T, U> {
    /// Returns a new pairing with no pending offers on either side.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                left: VecDeque::new(),
                right: VecDeque::new(),
            }),
        }
    }

    /// Offers a `T`, waiting up to `timeout` for a right-side counterpart.
    ///
    /// Returns `Ok(Some((t, u)))` when matched, `Ok(None)` on timeout
    /// (immediately, without enqueueing, if the timeout is zero and no
    /// counterpart is pending), and `Err(`[`Cancelled`]`)` if `cancel` fires
    /// first. A match that lands concurrently with the timeout or the
    /// cancellation takes precedence: the pair is returned, and in the
    /// cancellation case the token simply remains cancelled.
    pub fn provide_left(
        &self,
        value: T,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<Option<(T, U)>> {
        let mut state = lock(&self.state);
        if let Some((u, counterpart)) = state.right.pop_front() {
            counterpart.complete((value.clone(), u.clone()));
            return Ok(Some((value, u)));
        }
        if Deadline::is_immediate(timeout) {
            return Ok(None);
        }

        let handle = OfferHandle::for_current();
        state.left.push_back((value, handle.clone()));
        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        loop {
            if let Some(pair) = handle.take_result() {
                return Ok(Some(pair));
            }
            if cancel.is_cancelled() {
                Self::remove_left(&mut state, &handle);
                wake_next(state.left.iter());
                return Err(Cancelled::new());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                Self::remove_left(&mut state, &handle);
                return Ok(None);
            }
            drop(state);
            thread::park_timeout(remaining);
            state = lock(&self.state);
        }
    }

    /// Offers a `U`, waiting up to `timeout` for a left-side counterpart.
    ///
    /// Symmetric to [`provide_left`](Self::provide_left); the returned pair
    /// is still ordered `(T, U)`.
    pub fn provide_right(
        &self,
        value: U,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> WaitResult<Option<(T, U)>> {
        let mut state = lock(&self.state);
        if let Some((t, counterpart)) = state.left.pop_front() {
            counterpart.complete((t.clone(), value.clone()));
            return Ok(Some((t, value)));
        }
        if Deadline::is_immediate(timeout) {
            return Ok(None);
        }

        let handle = OfferHandle::for_current();
        state.right.push_back((value, handle.clone()));
        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        loop {
            if let Some(pair) = handle.take_result() {
                return Ok(Some(pair));
            }
            if cancel.is_cancelled() {
                Self::remove_right(&mut state, &handle);
                wake_next(state.right.iter());
                return Err(Cancelled::new());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                Self::remove_right(&mut state, &handle);
                return Ok(None);
            }
            drop(state);
            thread::park_timeout(remaining);
            state = lock(&self.state);
        }
    }

    fn remove_left(state: &mut State<T, U>, handle: &Arc<OfferHandle<T, U>>) {
        state.left.retain(|(_, h)| !Arc::ptr_eq(h, handle));
    }

    fn remove_right(state: &mut State<T, U>, handle: &Arc<OfferHandle<T, U>>) {
        state.right.retain(|(_, h)| !Arc::ptr_eq(h, handle));
    }
}

/// Nudges the head waiter of a queue after a cancelled waiter dequeued
/// itself, so a wake-up absorbed by the cancelled thread is not lost.
fn wake_next<'a, V: 'a, T: 'a, U: 'a>(
    mut queue: impl Iterator<Item = &'a (V, Arc<OfferHandle<T, U>>)>,
) {
    if let Some((_, head)) = queue.next() {
        head.thread.unpark();
    }
}

impl<T: Clone, U: Clone> Default for Pairing<T, U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U> core::fmt::Debug for Pairing<T, U> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Pairing")
            .field("pending_left", &state.left.len())
            .field("pending_right", &state.right.len())
            .finish()
    }
}
