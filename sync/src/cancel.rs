//! Cooperative cancellation for blocking waits.
//!
//! The primitives in this crate model interruption as an explicit
//! [`CancelToken`] passed into every blocking call, rather than a
//! language-level exception or a global thread flag. A waiter re-checks the
//! token at every wake-up; [`CancelToken::cancel`] both sets the flag and
//! unparks every thread currently blocked through the token, so the
//! interruption takes effect promptly rather than at the next timeout.
//!
//! Cancelling a token is sticky: once cancelled, every subsequent wait
//! through the token fails immediately with [`Cancelled`](crate::Cancelled).
//! This is what
//! makes the "wait won the race anyway" contract observable — an operation
//! whose value was claimed concurrently with cancellation returns success,
//! and the caller sees the cancellation on its *next* cancellable call.

use crate::util::lock;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering::SeqCst},
};
use std::thread::{self, Thread, ThreadId};

/// A cloneable handle used to interrupt blocking waits.
///
/// All clones share the same cancellation state. A token with no outstanding
/// waits can still be cancelled; waits started afterwards fail immediately.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    /// Threads currently blocked through this token.
    ///
    /// Entries are added by [`CancelToken::register_current`] and removed by
    /// the [`Registration`] guard; `cancel` unparks every entry. A stale
    /// handle whose thread has moved on is harmless — `unpark` on a
    /// non-parked thread only leaves a wake-up token the wait loops already
    /// tolerate.
    parked: Mutex<Vec<Thread>>,
}

impl CancelToken {
    /// Returns a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token, interrupting every wait currently blocked on it.
    ///
    /// Cancellation is permanent; there is no way to re-arm a token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, SeqCst);
        for thread in lock(&self.inner.parked).iter() {
            thread.unpark();
        }
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(SeqCst)
    }

    /// Registers the calling thread to be unparked by `cancel`, for the
    /// duration of the returned guard.
    ///
    /// The caller must still check [`is_cancelled`](Self::is_cancelled)
    /// before every park: a cancel that lands between registration and the
    /// first park leaves an unpark token behind, so the park returns
    /// immediately and the check observes the flag.
    pub(crate) fn register_current(&self) -> Registration<'_> {
        let current = thread::current();
        let id = current.id();
        lock(&self.inner.parked).push(current);
        Registration { token: self, id }
    }
}

/// RAII guard deregistering a thread from a [`CancelToken`] on drop.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    token: &'a CancelToken,
    id: ThreadId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut parked = lock(&self.token.inner.parked);
        if let Some(i) = parked.iter().position(|t| t.id() == self.id) {
            parked.swap_remove(i);
        }
    }
}
