//! An atomically reference-counted holder that disposes its value when the
//! count reaches zero.
//!
//! See the [`RefCountedHolder`] type's documentation for details.

use crate::InvalidState;
use arc_swap::ArcSwapOption;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering::{Acquire, Relaxed, Release}, fence},
};

/// A shared value guarded by an explicit, atomically maintained reference
/// count.
///
/// The holder starts with a count of one. [`add_ref`] and [`release_ref`]
/// adjust the count with compare-and-swap retry loops — no mutex anywhere —
/// and the `release_ref` that brings the count to exactly zero disposes the
/// held value, exactly once. A holder whose count has reached zero is dead:
/// further `add_ref`, `release_ref`, or `value` calls fail with
/// [`InvalidState`], because a disposed value cannot be resurrected.
///
/// # The `value`/`release_ref` race
///
/// [`value`] checks the count and then loads the value, and those two steps
/// are deliberately *not* one atomic operation: a concurrent release to
/// zero may dispose the value in between, in which case `value` reports
/// [`InvalidState`] even though its count check passed. Callers that need
/// the value to stay alive across a read must hold their own reference
/// around the call. What the check-then-load gap can never produce is a
/// read of freed memory — the value lives in an [`ArcSwapOption`], so a
/// load either observes the value (and keeps it alive via its own [`Arc`])
/// or observes the disposal.
///
/// [`add_ref`]: Self::add_ref
/// [`release_ref`]: Self::release_ref
/// [`value`]: Self::value
pub struct RefCountedHolder<T> {
    count: AtomicUsize,
    value: ArcSwapOption<T>,
}

impl<T> RefCountedHolder<T> {
    /// Returns a new holder owning `value`, with a reference count of one.
    pub fn new(value: T) -> Self {
        Self {
            count: AtomicUsize::new(1),
            value: ArcSwapOption::from_pointee(value),
        }
    }

    /// Atomically increments the reference count.
    ///
    /// Fails with [`InvalidState`] if the count has already reached zero: a
    /// disposed holder cannot be revived by taking a new reference.
    pub fn add_ref(&self) -> Result<(), InvalidState> {
        let mut observed = self.count.load(Relaxed);
        loop {
            if observed == 0 {
                return Err(InvalidState::new());
            }
            match self
                .count
                .compare_exchange_weak(observed, observed + 1, Relaxed, Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(current) => observed = current,
            }
        }
    }

    /// Atomically decrements the reference count, disposing the held value
    /// if this release brings the count to zero.
    ///
    /// Disposal drops the holder's reference to the value; the value's own
    /// `Drop` implementation is its disposal routine. Fails with
    /// [`InvalidState`] if the count is already zero.
    pub fn release_ref(&self) -> Result<(), InvalidState> {
        let mut observed = self.count.load(Relaxed);
        loop {
            if observed == 0 {
                return Err(InvalidState::new());
            }
            match self
                .count
                .compare_exchange_weak(observed, observed - 1, Release, Relaxed)
            {
                Ok(_) => {
                    if observed == 1 {
                        // this release won the transition to zero; everything
                        // published before the other releases must be visible
                        // before the value is torn down
                        fence(Acquire);
                        self.value.store(None);
                    }
                    return Ok(());
                }
                Err(current) => observed = current,
            }
        }
    }

    /// Returns the held value, or [`InvalidState`] if the holder has been
    /// disposed.
    ///
    /// See the type documentation for the (intentional) race between this
    /// and a concurrent release to zero.
    pub fn value(&self) -> Result<Arc<T>, InvalidState> {
        if self.count.load(Acquire) == 0 {
            return Err(InvalidState::new());
        }
        self.value.load_full().ok_or_else(InvalidState::new)
    }

    /// Returns the current reference count. Inherently racy; useful for
    /// diagnostics and tests only.
    pub fn ref_count(&self) -> usize {
        self.count.load(Relaxed)
    }
}

impl<T> core::fmt::Debug for RefCountedHolder<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefCountedHolder")
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
