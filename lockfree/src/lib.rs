//! Lock-free primitives: an unbounded Michael-Scott FIFO queue and an
//! atomically reference-counted value holder.
//!
//! Unlike the blocking primitives in `handoff-sync`, nothing here ever takes
//! a mutex or parks a thread (except [`ConcurrentQueue::take`], which spins
//! with a scheduler yield by design). All coordination is compare-and-swap
//! on atomic words and pointers.
//!
//! [`ConcurrentQueue::take`]: crate::queue::ConcurrentQueue::take

#![warn(missing_docs, missing_debug_implementations)]

pub mod queue;
pub mod ref_counted;

#[doc(inline)]
pub use self::queue::ConcurrentQueue;
#[doc(inline)]
pub use self::ref_counted::RefCountedHolder;

/// An error indicating that a [`RefCountedHolder`] was operated on after its
/// reference count had already dropped to zero.
///
/// A disposed holder cannot be resurrected: once the count reaches zero, the
/// held value is gone and every further `add_ref`, `release_ref`, or `value`
/// call fails with this error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InvalidState(());

impl InvalidState {
    pub(crate) const fn new() -> Self {
        Self(())
    }
}

impl core::fmt::Display for InvalidState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("holder already disposed")
    }
}

impl std::error::Error for InvalidState {}
