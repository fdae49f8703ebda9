//! Blocking, timeout-aware, cancel-safe synchronization primitives.
//!
//! This crate provides a small family of primitives for coordinating OS
//! threads, all sharing the same wait model: every blocking operation takes a
//! timeout (where a timeout of [`Duration::ZERO`] means "do not block at
//! all") and a [`CancelToken`] that can interrupt the wait from another
//! thread.
//!
//! - [`TransferQueue`]: a rendezvous queue with blocking put-with-ack
//!   (`transfer`), fire-and-forget `put`, and blocking `take`.
//! - [`Pairing`]: a two-sided rendezvous matching one value of type `T` with
//!   one value of type `U`, each produced by an independent caller.
//! - [`ExpirableLazy`]: a memoized value with a TTL; recomputation is
//!   single-flight, and a failed computation lets a waiter retry.
//! - [`ThreadPool`]: a bounded worker pool with direct handoff — a
//!   saturated pool blocks the submitter rather than queueing unboundedly —
//!   and idle-worker expiry.
//! - [`WaitRegistry`]: a per-key wait list for implementing blocking reads
//!   over a plain map, built from the same wait/notify pattern as
//!   [`TransferQueue`].
//!
//! Timeouts are values, not errors: a timed-out `take` returns `Ok(None)`,
//! a timed-out `transfer` returns `Ok(false)`. Cancellation is the only
//! error these operations produce, and it is never swallowed — with one
//! deliberate exception: when a wait is cancelled at the same moment its
//! value is claimed by the other side, the operation reports success and the
//! token simply stays cancelled for the caller to observe next.
//!
//! [`Duration::ZERO`]: core::time::Duration::ZERO

#![warn(missing_docs, missing_debug_implementations)]

mod util;

pub mod cancel;
pub mod deadline;
pub mod expirable_lazy;
pub mod pairing;
pub mod pool;
pub mod transfer_queue;
pub mod wait_registry;

#[doc(inline)]
pub use self::cancel::CancelToken;
#[doc(inline)]
pub use self::deadline::Deadline;
#[doc(inline)]
pub use self::expirable_lazy::ExpirableLazy;
#[doc(inline)]
pub use self::pairing::Pairing;
#[doc(inline)]
pub use self::pool::ThreadPool;
#[doc(inline)]
pub use self::transfer_queue::TransferQueue;
#[doc(inline)]
pub use self::wait_registry::WaitRegistry;

/// An error indicating that a blocking wait was interrupted by its
/// [`CancelToken`] before it could complete.
///
/// This error is returned by every timeout-bearing operation in this crate;
/// timeouts themselves are reported in-band (`Ok(false)`, `Ok(None)`), never
/// as an error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cancelled(());

/// The result of a cancellable blocking operation.
pub type WaitResult<T> = Result<T, Cancelled>;

impl Cancelled {
    pub(crate) const fn new() -> Self {
        Self(())
    }
}

impl core::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("cancelled")
    }
}

impl std::error::Error for Cancelled {}
