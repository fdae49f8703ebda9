//! Monotonic deadline bookkeeping for timed waits.
//!
//! Every blocking primitive in this crate uses the same timeout discipline:
//! an absolute [`Deadline`] is captured once when the operation starts, and
//! the remaining budget is recomputed from the monotonic clock on every
//! wake-up, so spurious wake-ups never extend a wait.

use std::time::{Duration, Instant};

/// An absolute point in time, computed as "now + timeout" when a blocking
/// operation begins.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Captures the deadline for an operation starting now with the given
    /// timeout.
    pub fn start(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Returns the time budget left before this deadline, saturating to zero
    /// once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns `true` if this deadline has passed.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Returns `true` if `timeout` means "do not block at all".
    ///
    /// An immediate timeout makes an operation try its fast path and report
    /// failure (`Ok(false)` / `Ok(None)`) without ever enqueueing a waiter.
    pub const fn is_immediate(timeout: Duration) -> bool {
        timeout.is_zero()
    }
}
