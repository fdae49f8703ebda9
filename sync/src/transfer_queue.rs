//! A rendezvous queue: blocking put-with-acknowledgement, fire-and-forget
//! put, and blocking take.
//!
//! See the [`TransferQueue`] type's documentation for details.

use crate::{
    Cancelled, WaitResult,
    cancel::CancelToken,
    deadline::Deadline,
    util::lock,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering::Relaxed},
    },
    thread::{self, Thread},
    time::Duration,
};

#[cfg(test)]
mod tests;

/// A queue of values whose producers may either fire-and-forget ([`put`]) or
/// block until their value is consumed ([`transfer`]), and whose consumers
/// block until a value arrives ([`take`]).
///
/// Values are delivered strictly first-in, first-out, and blocked takers are
/// released strictly in arrival order: a `put` or `transfer` signals only
/// the taker at the head of the wait list, never an arbitrary one.
///
/// # Implementation notes
///
/// Both internal FIFOs — pending values and blocked takers — live behind a
/// single [`Mutex`], and waiting threads park themselves rather than waiting
/// on a condition variable. Waking a specific waiter is then just "flip its
/// ready flag while holding the lock, and unpark its thread"; because an
/// unpark of a not-yet-parked thread is remembered, there is no signal/sleep
/// window to lose a wake-up in. The critical sections only touch queue
/// bookkeeping, so the single lock is not a throughput concern.
///
/// A blocking `transfer` does not scan the queue to learn whether its value
/// was consumed; each transferred entry carries a shared completion handle
/// that the consuming `take` marks before unparking the producer.
///
/// [`put`]: Self::put
/// [`transfer`]: Self::transfer
/// [`take`]: Self::take
pub struct TransferQueue<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    /// Values that have been enqueued but not yet consumed, in FIFO order.
    writers: VecDeque<Writer<T>>,
    /// Blocked takers, in FIFO order. Only the head is ever signalled.
    readers: VecDeque<Arc<Reader>>,
}

struct Writer<T> {
    value: T,
    /// `Some` for a blocking `transfer`, `None` for a fire-and-forget `put`.
    handle: Option<Arc<TransferHandle>>,
}

struct TransferHandle {
    /// Set by the taker that consumes the value. Only accessed with the
    /// queue lock held.
    taken: AtomicBool,
    thread: Thread,
}

struct Reader {
    /// Set when this reader is the designated recipient of a pending value.
    /// Only accessed with the queue lock held.
    ready: AtomicBool,
    thread: Thread,
}

impl TransferHandle {
    fn for_current() -> Arc<Self> {
        Arc::new(Self {
            taken: AtomicBool::new(false),
            thread: thread::current(),
        })
    }
}

impl Reader {
    fn for_current() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            thread: thread::current(),
        })
    }
}

impl<T> State<T> {
    /// Signals the taker at the head of the wait list, if any.
    fn wake_head_reader(&self) {
        if let Some(reader) = self.readers.front() {
            reader.ready.store(true, Relaxed);
            reader.thread.unpark();
        }
    }

    /// Pops the FIFO head value, acknowledging its producer if it was a
    /// blocking transfer.
    fn pop_writer(&mut self) -> Option<T> {
        let writer = self.writers.pop_front()?;
        if let Some(handle) = writer.handle {
            handle.taken.store(true, Relaxed);
            handle.thread.unpark();
        }
        Some(writer.value)
    }

    /// Removes the entry owned by `handle`, returning `true` if it was still
    /// pending (i.e. not yet consumed by a taker).
    fn remove_transfer(&mut self, handle: &Arc<TransferHandle>) -> bool {
        let before = self.writers.len();
        self.writers
            .retain(|w| !matches!(&w.handle, Some(h) if Arc::ptr_eq(h, handle)));
        self.writers.len() != before
    }

    fn remove_reader(&mut self, reader: &Arc<Reader>) {
        self.readers.retain(|r| !Arc::ptr_eq(r, reader));
    }
}

impl<T> TransferQueue<T> {
    /// Returns a new, empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                writers: VecDeque::new(),
                readers: VecDeque::new(),
            }),
        }
    }

    /// Enqueues `value` without waiting for a taker.
    ///
    /// The value joins the FIFO of pending values; if a taker is blocked,
    /// the one at the head of the wait list is woken to claim it. Never
    /// blocks, never fails.
    pub fn put(&self, value: T) {
        let mut state = lock(&self.state);
        state.writers.push_back(Writer {
            value,
            handle: None,
        });
        state.wake_head_reader();
    }

    /// Enqueues `value` and blocks until a taker consumes it, the timeout
    /// elapses, or `cancel` fires.
    ///
    /// Returns `Ok(true)` if a taker removed the value before the deadline,
    /// and `Ok(false)` on timeout — in which case the value has been removed
    /// from the queue and will never be delivered. With an immediate timeout
    /// and no taker already waiting, returns `Ok(false)` without blocking.
    ///
    /// Cancellation is reported as `Err(`[`Cancelled`]`)` and also withdraws
    /// the value — unless a taker claimed it concurrently with the
    /// cancellation, in which case the transfer is reported successful and
    /// the token simply remains cancelled.
    pub fn transfer(&self, value: T, timeout: Duration, cancel: &CancelToken) -> WaitResult<bool> {
        let handle = TransferHandle::for_current();
        let mut state = lock(&self.state);
        let reader_waiting = !state.readers.is_empty();

        if !reader_waiting && Deadline::is_immediate(timeout) {
            return Ok(false);
        }
        state.writers.push_back(Writer {
            value,
            handle: Some(handle.clone()),
        });
        if reader_waiting {
            state.wake_head_reader();
            if Deadline::is_immediate(timeout) {
                // The woken taker gets one shot at claiming the value before
                // the immediate deadline is enforced.
                drop(state);
                thread::yield_now();
                let mut state = lock(&self.state);
                return Ok(!state.remove_transfer(&handle));
            }
        }

        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        loop {
            if handle.taken.load(Relaxed) {
                return Ok(true);
            }
            if cancel.is_cancelled() {
                state.remove_transfer(&handle);
                return Err(Cancelled::new());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                // if the value is gone, a taker won the race against the
                // deadline and the transfer succeeded after all
                return Ok(!state.remove_transfer(&handle));
            }
            drop(state);
            thread::park_timeout(remaining);
            state = lock(&self.state);
        }
    }

    /// Removes and returns the value at the head of the queue, blocking up
    /// to `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` on timeout (immediately, without enqueueing a
    /// waiter, if the timeout is zero and the queue is empty). Takers are
    /// served in strict arrival order: an incoming value wakes only the
    /// taker at the head of the wait list.
    ///
    /// A cancelled taker removes itself from the wait list, passes any
    /// wake-up it may have absorbed on to the next waiting taker, and
    /// returns `Err(`[`Cancelled`]`)` — unless a value had already been
    /// assigned to it, in which case the value is returned and the token
    /// remains cancelled.
    pub fn take(&self, timeout: Duration, cancel: &CancelToken) -> WaitResult<Option<T>> {
        let mut state = lock(&self.state);
        if let Some(value) = state.pop_writer() {
            return Ok(Some(value));
        }
        if Deadline::is_immediate(timeout) {
            return Ok(None);
        }

        let reader = Reader::for_current();
        state.readers.push_back(reader.clone());
        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        loop {
            if reader.ready.load(Relaxed) && !state.writers.is_empty() {
                state.remove_reader(&reader);
                let value = state.pop_writer();
                // a put may have arrived for each waiting taker; hand the
                // signal chain on so none of them oversleeps
                if !state.writers.is_empty() {
                    state.wake_head_reader();
                }
                return Ok(value);
            }
            if cancel.is_cancelled() {
                state.remove_reader(&reader);
                state.wake_head_reader();
                return Err(Cancelled::new());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                state.remove_reader(&reader);
                return Ok(None);
            }
            drop(state);
            thread::park_timeout(remaining);
            state = lock(&self.state);
        }
    }

    /// Returns the number of values currently enqueued.
    pub fn len(&self) -> usize {
        lock(&self.state).writers.len()
    }

    /// Returns `true` if no values are currently enqueued.
    pub fn is_empty(&self) -> bool {
        lock(&self.state).writers.is_empty()
    }
}

impl<T> Default for TransferQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for TransferQueue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("TransferQueue")
            .field("writers", &state.writers.len())
            .field("readers", &state.readers.len())
            .finish()
    }
}
