//! A bounded worker-thread pool with direct handoff and idle expiry.
//!
//! See the [`ThreadPool`] type's documentation for details.

use crate::{
    Cancelled,
    cancel::CancelToken,
    deadline::Deadline,
    util::lock,
    WaitResult,
};
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering::Relaxed},
    },
    thread::{self, Thread, ThreadId},
    time::Duration,
};


/// The unit of work submitted to a [`ThreadPool`].
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error returned by [`ThreadPool::execute`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The wait for a free worker was interrupted by the caller's
    /// [`CancelToken`].
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// The pool has been shut down and accepts no new work.
    #[error("the pool has been shut down")]
    ShutDown,
}

/// A pool of worker threads with a bounded size, direct work handoff, and
/// idle-worker expiry.
///
/// The pool holds no work queue: [`execute`] hands its job straight to an
/// idle worker, spawns a new worker if the pool is below its maximum size,
/// and otherwise *blocks* — up to its timeout, interruptibly through its
/// [`CancelToken`] — until a worker frees up. Saturation is therefore
/// backpressure on the submitter, not an unbounded backlog.
///
/// Workers are created on demand and retire themselves after sitting idle
/// for the keep-alive period, so an idle pool eventually holds no threads
/// at all. [`shutdown`] stops the intake; workers finish the job in hand
/// and exit, and [`await_termination`] blocks until the last one is gone.
///
/// Dropping the pool does *not* stop it: without a [`shutdown`] call, live
/// workers simply finish and expire on their own schedule.
///
/// # Implementation notes
///
/// One [`Mutex`] guards the pool's bookkeeping (worker count, idle-worker
/// FIFO, blocked-submitter FIFO); blocked threads park themselves, the wait
/// model shared by [`TransferQueue`](crate::TransferQueue). Handoff in both
/// directions goes through a per-thread slot written under the pool lock: a
/// submitter assigns into an idle worker's slot, and a worker that frees up
/// drains the oldest blocked submitter's slot directly, without going
/// through the idle list.
///
/// A panicking job is caught and logged; the worker survives it and keeps
/// serving, so one bad job cannot shrink the pool.
///
/// [`execute`]: Self::execute
/// [`shutdown`]: Self::shutdown
/// [`await_termination`]: Self::await_termination
pub struct ThreadPool {
    inner: Arc<Inner>,
}

struct Inner {
    max_workers: usize,
    keep_alive: Duration,
    state: Mutex<State>,
}

struct State {
    /// Live worker threads, idle or busy.
    workers: usize,
    /// Workers parked with an empty slot, in the order they went idle.
    idle: VecDeque<Arc<WorkerHandle>>,
    /// Submitters blocked waiting for a worker, in arrival order.
    submitters: VecDeque<Arc<Submitter>>,
    /// Threads blocked in `await_termination`.
    termination_waiters: Vec<Thread>,
    shutdown: bool,
}

/// An idle worker's mailbox: a submitter deposits a job here after popping
/// the worker off the idle list.
struct WorkerHandle {
    /// Only accessed with the pool lock held.
    job: Mutex<Option<Job>>,
    thread: Thread,
}

/// A blocked `execute` call: holds the job until a worker claims it.
struct Submitter {
    /// Only accessed with the pool lock held.
    job: Mutex<Option<Job>>,
    /// Set by the worker that claimed the job.
    accepted: AtomicBool,
    thread: Thread,
}

impl State {
    fn remove_submitter(&mut self, submitter: &Arc<Submitter>) {
        self.submitters.retain(|s| !Arc::ptr_eq(s, submitter));
    }

    fn remove_termination_waiter(&mut self, id: ThreadId) {
        self.termination_waiters.retain(|t| t.id() != id);
    }

    /// Retires the calling worker, waking termination waiters if it was the
    /// last one out after a shutdown.
    fn retire_worker(&mut self) {
        self.workers -= 1;
        if self.shutdown && self.workers == 0 {
            for thread in self.termination_waiters.drain(..) {
                thread.unpark();
            }
        }
    }
}

impl ThreadPool {
    /// Returns a new pool that grows up to `max_workers` threads, each
    /// retiring after `keep_alive` without work.
    ///
    /// # Panics
    ///
    /// If `max_workers` is zero.
    pub fn new(max_workers: usize, keep_alive: Duration) -> Self {
        assert!(max_workers > 0, "a pool needs at least one worker");
        Self {
            inner: Arc::new(Inner {
                max_workers,
                keep_alive,
                state: Mutex::new(State {
                    workers: 0,
                    idle: VecDeque::new(),
                    submitters: VecDeque::new(),
                    termination_waiters: Vec::new(),
                    shutdown: false,
                }),
            }),
        }
    }

    /// Submits `job` to the pool, blocking up to `timeout` for a worker if
    /// the pool is saturated.
    ///
    /// Returns `Ok(true)` once a worker has accepted the job, and
    /// `Ok(false)` on timeout — in which case the job is discarded, never
    /// run. With an immediate timeout and no capacity, returns `Ok(false)`
    /// without blocking.
    ///
    /// Fails with [`Error::ShutDown`] once [`shutdown`](Self::shutdown) has
    /// been called (including for submitters already blocked when it is),
    /// and with [`Error::Cancelled`] if `cancel` fires during the wait —
    /// unless a worker claimed the job concurrently, in which case the
    /// submission is reported accepted and the token simply remains
    /// cancelled.
    pub fn execute(
        &self,
        job: impl FnOnce() + Send + 'static,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, Error> {
        let job: Job = Box::new(job);
        let mut state = lock(&self.inner.state);
        if state.shutdown {
            return Err(Error::ShutDown);
        }
        if let Some(worker) = state.idle.pop_front() {
            *lock(&worker.job) = Some(job);
            worker.thread.unpark();
            return Ok(true);
        }
        if state.workers < self.inner.max_workers {
            state.workers += 1;
            drop(state);
            let inner = self.inner.clone();
            thread::spawn(move || run_worker(inner, job));
            return Ok(true);
        }
        if Deadline::is_immediate(timeout) {
            return Ok(false);
        }

        let submitter = Arc::new(Submitter {
            job: Mutex::new(Some(job)),
            accepted: AtomicBool::new(false),
            thread: thread::current(),
        });
        state.submitters.push_back(submitter.clone());
        tracing::trace!("pool saturated; waiting for a worker");

        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        loop {
            if submitter.accepted.load(Relaxed) {
                return Ok(true);
            }
            if state.shutdown {
                state.remove_submitter(&submitter);
                return Err(Error::ShutDown);
            }
            if cancel.is_cancelled() {
                state.remove_submitter(&submitter);
                return Err(Error::Cancelled(Cancelled::new()));
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                state.remove_submitter(&submitter);
                return Ok(false);
            }
            drop(state);
            thread::park_timeout(remaining);
            state = lock(&self.inner.state);
        }
    }

    /// Shuts the pool down: no further work is accepted, and workers exit
    /// once they finish the job in hand.
    ///
    /// Submitters currently blocked in [`execute`](Self::execute) fail with
    /// [`Error::ShutDown`]. Shutting down an already-shut-down pool does
    /// nothing.
    pub fn shutdown(&self) {
        let mut state = lock(&self.inner.state);
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        for worker in state.idle.drain(..) {
            worker.thread.unpark();
        }
        for submitter in &state.submitters {
            submitter.thread.unpark();
        }
        if state.workers == 0 {
            for thread in state.termination_waiters.drain(..) {
                thread.unpark();
            }
        }
    }

    /// Blocks until the pool has shut down and its last worker has exited,
    /// the timeout elapses, or `cancel` fires.
    ///
    /// Returns `Ok(true)` once termination is complete and `Ok(false)` on
    /// timeout; calling this without a [`shutdown`](Self::shutdown) simply
    /// waits for one to happen (or for the timeout).
    pub fn await_termination(&self, timeout: Duration, cancel: &CancelToken) -> WaitResult<bool> {
        let me = thread::current();
        let mut state = lock(&self.inner.state);
        if state.shutdown && state.workers == 0 {
            return Ok(true);
        }
        if Deadline::is_immediate(timeout) {
            return Ok(false);
        }
        state.termination_waiters.push(me.clone());

        let deadline = Deadline::start(timeout);
        let _registration = cancel.register_current();
        loop {
            if state.shutdown && state.workers == 0 {
                state.remove_termination_waiter(me.id());
                return Ok(true);
            }
            if cancel.is_cancelled() {
                state.remove_termination_waiter(me.id());
                return Err(Cancelled::new());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                state.remove_termination_waiter(me.id());
                return Ok(false);
            }
            drop(state);
            thread::park_timeout(remaining);
            state = lock(&self.inner.state);
        }
    }

    /// Returns the number of live worker threads, idle or busy. Inherently
    /// racy; useful for diagnostics and tests only.
    pub fn worker_count(&self) -> usize {
        lock(&self.inner.state).workers
    }
}

/// The body of a worker thread, entered with its first job in hand.
fn run_worker(inner: Arc<Inner>, first: Job) {
    let handle = Arc::new(WorkerHandle {
        job: Mutex::new(None),
        thread: thread::current(),
    });
    let mut job = Some(first);

    loop {
        if let Some(job) = job.take() {
            // a panicking job must not take the worker down with it
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::warn!("pool job panicked");
            }
        }

        let mut state = lock(&inner.state);
        if state.shutdown {
            state.retire_worker();
            return;
        }
        // serve the oldest blocked submitter before going idle
        if let Some(submitter) = state.submitters.pop_front() {
            job = lock(&submitter.job).take();
            if job.is_some() {
                submitter.accepted.store(true, Relaxed);
                submitter.thread.unpark();
            }
            continue;
        }

        state.idle.push_back(handle.clone());
        drop(state);
        let deadline = Deadline::start(inner.keep_alive);
        loop {
            {
                let mut state = lock(&inner.state);
                if let Some(assigned) = lock(&handle.job).take() {
                    // the assigner already popped us off the idle list
                    job = Some(assigned);
                    break;
                }
                if state.shutdown {
                    // shutdown drained the idle list before setting the flag
                    state.retire_worker();
                    return;
                }
                if deadline.remaining().is_zero() {
                    let before = state.idle.len();
                    state.idle.retain(|h| !Arc::ptr_eq(h, &handle));
                    if state.idle.len() != before {
                        tracing::trace!("idle worker expired");
                        state.retire_worker();
                        return;
                    }
                    // not idle any more: a job assignment is in flight and
                    // the next pass around the loop picks it up
                }
            }
            thread::park_timeout(deadline.remaining());
        }
    }
}

impl core::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ThreadPool")
            .field("workers", &state.workers)
            .field("idle", &state.idle.len())
            .field("blocked_submitters", &state.submitters.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
