//! An unbounded lock-free FIFO queue (Michael-Scott).
//!
//! See the [`ConcurrentQueue`] type's documentation for details.

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use std::{
    fmt,
    mem::MaybeUninit,
    sync::atomic::Ordering::{Acquire, Relaxed, Release},
    thread,
};

/// An unbounded multi-producer, multi-consumer FIFO queue that never blocks.
///
/// This is the classic Michael-Scott linked queue: a singly linked list with
/// a permanent sentinel node, where `head` and `tail` are always non-null
/// and `tail` is allowed to lag behind the true last node during concurrent
/// insertion. An enqueue links its node with a single compare-and-swap on
/// the observed tail's `next` field, then advances `tail` on a best-effort
/// basis; any thread that observes a lagging tail helps it forward before
/// retrying its own operation.
///
/// The original algorithm leans on a garbage collector to keep unlinked
/// nodes alive while another thread may still be reading them. Here that
/// role is played by epoch-based reclamation ([`crossbeam_epoch`]): a
/// dequeued sentinel is *retired*, not freed, and is only destroyed once
/// every thread pinned at the time has moved on. This also rules out the
/// ABA problem, since a node's address cannot be reused while any dequeue
/// might still compare against it.
pub struct ConcurrentQueue<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
}

struct Node<T> {
    /// Uninhabited in the sentinel; initialized in every other node. A
    /// node's value is moved out by the dequeue that unlinks its
    /// predecessor, at which point the node becomes the new sentinel.
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

unsafe impl<T: Send> Send for ConcurrentQueue<T> {}
unsafe impl<T: Send> Sync for ConcurrentQueue<T> {}

impl<T> ConcurrentQueue<T> {
    /// Returns a new, empty queue.
    pub fn new() -> Self {
        let queue = Self {
            head: Atomic::null(),
            tail: Atomic::null(),
        };
        let sentinel = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        // Safety: the queue is not shared yet, so an unprotected guard is
        // fine for wiring up the initial sentinel.
        let sentinel = sentinel.into_shared(unsafe { epoch::unprotected() });
        queue.head.store(sentinel, Relaxed);
        queue.tail.store(sentinel, Relaxed);
        queue
    }

    /// Appends `value` to the tail of the queue.
    ///
    /// Never blocks and never fails; lock-free against any number of
    /// concurrent producers and consumers.
    pub fn put(&self, value: T) {
        let guard = &epoch::pin();
        let node = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(guard);

        loop {
            let tail = self.tail.load(Acquire, guard);
            // Safety: `tail` is never null, and epoch pinning keeps the
            // node alive even if it has just been dequeued.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Acquire, guard);

            if !next.is_null() {
                // stale tail: help it forward and retry
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed, guard);
                continue;
            }
            if tail_ref
                .next
                .compare_exchange(Shared::null(), node, Release, Relaxed, guard)
                .is_ok()
            {
                // linking succeeded; advancing the tail is best-effort,
                // somebody else may already have helped
                let _ = self
                    .tail
                    .compare_exchange(tail, node, Release, Relaxed, guard);
                return;
            }
        }
    }

    /// Removes and returns the value at the head of the queue, or `None` if
    /// the queue is currently empty.
    pub fn try_take(&self) -> Option<T> {
        let guard = &epoch::pin();
        loop {
            let head = self.head.load(Acquire, guard);
            // Safety: `head` is never null; pinning keeps it alive.
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Acquire, guard);
            // Safety: as above; `next` is checked for null first.
            let next_ref = match unsafe { next.as_ref() } {
                Some(next_ref) => next_ref,
                None => return None,
            };

            // don't let the tail point at the node we are about to retire
            let tail = self.tail.load(Relaxed, guard);
            if tail == head {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed, guard);
            }

            if self
                .head
                .compare_exchange(head, next, Release, Relaxed, guard)
                .is_ok()
            {
                // Safety: winning the head CAS grants exclusive ownership
                // of the successor's value; the node itself stays linked as
                // the new sentinel. The old sentinel holds no value and is
                // retired through the epoch scheme.
                unsafe {
                    let value = next_ref.value.assume_init_read();
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }
        }
    }

    /// Removes and returns the value at the head of the queue, spinning
    /// until one is available.
    ///
    /// This yields the processor between attempts rather than parking the
    /// thread; there is no timeout variant. Intended for consumers that
    /// expect values to arrive promptly.
    pub fn take(&self) -> T {
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            thread::yield_now();
        }
    }

    /// Returns `true` if the queue had no values at the moment of the call.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Acquire, guard);
        // Safety: `head` is never null.
        unsafe { head.deref() }.next.load(Acquire, guard).is_null()
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        // Safety: `&mut self` means no other thread can touch the queue,
        // so the nodes can be walked and freed without pinning.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Relaxed, guard);
            // the first node is the sentinel and holds no value
            let mut is_sentinel = true;
            while !node.is_null() {
                let next = node.deref().next.load(Relaxed, guard);
                let mut owned = node.into_owned();
                if !is_sentinel {
                    owned.value.assume_init_drop();
                }
                drop(owned);
                is_sentinel = false;
                node = next;
            }
        }
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("is_empty", &self.is_empty())
            .finish()
    }
}
