//! # Waitqueue.
//!
//! A [`WaitQueue`] is an ordered list of blocked threads with a suspend and
//! resume protocol. Everything else in this crate (the sleeping [`Mutex`],
//! the [`RwLock`], the pipe buffer, the poller) is built on it.
//!
//! ## The protocol
//!
//! Suspension happens in a fixed order, and the order is what prevents lost
//! wakeups: the calling thread is inserted into the queue's list and marked
//! [`ThreadState::Waiting`] *while the caller-supplied guard is still held*;
//! the guard is released next; only then does the thread park. A signal
//! arriving between the release and the park finds the waiter already in the
//! list, claims it, and the park returns immediately.
//!
//! ## Tail and head insertion
//!
//! Fresh arrivals queue fairly behind existing waiters ([`wait_tail_with`]).
//! A thread resuming a *partially completed* operation (it already
//! transferred some bytes and must wait again for more) re-enters at the
//! head ([`wait_head_with`]) so it is served before brand-new waiters,
//! preserving forward progress for in-flight operations.
//!
//! ## Timeouts and interruption
//!
//! A wait with a deadline is additionally registered in the process-wide
//! [`Timer`] registry. The periodic sweep claims expired waiters, removes
//! them from both the registry and their queue, and resumes them with
//! [`WakeReason::Timeout`]. [`Thread::interrupt`] does the same with
//! [`WakeReason::Interrupt`]. Wakers always *claim* a waiter before
//! unparking it, so a waiter that was already resumed for another reason is
//! recognized as stale and skipped.
//!
//! [`Mutex`]: crate::sync::Mutex
//! [`RwLock`]: crate::sync::RwLock
//! [`ThreadState::Waiting`]: crate::thread::ThreadState::Waiting
//! [`Thread::interrupt`]: crate::thread::Thread::interrupt
//! [`wait_tail_with`]: WaitQueue::wait_tail_with
//! [`wait_head_with`]: WaitQueue::wait_head_with
//! [`Timer`]: crate::timer::Timer

use super::mutex::{Mutex, MutexGuard};
use super::spinlock::{SpinLock, SpinLockGuard};
use crate::KernelError;
use crate::thread::{self, Thread, ThreadState};
use crate::timer::Timer;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a blocked thread was resumed.
///
/// Passed by wakers to [`WaitQueue::signal`] and [`WaitQueue::broadcast`];
/// [`Timeout`] and [`Interrupt`] are produced by the timeout sweep and by
/// [`Thread::interrupt`] respectively.
///
/// [`Timeout`]: Self::Timeout
/// [`Interrupt`]: Self::Interrupt
/// [`Thread::interrupt`]: crate::thread::Thread::interrupt
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum WakeReason {
    /// The condition the thread slept on was (possibly) made true.
    Signal,
    /// The wait's deadline elapsed.
    Timeout,
    /// A signal was delivered to the thread.
    Interrupt,
}

/// A wait ended without the condition being signaled.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum WaitError {
    /// The deadline elapsed before a signal arrived.
    TimedOut,
    /// The wait was interrupted by signal delivery.
    Interrupted,
}

impl From<WaitError> for KernelError {
    fn from(e: WaitError) -> KernelError {
        match e {
            WaitError::TimedOut => KernelError::TimedOut,
            WaitError::Interrupted => KernelError::Interrupted,
        }
    }
}

/// One blocked thread.
///
/// The `reason` slot is the claim point: whichever waker moves it from
/// `None` to `Some` owns the wakeup; all later wakers see a stale entry.
pub(crate) struct Waiter {
    thread: Arc<Thread>,
    reason: SpinLock<Option<WakeReason>>,
}

impl Waiter {
    fn claim(&self, reason: WakeReason) -> bool {
        let mut guard = self.reason.lock();
        if guard.is_some() {
            guard.unlock();
            return false;
        }
        *guard = Some(reason);
        guard.unlock();
        true
    }
}

/// Claim the waiter and, on success, mark its thread runnable and unpark it.
fn wake(waiter: &Waiter, reason: WakeReason) -> bool {
    if waiter.claim(reason) {
        waiter.thread.resume();
        true
    } else {
        false
    }
}

/// The list of blocked threads, shared with the deadline registry.
pub(crate) type WaiterList = SpinLock<VecDeque<Arc<Waiter>>>;

/// A record of the wait a thread is currently blocked in, held in its
/// control block so that interruption can find and cancel the wait.
#[derive(Clone)]
pub(crate) struct Blocked {
    waiter: Arc<Waiter>,
    queue: Arc<WaiterList>,
}

/// Remove `blocked` from its queue and resume it with an interrupted status.
///
/// Returns `false` if the waiter is no longer queued (already resumed).
pub(crate) fn cancel_wait(blocked: &Blocked) -> bool {
    if !WaitQueue::remove(&blocked.queue, &blocked.waiter) {
        return false;
    }
    wake(&blocked.waiter, WakeReason::Interrupt)
}

/// An ordered list of blocked threads with a suspend/resume protocol.
///
/// Created and destroyed with the owning structure; destruction asserts that
/// no thread is still blocked on it.
pub struct WaitQueue {
    waiters: Arc<WaiterList>,
    timer: Arc<Timer>,
}

impl WaitQueue {
    /// Creates an empty waitqueue wired to the process-wide timer context.
    pub fn new(timer: &Arc<Timer>) -> WaitQueue {
        WaitQueue {
            waiters: Arc::new(SpinLock::new(VecDeque::new())),
            timer: Arc::clone(timer),
        }
    }

    /// Whether any thread is currently blocked on this queue.
    ///
    /// The answer is advisory: it may be stale by the time the caller acts
    /// on it, which is acceptable for the writer-priority heuristic this
    /// exists for.
    pub fn has_waiters(&self) -> bool {
        let list = self.waiters.lock();
        let waiting = !list.is_empty();
        list.unlock();
        waiting
    }

    /// Insert the calling thread into the list and mark it waiting.
    ///
    /// This runs entirely before the caller-supplied guard is released,
    /// which is the lost-wakeup-prevention half of the protocol.
    fn prepare(&self, at_head: bool, timeout: Option<Duration>) -> Arc<Waiter> {
        let thread = thread::current();
        let waiter = Arc::new(Waiter {
            thread: Arc::clone(&thread),
            reason: SpinLock::new(None),
        });

        let mut blocked = thread.blocked_on.lock();
        assert!(
            blocked.is_none(),
            "thread {} is already blocked in another waitqueue",
            thread.tid
        );
        *blocked = Some(Blocked {
            waiter: Arc::clone(&waiter),
            queue: Arc::clone(&self.waiters),
        });
        blocked.unlock();

        let mut list = self.waiters.lock();
        if at_head {
            list.push_front(Arc::clone(&waiter));
        } else {
            list.push_back(Arc::clone(&waiter));
        }
        thread.set_state(ThreadState::Waiting);
        list.unlock();

        if let Some(timeout) = timeout {
            self.timer.register(
                Instant::now() + timeout,
                Arc::clone(&waiter),
                Arc::clone(&self.waiters),
            );
        }
        waiter
    }

    /// Park until a waker claims the waiter, then report the outcome.
    fn suspend(waiter: Arc<Waiter>) -> Result<(), WaitError> {
        let reason = loop {
            let guard = waiter.reason.lock();
            if let Some(reason) = *guard {
                guard.unlock();
                break reason;
            }
            guard.unlock();
            std::thread::park();
        };

        let mut blocked = waiter.thread.blocked_on.lock();
        *blocked = None;
        blocked.unlock();

        match reason {
            WakeReason::Signal => Ok(()),
            WakeReason::Timeout => Err(WaitError::TimedOut),
            WakeReason::Interrupt => Err(WaitError::Interrupted),
        }
    }

    /// Block at the tail of the queue with no guard to release.
    ///
    /// For callers that hold no lock around the decision to sleep and accept
    /// the races that implies; primarily a building block for simple delays
    /// and rendezvous points.
    pub fn wait_tail(&self, timeout: Option<Duration>) -> Result<(), WaitError> {
        let waiter = self.prepare(false, timeout);
        Self::suspend(waiter)
    }

    /// Block at the head of the queue with no guard to release.
    pub fn wait_head(&self, timeout: Option<Duration>) -> Result<(), WaitError> {
        let waiter = self.prepare(true, timeout);
        Self::suspend(waiter)
    }

    /// Block at the tail of the queue, releasing `guard` before sleeping.
    ///
    /// The guard is **not** re-acquired; on return the caller holds no lock.
    pub fn wait_tail_with<T>(
        &self,
        guard: SpinLockGuard<'_, T>,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        let waiter = self.prepare(false, timeout);
        guard.unlock();
        Self::suspend(waiter)
    }

    /// Block at the head of the queue, releasing `guard` before sleeping.
    ///
    /// Head insertion is for threads resuming a partially completed
    /// operation; see the module documentation.
    pub fn wait_head_with<T>(
        &self,
        guard: SpinLockGuard<'_, T>,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        let waiter = self.prepare(true, timeout);
        guard.unlock();
        Self::suspend(waiter)
    }

    /// Block at the tail of the queue while holding a sleeping [`Mutex`].
    ///
    /// The mutex guard is released after the thread is enqueued and
    /// re-acquired after the wakeup; the fresh guard is returned alongside
    /// the wait status. This is the shape the pipe buffer uses with its
    /// owner-supplied channel lock.
    pub fn wait_tail_mutex<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        timeout: Option<Duration>,
    ) -> (MutexGuard<'a, T>, Result<(), WaitError>) {
        let waiter = self.prepare(false, timeout);
        guard.unlock();
        let result = Self::suspend(waiter);
        (mutex.lock(), result)
    }

    /// Block at the head of the queue while holding a sleeping [`Mutex`].
    ///
    /// See [`wait_tail_mutex`](Self::wait_tail_mutex); head insertion is for
    /// re-waits after partial progress.
    pub fn wait_head_mutex<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        timeout: Option<Duration>,
    ) -> (MutexGuard<'a, T>, Result<(), WaitError>) {
        let waiter = self.prepare(true, timeout);
        guard.unlock();
        let result = Self::suspend(waiter);
        (mutex.lock(), result)
    }

    /// Wake exactly one waiter still genuinely associated with this queue.
    ///
    /// Entries already claimed by the timeout sweep or an interrupt are
    /// discarded as stale. Returns whether a thread was actually woken.
    pub fn signal(&self, reason: WakeReason) -> bool {
        loop {
            let mut list = self.waiters.lock();
            let waiter = list.pop_front();
            list.unlock();
            match waiter {
                Some(waiter) => {
                    if wake(&waiter, reason) {
                        return true;
                    }
                    // Stale entry; keep looking.
                }
                None => return false,
            }
        }
    }

    /// Wake all eligible waiters. Returns the number of threads woken.
    pub fn broadcast(&self, reason: WakeReason) -> usize {
        let mut list = self.waiters.lock();
        let drained: Vec<_> = list.drain(..).collect();
        list.unlock();
        drained.iter().filter(|waiter| wake(waiter, reason)).count()
    }

    /// Remove `waiter` from `queue` if it is still a member.
    fn remove(queue: &WaiterList, waiter: &Arc<Waiter>) -> bool {
        let mut list = queue.lock();
        let position = list.iter().position(|w| Arc::ptr_eq(w, waiter));
        if let Some(position) = position {
            list.remove(position);
        }
        list.unlock();
        position.is_some()
    }

    /// Expire `waiter`: remove it from `queue` and resume it with a
    /// timed-out status. Called by the timeout sweep only.
    ///
    /// Returns `false` if the waiter was already resumed for another reason.
    pub(crate) fn expire(queue: &Arc<WaiterList>, waiter: &Arc<Waiter>) -> bool {
        if !Self::remove(queue, waiter) {
            return false;
        }
        wake(waiter, WakeReason::Timeout)
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        let list = self.waiters.lock();
        let remaining = list.len();
        list.unlock();
        assert!(
            remaining == 0,
            "waitqueue destroyed with {remaining} thread(s) still blocked"
        );
    }
}
