//! # kwait: blocking synchronization and readiness notification.
//!
//! This crate is the blocking-synchronization core of a monolithic kernel,
//! hosted on top of the platform's native threads. It lets many preemptible
//! threads coordinate access to shared state without busy-waiting, without
//! losing wakeups, with support for timeouts, partial progress, and fan-out
//! readiness notification to arbitrary numbers of waiters. Every higher-level
//! channel-like facility (pipes, pseudo-terminals, device event queues,
//! sockets) is built directly on top of the primitives defined here.
//!
//! ## Components
//!
//! The crate is layered leaf-first; everything ultimately rests on the
//! waitqueue:
//!
//! | Component | Module | Built on |
//! |-----------|--------|----------|
//! | [`WaitQueue`] | [`sync::wait_queue`] | [`SpinLock`], [`Timer`], thread park/unpark |
//! | [`Mutex`] | [`sync::mutex`] | one [`WaitQueue`] |
//! | [`RwLock`] | [`sync::rwlock`] | two [`WaitQueue`]s |
//! | [`RingBuffer`] | [`ring`] | nothing (no blocking semantics of its own) |
//! | [`Pipe`] | [`pipe`] | [`RingBuffer`] + two [`WaitQueue`]s + [`Mutex`] |
//! | [`Poller`] | [`poll`] | [`WaitQueue`] + subscription lists |
//!
//! A producer writes into a [`Pipe`], which advances the ring buffer and
//! wakes the read waitqueue; any [`Poller`] subscribed to that channel's
//! [`PollHead`] is separately notified via broadcast, independent of whether
//! a reader is directly blocked in the pipe.
//!
//! ## The suspension protocol
//!
//! Every blocking operation follows the same ordering, and the ordering is
//! the race-prevention mechanism:
//!
//! 1. insert the calling thread into the waitqueue's list and mark it
//!    [`ThreadState::Waiting`], under the queue's own spinlock;
//! 2. release the caller-supplied guard protecting the decision to sleep;
//! 3. only then hand the thread to the platform (`park`).
//!
//! A wakeup signaled between "decide to sleep" and "actually sleep" lands on
//! the already-inserted waiter and is therefore never lost.
//!
//! ## Timeouts and interruption
//!
//! Deadlines live in a single process-wide [`Timer`] context, created
//! explicitly at boot ([`Timer::new`] for manual driving, [`Timer::start`]
//! to run the periodic sweep on a background thread). The sweep resumes
//! expired waiters with a distinguished timed-out status, removing them from
//! both their waitqueue and the deadline registry. Signal delivery to a
//! blocked thread is modeled by [`thread::Thread::interrupt`], which resumes
//! the wait with an interrupted status.
//!
//! [`WaitQueue`]: sync::WaitQueue
//! [`SpinLock`]: sync::SpinLock
//! [`Mutex`]: sync::Mutex
//! [`RwLock`]: sync::RwLock
//! [`RingBuffer`]: ring::RingBuffer
//! [`Pipe`]: pipe::Pipe
//! [`Poller`]: poll::Poller
//! [`PollHead`]: poll::PollHead
//! [`Timer`]: timer::Timer
//! [`ThreadState::Waiting`]: thread::ThreadState::Waiting

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod pipe;
pub mod poll;
pub mod ring;
pub mod sync;
pub mod thread;
pub mod timer;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by blocking operations.
/// Each variant corresponds to a specific type of error that might occur while
/// suspending, transferring bytes through a channel, or waiting for readiness.
/// These errors are ordinary values for the caller to retry or surface further
/// up (e.g. to a user-visible system call); invariant violations are *not*
/// represented here, as they are programming errors and panic.
///
/// Not every variant is produced inside this crate:
/// [`OperationNotPermitted`] and [`Busy`] are reserved errno surface for the
/// device and IPC collaborators that return this type from their own call
/// paths.
///
/// [`OperationNotPermitted`]: Self::OperationNotPermitted
/// [`Busy`]: Self::Busy
#[derive(Debug, Eq, PartialEq, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(isize)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted = -1,
    /// Suspension ended due to a pending signal. (EINTR)
    Interrupted = -4,
    /// Out of memory. (ENOMEM)
    NoMemory = -12,
    /// Device or resource busy. (EBUSY)
    Busy = -16,
    /// Invalid argument. (EINVAL)
    InvalidArgument = -22,
    /// Write attempted with zero live readers. (EPIPE)
    BrokenPipe = -32,
    /// A non-blocking attempt found nothing immediately. (EAGAIN)
    WouldBlock = -11,
    /// The deadline elapsed before the operation could complete. (ETIMEDOUT)
    TimedOut = -110,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        isize::from(self) as usize
    }
}
