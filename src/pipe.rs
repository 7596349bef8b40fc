//! Blocking producer/consumer byte channel.
//!
//! A [`Pipe`] composes a [`RingBuffer`] with a read waitqueue, a write
//! waitqueue, reader/writer handle counts, and a [`PollHead`] for readiness
//! fan-out. It is the substrate for pipes, pseudo-terminals and device event
//! queues.
//!
//! ## Transfer semantics
//!
//! [`read`] and [`write`] are loops over [`PIPE_BUF`]-sized chunks. Each
//! successfully transferred chunk broadcasts the opposite waitqueue and the
//! poll head, so producers and consumers resume pipelined instead of in
//! lockstep. A caller that must sleep enters its waitqueue at the tail on
//! the first wait and at the head on any re-wait after partial progress, so
//! an in-flight operation finishes ahead of newcomers.
//!
//! The `min` argument is the blocking threshold: the call sleeps only while
//! fewer than `min` bytes have been transferred. `min == 0` makes the call
//! non-blocking; finding nothing immediately yields
//! [`KernelError::WouldBlock`].
//!
//! ## Hang-up and broken pipe
//!
//! When the last writer handle closes, blocked and future reads drain the
//! buffered bytes and then return 0 (end of stream). When the last reader
//! handle closes, a write fails eagerly with [`KernelError::BrokenPipe`]
//! before transferring anything; if the readers disappear while a write is
//! mid-call, the call stops accepting bytes and still reports the partial
//! count, leaving the error to the next call.
//!
//! [`read`]: Pipe::read
//! [`write`]: Pipe::write
//! [`RingBuffer`]: crate::ring::RingBuffer
//! [`KernelError::WouldBlock`]: crate::KernelError::WouldBlock
//! [`KernelError::BrokenPipe`]: crate::KernelError::BrokenPipe

use crate::KernelError;
use crate::poll::{PollEvents, PollHead};
use crate::ring::RingBuffer;
use crate::sync::mutex::{Mutex, MutexGuard};
use crate::sync::wait_queue::{WaitQueue, WakeReason};
use crate::timer::Timer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The chunk size below which a single transfer through the channel is
/// atomic.
pub const PIPE_BUF: usize = 512;

/// The locked interior of a [`Pipe`]: the ring plus handle counts.
///
/// The owner manages the counts directly on handle open/close, under the
/// channel lock obtained from [`Pipe::lock`], or through the
/// [`open_reader`]/[`close_writer`] convenience pairs.
///
/// [`open_reader`]: Pipe::open_reader
/// [`close_writer`]: Pipe::close_writer
pub struct PipeBuffer {
    /// The backing circular byte store.
    pub ring: RingBuffer,
    /// Number of live reader handles.
    pub readers: usize,
    /// Number of live writer handles.
    pub writers: usize,
}

/// A blocking byte channel.
pub struct Pipe {
    channel: Mutex<PipeBuffer>,
    read_waiters: WaitQueue,
    write_waiters: WaitQueue,
    head: PollHead,
}

impl Pipe {
    /// Creates a channel backed by a ring of `capacity` bytes, with no open
    /// handles.
    ///
    /// # Errors
    ///
    /// Fails as [`RingBuffer::new`] does.
    pub fn new(timer: &Arc<Timer>, capacity: usize) -> Result<Pipe, KernelError> {
        Ok(Pipe {
            channel: Mutex::new(
                timer,
                PipeBuffer {
                    ring: RingBuffer::new(capacity)?,
                    readers: 0,
                    writers: 0,
                },
            ),
            read_waiters: WaitQueue::new(timer),
            write_waiters: WaitQueue::new(timer),
            head: PollHead::new(),
        })
    }

    /// The channel's readiness head, for poller subscriptions.
    pub fn head(&self) -> &PollHead {
        &self.head
    }

    /// Acquires the channel lock directly.
    ///
    /// For owners that manage handle counts themselves or use the
    /// `_locked` transfer variants.
    pub fn lock(&self) -> MutexGuard<'_, PipeBuffer> {
        self.channel.lock()
    }

    /// Registers a reader handle.
    pub fn open_reader(&self) {
        let mut guard = self.channel.lock();
        guard.readers += 1;
        guard.unlock();
    }

    /// Registers a writer handle.
    pub fn open_writer(&self) {
        let mut guard = self.channel.lock();
        guard.writers += 1;
        guard.unlock();
    }

    /// Releases a reader handle.
    ///
    /// Closing the last reader resumes all blocked writers and reports the
    /// error condition to pollers.
    pub fn close_reader(&self) {
        let mut guard = self.channel.lock();
        assert!(guard.readers > 0, "reader handle count underflow");
        guard.readers -= 1;
        let last = guard.readers == 0;
        guard.unlock();
        if last {
            log::trace!("last reader handle closed, breaking the channel");
            self.write_waiters.broadcast(WakeReason::Signal);
            self.head.broadcast(PollEvents::OUT | PollEvents::ERR);
        }
    }

    /// Releases a writer handle.
    ///
    /// Closing the last writer resumes all blocked readers (they drain the
    /// buffer and then see end-of-stream) and reports hang-up to pollers.
    pub fn close_writer(&self) {
        let mut guard = self.channel.lock();
        assert!(guard.writers > 0, "writer handle count underflow");
        guard.writers -= 1;
        let last = guard.writers == 0;
        guard.unlock();
        if last {
            log::trace!("last writer handle closed, channel at end of stream");
            self.read_waiters.broadcast(WakeReason::Signal);
            self.head.broadcast(PollEvents::IN | PollEvents::HUP);
        }
    }

    /// Reads up to `out.len()` bytes, sleeping while fewer than `min` bytes
    /// have been transferred.
    ///
    /// Returns the number of bytes read; 0 means end of stream (no writers
    /// remain and the buffer is drained).
    ///
    /// # Errors
    ///
    /// [`KernelError::WouldBlock`] when `min == 0` and nothing is buffered,
    /// [`KernelError::TimedOut`] when `timeout` elapses before any byte
    /// arrives, [`KernelError::Interrupted`] on signal delivery while
    /// blocked. A partial transfer always reports its count rather than an
    /// error.
    pub fn read(
        &self,
        out: &mut [u8],
        min: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, KernelError> {
        let guard = self.channel.lock();
        let (guard, result) = self.read_locked(guard, out, min, timeout);
        guard.unlock();
        result
    }

    /// [`read`](Self::read) for callers already holding the channel lock.
    ///
    /// The lock is transiently released while sleeping and is held again
    /// when the call returns.
    pub fn read_locked<'a>(
        &'a self,
        guard: MutexGuard<'a, PipeBuffer>,
        out: &mut [u8],
        min: usize,
        timeout: Option<Duration>,
    ) -> (MutexGuard<'a, PipeBuffer>, Result<usize, KernelError>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let min = min.min(out.len());
        let mut guard = guard;
        let mut taken = 0;
        while taken < out.len() {
            if guard.ring.is_empty() {
                if guard.writers == 0 {
                    // End of stream; report what was drained, 0 if nothing.
                    break;
                }
                if taken >= min {
                    if taken == 0 {
                        return (guard, Err(KernelError::WouldBlock));
                    }
                    break;
                }
                let remaining = match remaining_until(deadline) {
                    Ok(remaining) => remaining,
                    Err(timed_out) => {
                        let result = if taken > 0 { Ok(taken) } else { Err(timed_out) };
                        return (guard, result);
                    }
                };
                let (reacquired, waited) = if taken == 0 {
                    self.read_waiters
                        .wait_tail_mutex(&self.channel, guard, remaining)
                } else {
                    self.read_waiters
                        .wait_head_mutex(&self.channel, guard, remaining)
                };
                guard = reacquired;
                if let Err(e) = waited {
                    let result = if taken > 0 { Ok(taken) } else { Err(e.into()) };
                    return (guard, result);
                }
                continue;
            }

            let n = (out.len() - taken).min(PIPE_BUF);
            let n = guard.ring.read(&mut out[taken..taken + n]);
            taken += n;
            self.write_waiters.broadcast(WakeReason::Signal);
            self.head.broadcast(PollEvents::OUT);
        }
        (guard, Ok(taken))
    }

    /// Writes up to `data.len()` bytes, sleeping while fewer than `min`
    /// bytes have been accepted. Returns the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// [`KernelError::BrokenPipe`] when no reader handles remain at call
    /// entry (nothing is transferred) or when they disappear before any
    /// byte of this call is accepted; otherwise as [`read`](Self::read).
    pub fn write(
        &self,
        data: &[u8],
        min: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, KernelError> {
        let guard = self.channel.lock();
        let (guard, result) = self.write_locked(guard, data, min, timeout);
        guard.unlock();
        result
    }

    /// [`write`](Self::write) for callers already holding the channel lock.
    pub fn write_locked<'a>(
        &'a self,
        guard: MutexGuard<'a, PipeBuffer>,
        data: &[u8],
        min: usize,
        timeout: Option<Duration>,
    ) -> (MutexGuard<'a, PipeBuffer>, Result<usize, KernelError>) {
        if guard.readers == 0 {
            return (guard, Err(KernelError::BrokenPipe));
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let min = min.min(data.len());
        let mut guard = guard;
        let mut sent = 0;
        while sent < data.len() {
            // Readers vanished mid-call: stop accepting bytes. A partial
            // transfer still reports its count; the next call fails eagerly.
            if guard.readers == 0 {
                if sent == 0 {
                    return (guard, Err(KernelError::BrokenPipe));
                }
                break;
            }
            if guard.ring.is_full() {
                if sent >= min {
                    if sent == 0 {
                        return (guard, Err(KernelError::WouldBlock));
                    }
                    break;
                }
                let remaining = match remaining_until(deadline) {
                    Ok(remaining) => remaining,
                    Err(timed_out) => {
                        let result = if sent > 0 { Ok(sent) } else { Err(timed_out) };
                        return (guard, result);
                    }
                };
                let (reacquired, waited) = if sent == 0 {
                    self.write_waiters
                        .wait_tail_mutex(&self.channel, guard, remaining)
                } else {
                    self.write_waiters
                        .wait_head_mutex(&self.channel, guard, remaining)
                };
                guard = reacquired;
                if let Err(e) = waited {
                    let result = if sent > 0 { Ok(sent) } else { Err(e.into()) };
                    return (guard, result);
                }
                continue;
            }

            let n = (data.len() - sent).min(PIPE_BUF);
            let n = guard.ring.write(&data[sent..sent + n]);
            sent += n;
            self.read_waiters.broadcast(WakeReason::Signal);
            self.head.broadcast(PollEvents::IN);
        }
        (guard, Ok(sent))
    }

    /// Reports current readiness intersected with `events`.
    ///
    /// Readable when buffered data exists or no writers remain (hang-up);
    /// writable when free space exists or no readers remain (error). The
    /// hang-up and error bits themselves are always reported when present.
    pub fn poll(&self, events: PollEvents) -> PollEvents {
        let guard = self.channel.lock();
        let mut ready = PollEvents::empty();
        if !guard.ring.is_empty() || guard.writers == 0 {
            ready |= PollEvents::IN;
        }
        if guard.writers == 0 {
            ready |= PollEvents::HUP;
        }
        if guard.ring.writable_size() > 0 || guard.readers == 0 {
            ready |= PollEvents::OUT;
        }
        if guard.readers == 0 {
            ready |= PollEvents::ERR;
        }
        guard.unlock();
        ready & (events | PollEvents::ERR | PollEvents::HUP)
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        let guard = self.channel.lock();
        let (readers, writers) = (guard.readers, guard.writers);
        guard.unlock();
        assert!(
            readers == 0 && writers == 0,
            "channel destroyed with {readers} reader(s) and {writers} writer(s) still open"
        );
    }
}

/// Time left until `deadline`, or the timed-out error once it has passed.
fn remaining_until(deadline: Option<Instant>) -> Result<Option<Duration>, KernelError> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                Err(KernelError::TimedOut)
            } else {
                Ok(Some(deadline - now))
            }
        }
    }
}
