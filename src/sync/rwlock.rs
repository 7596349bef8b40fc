//! Reader-writer lock.
//!
//! Allows any number of concurrent readers or one exclusive writer. Contended
//! acquisitions deschedule through two [`WaitQueue`]s, one per role, so that
//! release can wake exactly the role that may now proceed.
//!
//! The lock is writer-preferring: a new reader defers not only while a writer
//! holds the lock but also while any writer is *queued*, which keeps a steady
//! stream of readers from starving writers indefinitely. A releasing writer
//! hands the lock to the next queued writer if there is one and otherwise
//! broadcasts to all queued readers; the last departing reader signals a
//! queued writer.
//!
//! Unlike [`Mutex`](super::Mutex), the guards here release on drop. Reader
//! sections are typically short and scoped, and drop-release keeps them
//! terse.

use super::spinlock::{SpinLock, WouldBlock};
use super::wait_queue::{WaitQueue, WakeReason};
use crate::thread;
use crate::timer::Timer;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use std::sync::Arc;

struct RwState {
    readers: usize,
    writer: Option<u64>,
}

/// A reader-writer lock that blocks by descheduling.
///
/// Shared access goes through [`read`], exclusive access through [`write`];
/// both return RAII guards that release on drop.
///
/// [`read`]: Self::read
/// [`write`]: Self::write
pub struct RwLock<T: ?Sized> {
    state: SpinLock<RwState>,
    readers: WaitQueue,
    writers: WaitQueue,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates a new unlocked reader-writer lock wired to `timer`.
    pub fn new(timer: &Arc<Timer>, data: T) -> RwLock<T> {
        RwLock {
            state: SpinLock::new(RwState {
                readers: 0,
                writer: None,
            }),
            readers: WaitQueue::new(timer),
            writers: WaitQueue::new(timer),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes this lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires shared access, descheduling until no writer holds the lock
    /// and no writer is queued for it.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            let mut state = self.state.lock();
            if state.writer.is_none() && !self.writers.has_waiters() {
                state.readers += 1;
                state.unlock();
                return RwLockReadGuard { lock: self };
            }
            let _ = self.readers.wait_tail_with(state, None);
        }
    }

    /// Acquires exclusive access, descheduling until the lock is free.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let tid = thread::current().tid;
        loop {
            let mut state = self.state.lock();
            if state.writer.is_none() && state.readers == 0 {
                state.writer = Some(tid);
                state.unlock();
                return RwLockWriteGuard { lock: self };
            }
            let _ = self.writers.wait_tail_with(state, None);
        }
    }

    /// Attempts to acquire shared access without descheduling.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if a writer holds the lock or is queued.
    pub fn try_read(&self) -> Result<RwLockReadGuard<'_, T>, WouldBlock> {
        let mut state = self.state.lock();
        if state.writer.is_none() && !self.writers.has_waiters() {
            state.readers += 1;
            state.unlock();
            Ok(RwLockReadGuard { lock: self })
        } else {
            state.unlock();
            Err(WouldBlock)
        }
    }

    /// Attempts to acquire exclusive access without descheduling.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if any reader or writer holds the lock.
    pub fn try_write(&self) -> Result<RwLockWriteGuard<'_, T>, WouldBlock> {
        let tid = thread::current().tid;
        let mut state = self.state.lock();
        if state.writer.is_none() && state.readers == 0 {
            state.writer = Some(tid);
            state.unlock();
            Ok(RwLockWriteGuard { lock: self })
        } else {
            state.unlock();
            Err(WouldBlock)
        }
    }
}

/// Shared access to the data of an [`RwLock`]; releases on drop.
pub struct RwLockReadGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers -= 1;
        let last = state.readers == 0;
        state.unlock();
        if last {
            self.lock.writers.signal(WakeReason::Signal);
        }
    }
}

/// Exclusive access to the data of an [`RwLock`]; releases on drop.
pub struct RwLockWriteGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.writer = None;
        state.unlock();
        // Prefer a queued writer; otherwise release every queued reader.
        if !self.lock.writers.signal(WakeReason::Signal) {
            self.lock.readers.broadcast(WakeReason::Signal);
        }
    }
}
