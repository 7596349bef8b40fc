//! Sleeping mutex.
//!
//! A mutual exclusion lock whose contended path deschedules the caller
//! through a [`WaitQueue`] instead of burning CPU. The fast path is a single
//! spinlocked state check; the slow path enqueues the caller at the tail of
//! the queue and parks until the holder's unlock signals it.
//!
//! Wakeups are permission to retry, not a transfer of ownership: a woken
//! waiter re-checks the state and may find that a barging [`try_lock`] got
//! there first, in which case it simply waits again. The mutex optionally
//! supports recursive acquisition by the holder ([`Mutex::new_recursive`]);
//! re-acquiring a non-recursive mutex is a programming error and panics
//! rather than deadlocking silently.
//!
//! [`try_lock`]: Mutex::try_lock

use super::spinlock::{SpinLock, WouldBlock};
use super::wait_queue::{WaitQueue, WakeReason};
use crate::thread;
use crate::timer::Timer;
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};
use crossbeam_utils::Backoff;
use std::sync::Arc;

struct MutexState {
    owner: Option<u64>,
    depth: usize,
}

/// A mutual exclusion primitive that blocks by descheduling.
///
/// Protects data of type `T`; access goes through the [`MutexGuard`] returned
/// by [`lock`], [`try_lock`] or [`spin_lock`]. Like the [`SpinLock`] guard,
/// the mutex guard must be released explicitly with [`MutexGuard::unlock`]
/// and panics if dropped while live.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
/// [`spin_lock`]: Self::spin_lock
/// [`SpinLock`]: super::SpinLock
pub struct Mutex<T: ?Sized> {
    state: SpinLock<MutexState>,
    waiters: WaitQueue,
    recursive: bool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    fn with_flag(timer: &Arc<Timer>, data: T, recursive: bool) -> Mutex<T> {
        Mutex {
            state: SpinLock::new(MutexState {
                owner: None,
                depth: 0,
            }),
            waiters: WaitQueue::new(timer),
            recursive,
            data: UnsafeCell::new(data),
        }
    }

    /// Creates a new unlocked mutex wired to `timer`.
    pub fn new(timer: &Arc<Timer>, data: T) -> Mutex<T> {
        Mutex::with_flag(timer, data, false)
    }

    /// Creates a mutex that the holding thread may re-acquire.
    ///
    /// Each nested [`lock`] by the holder increments a depth counter and
    /// returns immediately; the lock is released for other threads only when
    /// the outermost guard is unlocked.
    ///
    /// Nested guards alias the protected data. The caller is responsible for
    /// not holding a `&mut` borrow from an outer guard across a nested
    /// acquisition.
    ///
    /// [`lock`]: Self::lock
    pub fn new_recursive(timer: &Arc<Timer>, data: T) -> Mutex<T> {
        Mutex::with_flag(timer, data, true)
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, descheduling the calling thread until it is able
    /// to do so.
    ///
    /// Acquisition is not interruptible: a signal delivered to a thread
    /// blocked here forces a re-check of the state, not an early return.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this mutex and the mutex
    /// was not created with [`new_recursive`](Self::new_recursive).
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let caller = core::panic::Location::caller();
        let tid = thread::current().tid;
        loop {
            let mut state = self.state.lock();
            match state.owner {
                None => {
                    state.owner = Some(tid);
                    state.depth = 1;
                    state.unlock();
                    return MutexGuard {
                        caller,
                        mutex: self,
                        _not_send: PhantomData,
                    };
                }
                Some(owner) if owner == tid => {
                    if !self.recursive {
                        state.unlock();
                        panic!("thread {tid} re-locked a non-recursive mutex");
                    }
                    state.depth += 1;
                    state.unlock();
                    return MutexGuard {
                        caller,
                        mutex: self,
                        _not_send: PhantomData,
                    };
                }
                Some(_) => {
                    // Whatever ended the wait, loop around and re-check.
                    let _ = self.waiters.wait_tail_with(state, None);
                }
            }
        }
    }

    /// Attempts to acquire the mutex without descheduling.
    ///
    /// # Errors
    ///
    /// Returns [`WouldBlock`] if another thread holds the mutex. A recursive
    /// re-acquisition by the holder succeeds as in [`lock`](Self::lock).
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this non-recursive mutex:
    /// that acquisition could never succeed, and reporting it here keeps
    /// [`spin_lock`](Self::spin_lock) from spinning on it forever.
    #[track_caller]
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        let caller = core::panic::Location::caller();
        let tid = thread::current().tid;
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(tid);
                state.depth = 1;
            }
            Some(owner) if owner == tid => {
                if !self.recursive {
                    state.unlock();
                    panic!("thread {tid} re-locked a non-recursive mutex");
                }
                state.depth += 1;
            }
            Some(_) => {
                state.unlock();
                return Err(WouldBlock);
            }
        }
        state.unlock();
        Ok(MutexGuard {
            caller,
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// Acquires the mutex by spinning instead of descheduling.
    ///
    /// For callers that cannot sleep (interrupt-like contexts). Contention
    /// burns CPU with backoff between attempts.
    ///
    /// # Panics
    ///
    /// As [`try_lock`](Self::try_lock): re-acquisition by the holder of a
    /// non-recursive mutex panics instead of spinning forever.
    #[track_caller]
    pub fn spin_lock(&self) -> MutexGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Ok(guard) = self.try_lock() {
                return guard;
            }
            backoff.snooze();
        }
    }
}

/// An RAII-less guard for a [`Mutex`]; must be released with [`unlock`].
///
/// Dropping a live guard panics, reporting where the lock was taken.
///
/// [`unlock`]: Self::unlock
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized> MutexGuard<'_, T> {
    /// Releases the mutex.
    ///
    /// If this was the outermost acquisition, ownership is cleared and one
    /// waiter (if any) is signaled to retry.
    pub fn unlock(self) {
        let mutex = self.mutex;
        core::mem::forget(self);
        let mut state = mutex.state.lock();
        state.depth -= 1;
        let released = state.depth == 0;
        if released {
            state.owner = None;
        }
        state.unlock();
        if released {
            mutex.waiters.signal(WakeReason::Signal);
        }
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "`.unlock()` must be explicitly called before dropping MutexGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
