//! Synchronization primitives.
//!
//! Multiple threads running in parallel on shared state need a way to agree
//! on who touches what, and when. This module provides the crate's exclusion
//! and blocking primitives, from the spinning leaf upward:
//!
//! | Primitive | Contention behavior | Guard discipline |
//! |-----------|---------------------|------------------|
//! | [`SpinLock`] | burns CPU with backoff | explicit [`unlock`](SpinLockGuard::unlock), drop panics |
//! | [`WaitQueue`] | deschedules the caller | not a lock; suspend/resume protocol |
//! | [`Mutex`] | deschedules the caller | explicit [`unlock`](MutexGuard::unlock), drop panics |
//! | [`RwLock`] | deschedules the caller | releases on drop |
//!
//! The spinlock protects only metadata and is never held across a sleep.
//! Every sleeping primitive is a thin policy layer over a [`WaitQueue`],
//! which owns the suspend/resume protocol, the timeout registration, and the
//! interruption path.

pub mod mutex;
pub mod rwlock;
pub mod spinlock;
pub mod wait_queue;

pub use mutex::{Mutex, MutexGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
pub use wait_queue::{WaitError, WaitQueue, WakeReason};
