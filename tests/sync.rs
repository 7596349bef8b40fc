//! Scenario tests for the sleeping primitives: mutex, rwlock, and the
//! waitqueue itself.

use kwait::sync::{Mutex, RwLock, SpinLock, WaitError, WaitQueue, WakeReason};
use kwait::thread::{ThreadBuilder, ThreadState};
use kwait::timer::Timer;
use std::sync::Arc;
use std::time::Duration;

fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}

#[test]
fn mutex_excludes_concurrent_holders() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 1000;

    let timer = Timer::new();
    let counter = Arc::new(Mutex::new(&timer, 0usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            ThreadBuilder::new("incr").spawn(move || {
                for _ in 0..ROUNDS {
                    let mut guard = counter.lock();
                    *guard += 1;
                    guard.unlock();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join();
    }

    let guard = counter.lock();
    assert_eq!(*guard, THREADS * ROUNDS);
    guard.unlock();
}

#[test]
fn contended_locker_is_descheduled() {
    let timer = Timer::new();
    let mutex = Arc::new(Mutex::new(&timer, ()));

    let guard = mutex.lock();
    let handle = {
        let mutex = Arc::clone(&mutex);
        ThreadBuilder::new("blocked").spawn(move || {
            let guard = mutex.lock();
            guard.unlock();
        })
    };
    settle();
    assert_eq!(handle.thread().state(), ThreadState::Waiting);

    guard.unlock();
    let thread = Arc::clone(handle.thread());
    handle.join();
    assert_eq!(thread.state(), ThreadState::Running);
}

#[test]
fn recursive_mutex_relocks() {
    let timer = Timer::new();
    let mutex = Arc::new(Mutex::new_recursive(&timer, 0usize));

    let outer = mutex.lock();
    let mut inner = mutex.lock();
    *inner += 1;
    inner.unlock();
    let probing = mutex.try_lock().unwrap();
    probing.unlock();
    outer.unlock();

    // Fully released; another thread can take it.
    let other = Arc::clone(&mutex);
    ThreadBuilder::new("other")
        .spawn(move || {
            let guard = other.lock();
            assert_eq!(*guard, 1);
            guard.unlock();
        })
        .join();
}

#[test]
#[should_panic(expected = "non-recursive mutex")]
fn non_recursive_relock_panics() {
    let timer = Timer::new();
    let mutex = Mutex::new(&timer, ());
    // Keep the first guard out of the unwind path so only the re-lock
    // panic is observed.
    let _outer = std::mem::ManuallyDrop::new(mutex.lock());
    let _ = mutex.lock();
}

#[test]
#[should_panic(expected = "non-recursive mutex")]
fn non_recursive_spin_relock_panics() {
    let timer = Timer::new();
    let mutex = Mutex::new(&timer, ());
    // Spinning on a lock the caller itself holds could never succeed; the
    // attempt must be reported, not spun on forever.
    let _outer = std::mem::ManuallyDrop::new(mutex.lock());
    let _ = mutex.spin_lock();
}

#[test]
#[should_panic(expected = "non-recursive mutex")]
fn non_recursive_try_relock_panics() {
    let timer = Timer::new();
    let mutex = Mutex::new(&timer, ());
    let _outer = std::mem::ManuallyDrop::new(mutex.lock());
    let _ = mutex.try_lock();
}

#[test]
#[should_panic(expected = "unlock()")]
fn dropping_live_spinlock_guard_panics() {
    let lock = SpinLock::new(());
    let _ = lock.lock();
}

#[test]
fn try_lock_reports_contention() {
    let timer = Timer::new();
    let mutex = Arc::new(Mutex::new(&timer, ()));

    let guard = mutex.lock();
    {
        let mutex = Arc::clone(&mutex);
        ThreadBuilder::new("prober")
            .spawn(move || {
                assert!(mutex.try_lock().is_err());
            })
            .join();
    }
    guard.unlock();

    let guard = mutex.try_lock().unwrap();
    guard.unlock();
}

#[test]
fn spin_lock_acquires_under_contention() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let timer = Timer::new();
    let counter = Arc::new(Mutex::new(&timer, 0usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            ThreadBuilder::new("spinner").spawn(move || {
                for _ in 0..ROUNDS {
                    let mut guard = counter.spin_lock();
                    *guard += 1;
                    guard.unlock();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join();
    }

    let guard = counter.lock();
    assert_eq!(*guard, THREADS * ROUNDS);
    guard.unlock();
}

#[test]
fn head_waiter_is_served_before_tail_waiter() {
    let timer = Timer::new();
    let queue = Arc::new(WaitQueue::new(&timer));
    let meta = Arc::new(SpinLock::new(()));
    let order = Arc::new(SpinLock::new(Vec::new()));

    let tail = {
        let (queue, meta, order) = (Arc::clone(&queue), Arc::clone(&meta), Arc::clone(&order));
        ThreadBuilder::new("tail").spawn(move || {
            let guard = meta.lock();
            queue.wait_tail_with(guard, None).unwrap();
            let mut order = order.lock();
            order.push("tail");
            order.unlock();
        })
    };
    settle();
    let head = {
        let (queue, order) = (Arc::clone(&queue), Arc::clone(&order));
        ThreadBuilder::new("head").spawn(move || {
            queue.wait_head(None).unwrap();
            let mut order = order.lock();
            order.push("head");
            order.unlock();
        })
    };
    settle();

    assert!(queue.has_waiters());
    assert!(queue.signal(WakeReason::Signal));
    settle();
    assert!(queue.signal(WakeReason::Signal));
    tail.join();
    head.join();

    let order = order.lock();
    assert_eq!(*order, ["head", "tail"]);
    order.unlock();
    assert!(!queue.has_waiters());
    assert!(!queue.signal(WakeReason::Signal));
}

#[test]
fn broadcast_wakes_every_waiter() {
    const WAITERS: usize = 5;

    let timer = Timer::new();
    let queue = Arc::new(WaitQueue::new(&timer));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            ThreadBuilder::new("sleeper").spawn(move || {
                queue.wait_tail(None).unwrap();
            })
        })
        .collect();
    settle();

    assert_eq!(queue.broadcast(WakeReason::Signal), WAITERS);
    for handle in handles {
        handle.join();
    }
    assert_eq!(queue.broadcast(WakeReason::Signal), 0);
}

#[test]
fn timed_wait_expires_on_manual_tick() {
    let timer = Timer::new();
    let queue = Arc::new(WaitQueue::new(&timer));
    let meta = Arc::new(SpinLock::new(()));

    let handle = {
        let (queue, meta) = (Arc::clone(&queue), Arc::clone(&meta));
        ThreadBuilder::new("expiring").spawn(move || {
            let guard = meta.lock();
            queue.wait_tail_with(guard, Some(Duration::from_millis(20)))
        })
    };

    // Sweep until the deadline has passed and the waiter is resumed.
    let mut resumed = 0;
    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(10));
        resumed += timer.tick();
        if resumed > 0 {
            break;
        }
    }
    assert_eq!(resumed, 1);
    assert_eq!(handle.join(), Err(WaitError::TimedOut));
    assert!(!queue.has_waiters());
    assert!(timer.ticks() >= 1);
    assert!(timer.now() >= Duration::from_millis(20));
}

#[test]
fn timed_wait_expires_under_background_sweep() {
    let timer = Timer::start(Duration::from_millis(5));
    let queue = WaitQueue::new(&timer);
    let meta = SpinLock::new(());

    let guard = meta.lock();
    let result = queue.wait_tail_with(guard, Some(Duration::from_millis(30)));
    assert_eq!(result, Err(WaitError::TimedOut));
}

#[test]
fn signal_beats_pending_timeout() {
    let timer = Timer::new();
    let queue = Arc::new(WaitQueue::new(&timer));
    let meta = Arc::new(SpinLock::new(()));

    let handle = {
        let (queue, meta) = (Arc::clone(&queue), Arc::clone(&meta));
        ThreadBuilder::new("signaled").spawn(move || {
            let guard = meta.lock();
            queue.wait_tail_with(guard, Some(Duration::from_millis(20)))
        })
    };
    settle();
    assert!(queue.signal(WakeReason::Signal));
    assert_eq!(handle.join(), Ok(()));

    // The deadline entry is now stale; the sweep must not resume anyone.
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(timer.tick(), 0);
}

#[test]
fn interrupt_cancels_wait() {
    let timer = Timer::new();
    let queue = Arc::new(WaitQueue::new(&timer));
    let meta = Arc::new(SpinLock::new(()));

    let handle = {
        let (queue, meta) = (Arc::clone(&queue), Arc::clone(&meta));
        ThreadBuilder::new("interrupted").spawn(move || {
            let guard = meta.lock();
            queue.wait_tail_with(guard, None)
        })
    };
    settle();
    assert_eq!(handle.thread().state(), ThreadState::Waiting);

    let thread = Arc::clone(handle.thread());
    assert!(thread.interrupt());
    assert_eq!(handle.join(), Err(WaitError::Interrupted));

    // Not blocked any more; a second delivery is a no-op.
    assert!(!thread.interrupt());
}

#[test]
fn rwlock_readers_share() {
    let timer = Timer::new();
    let lock = RwLock::new(&timer, 7usize);

    let a = lock.read();
    let b = lock.read();
    assert_eq!(*a + *b, 14);
    drop(a);
    drop(b);

    let mut w = lock.write();
    *w += 1;
    drop(w);
    assert_eq!(*lock.read(), 8);
}

#[test]
fn rwlock_writer_excludes_readers() {
    let timer = Timer::new();
    let lock = Arc::new(RwLock::new(&timer, ()));

    let writer = lock.write();
    assert!(lock.try_read().is_err());
    assert!(lock.try_write().is_err());

    let handle = {
        let lock = Arc::clone(&lock);
        ThreadBuilder::new("reader").spawn(move || {
            let guard = lock.read();
            drop(guard);
        })
    };
    settle();
    assert_eq!(handle.thread().state(), ThreadState::Waiting);

    drop(writer);
    handle.join();
    assert!(lock.try_write().is_ok_and(|guard| {
        drop(guard);
        true
    }));
}

#[test]
fn queued_writer_is_granted_before_later_reader() {
    let timer = Timer::new();
    let lock = Arc::new(RwLock::new(&timer, ()));
    let order = Arc::new(SpinLock::new(Vec::new()));

    let first_reader = lock.read();

    let writer = {
        let (lock, order) = (Arc::clone(&lock), Arc::clone(&order));
        ThreadBuilder::new("writer").spawn(move || {
            let guard = lock.write();
            let mut order = order.lock();
            order.push("writer");
            order.unlock();
            drop(guard);
        })
    };
    settle();

    // Arrives after the writer queued; must not overtake it.
    let late_reader = {
        let (lock, order) = (Arc::clone(&lock), Arc::clone(&order));
        ThreadBuilder::new("reader").spawn(move || {
            let guard = lock.read();
            let mut order = order.lock();
            order.push("reader");
            order.unlock();
            drop(guard);
        })
    };
    settle();
    assert_eq!(late_reader.thread().state(), ThreadState::Waiting);

    drop(first_reader);
    writer.join();
    late_reader.join();

    let order = order.lock();
    assert_eq!(*order, ["writer", "reader"]);
    order.unlock();
}
