//! Thread abstraction, an adapter over the scheduler collaborator.
//!
//! ## The threading model
//!
//! The synchronization core does not own a scheduler; it consumes a narrow
//! interface from one: the calling thread's identity, its state, an operation
//! to mark a woken thread runnable, and a monotonic clock. Hosted on the
//! platform's native threads, that interface reduces to a per-thread control
//! block ([`Thread`]) wrapping the platform handle, with `park`/`unpark` as
//! the suspend/resume mechanism.
//!
//! Threads spawned through [`ThreadBuilder`] are named and registered
//! eagerly; any foreign thread that first touches a blocking primitive is
//! adopted lazily by [`current`]. Either way, every thread observed by a
//! [`WaitQueue`] has exactly one control block for its entire lifetime.
//!
//! [`WaitQueue`]: crate::sync::WaitQueue

use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{self, Blocked};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// A possible state of the thread, as seen by this crate.
///
/// The external scheduler distinguishes more states (paused, stopped,
/// zombie); the synchronization core only ever observes or produces these
/// two.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is running or runnable.
    Running,
    /// Thread is inserted in a waitqueue and descheduled.
    Waiting,
}

static TID: AtomicU64 = AtomicU64::new(0);

/// A thread control block.
///
/// One exists per thread that has ever touched a blocking primitive. The
/// block records the thread's identity and state and carries the platform
/// handle used to resume it after a wait.
pub struct Thread {
    /// Thread id.
    pub tid: u64,
    /// Thread name.
    pub name: String,
    state: SpinLock<ThreadState>,
    host: std::thread::Thread,
    /// The wait this thread is currently blocked in, if any.
    pub(crate) blocked_on: SpinLock<Option<Blocked>>,
}

impl Thread {
    fn adopt() -> Self {
        let host = std::thread::current();
        Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name: host.name().unwrap_or("<adopted>").to_string(),
            state: SpinLock::new(ThreadState::Running),
            host,
            blocked_on: SpinLock::new(None),
        }
    }

    /// Get the thread's current [`ThreadState`].
    pub fn state(&self) -> ThreadState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    /// Mark the thread runnable and hand it back to the scheduler.
    pub(crate) fn resume(&self) {
        self.set_state(ThreadState::Running);
        self.host.unpark();
    }

    /// Deliver a signal to this thread.
    ///
    /// If the thread is blocked in a waitqueue, it is removed from both the
    /// queue and the deadline registry and resumed with an interrupted
    /// status, which the suspended operation reports to its caller as
    /// [`KernelError::Interrupted`]. Returns whether a wait was actually
    /// interrupted; delivering to a thread that is not blocked is a no-op.
    ///
    /// [`KernelError::Interrupted`]: crate::KernelError::Interrupted
    pub fn interrupt(&self) -> bool {
        let guard = self.blocked_on.lock();
        let blocked = guard.clone();
        guard.unlock();
        match blocked {
            Some(blocked) => wait_queue::cancel_wait(&blocked),
            None => false,
        }
    }
}

std::thread_local! {
    static CURRENT: Arc<Thread> = Arc::new(Thread::adopt());
}

/// Get the control block of the calling thread, adopting it on first use.
pub fn current() -> Arc<Thread> {
    CURRENT.with(Arc::clone)
}

/// A handle to join a thread spawned by [`ThreadBuilder`].
pub struct JoinHandle<R> {
    inner: std::thread::JoinHandle<R>,
    thread: Arc<Thread>,
}

impl<R> JoinHandle<R> {
    /// Join this handle and return the thread's result.
    ///
    /// A panic on the joined thread is resumed on the joining thread.
    pub fn join(self) -> R {
        self.inner
            .join()
            .unwrap_or_else(|e| std::panic::resume_unwind(e))
    }

    /// The control block of the underlying thread.
    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
        }
    }

    /// Spawn the thread.
    pub fn spawn<F, R>(self, thread_fn: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let inner = std::thread::Builder::new()
            .name(self.name)
            .spawn(move || {
                // Register the control block before running so that the
                // spawner can observe this thread's state immediately.
                let _ = tx.send(current());
                thread_fn()
            })
            .expect("failed to spawn thread");
        let thread = rx
            .recv()
            .expect("spawned thread exited before registering");
        JoinHandle { inner, thread }
    }
}
