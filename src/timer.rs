//! Process-wide timer context: monotonic clock, tick counter, and the
//! deadline registry behind every timed wait.
//!
//! The kernel original kept a global timeout list and per-processor
//! interrupt counters; here both collapse into one explicit [`Timer`] object
//! created at boot, never an implicit singleton. Every structure that can
//! time out holds an `Arc<Timer>` and registers its sleeping threads in the
//! deadline-ordered registry; the periodic sweep ([`Timer::tick`]) forcibly
//! resumes expired waiters with a timed-out status, removing them from both
//! their waitqueue and the registry.
//!
//! [`Timer::start`] is the hosted analog of wiring the sweep to the timer
//! interrupt: it runs `tick` on a background thread until the last owner of
//! the context is gone. Tests that want deterministic expiry use
//! [`Timer::new`] and drive `tick` by hand.

use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{WaitQueue, Waiter, WaiterList};
use std::collections::BTreeMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

/// One registered deadline: the sleeping waiter and the queue it sleeps in.
struct Expiry {
    waiter: Arc<Waiter>,
    queue: Arc<WaiterList>,
}

/// The process-wide timer context.
///
/// Owns the monotonic clock base, the tick counter, and the deadline-ordered
/// registry of waiters. Created explicitly at boot with [`Timer::new`] or
/// [`Timer::start`]; every [`WaitQueue`] is wired to exactly one `Timer` at
/// construction.
pub struct Timer {
    base: Instant,
    ticks: AtomicU64,
    seq: AtomicU64,
    deadlines: SpinLock<BTreeMap<(Instant, u64), Expiry>>,
}

impl Timer {
    /// Creates a new timer context with an empty deadline registry.
    ///
    /// Nothing sweeps the registry until [`tick`] is called; a timed wait
    /// registered against a never-ticked timer sleeps until signaled.
    ///
    /// [`tick`]: Self::tick
    pub fn new() -> Arc<Timer> {
        Arc::new(Timer {
            base: Instant::now(),
            ticks: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            deadlines: SpinLock::new(BTreeMap::new()),
        })
    }

    /// Creates a timer context and spawns the periodic sweeper thread.
    ///
    /// The sweeper calls [`tick`] every `period` and exits once the last
    /// `Arc<Timer>` owner outside the sweeper is dropped.
    ///
    /// [`tick`]: Self::tick
    pub fn start(period: Duration) -> Arc<Timer> {
        let timer = Timer::new();
        let weak = Arc::downgrade(&timer);
        std::thread::Builder::new()
            .name("timer-sweep".into())
            .spawn(move || {
                log::debug!("timer sweeper running, period {period:?}");
                while let Some(timer) = weak.upgrade() {
                    timer.tick();
                    drop(timer);
                    std::thread::sleep(period);
                }
            })
            .expect("failed to spawn timer sweeper");
        timer
    }

    /// Monotonic time elapsed since the context was created.
    pub fn now(&self) -> Duration {
        self.base.elapsed()
    }

    /// Number of times [`tick`] has run.
    ///
    /// [`tick`]: Self::tick
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// The periodic timeout sweep.
    ///
    /// Removes every registry entry whose deadline has passed and resumes
    /// the waiter with a timed-out status, unless it was already woken by a
    /// signal or an interrupt. Returns the number of waiters resumed.
    pub fn tick(&self) -> usize {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();

        let mut registry = self.deadlines.lock();
        let still_pending = registry.split_off(&(now, u64::MAX));
        let expired = core::mem::replace(&mut *registry, still_pending);
        registry.unlock();

        let mut resumed = 0;
        for (_, expiry) in expired {
            if WaitQueue::expire(&expiry.queue, &expiry.waiter) {
                resumed += 1;
            }
        }
        if resumed > 0 {
            log::trace!("timeout sweep resumed {resumed} waiter(s)");
        }
        resumed
    }

    /// Register `waiter` (sleeping in `queue`) to be expired at `deadline`.
    pub(crate) fn register(&self, deadline: Instant, waiter: Arc<Waiter>, queue: Arc<WaiterList>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.deadlines.lock();
        registry.insert((deadline, seq), Expiry { waiter, queue });
        registry.unlock();
    }
}
