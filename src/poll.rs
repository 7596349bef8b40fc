//! Readiness aggregation with poll/select-like semantics.
//!
//! A [`Poller`] is a session object that waits for readiness across many
//! subscriptions at once. Each subscription pairs the poller with one
//! producer-side [`PollHead`] (the "readiness head" embedded in a pipe, a
//! pty, a device event queue) and carries an interest mask plus accumulated
//! readiness.
//!
//! The producer calls [`PollHead::broadcast`] the instant some condition
//! becomes true. For every subscription on that head whose interest
//! intersects the broadcast mask, the events are OR-ed into its accumulated
//! readiness, the subscription moves from the poller's pending list to its
//! ready list, and the poller's waitqueue is woken. [`Poller::wait`] drains
//! the ready list, reporting each subscription's token and accumulated
//! events, and re-arms it by moving it back to pending.
//!
//! A subscription holds a shared reference to the backing resource for its
//! entire lifetime, so a polled channel cannot be freed out from under a
//! sleeping poller. Teardown from either side ([`PollHead`] drop via
//! `unsubscribe_all`, or [`Poller`] drop) unlinks the subscription from both
//! its lists and releases the resource reference.

use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{WaitError, WaitQueue, WakeReason};
use crate::timer::Timer;
use bitflags::bitflags;
use std::any::Any;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

bitflags! {
    /// Readiness event mask, mirroring the classic poll bits.
    pub struct PollEvents: u16 {
        /// Data is available to read.
        const IN = 0x1;
        /// Urgent or out-of-band condition.
        const PRI = 0x2;
        /// Space is available to write.
        const OUT = 0x4;
        /// Error condition (for a pipe: all readers gone).
        const ERR = 0x8;
        /// Hang-up (for a pipe: all writers gone).
        const HUP = 0x10;
    }
}

/// A shared reference to the resource backing a subscription.
///
/// Held from subscribe until unsubscribe or teardown, keeping the resource
/// alive for the subscription's lifetime.
pub type Resource = Arc<dyn Any + Send + Sync>;

type HeadList = SpinLock<Vec<Arc<Subscription>>>;

/// One (poller, readiness-head) pairing.
///
/// Lives in exactly one of its poller's pending/ready lists and, at the same
/// time, in its head's broadcast list, from subscribe until unsubscribe or
/// teardown from either side.
struct Subscription {
    token: u64,
    interest: PollEvents,
    revents: SpinLock<PollEvents>,
    poller: Weak<PollerShared>,
    head: Weak<HeadList>,
    resource: SpinLock<Option<Resource>>,
}

impl Subscription {
    /// OR `events` into the accumulated readiness.
    fn accumulate(&self, events: PollEvents) {
        let mut revents = self.revents.lock();
        *revents |= events;
        revents.unlock();
    }

    /// Take and clear the accumulated readiness.
    fn collect(&self) -> PollEvents {
        let mut revents = self.revents.lock();
        let events = *revents;
        *revents = PollEvents::empty();
        revents.unlock();
        events
    }

    fn release_resource(&self) {
        let mut resource = self.resource.lock();
        *resource = None;
        resource.unlock();
    }
}

/// A producer-side broadcast list, embedded in each pollable structure.
///
/// Dropping the head tears down every subscription still linked to it, as a
/// collaborator being destroyed must not leave dangling subscriptions
/// behind.
pub struct PollHead {
    subs: Arc<HeadList>,
}

impl PollHead {
    /// Creates an empty readiness head.
    pub fn new() -> PollHead {
        PollHead {
            subs: Arc::new(SpinLock::new(Vec::new())),
        }
    }

    /// Reports `events` to every subscription on this head whose interest
    /// intersects them, waking their pollers.
    ///
    /// # Panics
    ///
    /// Broadcasting an empty event mask is a contract violation and panics.
    pub fn broadcast(&self, events: PollEvents) {
        assert!(
            !events.is_empty(),
            "broadcast of an empty readiness mask is a contract violation"
        );
        let guard = self.subs.lock();
        let snapshot = guard.clone();
        guard.unlock();
        for sub in snapshot {
            if (sub.interest & events).is_empty() {
                continue;
            }
            sub.accumulate(events);
            if let Some(poller) = sub.poller.upgrade() {
                poller.mark_ready(&sub);
            }
        }
    }

    /// Removes every subscription currently linked to this head, from
    /// whichever poller list it occupies, and drops its resource reference.
    pub fn unsubscribe_all(&self) {
        let mut guard = self.subs.lock();
        let drained = core::mem::take(&mut *guard);
        guard.unlock();
        for sub in drained {
            if let Some(poller) = sub.poller.upgrade() {
                poller.unlink(&sub);
            }
            sub.release_resource();
        }
    }
}

impl Default for PollHead {
    fn default() -> PollHead {
        PollHead::new()
    }
}

impl Drop for PollHead {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

/// One readiness report from [`Poller::wait`].
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct PollerEvent {
    /// The token returned by [`Poller::subscribe`] for this subscription.
    pub token: u64,
    /// The readiness accumulated since the subscription was last reported.
    pub events: PollEvents,
}

struct Lists {
    pending: Vec<Arc<Subscription>>,
    ready: Vec<Arc<Subscription>>,
}

struct PollerShared {
    lists: SpinLock<Lists>,
    waiters: WaitQueue,
}

impl PollerShared {
    /// Move `sub` from pending to ready (if still pending) and wake the
    /// poller.
    fn mark_ready(&self, sub: &Arc<Subscription>) {
        let mut lists = self.lists.lock();
        if let Some(i) = lists.pending.iter().position(|s| Arc::ptr_eq(s, sub)) {
            let sub = lists.pending.swap_remove(i);
            lists.ready.push(sub);
        }
        lists.unlock();
        self.waiters.broadcast(WakeReason::Signal);
    }

    /// Remove `sub` from whichever list it occupies.
    fn unlink(&self, sub: &Arc<Subscription>) {
        let mut lists = self.lists.lock();
        if let Some(i) = lists.pending.iter().position(|s| Arc::ptr_eq(s, sub)) {
            lists.pending.swap_remove(i);
        } else if let Some(i) = lists.ready.iter().position(|s| Arc::ptr_eq(s, sub)) {
            lists.ready.swap_remove(i);
        }
        lists.unlock();
    }
}

/// A readiness-aggregation session.
pub struct Poller {
    shared: Arc<PollerShared>,
    next_token: AtomicU64,
}

impl Poller {
    /// Creates an empty poller wired to `timer`.
    pub fn new(timer: &Arc<Timer>) -> Poller {
        Poller {
            shared: Arc::new(PollerShared {
                lists: SpinLock::new(Lists {
                    pending: Vec::new(),
                    ready: Vec::new(),
                }),
                waiters: WaitQueue::new(timer),
            }),
            next_token: AtomicU64::new(0),
        }
    }

    /// Subscribes this poller to `head` with the given interest mask.
    ///
    /// `resource` is the shared handle backing the head's structure; the
    /// subscription holds it until unsubscription or teardown. Returns the
    /// token that [`wait`](Self::wait) reports events under.
    pub fn subscribe(&self, resource: Resource, head: &PollHead, interest: PollEvents) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let sub = Arc::new(Subscription {
            token,
            interest,
            revents: SpinLock::new(PollEvents::empty()),
            poller: Arc::downgrade(&self.shared),
            head: Arc::downgrade(&head.subs),
            resource: SpinLock::new(Some(resource)),
        });

        let mut lists = self.shared.lists.lock();
        lists.pending.push(Arc::clone(&sub));
        lists.unlock();

        let mut subs = head.subs.lock();
        subs.push(sub);
        subs.unlock();

        log::trace!("poll subscription {token} registered, interest {interest:?}");
        token
    }

    /// Blocks until at least one subscription is ready or the timeout
    /// elapses.
    ///
    /// Returns the drained ready set; each reported subscription's
    /// accumulated readiness is cleared and the subscription re-armed. An
    /// elapsed timeout yields an empty set, like the classic poll call.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Interrupted`] if a signal is delivered to the
    /// waiting thread before anything becomes ready.
    ///
    /// [`KernelError::Interrupted`]: crate::KernelError::Interrupted
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Vec<PollerEvent>, crate::KernelError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut lists = self.shared.lists.lock();
            if !lists.ready.is_empty() {
                let drained = core::mem::take(&mut lists.ready);
                let mut reported = Vec::with_capacity(drained.len());
                for sub in drained {
                    let events = sub.collect();
                    if !events.is_empty() {
                        reported.push(PollerEvent {
                            token: sub.token,
                            events,
                        });
                    }
                    lists.pending.push(sub);
                }
                lists.unlock();
                if reported.is_empty() {
                    // Every drained entry was stale; go back to sleep.
                    continue;
                }
                return Ok(reported);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        lists.unlock();
                        return Ok(Vec::new());
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            match self.shared.waiters.wait_tail_with(lists, remaining) {
                Ok(()) | Err(WaitError::TimedOut) => {}
                Err(WaitError::Interrupted) => return Err(crate::KernelError::Interrupted),
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Force-unsubscribe whatever the heads have not torn down yet.
        let mut lists = self.shared.lists.lock();
        let mut remaining = core::mem::take(&mut lists.pending);
        remaining.append(&mut lists.ready);
        lists.unlock();
        for sub in remaining {
            if let Some(head) = sub.head.upgrade() {
                let mut subs = head.lock();
                subs.retain(|s| !Arc::ptr_eq(s, &sub));
                subs.unlock();
            }
            sub.release_resource();
        }
    }
}
