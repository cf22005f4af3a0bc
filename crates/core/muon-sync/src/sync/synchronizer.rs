//! The shared core behind every blocking primitive in this crate.
//!
//! A [`Synchronizer`] pairs a [`StateCell`] with a [`WaitQueue`]. A policy
//! (lock, latch, semaphore, barrier) supplies closures that interpret and
//! CAS the state word; the synchronizer supplies the queueing, parking,
//! timeout and cancellation machinery around them.
//!
//! ## Hooks
//!
//! | Hook | Signature | Meaning of the result |
//! |------|-----------|-----------------------|
//! | exclusive attempt | `FnMut(&StateCell) -> bool` | acquired or not |
//! | shared attempt | `FnMut(&StateCell) -> i64` | `< 0` failed, `0` acquired, `> 0` acquired and more may follow |
//! | release | `FnOnce(&StateCell) -> Result<bool, SyncError>` | whether a waiter should be woken |
//!
//! Hooks must be non-blocking and must only change the state through
//! [`StateCell::compare_and_set`].
//!
//! ## Wake protocol
//!
//! A waiter links its node, then re-runs its attempt, then parks. A releaser
//! changes the state, then wakes the queue head. The queue fences both
//! sides, so one of them always sees the other: either the waiter's
//! re-check observes the release, or the releaser's scan observes the node.
//!
//! A woken waiter whose retry fails goes back ahead of every waiter that
//! queued after it. Barging only lets newcomers overtake; queued waiters
//! keep their order.

use std::sync::Arc;

use super::loom_compat::{AtomicU64, Ordering};
use super::state::StateCell;
use super::wait::Wait;
use super::waitqueue::{Mode, Node, Parked, WaitQueue};
use crate::SyncError;
use crate::id::OwnerId;

/// Whether a new arrival may overtake threads already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Fairness {
    /// Arrivals try the state word first and only queue on failure. Higher
    /// throughput; a newcomer may overtake queued waiters.
    #[default]
    Barging,
    /// Nobody overtakes a queued or woken waiter. Arrivals skip the state
    /// word while anyone is queued or retrying after a wake, and a linked
    /// waiter only tries once it is first in line.
    Fair,
}

/// A state word, an optional exclusive owner and a queue of parked
/// waiters.
pub struct Synchronizer {
    state: StateCell,
    /// Raw [`OwnerId`] of the exclusive holder, `0` when none.
    owner: AtomicU64,
    waiters: WaitQueue,
    fairness: Fairness,
}

impl Synchronizer {
    /// Creates a barging synchronizer with state `initial`.
    pub fn new(initial: i64) -> Self {
        Self::with_fairness(initial, Fairness::Barging)
    }

    /// Creates a synchronizer with state `initial` and the given fairness.
    pub fn with_fairness(initial: i64, fairness: Fairness) -> Self {
        Self {
            state: StateCell::new(initial),
            owner: AtomicU64::new(0),
            waiters: WaitQueue::new(),
            fairness,
        }
    }

    /// The state word.
    #[inline]
    pub fn state(&self) -> &StateCell {
        &self.state
    }

    /// The queue of parked waiters.
    #[inline]
    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// The fairness policy chosen at construction.
    pub fn fairness(&self) -> Fairness {
        self.fairness
    }

    /// The recorded exclusive owner.
    pub fn owner(&self) -> Option<OwnerId> {
        OwnerId::from_raw(self.owner.load(Ordering::SeqCst))
    }

    /// Records (or clears) the exclusive owner.
    ///
    /// Policies set the owner right after the CAS that acquires and clear it
    /// right before the CAS that releases.
    pub fn set_owner(&self, owner: Option<OwnerId>) {
        self.owner
            .store(owner.map_or(0, OwnerId::as_u64), Ordering::SeqCst);
    }

    /// Returns `true` if the calling thread is the recorded owner.
    pub fn is_owned_by_current(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == OwnerId::current().as_u64()
    }

    /// Runs an exclusive attempt once, without queueing.
    ///
    /// Non-blocking attempts always barge, whatever the fairness policy.
    pub fn try_acquire(&self, attempt: impl FnOnce(&StateCell) -> bool) -> bool {
        attempt(&self.state)
    }

    /// Runs a shared attempt once, without queueing. Returns `true` if it
    /// acquired.
    pub fn try_acquire_shared(&self, attempt: impl FnOnce(&StateCell) -> i64) -> bool {
        attempt(&self.state) >= 0
    }

    /// Blocks until the exclusive attempt succeeds or `wait` gives up.
    ///
    /// # Errors
    ///
    /// [`SyncError::TimedOut`] or [`SyncError::Cancelled`] from `wait`. The
    /// state word is untouched by an aborted wait.
    pub fn acquire(
        &self,
        wait: &Wait<'_>,
        mut attempt: impl FnMut(&StateCell) -> bool,
    ) -> Result<(), SyncError> {
        if self.may_barge() && attempt(&self.state) {
            return Ok(());
        }
        if let Some(err) = wait.expired() {
            return Err(err);
        }
        self.acquire_queued(Node::new(Mode::Exclusive), wait, || attempt(&self.state))
    }

    /// Blocks until the shared attempt returns a non-negative value or
    /// `wait` gives up.
    ///
    /// A positive result also wakes the next queued waiter, so one release
    /// cascades through every shared waiter that can proceed.
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire).
    pub fn acquire_shared(
        &self,
        wait: &Wait<'_>,
        mut attempt: impl FnMut(&StateCell) -> i64,
    ) -> Result<(), SyncError> {
        if self.may_barge() && self.attempt_shared(&mut attempt) {
            return Ok(());
        }
        if let Some(err) = wait.expired() {
            return Err(err);
        }
        self.acquire_queued(
            Node::new(Mode::Shared),
            wait,
            || self.attempt_shared(&mut attempt),
        )
    }

    /// Runs the release hook and wakes the queue head if it asks for it.
    ///
    /// The same entry point serves exclusive and shared releases: the hook
    /// decides what the new state means.
    ///
    /// # Errors
    ///
    /// Whatever the hook reports; the hook must leave the state unchanged
    /// when it fails.
    pub fn release(
        &self,
        release: impl FnOnce(&StateCell) -> Result<bool, SyncError>,
    ) -> Result<(), SyncError> {
        if release(&self.state)? {
            self.waiters.unpark_head();
        }
        Ok(())
    }

    /// Wakes every queued waiter. Each re-validates its own condition.
    pub fn wake_all(&self) {
        self.waiters.unpark_all();
    }

    /// Finishes an exclusive acquisition for a node that a condition queue
    /// moved onto this synchronizer's queue and that has since been
    /// signalled from here.
    pub(crate) fn acquire_transferred(
        &self,
        node: Arc<Node>,
        mut attempt: impl FnMut(&StateCell) -> bool,
    ) {
        if self.retry_woken(&node, || attempt(&self.state)) {
            return;
        }
        // An unbounded wait cannot abort.
        let _ = self.park_linked(&node, &Wait::forever(), || attempt(&self.state));
    }

    fn may_barge(&self) -> bool {
        self.fairness == Fairness::Barging
            || (!self.waiters.has_waiters() && self.waiters.woken() == 0)
    }

    /// Whether a linked waiter may run its attempt before parking.
    fn may_recheck(&self, node: &Node) -> bool {
        if self.fairness == Fairness::Barging {
            return true;
        }
        match self.waiters.first_in_line(node) {
            Some(first) => first,
            None => {
                // Someone else is scanning the queue; let a wake decide who
                // goes next.
                self.waiters.unpark_head();
                false
            }
        }
    }

    fn attempt_shared(&self, attempt: &mut impl FnMut(&StateCell) -> i64) -> bool {
        let remaining = attempt(&self.state);
        if remaining > 0 && self.waiters.has_waiters() {
            self.waiters.unpark_head();
        }
        remaining >= 0
    }

    /// The slow path: link, then [`park_linked`](Self::park_linked).
    fn acquire_queued(
        &self,
        node: Arc<Node>,
        wait: &Wait<'_>,
        attempt: impl FnMut() -> bool,
    ) -> Result<(), SyncError> {
        self.waiters.enqueue(Arc::clone(&node));
        self.park_linked(&node, wait, attempt)
    }

    /// Re-check, park, retry, for a node that is linked on the queue.
    fn park_linked(
        &self,
        node: &Arc<Node>,
        wait: &Wait<'_>,
        mut attempt: impl FnMut() -> bool,
    ) -> Result<(), SyncError> {
        loop {
            if self.may_recheck(node) && attempt() {
                if !self.waiters.withdraw(node) {
                    // A release picked this node while the re-check won on
                    // its own; hand the wake to the next waiter.
                    self.waiters.finish_wake();
                    self.waiters.unpark_head();
                }
                return Ok(());
            }
            match self.waiters.park(node, wait) {
                Parked::Signalled => {
                    if self.retry_woken(node, &mut attempt) {
                        return Ok(());
                    }
                }
                Parked::Aborted(err) => {
                    crate::sync_trace!(
                        "{:?} acquire gave up: {err} (state {})",
                        node.mode(),
                        self.state.read()
                    );
                    if self.fairness == Fairness::Fair {
                        // Waiters behind this one may have skipped their
                        // re-check on its account.
                        self.waiters.unpark_head();
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Runs the attempt owed to a signalled node. On failure the node goes
    /// back to the front of the queue, still linked.
    fn retry_woken(&self, node: &Arc<Node>, mut attempt: impl FnMut() -> bool) -> bool {
        let acquired = attempt();
        if !acquired {
            node.rearm();
            self.waiters.requeue(Arc::clone(node));
        }
        self.waiters.finish_wake();
        acquired
    }
}

impl core::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.state.read())
            .field("owner", &self.owner())
            .field("waiters", &self.waiters.len())
            .field("fairness", &self.fairness)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::test_util::{settle, wait_until};
    use crate::sync::CancelToken;
    use std::time::Duration;

    /// A plain binary lock: 0 = free, 1 = held.
    fn lock(state: &StateCell) -> bool {
        state.compare_and_set(0, 1)
    }

    fn unlock(sync: &Synchronizer) -> Result<(), SyncError> {
        sync.release(|state| {
            if state.compare_and_set(1, 0) {
                Ok(true)
            } else {
                Err(SyncError::IllegalState)
            }
        })
    }

    /// A gate: acquired once the state reaches 0.
    fn gate(state: &StateCell) -> i64 {
        if state.read() == 0 { 1 } else { -1 }
    }

    #[test]
    fn uncontended_fast_path() {
        let sync = Synchronizer::new(0);
        sync.acquire(&Wait::forever(), lock).unwrap();
        assert_eq!(sync.state().read(), 1);
        assert!(!sync.try_acquire(lock));
        unlock(&sync).unwrap();
        assert!(sync.try_acquire(lock));
    }

    #[test]
    fn failed_release_hook_leaves_state() {
        let sync = Synchronizer::new(0);
        assert_eq!(unlock(&sync), Err(SyncError::IllegalState));
        assert_eq!(sync.state().read(), 0);
    }

    #[test]
    fn contended_acquire_is_woken_by_release() {
        let sync = Arc::new(Synchronizer::new(0));
        sync.acquire(&Wait::forever(), lock).unwrap();

        let waiter = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || {
                sync.acquire(&Wait::forever(), lock).unwrap();
                unlock(&sync).unwrap();
            })
        };
        assert!(wait_until(|| sync.waiters().has_waiters()));
        settle();
        unlock(&sync).unwrap();
        waiter.join().unwrap();
        assert_eq!(sync.state().read(), 0);
        assert!(!sync.waiters().has_waiters());
    }

    #[test]
    fn timed_out_acquire_leaves_state_alone() {
        let sync = Synchronizer::new(1);
        let err = sync
            .acquire(&Wait::timeout(Duration::from_millis(10)), lock)
            .unwrap_err();
        assert_eq!(err, SyncError::TimedOut);
        assert_eq!(sync.state().read(), 1);
        assert!(!sync.waiters().has_waiters());
    }

    #[test]
    fn expired_wait_still_tries_once() {
        let sync = Synchronizer::new(0);
        let expired = Wait::timeout(Duration::ZERO);
        assert_eq!(sync.acquire(&expired, lock), Ok(()));
    }

    #[test]
    fn cancellation_unblocks_waiter() {
        let sync = Arc::new(Synchronizer::new(1));
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || {
                let token = CancelToken::new();
                tx.send(token.clone()).unwrap();
                sync.acquire(&Wait::forever().cancellable(&token), lock)
            })
        };
        let token = rx.recv().unwrap();
        assert!(wait_until(|| sync.waiters().has_waiters()));
        token.cancel();
        assert_eq!(waiter.join().unwrap(), Err(SyncError::Cancelled));
        assert_eq!(sync.state().read(), 1);
    }

    #[test]
    fn shared_release_cascades_to_every_waiter() {
        let sync = Arc::new(Synchronizer::new(1));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let sync = Arc::clone(&sync);
                std::thread::spawn(move || sync.acquire_shared(&Wait::forever(), gate))
            })
            .collect();
        assert!(wait_until(|| sync.waiters().len() == 4));

        sync.release(|state| Ok(state.compare_and_set(1, 0))).unwrap();
        for w in waiters {
            assert_eq!(w.join().unwrap(), Ok(()));
        }
    }

    #[test]
    fn fair_mode_refuses_to_barge_past_queue() {
        let sync = Arc::new(Synchronizer::with_fairness(1, Fairness::Fair));
        let waiter = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || sync.acquire_shared(&Wait::forever(), gate))
        };
        assert!(wait_until(|| sync.waiters().has_waiters()));
        settle();

        // The gate is open, but a fair arrival with an expired wait may not
        // overtake the queued thread.
        sync.state().set(0);
        let expired = Wait::timeout(Duration::ZERO);
        assert_eq!(
            sync.acquire_shared(&expired, gate),
            Err(SyncError::TimedOut)
        );
        // Non-blocking attempts barge regardless.
        assert!(sync.try_acquire_shared(gate));

        sync.waiters().unpark_head();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn owner_tracking() {
        let sync = Synchronizer::new(0);
        assert_eq!(sync.owner(), None);
        sync.set_owner(Some(OwnerId::current()));
        assert!(sync.is_owned_by_current());
        sync.set_owner(None);
        assert!(!sync.is_owned_by_current());
    }
}
