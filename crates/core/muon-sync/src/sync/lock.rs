//! Exclusive lock with optional reentrancy.
//!
//! [`ExclusiveLock`] keeps its hold count in the synchronizer's state word:
//! `0` is free, `n > 0` is held `n` times by the recorded owner. Only the
//! transition `0 -> 1` races with other threads; deeper re-entries and
//! partial releases are performed by the owner alone.
//!
//! A lock has no payload. It guards whatever its users agree it guards, the
//! way a monitor does.

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::condition::Condition;
use super::state::StateCell;
use super::synchronizer::{Fairness, Synchronizer};
use super::wait::Wait;
use super::waitqueue::Node;
use crate::SyncError;
use crate::id::OwnerId;

/// Source of lock identities, used to pair conditions with their lock.
static NEXT_LOCK: AtomicU64 = AtomicU64::new(1);

/// What happens when the owner locks again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reentrancy {
    /// The hold count goes up; the lock is free once every hold is released.
    #[default]
    Reentrant,
    /// A recursive blocking acquisition fails with
    /// [`SyncError::IllegalState`] and a recursive `try_acquire` fails, instead of
    /// deadlocking.
    NonReentrant,
}

/// A mutual-exclusion lock built on [`Synchronizer`].
///
/// # Example
///
/// ```ignore
/// let lock = ExclusiveLock::new();
/// {
///     let _guard = lock.lock()?;
///     // critical section
/// }
/// lock.acquire()?;
/// // critical section
/// lock.release()?;
/// ```
pub struct ExclusiveLock {
    sync: Synchronizer,
    reentrancy: Reentrancy,
    id: u64,
}

impl ExclusiveLock {
    /// Creates a reentrant, barging lock.
    pub fn new() -> Self {
        Self::with_config(Fairness::Barging, Reentrancy::Reentrant)
    }

    /// Creates a reentrant lock that queued threads cannot be overtaken on
    /// by new arrivals.
    pub fn fair() -> Self {
        Self::with_config(Fairness::Fair, Reentrancy::Reentrant)
    }

    /// Creates a barging lock that rejects recursive acquisition.
    pub fn non_reentrant() -> Self {
        Self::with_config(Fairness::Barging, Reentrancy::NonReentrant)
    }

    /// Creates a lock with explicit policies.
    pub fn with_config(fairness: Fairness, reentrancy: Reentrancy) -> Self {
        Self {
            sync: Synchronizer::with_fairness(0, fairness),
            reentrancy,
            id: NEXT_LOCK.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Blocks until the lock is held by the calling thread.
    ///
    /// # Errors
    ///
    /// [`SyncError::IllegalState`] if the caller already holds a
    /// non-reentrant lock.
    pub fn acquire(&self) -> Result<(), SyncError> {
        self.acquire_with(&Wait::forever())
    }

    /// Like [`acquire`](Self::acquire), giving up as `wait` directs.
    ///
    /// # Errors
    ///
    /// Also [`SyncError::TimedOut`] and [`SyncError::Cancelled`].
    pub fn acquire_with(&self, wait: &Wait<'_>) -> Result<(), SyncError> {
        if self.sync.is_owned_by_current() {
            return match self.reentrancy {
                Reentrancy::Reentrant => self.reenter(),
                Reentrancy::NonReentrant => {
                    crate::sync_debug!(
                        "{} tried to re-lock a non-reentrant lock",
                        OwnerId::current()
                    );
                    Err(SyncError::IllegalState)
                }
            };
        }
        self.sync.acquire(wait, |state| self.claim(state, 1))
    }

    /// Takes the lock if that is possible right now.
    pub fn try_acquire(&self) -> bool {
        if self.sync.is_owned_by_current() {
            return self.reentrancy == Reentrancy::Reentrant && self.reenter().is_ok();
        }
        self.sync.try_acquire(|state| self.claim(state, 1))
    }

    /// Releases one hold. The lock becomes free when the last hold goes.
    ///
    /// # Errors
    ///
    /// [`SyncError::IllegalState`] if the calling thread does not hold the
    /// lock.
    pub fn release(&self) -> Result<(), SyncError> {
        let me = OwnerId::current();
        if !self.sync.is_owned_by_current() {
            crate::sync_debug!("{me} released a lock it does not hold");
            return Err(SyncError::IllegalState);
        }
        self.sync.release(|state| {
            let holds = state.read();
            if holds > 1 {
                return if state.compare_and_set(holds, holds - 1) {
                    Ok(false)
                } else {
                    Err(SyncError::IllegalState)
                };
            }
            self.sync.set_owner(None);
            if state.compare_and_set(1, 0) {
                Ok(true)
            } else {
                self.sync.set_owner(Some(me));
                Err(SyncError::IllegalState)
            }
        })
    }

    /// Acquires and returns a guard that releases on drop.
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire).
    pub fn lock(&self) -> Result<LockGuard<'_>, SyncError> {
        self.acquire()?;
        Ok(LockGuard::new(self))
    }

    /// Guarded form of [`acquire_with`](Self::acquire_with).
    ///
    /// # Errors
    ///
    /// As for [`acquire_with`](Self::acquire_with).
    pub fn lock_with(&self, wait: &Wait<'_>) -> Result<LockGuard<'_>, SyncError> {
        self.acquire_with(wait)?;
        Ok(LockGuard::new(self))
    }

    /// Guarded form of [`try_acquire`](Self::try_acquire).
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.try_acquire().then(|| LockGuard::new(self))
    }

    /// Creates a condition queue bound to this lock.
    ///
    /// The condition only records which lock it belongs to; it does not
    /// borrow it, so both can live side by side in one struct.
    pub fn new_condition(&self) -> Condition {
        Condition::new(self.id)
    }

    /// Number of holds the calling thread has on this lock.
    pub fn hold_count(&self) -> u32 {
        if self.sync.is_owned_by_current() {
            u32::try_from(self.sync.state().read()).unwrap_or(u32::MAX)
        } else {
            0
        }
    }

    /// Returns `true` if any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.sync.state().read() != 0
    }

    /// Returns `true` if the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.is_owned_by_current()
    }

    /// Returns `true` if threads are parked waiting for the lock.
    pub fn has_queued_threads(&self) -> bool {
        self.sync.waiters().has_waiters()
    }

    /// Number of threads parked waiting for the lock.
    pub fn queue_length(&self) -> usize {
        self.sync.waiters().len()
    }

    /// Returns `true` for a lock created with [`Fairness::Fair`].
    pub fn is_fair(&self) -> bool {
        self.sync.fairness() == Fairness::Fair
    }

    /// The reentrancy policy.
    pub fn reentrancy(&self) -> Reentrancy {
        self.reentrancy
    }

    // -----------------------------------------------------------------------
    // Condition support
    // -----------------------------------------------------------------------

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn sync(&self) -> &Synchronizer {
        &self.sync
    }

    /// Drops every hold at once. The caller must be the owner.
    pub(crate) fn release_fully(&self) -> i64 {
        let holds = self.sync.state().read();
        self.sync.set_owner(None);
        self.sync.state().set(0);
        self.sync.waiters().unpark_head();
        holds
    }

    /// Takes the lock back with `holds` holds, starting a fresh wait.
    pub(crate) fn reacquire(&self, holds: i64) {
        // An unbounded wait cannot abort.
        let _ = self
            .sync
            .acquire(&Wait::forever(), |state| self.claim(state, holds));
    }

    /// Takes the lock back with `holds` holds for a node already signalled
    /// from this lock's queue.
    pub(crate) fn reacquire_transferred(&self, node: Arc<Node>, holds: i64) {
        self.sync
            .acquire_transferred(node, |state| self.claim(state, holds));
    }

    fn claim(&self, state: &StateCell, holds: i64) -> bool {
        if state.compare_and_set(0, holds) {
            self.sync.set_owner(Some(OwnerId::current()));
            true
        } else {
            false
        }
    }

    fn reenter(&self) -> Result<(), SyncError> {
        let state = self.sync.state();
        let holds = state.read();
        let next = holds.checked_add(1).ok_or(SyncError::IllegalState)?;
        if state.compare_and_set(holds, next) {
            Ok(())
        } else {
            Err(SyncError::IllegalState)
        }
    }
}

impl Default for ExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("holds", &self.sync.state().read())
            .field("owner", &self.sync.owner())
            .field("queued", &self.queue_length())
            .field("fairness", &self.sync.fairness())
            .field("reentrancy", &self.reentrancy)
            .finish()
    }
}

/// RAII hold on an [`ExclusiveLock`]. Releases one hold on drop.
///
/// Not `Send`: the hold belongs to the thread that took it.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard<'a> {
    lock: &'a ExclusiveLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    fn new(lock: &'a ExclusiveLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// The lock this guard holds.
    pub fn lock(&self) -> &'a ExclusiveLock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // The guard proves ownership; a failure here means the holds were
        // already released by hand.
        let _ = self.lock.release();
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("holds", &self.lock.hold_count())
            .finish()
    }
}
