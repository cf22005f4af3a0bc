//! Condition queues for [`ExclusiveLock`].
//!
//! A [`Condition`] is a second [`WaitQueue`] paired with one lock. Waiting
//! links the caller here, fully releases the lock and parks. Signalling does
//! not wake anyone: it moves nodes onto the lock's own queue, where they are
//! woken by the lock's next release like any other contender. A waiter
//! therefore never returns without holding the lock again.

use core::fmt;
use std::sync::Arc;

use super::lock::ExclusiveLock;
use super::wait::Wait;
use super::waitqueue::{Mode, Node, Parked, WaitQueue};
use crate::SyncError;
use crate::id::OwnerId;

/// A queue of threads waiting for some state guarded by an
/// [`ExclusiveLock`] to change.
///
/// Created by [`ExclusiveLock::new_condition`]. Every operation takes the
/// lock it was created from and fails with
/// [`SyncError::IllegalMonitorState`] if the caller does not hold it, or if
/// a different lock is passed.
///
/// # Example
///
/// ```ignore
/// let lock = ExclusiveLock::new();
/// let ready = lock.new_condition();
///
/// // Waiter:
/// lock.acquire()?;
/// while !flag.load(Ordering::SeqCst) {
///     ready.wait(&lock)?;
/// }
/// lock.release()?;
///
/// // Notifier:
/// lock.acquire()?;
/// flag.store(true, Ordering::SeqCst);
/// ready.signal(&lock)?;
/// lock.release()?;
/// ```
pub struct Condition {
    lock_id: u64,
    waiters: WaitQueue,
}

impl Condition {
    pub(crate) fn new(lock_id: u64) -> Self {
        Self {
            lock_id,
            waiters: WaitQueue::new(),
        }
    }

    /// Releases `lock`, waits for a signal, and re-acquires `lock` with the
    /// same hold count before returning.
    ///
    /// Wake-ups are only hints; re-check the guarded state in a loop.
    ///
    /// # Errors
    ///
    /// [`SyncError::IllegalMonitorState`] if the caller does not hold
    /// `lock`.
    pub fn wait(&self, lock: &ExclusiveLock) -> Result<(), SyncError> {
        self.wait_with(lock, &Wait::forever())
    }

    /// Like [`wait`](Self::wait), giving up as `wait` directs.
    ///
    /// A timed-out or cancelled wait still re-acquires `lock` before it
    /// returns the error. Once a signal has moved the caller onto the lock's
    /// queue the wait can no longer time out.
    ///
    /// # Errors
    ///
    /// Also [`SyncError::TimedOut`] and [`SyncError::Cancelled`].
    pub fn wait_with(&self, lock: &ExclusiveLock, wait: &Wait<'_>) -> Result<(), SyncError> {
        self.check(lock)?;
        let node = Node::new(Mode::Exclusive);
        self.waiters.enqueue(Arc::clone(&node));
        let holds = lock.release_fully();

        match self.waiters.park(&node, wait) {
            Parked::Signalled => {
                lock.reacquire_transferred(node, holds);
                Ok(())
            }
            Parked::Aborted(err) => {
                lock.reacquire(holds);
                crate::sync_trace!("condition wait gave up: {err}");
                Err(err)
            }
        }
    }

    /// Moves the longest-waiting thread onto the lock's queue. It runs once
    /// the caller (and anyone queued ahead of it) releases the lock.
    ///
    /// # Errors
    ///
    /// [`SyncError::IllegalMonitorState`] if the caller does not hold
    /// `lock`.
    pub fn signal(&self, lock: &ExclusiveLock) -> Result<(), SyncError> {
        self.check(lock)?;
        self.waiters.transfer_to(lock.sync().waiters(), false);
        Ok(())
    }

    /// Moves every waiting thread onto the lock's queue.
    ///
    /// # Errors
    ///
    /// As for [`signal`](Self::signal).
    pub fn signal_all(&self, lock: &ExclusiveLock) -> Result<(), SyncError> {
        self.check(lock)?;
        self.waiters.transfer_to(lock.sync().waiters(), true);
        Ok(())
    }

    /// Returns `true` if threads are waiting on this condition.
    pub fn has_waiters(&self) -> bool {
        self.waiters.has_waiters()
    }

    /// Number of threads waiting on this condition.
    pub fn wait_queue_length(&self) -> usize {
        self.waiters.len()
    }

    fn check(&self, lock: &ExclusiveLock) -> Result<(), SyncError> {
        if lock.id() != self.lock_id {
            crate::sync_debug!("condition used with a lock it was not created from");
            return Err(SyncError::IllegalMonitorState);
        }
        if !lock.is_held_by_current_thread() {
            crate::sync_debug!("{} used a condition without holding its lock", OwnerId::current());
            return Err(SyncError::IllegalMonitorState);
        }
        Ok(())
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("waiting", &self.waiters.len())
            .finish_non_exhaustive()
    }
}
