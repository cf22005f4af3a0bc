//! One-shot count-down latch.

use core::fmt;

use super::synchronizer::Synchronizer;
use super::wait::Wait;
use crate::SyncError;

/// A gate that opens once [`count_down`](Self::count_down) has been called
/// `count` times, and then stays open forever.
///
/// The state word holds the remaining count. Waiters acquire in shared mode
/// and succeed once it reads zero; the release that reaches zero wakes the
/// queue head, and each woken waiter wakes the next.
pub struct CountDownLatch {
    sync: Synchronizer,
}

impl CountDownLatch {
    /// Creates a latch that opens after `count` count-downs. A zero count
    /// creates an open latch.
    pub fn new(count: u32) -> Self {
        Self {
            sync: Synchronizer::new(i64::from(count)),
        }
    }

    /// Decrements the count, opening the latch when it reaches zero.
    /// Further calls on an open latch do nothing.
    pub fn count_down(&self) {
        // The hook never fails.
        let _ = self.sync.release(|state| loop {
            let count = state.read();
            if count == 0 {
                return Ok(false);
            }
            if state.compare_and_set(count, count - 1) {
                return Ok(count == 1);
            }
        });
    }

    /// The remaining count.
    pub fn count(&self) -> u32 {
        u32::try_from(self.sync.state().read()).unwrap_or(0)
    }

    /// Blocks until the latch is open.
    pub fn wait(&self) {
        // An unbounded wait cannot abort.
        let _ = self.wait_with(&Wait::forever());
    }

    /// Blocks until the latch is open or `wait` gives up.
    ///
    /// # Errors
    ///
    /// [`SyncError::TimedOut`] or [`SyncError::Cancelled`].
    pub fn wait_with(&self, wait: &Wait<'_>) -> Result<(), SyncError> {
        self.sync.acquire_shared(wait, |state| {
            if state.read() == 0 { 1 } else { -1 }
        })
    }

    /// Returns `true` if the latch is open.
    pub fn try_wait(&self) -> bool {
        self.sync
            .try_acquire_shared(|state| if state.read() == 0 { 1 } else { -1 })
    }
}

impl fmt::Debug for CountDownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDownLatch")
            .field("count", &self.count())
            .field("waiters", &self.sync.waiters().len())
            .finish()
    }
}
