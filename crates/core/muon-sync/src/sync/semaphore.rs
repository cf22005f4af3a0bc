//! Counting semaphore.
//!
//! [`Semaphore`] limits concurrent access to a resource. Threads acquire
//! permits before proceeding and release them when done. The state word is
//! the number of permits left.

use core::fmt;

use super::state::StateCell;
use super::synchronizer::{Fairness, Synchronizer};
use super::wait::Wait;
use crate::SyncError;

/// A counting semaphore.
///
/// Permits are plain counts: nothing ties a release to an earlier acquire,
/// but the total can never exceed [`max_permits`](Self::max_permits).
///
/// # Example
///
/// ```ignore
/// let sem = Semaphore::new(3); // 3 concurrent holders
///
/// fn access_resource(sem: &Semaphore) -> Result<(), SyncError> {
///     let _permit = sem.acquire()?;
///     // ... use the resource ...
///     Ok(())
///     // permit is released on drop
/// }
/// ```
pub struct Semaphore {
    sync: Synchronizer,
    max: u32,
}

impl Semaphore {
    /// Creates a barging semaphore with `permits` permits. The maximum is
    /// unbounded.
    pub fn new(permits: u32) -> Self {
        Self::build(permits, u32::MAX, Fairness::Barging)
    }

    /// Creates a fair semaphore with `permits` permits.
    pub fn fair(permits: u32) -> Self {
        Self::build(permits, u32::MAX, Fairness::Fair)
    }

    /// Creates a barging semaphore that never holds more than `max`
    /// permits.
    ///
    /// # Panics
    ///
    /// Panics if `permits > max`.
    pub fn with_max_permits(permits: u32, max: u32) -> Self {
        assert!(permits <= max, "initial permits {permits} exceed maximum {max}");
        Self::build(permits, max, Fairness::Barging)
    }

    /// Returns the same semaphore with the given fairness.
    #[must_use]
    pub fn with_fairness(self, fairness: Fairness) -> Self {
        let permits = u32::try_from(self.sync.state().read()).unwrap_or(0);
        Self::build(permits, self.max, fairness)
    }

    fn build(permits: u32, max: u32, fairness: Fairness) -> Self {
        Self {
            sync: Synchronizer::with_fairness(i64::from(permits), fairness),
            max,
        }
    }

    /// Blocks until a permit is available.
    ///
    /// # Errors
    ///
    /// None for an unbounded wait; the `Result` keeps the signature in line
    /// with [`acquire_with`](Self::acquire_with).
    pub fn acquire(&self) -> Result<SemaphorePermit<'_>, SyncError> {
        self.acquire_many_with(1, &Wait::forever())
    }

    /// Blocks until a permit is available or `wait` gives up.
    ///
    /// # Errors
    ///
    /// [`SyncError::TimedOut`] or [`SyncError::Cancelled`].
    pub fn acquire_with(&self, wait: &Wait<'_>) -> Result<SemaphorePermit<'_>, SyncError> {
        self.acquire_many_with(1, wait)
    }

    /// Blocks until `n` permits can be taken at once.
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire).
    pub fn acquire_many(&self, n: u32) -> Result<SemaphorePermit<'_>, SyncError> {
        self.acquire_many_with(n, &Wait::forever())
    }

    /// Blocks until `n` permits can be taken at once or `wait` gives up.
    ///
    /// # Errors
    ///
    /// [`SyncError::TimedOut`] or [`SyncError::Cancelled`]. Asking for more
    /// than [`max_permits`](Self::max_permits) can only end this way.
    pub fn acquire_many_with(
        &self,
        n: u32,
        wait: &Wait<'_>,
    ) -> Result<SemaphorePermit<'_>, SyncError> {
        self.sync.acquire_shared(wait, |state| take(state, n))?;
        Ok(SemaphorePermit { sem: self, permits: n })
    }

    /// Tries to acquire a permit without blocking.
    ///
    /// Returns `Some(permit)` if a permit was available, `None` otherwise.
    /// Barges even on a fair semaphore.
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.try_acquire_many(1)
    }

    /// Tries to take `n` permits at once without blocking.
    pub fn try_acquire_many(&self, n: u32) -> Option<SemaphorePermit<'_>> {
        self.sync
            .try_acquire_shared(|state| take(state, n))
            .then(|| SemaphorePermit { sem: self, permits: n })
    }

    /// Returns `n` permits and wakes waiters that may now proceed.
    ///
    /// # Errors
    ///
    /// [`SyncError::IllegalState`] if the release would push the count
    /// past [`max_permits`](Self::max_permits). Nothing is released then.
    pub fn release(&self, n: u32) -> Result<(), SyncError> {
        let max = i64::from(self.max);
        self.sync.release(|state| loop {
            let current = state.read();
            let next = current + i64::from(n);
            if next > max {
                crate::sync_debug!(
                    "semaphore over-release: {current} + {n} exceeds maximum {max}"
                );
                return Err(SyncError::IllegalState);
            }
            if state.compare_and_set(current, next) {
                return Ok(n > 0);
            }
        })
    }

    /// Returns the number of currently available permits.
    pub fn available_permits(&self) -> u32 {
        u32::try_from(self.sync.state().read()).unwrap_or(0)
    }

    /// Takes every available permit and returns how many that was.
    pub fn drain_permits(&self) -> u32 {
        let state = self.sync.state();
        loop {
            let current = state.read();
            if current <= 0 || state.compare_and_set(current, 0) {
                return u32::try_from(current).unwrap_or(0);
            }
        }
    }

    /// The most permits this semaphore can hold.
    pub fn max_permits(&self) -> u32 {
        self.max
    }

    /// Returns `true` for a semaphore created with [`Fairness::Fair`].
    pub fn is_fair(&self) -> bool {
        self.sync.fairness() == Fairness::Fair
    }

    /// Returns `true` if threads are parked waiting for permits.
    pub fn has_queued_threads(&self) -> bool {
        self.sync.waiters().has_waiters()
    }

    /// Number of threads parked waiting for permits.
    pub fn queue_length(&self) -> usize {
        self.sync.waiters().len()
    }
}

/// The shared acquire hook: take `n` permits if that leaves a non-negative
/// count, reporting what is left.
fn take(state: &StateCell, n: u32) -> i64 {
    loop {
        let current = state.read();
        let remaining = current - i64::from(n);
        if remaining < 0 || state.compare_and_set(current, remaining) {
            return remaining;
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("available", &self.available_permits())
            .field("max", &self.max)
            .field("queued", &self.queue_length())
            .finish()
    }
}

/// RAII permit that releases back to the [`Semaphore`] on drop.
#[must_use = "dropping the permit releases it immediately"]
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
    permits: u32,
}

impl SemaphorePermit<'_> {
    /// Number of permits this guard returns on drop.
    pub fn permits(&self) -> u32 {
        self.permits
    }

    /// Keeps the permits taken: nothing is released on drop.
    pub fn forget(mut self) {
        self.permits = 0;
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if self.permits > 0 {
            // Only fails if someone over-released by hand in the meantime.
            let _ = self.sem.release(self.permits);
        }
    }
}

impl fmt::Debug for SemaphorePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphorePermit")
            .field("permits", &self.permits)
            .finish()
    }
}
