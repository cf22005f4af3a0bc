//! How long a blocking call may wait, and how to interrupt it.
//!
//! [`Wait`] bundles an optional deadline with an optional [`CancelToken`].
//! Every blocking operation in this crate has a plain form that waits forever
//! and a `_with` form that takes a `&Wait`.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use super::loom_compat::{AtomicBool, Ordering, Thread, current};
use crate::SyncError;

/// Limits on a single blocking wait.
///
/// # Example
///
/// ```ignore
/// let token = CancelToken::new();
/// let wait = Wait::timeout(Duration::from_millis(50)).cancellable(&token);
/// match lock.lock_with(&wait) {
///     Ok(()) => { /* critical section */ }
///     Err(SyncError::TimedOut | SyncError::Cancelled) => { /* gave up */ }
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Clone, Copy, Default)]
pub struct Wait<'a> {
    deadline: Option<Instant>,
    token: Option<&'a CancelToken>,
}

impl<'a> Wait<'a> {
    /// Waits until the operation succeeds.
    pub const fn forever() -> Self {
        Self {
            deadline: None,
            token: None,
        }
    }

    /// Gives up once `timeout` has elapsed from now.
    ///
    /// A timeout too large to represent as an [`Instant`] waits forever.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            token: None,
        }
    }

    /// Gives up at `deadline`.
    pub const fn until(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: None,
        }
    }

    /// Also gives up when `token` is cancelled.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `token` belongs to another thread: its
    /// [`cancel`](CancelToken::cancel) would unpark that thread, not this
    /// one.
    #[must_use]
    pub fn cancellable(self, token: &'a CancelToken) -> Self {
        debug_assert!(
            token.is_bound_to_current(),
            "cancel token used by a thread other than its owner"
        );
        Self {
            deadline: self.deadline,
            token: Some(token),
        }
    }

    /// Returns the deadline, if any.
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the error this wait ends with if it has to stop now.
    ///
    /// Cancellation wins over an elapsed deadline.
    pub(crate) fn expired(&self) -> Option<SyncError> {
        if self.token.is_some_and(CancelToken::is_cancelled) {
            return Some(SyncError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SyncError::TimedOut),
            _ => None,
        }
    }

    /// Time left before the deadline, `None` for an unbounded wait.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl fmt::Debug for Wait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("deadline", &self.deadline)
            .field("cancellable", &self.token.is_some())
            .finish()
    }
}

/// Interrupt handle for one thread's waits.
///
/// A token is bound to the thread that created it. [`cancel`](Self::cancel)
/// can be called from anywhere: it sets a sticky flag and unparks the owning
/// thread, whose cancellable wait then fails with
/// [`SyncError::Cancelled`]. The flag stays set (and keeps failing new
/// cancellable waits) until [`clear`](Self::clear).
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    thread: Thread,
}

impl CancelToken {
    /// Creates a token bound to the calling thread.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                thread: current(),
            }),
        }
    }

    /// Requests cancellation and wakes the owning thread.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.thread.unpark();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arms the token.
    pub fn clear(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns `true` if the calling thread owns this token.
    pub fn is_bound_to_current(&self) -> bool {
        self.inner.thread.id() == current().id()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn forever_never_expires() {
        let wait = Wait::forever();
        assert_eq!(wait.expired(), None);
        assert_eq!(wait.remaining(), None);
    }

    #[test]
    fn past_deadline_reports_timeout() {
        let wait = Wait::until(Instant::now());
        assert_eq!(wait.expired(), Some(SyncError::TimedOut));
        assert_eq!(wait.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn huge_timeout_waits_forever() {
        let wait = Wait::timeout(Duration::MAX);
        assert_eq!(wait.deadline(), None);
    }

    #[test]
    fn cancellation_wins_over_deadline() {
        let token = CancelToken::new();
        let wait = Wait::until(Instant::now()).cancellable(&token);
        token.cancel();
        assert_eq!(wait.expired(), Some(SyncError::Cancelled));
        token.clear();
        assert_eq!(wait.expired(), Some(SyncError::TimedOut));
    }

    #[test]
    fn token_is_bound_to_creator() {
        let token = CancelToken::new();
        assert!(token.is_bound_to_current());
        let moved = token.clone();
        let elsewhere = std::thread::spawn(move || moved.is_bound_to_current())
            .join()
            .unwrap();
        assert!(!elsewhere);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cancel token used by a thread other than its owner")]
    fn foreign_token_is_rejected() {
        let token = CancelToken::new();
        let moved = token.clone();
        let outcome = std::thread::spawn(move || {
            let _ = Wait::forever().cancellable(&moved);
        })
        .join();
        if let Err(panic) = outcome {
            std::panic::resume_unwind(panic);
        }
    }

    #[test]
    fn cancel_from_other_thread_is_visible() {
        let token = CancelToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
