//! Synchronizer error types.

use core::fmt;

/// Errors reported by blocking and releasing operations.
///
/// Every error is returned to the caller that triggered or observed it.
/// The core never retries on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncError {
    /// A release did not match an acquisition (unlocking a lock the caller
    /// does not hold, releasing permits beyond the configured maximum,
    /// recursively locking a non-reentrant lock).
    IllegalState,
    /// A condition operation was attempted without holding its lock.
    IllegalMonitorState,
    /// The wait's deadline elapsed before the acquisition succeeded.
    TimedOut,
    /// The wait's [`CancelToken`](crate::sync::CancelToken) was cancelled.
    Cancelled,
    /// The barrier was broken, reset or terminated while the caller was
    /// waiting on it or trying to arrive.
    BrokenBarrier,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalState => f.write_str("release without a matching acquire"),
            Self::IllegalMonitorState => f.write_str("lock not held by the current thread"),
            Self::TimedOut => f.write_str("wait timed out"),
            Self::Cancelled => f.write_str("wait cancelled"),
            Self::BrokenBarrier => f.write_str("barrier is broken"),
        }
    }
}

impl std::error::Error for SyncError {}
