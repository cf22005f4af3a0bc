//! Helpers for unit tests that need another thread to be parked first.
//!
//! Blocking tests cannot observe "parked" directly. They poll a public
//! query (`has_waiters`, `queue_length`, `number_waiting`, ...) until it
//! flips, with a generous upper bound so a slow CI host fails loudly
//! instead of hanging.

use std::time::{Duration, Instant};

/// Upper bound on any single wait in a unit test.
pub(crate) const PATIENCE: Duration = Duration::from_secs(10);

/// Polls `cond` until it holds. Returns `false` after [`PATIENCE`].
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > PATIENCE {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

/// Gives a thread that was just observed as queued time to reach `park`.
///
/// Only a liveness aid: correctness never depends on the other thread
/// having parked already.
pub(crate) fn settle() {
    std::thread::sleep(Duration::from_millis(20));
}
