//! The synchronizer's state word.

use super::loom_compat::{AtomicI64, Ordering};
use super::stress::stress_delay;

/// A signed atomic integer: the single source of truth for how many
/// holders, permits or parties a synchronizer has left.
///
/// All accesses are sequentially consistent. The wait queue fences a
/// waiter's "enqueue, then re-read state" against a releaser's "write
/// state, then scan queue", so no wake-up is lost between them.
pub struct StateCell {
    value: AtomicI64,
}

impl StateCell {
    /// Creates a cell holding `initial`.
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Returns the current value.
    #[inline]
    pub fn read(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Replaces the value with `desired` iff it currently equals `expected`.
    ///
    /// Returns `true` on success. A `false` return leaves the value untouched;
    /// the caller re-reads and retries or reinterprets.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, desired: i64) -> bool {
        stress_delay();
        self.value
            .compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Unconditionally stores `value`.
    ///
    /// Only for transitions nobody else can race with (a lock owner restoring
    /// its own hold count).
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }
}

impl core::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("StateCell").field(&self.read()).finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn cas_succeeds_only_on_match() {
        let cell = StateCell::new(3);
        assert!(!cell.compare_and_set(2, 10));
        assert_eq!(cell.read(), 3);
        assert!(cell.compare_and_set(3, 10));
        assert_eq!(cell.read(), 10);
    }

    #[test]
    fn set_overwrites() {
        let cell = StateCell::new(-1);
        cell.set(42);
        assert_eq!(cell.read(), 42);
    }

    #[test]
    fn concurrent_cas_increments_are_not_lost() {
        let cell = Arc::new(StateCell::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        loop {
                            let v = cell.read();
                            if cell.compare_and_set(v, v + 1) {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cell.read(), 4000);
    }
}
