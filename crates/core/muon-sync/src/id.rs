//! Owner identity for exclusive acquisition.
//!
//! [`OwnerId`] is a small, copyable, non-zero identifier assigned lazily to
//! each thread the first time it asks for one. It fits in an atomic word so a
//! synchronizer can record its exclusive owner without a lock.

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::sync::loom_compat::thread_local;

/// Next identifier to hand out. Zero is reserved for "no owner".
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: OwnerId = OwnerId::allocate();
}

/// Identity of a thread holding (or trying to hold) exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct OwnerId(NonZeroU64);

impl OwnerId {
    /// Returns the identity of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|id| *id)
    }

    /// Reconstructs an identity from its raw value. `0` maps to `None`.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the raw `u64` value (never zero).
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }

    fn allocate() -> Self {
        let raw = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        // Zero only after wraparound.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn stable_within_a_thread() {
        assert_eq!(OwnerId::current(), OwnerId::current());
    }

    #[test]
    fn distinct_across_threads() {
        let here = OwnerId::current();
        let there = std::thread::spawn(OwnerId::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn raw_round_trip() {
        let id = OwnerId::current();
        assert_eq!(OwnerId::from_raw(id.as_u64()), Some(id));
        assert_eq!(OwnerId::from_raw(0), None);
    }

    #[test]
    fn display_format() {
        let id = OwnerId::from_raw(7).unwrap();
        assert_eq!(format!("{id}"), "owner#7");
    }
}
