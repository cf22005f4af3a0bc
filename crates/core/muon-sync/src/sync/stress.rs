//! Contention stress delays.
//!
//! Injects random spin delays in front of every state-word CAS and inside the
//! wait queue's link window to widen race windows and surface
//! timing-dependent bugs. Active only under `cfg(muon_lock_stress)`; in every
//! other build [`stress_delay`] is an empty inline function.
//!
//! ## Design
//!
//! - **PRNG**: xorshift64, one state per thread, seeded from [`init`]'s seed
//!   mixed with a per-thread counter so threads diverge.
//! - **Timing**: `std::time::Instant`.
//! - **Delay**: spins for a random duration in `[0, max_us)` microseconds.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Maximum stress delay in microseconds. Set by [`init`].
static MAX_US: AtomicU32 = AtomicU32::new(10);

/// Base seed. Each thread derives its own stream from it.
static SEED: AtomicU64 = AtomicU64::new(FALLBACK_SEED);

/// Number of threads that have seeded a stream so far.
static STREAMS: AtomicU64 = AtomicU64::new(0);

const FALLBACK_SEED: u64 = 0xDEAD_BEEF_CAFE_BABE;

std::thread_local! {
    static PRNG_STATE: core::cell::Cell<u64> = const { core::cell::Cell::new(0) };
}

/// Configures the stress delay subsystem.
///
/// - `max_us`: maximum random delay in microseconds; `0` disables delays.
/// - `seed`: base PRNG seed. If 0, a fixed constant is used to avoid a
///   stuck-at-zero xorshift.
pub fn init(max_us: u32, seed: u64) {
    MAX_US.store(max_us, Ordering::Relaxed);
    SEED.store(if seed == 0 { FALLBACK_SEED } else { seed }, Ordering::Relaxed);
}

/// Derives a non-zero per-thread seed from the base seed.
fn thread_seed() -> u64 {
    let base = SEED.load(Ordering::Relaxed);
    let stream = STREAMS.fetch_add(1, Ordering::Relaxed);
    let seed = base
        .wrapping_add(stream)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    // Avoid zero (xorshift fixed point).
    if seed == 0 { base ^ 0x1234_5678 } else { seed }
}

/// One xorshift64 step.
#[inline]
const fn xorshift(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// Returns the next pseudo-random u64 for the current thread.
#[inline]
fn next_random() -> u64 {
    PRNG_STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            x = thread_seed();
        }
        x = xorshift(x);
        state.set(x);
        x
    })
}

/// Spins for a random duration in `[0, max_us)` microseconds.
///
/// Must not touch any primitive from this crate: it runs inside their
/// acquire and release paths.
#[inline]
pub fn stress_delay() {
    #[cfg(muon_lock_stress)]
    spin_random();
}

#[cfg_attr(not(muon_lock_stress), allow(dead_code))]
fn spin_random() {
    let max_us = MAX_US.load(Ordering::Relaxed);
    if max_us == 0 {
        return;
    }

    let target_ns = next_random() % (u64::from(max_us) * 1000);
    if target_ns == 0 {
        return;
    }

    let start = std::time::Instant::now();
    while u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX) < target_ns {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_never_returns_to_zero() {
        let mut x = 1;
        for _ in 0..1000 {
            x = xorshift(x);
            assert_ne!(x, 0);
        }
    }

    #[test]
    fn streams_differ_between_threads() {
        let here = std::thread::spawn(next_random).join().unwrap();
        let there = std::thread::spawn(next_random).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn spin_random_returns() {
        // Runs the delay body directly so the test covers it in every build.
        spin_random();
        stress_delay();
    }
}
