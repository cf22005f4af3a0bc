//! Loom compatibility shim.
//!
//! When compiled with `cfg(loom)`, re-exports loom's atomics, thread handles
//! and parking calls. Otherwise, re-exports the `std` equivalents.
//!
//! This allows the synchronizer core to run under loom's deterministic
//! scheduler without code changes. Loom treats `SeqCst` accesses as
//! acquire/release, so store-then-load handshakes must go through
//! `fence(SeqCst)` to be modelled. Loom does not model time, so a timed park
//! degrades to a yield there; model tests only use untimed waits.

// ---------------------------------------------------------------------------
// Loom mode
// ---------------------------------------------------------------------------

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{
    AtomicBool, AtomicI64, AtomicPtr, AtomicU8, AtomicU64, AtomicUsize, Ordering, fence,
};
#[cfg(loom)]
pub(crate) use loom::thread::{Thread, current, park, yield_now};
#[cfg(loom)]
pub(crate) use loom::thread_local;

#[cfg(loom)]
pub(crate) fn park_timeout(_timeout: std::time::Duration) {
    loom::thread::yield_now();
}

#[cfg(loom)]
pub(crate) fn spin_loop() {
    loom::thread::yield_now();
}

// ---------------------------------------------------------------------------
// Normal mode
// ---------------------------------------------------------------------------

#[cfg(not(loom))]
pub(crate) use core::hint::spin_loop;
#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{
    AtomicBool, AtomicI64, AtomicPtr, AtomicU8, AtomicU64, AtomicUsize, Ordering, fence,
};
#[cfg(not(loom))]
pub(crate) use std::thread::{Thread, current, park, park_timeout, yield_now};
#[cfg(not(loom))]
pub(crate) use std::thread_local;
