//! Blocking synchronization primitives for the Muon runtime.
//!
//! Every primitive in this crate is a thin policy layer over one core,
//! [`Synchronizer`](sync::Synchronizer): a signed atomic state word mutated
//! only by compare-and-swap, paired with a lock-free FIFO queue of parked
//! waiters. The policies are an exclusive (optionally reentrant) lock with
//! condition queues, a count-down latch, a counting semaphore, a cyclic
//! barrier and a phased barrier.
//!
//! Threads block by parking. Waits can carry a deadline and a
//! [`CancelToken`](sync::CancelToken); a timed-out or cancelled waiter leaves
//! the queue and the state word intact for everyone else.
//!
//! The atomics and parking calls go through a loom shim, so the core can be
//! model-checked with `RUSTFLAGS="--cfg loom"`.

#![warn(missing_docs)]

pub mod cell;
pub mod error;
pub mod id;
pub mod log;
pub mod safety;
pub mod sync;

pub use error::SyncError;
