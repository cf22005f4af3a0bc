//! Blocking synchronization primitives.
//!
//! [`Synchronizer`] is the core: a [`StateCell`] mutated by CAS plus a
//! lock-free [`WaitQueue`] of parked threads. The policy types interpret the
//! state word:
//!
//! | Type | State word |
//! |------|------------|
//! | [`ExclusiveLock`] | hold count, 0 = free |
//! | [`CountDownLatch`] | remaining count |
//! | [`Semaphore`] | available permits |
//! | [`CyclicBarrier`], [`PhasedBarrier`] | packed phase, parties, unarrived |
//!
//! [`Condition`] adds a second queue to an [`ExclusiveLock`].

mod barrier;
mod condition;
mod latch;
mod lock;
pub(crate) mod loom_compat;
mod phased;
mod semaphore;
mod state;
pub mod stress;
mod synchronizer;
mod wait;
pub mod waitqueue;

#[cfg(all(test, not(loom)))]
pub(crate) mod test_util;

pub use barrier::{BarrierWaitResult, CyclicBarrier};
pub use condition::Condition;
pub use latch::CountDownLatch;
pub use lock::{ExclusiveLock, LockGuard, Reentrancy};
pub use phased::PhasedBarrier;
pub use semaphore::{Semaphore, SemaphorePermit};
pub use state::StateCell;
pub use synchronizer::{Fairness, Synchronizer};
pub use wait::{CancelToken, Wait};
pub use waitqueue::{Mode, WaitQueue};
