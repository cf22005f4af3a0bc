//! Barrier with a changing set of parties.

use core::fmt;

use super::barrier::{Arrival, BarrierCore};
use super::wait::Wait;
use crate::SyncError;

/// A reusable barrier whose parties can join and leave between phases.
///
/// Parties [`register`](Self::register), then each phase every registered
/// party arrives once, either without waiting ([`arrive`](Self::arrive)),
/// waiting for the others ([`arrive_and_await_advance`]), or leaving for
/// good ([`arrive_and_deregister`]). When the last registered party leaves,
/// or the `on_advance` callback asks for it, the barrier terminates;
/// terminated and broken barriers both answer
/// [`SyncError::BrokenBarrier`] until [`reset`](Self::reset).
///
/// At most 65535 parties can be registered. Phase numbers wrap at 2^24.
///
/// [`arrive_and_await_advance`]: Self::arrive_and_await_advance
/// [`arrive_and_deregister`]: Self::arrive_and_deregister
pub struct PhasedBarrier {
    core: BarrierCore,
}

impl PhasedBarrier {
    /// Creates a barrier with `parties` registered parties. Zero is
    /// allowed; parties can register later.
    pub fn new(parties: u16) -> Self {
        Self {
            core: BarrierCore::new(parties, None),
        }
    }

    /// Creates a barrier that calls `on_advance(phase, registered)` on the
    /// last arriving party of every phase, before anyone is released.
    ///
    /// Returning `true` terminates the barrier instead of opening the next
    /// phase.
    pub fn with_on_advance(
        parties: u16,
        on_advance: impl FnMut(u32, u16) -> bool + Send + 'static,
    ) -> Self {
        Self {
            core: BarrierCore::new(parties, Some(Box::new(on_advance))),
        }
    }

    /// Adds one party. Returns the phase it joins.
    ///
    /// # Errors
    ///
    /// [`SyncError::BrokenBarrier`] on a broken or terminated barrier,
    /// [`SyncError::IllegalState`] past the party limit.
    pub fn register(&self) -> Result<u32, SyncError> {
        self.core.register(1)
    }

    /// Adds `parties` parties at once. Returns the phase they join.
    ///
    /// # Errors
    ///
    /// As for [`register`](Self::register).
    pub fn bulk_register(&self, parties: u16) -> Result<u32, SyncError> {
        self.core.register(parties)
    }

    /// Arrives without waiting. Returns the phase arrived in.
    ///
    /// # Errors
    ///
    /// [`SyncError::BrokenBarrier`] on a broken or terminated barrier,
    /// [`SyncError::IllegalState`] if every registered party has already
    /// arrived (or none is registered).
    pub fn arrive(&self) -> Result<u32, SyncError> {
        self.core.arrive(false).map(arrival_phase)
    }

    /// Arrives and leaves. Returns the phase arrived in.
    ///
    /// # Errors
    ///
    /// As for [`arrive`](Self::arrive).
    pub fn arrive_and_deregister(&self) -> Result<u32, SyncError> {
        self.core.arrive(true).map(arrival_phase)
    }

    /// Arrives and blocks until the phase advances. Returns the new phase.
    ///
    /// # Errors
    ///
    /// As for [`arrive`](Self::arrive).
    pub fn arrive_and_await_advance(&self) -> Result<u32, SyncError> {
        self.arrive_and_await_advance_with(&Wait::forever())
    }

    /// Like [`arrive_and_await_advance`](Self::arrive_and_await_advance),
    /// giving up as `wait` directs.
    ///
    /// # Errors
    ///
    /// Also [`SyncError::TimedOut`] or [`SyncError::Cancelled`] for the
    /// caller that gave up; that breaks the barrier for everyone else.
    pub fn arrive_and_await_advance_with(&self, wait: &Wait<'_>) -> Result<u32, SyncError> {
        match self.core.arrive(false)? {
            Arrival::Tripped { next, .. } => Ok(next),
            Arrival::Pending { phase, epoch, .. } => self.core.await_advance(phase, epoch, wait),
        }
    }

    /// Blocks until the barrier leaves `phase`, without arriving. Returns at
    /// once if it already has.
    ///
    /// # Errors
    ///
    /// [`SyncError::BrokenBarrier`] if the barrier is or becomes broken.
    pub fn await_advance(&self, phase: u32) -> Result<u32, SyncError> {
        self.await_advance_with(phase, &Wait::forever())
    }

    /// Like [`await_advance`](Self::await_advance), giving up as `wait`
    /// directs.
    ///
    /// # Errors
    ///
    /// Also [`SyncError::TimedOut`] or [`SyncError::Cancelled`].
    pub fn await_advance_with(&self, phase: u32, wait: &Wait<'_>) -> Result<u32, SyncError> {
        let word = self.core.word();
        if word.is_broken() {
            return Err(SyncError::BrokenBarrier);
        }
        if word.phase() != phase {
            return Ok(word.phase());
        }
        self.core.await_advance(phase, word.epoch(), wait)
    }

    /// Starts over at phase 0 with the current registrations. Waiters fail
    /// with [`SyncError::BrokenBarrier`].
    pub fn reset(&self) {
        self.core.reset();
    }

    /// The current phase.
    pub fn phase(&self) -> u32 {
        self.core.word().phase()
    }

    /// Number of registered parties.
    pub fn registered_parties(&self) -> u16 {
        self.core.word().parties()
    }

    /// Number of parties that arrived in the current phase.
    pub fn arrived_parties(&self) -> u16 {
        let word = self.core.word();
        word.parties() - word.unarrived()
    }

    /// Number of parties yet to arrive in the current phase.
    pub fn unarrived_parties(&self) -> u16 {
        self.core.word().unarrived()
    }

    /// Returns `true` once the barrier is broken or its last party has
    /// deregistered.
    pub fn is_terminated(&self) -> bool {
        self.core.word().is_broken()
    }
}

fn arrival_phase(arrival: Arrival) -> u32 {
    match arrival {
        Arrival::Pending { phase, .. } | Arrival::Tripped { phase, .. } => phase,
    }
}

impl fmt::Debug for PhasedBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhasedBarrier")
            .field("state", &self.core.word())
            .field("parked", &self.core.waiters())
            .finish()
    }
}
