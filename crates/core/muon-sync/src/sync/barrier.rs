//! Cyclic barrier, and the phase-word core it shares with
//! [`PhasedBarrier`](super::PhasedBarrier).
//!
//! ## State word layout
//!
//! ```text
//!  63   62    61..56   55........32   31.....16   15......0
//! +----+----+--------+-------------+-----------+-----------+
//! | BR | TR | epoch  |    phase    |  parties  | unarrived |
//! +----+----+--------+-------------+-----------+-----------+
//! ```
//!
//! - `unarrived`: parties that have not arrived in the current phase.
//! - `parties`: registered parties; `unarrived` is reset to it on advance.
//! - `phase`: completed trips, modulo 2^24.
//! - `epoch`: bumped by every reset so waiters from before a reset can tell
//!   that the phase they waited on is gone, even if it has the same number.
//! - `TR` (tripping): the last party arrived and is running the callback.
//!   Nobody but that party changes the word until the bit clears.
//! - `BR` (broken): absorbing until reset. Also marks a phased barrier whose
//!   last party deregistered.
//!
//! Arrivals decrement `unarrived` by CAS. The arrival that takes it to zero
//! sets `TR`, runs the callback, then stores the next phase and wakes every
//! waiter. Waiters block in shared mode until the word shows another phase,
//! another epoch or the broken bit.

use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use super::state::StateCell;
use super::synchronizer::Synchronizer;
use super::wait::Wait;
use crate::SyncError;
use crate::cell::TripCell;

/// A decoded state word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct PhaseWord(u64);

impl PhaseWord {
    const UNARRIVED_MASK: u64 = 0xFFFF;
    const PARTIES_SHIFT: u32 = 16;
    const PHASE_SHIFT: u32 = 32;
    const PHASE_MASK: u64 = 0xFF_FFFF;
    const EPOCH_SHIFT: u32 = 56;
    const EPOCH_MASK: u64 = 0x3F;
    const TRIPPING: u64 = 1 << 62;
    const BROKEN: u64 = 1 << 63;

    /// A fresh phase with every party still to arrive.
    pub(crate) fn open(phase: u32, parties: u16, epoch: u8) -> Self {
        Self(
            u64::from(parties)
                | (u64::from(parties) << Self::PARTIES_SHIFT)
                | ((u64::from(phase) & Self::PHASE_MASK) << Self::PHASE_SHIFT)
                | ((u64::from(epoch) & Self::EPOCH_MASK) << Self::EPOCH_SHIFT),
        )
    }

    pub(crate) fn load(state: &StateCell) -> Self {
        Self::from_state(state.read())
    }

    #[allow(clippy::cast_sign_loss)]
    pub(crate) const fn from_state(raw: i64) -> Self {
        Self(raw as u64)
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) const fn to_state(self) -> i64 {
        self.0 as i64
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn unarrived(self) -> u16 {
        (self.0 & Self::UNARRIVED_MASK) as u16
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn parties(self) -> u16 {
        ((self.0 >> Self::PARTIES_SHIFT) & Self::UNARRIVED_MASK) as u16
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn phase(self) -> u32 {
        ((self.0 >> Self::PHASE_SHIFT) & Self::PHASE_MASK) as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn epoch(self) -> u8 {
        ((self.0 >> Self::EPOCH_SHIFT) & Self::EPOCH_MASK) as u8
    }

    pub(crate) const fn is_tripping(self) -> bool {
        self.0 & Self::TRIPPING != 0
    }

    pub(crate) const fn is_broken(self) -> bool {
        self.0 & Self::BROKEN != 0
    }

    fn with_counts(self, parties: u16, unarrived: u16) -> Self {
        let counts = Self::UNARRIVED_MASK | (Self::UNARRIVED_MASK << Self::PARTIES_SHIFT);
        Self(
            (self.0 & !counts)
                | (u64::from(parties) << Self::PARTIES_SHIFT)
                | u64::from(unarrived),
        )
    }

    const fn tripping(self) -> Self {
        Self(self.0 | Self::TRIPPING)
    }

    const fn broken(self) -> Self {
        Self((self.0 | Self::BROKEN) & !Self::TRIPPING)
    }

    /// The phase after `phase`, wrapping at 2^24.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn next_phase(phase: u32) -> u32 {
        ((u64::from(phase) + 1) & Self::PHASE_MASK) as u32
    }

    /// The epoch after `epoch`, wrapping at 2^6.
    #[allow(clippy::cast_possible_truncation)]
    fn next_epoch(epoch: u8) -> u8 {
        ((u64::from(epoch) + 1) & Self::EPOCH_MASK) as u8
    }
}

impl fmt::Debug for PhaseWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseWord")
            .field("phase", &self.phase())
            .field("parties", &self.parties())
            .field("unarrived", &self.unarrived())
            .field("epoch", &self.epoch())
            .field("tripping", &self.is_tripping())
            .field("broken", &self.is_broken())
            .finish()
    }
}

/// Runs once per trip with the completed phase and the parties registered
/// for the next one. Returning `true` terminates the barrier.
pub(crate) type TripAction = Box<dyn FnMut(u32, u16) -> bool + Send>;

/// What one arrival did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arrival {
    /// Others still have to arrive in `phase`. `index` is how many.
    Pending { phase: u32, epoch: u8, index: u16 },
    /// This arrival completed `phase`; the barrier now stands at `next`.
    Tripped { phase: u32, next: u32 },
}

/// The phase machine shared by both barrier types.
pub(crate) struct BarrierCore {
    sync: Synchronizer,
    action: TripCell<Option<TripAction>>,
}

impl BarrierCore {
    pub(crate) fn new(parties: u16, action: Option<TripAction>) -> Self {
        Self {
            sync: Synchronizer::new(PhaseWord::open(0, parties, 0).to_state()),
            action: TripCell::new(action),
        }
    }

    pub(crate) fn word(&self) -> PhaseWord {
        PhaseWord::load(self.sync.state())
    }

    pub(crate) fn waiters(&self) -> usize {
        self.sync.waiters().len()
    }

    /// Records one arrival, optionally also leaving the barrier.
    ///
    /// The arrival that completes the phase runs the trip before returning.
    pub(crate) fn arrive(&self, deregister: bool) -> Result<Arrival, SyncError> {
        let state = self.sync.state();
        loop {
            let raw = state.read();
            let word = PhaseWord::from_state(raw);
            if word.is_broken() {
                return Err(SyncError::BrokenBarrier);
            }
            if word.is_tripping() {
                self.await_change(raw);
                continue;
            }
            if word.unarrived() == 0 {
                crate::sync_debug!("arrival at a barrier with no unarrived parties");
                return Err(SyncError::IllegalState);
            }
            let unarrived = word.unarrived() - 1;
            let parties = if deregister {
                word.parties() - 1
            } else {
                word.parties()
            };
            let mut next = word.with_counts(parties, unarrived);
            if unarrived == 0 {
                next = next.tripping();
            }
            if !state.compare_and_set(raw, next.to_state()) {
                continue;
            }
            if unarrived > 0 {
                return Ok(Arrival::Pending {
                    phase: word.phase(),
                    epoch: word.epoch(),
                    index: unarrived,
                });
            }
            return Ok(Arrival::Tripped {
                phase: word.phase(),
                next: self.trip(next),
            });
        }
    }

    /// Completes a phase. Only the party that set the tripping bit calls
    /// this.
    fn trip(&self, tripping: PhaseWord) -> u32 {
        let phase = tripping.phase();
        let parties = tripping.parties();
        // SAFETY: the tripping bit is set, and only the party that set it
        // reaches this point; no other trip can start until it clears.
        let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
            self.action
                .with_mut(|action| action.as_mut().is_some_and(|action| action(phase, parties)))
        }));
        let terminate = match outcome {
            Ok(terminate) => terminate,
            Err(panic) => {
                crate::sync_error!("barrier action panicked in phase {phase}; barrier broken");
                self.sync.state().set(tripping.broken().to_state());
                self.sync.wake_all();
                resume_unwind(panic);
            }
        };

        let next_phase = PhaseWord::next_phase(phase);
        let mut next = PhaseWord::open(next_phase, parties, tripping.epoch());
        if parties == 0 || terminate {
            next = next.broken();
            crate::sync_trace!("barrier terminated after phase {phase}");
        } else {
            crate::sync_trace!("barrier advanced to phase {next_phase} with {parties} parties");
        }
        // Nobody else writes while the tripping bit is set.
        self.sync.state().set(next.to_state());
        self.sync.wake_all();
        next_phase
    }

    /// Blocks until the barrier leaves `phase` of `epoch`, returning the
    /// phase it reached.
    ///
    /// A waiter that gives up breaks the barrier if the phase is still
    /// pending, so every other waiter fails too.
    pub(crate) fn await_advance(
        &self,
        phase: u32,
        epoch: u8,
        wait: &Wait<'_>,
    ) -> Result<u32, SyncError> {
        let advanced = |state: &StateCell| {
            let word = PhaseWord::load(state);
            let moved = word.epoch() != epoch
                || word.is_broken()
                || (!word.is_tripping() && word.phase() != phase);
            if moved { 0 } else { -1 }
        };
        let Err(err) = self.sync.acquire_shared(wait, advanced) else {
            return Self::classify(self.word(), phase, epoch);
        };

        let state = self.sync.state();
        loop {
            let raw = state.read();
            let word = PhaseWord::from_state(raw);
            if word.is_tripping() {
                // Too late to give up: the phase is completing.
                self.await_change(raw);
                continue;
            }
            if word.epoch() != epoch || word.is_broken() || word.phase() != phase {
                return Self::classify(word, phase, epoch);
            }
            if state.compare_and_set(raw, word.broken().to_state()) {
                crate::sync_warn!("barrier broken in phase {phase}: a waiter gave up ({err})");
                self.sync.wake_all();
                return Err(err);
            }
        }
    }

    fn classify(word: PhaseWord, phase: u32, epoch: u8) -> Result<u32, SyncError> {
        if word.epoch() != epoch {
            Err(SyncError::BrokenBarrier)
        } else if word.phase() != phase {
            Ok(word.phase())
        } else {
            Err(SyncError::BrokenBarrier)
        }
    }

    /// Blocks until the state word differs from `raw`. Used to sit out a
    /// trip in progress.
    fn await_change(&self, raw: i64) {
        // An unbounded wait cannot abort.
        let _ = self
            .sync
            .acquire_shared(&Wait::forever(), |state| if state.read() == raw { -1 } else { 0 });
    }

    /// Adds `n` parties to the current phase. Returns the phase joined.
    pub(crate) fn register(&self, n: u16) -> Result<u32, SyncError> {
        let state = self.sync.state();
        loop {
            let raw = state.read();
            let word = PhaseWord::from_state(raw);
            if word.is_broken() {
                return Err(SyncError::BrokenBarrier);
            }
            if word.is_tripping() {
                self.await_change(raw);
                continue;
            }
            let (Some(parties), Some(unarrived)) = (
                word.parties().checked_add(n),
                word.unarrived().checked_add(n),
            ) else {
                crate::sync_debug!("barrier party limit exceeded registering {n} more");
                return Err(SyncError::IllegalState);
            };
            if state.compare_and_set(raw, word.with_counts(parties, unarrived).to_state()) {
                return Ok(word.phase());
            }
        }
    }

    /// Starts over at phase 0 in a new epoch. Current waiters fail with
    /// [`SyncError::BrokenBarrier`].
    pub(crate) fn reset(&self) {
        let state = self.sync.state();
        loop {
            let raw = state.read();
            let word = PhaseWord::from_state(raw);
            if word.is_tripping() {
                self.await_change(raw);
                continue;
            }
            let next = PhaseWord::open(0, word.parties(), PhaseWord::next_epoch(word.epoch()));
            if state.compare_and_set(raw, next.to_state()) {
                if self.sync.waiters().has_waiters() {
                    crate::sync_warn!("barrier reset with waiters in phase {}", word.phase());
                }
                self.sync.wake_all();
                return;
            }
        }
    }
}

/// Outcome of a successful [`CyclicBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    index: u16,
    phase: u32,
}

impl BarrierWaitResult {
    /// Arrival index: `parties - 1` for the first to arrive, `0` for the
    /// last.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The phase the barrier moved on to.
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Returns `true` for the one caller per phase that arrived last and ran
    /// the barrier action.
    pub fn is_leader(&self) -> bool {
        self.index == 0
    }
}

/// A reusable rendezvous for a fixed number of threads.
///
/// Each [`wait`](Self::wait) blocks until `parties` callers have arrived.
/// The last to arrive runs the optional action before anyone is released
/// and before any arrival for the next phase is accepted.
///
/// If a waiter times out or is cancelled, or the action panics, the barrier
/// breaks: every current and future `wait` fails with
/// [`SyncError::BrokenBarrier`] until [`reset`](Self::reset).
pub struct CyclicBarrier {
    core: BarrierCore,
    parties: u16,
}

impl CyclicBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn new(parties: u16) -> Self {
        Self::build(parties, None)
    }

    /// Creates a barrier that runs `action` on the last arriving thread of
    /// every phase.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn with_action(parties: u16, mut action: impl FnMut() + Send + 'static) -> Self {
        Self::build(
            parties,
            Some(Box::new(move |_, _| {
                action();
                false
            })),
        )
    }

    fn build(parties: u16, action: Option<TripAction>) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Self {
            core: BarrierCore::new(parties, action),
            parties,
        }
    }

    /// Arrives and blocks until every party has arrived.
    ///
    /// # Errors
    ///
    /// [`SyncError::BrokenBarrier`] if the barrier is or becomes broken, or
    /// is reset while waiting.
    pub fn wait(&self) -> Result<BarrierWaitResult, SyncError> {
        self.wait_with(&Wait::forever())
    }

    /// Like [`wait`](Self::wait), giving up as `wait` directs.
    ///
    /// # Errors
    ///
    /// Also [`SyncError::TimedOut`] or [`SyncError::Cancelled`] for the
    /// caller that gave up; the barrier is broken for everyone else.
    pub fn wait_with(&self, wait: &Wait<'_>) -> Result<BarrierWaitResult, SyncError> {
        match self.core.arrive(false)? {
            Arrival::Tripped { next, .. } => Ok(BarrierWaitResult {
                index: 0,
                phase: next,
            }),
            Arrival::Pending {
                phase,
                epoch,
                index,
            } => {
                let phase = self.core.await_advance(phase, epoch, wait)?;
                Ok(BarrierWaitResult { index, phase })
            }
        }
    }

    /// Breaks the current phase for anyone waiting in it and starts again
    /// at phase 0.
    pub fn reset(&self) {
        self.core.reset();
    }

    /// Returns `true` if the barrier is broken.
    pub fn is_broken(&self) -> bool {
        self.core.word().is_broken()
    }

    /// Number of parties needed to trip.
    pub fn parties(&self) -> u16 {
        self.parties
    }

    /// Number of parties currently waiting in this phase.
    pub fn number_waiting(&self) -> u16 {
        let word = self.core.word();
        word.parties() - word.unarrived()
    }

    /// Completed trips since creation or the last reset, modulo 2^24.
    pub fn phase(&self) -> u32 {
        self.core.word().phase()
    }
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CyclicBarrier")
            .field("state", &self.core.word())
            .field("parked", &self.core.waiters())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::CancelToken;
    use crate::sync::test_util::wait_until;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn phase_word_fields() {
        let word = PhaseWord::open(0xFF_FFFF, 7, 0x3F);
        assert_eq!(word.phase(), 0xFF_FFFF);
        assert_eq!(word.parties(), 7);
        assert_eq!(word.unarrived(), 7);
        assert_eq!(word.epoch(), 0x3F);
        assert!(!word.is_tripping());
        assert!(!word.is_broken());

        let broken = word.tripping().broken();
        assert!(broken.is_broken());
        assert!(!broken.is_tripping());
        assert!(broken.to_state() < 0);
        assert_eq!(PhaseWord::from_state(broken.to_state()), broken);

        assert_eq!(PhaseWord::next_phase(0xFF_FFFF), 0);
        assert_eq!(PhaseWord::next_epoch(0x3F), 0);
        let recounted = word.with_counts(3, 1);
        assert_eq!((recounted.parties(), recounted.unarrived()), (3, 1));
        assert_eq!(recounted.phase(), word.phase());
    }

    #[test]
    #[should_panic(expected = "at least one party")]
    fn zero_parties_panics() {
        let _ = CyclicBarrier::new(0);
    }

    #[test]
    fn single_party_trips_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let barrier = CyclicBarrier::with_action(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let first = barrier.wait().unwrap();
        assert!(first.is_leader());
        assert_eq!(first.phase(), 1);
        assert_eq!(barrier.wait().unwrap().phase(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn all_parties_released_together() {
        let barrier = Arc::new(CyclicBarrier::new(3));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || barrier.wait())
            })
            .collect();
        assert!(wait_until(|| barrier.number_waiting() == 2));
        let last = barrier.wait().unwrap();
        assert!(last.is_leader());

        let mut indices: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .map(|r| {
                assert_eq!(r.phase(), 1);
                r.index()
            })
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, [1, 2]);
        assert_eq!(barrier.number_waiting(), 0);
    }

    #[test]
    fn timeout_breaks_the_barrier() {
        let barrier = Arc::new(CyclicBarrier::new(3));
        let patient = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || barrier.wait())
        };
        assert!(wait_until(|| barrier.number_waiting() == 1));

        let result = barrier.wait_with(&Wait::timeout(Duration::from_millis(20)));
        assert_eq!(result, Err(SyncError::TimedOut));
        assert_eq!(patient.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert!(barrier.is_broken());
        assert_eq!(barrier.wait(), Err(SyncError::BrokenBarrier));

        barrier.reset();
        assert!(!barrier.is_broken());
        assert_eq!(barrier.phase(), 0);
        assert_eq!(barrier.number_waiting(), 0);
    }

    #[test]
    fn reset_fails_current_waiters() {
        let barrier = Arc::new(CyclicBarrier::new(2));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || barrier.wait())
        };
        assert!(wait_until(|| barrier.number_waiting() == 1));
        barrier.reset();
        assert_eq!(waiter.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert!(!barrier.is_broken());
    }

    #[test]
    fn panicking_action_breaks_and_propagates() {
        let barrier = CyclicBarrier::with_action(1, || panic!("action failed"));
        let outcome = catch_unwind(AssertUnwindSafe(|| barrier.wait()));
        assert!(outcome.is_err());
        assert!(barrier.is_broken());
        assert_eq!(barrier.wait(), Err(SyncError::BrokenBarrier));
    }

    #[test]
    fn cancelled_party_breaks_the_barrier() {
        let barrier = Arc::new(CyclicBarrier::new(3));
        let (tx, rx) = std::sync::mpsc::channel();
        let quitter = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let token = CancelToken::new();
                tx.send(token.clone()).unwrap();
                barrier.wait_with(&Wait::forever().cancellable(&token)).map(|_| ())
            })
        };
        let patient = {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || barrier.wait().map(|_| ()))
        };
        let token = rx.recv().unwrap();
        assert!(wait_until(|| barrier.number_waiting() == 2));

        token.cancel();
        assert_eq!(quitter.join().unwrap(), Err(SyncError::Cancelled));
        assert_eq!(patient.join().unwrap(), Err(SyncError::BrokenBarrier));
        assert!(barrier.is_broken());
    }
}
