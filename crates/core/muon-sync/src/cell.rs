//! A cell whose accesses are serialized by an outside protocol.
//!
//! Barrier actions are `FnMut` closures stored next to the state word. Only
//! the thread that performs the last arrival of a phase ever touches the
//! action, and the state word guarantees there is exactly one such thread at
//! a time. [`TripCell`] lets that protocol, rather than a lock, provide the
//! exclusion.

use core::cell::UnsafeCell;

/// An `UnsafeCell` wrapper that implements `Send` and `Sync`.
///
/// # Safety
///
/// Callers of [`with_mut`](TripCell::with_mut) must guarantee that no other
/// access to the contents is in progress.
#[repr(transparent)]
pub struct TripCell<T>(UnsafeCell<T>);

// SAFETY: the contents are only reached through `with_mut`, whose callers
// guarantee exclusive access. `T: Send` is required because successive
// exclusive accesses may happen on different threads.
unsafe impl<T: Send> Send for TripCell<T> {}
// SAFETY: as above; shared references never expose `&T` concurrently.
unsafe impl<T: Send> Sync for TripCell<T> {}

impl<T> TripCell<T> {
    /// Creates a new `TripCell` wrapping `value`.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Runs `f` with exclusive access to the contents.
    ///
    /// # Safety
    ///
    /// No other call to `with_mut` on this cell may be running, on any
    /// thread, for the duration of the call.
    #[inline]
    pub unsafe fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: exclusivity is guaranteed by the caller.
        f(unsafe { &mut *self.0.get() })
    }
}
