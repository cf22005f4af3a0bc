//! Checked preconditions for the queue's unsafe internals.
//!
//! The wait queue walks raw node pointers and relies on a single-consumer
//! protocol. [`assert_unsafe_precondition!`] guards the conditions that make
//! those accesses sound (a consumer slot is held, a pointer is non-null).
//!
//! | Build configuration | Result |
//! |---------------------|--------|
//! | Debug (`debug_assertions`) | Panics on failure |
//! | Release + `muon_hardened` cfg | Panics on failure |
//! | Release (default) | Compiled away (condition still type-checked) |

/// Checks a condition that must hold for the following `unsafe` code to be
/// sound.
///
/// Use `debug_assert!` for logic invariants whose violation is a bug but not
/// undefined behavior; use this macro when it would be undefined behavior.
///
/// ```ignore
/// assert_unsafe_precondition!(!node.is_null());
/// assert_unsafe_precondition!(self.is_consuming(), "queue consumer slot not held");
/// ```
#[macro_export]
macro_rules! assert_unsafe_precondition {
    ($cond:expr $(,)?) => {
        $crate::assert_unsafe_precondition!(
            $cond,
            "unsafe precondition violated: {}",
            stringify!($cond)
        )
    };
    ($cond:expr, $($arg:tt)+) => {
        #[cfg(any(debug_assertions, muon_hardened))]
        {
            if !$cond {
                panic!($($arg)+);
            }
        }
        #[cfg(not(any(debug_assertions, muon_hardened)))]
        {
            if false {
                let _ = $cond;
            }
        }
    };
}
