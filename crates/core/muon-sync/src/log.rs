//! Diagnostic log hook for the synchronizers.
//!
//! The crate never prints on its own. Embedders register a sink with
//! [`set_log_fn`] and optionally lower the noise with [`set_max_level`];
//! until then every [`sync_log!`] expands to a call into a no-op sink.
//!
//! The sink runs on whichever thread hit the event, sometimes between two
//! steps of a wait or release. It must not block on primitives from this
//! crate.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// Log levels, lower is more severe
// ---------------------------------------------------------------------------

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// A primitive entered a state its users did not ask for (panicking
    /// barrier action).
    Error = 0,
    /// Unexpected but recoverable condition (barrier broken).
    Warn = 1,
    /// High-level lifecycle messages.
    Info = 2,
    /// Misuse reported back to the caller (illegal release or signal).
    Debug = 3,
    /// Per-wait events: timeouts, cancellations, phase advances.
    Trace = 4,
}

impl LogLevel {
    /// Returns the human-readable name (fixed-width for aligned output).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            3 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().trim_end())
    }
}

// ---------------------------------------------------------------------------
// Sink registration
// ---------------------------------------------------------------------------

/// The signature of the global log sink.
pub type LogFn = fn(LogLevel, fmt::Arguments<'_>);

fn null_log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Trace as u8);

/// Registers the global log sink, replacing the previous one.
///
/// Uses `Release` ordering so subsequent loads see the new function.
pub fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

/// Drops every message less severe than `level` before it reaches the sink.
pub fn set_max_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns the current maximum level.
pub fn max_level() -> LogLevel {
    LogLevel::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Loads the current sink from the atomic pointer.
#[inline]
fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: only `null_log` and pointers produced from a `LogFn` by
    // `set_log_fn` are ever stored into LOG_FN.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

/// Implementation detail for [`sync_log!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level <= max_level() {
        load_log_fn()(level, args);
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Logs a message at the given level.
#[macro_export]
macro_rules! sync_log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, format_args!($($arg)*))
    };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! sync_error {
    ($($arg:tt)*) => { $crate::sync_log!($crate::log::LogLevel::Error, $($arg)*) };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! sync_warn {
    ($($arg:tt)*) => { $crate::sync_log!($crate::log::LogLevel::Warn, $($arg)*) };
}

/// Logs a debug-level message.
#[macro_export]
macro_rules! sync_debug {
    ($($arg:tt)*) => { $crate::sync_log!($crate::log::LogLevel::Debug, $($arg)*) };
}

/// Logs a trace-level message.
#[macro_export]
macro_rules! sync_trace {
    ($($arg:tt)*) => { $crate::sync_log!($crate::log::LogLevel::Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static SEEN: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(level: LogLevel, args: fmt::Arguments<'_>) {
        if level == LogLevel::Error && args.to_string() == "log-test message" {
            SEEN.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn level_names_are_fixed_width() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            assert_eq!(level.name().len(), 5);
        }
        assert_eq!(format!("{}", LogLevel::Warn), "WARN");
    }

    #[test]
    fn severity_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Trace);
    }

    #[test]
    fn registered_sink_receives_messages() {
        set_log_fn(counting_sink);
        crate::sync_error!("log-test {}", "message");
        assert!(SEEN.load(Ordering::SeqCst) >= 1);
    }
}
