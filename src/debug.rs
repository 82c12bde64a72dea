//! Logging macros layered over the [`crate::hal::Trace`] collaborator
//! (spec §6, SPEC_FULL §A.2).
//!
//! Generalizes the reference kernel's `kinfo!`/`kwarn!`/`kerror!` macro
//! family: the level gate (`LogLevel`, `current_log_level`,
//! `should_log`) is unchanged in shape, but the sink is no longer a
//! hard-wired UART console - it is whatever external collaborator
//! implements `Trace`, registered once at startup via [`init_trace_sink`].
//! The fatal-halt path never goes through this module; it calls
//! `Trace::fatal` directly (see [`crate::error::fatal`]).

use core::fmt;

use spin::Once;

use crate::hal::Trace;

static TRACE_SINK: Once<&'static dyn Trace> = Once::new();

/// Registers the trace sink used by the logging macros. Must be called
/// once, before any interrupts are unmasked (Design Notes §9: "a single
/// owned-by-kernel-startup record ... initialization happens once before
/// any interrupts are unmasked").
pub fn init_trace_sink(sink: &'static dyn Trace) {
    TRACE_SINK.call_once(|| sink);
}

#[doc(hidden)]
pub fn emit(args: fmt::Arguments<'_>) {
    if let Some(sink) = TRACE_SINK.get() {
        sink.event(args);
    }
}

/// Log levels, ordered least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/// Current log level, selected at compile time by Cargo feature.
#[inline(always)]
pub const fn current_log_level() -> LogLevel {
    #[cfg(feature = "log-trace")]
    return LogLevel::Trace;

    #[cfg(all(feature = "log-debug", not(feature = "log-trace")))]
    return LogLevel::Debug;

    #[cfg(all(
        feature = "log-info",
        not(any(feature = "log-debug", feature = "log-trace"))
    ))]
    return LogLevel::Info;

    #[cfg(all(
        feature = "log-warn",
        not(any(feature = "log-info", feature = "log-debug", feature = "log-trace"))
    ))]
    return LogLevel::Warn;

    #[cfg(all(
        feature = "log-error",
        not(any(
            feature = "log-warn",
            feature = "log-info",
            feature = "log-debug",
            feature = "log-trace"
        ))
    ))]
    return LogLevel::Error;

    #[cfg(not(any(
        feature = "log-error",
        feature = "log-warn",
        feature = "log-info",
        feature = "log-debug",
        feature = "log-trace"
    )))]
    return LogLevel::Info;
}

#[inline(always)]
pub const fn should_log(level: LogLevel) -> bool {
    level as u8 <= current_log_level() as u8
}

/// Log an ERROR-level event.
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Error) {
            $crate::debug::emit(format_args!($($arg)*));
        }
    });
}

/// Log a WARN-level event.
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Warn) {
            $crate::debug::emit(format_args!($($arg)*));
        }
    });
}

/// Log an INFO-level event.
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Info) {
            $crate::debug::emit(format_args!($($arg)*));
        }
    });
}

/// Log a DEBUG-level event.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Debug) {
            $crate::debug::emit(format_args!($($arg)*));
        }
    });
}

/// Log a TRACE-level event.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Trace) {
            $crate::debug::emit(format_args!($($arg)*));
        }
    });
}

/// Scheduler-internal verbose tracing, only compiled in when the
/// `trace-scheduler` feature is enabled (generalizes the reference
/// kernel's `debug-scheduler` feature).
#[macro_export]
macro_rules! ksched_trace {
    ($($arg:tt)*) => ({
        #[cfg(feature = "trace-scheduler")]
        {
            $crate::debug::emit(format_args!($($arg)*));
        }
    });
}
