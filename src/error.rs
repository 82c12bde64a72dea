//! Error taxonomy shared by every scheduler module (spec §7).
//!
//! Every fallible operation returns [`Result`]. Invariant breaches are not
//! representable as a `Result` value at all: they are unrecoverable for a
//! safety-critical kernel and go through [`fatal`], which never returns.

use core::fmt;

use crate::hal::Platform;

/// Outcome of a recoverable scheduler operation.
pub type Result<T> = core::result::Result<T, Error>;

/// Recoverable error kinds (spec §7). `Fatal` is deliberately not a variant
/// here - see [`fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Out-of-range priority, null/unknown reference, or a state-machine
    /// illegal request.
    InvalidArgument,
    /// Operation attempted before the owning component was initialized.
    NotInitialized,
    /// Operation attempted on an already-initialized component.
    AlreadyInitialized,
    /// Task or inheritance record absent.
    NotFound,
    /// Forbidden because a switch is already in progress.
    Busy,
    /// Node pool, inheritance table, or state-preservation buffer is full.
    ResourceExhausted,
    /// Min-switch-interval or budget policy refused a non-forced request.
    PolicyViolation,
    /// Operation exceeded its declared deadline (still completes; recorded).
    Timeout,
    /// The active policy does not implement the requested capability.
    NotSupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::InvalidArgument => "invalid argument",
            Error::NotInitialized => "not initialized",
            Error::AlreadyInitialized => "already initialized",
            Error::NotFound => "not found",
            Error::Busy => "busy",
            Error::ResourceExhausted => "resource exhausted",
            Error::PolicyViolation => "policy violation",
            Error::Timeout => "timeout",
            Error::NotSupported => "not supported",
        };
        f.write_str(s)
    }
}

/// Diagnostic code preserved across a fatal halt (spec §7, §9). Values are
/// stable across builds so an external diagnostic tool can decode them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FatalCode {
    /// A queue's integrity tag did not match before traversal.
    QueueIntegrity = 1,
    /// A priority bitmap bit disagreed with its queue's occupancy.
    BitmapMismatch = 2,
    /// `PreemptionGate::enable` called with `disable_count == 0`.
    PreemptionUnderflow = 3,
    /// Nested preemption-disable reached `max_preemption_depth`.
    PreemptionDepthExceeded = 4,
    /// A switch rollback could not restore prior state.
    UnrecoverableRollback = 5,
    /// The inheritance table's occupancy bitmap disagreed with its records.
    InheritanceTableCorrupt = 6,
}

/// Halts the system after handing the diagnostic code to the trace
/// collaborator (spec §7: "on Fatal, the system enters a safe halt with a
/// diagnostic code preserved ... exposed to the external diagnostic
/// service"). Never returns.
#[cold]
pub fn fatal<P: Platform>(platform: &P, code: FatalCode) -> ! {
    platform.fatal(code as u32)
}
