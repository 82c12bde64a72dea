//! Contracts for the external collaborators the core consumes but does not
//! implement (spec §1, §6): board bring-up, the interrupt controller, the
//! free-running timer, and the trace/assert sink. A concrete board-support
//! crate implements these traits; this crate only calls through them.

/// Hardware interrupt-masking and pending-switch-request primitives.
pub trait InterruptController {
    /// Raises the global interrupt mask and returns the previous mask, so it
    /// can be restored verbatim by a matching [`Self::global_restore`].
    fn global_disable(&self) -> u32;

    /// Restores a previously captured mask.
    fn global_restore(&self, mask: u32);

    /// Sets the priority level of an interrupt line (NVIC-style).
    fn set_priority(&self, id: u32, level: u8);

    /// True if the caller is currently executing in exception context.
    fn is_in_interrupt(&self) -> bool;

    /// Sets the hardware pending-switch flag. On exit from the current
    /// exception, control transfers to the context-switch routine.
    fn request_pending_switch(&self);
}

/// Free-running timer providing monotonic timestamps.
pub trait TimerService {
    /// Monotonic tick count, 1 kHz.
    fn tick_count(&self) -> u64;

    /// Monotonic microsecond timestamp.
    fn microseconds(&self) -> u64;

    /// Free-running cycle counter; wraps.
    fn cycle_count(&self) -> u32;
}

/// Advisory trace events and the one-way fatal-halt path.
pub trait Trace {
    /// Advisory event; never called on the fatal path.
    fn event(&self, args: core::fmt::Arguments<'_>);

    /// Halts the system with a diagnostic code preserved for the external
    /// diagnostic service. Never returns.
    fn fatal(&self, code: u32) -> !;
}

/// Bundles the collaborators the scheduler core needs behind one generic
/// bound. Blanket-implemented for anything satisfying the three contracts
/// individually, so a board-support crate only implements those.
pub trait Platform: InterruptController + TimerService + Trace {}

impl<T> Platform for T where T: InterruptController + TimerService + Trace {}
