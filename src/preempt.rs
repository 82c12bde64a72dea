//! Preemption gate (C3, spec §4.3).
//!
//! A direct implementation of the literal disable/enable nested-counter
//! contract spec §4.3 specifies, rather than the reference ecosystem's
//! heavier `tokenlock`-backed RAII critical-section cell: this crate's gate
//! is a plain record threaded explicitly through the kernel, matching
//! Design Notes §9's "a single owned-by-kernel-startup record passed
//! explicitly."

use crate::error::{fatal, FatalCode};
use crate::hal::Platform;

/// Process-wide preemption-disable record (spec §3, §4.3).
pub struct PreemptionGate<'p, P: Platform> {
    platform: &'p P,
    disable_count: u32,
    saved_interrupt_mask: u32,
    disable_timestamp_us: u64,
    deferred_switch: bool,
    max_depth: u32,
}

impl<'p, P: Platform> PreemptionGate<'p, P> {
    pub fn new(platform: &'p P, max_depth: u32) -> Self {
        Self {
            platform,
            disable_count: 0,
            saved_interrupt_mask: 0,
            disable_timestamp_us: 0,
            deferred_switch: false,
            max_depth,
        }
    }

    /// Raises the interrupt mask and increments the nesting counter. On the
    /// 0→1 transition, saves the previous mask and a timestamp. Nesting to
    /// `max_depth` is a fatal assertion (spec §8 boundary behavior: "at
    /// `max_depth - 1` it succeeds").
    pub fn disable(&mut self) {
        if self.disable_count + 1 >= self.max_depth {
            fatal(self.platform, FatalCode::PreemptionDepthExceeded);
        }
        let mask = self.platform.global_disable();
        if self.disable_count == 0 {
            self.saved_interrupt_mask = mask;
            self.disable_timestamp_us = self.platform.microseconds();
        }
        self.disable_count += 1;
    }

    /// Decrements the nesting counter. On the 1→0 transition, restores the
    /// mask and, if a switch was deferred while disabled, requests it.
    /// Underflow (`disable_count == 0`) is a fatal assertion.
    pub fn enable(&mut self) {
        if self.disable_count == 0 {
            fatal(self.platform, FatalCode::PreemptionUnderflow);
        }
        self.disable_count -= 1;
        if self.disable_count == 0 {
            self.platform.global_restore(self.saved_interrupt_mask);
            if self.deferred_switch {
                self.deferred_switch = false;
                self.platform.request_pending_switch();
            }
        }
    }

    /// Any attempt to invoke the scheduler while disabled is converted into
    /// a deferred switch honored at the matching `enable()` (spec §4.3).
    pub fn request_switch_while_disabled(&mut self) {
        if self.disable_count > 0 {
            self.deferred_switch = true;
        } else {
            self.platform.request_pending_switch();
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disable_count > 0
    }

    pub fn depth(&self) -> u32 {
        self.disable_count
    }

    pub fn disable_timestamp_us(&self) -> u64 {
        self.disable_timestamp_us
    }

    pub fn has_deferred_switch(&self) -> bool {
        self.deferred_switch
    }
}
