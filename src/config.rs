//! Compile-time configuration envelope (spec §6).
//!
//! Generalizes the reference kernel's `console-pl011`/`console-null`
//! compile-time component composition from "pick a component" to "pick the
//! numeric envelope the statically-sized pools are built to." `Config` is a
//! plain value constructible in a `const` context; it never allocates and
//! carries no trait objects.

use crate::error::{Error, Result};

/// Priority levels are hard-sized at compile time: the bitmap is 8 words of
/// 32 bits (spec §3, §4.1) and cannot represent more than this many levels.
pub const MAX_PRIORITY_LEVELS: usize = 256;

/// Fixed capacity of every node pool (spec §3: "fixed capacity, e.g. 256").
pub const MAX_POOL_NODES: usize = 256;

/// Fixed capacity of the task table owned by the kernel.
pub const MAX_TASKS: usize = 256;

/// Fixed capacity of the inheritance-record table.
pub const MAX_INHERITANCE_RECORDS: usize = 32;

/// Fixed depth of the switch-history ring (spec §4.7: "fixed depth (≥32)").
pub const MAX_SWITCH_HISTORY: usize = 32;

/// The numeric envelope named in spec §6: `{max_tasks, priority_levels,
/// node_pool_size, inheritance_table_size, aging_period_ms,
/// aging_threshold_ms, aging_boost, starvation_threshold_ms,
/// default_time_slice_ms, switch_history_size, min_switch_interval_ms,
/// max_switch_time_us, max_preemption_depth}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub max_tasks: usize,
    pub priority_levels: usize,
    pub node_pool_size: usize,
    pub inheritance_table_size: usize,
    pub aging_period_ms: u32,
    pub aging_threshold_ms: u32,
    pub aging_boost: u8,
    pub starvation_threshold_ms: u32,
    pub default_time_slice_ms: u32,
    pub switch_history_size: usize,
    pub min_switch_interval_ms: u64,
    pub max_switch_time_us: u32,
    pub max_preemption_depth: u32,
}

impl Config {
    /// A reference configuration matching the defaults named throughout
    /// spec §4: 10 ms round-robin slice, 100 ms aging period, 100 ms
    /// minimum switch interval, 1000 μs switch budget.
    pub const fn reference() -> Self {
        Self {
            max_tasks: MAX_TASKS,
            priority_levels: MAX_PRIORITY_LEVELS,
            node_pool_size: MAX_POOL_NODES,
            inheritance_table_size: MAX_INHERITANCE_RECORDS,
            aging_period_ms: 100,
            aging_threshold_ms: 5_000,
            aging_boost: 20,
            starvation_threshold_ms: 5_000,
            default_time_slice_ms: 10,
            switch_history_size: MAX_SWITCH_HISTORY,
            min_switch_interval_ms: 100,
            max_switch_time_us: 1_000,
            max_preemption_depth: 16,
        }
    }

    /// Constructs a configuration from caller-supplied values. `const fn` so
    /// a board-support crate can build one as a `static`.
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        max_tasks: usize,
        priority_levels: usize,
        node_pool_size: usize,
        inheritance_table_size: usize,
        aging_period_ms: u32,
        aging_threshold_ms: u32,
        aging_boost: u8,
        starvation_threshold_ms: u32,
        default_time_slice_ms: u32,
        switch_history_size: usize,
        min_switch_interval_ms: u64,
        max_switch_time_us: u32,
        max_preemption_depth: u32,
    ) -> Self {
        Self {
            max_tasks,
            priority_levels,
            node_pool_size,
            inheritance_table_size,
            aging_period_ms,
            aging_threshold_ms,
            aging_boost,
            starvation_threshold_ms,
            default_time_slice_ms,
            switch_history_size,
            min_switch_interval_ms,
            max_switch_time_us,
            max_preemption_depth,
        }
    }

    /// Validates the envelope against the compiled-in maxima. Caller input
    /// at a system boundary, so this returns an error rather than asserting.
    pub fn validate(&self) -> Result<()> {
        if self.max_tasks == 0 || self.max_tasks > MAX_TASKS {
            return Err(Error::InvalidArgument);
        }
        if self.priority_levels == 0 || self.priority_levels > MAX_PRIORITY_LEVELS {
            return Err(Error::InvalidArgument);
        }
        if self.node_pool_size == 0 || self.node_pool_size > MAX_POOL_NODES {
            return Err(Error::InvalidArgument);
        }
        if self.inheritance_table_size > MAX_INHERITANCE_RECORDS {
            return Err(Error::InvalidArgument);
        }
        if self.switch_history_size == 0 || self.switch_history_size > MAX_SWITCH_HISTORY {
            return Err(Error::InvalidArgument);
        }
        if self.max_preemption_depth == 0 {
            return Err(Error::InvalidArgument);
        }
        if self.aging_boost == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::reference()
    }
}
