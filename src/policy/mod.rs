//! Policy plugin interface (C6, spec §4.6).
//!
//! Generalizes the reference kernel's concrete, single-implementation
//! `Scheduler` struct into a trait two substitutable policies implement,
//! per Design Notes §9 ("two concrete policies must be substitutable
//! behind one consumer ... a capability interface ... selected at switch
//! time. State stays owned by each concrete policy's record").

pub mod priority;
pub mod round_robin;

use crate::error::Result;
use crate::hal::Platform;
use crate::preempt::PreemptionGate;
use crate::tcb::{TaskId, TaskTable};

/// What kind of ready structure a policy keeps (spec §4.6 capability
/// descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    SingleFifo,
    PriorityLevels,
}

/// Capability descriptor a policy advertises to the switch controller
/// (spec §4.6): "the switch controller consumes only this capability set
/// plus policy-specific extensions declared through a small
/// capability-descriptor table."
#[derive(Debug, Clone, Copy)]
pub struct PolicyCapabilities {
    pub queue_kind: QueueKind,
    pub supports_inheritance: bool,
    pub supports_aging: bool,
}

/// Performance counters a policy reports; aggregated by the metrics
/// collector (C9).
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyStats {
    pub starvation_count: u64,
    pub aging_adjustments: u64,
}

/// Uniform operations shared by the round-robin and priority policies
/// (spec §4.6: "init, start, stop, schedule, add_task, remove_task, tick,
/// reset, get_stats").
///
/// `enqueue`/`remove`/`select_next` take `&mut TaskTable` because priority
/// inheritance and aging must read and update a task's base/effective
/// priority, which lives centrally on the [`crate::tcb::Tcb`] (spec §3:
/// "Effective priority ≤ base priority" is a table-wide invariant, not a
/// per-queue one). The switch controller's re-enqueue-then-select
/// composition (spec §4.4, §8 scenario 2) lives in [`crate::kernel`], not
/// in `select_next` itself - `select_next` only pops.
pub trait SchedulerPolicy<P: Platform> {
    fn capabilities(&self) -> PolicyCapabilities;

    fn init(&mut self, platform: &P);

    fn start(&mut self);

    fn stop(&mut self);

    fn reset(&mut self, tasks: &mut TaskTable);

    /// Adds a Ready task to this policy's structures (spec §4.6
    /// `add_task`).
    fn enqueue(&mut self, platform: &P, tasks: &mut TaskTable, task: TaskId) -> Result<()>;

    /// Removes a task wherever it sits in this policy's structures (spec
    /// §4.6 `remove_task`). Returns whether it was found.
    fn remove(&mut self, tasks: &mut TaskTable, task: TaskId) -> bool;

    /// Pops the next task to run, or `None` if nothing is Ready (spec §4.6
    /// `schedule`).
    fn select_next(&mut self, platform: &P, tasks: &mut TaskTable) -> Option<TaskId>;

    /// Timer-tick hook (spec §4.6 `tick`): advances time-slice/aging
    /// bookkeeping and may request a reschedule through `gate`.
    fn tick(&mut self, platform: &P, tasks: &mut TaskTable, gate: &mut PreemptionGate<'_, P>);

    fn stats(&self) -> PolicyStats;

    /// Bytes needed by [`Self::save_state`] (spec §4.6: "a policy
    /// advertises its state-preservation size so the controller can
    /// reserve buffer space").
    fn state_size(&self) -> usize;

    fn save_state(&self, tasks: &TaskTable, buf: &mut [u8]) -> usize;

    fn restore_state(&mut self, tasks: &mut TaskTable, buf: &[u8]);

    /// Drains every Ready task out of this policy, in its own dequeue
    /// order, into `out`. Destructive - used by the switch controller
    /// during `MigratingTasks`. Returns the number of tasks written.
    fn drain_into(&mut self, tasks: &mut TaskTable, out: &mut [TaskId]) -> usize;
}
