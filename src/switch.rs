//! Switch controller (C7, spec §4.7): orchestrates a live replacement of
//! the active scheduling policy through a validated, phased state
//! machine with rollback.

use crate::config::{Config, MAX_POOL_NODES, MAX_SWITCH_HISTORY};
use crate::error::{Error, Result};
use crate::hal::Platform;
use crate::migration::{plan_migration, MigrationStrategy};
use crate::policy::priority::PriorityPolicy;
use crate::policy::round_robin::RoundRobinPolicy;
use crate::policy::SchedulerPolicy;
use crate::preempt::PreemptionGate;
use crate::tcb::{TaskId, TaskTable};

/// Which concrete policy is active. Spec §9 names this pattern directly:
/// "a capability interface (virtual dispatch via tagged variant or
/// trait/interface)" - a tagged variant over the two concrete policies,
/// rather than a trait object, since there are exactly two and no
/// allocator to box one behind `dyn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyId {
    RoundRobin,
    Priority,
}

/// Owns exactly one of the two concrete policies and dispatches the
/// uniform operations to whichever is active.
pub enum ActivePolicy {
    RoundRobin(RoundRobinPolicy),
    Priority(PriorityPolicy),
}

impl ActivePolicy {
    pub fn id(&self) -> PolicyId {
        match self {
            ActivePolicy::RoundRobin(_) => PolicyId::RoundRobin,
            ActivePolicy::Priority(_) => PolicyId::Priority,
        }
    }

    fn for_id(id: PolicyId, config: &Config) -> Self {
        match id {
            PolicyId::RoundRobin => ActivePolicy::RoundRobin(RoundRobinPolicy::new(config)),
            PolicyId::Priority => ActivePolicy::Priority(PriorityPolicy::new(config)),
        }
    }

    pub fn init<P: Platform>(&mut self, platform: &P) {
        match self {
            ActivePolicy::RoundRobin(p) => SchedulerPolicy::<P>::init(p, platform),
            ActivePolicy::Priority(p) => SchedulerPolicy::<P>::init(p, platform),
        }
    }

    pub fn start(&mut self) {
        match self {
            ActivePolicy::RoundRobin(p) => {
                <RoundRobinPolicy as SchedulerPolicy<NullPlatform>>::start(p)
            }
            ActivePolicy::Priority(p) => {
                <PriorityPolicy as SchedulerPolicy<NullPlatform>>::start(p)
            }
        }
    }

    pub fn enqueue<P: Platform>(
        &mut self,
        platform: &P,
        tasks: &mut TaskTable,
        task: TaskId,
    ) -> Result<()> {
        match self {
            ActivePolicy::RoundRobin(p) => p.enqueue(platform, tasks, task),
            ActivePolicy::Priority(p) => p.enqueue(platform, tasks, task),
        }
    }

    pub fn remove(&mut self, tasks: &mut TaskTable, task: TaskId) -> bool {
        match self {
            ActivePolicy::RoundRobin(p) => {
                <RoundRobinPolicy as SchedulerPolicy<NullPlatform>>::remove(p, tasks, task)
            }
            ActivePolicy::Priority(p) => {
                <PriorityPolicy as SchedulerPolicy<NullPlatform>>::remove(p, tasks, task)
            }
        }
    }

    pub fn select_next<P: Platform>(&mut self, platform: &P, tasks: &mut TaskTable) -> Option<TaskId> {
        match self {
            ActivePolicy::RoundRobin(p) => p.select_next(platform, tasks),
            ActivePolicy::Priority(p) => p.select_next(platform, tasks),
        }
    }

    pub fn tick<P: Platform>(
        &mut self,
        platform: &P,
        tasks: &mut TaskTable,
        gate: &mut PreemptionGate<'_, P>,
    ) {
        match self {
            ActivePolicy::RoundRobin(p) => p.tick(platform, tasks, gate),
            ActivePolicy::Priority(p) => p.tick(platform, tasks, gate),
        }
    }

    fn state_size(&self) -> usize {
        match self {
            ActivePolicy::RoundRobin(p) => {
                <RoundRobinPolicy as SchedulerPolicy<NullPlatform>>::state_size(p)
            }
            ActivePolicy::Priority(p) => {
                <PriorityPolicy as SchedulerPolicy<NullPlatform>>::state_size(p)
            }
        }
    }

    fn save_state(&self, tasks: &TaskTable, buf: &mut [u8]) -> usize {
        match self {
            ActivePolicy::RoundRobin(p) => {
                <RoundRobinPolicy as SchedulerPolicy<NullPlatform>>::save_state(p, tasks, buf)
            }
            ActivePolicy::Priority(p) => {
                <PriorityPolicy as SchedulerPolicy<NullPlatform>>::save_state(p, tasks, buf)
            }
        }
    }

    /// Non-destructively copies every Ready task into `out`, in this
    /// policy's own dequeue order, without touching its internal queues
    /// (used for the Preparing-phase snapshot). Both concrete policies'
    /// `save_state` is already such a snapshot keyed on task ids, so this
    /// reuses it directly - the switch controller never has to drain a
    /// policy before it is certain migration will succeed.
    fn snapshot_into(&self, tasks: &TaskTable, out: &mut [TaskId]) -> usize {
        let mut buf = [0u8; MAX_POOL_NODES * 3];
        let used = self.save_state(tasks, &mut buf);
        let stride = match self {
            ActivePolicy::RoundRobin(_) => 2,
            ActivePolicy::Priority(_) => 3,
        };
        decode_task_ids(&buf[..used], stride, out)
    }

    fn enqueue_placement<P: Platform>(
        &mut self,
        platform: &P,
        tasks: &mut TaskTable,
        task: TaskId,
        target_priority: u8,
        head_insert: bool,
    ) -> Result<()> {
        match self {
            ActivePolicy::RoundRobin(p) => p.enqueue_placement(task, head_insert),
            ActivePolicy::Priority(p) => {
                p.enqueue_placement(platform, tasks, task, target_priority, head_insert)
            }
        }
    }
}

/// Decodes `save_state`'s wire format: plain little-endian `u16` task ids
/// for round-robin (`stride` 2), or `(u8 level, u16 task id)` triples for
/// the priority policy (`stride` 3, id in the trailing two bytes). Only
/// the task id is needed for a snapshot.
fn decode_task_ids(buf: &[u8], stride: usize, out: &mut [TaskId]) -> usize {
    let mut n = 0;
    let mut i = 0;
    while i + stride <= buf.len() && n < out.len() {
        let raw = if stride == 3 {
            u16::from_le_bytes([buf[i + 1], buf[i + 2]])
        } else {
            u16::from_le_bytes([buf[i], buf[i + 1]])
        };
        out[n] = TaskId::from_raw(raw);
        n += 1;
        i += stride;
    }
    n
}

/// A [`Platform`] used only to pick a generic instantiation for policy
/// methods that happen to ignore their platform argument. Never
/// constructed.
pub struct NullPlatform;
impl crate::hal::InterruptController for NullPlatform {
    fn global_disable(&self) -> u32 {
        0
    }
    fn global_restore(&self, _mask: u32) {}
    fn set_priority(&self, _id: u32, _level: u8) {}
    fn is_in_interrupt(&self) -> bool {
        false
    }
    fn request_pending_switch(&self) {}
}
impl crate::hal::TimerService for NullPlatform {
    fn tick_count(&self) -> u64 {
        0
    }
    fn microseconds(&self) -> u64 {
        0
    }
    fn cycle_count(&self) -> u32 {
        0
    }
}
impl crate::hal::Trace for NullPlatform {
    fn event(&self, _args: core::fmt::Arguments<'_>) {}
    fn fatal(&self, _code: u32) -> ! {
        unreachable!("NullPlatform is never driven to a fatal path")
    }
}

/// Switch-controller phase tag (spec §4.7, §3 "Switch context").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    Preparing,
    SavingState,
    MigratingTasks,
    ActivatingTarget,
    Completing,
    RollingBack,
    /// Rollback itself failed to restore state; the caller must treat the
    /// system as unrecoverable (spec §4.7 "Failure handling").
    Error,
}

/// A request to change the active policy (spec §4.7 `switch(...)`).
#[derive(Debug, Clone, Copy)]
pub struct SwitchRequest {
    pub to: PolicyId,
    pub forced: bool,
    pub deadline_us: u64,
    pub strategy: MigrationStrategy,
    /// The currently Running task, captured by the caller before issuing
    /// the request; it holds no queue slot and must be re-inserted
    /// separately during `ActivatingTarget` (spec §4.7).
    pub running_task: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Success,
    RolledBack,
}

/// One entry in the fixed-depth switch-history ring (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct HistoryEntry {
    pub timestamp_us: u64,
    pub from: PolicyId,
    pub to: PolicyId,
    pub strategy: MigrationStrategy,
    pub outcome: SwitchOutcome,
    pub duration_us: u32,
}

/// Optional external validator consulted during the Validating phase
/// (spec §4.7: "call optional external validator callback").
pub trait SwitchValidator {
    fn validate(&mut self, request: &SwitchRequest) -> Result<()>;
}

impl SwitchValidator for () {
    fn validate(&mut self, _request: &SwitchRequest) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchStats {
    pub total_switches: u64,
    pub successful_switches: u64,
    pub rollback_count: u64,
    pub budget_violations: u64,
}

/// Orchestrates the switch FSM (spec §4.7). Holds no policy state of its
/// own beyond the history ring and counters; the active policy lives
/// alongside it in [`crate::kernel::Kernel`] so both can be passed to
/// `switch` without aliasing.
pub struct SwitchController {
    phase: Phase,
    last_switch_tick: u64,
    min_switch_interval_ms: u64,
    max_switch_time_us: u32,
    history: [Option<HistoryEntry>; MAX_SWITCH_HISTORY],
    history_next: usize,
    stats: SwitchStats,
}

impl SwitchController {
    pub const fn new(config: &Config) -> Self {
        const NONE: Option<HistoryEntry> = None;
        Self {
            phase: Phase::Idle,
            last_switch_tick: 0,
            min_switch_interval_ms: config.min_switch_interval_ms,
            max_switch_time_us: config.max_switch_time_us,
            history: [NONE; MAX_SWITCH_HISTORY],
            history_next: 0,
            stats: SwitchStats {
                total_switches: 0,
                successful_switches: 0,
                rollback_count: 0,
                budget_violations: 0,
            },
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> SwitchStats {
        self.stats
    }

    pub fn history(&self) -> &[Option<HistoryEntry>; MAX_SWITCH_HISTORY] {
        &self.history
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        self.history[self.history_next] = Some(entry);
        self.history_next = (self.history_next + 1) % MAX_SWITCH_HISTORY;
    }

    /// Drives the full switch FSM: `Idle → Validating → Preparing →
    /// SavingState → MigratingTasks → ActivatingTarget → Completing →
    /// Idle`, or `→ RollingBack → Idle` on failure after `Preparing`.
    pub fn switch<P: Platform, V: SwitchValidator>(
        &mut self,
        platform: &P,
        tasks: &mut TaskTable,
        active: &mut ActivePolicy,
        gate: &mut PreemptionGate<'_, P>,
        config: &Config,
        request: SwitchRequest,
        validator: &mut V,
    ) -> Result<SwitchOutcome> {
        let from = active.id();

        if self.phase != Phase::Idle {
            return Err(Error::Busy);
        }
        self.phase = Phase::Validating;
        if from == request.to {
            self.phase = Phase::Idle;
            return Err(Error::InvalidArgument);
        }
        let now_tick = platform.tick_count();
        if !request.forced
            && self.last_switch_tick != 0
            && now_tick.saturating_sub(self.last_switch_tick) < self.min_switch_interval_ms
        {
            self.phase = Phase::Idle;
            return Err(Error::PolicyViolation);
        }
        if let Err(e) = validator.validate(&request) {
            self.phase = Phase::Idle;
            return Err(e);
        }

        self.phase = Phase::Preparing;
        gate.disable();
        let start_us = platform.microseconds();
        let mut source_snapshot = [TaskId::default(); MAX_POOL_NODES];
        let source_count = active.snapshot_into(tasks, &mut source_snapshot);

        self.phase = Phase::SavingState;
        let mut state_buf = [0u8; MAX_POOL_NODES * 3];
        let needed = active.state_size();
        if needed > state_buf.len() {
            return self.rollback(platform, gate, from, request, start_us, Error::ResourceExhausted);
        }
        let _used = active.save_state(tasks, &mut state_buf);

        self.phase = Phase::MigratingTasks;
        let mut no_progress = ();
        let (placements, placed_count) = plan_migration(
            tasks,
            &source_snapshot[..source_count],
            request.strategy,
            &mut no_progress,
        );
        let mut target = ActivePolicy::for_id(request.to, config);
        for placement in placements.iter().take(placed_count) {
            if let Err(e) = target.enqueue_placement(
                platform,
                tasks,
                placement.task,
                placement.target_priority,
                placement.head_insert,
            ) {
                return self.rollback(platform, gate, from, request, start_us, e);
            }
        }

        self.phase = Phase::ActivatingTarget;
        if let Some(running) = request.running_task {
            if let Some(tcb) = tasks.get_mut(running) {
                tcb.make_ready();
                let priority = tcb.effective_priority();
                if let Err(e) = target.enqueue_placement(platform, tasks, running, priority, false) {
                    return self.rollback(platform, gate, from, request, start_us, e);
                }
            }
        }
        *active = target;
        gate.enable();

        self.phase = Phase::Completing;
        let duration_us = platform.microseconds().saturating_sub(start_us) as u32;
        if duration_us > self.max_switch_time_us {
            self.stats.budget_violations += 1;
        }
        self.stats.total_switches += 1;
        self.stats.successful_switches += 1;
        self.last_switch_tick = now_tick;
        self.push_history(HistoryEntry {
            timestamp_us: start_us,
            from,
            to: request.to,
            strategy: request.strategy,
            outcome: SwitchOutcome::Success,
            duration_us,
        });
        self.phase = Phase::Idle;
        Ok(SwitchOutcome::Success)
    }

    /// Source queues were only ever read via a non-destructive snapshot,
    /// and the replacement policy is built fresh and discarded here, so
    /// rollback needs no queue surgery: "restoring every task to its
    /// pre-switch position" holds because they never left it.
    fn rollback<P: Platform>(
        &mut self,
        platform: &P,
        gate: &mut PreemptionGate<'_, P>,
        from: PolicyId,
        request: SwitchRequest,
        start_us: u64,
        error: Error,
    ) -> Result<SwitchOutcome> {
        self.phase = Phase::RollingBack;
        gate.enable();
        self.stats.total_switches += 1;
        self.stats.rollback_count += 1;
        let duration_us = platform.microseconds().saturating_sub(start_us) as u32;
        self.push_history(HistoryEntry {
            timestamp_us: start_us,
            from,
            to: request.to,
            strategy: request.strategy,
            outcome: SwitchOutcome::RolledBack,
            duration_us,
        });
        self.phase = Phase::Idle;
        let _ = error;
        Ok(SwitchOutcome::RolledBack)
    }
}
