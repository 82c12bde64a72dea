//! Top-level kernel record (spec §6): wires the task table, the active
//! policy, the preemption gate, the switch controller, and the metrics
//! collector behind one surface for the task manager and other kernel
//! subsystems to call into.

use crate::config::Config;
use crate::error::Result;
use crate::hal::Platform;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::migration::MigrationStrategy;
use crate::policy::round_robin::RoundRobinPolicy;
use crate::policy::PolicyCapabilities;
use crate::preempt::PreemptionGate;
use crate::switch::{ActivePolicy, PolicyId, SwitchController, SwitchOutcome, SwitchValidator};
use crate::tcb::{StackRegion, TaskId, TaskState, TaskTable};

/// Owns every process-wide scheduler record. One instance exists per
/// process, constructed once at boot before interrupts are unmasked
/// (spec §9: "initialization happens once before any interrupts are
/// unmasked").
pub struct Kernel<'p, P: Platform> {
    platform: &'p P,
    config: Config,
    tasks: TaskTable,
    active: ActivePolicy,
    gate: PreemptionGate<'p, P>,
    switch: SwitchController,
    metrics: Metrics,
    current: Option<TaskId>,
}

impl<'p, P: Platform> Kernel<'p, P> {
    /// Builds the kernel with the round-robin policy active (spec §4.4's
    /// default). `config` must already have passed [`Config::validate`].
    pub fn new(platform: &'p P, config: Config) -> Self {
        let mut active = ActivePolicy::RoundRobin(RoundRobinPolicy::new(&config));
        active.init(platform);
        active.start();
        Self {
            platform,
            config,
            tasks: TaskTable::new(),
            active,
            gate: PreemptionGate::new(platform, config.max_preemption_depth),
            switch: SwitchController::new(&config),
            metrics: Metrics::new(),
            current: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active_policy(&self) -> PolicyId {
        self.active.id()
    }

    pub fn capabilities(&self) -> PolicyCapabilities {
        match &self.active {
            ActivePolicy::RoundRobin(p) => {
                <RoundRobinPolicy as crate::policy::SchedulerPolicy<P>>::capabilities(p)
            }
            ActivePolicy::Priority(p) => {
                <crate::policy::priority::PriorityPolicy as crate::policy::SchedulerPolicy<P>>::capabilities(p)
            }
        }
    }

    // ---- Task manager API (spec §6: "add_task/remove_task") ----

    /// Registers a newly created task (stack pre-allocated by the task
    /// manager) and adds it to the active policy's ready structures.
    pub fn add_task(&mut self, base_priority: u8, stack: StackRegion) -> Result<TaskId> {
        let id = self
            .tasks
            .insert(base_priority, stack)
            .ok_or(crate::error::Error::ResourceExhausted)?;
        self.active.enqueue(self.platform, &mut self.tasks, id)?;
        Ok(id)
    }

    /// Unregisters a task outright. Must not be called on the currently
    /// Running task.
    pub fn remove_task(&mut self, id: TaskId) {
        self.active.remove(&mut self.tasks, id);
        if let Some(tcb) = self.tasks.get_mut(id) {
            tcb.mark_deleted();
        }
        self.tasks.remove(id);
    }

    // ---- Scheduler plugin API (spec §4.6) ----

    /// Picks the next task to run. Composes the round-robin
    /// "re-enqueue-then-select" rule at this level, not inside the
    /// policy (spec §8 scenario 2): if the previously running task is
    /// still Ready, it goes back into the active policy before the next
    /// `select_next` call.
    pub fn reschedule(&mut self) -> Option<TaskId> {
        if let Some(prev) = self.current.take() {
            let still_ready = self
                .tasks
                .get(prev)
                .map(|t| t.state() == TaskState::Running || t.state() == TaskState::Ready)
                .unwrap_or(false);
            if still_ready {
                if let Some(tcb) = self.tasks.get_mut(prev) {
                    tcb.make_ready();
                }
                let _ = self.active.enqueue(self.platform, &mut self.tasks, prev);
            }
        }
        let start_us = self.platform.microseconds();
        let next = self.active.select_next(self.platform, &mut self.tasks);
        let decision_us = self.platform.microseconds().saturating_sub(start_us) as u32;
        self.metrics.record_decision_latency(decision_us);
        if let Some(id) = next {
            if let Some(tcb) = self.tasks.get_mut(id) {
                tcb.activate(self.platform.tick_count());
            }
        }
        self.current = next;
        next
    }

    /// Timer-tick hook: advances the active policy's time-slice/aging
    /// bookkeeping.
    pub fn tick(&mut self) {
        self.active.tick(self.platform, &mut self.tasks, &mut self.gate);
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskTable {
        &mut self.tasks
    }

    // ---- Preemption gate API (spec §4.3) ----

    pub fn gate(&mut self) -> &mut PreemptionGate<'p, P> {
        &mut self.gate
    }

    // ---- Switch controller API (spec §4.7) ----

    pub fn switch(
        &mut self,
        to: PolicyId,
        forced: bool,
        deadline_us: u64,
        strategy: MigrationStrategy,
    ) -> Result<SwitchOutcome> {
        let running_task = self.current;
        let mut validator = ();
        self.switch_with_validator(to, forced, deadline_us, strategy, running_task, &mut validator)
    }

    pub fn switch_with_validator<V: SwitchValidator>(
        &mut self,
        to: PolicyId,
        forced: bool,
        deadline_us: u64,
        strategy: MigrationStrategy,
        running_task: Option<TaskId>,
        validator: &mut V,
    ) -> Result<SwitchOutcome> {
        let request = crate::switch::SwitchRequest {
            to,
            forced,
            deadline_us,
            strategy,
            running_task,
        };
        self.switch.switch(
            self.platform,
            &mut self.tasks,
            &mut self.active,
            &mut self.gate,
            &self.config,
            request,
            validator,
        )
    }

    pub fn switch_phase(&self) -> crate::switch::Phase {
        self.switch.phase()
    }

    // ---- Metrics read API (spec §6: "snapshot of current counters") ----

    pub fn metrics(&self) -> MetricsSnapshot {
        let policy = match &self.active {
            ActivePolicy::RoundRobin(p) => {
                <RoundRobinPolicy as crate::policy::SchedulerPolicy<P>>::stats(p)
            }
            ActivePolicy::Priority(p) => {
                <crate::policy::priority::PriorityPolicy as crate::policy::SchedulerPolicy<P>>::stats(p)
            }
        };
        self.metrics.snapshot(policy, self.switch.stats())
    }
}
