//! Priority policy (C5, spec §4.5): 256-level static priority with a
//! bitmap, priority inheritance, and aging.

use crate::config::{Config, MAX_INHERITANCE_RECORDS, MAX_POOL_NODES, MAX_PRIORITY_LEVELS};
use crate::error::{Error, Result};
use crate::hal::Platform;
use crate::pool::{NodePool, Queue};
use crate::preempt::PreemptionGate;
use crate::tcb::{PriorityBitmap, TaskId, TaskTable, PRIORITY_LEVELS};

use super::{PolicyCapabilities, PolicyStats, QueueKind, SchedulerPolicy};

#[derive(Clone, Copy, Default)]
struct PrioPayload {
    enqueue_tick: u64,
    age_count: u32,
}

#[derive(Clone, Copy)]
struct InheritanceRecord {
    task: TaskId,
    original_priority: u8,
    inherited_priority: u8,
    depth: u8,
    resource: u32,
    timestamp_tick: u64,
}

struct InheritanceTable {
    records: [Option<InheritanceRecord>; MAX_INHERITANCE_RECORDS],
    capacity: usize,
    count: usize,
}

impl InheritanceTable {
    const fn new(capacity: usize) -> Self {
        Self {
            records: [None; MAX_INHERITANCE_RECORDS],
            capacity,
            count: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    fn depth_for(&self, task: TaskId) -> u8 {
        self.records
            .iter()
            .flatten()
            .filter(|r| r.task == task)
            .count() as u8
    }

    fn insert(&mut self, record: InheritanceRecord) -> Result<()> {
        if self.is_full() {
            return Err(Error::ResourceExhausted);
        }
        let slot = self
            .records
            .iter()
            .position(Option::is_none)
            .ok_or(Error::ResourceExhausted)?;
        self.records[slot] = Some(record);
        self.count += 1;
        Ok(())
    }

    fn remove_matching(&mut self, task: TaskId, resource: u32) -> Option<InheritanceRecord> {
        let slot = self.records.iter().position(|r| match r {
            Some(r) => r.task == task && r.resource == resource,
            None => false,
        })?;
        let record = self.records[slot].take();
        self.count -= 1;
        record
    }

    fn min_inherited(&self, task: TaskId) -> Option<u8> {
        self.records
            .iter()
            .flatten()
            .filter(|r| r.task == task)
            .map(|r| r.inherited_priority)
            .min()
    }
}

/// Aging parameters (spec §4.5: `{enabled, period_ms, threshold_ms,
/// boost_amount}`).
#[derive(Debug, Clone, Copy)]
pub struct AgingParams {
    pub enabled: bool,
    pub period_ms: u32,
    pub threshold_ms: u32,
    pub boost_amount: u8,
}

/// 256 FIFO ready queues, the priority bitmap, an inheritance table, and
/// aging parameters (spec §4.5).
pub struct PriorityPolicy {
    levels: [Queue; MAX_PRIORITY_LEVELS],
    pool: NodePool<PrioPayload>,
    bitmap: PriorityBitmap,
    inheritance: InheritanceTable,
    inheritance_enabled: bool,
    aging: AgingParams,
    last_aging_tick: u64,
    stats: PolicyStats,
}

impl PriorityPolicy {
    pub const fn new(config: &Config) -> Self {
        Self {
            levels: [Queue::new(); MAX_PRIORITY_LEVELS],
            pool: NodePool::with_capacity(config.node_pool_size),
            bitmap: PriorityBitmap::new(),
            inheritance: InheritanceTable::new(config.inheritance_table_size),
            inheritance_enabled: true,
            aging: AgingParams {
                enabled: true,
                period_ms: config.aging_period_ms,
                threshold_ms: config.aging_threshold_ms,
                boost_amount: config.aging_boost,
            },
            last_aging_tick: 0,
            stats: PolicyStats {
                starvation_count: 0,
                aging_adjustments: 0,
            },
        }
    }

    pub fn set_inheritance_enabled(&mut self, enabled: bool) {
        self.inheritance_enabled = enabled;
    }

    pub fn set_aging(&mut self, aging: AgingParams) {
        self.aging = aging;
    }

    /// Locates the level and slot currently holding `task`, scanning only
    /// bitmap-set levels (spec §4.5: "acceptable because the bitmap prunes
    /// most of the 256 slots").
    fn find_slot(&self, task: TaskId) -> Option<(u8, u16)> {
        for level in 0..MAX_PRIORITY_LEVELS {
            let p = level as u8;
            if !self.bitmap.test(p) {
                continue;
            }
            if let Some(slot) = self.levels[level].find(&self.pool, task) {
                return Some((p, slot));
            }
        }
        None
    }

    /// Moves `task` to level `new`, resetting its age counter (spec §4.5
    /// `set_priority`).
    pub fn set_priority(&mut self, tasks: &mut TaskTable, task: TaskId, new: u8) -> Result<()> {
        let (old, slot) = self.find_slot(task).ok_or(Error::NotFound)?;
        if old == new {
            self.pool.set_payload(
                slot,
                PrioPayload {
                    enqueue_tick: self.pool.payload(slot).enqueue_tick,
                    age_count: 0,
                },
            );
            return Ok(());
        }
        self.levels[old as usize].remove(&mut self.pool, slot);
        if self.levels[old as usize].is_empty() {
            self.bitmap.clear(old);
        }
        self.pool.set_payload(
            slot,
            PrioPayload {
                enqueue_tick: self.pool.payload(slot).enqueue_tick,
                age_count: 0,
            },
        );
        self.levels[new as usize].push_back(&mut self.pool, slot);
        self.bitmap.set(new);
        if let Some(tcb) = tasks.get_mut(task) {
            tcb.set_effective_priority(new);
        }
        Ok(())
    }

    fn recompute_effective(&self, tasks: &TaskTable, task: TaskId) -> u8 {
        let base = tasks.get(task).map(|t| t.base_priority()).unwrap_or(255);
        match self.inheritance.min_inherited(task) {
            Some(inherited) => base.min(inherited),
            None => base,
        }
    }

    /// Elevates `task` via priority inheritance (spec §4.5 `inherit`).
    pub fn inherit(
        &mut self,
        platform: &impl Platform,
        tasks: &mut TaskTable,
        task: TaskId,
        inherited_priority: u8,
        resource: u32,
    ) -> Result<()> {
        if !self.inheritance_enabled {
            return Err(Error::NotSupported);
        }
        if self.inheritance.is_full() {
            return Err(Error::ResourceExhausted);
        }
        let original = tasks.get(task).ok_or(Error::NotFound)?.base_priority();
        let depth = self.inheritance.depth_for(task);
        self.inheritance.insert(InheritanceRecord {
            task,
            original_priority: original,
            inherited_priority,
            depth,
            resource,
            timestamp_tick: platform.tick_count(),
        })?;
        let effective = self.recompute_effective(tasks, task);
        self.set_priority(tasks, task, effective)
    }

    /// Reverses a prior `inherit` (spec §4.5 `uninherit`).
    pub fn uninherit(&mut self, tasks: &mut TaskTable, task: TaskId, resource: u32) -> Result<()> {
        self.inheritance
            .remove_matching(task, resource)
            .ok_or(Error::NotFound)?;
        let effective = self.recompute_effective(tasks, task);
        self.set_priority(tasks, task, effective)
    }

    /// Enqueues `task` at an explicit placement from the migration engine
    /// (spec §4.8): `target_priority` picks the per-level queue directly
    /// (bypassing `tasks`' current effective priority), and `head_insert`
    /// selects the head over the usual tail (the `DeadlineBased` strategy's
    /// "imminent deadline" case). Records the current tick as the node's
    /// enqueue time, same as `enqueue`, so a migrated task is not
    /// immediately eligible for aging.
    pub fn enqueue_placement(
        &mut self,
        platform: &impl Platform,
        tasks: &mut TaskTable,
        task: TaskId,
        target_priority: u8,
        head_insert: bool,
    ) -> Result<()> {
        let slot = self.pool.alloc(
            task,
            PrioPayload {
                enqueue_tick: platform.tick_count(),
                age_count: 0,
            },
        )?;
        if head_insert {
            self.levels[target_priority as usize].push_front(&mut self.pool, slot);
        } else {
            self.levels[target_priority as usize].push_back(&mut self.pool, slot);
        }
        self.bitmap.set(target_priority);
        if let Some(tcb) = tasks.get_mut(task) {
            tcb.set_effective_priority(target_priority);
        }
        Ok(())
    }

    /// Runs the aging sweep if it is due (spec §4.5 "Aging algorithm").
    /// Exposed directly so callers can force a sweep (used by the boundary
    /// test in spec §8 scenario 4), and invoked opportunistically from
    /// `select_next` on a period boundary.
    pub fn run_aging(&mut self, platform: &impl Platform, tasks: &mut TaskTable) {
        if !self.aging.enabled {
            return;
        }
        let now = platform.tick_count();
        if now.saturating_sub(self.last_aging_tick) < self.aging.period_ms as u64 {
            return;
        }
        self.last_aging_tick = now;

        for level in 1..MAX_PRIORITY_LEVELS {
            let p = level as u8;
            if !self.bitmap.test(p) {
                continue;
            }
            let mut cur = self.levels[level].head();
            while let Some(slot) = cur {
                let next = self.pool.next_of(slot);
                let payload = self.pool.payload(slot);
                if now.saturating_sub(payload.enqueue_tick) > self.aging.threshold_ms as u64 {
                    let new_p = p.saturating_sub(self.aging.boost_amount);
                    if new_p < p {
                        let task = self.pool.task_of(slot);
                        self.levels[level].remove(&mut self.pool, slot);
                        if self.levels[level].is_empty() {
                            self.bitmap.clear(p);
                        }
                        self.pool.set_payload(
                            slot,
                            PrioPayload {
                                enqueue_tick: now,
                                age_count: payload.age_count + 1,
                            },
                        );
                        self.levels[new_p as usize].push_back(&mut self.pool, slot);
                        self.bitmap.set(new_p);
                        if let Some(tcb) = tasks.get_mut(task) {
                            tcb.set_effective_priority(new_p);
                        }
                        self.stats.aging_adjustments += 1;
                    }
                }
                cur = next;
            }
        }
    }
}

impl<P: Platform> SchedulerPolicy<P> for PriorityPolicy {
    fn capabilities(&self) -> PolicyCapabilities {
        PolicyCapabilities {
            queue_kind: QueueKind::PriorityLevels,
            supports_inheritance: true,
            supports_aging: true,
        }
    }

    fn init(&mut self, _platform: &P) {}

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn reset(&mut self, tasks: &mut TaskTable) {
        let mut scratch = [TaskId::default(); MAX_POOL_NODES];
        let _ = self.drain_into(tasks, &mut scratch);
        self.stats = PolicyStats::default();
        self.last_aging_tick = 0;
    }

    fn enqueue(&mut self, platform: &P, tasks: &mut TaskTable, task: TaskId) -> Result<()> {
        let priority = tasks
            .get(task)
            .ok_or(Error::NotFound)?
            .effective_priority();
        let slot = self.pool.alloc(
            task,
            PrioPayload {
                enqueue_tick: platform.tick_count(),
                age_count: 0,
            },
        )?;
        self.levels[priority as usize].push_back(&mut self.pool, slot);
        self.bitmap.set(priority);
        Ok(())
    }

    fn remove(&mut self, _tasks: &mut TaskTable, task: TaskId) -> bool {
        match self.find_slot(task) {
            Some((level, slot)) => {
                self.levels[level as usize].remove(&mut self.pool, slot);
                if self.levels[level as usize].is_empty() {
                    self.bitmap.clear(level);
                }
                self.pool.free(slot);
                true
            }
            None => false,
        }
    }

    fn select_next(&mut self, platform: &P, tasks: &mut TaskTable) -> Option<TaskId> {
        let level = self.bitmap.ffs();
        let task = if level == PRIORITY_LEVELS {
            None
        } else {
            match self.levels[level as usize].pop_front(&mut self.pool) {
                Some(slot) => {
                    let task = self.pool.task_of(slot);
                    self.pool.free(slot);
                    if self.levels[level as usize].is_empty() {
                        self.bitmap.clear(level as u8);
                    }
                    Some(task)
                }
                None => None,
            }
        };
        self.run_aging(platform, tasks);
        task
    }

    fn tick(&mut self, _platform: &P, _tasks: &mut TaskTable, _gate: &mut PreemptionGate<'_, P>) {
        // Priority scheduling has no time-sliced preemption of its own;
        // aging is driven from `select_next` on a period boundary.
    }

    fn stats(&self) -> PolicyStats {
        self.stats
    }

    fn state_size(&self) -> usize {
        MAX_POOL_NODES * 3
    }

    fn save_state(&self, _tasks: &TaskTable, buf: &mut [u8]) -> usize {
        let mut written = 0;
        for level in 0..MAX_PRIORITY_LEVELS {
            if !self.bitmap.test(level as u8) {
                continue;
            }
            let mut ids = [TaskId::default(); MAX_POOL_NODES];
            let n = self.levels[level].snapshot_into(&self.pool, &mut ids);
            for id in ids.iter().take(n) {
                if written + 3 > buf.len() {
                    return written;
                }
                buf[written] = level as u8;
                let raw = id.raw().to_le_bytes();
                buf[written + 1] = raw[0];
                buf[written + 2] = raw[1];
                written += 3;
            }
        }
        written
    }

    fn restore_state(&mut self, _tasks: &mut TaskTable, buf: &[u8]) {
        let mut i = 0;
        while i + 3 <= buf.len() {
            let level = buf[i];
            let raw = u16::from_le_bytes([buf[i + 1], buf[i + 2]]);
            if let Ok(slot) = self.pool.alloc(
                TaskId::from_raw(raw),
                PrioPayload {
                    enqueue_tick: 0,
                    age_count: 0,
                },
            ) {
                self.levels[level as usize].push_back(&mut self.pool, slot);
                self.bitmap.set(level);
            }
            i += 3;
        }
    }

    fn drain_into(&mut self, _tasks: &mut TaskTable, out: &mut [TaskId]) -> usize {
        let mut written = 0;
        for level in 0..MAX_PRIORITY_LEVELS {
            if !self.bitmap.test(level as u8) {
                continue;
            }
            loop {
                if written >= out.len() {
                    return written;
                }
                match self.levels[level].pop_front(&mut self.pool) {
                    Some(slot) => {
                        out[written] = self.pool.task_of(slot);
                        self.pool.free(slot);
                        written += 1;
                    }
                    None => break,
                }
            }
            self.bitmap.clear(level as u8);
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{InterruptController, TimerService, Trace};
    use crate::tcb::StackRegion;
    use core::cell::Cell;

    struct FakePlatform {
        now: Cell<u64>,
    }
    impl InterruptController for FakePlatform {
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
    impl TimerService for FakePlatform {
        fn tick_count(&self) -> u64 {
            self.now.get()
        }
        fn microseconds(&self) -> u64 {
            self.now.get() * 1000
        }
        fn cycle_count(&self) -> u32 {
            0
        }
    }
    impl Trace for FakePlatform {
        fn event(&self, _args: core::fmt::Arguments<'_>) {}
        fn fatal(&self, _code: u32) -> ! {
            panic!("fatal")
        }
    }

    fn stack() -> StackRegion {
        StackRegion {
            base: 0,
            size: 0,
            current: 0,
        }
    }

    #[test]
    fn strict_priority_selection() {
        let config = Config::reference();
        let platform = FakePlatform { now: Cell::new(0) };
        let mut policy = PriorityPolicy::new(&config);
        let mut tasks = TaskTable::new();
        let a = tasks.insert(200, stack()).unwrap();
        let b = tasks.insert(10, stack()).unwrap();
        let c = tasks.insert(128, stack()).unwrap();
        for id in [a, b, c] {
            SchedulerPolicy::<FakePlatform>::enqueue(&mut policy, &platform, &mut tasks, id)
                .unwrap();
        }
        let order: Vec<TaskId> = (0..3)
            .map(|_| {
                SchedulerPolicy::<FakePlatform>::select_next(&mut policy, &platform, &mut tasks)
                    .unwrap()
            })
            .collect();
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn inheritance_round_trip() {
        let config = Config::reference();
        let platform = FakePlatform { now: Cell::new(0) };
        let mut policy = PriorityPolicy::new(&config);
        let mut tasks = TaskTable::new();
        let t = tasks.insert(200, stack()).unwrap();
        SchedulerPolicy::<FakePlatform>::enqueue(&mut policy, &platform, &mut tasks, t).unwrap();

        policy.inherit(&platform, &mut tasks, t, 10, 1).unwrap();
        assert_eq!(tasks.get(t).unwrap().effective_priority(), 10);

        policy.uninherit(&mut tasks, t, 1).unwrap();
        assert_eq!(tasks.get(t).unwrap().effective_priority(), 200);
    }

    #[test]
    fn aging_promotes_starving_task() {
        let config = Config::reference();
        let platform = FakePlatform { now: Cell::new(0) };
        let mut policy = PriorityPolicy::new(&config);
        policy.set_aging(AgingParams {
            enabled: true,
            period_ms: 100,
            threshold_ms: 5_000,
            boost_amount: 20,
        });
        let mut tasks = TaskTable::new();
        let t = tasks.insert(200, stack()).unwrap();
        SchedulerPolicy::<FakePlatform>::enqueue(&mut policy, &platform, &mut tasks, t).unwrap();
        // Back-date the node's enqueue tick to simulate 6000ms of waiting.
        let (level, slot) = policy.find_slot(t).unwrap();
        assert_eq!(level, 200);
        policy.pool.set_payload(
            slot,
            PrioPayload {
                enqueue_tick: 0,
                age_count: 0,
            },
        );
        platform.now.set(6_000);

        policy.run_aging(&platform, &mut tasks);

        assert_eq!(tasks.get(t).unwrap().effective_priority(), 180);
        assert_eq!(policy.stats().aging_adjustments, 1);
    }

    #[test]
    fn enqueue_at_nonzero_tick_is_not_aged() {
        let config = Config::reference();
        // Start the clock well past the aging threshold, so a fresh
        // `enqueue_tick` hardcoded to 0 would look like it had already
        // waited `now` ticks and age immediately.
        let platform = FakePlatform {
            now: Cell::new(10_000),
        };
        let mut policy = PriorityPolicy::new(&config);
        policy.set_aging(AgingParams {
            enabled: true,
            period_ms: 100,
            threshold_ms: 5_000,
            boost_amount: 20,
        });
        let mut tasks = TaskTable::new();
        let t = tasks.insert(200, stack()).unwrap();
        SchedulerPolicy::<FakePlatform>::enqueue(&mut policy, &platform, &mut tasks, t).unwrap();

        policy.run_aging(&platform, &mut tasks);

        assert_eq!(tasks.get(t).unwrap().effective_priority(), 200);
        assert_eq!(policy.stats().aging_adjustments, 0);
    }

    #[test]
    fn empty_policy_select_next_returns_none() {
        let config = Config::reference();
        let platform = FakePlatform { now: Cell::new(0) };
        let mut policy = PriorityPolicy::new(&config);
        let mut tasks = TaskTable::new();
        assert!(SchedulerPolicy::<FakePlatform>::select_next(&mut policy, &platform, &mut tasks)
            .is_none());
        assert!(policy.bitmap.is_empty());
    }
}
