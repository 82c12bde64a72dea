//! Round-robin policy (C4, spec §4.4): a single time-sliced FIFO with a
//! starvation boost.

use crate::config::Config;
use crate::error::Result;
use crate::hal::Platform;
use crate::pool::{NodePool, Queue};
use crate::preempt::PreemptionGate;
use crate::tcb::{TaskId, TaskTable};

use super::{PolicyCapabilities, PolicyStats, QueueKind, SchedulerPolicy};

#[derive(Clone, Copy, Default)]
struct RrPayload {
    accumulated_wait_ms: u32,
    boost_count: u32,
}

/// Single FIFO ready queue, a configurable time slice, and a starvation
/// boost (spec §4.4).
pub struct RoundRobinPolicy {
    queue: Queue,
    pool: NodePool<RrPayload>,
    time_slice_ms: u32,
    slice_remaining: u32,
    starvation_threshold_ms: u32,
    dynamic_slice: bool,
    stats: PolicyStats,
}

impl RoundRobinPolicy {
    pub const fn new(config: &Config) -> Self {
        Self {
            queue: Queue::new(),
            pool: NodePool::with_capacity(config.node_pool_size),
            time_slice_ms: config.default_time_slice_ms,
            slice_remaining: config.default_time_slice_ms,
            starvation_threshold_ms: config.starvation_threshold_ms,
            dynamic_slice: false,
            stats: PolicyStats {
                starvation_count: 0,
                aging_adjustments: 0,
            },
        }
    }

    /// Enables inverse-proportion dynamic slicing: short slices under
    /// heavy load, long slices when the queue is shallow (spec §4.4,
    /// "optional dynamic-slice mode").
    pub fn set_dynamic_slice(&mut self, enabled: bool) {
        self.dynamic_slice = enabled;
    }

    pub fn time_slice_ms(&self) -> u32 {
        self.time_slice_ms
    }

    pub fn slice_remaining(&self) -> u32 {
        self.slice_remaining
    }

    fn effective_slice(&self) -> u32 {
        if self.dynamic_slice {
            let depth = self.queue.len() + 1;
            (self.time_slice_ms / depth).max(1)
        } else {
            self.time_slice_ms
        }
    }

    /// Scans for a node waiting longer than `starvation_threshold_ms` and
    /// moves the first one found to the head (spec §4.4: "boosted ... at
    /// most once per visit to `select_next`").
    fn boost_starved(&mut self) {
        if self.starvation_threshold_ms == 0 {
            return;
        }
        let mut cur = self.queue.head();
        while let Some(slot) = cur {
            let payload = self.pool.payload(slot);
            if payload.accumulated_wait_ms > self.starvation_threshold_ms {
                self.queue.remove(&mut self.pool, slot);
                self.pool.set_payload(
                    slot,
                    RrPayload {
                        accumulated_wait_ms: 0,
                        boost_count: payload.boost_count + 1,
                    },
                );
                self.queue.push_front(&mut self.pool, slot);
                self.stats.starvation_count += 1;
                return;
            }
            cur = self.pool.next_of(slot);
        }
    }

    /// Enqueues `task` at an explicit placement from the migration engine
    /// (spec §4.8). Round-robin has no per-priority queues, so
    /// `target_priority` is ignored; `head_insert` selects `push_front`
    /// over the usual `push_back`.
    pub fn enqueue_placement(&mut self, task: TaskId, head_insert: bool) -> Result<()> {
        let slot = self.pool.alloc(task, RrPayload::default())?;
        if head_insert {
            self.queue.push_front(&mut self.pool, slot);
        } else {
            self.queue.push_back(&mut self.pool, slot);
        }
        Ok(())
    }
}

impl<P: Platform> SchedulerPolicy<P> for RoundRobinPolicy {
    fn capabilities(&self) -> PolicyCapabilities {
        PolicyCapabilities {
            queue_kind: QueueKind::SingleFifo,
            supports_inheritance: false,
            supports_aging: false,
        }
    }

    fn init(&mut self, _platform: &P) {}

    fn start(&mut self) {
        self.slice_remaining = self.time_slice_ms;
    }

    fn stop(&mut self) {}

    fn reset(&mut self, tasks: &mut TaskTable) {
        let mut scratch = [TaskId::default(); crate::config::MAX_TASKS];
        let n = self.drain_into(tasks, &mut scratch);
        let _ = n;
        self.slice_remaining = self.time_slice_ms;
        self.stats = PolicyStats::default();
    }

    fn enqueue(&mut self, _platform: &P, _tasks: &mut TaskTable, task: TaskId) -> Result<()> {
        let slot = self.pool.alloc(task, RrPayload::default())?;
        self.queue.push_back(&mut self.pool, slot);
        Ok(())
    }

    fn remove(&mut self, _tasks: &mut TaskTable, task: TaskId) -> bool {
        match self.queue.find(&self.pool, task) {
            Some(slot) => {
                self.queue.remove(&mut self.pool, slot);
                self.pool.free(slot);
                true
            }
            None => false,
        }
    }

    fn select_next(&mut self, _platform: &P, _tasks: &mut TaskTable) -> Option<TaskId> {
        self.boost_starved();
        let slot = self.queue.pop_front(&mut self.pool)?;
        let task = self.pool.task_of(slot);
        self.pool.free(slot);
        self.slice_remaining = self.effective_slice();
        Some(task)
    }

    fn tick(&mut self, _platform: &P, _tasks: &mut TaskTable, gate: &mut PreemptionGate<'_, P>) {
        if self.slice_remaining > 0 {
            self.slice_remaining -= 1;
        }
        if self.slice_remaining == 0 {
            gate.request_switch_while_disabled();
        }
        let mut cur = self.queue.head();
        while let Some(slot) = cur {
            let mut payload = self.pool.payload(slot);
            payload.accumulated_wait_ms += 1;
            self.pool.set_payload(slot, payload);
            cur = self.pool.next_of(slot);
        }
    }

    fn stats(&self) -> PolicyStats {
        self.stats
    }

    fn state_size(&self) -> usize {
        core::mem::size_of::<TaskId>() * crate::config::MAX_POOL_NODES
    }

    fn save_state(&self, _tasks: &TaskTable, buf: &mut [u8]) -> usize {
        let mut ids = [TaskId::default(); crate::config::MAX_POOL_NODES];
        let n = self.queue.snapshot_into(&self.pool, &mut ids);
        let bytes = n * core::mem::size_of::<u16>();
        for (i, id) in ids.iter().take(n).enumerate() {
            let raw = id.raw().to_le_bytes();
            buf[i * 2] = raw[0];
            buf[i * 2 + 1] = raw[1];
        }
        bytes
    }

    fn restore_state(&mut self, _tasks: &mut TaskTable, buf: &[u8]) {
        let n = buf.len() / 2;
        for i in 0..n {
            let raw = u16::from_le_bytes([buf[i * 2], buf[i * 2 + 1]]);
            if let Ok(slot) = self.pool.alloc(TaskId::from_raw(raw), RrPayload::default()) {
                self.queue.push_back(&mut self.pool, slot);
            }
        }
    }

    fn drain_into(&mut self, _tasks: &mut TaskTable, out: &mut [TaskId]) -> usize {
        self.queue.drain_into(&mut self.pool, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{InterruptController, Trace};
    use core::cell::Cell;

    struct FakePlatform {
        pending: Cell<bool>,
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
        fn request_pending_switch(&self) {
            self.pending.set(true);
        }
    }
    impl crate::hal::TimerService for FakePlatform {
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
    impl Trace for FakePlatform {
        fn event(&self, _args: core::fmt::Arguments<'_>) {}
        fn fatal(&self, _code: u32) -> ! {
            panic!("fatal")
        }
    }

    #[test]
    fn rotation_matches_enqueue_order() {
        let config = Config::reference();
        let platform = FakePlatform {
            pending: Cell::new(false),
        };
        let mut policy = RoundRobinPolicy::new(&config);
        let mut tasks = TaskTable::new();
        let ids: Vec<TaskId> = (0..4)
            .map(|i| {
                tasks
                    .insert(
                        100,
                        crate::tcb::StackRegion {
                            base: 0,
                            size: 0,
                            current: 0,
                        },
                    )
                    .unwrap()
            })
            .collect();
        for &id in &ids {
            SchedulerPolicy::<FakePlatform>::enqueue(&mut policy, &platform, &mut tasks, id)
                .unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..8 {
            let next =
                SchedulerPolicy::<FakePlatform>::select_next(&mut policy, &platform, &mut tasks)
                    .unwrap();
            order.push(next);
            SchedulerPolicy::<FakePlatform>::enqueue(&mut policy, &platform, &mut tasks, next)
                .unwrap();
        }
        assert_eq!(
            order,
            vec![ids[0], ids[1], ids[2], ids[3], ids[0], ids[1], ids[2], ids[3]]
        );
    }

    #[test]
    fn tick_exhausts_slice_and_requests_switch() {
        let config = Config::reference();
        let platform = FakePlatform {
            pending: Cell::new(false),
        };
        let mut policy = RoundRobinPolicy::new(&config);
        let mut tasks = TaskTable::new();
        let mut gate = PreemptionGate::new(&platform, config.max_preemption_depth);
        for _ in 0..config.default_time_slice_ms {
            SchedulerPolicy::<FakePlatform>::tick(&mut policy, &platform, &mut tasks, &mut gate);
        }
        assert_eq!(policy.slice_remaining(), 0);
        assert!(platform.pending.get());
    }
}
