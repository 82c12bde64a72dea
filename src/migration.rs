//! Task migration engine (C8, spec §4.8): moves a batch of ready tasks
//! from a source policy's queues into a target policy's queues under one
//! of three ordering strategies.

use crate::config::MAX_POOL_NODES;
use crate::tcb::{TaskId, TaskTable};

/// Deadline (microseconds until due) at or below which `DeadlineBased`
/// treats a task as imminent and head-inserts it instead of appending.
/// Not named numerically in the source material; chosen as one round-robin
/// reference time slice, the shortest scheduling-relevant interval the
/// core already has a constant for.
pub const IMMINENT_DEADLINE_US: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStrategy {
    /// Iterate source queues in dequeue order, enqueue each to target in
    /// the same sequence.
    PreserveOrder,
    /// Sort selected tasks by base priority ascending, enqueue at the
    /// target's per-priority queue matching each task's base priority.
    PriorityBased,
    /// Sort by (deadline, effective priority); head-insert when the
    /// deadline is imminent, else tail-insert at the base-priority queue.
    DeadlineBased,
}

/// Per-task progress callback. Called once per task placed, with a
/// monotonically increasing count that never exceeds the batch size.
pub trait MigrationProgress {
    fn on_task_migrated(&mut self, migrated: usize, total: usize);
}

impl MigrationProgress for () {
    fn on_task_migrated(&mut self, _migrated: usize, _total: usize) {}
}

/// A task and the sort keys migration needs, captured once from the task
/// table before any reordering so the sort never re-reads a moving target.
#[derive(Clone, Copy)]
struct MigrationKey {
    task: TaskId,
    base_priority: u8,
    effective_priority: u8,
    deadline_us: u64,
}

/// Stable insertion sort over an index array. `core` (no `alloc`) only
/// ships `sort_unstable`; batches here are bounded by the node pool
/// capacity and not on a per-tick path, so `O(n^2)` is acceptable.
fn stable_sort_by_key<K: Copy, F: Fn(&K) -> (u64, u8)>(items: &mut [K], key: F) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && key(&items[j - 1]) > key(&items[j]) {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Eligibility rule (spec §4.8): Ready, Blocked, or Suspended tasks may
/// migrate; Deleted tasks are skipped. The currently Running task is
/// excluded here too - the switch controller re-inserts it separately
/// during `ActivatingTarget`.
fn is_eligible(tasks: &TaskTable, task: TaskId) -> bool {
    use crate::tcb::TaskState;
    matches!(
        tasks.get(task).map(|t| t.state()),
        Some(TaskState::Ready) | Some(TaskState::Blocked) | Some(TaskState::Suspended)
    )
}

/// Applies `strategy` to `source`, a buffer of tasks already drained from
/// the losing policy in its own dequeue order. Returns the number of
/// tasks the caller should enqueue into each of the returned placements'
/// per-task target priority, in the order they should be placed.
///
/// This does not touch either policy directly - it only computes where
/// each task belongs and in what order, as `(task, target_priority,
/// head_insert)` triples, because `PreserveOrder` has no meaningful
/// "target priority" and the round-robin policy ignores one anyway. The
/// switch controller drives the actual `enqueue`/`push_front` calls.
pub fn plan_migration<Progress: MigrationProgress>(
    tasks: &TaskTable,
    source: &[TaskId],
    strategy: MigrationStrategy,
    progress: &mut Progress,
) -> ([MigrationPlacement; MAX_POOL_NODES], usize) {
    let mut keys = [MigrationKey {
        task: TaskId::default(),
        base_priority: 0,
        effective_priority: 0,
        deadline_us: 0,
    }; MAX_POOL_NODES];
    let mut n = 0;
    for &task in source {
        if n >= keys.len() || !is_eligible(tasks, task) {
            continue;
        }
        let tcb = match tasks.get(task) {
            Some(tcb) => tcb,
            None => continue,
        };
        keys[n] = MigrationKey {
            task,
            base_priority: tcb.base_priority(),
            effective_priority: tcb.effective_priority(),
            deadline_us: tcb.stats().deadline_us,
        };
        n += 1;
    }
    let keys = &mut keys[..n];

    match strategy {
        MigrationStrategy::PreserveOrder => {}
        MigrationStrategy::PriorityBased => {
            stable_sort_by_key(keys, |k| (k.base_priority as u64, 0));
        }
        MigrationStrategy::DeadlineBased => {
            stable_sort_by_key(keys, |k| (k.deadline_us, k.effective_priority));
        }
    }

    let mut placements = [MigrationPlacement {
        task: TaskId::default(),
        target_priority: 0,
        head_insert: false,
    }; MAX_POOL_NODES];
    for (i, key) in keys.iter().enumerate() {
        placements[i] = match strategy {
            MigrationStrategy::PreserveOrder => MigrationPlacement {
                task: key.task,
                target_priority: key.effective_priority,
                head_insert: false,
            },
            MigrationStrategy::PriorityBased => MigrationPlacement {
                task: key.task,
                target_priority: key.base_priority,
                head_insert: false,
            },
            MigrationStrategy::DeadlineBased => {
                let imminent = key.deadline_us <= IMMINENT_DEADLINE_US;
                MigrationPlacement {
                    task: key.task,
                    target_priority: if imminent { 0 } else { key.base_priority },
                    head_insert: imminent,
                }
            }
        };
        progress.on_task_migrated(i + 1, n);
    }
    (placements, n)
}

/// Where a single task lands after migration planning: which per-priority
/// queue on the target, and whether it should be pushed to the head
/// (`DeadlineBased`, imminent deadline) or the tail.
#[derive(Clone, Copy)]
pub struct MigrationPlacement {
    pub task: TaskId,
    pub target_priority: u8,
    pub head_insert: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::StackRegion;

    struct NullProgress;
    impl MigrationProgress for NullProgress {
        fn on_task_migrated(&mut self, _migrated: usize, _total: usize) {}
    }

    fn stack() -> StackRegion {
        StackRegion {
            base: 0,
            size: 0,
            current: 0,
        }
    }

    #[test]
    fn priority_based_sorts_ascending_and_is_stable() {
        let mut tasks = TaskTable::new();
        let a = tasks.insert(128, stack()).unwrap();
        let b = tasks.insert(10, stack()).unwrap();
        let c = tasks.insert(10, stack()).unwrap();
        let source = [a, b, c];
        let mut progress = NullProgress;
        let (placements, n) =
            plan_migration(&tasks, &source, MigrationStrategy::PriorityBased, &mut progress);
        assert_eq!(n, 3);
        assert_eq!(placements[0].task, b);
        assert_eq!(placements[1].task, c);
        assert_eq!(placements[2].task, a);
    }

    #[test]
    fn deleted_tasks_are_skipped() {
        let mut tasks = TaskTable::new();
        let a = tasks.insert(100, stack()).unwrap();
        let b = tasks.insert(50, stack()).unwrap();
        tasks.get_mut(b).unwrap().mark_deleted();
        let source = [a, b];
        let mut progress = NullProgress;
        let (placements, n) =
            plan_migration(&tasks, &source, MigrationStrategy::PreserveOrder, &mut progress);
        assert_eq!(n, 1);
        assert_eq!(placements[0].task, a);
    }

    #[test]
    fn deadline_based_head_inserts_imminent_tasks() {
        let mut tasks = TaskTable::new();
        let a = tasks.insert(100, stack()).unwrap();
        tasks.get_mut(a).unwrap().stats_mut().deadline_us = 1_000;
        let source = [a];
        let mut progress = NullProgress;
        let (placements, n) =
            plan_migration(&tasks, &source, MigrationStrategy::DeadlineBased, &mut progress);
        assert_eq!(n, 1);
        assert!(placements[0].head_insert);
        assert_eq!(placements[0].target_priority, 0);
    }
}
