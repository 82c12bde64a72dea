//! Task control block and priority bitmap (C1, spec §3, §4.1).
//!
//! Grounded on the reference kernel's `objects/tcb.rs` for the TCB's shape,
//! lifecycle methods, and doc density, and on its `scheduler/types.rs` for
//! the bitmap's find-first-set trick - generalized from a 4×64-bit /
//! 256-thread bitmap tied to one scheduler instance into a standalone
//! 8×32-bit, 256-level bitmap with a cached highest-set index, matching the
//! exact width spec §3 names ("an array of 8 words of 32 bits").

use core::fmt;

use crate::config::MAX_TASKS;

/// Lowest numerical value is highest priority (spec §3).
pub const HIGHEST_PRIORITY: u8 = 0;
/// Lowest priority representable by the bitmap.
pub const LOWEST_PRIORITY: u8 = 255;

/// Opaque index into the task table. Not a pointer: stray/use-after-free
/// reads are caught via [`Tcb::validity`], not via index validity alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u16);

impl TaskId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw slot value, for serializing into a state-preservation buffer
    /// (spec §4.7 `SavingState`).
    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self(0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

const TCB_MAGIC: u32 = 0x5443_4230; // "TCB0"

/// Lifecycle state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Suspended,
    Deleted,
}

/// Stack region descriptor: base, size, and the current stack pointer at
/// last suspension. The core never interprets these beyond copying them
/// across a switch; the memory layout is a board-support concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub size: usize,
    pub current: usize,
}

/// Number of 32-bit words reserved for the saved CPU context. Sized for a
/// Cortex-M basic exception frame (r0-r3, r12, lr, pc, xpsr) plus the
/// callee-saved register bank (r4-r11) and an FPU extension frame; a
/// board-support crate fills and interprets this, the core only copies it.
pub const CPU_CONTEXT_WORDS: usize = 32;

/// Opaque saved-register blob. The core copies this verbatim across a
/// switch and never interprets its contents (Design Notes §9: "the core
/// does not mention the hardware mechanism").
#[derive(Clone, Copy)]
pub struct CpuContext {
    words: [u32; CPU_CONTEXT_WORDS],
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        Self {
            words: [0; CPU_CONTEXT_WORDS],
        }
    }

    pub fn words(&self) -> &[u32; CPU_CONTEXT_WORDS] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u32; CPU_CONTEXT_WORDS] {
        &mut self.words
    }
}

impl fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuContext").finish_non_exhaustive()
    }
}

/// Runtime-statistics substructure (spec §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    pub cumulative_runtime_us: u64,
    pub last_wakeup_tick: u64,
    /// `None` encoded as `u64::MAX`: no deadline registered.
    pub deadline_us: u64,
    pub deadline_misses: u32,
}

impl TaskStats {
    pub const NO_DEADLINE: u64 = u64::MAX;

    pub const fn new() -> Self {
        Self {
            cumulative_runtime_us: 0,
            last_wakeup_tick: 0,
            deadline_us: Self::NO_DEADLINE,
            deadline_misses: 0,
        }
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline_us != Self::NO_DEADLINE
    }
}

/// Per-task control block (spec §3). Owned exclusively by [`TaskTable`];
/// every other component holds only a [`TaskId`].
pub struct Tcb {
    id: TaskId,
    validity: u32,
    state: TaskState,
    base_priority: u8,
    effective_priority: u8,
    stack: StackRegion,
    context: CpuContext,
    stats: TaskStats,
}

impl Tcb {
    fn new(id: TaskId, base_priority: u8, stack: StackRegion) -> Self {
        Self {
            id,
            validity: TCB_MAGIC,
            state: TaskState::Ready,
            base_priority,
            effective_priority: base_priority,
            stack,
            context: CpuContext::zeroed(),
            stats: TaskStats::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validity == TCB_MAGIC
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    #[inline]
    pub fn base_priority(&self) -> u8 {
        self.base_priority
    }

    #[inline]
    pub fn set_base_priority(&mut self, priority: u8) {
        self.base_priority = priority;
    }

    #[inline]
    pub fn effective_priority(&self) -> u8 {
        self.effective_priority
    }

    /// Sets the effective priority directly. Callers (the priority policy's
    /// inheritance/aging logic) are responsible for maintaining the
    /// invariant `effective_priority <= base_priority`.
    #[inline]
    pub fn set_effective_priority(&mut self, priority: u8) {
        self.effective_priority = priority;
    }

    #[inline]
    pub fn stack(&self) -> &StackRegion {
        &self.stack
    }

    #[inline]
    pub fn context(&self) -> &CpuContext {
        &self.context
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut CpuContext {
        &mut self.context
    }

    #[inline]
    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    #[inline]
    pub fn stats_mut(&mut self) -> &mut TaskStats {
        &mut self.stats
    }

    /// Marks the task Running.
    pub fn activate(&mut self, wakeup_tick: u64) {
        self.state = TaskState::Running;
        self.stats.last_wakeup_tick = wakeup_tick;
    }

    /// Marks the task Ready (selected out, back onto a ready queue, or
    /// never ran yet).
    pub fn make_ready(&mut self) {
        self.state = TaskState::Ready;
    }

    /// Marks the task Blocked, saving its context.
    pub fn block(&mut self, context: CpuContext) {
        self.context = context;
        self.state = TaskState::Blocked;
    }

    /// Marks the task Suspended, saving its context.
    pub fn suspend(&mut self, context: CpuContext) {
        self.context = context;
        self.state = TaskState::Suspended;
    }

    /// Marks the task Deleted and poisons its validity tag. Must only be
    /// called after the task has been removed from every queue (spec §3
    /// lifecycle: "on Deletion it must first be removed from any queue").
    pub fn mark_deleted(&mut self) {
        self.state = TaskState::Deleted;
        self.validity = 0;
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .finish_non_exhaustive()
    }
}

/// Process-wide task table. Owns every [`Tcb`]; queues elsewhere in the
/// crate hold only [`TaskId`] values (spec §3: "TCBs are owned by a
/// process-wide task table; queues hold non-owning references").
pub struct TaskTable {
    slots: [Option<Tcb>; MAX_TASKS],
    count: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        const NONE: Option<Tcb> = None;
        Self {
            slots: [NONE; MAX_TASKS],
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Inserts a task created by the external task-manager collaborator
    /// (spec §6). Returns `None` if the table is full.
    pub fn insert(&mut self, base_priority: u8, stack: StackRegion) -> Option<TaskId> {
        let slot = self.slots.iter().position(Option::is_none)?;
        let id = TaskId(slot as u16);
        self.slots[slot] = Some(Tcb::new(id, base_priority, stack));
        self.count += 1;
        Some(id)
    }

    /// Removes a task from the table outright. Callers must ensure it has
    /// already been unlinked from every queue.
    pub fn remove(&mut self, id: TaskId) {
        let slot = &mut self.slots[id.index()];
        if slot.is_some() {
            *slot = None;
            self.count -= 1;
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Tcb> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|tcb| tcb.is_valid())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Tcb> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|tcb| tcb.is_valid())
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of bitmap words (8 × 32 bits = 256 levels, spec §3).
const BITMAP_WORDS: usize = 8;

/// Sentinel returned by [`PriorityBitmap::ffs`] when every bit is clear.
pub const PRIORITY_LEVELS: u16 = (BITMAP_WORDS * 32) as u16;

/// O(1) "find first set" priority bitmap (C1, spec §4.1). Bit `p` is set
/// iff the per-priority queue at level `p` is non-empty. `ffs` ties its
/// cached `highest_set` to the lowest set bit; a clear at the cached level
/// triggers a bounded 8-word rescan.
#[derive(Clone, Copy)]
pub struct PriorityBitmap {
    words: [u32; BITMAP_WORDS],
    highest_set: u16,
}

impl PriorityBitmap {
    pub const fn new() -> Self {
        Self {
            words: [0; BITMAP_WORDS],
            highest_set: PRIORITY_LEVELS,
        }
    }

    #[inline]
    pub fn set(&mut self, p: u8) {
        let (word, bit) = (p as usize / 32, p as usize % 32);
        self.words[word] |= 1 << bit;
        if (p as u16) < self.highest_set {
            self.highest_set = p as u16;
        }
    }

    #[inline]
    pub fn clear(&mut self, p: u8) {
        let (word, bit) = (p as usize / 32, p as usize % 32);
        self.words[word] &= !(1 << bit);
        if self.highest_set == p as u16 {
            self.highest_set = self.rescan();
        }
    }

    #[inline]
    pub fn test(&self, p: u8) -> bool {
        let (word, bit) = (p as usize / 32, p as usize % 32);
        self.words[word] & (1 << bit) != 0
    }

    /// Lowest set bit, or [`PRIORITY_LEVELS`] if the bitmap is all-zero.
    #[inline]
    pub fn ffs(&self) -> u16 {
        self.highest_set
    }

    pub fn is_empty(&self) -> bool {
        self.highest_set == PRIORITY_LEVELS
    }

    fn rescan(&self) -> u16 {
        for (i, word) in self.words.iter().enumerate() {
            if *word != 0 {
                return (i * 32) as u16 + word.trailing_zeros() as u16;
            }
        }
        PRIORITY_LEVELS
    }
}

impl Default for PriorityBitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bitmap_returns_sentinel() {
        let bitmap = PriorityBitmap::new();
        assert_eq!(bitmap.ffs(), PRIORITY_LEVELS);
        assert!(bitmap.is_empty());
    }

    #[test]
    fn lowest_numeric_priority_wins() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.set(200);
        bitmap.set(10);
        bitmap.set(128);
        assert_eq!(bitmap.ffs(), 10);
    }

    #[test]
    fn clearing_cached_level_rescans() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.set(10);
        bitmap.set(128);
        bitmap.clear(10);
        assert_eq!(bitmap.ffs(), 128);
    }

    #[test]
    fn clearing_last_bit_empties() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.set(5);
        bitmap.clear(5);
        assert!(bitmap.is_empty());
    }

    #[test]
    fn word_boundary_bits() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.set(255);
        assert_eq!(bitmap.ffs(), 255);
        bitmap.set(31);
        assert_eq!(bitmap.ffs(), 31);
        bitmap.set(32);
        bitmap.clear(31);
        assert_eq!(bitmap.ffs(), 32);
    }

    #[test]
    fn task_table_insert_and_remove() {
        let mut table = TaskTable::new();
        let stack = StackRegion {
            base: 0x2000_0000,
            size: 4096,
            current: 0x2000_1000,
        };
        let id = table.insert(100, stack).expect("room for one task");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(id).unwrap().base_priority(), 100);

        table.get_mut(id).unwrap().mark_deleted();
        assert!(table.get(id).is_none(), "poisoned validity hides the slot");

        table.remove(id);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn effective_priority_defaults_to_base() {
        let mut table = TaskTable::new();
        let stack = StackRegion {
            base: 0,
            size: 0,
            current: 0,
        };
        let id = table.insert(42, stack).unwrap();
        assert_eq!(table.get(id).unwrap().effective_priority(), 42);
    }
}
