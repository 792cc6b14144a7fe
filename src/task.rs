//! # Task Control Block
//!
//! Defines the task model for EdfOS. Every task is periodic: it is released
//! once per period, must finish each instance before its absolute deadline,
//! and is ordered against other tasks purely by that deadline.
//!
//! The TCB owns the task's stack region and its saved execution context.
//! Both are only ever touched by the scheduler core.

use core::fmt;

use heapless::String;

use crate::channel::ChannelId;
use crate::config::{DEFAULT_STACK_SIZE, MAX_NAME_LEN};
use crate::memory::Region;
use crate::periodic::ReleaseSchedule;
use crate::ready::ReadyEntry;

/// Ticks since the scheduler started.
pub type Tick = u64;

/// Task entry point. Task bodies never return.
pub type TaskEntry = extern "C" fn() -> !;

/// Stable task handle. Equal to the descriptor slot, so ids are unique among
/// live tasks and lower ids win deadline ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    /// Slot index in the task table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The current instance is complete; waiting for the next release.
    NextRelease,
    /// Waiting for free space in a channel.
    Send(ChannelId),
    /// Waiting for data in a channel.
    Receive(ChannelId),
}

/// Execution state of a task.
///
/// ```text
///   create ──► Ready ──── dispatch ────► Running
///                ▲  ◄──── preempt ───────  │
///                │                         │ wait_next_period / send / receive
///                │       release /         ▼
///                └────── unblock ─────── Blocked
///
///   suspend: any state ──► Suspended ──► resume ──► Ready or Blocked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// In the ready structure, waiting for the CPU.
    Ready,
    /// Owns the CPU. At most one task is Running.
    Running,
    Blocked(BlockReason),
    /// Explicitly suspended; ignored by dispatch until resumed.
    Suspended,
}

/// Why a blocked channel operation was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The counterpart operation made progress possible.
    Notified,
    /// The operation's timeout expired.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Static timing parameters of a periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Release period in ticks. Must be non-zero.
    pub period_ticks: u32,

    /// Deadline relative to each release, in ticks. `0 < deadline <= period`,
    /// so an instance's deadline is never later than the next release.
    pub deadline_ticks: u32,

    /// Stack size in bytes (rounded up to 8).
    pub stack_size: usize,

    /// Informational only. Dispatch order is decided by deadline.
    pub priority_hint: u8,
}

impl TaskConfig {
    /// Implicit-deadline task (deadline = period) with the default stack.
    pub const fn periodic(period_ticks: u32) -> Self {
        Self {
            period_ticks,
            deadline_ticks: period_ticks,
            stack_size: DEFAULT_STACK_SIZE,
            priority_hint: 1,
        }
    }

    /// Constrained deadline, at most the period.
    pub const fn with_deadline(mut self, deadline_ticks: u32) -> Self {
        self.deadline_ticks = deadline_ticks;
        self
    }

    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub const fn with_priority_hint(mut self, priority_hint: u8) -> Self {
        self.priority_hint = priority_hint;
        self
    }
}

// ---------------------------------------------------------------------------
// Saved execution context
// ---------------------------------------------------------------------------

/// Saved stack pointer of a switched-out task. The register file lives on the
/// task's own stack below this pointer.
///
/// Deliberately neither `Copy` nor `Clone`: each context belongs to exactly
/// one TCB (or to the idle task).
#[derive(Debug)]
pub struct Context {
    sp: usize,
}

impl Context {
    pub(crate) const fn new(sp: usize) -> Self {
        Self { sp }
    }

    #[inline]
    pub(crate) fn stack_pointer(&self) -> usize {
        self.sp
    }

    #[inline]
    pub(crate) fn save(&mut self, sp: usize) {
        self.sp = sp;
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Everything the kernel knows about one task.
pub struct TaskControlBlock {
    pub(crate) id: TaskId,
    pub(crate) name: String<MAX_NAME_LEN>,
    pub(crate) state: TaskState,
    pub(crate) config: TaskConfig,
    pub(crate) release: ReleaseSchedule,

    pub(crate) context: Context,
    pub(crate) stack: Region,

    /// The current instance has finished (`wait_next_period` was called).
    pub(crate) instance_done: bool,
    /// A miss has already been recorded for the current instance.
    pub(crate) miss_credited: bool,
    /// A new instance was released while the previous one was still running.
    /// The next `wait_next_period` continues straight into it.
    pub(crate) overrun: bool,

    /// Absolute tick at which a pending channel wait gives up.
    pub(crate) wait_until: Option<Tick>,
    pub(crate) wake: Option<WakeReason>,

    pub(crate) deadline_misses: u32,
    pub(crate) instances_completed: u32,
    pub(crate) run_ticks: u64,
}

impl TaskControlBlock {
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        config: TaskConfig,
        release: ReleaseSchedule,
        context: Context,
        stack: Region,
    ) -> Self {
        Self {
            id,
            name: bounded_name(name),
            state: TaskState::Ready,
            config,
            release,
            context,
            stack,
            instance_done: false,
            miss_credited: false,
            overrun: false,
            wait_until: None,
            wake: None,
            deadline_misses: 0,
            instances_completed: 0,
            run_ticks: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Deadline of the current instance.
    pub fn absolute_deadline(&self) -> Tick {
        self.release.absolute_deadline()
    }

    /// Scheduled release time of the current instance.
    pub fn release_time(&self) -> Tick {
        self.release.release_time()
    }

    /// When the next instance will be released.
    pub fn next_release(&self) -> Tick {
        self.release.next_release()
    }

    /// Total missed instances. Never reset.
    pub fn deadline_misses(&self) -> u32 {
        self.deadline_misses
    }

    pub fn instances_completed(&self) -> u32 {
        self.instances_completed
    }

    /// Ticks during which this task owned the CPU.
    pub fn run_ticks(&self) -> u64 {
        self.run_ticks
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Key under which this task sits (or would sit) in the ready structure.
    #[inline]
    pub(crate) fn ready_entry(&self) -> ReadyEntry {
        ReadyEntry {
            deadline: self.absolute_deadline(),
            task: self.id,
        }
    }

    /// The current instance was released and has not finished yet.
    /// Suspended tasks are not counted.
    pub(crate) fn is_incomplete(&self) -> bool {
        !self.instance_done
            && matches!(
                self.state,
                TaskState::Ready
                    | TaskState::Running
                    | TaskState::Blocked(BlockReason::Send(_))
                    | TaskState::Blocked(BlockReason::Receive(_))
            )
    }

    /// Credit a miss to the current instance. Returns `false` if this
    /// instance was already credited.
    pub(crate) fn record_deadline_miss(&mut self) -> bool {
        if self.miss_credited {
            return false;
        }
        self.miss_credited = true;
        self.deadline_misses += 1;
        true
    }

    /// Drop any pending channel wait bookkeeping.
    pub(crate) fn clear_wait(&mut self) {
        self.wait_until = None;
        self.wake = None;
    }
}

/// Copy `name` into a bounded string, truncating on a char boundary.
pub(crate) fn bounded_name(name: &str) -> String<MAX_NAME_LEN> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Heap;

    fn tcb(heap: &mut Heap, config: TaskConfig) -> TaskControlBlock {
        let stack = heap.alloc(config.stack_size).unwrap();
        let release = ReleaseSchedule::new(0, config.period_ticks, config.deadline_ticks);
        TaskControlBlock::new(TaskId(3), "worker", config, release, Context::new(0), stack)
    }

    #[test]
    fn test_tcb_initialization() {
        let mut heap = Heap::new();
        let tcb = tcb(&mut heap, TaskConfig::periodic(50).with_deadline(40));

        assert_eq!(tcb.id(), TaskId(3));
        assert_eq!(tcb.name(), "worker");
        assert_eq!(tcb.state(), TaskState::Ready);
        assert_eq!(tcb.absolute_deadline(), 40);
        assert_eq!(tcb.next_release(), 50);
        assert_eq!(tcb.stack_size(), DEFAULT_STACK_SIZE);
        assert_eq!(tcb.deadline_misses(), 0);
        assert!(tcb.is_incomplete());
    }

    #[test]
    fn test_deadline_miss_is_credited_once_per_instance() {
        let mut heap = Heap::new();
        let mut tcb = tcb(&mut heap, TaskConfig::periodic(10));

        assert!(tcb.record_deadline_miss());
        assert!(!tcb.record_deadline_miss());
        assert_eq!(tcb.deadline_misses(), 1);

        tcb.miss_credited = false;
        assert!(tcb.record_deadline_miss());
        assert_eq!(tcb.deadline_misses(), 2);
    }

    #[test]
    fn test_incomplete_states() {
        let mut heap = Heap::new();
        let mut tcb = tcb(&mut heap, TaskConfig::periodic(10));

        tcb.state = TaskState::Blocked(BlockReason::Receive(ChannelId(0)));
        assert!(tcb.is_incomplete());

        tcb.state = TaskState::Suspended;
        assert!(!tcb.is_incomplete());

        tcb.state = TaskState::Blocked(BlockReason::NextRelease);
        tcb.instance_done = true;
        assert!(!tcb.is_incomplete());
    }

    #[test]
    fn test_ready_entry_orders_by_deadline_then_id() {
        let a = ReadyEntry { deadline: 10, task: TaskId(5) };
        let b = ReadyEntry { deadline: 10, task: TaskId(2) };
        let c = ReadyEntry { deadline: 9, task: TaskId(7) };
        assert!(c < b);
        assert!(b < a);
    }

    #[test]
    fn test_name_is_truncated_on_char_boundary() {
        let name = bounded_name("a-very-long-task-name-indeed");
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert_eq!(name.as_str(), "a-very-long-task-nam");

        // 'é' is two bytes; 19 ASCII + 'é' would be 21 bytes
        let name = bounded_name("abcdefghijklmnopqrsé");
        assert_eq!(name.as_str(), "abcdefghijklmnopqrs");
    }

    #[test]
    fn test_config_builders() {
        let config = TaskConfig::periodic(100)
            .with_deadline(80)
            .with_stack_size(512)
            .with_priority_hint(4);
        assert_eq!(config.period_ticks, 100);
        assert_eq!(config.deadline_ticks, 80);
        assert_eq!(config.stack_size, 512);
        assert_eq!(config.priority_hint, 4);
    }
}
