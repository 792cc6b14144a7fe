//! # Scheduler
//!
//! Core EDF scheduling logic for EdfOS: a preemptive dispatcher that always
//! runs the ready task with the earliest absolute deadline.
//!
//! ## Tick Protocol
//!
//! At each timer tick (`tick()`), atomically with respect to every other
//! scheduler operation:
//! 1. **Account & advance**: charge the elapsed tick to the running task (or
//!    idle), increment `now`, fire the tick trace hook
//! 2. **Release**: re-arm every task whose next period has begun, crediting
//!    a miss to any task still busy with its previous instance
//! 3. **Deadline check**: credit one miss to every incomplete instance whose
//!    absolute deadline is now in the past
//! 4. **Timeouts**: wake blocked channel operations whose timeout expired
//! 5. **Dispatch**: if the ready minimum beats the running task, preempt it;
//!    with nothing ready, run the idle task
//!
//! ## Preemption
//!
//! Dispatch is event-driven, not only tick-driven. Every operation that makes
//! a task Ready (release, channel unblock, resume, creation) ends in
//! [`Scheduler::reschedule`], which compares the ready minimum against the
//! running task. Keys are `(absolute deadline, task id)`, so equal deadlines
//! resolve to the lower id, the running task included.
//!
//! The running task is *not* in the ready structure: a task is queued iff
//! its state is `Ready`.
//!
//! ## Context Switching
//!
//! Dispatch only decides. The port performs the switch later (PendSV on
//! Cortex-M) by calling [`Scheduler::switch_context`] with the outgoing
//! stack pointer and restoring the stack pointer it returns. `on_cpu`
//! tracks whose registers are actually loaded, which may lag `current`
//! until the switch has happened.

use core::fmt;

use log::{debug, warn};

use crate::arch;
use crate::channel::MessageChannel;
use crate::config::{IDLE_STACK_SIZE, MAX_CHANNELS, MAX_TASKS};
use crate::error::KernelError;
use crate::memory::{Heap, Region};
use crate::ready::ReadyQueue;
use crate::task::{
    BlockReason, Context, TaskControlBlock, TaskId, TaskState, Tick, WakeReason,
};
use crate::trace::{DeadlineMiss, TraceHook};

/// Aggregate counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks since start.
    pub ticks: u64,
    /// Ticks during which no task was running.
    pub idle_ticks: u64,
    /// Dispatch decisions that handed the CPU to a different task.
    pub context_switches: u64,
    /// Misses over all tasks, including deleted ones.
    pub deadline_misses: u64,
}

impl SchedulerStats {
    /// Share of ticks spent in tasks, in percent.
    pub fn cpu_load_percent(&self) -> u32 {
        if self.ticks == 0 {
            return 0;
        }
        ((self.ticks - self.idle_ticks) * 100 / self.ticks) as u32
    }
}

/// The single process-wide scheduler state.
///
/// Holds every task descriptor, the ready structure, the channels and the
/// heap they draw from. The kernel keeps one instance behind a critical
/// section; tests drive standalone instances directly.
pub struct Scheduler<H: TraceHook> {
    pub(crate) tasks: [Option<TaskControlBlock>; MAX_TASKS],
    pub(crate) ready: ReadyQueue,
    pub(crate) channels: [Option<MessageChannel>; MAX_CHANNELS],
    pub(crate) heap: Heap,
    pub(crate) trace: H,
    pub(crate) stats: SchedulerStats,

    /// Task chosen by dispatch. `None` means idle.
    pub(crate) current: Option<TaskId>,
    /// Task whose registers are loaded on the CPU.
    on_cpu: Option<TaskId>,
    /// The registers on the CPU belong to a deleted task and must not be
    /// saved anywhere.
    outgoing_deleted: bool,
    idle_context: Context,
    idle_stack: Option<Region>,

    pub(crate) now: Tick,
    started: bool,
    switch_pending: bool,
}

const NO_TASK: Option<TaskControlBlock> = None;
const NO_CHANNEL: Option<MessageChannel> = None;

impl<H: TraceHook> Scheduler<H> {
    /// An empty, not yet started scheduler reporting to `trace`.
    pub const fn new(trace: H) -> Self {
        Self {
            tasks: [NO_TASK; MAX_TASKS],
            ready: ReadyQueue::new(),
            channels: [NO_CHANNEL; MAX_CHANNELS],
            heap: Heap::new(),
            trace,
            stats: SchedulerStats {
                ticks: 0,
                idle_ticks: 0,
                context_switches: 0,
                deadline_misses: 0,
            },
            current: None,
            on_cpu: None,
            outgoing_deleted: false,
            idle_context: Context::new(0),
            idle_stack: None,
            now: 0,
            started: false,
            switch_pending: false,
        }
    }

    /// Start dispatching.
    ///
    /// Reserves the idle task's stack and picks the first task. Failing to
    /// reserve the idle stack is the one fatal kernel error: the caller must
    /// abort startup.
    pub fn start(&mut self) -> Result<(), KernelError> {
        if self.started {
            return Err(KernelError::InvalidParameter("scheduler already started"));
        }
        let stack = self.heap.alloc(IDLE_STACK_SIZE)?;
        self.idle_context = arch::init_stack(self.heap.bytes_mut(&stack), arch::idle_task);
        self.idle_stack = Some(stack);
        self.started = true;
        debug!("scheduler started at tick {} with {} ready", self.now, self.ready.len());
        self.reschedule();
        Ok(())
    }

    /// Timer interrupt entry. Runs the full tick protocol and returns
    /// whether a context switch is needed.
    pub fn tick(&mut self) -> bool {
        match self.current.and_then(|id| self.tasks[id.index()].as_mut()) {
            Some(tcb) => tcb.run_ticks += 1,
            None => self.stats.idle_ticks += 1,
        }
        self.now += 1;
        self.stats.ticks = self.now;
        self.trace.tick(self.now);

        self.release_due_tasks();
        self.check_deadlines();
        self.expire_timeouts();
        self.reschedule();
        self.switch_pending
    }

    /// Process `ticks` ticks in one go, e.g. after the tick interrupt was
    /// held off. Each tick still goes through the full protocol.
    pub fn advance(&mut self, ticks: u32) -> bool {
        for _ in 0..ticks {
            self.tick();
        }
        self.switch_pending
    }

    /// Credit a miss to every incomplete instance past its deadline.
    fn check_deadlines(&mut self) {
        let now = self.now;
        for tcb in self.tasks.iter_mut().flatten() {
            if tcb.is_incomplete() && tcb.absolute_deadline() < now {
                credit_miss(tcb, now, &mut self.trace, &mut self.stats);
            }
        }
    }

    /// Wake channel waiters whose timeout has expired.
    fn expire_timeouts(&mut self) {
        let now = self.now;
        for tcb in self.tasks.iter_mut().flatten() {
            let waiting_on_channel = matches!(
                tcb.state,
                TaskState::Blocked(BlockReason::Send(_) | BlockReason::Receive(_))
            );
            if waiting_on_channel && tcb.wait_until.is_some_and(|t| t <= now) {
                tcb.state = TaskState::Ready;
                tcb.wake = Some(WakeReason::TimedOut);
                self.ready.insert(tcb.id, tcb.absolute_deadline());
            }
        }
    }

    /// Make every task blocked for `reason` Ready again, keeping its deadline.
    pub(crate) fn wake_waiters(&mut self, reason: BlockReason) {
        for tcb in self.tasks.iter_mut().flatten() {
            if tcb.state == TaskState::Blocked(reason) {
                tcb.state = TaskState::Ready;
                tcb.wake = Some(WakeReason::Notified);
                self.ready.insert(tcb.id, tcb.absolute_deadline());
            }
        }
    }

    /// EDF dispatch.
    ///
    /// The running task keeps the CPU unless the ready minimum has a
    /// strictly smaller key. If the running task stopped running (blocked,
    /// suspended, finished its instance, deleted) the minimum takes over, or
    /// idle if nothing is ready.
    pub(crate) fn reschedule(&mut self) {
        if !self.started {
            return;
        }

        if let Some(cur) = self.current {
            if let Some(tcb) = self.tasks[cur.index()].as_mut() {
                if tcb.state == TaskState::Running {
                    match self.ready.peek_min() {
                        Some(head) if head < tcb.ready_entry() => {
                            tcb.state = TaskState::Ready;
                            self.ready.insert(cur, tcb.absolute_deadline());
                        }
                        _ => return,
                    }
                }
                self.trace.switched_out(cur);
            }
            self.current = None;
        }

        if let Some(next) = self.ready.pop_min() {
            if let Some(tcb) = self.tasks[next.task.index()].as_mut() {
                tcb.state = TaskState::Running;
                self.current = Some(next.task);
                self.stats.context_switches += 1;
                self.trace.switched_in(next.task);
            }
        }

        self.switch_pending = self.outgoing_deleted || self.current != self.on_cpu;
    }

    /// Voluntary reschedule point for the running task.
    ///
    /// Under EDF the running task already has the earliest key, so this
    /// only hands the CPU over if something more urgent became ready
    /// without passing through dispatch.
    pub fn yield_now(&mut self) {
        self.reschedule();
    }

    /// Take a task out of dispatch until [`resume`](Self::resume).
    pub fn suspend(&mut self, id: TaskId) -> Result<(), KernelError> {
        let tcb = self.task_mut(id)?;
        if tcb.state == TaskState::Suspended {
            return Ok(());
        }
        tcb.state = TaskState::Suspended;
        self.ready.remove(id);
        debug!("task {} suspended", id);
        self.reschedule();
        Ok(())
    }

    /// Return a suspended task to dispatch. A task whose current instance
    /// is unfinished becomes Ready with its current deadline; otherwise it
    /// waits for its next release.
    pub fn resume(&mut self, id: TaskId) -> Result<(), KernelError> {
        let tcb = self.task_mut(id)?;
        if tcb.state != TaskState::Suspended {
            return Ok(());
        }
        if tcb.instance_done {
            tcb.state = TaskState::Blocked(BlockReason::NextRelease);
        } else {
            tcb.state = TaskState::Ready;
            let deadline = tcb.absolute_deadline();
            self.ready.insert(id, deadline);
        }
        debug!("task {} resumed", id);
        self.reschedule();
        Ok(())
    }

    /// Permanently retire a task: drop it from the ready structure and free
    /// its stack.
    ///
    /// Deleting the running task hands the CPU to the next task at once, but
    /// the port still has to switch away from it before its stack is reused,
    /// so a task deleting itself must yield right after.
    pub fn delete_task(&mut self, id: TaskId) -> Result<(), KernelError> {
        let tcb = self
            .tasks
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(KernelError::InvalidParameter("unknown task"))?;
        self.ready.remove(id);
        self.heap.free(tcb.stack);
        debug!("task {} '{}' deleted", id, tcb.name.as_str());

        // Its slot may be reused before the port switches away
        if self.on_cpu == Some(id) {
            self.on_cpu = None;
            self.outgoing_deleted = true;
        }
        if self.current == Some(id) {
            self.trace.switched_out(id);
            self.current = None;
            self.reschedule();
        }
        Ok(())
    }

    /// Port entry for the actual switch: store the outgoing stack pointer in
    /// the context of the task that was on the CPU and return the stack
    /// pointer of the task chosen by dispatch.
    pub(crate) fn switch_context(&mut self, saved_sp: usize) -> usize {
        if !core::mem::take(&mut self.outgoing_deleted) {
            match self.on_cpu.and_then(|id| self.tasks[id.index()].as_mut()) {
                Some(tcb) => tcb.context.save(saved_sp),
                None => self.idle_context.save(saved_sp),
            }
        }
        self.launch()
    }

    /// Mark the dispatched task as loaded and return its stack pointer.
    /// Used for the very first task and by `switch_context`.
    pub(crate) fn launch(&mut self) -> usize {
        self.on_cpu = self.current;
        self.outgoing_deleted = false;
        self.switch_pending = false;
        match self.current.and_then(|id| self.tasks[id.index()].as_ref()) {
            Some(tcb) => tcb.context.stack_pointer(),
            None => self.idle_context.stack_pointer(),
        }
    }

    /// Whether dispatch changed the running task since the last switch.
    /// Clears the request.
    pub fn take_switch_request(&mut self) -> bool {
        core::mem::take(&mut self.switch_pending)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Ticks processed since boot.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Whether [`start`](Self::start) has succeeded.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Bytes reserved for the idle task; zero before `start`.
    pub fn idle_stack_size(&self) -> usize {
        self.idle_stack.as_ref().map_or(0, Region::len)
    }

    /// Task chosen by dispatch; `None` while idle.
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Descriptor of a live task.
    pub fn task(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.tasks.get(id.index())?.as_ref()
    }

    /// All live tasks in slot order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.tasks.iter().flatten()
    }

    /// Ready tasks, excluding the running one.
    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }

    /// Snapshot of the aggregate counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// The arena backing stacks and channel buffers.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The installed trace hook.
    pub fn trace(&self) -> &H {
        &self.trace
    }

    /// Swap or reconfigure the trace hook.
    pub fn trace_mut(&mut self) -> &mut H {
        &mut self.trace
    }

    /// Write a run-time statistics table, one line per task plus idle.
    pub fn write_run_time_stats<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let total = self.stats.ticks.max(1);
        writeln!(out, "{:<20} {:>10} {:>4} {:>6}", "task", "ticks", "cpu%", "misses")?;
        for tcb in self.tasks() {
            writeln!(
                out,
                "{:<20} {:>10} {:>4} {:>6}",
                tcb.name(),
                tcb.run_ticks(),
                tcb.run_ticks() * 100 / total,
                tcb.deadline_misses()
            )?;
        }
        writeln!(
            out,
            "{:<20} {:>10} {:>4} {:>6}",
            "IDLE",
            self.stats.idle_ticks,
            self.stats.idle_ticks * 100 / total,
            "-"
        )
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskControlBlock, KernelError> {
        self.tasks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(KernelError::InvalidParameter("unknown task"))
    }
}

/// Record a miss for `tcb`'s current instance unless it already has one.
pub(crate) fn credit_miss<H: TraceHook>(
    tcb: &mut TaskControlBlock,
    now: Tick,
    trace: &mut H,
    stats: &mut SchedulerStats,
) {
    if !tcb.record_deadline_miss() {
        return;
    }
    let miss = DeadlineMiss {
        task: tcb.id,
        deadline: tcb.absolute_deadline(),
        detected_at: now,
    };
    stats.deadline_misses += 1;
    trace.deadline_missed(&miss);
    warn!(
        "task {} '{}' missed deadline {} (detected at {})",
        miss.task,
        tcb.name(),
        miss.deadline,
        now
    );
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
