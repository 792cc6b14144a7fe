//! # Periodic Task Manager
//!
//! Creates periodic tasks and drives their releases.
//!
//! ## Release Model
//!
//! Each task carries a [`ReleaseSchedule`]: the *scheduled* release time of
//! its current instance, its period and its relative deadline. On every
//! release the schedule advances by exactly one period, so
//!
//! ```text
//! release_k  = first_release + k × period
//! deadline_k = release_k + relative_deadline
//! ```
//!
//! independent of when the tick that triggered the release was processed.
//! Nothing here ever reads "now" to compute a deadline, which is what keeps
//! the task set free of cumulative drift.
//!
//! ## Deadline Policy
//!
//! `0 < deadline <= period`: an instance's deadline never lies beyond the
//! next release, so at most one instance per task is ever pending.

use log::debug;

use crate::arch;
use crate::config::{MAX_TASKS, MIN_STACK_SIZE};
use crate::error::{KernelError, Resource};
use crate::scheduler::{credit_miss, Scheduler};
use crate::task::{
    BlockReason, TaskConfig, TaskControlBlock, TaskEntry, TaskId, TaskState, Tick,
};
use crate::trace::TraceHook;

/// Release bookkeeping of one periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseSchedule {
    release: Tick,
    period: u32,
    relative_deadline: u32,
}

impl ReleaseSchedule {
    pub const fn new(first_release: Tick, period: u32, relative_deadline: u32) -> Self {
        Self {
            release: first_release,
            period,
            relative_deadline,
        }
    }

    /// Scheduled release of the current instance.
    #[inline]
    pub const fn release_time(&self) -> Tick {
        self.release
    }

    #[inline]
    pub const fn next_release(&self) -> Tick {
        self.release + self.period as Tick
    }

    #[inline]
    pub const fn absolute_deadline(&self) -> Tick {
        self.release + self.relative_deadline as Tick
    }

    #[inline]
    pub const fn is_due(&self, now: Tick) -> bool {
        now >= self.next_release()
    }

    /// Move to the next instance and return its absolute deadline.
    pub fn advance(&mut self) -> Tick {
        self.release += self.period as Tick;
        self.absolute_deadline()
    }
}

/// Check the timing and stack constraints of a new task.
pub fn validate(config: &TaskConfig) -> Result<(), KernelError> {
    if config.period_ticks == 0 {
        return Err(KernelError::InvalidParameter("period must be non-zero"));
    }
    if config.deadline_ticks == 0 {
        return Err(KernelError::InvalidParameter("deadline must be non-zero"));
    }
    if config.deadline_ticks > config.period_ticks {
        return Err(KernelError::InvalidParameter("deadline exceeds period"));
    }
    if config.stack_size < MIN_STACK_SIZE {
        return Err(KernelError::InvalidParameter("stack too small"));
    }
    Ok(())
}

impl<H: TraceHook> Scheduler<H> {
    /// Register a periodic task.
    ///
    /// The task is released immediately: its first absolute deadline is
    /// `now + deadline_ticks` and it enters the ready structure. If the
    /// scheduler is already running and the new task has an earlier
    /// deadline than the running one, it preempts it.
    ///
    /// # Errors
    /// - `InvalidParameter`: bad period/deadline/stack, or the (truncated)
    ///   name is already used by a live task.
    /// - `ResourceExhausted`: no free descriptor slot, or no heap left for
    ///   the stack.
    pub fn create_periodic_task(
        &mut self,
        entry: TaskEntry,
        name: &str,
        config: TaskConfig,
    ) -> Result<TaskId, KernelError> {
        validate(&config)?;

        let bounded = crate::task::bounded_name(name);
        if self.tasks().any(|t| t.name() == bounded.as_str()) {
            return Err(KernelError::InvalidParameter("duplicate task name"));
        }

        let slot = self
            .tasks
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ResourceExhausted(Resource::TaskSlots))?;
        let id = TaskId(slot as u8);

        let stack = self.heap.alloc(config.stack_size)?;
        let context = arch::init_stack(self.heap.bytes_mut(&stack), entry);
        let release =
            ReleaseSchedule::new(self.now, config.period_ticks, config.deadline_ticks);

        let tcb = TaskControlBlock::new(id, &bounded, config, release, context, stack);
        self.ready.insert(id, tcb.absolute_deadline());
        debug!(
            "task {} '{}' created: period={} deadline={} first deadline at {}",
            id,
            tcb.name(),
            config.period_ticks,
            config.deadline_ticks,
            tcb.absolute_deadline()
        );
        self.tasks[slot] = Some(tcb);

        self.reschedule();
        Ok(id)
    }

    /// End the running task's current instance.
    ///
    /// Normally the task blocks until its next release and `true` is
    /// returned. If the next instance was already released while this one
    /// was still running, the task continues immediately with the new
    /// deadline and `false` is returned.
    pub fn wait_next_period(&mut self) -> Result<bool, KernelError> {
        let id = self.current.ok_or(KernelError::NotInTask)?;
        let tcb = self.tasks[id.index()]
            .as_mut()
            .ok_or(KernelError::NotInTask)?;

        tcb.instances_completed += 1;
        if tcb.overrun {
            tcb.overrun = false;
            return Ok(false);
        }

        tcb.instance_done = true;
        tcb.state = TaskState::Blocked(BlockReason::NextRelease);
        self.reschedule();
        Ok(true)
    }

    /// Release every task whose next period has begun.
    ///
    /// A task still working on its previous instance is credited a miss
    /// (once per instance) and keeps its single ready entry, now keyed by the
    /// new deadline.
    pub(crate) fn release_due_tasks(&mut self) {
        let now = self.now;
        for slot in 0..MAX_TASKS {
            let Some(tcb) = self.tasks[slot].as_mut() else {
                continue;
            };
            while tcb.release.is_due(now) {
                if tcb.is_incomplete() {
                    credit_miss(tcb, now, &mut self.trace, &mut self.stats);
                    tcb.overrun = true;
                }
                let deadline = tcb.release.advance();
                tcb.miss_credited = false;

                match tcb.state {
                    TaskState::Blocked(BlockReason::NextRelease) => {
                        tcb.instance_done = false;
                        tcb.state = TaskState::Ready;
                        self.ready.insert(tcb.id, deadline);
                    }
                    TaskState::Ready => self.ready.insert(tcb.id, deadline),
                    TaskState::Suspended => tcb.instance_done = false,
                    TaskState::Running | TaskState::Blocked(_) => {}
                }
            }
        }
    }
}
