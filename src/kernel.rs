//! # Kernel
//!
//! The process-wide scheduler instance and the task-facing API.
//!
//! Every function here runs its scheduler operation inside one critical
//! section and, if dispatch picked a different task, pends a context switch
//! that happens right after the section ends. Blocking calls (`send`,
//! `receive`, `wait_next_period`) resume after the switch back and, for
//! channels, retry until the operation finishes.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()                  ← Install trace hooks
//!         ├─► kernel::create_channel()        ← Channels (×N)
//!         ├─► kernel::create_periodic_task()  ← Register tasks (×N)
//!         └─► kernel::start()                 ← Launch scheduler
//!               ├─► Reserve the idle stack (only fatal error)
//!               ├─► Configure SysTick, set interrupt priorities
//!               └─► Start the earliest-deadline task
//! ```

use core::fmt;

use crate::arch;
use crate::channel::{ChannelId, Step, Transfer};
use crate::error::KernelError;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::sync::Shared;
use crate::task::{TaskConfig, TaskEntry, TaskId, Tick};
use crate::trace::FnTrace;

static SCHEDULER: Shared<Scheduler<FnTrace>> = Shared::new(Scheduler::new(FnTrace::NONE));

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler<FnTrace>) -> R) -> R {
    SCHEDULER.lock(|sched| {
        let result = f(sched);
        if sched.take_switch_request() {
            arch::request_context_switch();
        }
        result
    })
}

/// Install the trace hooks. Call before `start`.
pub fn init(trace: FnTrace) {
    with_scheduler(|s| *s.trace_mut() = trace);
}

pub fn create_periodic_task(
    entry: TaskEntry,
    name: &str,
    config: TaskConfig,
) -> Result<TaskId, KernelError> {
    with_scheduler(|s| s.create_periodic_task(entry, name, config))
}

pub fn create_channel(capacity: usize) -> Result<ChannelId, KernelError> {
    with_scheduler(|s| s.create_channel(capacity))
}

/// Delete a task. A task deleting itself does not return.
pub fn delete_task(id: TaskId) -> Result<(), KernelError> {
    let own = with_scheduler(|s| {
        let own = s.current() == Some(id);
        s.delete_task(id).map(|()| own)
    })?;
    if own {
        loop {
            arch::wait_for_switch();
        }
    }
    Ok(())
}

pub fn suspend(id: TaskId) -> Result<(), KernelError> {
    with_scheduler(|s| s.suspend(id))?;
    arch::wait_for_switch();
    Ok(())
}

pub fn resume(id: TaskId) -> Result<(), KernelError> {
    with_scheduler(|s| s.resume(id))?;
    arch::wait_for_switch();
    Ok(())
}

pub fn yield_now() {
    with_scheduler(|s| s.yield_now());
    arch::wait_for_switch();
}

/// End the calling task's current instance and sleep until its next
/// release. Returns `false` if the next instance was already due.
pub fn wait_next_period() -> Result<bool, KernelError> {
    let blocked = with_scheduler(|s| s.wait_next_period())?;
    arch::wait_for_switch();
    Ok(blocked)
}

/// Send on behalf of the calling task, blocking up to `timeout` ticks.
pub fn send(ch: ChannelId, data: &[u8], timeout: u32) -> Result<Transfer, KernelError> {
    loop {
        match with_scheduler(|s| s.send(ch, data, timeout))? {
            Step::Done(transfer) => return Ok(transfer),
            Step::Blocked => arch::wait_for_switch(),
        }
    }
}

/// Receive on behalf of the calling task, blocking up to `timeout` ticks.
pub fn receive(ch: ChannelId, buf: &mut [u8], timeout: u32) -> Result<Transfer, KernelError> {
    loop {
        match with_scheduler(|s| s.receive(ch, &mut *buf, timeout))? {
            Step::Done(transfer) => return Ok(transfer),
            Step::Blocked => arch::wait_for_switch(),
        }
    }
}

pub fn tick_count() -> Tick {
    with_scheduler(|s| s.now())
}

pub fn current_task() -> Option<TaskId> {
    with_scheduler(|s| s.current())
}

pub fn stats() -> SchedulerStats {
    with_scheduler(|s| s.stats())
}

pub fn deadline_misses(id: TaskId) -> Option<u32> {
    with_scheduler(|s| s.task(id).map(|t| t.deadline_misses()))
}

/// Bytes left in the kernel heap now, and the lowest it has ever been.
pub fn heap_free() -> (usize, usize) {
    with_scheduler(|s| (s.heap().free_bytes(), s.heap().min_free_bytes()))
}

pub fn write_run_time_stats<W: fmt::Write>(out: &mut W) -> fmt::Result {
    with_scheduler(|s| s.write_run_time_stats(out))
}

/// Timer interrupt body.
pub fn on_tick() {
    with_scheduler(|s| {
        s.tick();
    });
}

/// Port entry used by the switch handler.
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
pub(crate) fn switch_context(saved_sp: usize) -> usize {
    SCHEDULER.lock(|s| s.switch_context(saved_sp))
}

/// Start the scheduler. Does not return on success.
///
/// # Errors
/// Only if the idle task's stack cannot be reserved; nothing has been
/// started in that case.
#[cfg(target_arch = "arm")]
pub fn start(
    mut core_peripherals: cortex_m::Peripherals,
) -> Result<core::convert::Infallible, KernelError> {
    use crate::arch::cortex_m4;

    // Stay masked until the first task enables interrupts
    cortex_m::interrupt::disable();

    let first_sp = SCHEDULER.lock(|s| {
        s.start().map_err(|e| {
            log::error!("scheduler start failed: {}", e);
            e
        })?;
        Ok::<_, KernelError>(s.launch())
    });
    let first_sp = match first_sp {
        Ok(sp) => sp,
        Err(e) => {
            // SAFETY: restores the state on entry to `start`.
            unsafe { cortex_m::interrupt::enable() };
            return Err(e);
        }
    };

    cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);
    cortex_m4::configure_systick(&mut core_peripherals.SYST);

    // SAFETY: called once, on MSP with interrupts masked, with the frame
    // `init_stack` built for the dispatched task (or idle).
    unsafe { cortex_m4::start_first_task(first_sp) }
}
