//! # Kernel Errors
//!
//! Every fallible kernel operation reports to its immediate caller through
//! [`KernelError`]. None of these are fatal: the only fatal condition is a
//! failed [`Scheduler::start`](crate::scheduler::Scheduler::start), which the
//! firmware treats as an aborted boot.
//!
//! Deadline misses and channel timeouts are not errors. A miss is recorded as a
//! counter increment plus a [`DeadlineMiss`](crate::trace::DeadlineMiss) event,
//! and a timeout is the zero-progress [`Transfer::TimedOut`](crate::channel::Transfer)
//! result.

use thiserror::Error;

/// The pool a failed allocation was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// All `MAX_TASKS` descriptor slots are in use.
    TaskSlots,
    /// All `MAX_CHANNELS` channel slots are in use.
    ChannelSlots,
    /// Not enough contiguous bytes left in the heap budget.
    Memory,
    /// The heap's region table is full.
    Regions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("resource exhausted: {0:?}")]
    ResourceExhausted(Resource),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The operation has to be issued by a running task.
    #[error("no task is running")]
    NotInTask,
}
