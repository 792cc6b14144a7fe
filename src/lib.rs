//! # EdfOS: Earliest Deadline First Operating System
//!
//! A preemptive real-time scheduler for single-core ARM Cortex-M4
//! microcontrollers. Every task is periodic, and the CPU always belongs to
//! the ready task whose current instance has the earliest absolute deadline.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   create_periodic_task · wait_next_period · send/recv  │
//! ├──────────────┬──────────────────┬──────────────────────┤
//! │  Scheduler   │  Periodic Tasks  │  Message Channels    │
//! │  scheduler.rs│  periodic.rs     │  channel.rs          │
//! │  ─ tick()    │  ─ create        │  ─ send()            │
//! │  ─ dispatch  │  ─ release       │  ─ receive()         │
//! ├──────────────┴───────┬──────────┴──────────────────────┤
//! │ Ready set (ready.rs) │ Heap (memory.rs) · Trace hooks  │
//! ├──────────────────────┴─────────────────────────────────┤
//! │              Task Model (task.rs)                      │
//! │      TCB · TaskConfig · TaskState · Context            │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)               │
//! │    PendSV · SysTick · Context Switch · Stack Init      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - A task is released every `period` ticks; each instance must finish
//!   within `deadline` ticks of its release (`deadline <= period`).
//! - Releases are computed from the previous *scheduled* release, never from
//!   the current time, so deadlines do not drift.
//! - Ties on the deadline go to the lower task id.
//! - An instance still unfinished after its deadline is counted as a miss,
//!   exactly once, and reported through the trace hook and the log.
//!
//! ## Memory Model
//!
//! - **No global allocator**: stacks and channel buffers come from a fixed
//!   `HEAP_SIZE` arena inside the scheduler
//! - **Fixed tables**: `MAX_TASKS` descriptors, `MAX_CHANNELS` channels
//! - **Critical sections**: one `critical-section` mutex guards all
//!   scheduler state

#![no_std]

pub mod arch;
pub mod channel;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod periodic;
pub mod ready;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod trace;

pub use channel::{ChannelId, Step, Transfer, WAIT_FOREVER};
pub use error::{KernelError, Resource};
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{TaskConfig, TaskId, TaskState, Tick};
pub use trace::{DeadlineMiss, FnTrace, NoTrace, TraceHook, TraceLog};
