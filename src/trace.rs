//! # Trace Hooks
//!
//! Out-of-band instrumentation called by the scheduler core from inside its
//! critical section: once per tick, and on every switch in and out of a
//! task. An external observer (a logic analyzer watching toggled pins, or
//! the [`TraceLog`] below) can rebuild the exact schedule from these calls.
//!
//! Hooks must finish in bounded time and must neither block nor allocate.

use heapless::Vec;

use crate::task::{TaskId, Tick};

/// A task instance still incomplete after its absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineMiss {
    pub task: TaskId,
    /// The deadline that was missed.
    pub deadline: Tick,
    /// Tick at which the miss was detected.
    pub detected_at: Tick,
}

/// Observer of scheduling events.
pub trait TraceHook {
    /// Tick `now` has been processed, before releases and dispatch.
    fn tick(&mut self, now: Tick);
    /// `task` was given the CPU.
    fn switched_in(&mut self, task: TaskId);
    /// `task` lost the CPU (preempted, blocked, suspended or deleted).
    fn switched_out(&mut self, task: TaskId);
    /// A miss was credited. Optional.
    fn deadline_missed(&mut self, _miss: &DeadlineMiss) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrace;

impl TraceHook for NoTrace {
    fn tick(&mut self, _now: Tick) {}
    fn switched_in(&mut self, _task: TaskId) {}
    fn switched_out(&mut self, _task: TaskId) {}
}

/// Hook made of plain function pointers, e.g. GPIO toggles installed by
/// the firmware. Unset entries are skipped.
#[derive(Debug, Clone, Copy)]
pub struct FnTrace {
    pub tick: Option<fn(Tick)>,
    pub switched_in: Option<fn(TaskId)>,
    pub switched_out: Option<fn(TaskId)>,
    pub deadline_missed: Option<fn(&DeadlineMiss)>,
}

impl FnTrace {
    pub const NONE: Self = Self {
        tick: None,
        switched_in: None,
        switched_out: None,
        deadline_missed: None,
    };
}

impl TraceHook for FnTrace {
    #[inline]
    fn tick(&mut self, now: Tick) {
        if let Some(f) = self.tick {
            f(now);
        }
    }

    #[inline]
    fn switched_in(&mut self, task: TaskId) {
        if let Some(f) = self.switched_in {
            f(task);
        }
    }

    #[inline]
    fn switched_out(&mut self, task: TaskId) {
        if let Some(f) = self.switched_out {
            f(task);
        }
    }

    #[inline]
    fn deadline_missed(&mut self, miss: &DeadlineMiss) {
        if let Some(f) = self.deadline_missed {
            f(miss);
        }
    }
}

/// One recorded [`TraceHook`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Tick(Tick),
    SwitchedIn(TaskId),
    SwitchedOut(TaskId),
    DeadlineMissed(DeadlineMiss),
}

/// Bounded in-memory event log. Once full, further events are counted in
/// `dropped` and discarded.
pub struct TraceLog<const N: usize> {
    events: Vec<TraceEvent, N>,
    record_ticks: bool,
    dropped: u32,
}

impl<const N: usize> TraceLog<N> {
    /// A log recording every event, ticks included.
    pub const fn new() -> Self {
        Self {
            events: Vec::new(),
            record_ticks: true,
            dropped: 0,
        }
    }

    /// A log that skips tick events and keeps only switches and misses.
    pub const fn without_ticks() -> Self {
        Self {
            events: Vec::new(),
            record_ticks: false,
            dropped: 0,
        }
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Events lost because the log was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Tasks in the order they were switched in.
    pub fn switch_ins(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.events.iter().filter_map(|e| match e {
            TraceEvent::SwitchedIn(id) => Some(*id),
            _ => None,
        })
    }

    fn push(&mut self, event: TraceEvent) {
        if self.events.push(event).is_err() {
            self.dropped = self.dropped.saturating_add(1);
        }
    }
}

impl<const N: usize> Default for TraceLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TraceHook for TraceLog<N> {
    fn tick(&mut self, now: Tick) {
        if self.record_ticks {
            self.push(TraceEvent::Tick(now));
        }
    }

    fn switched_in(&mut self, task: TaskId) {
        self.push(TraceEvent::SwitchedIn(task));
    }

    fn switched_out(&mut self, task: TaskId) {
        self.push(TraceEvent::SwitchedOut(task));
    }

    fn deadline_missed(&mut self, miss: &DeadlineMiss) {
        self.push(TraceEvent::DeadlineMissed(*miss));
    }
}
