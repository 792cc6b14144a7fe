//! # Ready Structure
//!
//! Deadline-ordered set of Ready tasks. Entries are `(absolute deadline,
//! task id)` pairs compared lexicographically, so equal deadlines are broken
//! by the lower task id and every dispatch decision is reproducible.
//!
//! Task sets are small (`MAX_TASKS`), so the structure is a bounded vector
//! kept sorted in *descending* key order: the minimum is always the last
//! element, making `peek_min`/`pop_min` O(1) while insert and remove are a
//! binary search plus a short shift.
//!
//! No locking happens here. The caller holds the scheduler critical section.

use heapless::Vec;

use crate::config::MAX_TASKS;
use crate::task::{TaskId, Tick};

/// Ready-structure key. Field order defines the ordering: deadline first,
/// then task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadyEntry {
    pub deadline: Tick,
    pub task: TaskId,
}

/// Ready tasks ordered by [`ReadyEntry`], at most one entry per task.
pub struct ReadyQueue {
    /// Sorted descending; the minimum sits at the end.
    entries: Vec<ReadyEntry, MAX_TASKS>,
}

impl ReadyQueue {
    /// An empty queue.
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add `task` with the given deadline. A task already present has its
    /// entry replaced, so a task never appears twice.
    pub fn insert(&mut self, task: TaskId, deadline: Tick) {
        self.remove(task);
        let entry = ReadyEntry { deadline, task };
        let pos = match self.entries.binary_search_by(|e| entry.cmp(e)) {
            Ok(pos) | Err(pos) => pos,
        };
        // One entry per task id and ids are below MAX_TASKS: never full.
        let _ = self.entries.insert(pos, entry);
    }

    /// Earliest entry, left in place.
    pub fn peek_min(&self) -> Option<ReadyEntry> {
        self.entries.last().copied()
    }

    /// Take the earliest entry out.
    pub fn pop_min(&mut self) -> Option<ReadyEntry> {
        self.entries.pop()
    }

    /// Remove a specific task, returning its entry if it was queued.
    pub fn remove(&mut self, task: TaskId) -> Option<ReadyEntry> {
        let pos = self.entries.iter().position(|e| e.task == task)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.entries.iter().any(|e| e.task == task)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in ascending (dispatch) order.
    pub fn iter(&self) -> impl Iterator<Item = &ReadyEntry> {
        self.entries.iter().rev()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
