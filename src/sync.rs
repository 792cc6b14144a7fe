//! # Synchronization Primitives
//!
//! Interrupt-safe shared state for the single-core kernel. All scheduler
//! state is touched either from task context or from the SysTick/PendSV
//! handlers, so every access runs inside a critical section (interrupts
//! masked on Cortex-M through `cortex-m`'s single-core implementation of the
//! `critical-section` crate; a std mutex on the host).
//!
//! A critical section must never be held across a context switch. The
//! kernel only *requests* a switch inside one; PendSV runs after it ends.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections as short as possible to bound interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}

/// A value shared between tasks and interrupt handlers.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// Not reentrant: calling `lock` on the same value from inside `f`
    /// panics.
    #[inline]
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}
