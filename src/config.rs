//! # EdfOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time; nothing here can change once the
//! scheduler has started.

use static_assertions::const_assert;

/// Maximum number of periodic tasks the system can manage simultaneously.
/// Bounds the descriptor table and the ready structure. Task ids are `u8`.
pub const MAX_TASKS: usize = 16;

/// Maximum number of message channels.
pub const MAX_CHANNELS: usize = 8;

/// Tick frequency in Hz. One tick is the unit of every period, deadline
/// and channel timeout.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Total heap budget in bytes shared by task stacks, the idle stack and
/// channel storage.
pub const HEAP_SIZE: usize = 13 * 1024;

/// Stack size used by callers that have no better estimate: 90 words.
pub const DEFAULT_STACK_SIZE: usize = 90 * 4;

/// Smallest accepted task stack. Must hold the initial exception frame
/// (16 words) with room to spare.
pub const MIN_STACK_SIZE: usize = 128;

/// Stack reserved for the idle task when the scheduler starts.
pub const IDLE_STACK_SIZE: usize = DEFAULT_STACK_SIZE;

/// Maximum length of a task name in bytes. Longer names are truncated.
pub const MAX_NAME_LEN: usize = 20;

/// Every region carved from the heap is a multiple of this and starts on it
/// (AAPCS stack alignment).
pub const HEAP_ALIGN: usize = 8;

/// Live heap regions: one stack per task, one buffer per channel, the idle stack.
pub const MAX_REGIONS: usize = MAX_TASKS + MAX_CHANNELS + 1;

const_assert!(MAX_TASKS <= u8::MAX as usize);
const_assert!(MAX_CHANNELS <= u8::MAX as usize);
const_assert!(HEAP_SIZE % HEAP_ALIGN == 0);
const_assert!(MIN_STACK_SIZE >= 16 * 4);
const_assert!(DEFAULT_STACK_SIZE >= MIN_STACK_SIZE);
const_assert!(IDLE_STACK_SIZE <= HEAP_SIZE);
