//! # Architecture Abstraction Layer
//!
//! The hardware boundary of the scheduler. The core never touches registers;
//! it only asks the port to
//! - lay out a fresh task's initial stack frame ([`init_stack`]),
//! - request a deferred context switch (`request_context_switch`),
//! - let a pending switch happen before a blocked call is retried
//!   (`wait_for_switch`).
//!
//! The Cortex-M4 port implements these with PendSV and SysTick. Every other
//! target gets a host stub so the scheduler can be exercised by unit tests.

use crate::task::{Context, TaskEntry};

#[cfg(target_arch = "arm")]
pub mod cortex_m4;
#[cfg(target_arch = "arm")]
pub use cortex_m4::{idle_task, request_context_switch, task_exit, wait_for_switch};

#[cfg(not(target_arch = "arm"))]
mod host;
#[cfg(not(target_arch = "arm"))]
pub use host::{idle_task, request_context_switch, task_exit, wait_for_switch};

/// Software-saved part of a frame: R4–R11 and the EXC_RETURN value.
pub const SW_FRAME_WORDS: usize = 9;
/// Part stacked by the hardware on exception entry: R0–R3, R12, LR, PC, xPSR.
pub const HW_FRAME_WORDS: usize = 8;
pub const FRAME_WORDS: usize = SW_FRAME_WORDS + HW_FRAME_WORDS;

/// Return to Thread mode on the process stack, basic frame.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;
/// Thumb bit; the only xPSR bit a fresh task needs.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// Build the frame a task is first switched in from, at the top of `stack`.
///
/// The frame looks exactly as if the task had been interrupted just before
/// its first instruction, so the regular switch path can restore it.
/// `stack` must start on an 8-byte boundary and be a multiple of 8 long.
pub fn init_stack(stack: &mut [u8], entry: TaskEntry) -> Context {
    let top = stack.len();
    let base = top - FRAME_WORDS * 4;

    let mut frame = [0u32; FRAME_WORDS];
    frame[8] = EXC_RETURN_THREAD_PSP;
    // Hardware frame: r0-r3, r12 stay zero
    frame[SW_FRAME_WORDS + 5] = task_exit as usize as u32;
    frame[SW_FRAME_WORDS + 6] = entry as usize as u32 & !1;
    frame[SW_FRAME_WORDS + 7] = INITIAL_XPSR;

    for (word, bytes) in frame.iter().zip(stack[base..].chunks_exact_mut(4)) {
        bytes.copy_from_slice(&word.to_le_bytes());
    }
    Context::new(stack.as_ptr() as usize + base)
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn entry() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn word(stack: &[u8], i: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&stack[i * 4..i * 4 + 4]);
        u32::from_le_bytes(b)
    }

    #[test]
    fn test_initial_frame_layout() {
        let mut stack = [0xEEu8; 256];
        let ctx = init_stack(&mut stack, entry);

        let base = stack.as_ptr() as usize;
        assert_eq!(ctx.stack_pointer(), base + 256 - FRAME_WORDS * 4);

        let first = 256 / 4 - FRAME_WORDS;
        for i in 0..8 {
            assert_eq!(word(&stack, first + i), 0);
        }
        assert_eq!(word(&stack, first + 8), EXC_RETURN_THREAD_PSP);
        let hw = first + SW_FRAME_WORDS;
        assert_eq!(word(&stack, hw + 6), entry as usize as u32 & !1);
        assert_eq!(word(&stack, hw + 7), INITIAL_XPSR);
        // Hardware frame starts 8-byte aligned
        assert_eq!((hw * 4) % 8, 0);

        // Nothing below the frame is touched
        assert!(stack[..first * 4].iter().all(|&b| b == 0xEE));
    }
}
