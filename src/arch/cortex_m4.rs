//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick as the scheduler tick, PendSV as the deferred context switch.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack (plus S0–S15/FPSCR when the task used the FPU). PendSV
//! saves R4–R11 and EXC_RETURN (plus S16–S31 for FPU frames) below that, hands
//! the resulting stack pointer to the scheduler and restores whichever task
//! the scheduler returns.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority (0xFF). They cannot
//! preempt each other, and PendSV only runs once every other handler has
//! finished, so a switch never lands in the middle of an ISR.

use core::arch::{asm, global_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::arch::{FRAME_WORDS, SW_FRAME_WORDS};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put PendSV and SysTick at the lowest priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: called before the first task starts; no priority-based
    // critical sections exist yet.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// Switch requests
// ---------------------------------------------------------------------------

/// Pend PendSV. The switch happens as soon as no other handler is active
/// and interrupts are enabled.
#[inline]
pub fn request_context_switch() {
    SCB::set_pendsv();
}

/// Let a switch requested inside the last critical section take place
/// before execution continues.
#[inline]
pub fn wait_for_switch() {
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

pub extern "C" fn idle_task() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Return address of every task body. Task bodies never return, so
/// reaching this is a bug; park the CPU where a debugger can see it.
pub extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching Thread mode to PSP and jumping to its
/// entry point. Interrupts are enabled on the way.
///
/// # Safety
/// Must be called exactly once, from Thread mode on MSP, with interrupts
/// disabled and `sp` pointing at a frame built by
/// [`init_stack`](crate::arch::init_stack).
pub unsafe fn start_first_task(sp: usize) -> ! {
    let frame = sp as *const u32;
    let lr = frame.add(SW_FRAME_WORDS + 5).read();
    let pc = frame.add(SW_FRAME_WORDS + 6).read() | 1;
    // Discard the whole initial frame: the task starts with an empty stack
    let psp = sp + FRAME_WORDS * 4;

    asm!(
        "msr psp, {psp}",
        "mov {tmp}, #2",
        "msr control, {tmp}",
        "isb",
        "mov lr, {lr}",
        "cpsie i",
        "bx {pc}",
        psp = in(reg) psp,
        lr = in(reg) lr,
        pc = in(reg) pc,
        tmp = out(reg) _,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// Sequence:
// 1. Save R4-R11 and EXC_RETURN (plus S16-S31 for an FPU frame) on PSP
// 2. edf_switch_context(psp) stores it and returns the next task's PSP
// 3. Restore the same set from the new stack and return through its
//    EXC_RETURN
#[cfg(target_abi = "eabihf")]
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    tst lr, #0x10",
    "    it eq",
    "    vstmdbeq r0!, {{s16-s31}}",
    "    stmdb r0!, {{r4-r11, lr}}",
    "    bl edf_switch_context",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    tst lr, #0x10",
    "    it eq",
    "    vldmiaeq r0!, {{s16-s31}}",
    "    msr psp, r0",
    "    bx lr",
    ".size PendSV, . - PendSV",
);

#[cfg(not(target_abi = "eabihf"))]
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11, lr}}",
    "    bl edf_switch_context",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    msr psp, r0",
    "    bx lr",
    ".size PendSV, . - PendSV",
);

/// Called from PendSV with the outgoing task's saved stack pointer.
/// Returns the stack pointer to restore.
#[no_mangle]
extern "C" fn edf_switch_context(psp: u32) -> u32 {
    kernel::switch_context(psp as usize) as u32
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Scheduler tick entry point, called at `TICK_HZ`.
#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn SysTick() {
    kernel::on_tick();
}
