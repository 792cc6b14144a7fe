//! Host stand-in for the Cortex-M4 port. Switches are only bookkeeping here:
//! tests play the role of PendSV by calling the scheduler directly.

pub extern "C" fn idle_task() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

pub extern "C" fn task_exit() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[inline]
pub fn request_context_switch() {}

#[inline]
pub fn wait_for_switch() {
    core::hint::spin_loop();
}
