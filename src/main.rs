//! # EdfOS Example Firmware
//!
//! Six periodic tasks in the shape of a small serial gateway:
//!
//! | Task | Period | Behavior |
//! |------|--------|----------|
//! | `button_1_monitor` | 50 | Sends an edge message when input 0 changes |
//! | `button_2_monitor` | 50 | Sends an edge message when input 1 changes |
//! | `periodic_transmitter` | 100 | Sends a fixed string every period |
//! | `uart_receiver` | 20 | Drains all three channels into the serial sink |
//! | `load_1` | 10 | Busy work, roughly 5 ms |
//! | `load_2` | 100 | Busy work, roughly 12 ms |
//!
//! Every deadline equals its period. All sends use a zero timeout, so a
//! message that does not fit is dropped and counted in `DROPPED_MESSAGES`.
//!
//! ## Tracing
//!
//! The trace hooks mirror the schedule into `TRACE_WORD`: bit 0 toggles on
//! every tick and bit `1 + id` is high while task `id` owns the CPU. Mapping
//! the word onto GPIO pins gives a logic-analyzer view of the schedule.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use edfos::sync::Shared;
use edfos::{kernel, ChannelId, FnTrace, TaskConfig, TaskId, Tick, Transfer};

/// Message buffer size shared by all channels.
const MESSAGE_BUFFER_SIZE: usize = 25;

/// Input pins, written by the board support code.
static INPUTS: AtomicU32 = AtomicU32::new(0);
/// Bytes handed to the serial port by `uart_receiver`.
static SERIAL_BYTES: AtomicU32 = AtomicU32::new(0);
static TRACE_WORD: AtomicU32 = AtomicU32::new(0);
/// Messages dropped because the channel was full.
static DROPPED_MESSAGES: AtomicU32 = AtomicU32::new(0);
/// Instances that ran into their next release.
static OVERRUNS: AtomicU32 = AtomicU32::new(0);

static CHANNELS: Shared<Option<[ChannelId; 3]>> = Shared::new(None);

// ---------------------------------------------------------------------------
// Trace hooks
// ---------------------------------------------------------------------------

fn trace_tick(_now: Tick) {
    TRACE_WORD.fetch_xor(1, Ordering::Relaxed);
}

fn trace_switched_in(task: TaskId) {
    TRACE_WORD.fetch_or(1 << (1 + task.index()), Ordering::Relaxed);
}

fn trace_switched_out(task: TaskId) {
    TRACE_WORD.fetch_and(!(1 << (1 + task.index())), Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Kernel misuse from a task: stop under the debugger.
fn fault() -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}

fn channel(index: usize) -> ChannelId {
    match CHANNELS.lock(|c| *c) {
        Some(channels) => channels[index],
        // Channels are created before the scheduler starts
        None => fault(),
    }
}

fn end_of_instance() {
    match kernel::wait_next_period() {
        Ok(true) => {}
        // The next instance is already due; carry on with it
        Ok(false) => {
            OVERRUNS.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => fault(),
    }
}

fn send_or_drop(channel: ChannelId, message: &[u8]) {
    match kernel::send(channel, message, 0) {
        Ok(Transfer::Bytes(_)) => {}
        Ok(Transfer::TimedOut) => {
            DROPPED_MESSAGES.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => fault(),
    }
}

fn monitor_button(pin: u32, channel: ChannelId, rising: &[u8], falling: &[u8]) -> ! {
    let mut last = false;
    loop {
        let level = INPUTS.load(Ordering::Relaxed) & (1 << pin) != 0;
        if level != last {
            last = level;
            let message = if level { rising } else { falling };
            send_or_drop(channel, message);
        }
        end_of_instance();
    }
}

extern "C" fn button_1_monitor() -> ! {
    monitor_button(0, channel(0), b"Rising Edge on Button 1", b"Falling Edge on Button 1")
}

extern "C" fn button_2_monitor() -> ! {
    monitor_button(1, channel(1), b"Rising Edge on Button 2", b"Falling Edge on Button 2")
}

extern "C" fn periodic_transmitter() -> ! {
    let ch = channel(2);
    loop {
        send_or_drop(ch, b"This is Periodic String");
        end_of_instance();
    }
}

extern "C" fn uart_receiver() -> ! {
    let mut rx = [0u8; MESSAGE_BUFFER_SIZE];
    loop {
        for index in 0..3 {
            match kernel::receive(channel(index), &mut rx, 0) {
                Ok(Transfer::Bytes(n)) => {
                    SERIAL_BYTES.fetch_add(n as u32, Ordering::Relaxed);
                }
                // Nothing queued on this channel
                Ok(Transfer::TimedOut) => {}
                Err(_) => fault(),
            }
        }
        end_of_instance();
    }
}

fn busy_loop(iterations: u32) {
    for _ in 0..iterations {
        cortex_m::asm::nop();
    }
}

extern "C" fn load_1() -> ! {
    loop {
        busy_loop(33_333);
        end_of_instance();
    }
}

extern "C" fn load_2() -> ! {
    loop {
        busy_loop(80_000);
        end_of_instance();
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init(FnTrace {
        tick: Some(trace_tick),
        switched_in: Some(trace_switched_in),
        switched_out: Some(trace_switched_out),
        deadline_missed: None,
    });

    let channels = [
        kernel::create_channel(MESSAGE_BUFFER_SIZE).expect("channel 1"),
        kernel::create_channel(MESSAGE_BUFFER_SIZE).expect("channel 2"),
        kernel::create_channel(MESSAGE_BUFFER_SIZE).expect("channel 3"),
    ];
    CHANNELS.lock(|c| *c = Some(channels));

    let tasks: [(extern "C" fn() -> !, &str, u32); 6] = [
        (button_1_monitor, "button_1", 50),
        (button_2_monitor, "button_2", 50),
        (periodic_transmitter, "transmitter", 100),
        (uart_receiver, "uart_receiver", 20),
        (load_1, "load_1", 10),
        (load_2, "load_2", 100),
    ];
    for (entry, name, period) in tasks {
        kernel::create_periodic_task(entry, name, TaskConfig::periodic(period))
            .expect("task creation");
    }

    match kernel::start(cp) {
        Ok(never) => match never {},
        Err(e) => panic!("scheduler start failed: {}", e),
    }
}
