//! # Message Channel
//!
//! Bounded byte-stream FIFO between tasks. A channel has a fixed capacity
//! chosen at creation, with storage carved from the kernel heap, and lives
//! for the rest of the process.
//!
//! The stream is not framed: a receiver gets whatever bytes are queued, up to
//! its buffer length, in the order they were sent.
//!
//! ## Blocking
//!
//! `send` and `receive` report either a finished [`Transfer`] or
//! [`Step::Blocked`]. On `Blocked` the calling task has been parked (its
//! absolute deadline unchanged) and dispatch has already picked another task;
//! the caller retries once it runs again. The retry either makes progress
//! or, once the timeout has expired, reports [`Transfer::TimedOut`]. The
//! kernel facade hides the retry loop from task code.
//!
//! Any successful transfer wakes every task blocked in the opposite
//! direction on the same channel.

use log::debug;

use crate::config::MAX_CHANNELS;
use crate::error::{KernelError, Resource};
use crate::memory::Region;
use crate::scheduler::Scheduler;
use crate::task::{BlockReason, TaskState, Tick, WakeReason};
use crate::trace::TraceHook;

/// Timeout that never expires.
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Handle to a channel, equal to its table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub(crate) u8);

impl ChannelId {
    /// Slot index in the channel table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outcome of a finished channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Number of bytes moved. Never zero unless the request itself was empty.
    Bytes(usize),
    /// The timeout expired without progress. The channel is unchanged.
    TimedOut,
}

impl Transfer {
    /// Bytes moved; zero on timeout.
    pub const fn bytes(self) -> usize {
        match self {
            Transfer::Bytes(n) => n,
            Transfer::TimedOut => 0,
        }
    }
}

/// Result of one attempt at a channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Finished, with or without progress.
    Done(Transfer),
    /// The calling task is parked; call again once it runs.
    Blocked,
}

/// Ring buffer state. The bytes themselves live in the heap region.
#[derive(Debug)]
pub struct MessageChannel {
    storage: Region,
    capacity: usize,
    head: usize,
    len: usize,
}

impl MessageChannel {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len
    }

    /// Append `data`. The caller has checked that it fits.
    fn write(&mut self, storage: &mut [u8], data: &[u8]) {
        let tail = (self.head + self.len) % self.capacity;
        let first = data.len().min(self.capacity - tail);
        storage[tail..tail + first].copy_from_slice(&data[..first]);
        storage[..data.len() - first].copy_from_slice(&data[first..]);
        self.len += data.len();
    }

    /// Pop `out.len()` bytes. The caller has checked that they are queued.
    fn read(&mut self, storage: &[u8], out: &mut [u8]) {
        let first = out.len().min(self.capacity - self.head);
        out[..first].copy_from_slice(&storage[self.head..self.head + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&storage[..rest]);
        self.head = (self.head + out.len()) % self.capacity;
        self.len -= out.len();
    }
}

impl<H: TraceHook> Scheduler<H> {
    /// Create a channel holding up to `capacity` bytes.
    pub fn create_channel(&mut self, capacity: usize) -> Result<ChannelId, KernelError> {
        if capacity == 0 {
            return Err(KernelError::InvalidParameter("channel capacity must be non-zero"));
        }
        let slot = self
            .channels
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ResourceExhausted(Resource::ChannelSlots))?;
        let storage = self.heap.alloc(capacity)?;

        self.channels[slot] = Some(MessageChannel {
            storage,
            capacity,
            head: 0,
            len: 0,
        });
        debug!("channel {} created with {} bytes", slot, capacity);
        Ok(ChannelId(slot as u8))
    }

    /// Queue `data` on the channel on behalf of the running task.
    ///
    /// Writes `min(data.len(), capacity)` bytes once that much space is
    /// free; longer messages are truncated to the capacity. With no room and
    /// `timeout == 0` (or no running task to park) the result is
    /// [`Transfer::TimedOut`].
    pub fn send(&mut self, ch: ChannelId, data: &[u8], timeout: u32) -> Result<Step, KernelError> {
        let channel = channel_mut(&mut self.channels, ch)?;
        let n = data.len().min(channel.capacity);
        if n > channel.free() {
            return Ok(self.park(BlockReason::Send(ch), timeout));
        }

        let storage = self.heap.bytes_mut(&channel.storage);
        channel.write(storage, &data[..n]);
        self.finish(BlockReason::Receive(ch), n)
    }

    /// Take up to `buf.len()` queued bytes on behalf of the running task.
    pub fn receive(
        &mut self,
        ch: ChannelId,
        buf: &mut [u8],
        timeout: u32,
    ) -> Result<Step, KernelError> {
        let channel = channel_mut(&mut self.channels, ch)?;
        let n = buf.len().min(channel.len);
        if n == 0 && !buf.is_empty() {
            return Ok(self.park(BlockReason::Receive(ch), timeout));
        }

        let storage = self.heap.bytes(&channel.storage);
        channel.read(storage, &mut buf[..n]);
        self.finish(BlockReason::Send(ch), n)
    }

    pub fn channel(&self, ch: ChannelId) -> Option<&MessageChannel> {
        self.channels.get(ch.index())?.as_ref()
    }

    /// Bytes currently queued.
    pub fn channel_len(&self, ch: ChannelId) -> Result<usize, KernelError> {
        self.channel(ch)
            .map(MessageChannel::len)
            .ok_or(KernelError::InvalidParameter("unknown channel"))
    }

    pub fn channel_capacity(&self, ch: ChannelId) -> Result<usize, KernelError> {
        self.channel(ch)
            .map(MessageChannel::capacity)
            .ok_or(KernelError::InvalidParameter("unknown channel"))
    }

    /// Common tail of a successful transfer.
    fn finish(&mut self, wake: BlockReason, n: usize) -> Result<Step, KernelError> {
        if let Some(tcb) = self.current.and_then(|id| self.tasks[id.index()].as_mut()) {
            tcb.clear_wait();
        }
        if n > 0 {
            self.wake_waiters(wake);
            self.reschedule();
        }
        Ok(Step::Done(Transfer::Bytes(n)))
    }

    /// No progress possible: park the running task, or give up.
    fn park(&mut self, reason: BlockReason, timeout: u32) -> Step {
        let now = self.now;
        let Some(tcb) = self.current.and_then(|id| self.tasks[id.index()].as_mut()) else {
            return Step::Done(Transfer::TimedOut);
        };
        if timeout == 0 || tcb.wake == Some(WakeReason::TimedOut) {
            tcb.clear_wait();
            return Step::Done(Transfer::TimedOut);
        }

        // A retry keeps the deadline of the first attempt
        let until = *tcb.wait_until.get_or_insert(if timeout == WAIT_FOREVER {
            Tick::MAX
        } else {
            now + timeout as Tick
        });
        if until <= now {
            tcb.clear_wait();
            return Step::Done(Transfer::TimedOut);
        }

        tcb.state = TaskState::Blocked(reason);
        tcb.wake = None;
        self.reschedule();
        Step::Blocked
    }
}

fn channel_mut(
    channels: &mut [Option<MessageChannel>; MAX_CHANNELS],
    ch: ChannelId,
) -> Result<&mut MessageChannel, KernelError> {
    channels
        .get_mut(ch.index())
        .and_then(Option::as_mut)
        .ok_or(KernelError::InvalidParameter("unknown channel"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEAP_SIZE;
    use crate::task::{TaskConfig, TaskId};
    use crate::trace::NoTrace;

    extern "C" fn body() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    const MESSAGE: &[u8] = b"This is Periodic String";

    fn done(n: usize) -> Result<Step, KernelError> {
        Ok(Step::Done(Transfer::Bytes(n)))
    }

    fn timed_out() -> Result<Step, KernelError> {
        Ok(Step::Done(Transfer::TimedOut))
    }

    /// Receiver with the earlier deadline, sender behind it.
    fn pair() -> (Scheduler<NoTrace>, TaskId, TaskId, ChannelId) {
        let mut s = Scheduler::new(NoTrace);
        let rx = s
            .create_periodic_task(body, "uart_receiver", TaskConfig::periodic(10))
            .unwrap();
        let tx = s
            .create_periodic_task(body, "transmitter", TaskConfig::periodic(20))
            .unwrap();
        let ch = s.create_channel(25).unwrap();
        s.start().unwrap();
        (s, rx, tx, ch)
    }

    #[test]
    fn test_periodic_string_scenario() {
        let mut s = Scheduler::new(NoTrace);
        let ch = s.create_channel(25).unwrap();

        assert_eq!(s.send(ch, MESSAGE, 0), done(23));
        assert_eq!(s.channel_len(ch), Ok(23));

        // Only two bytes left: the whole message does not fit
        assert_eq!(s.send(ch, MESSAGE, 0), timed_out());
        assert_eq!(s.channel_len(ch), Ok(23));

        let mut buf = [0u8; 25];
        assert_eq!(s.receive(ch, &mut buf, 0), done(23));
        assert_eq!(&buf[..23], MESSAGE);
        assert_eq!(s.channel_len(ch), Ok(0));
    }

    #[test]
    fn test_long_message_is_truncated_to_capacity() {
        let mut s = Scheduler::new(NoTrace);
        let ch = s.create_channel(25).unwrap();
        let long = [0x5Au8; 30];

        assert_eq!(s.send(ch, &long, 0), done(25));
        assert_eq!(s.channel_len(ch), Ok(25));
        assert_eq!(s.send(ch, b"x", 0), timed_out());
    }

    #[test]
    fn test_fifo_across_wraparound() {
        let mut s = Scheduler::new(NoTrace);
        let ch = s.create_channel(8).unwrap();
        let mut buf = [0u8; 8];

        assert_eq!(s.send(ch, b"abcdef", 0), done(6));
        assert_eq!(s.receive(ch, &mut buf[..4], 0), done(4));
        assert_eq!(&buf[..4], b"abcd");

        // Tail wraps past the end of storage
        assert_eq!(s.send(ch, b"ghijk", 0), done(5));
        assert_eq!(s.channel_len(ch), Ok(7));
        assert_eq!(s.receive(ch, &mut buf, 0), done(7));
        assert_eq!(&buf[..7], b"efghijk");

        let mut sent = 0u8;
        let mut got = 0u8;
        for round in 1..50usize {
            let chunk: [u8; 8] = core::array::from_fn(|i| sent.wrapping_add(i as u8));
            let n = round % 4 + 1;
            assert_eq!(s.send(ch, &chunk[..n], 0), done(n));
            sent = sent.wrapping_add(n as u8);
            let Ok(Step::Done(t)) = s.receive(ch, &mut buf[..round % 5 + 1], 0) else {
                panic!("receive did not finish");
            };
            for &b in &buf[..t.bytes()] {
                assert_eq!(b, got);
                got = got.wrapping_add(1);
            }
            while s.channel_len(ch).unwrap() > 4 {
                let Ok(Step::Done(t)) = s.receive(ch, &mut buf, 0) else {
                    panic!("receive did not finish");
                };
                for &b in &buf[..t.bytes()] {
                    assert_eq!(b, got);
                    got = got.wrapping_add(1);
                }
            }
        }
    }

    #[test]
    fn test_empty_requests_finish_immediately() {
        let mut s = Scheduler::new(NoTrace);
        let ch = s.create_channel(4).unwrap();
        assert_eq!(s.send(ch, &[], 0), done(0));
        assert_eq!(s.receive(ch, &mut [], WAIT_FOREVER), done(0));
    }

    #[test]
    fn test_outside_task_never_blocks() {
        let mut s = Scheduler::new(NoTrace);
        let ch = s.create_channel(4).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.receive(ch, &mut buf, WAIT_FOREVER), timed_out());
        assert_eq!(s.send(ch, b"full", 0), done(4));
        assert_eq!(s.send(ch, b"more", WAIT_FOREVER), timed_out());
    }

    #[test]
    fn test_receiver_blocks_and_preempts_on_send() {
        let (mut s, rx, tx, ch) = pair();
        assert_eq!(s.current(), Some(rx));

        let mut buf = [0u8; 25];
        assert_eq!(s.receive(ch, &mut buf, WAIT_FOREVER), Ok(Step::Blocked));
        assert_eq!(
            s.task(rx).unwrap().state(),
            TaskState::Blocked(BlockReason::Receive(ch))
        );
        assert_eq!(s.current(), Some(tx));

        // Blocking does not move the deadline
        s.advance(3);
        assert_eq!(s.task(rx).unwrap().absolute_deadline(), 10);

        // Receiver's deadline 10 beats the sender's 20
        assert_eq!(s.send(ch, b"hello", 0), done(5));
        assert_eq!(s.current(), Some(rx));
        assert_eq!(s.task(tx).unwrap().state(), TaskState::Ready);

        assert_eq!(s.receive(ch, &mut buf, WAIT_FOREVER), done(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(s.task(rx).unwrap().deadline_misses(), 0);
    }

    #[test]
    fn test_sender_blocks_until_space_frees() {
        let mut s = Scheduler::new(NoTrace);
        let tx = s
            .create_periodic_task(body, "tx", TaskConfig::periodic(10))
            .unwrap();
        let rx = s
            .create_periodic_task(body, "rx", TaskConfig::periodic(50))
            .unwrap();
        let ch = s.create_channel(4).unwrap();
        s.start().unwrap();

        assert_eq!(s.send(ch, b"abcd", 0), done(4));
        assert_eq!(s.send(ch, b"ef", WAIT_FOREVER), Ok(Step::Blocked));
        assert_eq!(s.current(), Some(rx));

        let mut buf = [0u8; 1];
        assert_eq!(s.receive(ch, &mut buf, 0), done(1));
        // One byte is not enough for "ef": the sender retries and parks again
        assert_eq!(s.current(), Some(tx));
        assert_eq!(s.send(ch, b"ef", WAIT_FOREVER), Ok(Step::Blocked));

        assert_eq!(s.receive(ch, &mut buf, 0), done(1));
        assert_eq!(s.current(), Some(tx));
        assert_eq!(s.send(ch, b"ef", WAIT_FOREVER), done(2));

        let mut rest = [0u8; 4];
        s.wait_next_period().unwrap();
        assert_eq!(s.current(), Some(rx));
        assert_eq!(s.receive(ch, &mut rest, 0), done(4));
        assert_eq!(&rest, b"cdef");
    }

    #[test]
    fn test_receive_timeout_expires() {
        let (mut s, rx, tx, ch) = pair();
        let mut buf = [0u8; 8];

        assert_eq!(s.receive(ch, &mut buf, 3), Ok(Step::Blocked));
        s.advance(2);
        assert_eq!(s.current(), Some(tx));

        s.tick();
        assert_eq!(s.current(), Some(rx));
        assert_eq!(s.receive(ch, &mut buf, 3), timed_out());
        assert_eq!(s.channel_len(ch), Ok(0));

        // The next wait starts a fresh timeout
        assert_eq!(s.receive(ch, &mut buf, 2), Ok(Step::Blocked));
        assert_eq!(s.task(rx).unwrap().wait_until, Some(5));
    }

    #[test]
    fn test_send_timeout_leaves_channel_unchanged() {
        let (mut s, _rx, _tx, ch) = pair();
        assert_eq!(s.send(ch, &[1; 25], 0), done(25));

        assert_eq!(s.send(ch, b"late", 1), Ok(Step::Blocked));
        s.tick();
        assert_eq!(s.send(ch, b"late", 1), timed_out());
        assert_eq!(s.channel_len(ch), Ok(25));
    }

    #[test]
    fn test_blocked_receiver_is_still_incomplete() {
        let (mut s, rx, _tx, ch) = pair();
        let mut buf = [0u8; 1];
        assert_eq!(s.receive(ch, &mut buf, WAIT_FOREVER), Ok(Step::Blocked));

        s.advance(10);
        let tcb = s.task(rx).unwrap();
        assert_eq!(tcb.deadline_misses(), 1);
        assert_eq!(tcb.absolute_deadline(), 20);
        assert_eq!(tcb.state(), TaskState::Blocked(BlockReason::Receive(ch)));
    }

    #[test]
    fn test_create_channel_errors() {
        let mut s = Scheduler::new(NoTrace);
        assert!(matches!(s.create_channel(0), Err(KernelError::InvalidParameter(_))));
        assert_eq!(
            s.create_channel(HEAP_SIZE + 1),
            Err(KernelError::ResourceExhausted(Resource::Memory))
        );
        for _ in 0..MAX_CHANNELS {
            s.create_channel(25).unwrap();
        }
        assert_eq!(
            s.create_channel(25),
            Err(KernelError::ResourceExhausted(Resource::ChannelSlots))
        );
        assert_eq!(
            s.send(ChannelId(MAX_CHANNELS as u8), b"x", 0),
            Err(KernelError::InvalidParameter("unknown channel"))
        );
    }
}
