// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded kernel message queues.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{KernelError, Result, Wait};

/// Metadata of a dequeued message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortMessage {
    /// Message code supplied by the writer.
    pub code: i32,
    /// Full size of the message; may exceed the bytes copied out.
    pub size: usize,
}

struct QueueState {
    messages: VecDeque<(i32, Vec<u8>)>,
    closed: bool,
    pending_interrupts: usize,
}

pub(crate) struct PortQueue {
    name: String,
    capacity: usize,
    state: Mutex<QueueState>,
    readable: Condvar,
    writable: Condvar,
}

impl PortQueue {
    pub(crate) fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            capacity,
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(capacity),
                closed: false,
                pending_interrupts: 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.messages.clear();
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub(crate) fn interrupt(&self) {
        let mut state = self.state.lock();
        state.pending_interrupts += 1;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub(crate) fn write(&self, code: i32, bytes: &[u8], wait: Wait) -> Result<()> {
        let deadline = wait.deadline();
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(KernelError::BadPortId);
            }
            if state.messages.len() < self.capacity {
                state.messages.push_back((code, bytes.to_vec()));
                self.readable.notify_one();
                return Ok(());
            }
            block(&mut state, &self.writable, wait, deadline)?;
        }
    }

    pub(crate) fn read(&self, buffer: &mut [u8], wait: Wait) -> Result<PortMessage> {
        let deadline = wait.deadline();
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(KernelError::BadPortId);
            }
            if let Some((code, bytes)) = state.messages.pop_front() {
                self.writable.notify_one();
                let copied = bytes.len().min(buffer.len());
                buffer[..copied].copy_from_slice(&bytes[..copied]);
                if copied < bytes.len() {
                    log::debug!("ufs-abi: port {} truncated {} byte message", self.name, bytes.len());
                }
                return Ok(PortMessage { code, size: bytes.len() });
            }
            block(&mut state, &self.readable, wait, deadline)?;
        }
    }
}

/// Sleeps once on `condvar`, surfacing interruption, timeout and polling.
fn block(
    state: &mut MutexGuard<'_, QueueState>,
    condvar: &Condvar,
    wait: Wait,
    deadline: Option<Instant>,
) -> Result<()> {
    if state.pending_interrupts > 0 {
        state.pending_interrupts -= 1;
        return Err(KernelError::Interrupted);
    }
    if wait.polls() {
        return Err(KernelError::WouldBlock);
    }
    match deadline {
        Some(deadline) => {
            if condvar.wait_until(state, deadline).timed_out() {
                if state.pending_interrupts > 0 {
                    state.pending_interrupts -= 1;
                    return Err(KernelError::Interrupted);
                }
                return Err(KernelError::TimedOut);
            }
        }
        None => condvar.wait(state),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crate::{Kernel, KernelError, Wait};

    #[test]
    fn single_slot_roundtrip() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "slot").unwrap();
        kernel.write_port(port, 7, b"hello", Wait::Blocking).unwrap();
        assert_eq!(
            kernel.write_port(port, 7, b"again", Wait::NonBlocking).unwrap_err(),
            KernelError::WouldBlock
        );
        let mut buf = [0u8; 16];
        let msg = kernel.read_port(port, &mut buf, Wait::NonBlocking).unwrap();
        assert_eq!(msg.code, 7);
        assert_eq!(&buf[..msg.size], b"hello");
    }

    #[test]
    fn poll_and_timeout_on_empty_port() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "empty").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            kernel.read_port(port, &mut buf, Wait::NonBlocking).unwrap_err(),
            KernelError::WouldBlock
        );
        assert_eq!(
            kernel.read_port(port, &mut buf, Wait::Timeout(Duration::ZERO)).unwrap_err(),
            KernelError::WouldBlock
        );
        assert_eq!(
            kernel.read_port(port, &mut buf, Wait::Timeout(Duration::from_millis(10))).unwrap_err(),
            KernelError::TimedOut
        );
    }

    #[test]
    fn oversized_message_reports_full_size() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "big").unwrap();
        kernel.write_port(port, 0, &[1u8; 64], Wait::Blocking).unwrap();
        let mut buf = [0u8; 8];
        let msg = kernel.read_port(port, &mut buf, Wait::Blocking).unwrap();
        assert_eq!(msg.size, 64);
        assert_eq!(buf, [1u8; 8]);
    }

    #[test]
    fn interrupt_wakes_blocked_reader() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "intr").unwrap();
        let reader = {
            let kernel = kernel.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                kernel.read_port(port, &mut buf, Wait::Blocking)
            })
        };
        thread::sleep(Duration::from_millis(20));
        kernel.interrupt_port(port).unwrap();
        assert_eq!(reader.join().unwrap().unwrap_err(), KernelError::Interrupted);
    }

    #[test]
    fn pending_message_wins_over_interrupt() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "order").unwrap();
        kernel.interrupt_port(port).unwrap();
        kernel.write_port(port, 0, b"x", Wait::Blocking).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(kernel.read_port(port, &mut buf, Wait::Blocking).unwrap().size, 1);
        assert_eq!(
            kernel.read_port(port, &mut buf, Wait::Blocking).unwrap_err(),
            KernelError::Interrupted
        );
    }

    #[test]
    fn delete_fails_waiters() {
        let kernel = Kernel::new();
        let port = kernel.create_port(1, "gone").unwrap();
        let reader = {
            let kernel = kernel.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                kernel.read_port(port, &mut buf, Wait::Blocking)
            })
        };
        thread::sleep(Duration::from_millis(20));
        kernel.delete_port(port).unwrap();
        assert_eq!(reader.join().unwrap().unwrap_err(), KernelError::BadPortId);
        assert_eq!(kernel.port_count(), 0);
        assert_eq!(
            kernel.write_port(port, 0, b"x", Wait::Blocking).unwrap_err(),
            KernelError::BadPortId
        );
    }
}
