//! In-memory serial device for tests and demos.
//!
//! Behaves like a real port opened with a read timeout: `read` returns
//! whatever has been injected, or `Ok(0)` after the timeout elapses.  Every
//! write is recorded so tests can assert on exactly what reached the
//! "device", and failures can be injected to exercise the retry policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{SerialDevice, SerialError};

#[derive(Debug, Default)]
struct Buffers {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    write_calls: usize,
    closed: bool,
}

/// A fake serial port living entirely in memory.
#[derive(Debug)]
pub struct SimulatedSerialDevice {
    read_timeout: Duration,
    buffers: Mutex<Buffers>,
    rx_ready: Notify,
    close_calls: AtomicU32,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl SimulatedSerialDevice {
    /// Creates an open device whose reads wait at most `read_timeout`.
    pub fn new(read_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            read_timeout,
            buffers: Mutex::new(Buffers::default()),
            rx_ready: Notify::new(),
            close_calls: AtomicU32::new(0),
            failing_reads: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        })
    }

    /// Makes `data` available to the next reads, as if the device sent it.
    pub fn inject(&self, data: &[u8]) {
        self.buffers().rx.extend(data);
        self.rx_ready.notify_one();
    }

    /// Everything written to the device so far, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.buffers().tx.clone()
    }

    /// Number of successful `write` calls.
    pub fn write_calls(&self) -> usize {
        self.buffers().write_calls
    }

    /// Number of times `close` was called.
    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// `true` once the device has been closed.
    pub fn is_closed(&self) -> bool {
        self.buffers().closed
    }

    /// Makes the next `count` reads fail with an I/O error.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with an I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        // A panic while holding this lock can only come from a failing test;
        // keep serving the data rather than cascading the panic.
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_injected_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn drain_into(&self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let mut buffers = self.buffers();
        if buffers.closed {
            return Err(SerialError::Closed);
        }
        let n = buf.len().min(buffers.rx.len());
        for (slot, byte) in buf.iter_mut().zip(buffers.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[async_trait]
impl SerialDevice for SimulatedSerialDevice {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SerialError> {
        if Self::take_injected_failure(&self.failing_reads) {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected read failure",
            )));
        }

        let n = self.drain_into(buf)?;
        if n > 0 || buf.is_empty() {
            return Ok(n);
        }

        // Nothing buffered: wait for an injection or the timeout.
        // `notify_one` stores a permit, so an injection racing this wait is
        // not lost.
        let _ = tokio::time::timeout(self.read_timeout, self.rx_ready.notified()).await;
        self.drain_into(buf)
    }

    async fn write(&self, data: &[u8]) -> Result<usize, SerialError> {
        if Self::take_injected_failure(&self.failing_writes) {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }

        let mut buffers = self.buffers();
        if buffers.closed {
            return Err(SerialError::Closed);
        }
        buffers.tx.extend_from_slice(data);
        buffers.write_calls += 1;
        Ok(data.len())
    }

    async fn close(&self) -> Result<(), SerialError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.buffers().closed = true;
        // Wake a reader parked in `read` so it sees the closed flag now.
        self.rx_ready.notify_one();
        Ok(())
    }
}
