//! Serial device infrastructure.
//!
//! The relay never talks to a driver directly; it goes through the
//! [`SerialDevice`] trait so the same session code runs against real
//! hardware ([`SystemSerialDevice`]) and against the in-memory
//! [`SimulatedSerialDevice`] used by tests.
//!
//! # Sharing
//!
//! One device is shared (behind an `Arc`) by the two copy tasks of the
//! active session: one task only reads, the other only writes.  The server
//! guarantees there is never more than one session, so implementations need
//! no cross-session locking.  Supporting concurrent sessions on one device
//! would require a single-writer discipline around `write`.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub mod simulated;
pub mod system;

pub use simulated::SimulatedSerialDevice;
pub use system::{available_ports, SystemSerialDevice};

/// Errors reported by a serial device.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The driver refused to open the device (missing, busy, no permission).
    #[error("failed to open serial device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// A read or write on an open device failed.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device has already been closed.
    #[error("serial device is closed")]
    Closed,

    /// The blocking driver call could not be completed on the blocking pool.
    #[error("serial driver task failed: {0}")]
    Task(String),

    /// Port enumeration failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
}

/// An open serial device.
///
/// Implementations must be `Send + Sync` so they can sit behind an `Arc`
/// shared by the two copy tasks of a session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SerialDevice: Send + Sync {
    /// Reads whatever is available into `buf`, waiting at most the device's
    /// read timeout.
    ///
    /// Returns `Ok(0)` when the timeout elapses with no data.  Returning
    /// fewer bytes than `buf.len()` is normal.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// Writes a prefix of `data` and returns how many bytes were accepted.
    async fn write(&self, data: &[u8]) -> Result<usize, SerialError>;

    /// Releases the device.  Calling it again is a no-op.
    async fn close(&self) -> Result<(), SerialError>;
}

/// Writes all of `data`, looping over partial writes.
///
/// # Errors
///
/// Propagates the first write error, and reports a write that accepts zero
/// bytes as [`std::io::ErrorKind::WriteZero`].
pub async fn write_all(device: &dyn SerialDevice, mut data: &[u8]) -> Result<(), SerialError> {
    while !data.is_empty() {
        let n = device.write(data).await?;
        if n == 0 {
            return Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "serial device accepted zero bytes",
            )));
        }
        data = &data[n..];
    }
    Ok(())
}
