//! [`SerialDevice`] backed by the OS serial driver through the `serialport`
//! crate.
//!
//! `serialport` is a blocking API.  Every call is moved onto tokio's blocking
//! pool with `spawn_blocking` so a one-second read never stalls the async
//! workers.  The device is opened once and then cloned with `try_clone`: the
//! reader and the writer each own an OS handle, so a pending read never holds
//! up a write going the other way.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serialport::SerialPort;
use tracing::{debug, info};

use super::{SerialDevice, SerialError};
use crate::domain::SerialSettings;

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// A serial port opened through the OS driver.
pub struct SystemSerialDevice {
    path: String,
    reader: SharedPort,
    writer: SharedPort,
}

impl SystemSerialDevice {
    /// Opens `settings.path` at `settings.baud_rate` with
    /// `settings.read_timeout` as the per-read bound.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::Open`] if the driver cannot open or clone the
    /// device (not present, permission denied, already in use).
    pub fn open(settings: &SerialSettings) -> Result<Self, SerialError> {
        let open_error = |source| SerialError::Open {
            path: settings.path.clone(),
            source,
        };

        let port = serialport::new(settings.path.as_str(), settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(open_error)?;
        let writer = port.try_clone().map_err(open_error)?;

        info!(
            "opened serial device {} at {} baud (read timeout {:?})",
            settings.path, settings.baud_rate, settings.read_timeout
        );

        Ok(Self {
            path: settings.path.clone(),
            reader: Arc::new(Mutex::new(Some(port))),
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }
}

#[async_trait]
impl SerialDevice for SystemSerialDevice {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let reader = Arc::clone(&self.reader);
        let capacity = buf.len();

        let chunk = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, SerialError> {
            let mut guard = reader.lock().map_err(|_| SerialError::Closed)?;
            let port = guard.as_mut().ok_or(SerialError::Closed)?;
            let mut chunk = vec![0u8; capacity];
            match port.read(&mut chunk) {
                Ok(n) => {
                    chunk.truncate(n);
                    Ok(chunk)
                }
                // The driver reports an elapsed read timeout as an error; to
                // the relay it is simply "nothing arrived yet".
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(SerialError::Io(e)),
            }
        })
        .await
        .map_err(|e| SerialError::Task(e.to_string()))??;

        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn write(&self, data: &[u8]) -> Result<usize, SerialError> {
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<usize, SerialError> {
            let mut guard = writer.lock().map_err(|_| SerialError::Closed)?;
            let port = guard.as_mut().ok_or(SerialError::Closed)?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(data.len())
        })
        .await
        .map_err(|e| SerialError::Task(e.to_string()))?
    }

    async fn close(&self) -> Result<(), SerialError> {
        // Dropping both boxed handles closes the OS descriptors.  A pending
        // read holds the reader lock for at most one read timeout.
        let reader = Arc::clone(&self.reader);
        let writer = Arc::clone(&self.writer);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let had_reader = reader.lock().map(|mut g| g.take().is_some()).unwrap_or(false);
            let had_writer = writer.lock().map(|mut g| g.take().is_some()).unwrap_or(false);
            if had_reader || had_writer {
                info!("closed serial device {path}");
            } else {
                debug!("serial device {path} was already closed");
            }
        })
        .await
        .map_err(|e| SerialError::Task(e.to_string()))
    }
}

/// Lists the serial ports the OS currently reports, by name.
///
/// # Errors
///
/// Returns [`SerialError::Enumerate`] if the driver cannot enumerate ports.
pub fn available_ports() -> Result<Vec<String>, SerialError> {
    let ports = serialport::available_ports().map_err(SerialError::Enumerate)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
