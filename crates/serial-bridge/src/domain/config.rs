//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from CLI arguments layered over the optional TOML
//! tuning file; tests build it directly.
//!
//! | Setting                 | Default    |
//! |-------------------------|------------|
//! | listen host             | `0.0.0.0`  |
//! | listen port             | `4999`     |
//! | serial read timeout     | 1 second   |
//! | socket chunk size       | 1024 bytes |
//! | serial retry pause      | 100 ms     |
//! | accept retry pause      | 1 second   |

use std::time::Duration;

use thiserror::Error;

/// Default TCP port the bridge listens on.
pub const DEFAULT_PORT: u16 = 4999;
/// Default bind host: all IPv4 interfaces.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default bounded wait for one serial read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Default maximum number of bytes read from the socket per step.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Default pause after a failed serial read or write.
pub const DEFAULT_SERIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Default pause after a failed `accept`.
pub const DEFAULT_ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A configuration value that cannot be used to start the bridge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("serial device path is empty")]
    EmptyDevicePath,
    #[error("baud rate must be greater than zero")]
    ZeroBaudRate,
    #[error("serial read timeout must be greater than zero")]
    ZeroReadTimeout,
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("bind host is empty")]
    EmptyBindHost,
}

/// How to open the serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// OS path of the device, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Line speed in bits per second.
    pub baud_rate: u32,
    /// Upper bound on how long a single read may block.
    ///
    /// This is also the upper bound on how long the serial→socket task takes
    /// to notice that its session has stopped.
    pub read_timeout: Duration,
}

impl SerialSettings {
    /// Settings for `path` at `baud_rate` with the default read timeout.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Where the TCP listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenSettings {
    /// IP literal or resolvable host name.
    pub host: String,
    /// TCP port; `0` lets the OS choose (useful in tests).
    pub port: u16,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Knobs for the relay loops and the accept loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTuning {
    /// Maximum bytes read from the socket in one step.
    pub chunk_size: usize,
    /// Pause after a serial read/write failure before the next attempt.
    pub serial_retry_delay: Duration,
    /// Pause after a failed `accept` before accepting again.
    pub accept_retry_delay: Duration,
}

impl Default for RelayTuning {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            serial_retry_delay: DEFAULT_SERIAL_RETRY_DELAY,
            accept_retry_delay: DEFAULT_ACCEPT_RETRY_DELAY,
        }
    }
}

/// All runtime configuration for one bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub serial: SerialSettings,
    pub listen: ListenSettings,
    pub tuning: RelayTuning,
}

impl BridgeConfig {
    /// Config for `path` at `baud_rate` with every other setting at its default.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            serial: SerialSettings::new(path, baud_rate),
            listen: ListenSettings::default(),
            tuning: RelayTuning::default(),
        }
    }

    /// Checks the values that would otherwise fail deep inside the driver
    /// or turn a relay loop into a busy spin.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.serial.path.trim().is_empty() {
            return Err(InvalidConfig::EmptyDevicePath);
        }
        if self.serial.baud_rate == 0 {
            return Err(InvalidConfig::ZeroBaudRate);
        }
        if self.serial.read_timeout.is_zero() {
            return Err(InvalidConfig::ZeroReadTimeout);
        }
        if self.tuning.chunk_size == 0 {
            return Err(InvalidConfig::ZeroChunkSize);
        }
        if self.listen.host.trim().is_empty() {
            return Err(InvalidConfig::EmptyBindHost);
        }
        Ok(())
    }

    /// `host:port` as shown in log lines.
    pub fn listen_display(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
