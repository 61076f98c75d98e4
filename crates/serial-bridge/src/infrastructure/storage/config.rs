//! TOML tuning file for the bridge.
//!
//! Every key is optional; a missing key takes the built-in default, so an
//! empty file is valid.  Unknown keys are rejected to surface typos.
//!
//! ```toml
//! [relay]
//! read_timeout_ms = 1000
//! chunk_size = 1024
//! serial_retry_delay_ms = 100
//! accept_retry_delay_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Values given on the command line override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::config::{
    RelayTuning, DEFAULT_ACCEPT_RETRY_DELAY, DEFAULT_CHUNK_SIZE, DEFAULT_READ_TIMEOUT,
    DEFAULT_SERIAL_RETRY_DELAY,
};

/// Error type for tuning-file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// Top-level contents of the tuning file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[relay]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Upper bound on one serial read, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Maximum bytes read from the socket per step.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause after a failed serial read or write, in milliseconds.
    #[serde(default = "default_serial_retry_delay_ms")]
    pub serial_retry_delay_ms: u64,
    /// Pause after a failed `accept`, in milliseconds.
    #[serde(default = "default_accept_retry_delay_ms")]
    pub accept_retry_delay_ms: u64,
}

/// `[logging]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset, e.g. `"debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
fn default_read_timeout_ms() -> u64 {
    millis(DEFAULT_READ_TIMEOUT)
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_serial_retry_delay_ms() -> u64 {
    millis(DEFAULT_SERIAL_RETRY_DELAY)
}
fn default_accept_retry_delay_ms() -> u64 {
    millis(DEFAULT_ACCEPT_RETRY_DELAY)
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            chunk_size: default_chunk_size(),
            serial_retry_delay_ms: default_serial_retry_delay_ms(),
            accept_retry_delay_ms: default_accept_retry_delay_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RelaySection {
    /// Serial read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// The relay and accept-loop knobs as domain [`RelayTuning`].
    pub fn tuning(&self) -> RelayTuning {
        RelayTuning {
            chunk_size: self.chunk_size,
            serial_retry_delay: Duration::from_millis(self.serial_retry_delay_ms),
            accept_retry_delay: Duration::from_millis(self.accept_retry_delay_ms),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the tuning file at `path`.
///
/// The file was named explicitly, so a missing file is an error rather than
/// a silent fallback to defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed or has unknown keys.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parses tuning-file TOML held in memory.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed or has unknown
/// keys.
pub fn parse_config(content: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
