//! Storage infrastructure: the optional TOML tuning file.
//!
//! The bridge keeps no state between runs.  The only thing read from disk is
//! the file passed with `--config`, which supplies relay tuning and the
//! default log level.

pub mod config;

pub use config::{load_config, parse_config, ConfigError, FileConfig, LoggingSection, RelaySection};
