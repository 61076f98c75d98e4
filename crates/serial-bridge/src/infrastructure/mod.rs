//! Infrastructure layer for serial-bridge.
//!
//! OS-facing adapters: the serial device driver, the TCP listener and the
//! tuning-file reader.
//!
//! **Dependency rule**: this layer may depend on `domain` and `application`;
//! the `application` layer only reaches in here for the `SerialDevice` trait.

pub mod serial;
pub mod server;
pub mod storage;

pub use server::{run_server, BridgeServer, ServerSummary, StartupError};
