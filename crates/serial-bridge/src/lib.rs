//! serial-bridge library crate.
//!
//! Exposes one serial (UART) device to one TCP client at a time.  Bytes from
//! the client are written to the device unchanged, and bytes read from the
//! device are sent to the client unchanged.  There is no framing, no
//! protocol and no authentication.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! TCP client (raw bytes)
//!         ↕
//! [serial-bridge]
//!   ├── domain/           Pure types: BridgeConfig, SessionState
//!   ├── application/      BridgeSession: the two copy loops and their teardown
//!   └── infrastructure/
//!         ├── serial/     SerialDevice trait, OS-backed and simulated devices
//!         ├── server      Listener, accept loop, startup errors
//!         └── storage/    Optional TOML tuning file
//!         ↕
//! Serial device (/dev/ttyUSB0, COM3, ...)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async runtime.
//! - `application` depends on `domain` and on the `SerialDevice` trait only,
//!   never on a concrete device or on the listener.
//! - `infrastructure` wires concrete devices and sockets to the application.

/// Domain layer: configuration and session lifecycle types (no I/O).
pub mod domain;

/// Application layer: the per-client relay session.
pub mod application;

/// Infrastructure layer: serial devices, TCP server and config file.
pub mod infrastructure;
