//! Application layer for serial-bridge.
//!
//! Holds the relay itself: one [`BridgeSession`] per accepted client, running
//! the serial→socket and socket→serial copy loops and tearing both down
//! together.  The session only sees the serial device through the
//! [`SerialDevice`](crate::infrastructure::serial::SerialDevice) trait and
//! the socket through boxed `AsyncRead`/`AsyncWrite` halves, so it can be
//! driven entirely in memory by tests.

pub mod session;

pub use session::{BridgeSession, SessionControl, SessionEnd, SessionHandle, SessionReport};
