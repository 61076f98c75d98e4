//! Domain layer for serial-bridge.
//!
//! Pure types with no I/O and no async runtime: the runtime configuration
//! and the session lifecycle state machine.  Everything here can be built
//! and inspected in a plain `#[test]`.

pub mod config;
pub mod session_state;

pub use config::{BridgeConfig, InvalidConfig, ListenSettings, RelayTuning, SerialSettings};
pub use session_state::SessionState;
