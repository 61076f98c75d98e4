//! Lifecycle state of a bridge session.
//!
//! ```text
//! Starting ──begin──▶ Running ──stop──▶ Stopping ──finish──▶ Stopped
//!     └───────────────stop─────────────────▲
//! ```
//!
//! The state is stored in an `AtomicU8` by the application layer, so the
//! enum converts to and from `u8`.

use std::fmt;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Constructed; copy tasks not launched yet.
    Starting = 0,
    /// Both copy tasks launched.
    Running = 1,
    /// A copy task hit a terminal condition (or a stop was requested); the
    /// running flag is cleared and the other task is winding down.
    Stopping = 2,
    /// Both tasks joined and the socket closed.
    Stopped = 3,
}

impl SessionState {
    /// Decodes a value previously produced by `state as u8`.
    ///
    /// Unknown values map to `Stopped`; only the session itself writes the
    /// atomic, so this arm is unreachable in practice.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// `true` once the session has left `Running`.
    pub fn is_winding_down(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}
