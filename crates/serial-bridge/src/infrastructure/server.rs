//! TCP listener, accept loop and process-wide resource lifecycle.
//!
//! [`BridgeServer`] owns the two long-lived resources of the process: the
//! serial device and the listening socket.  Startup order is fixed:
//!
//! 1. Open the serial device.  Failure is fatal and nothing is bound.
//! 2. Bind the listener (address reuse on, backlog 1).  Failure is fatal and
//!    the serial device is closed before the error is returned.
//! 3. Accept clients one at a time; each runs to completion as a
//!    [`BridgeSession`] before the next `accept`.
//! 4. When the `running` flag is cleared, finish the current session (if
//!    any), then close the listener and the serial device exactly once.
//!
//! `accept` is polled with a short timeout so the loop notices the shutdown
//! flag even when nobody connects.

use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::BridgeSession;
use crate::domain::{BridgeConfig, InvalidConfig, ListenSettings, RelayTuning};
use crate::infrastructure::serial::{SerialDevice, SerialError, SystemSerialDevice};

/// How long one `accept` waits before the loop re-checks the shutdown flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Pending-connection queue length.  Only one client is served at a time.
const LISTEN_BACKLOG: u32 = 1;

/// Fatal errors raised before any client is served.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] InvalidConfig),

    /// The serial device could not be opened.  The listener was never bound.
    #[error("cannot open serial device: {0}")]
    DeviceOpen(#[source] SerialError),

    /// The listener could not be bound.  The serial device has been closed.
    #[error("failed to bind TCP listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Totals reported when the accept loop exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSummary {
    pub sessions_served: u64,
}

/// The serial device plus the listener that feeds it clients.
pub struct BridgeServer {
    config: BridgeConfig,
    serial: Arc<dyn SerialDevice>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BridgeServer {
    /// Opens the serial device described by `config`, then binds the
    /// listener.
    ///
    /// # Errors
    ///
    /// - [`StartupError::InvalidConfig`] before anything is opened.
    /// - [`StartupError::DeviceOpen`] if the device cannot be opened; the
    ///   listener is not attempted.
    /// - [`StartupError::Bind`] if the listener cannot be bound; the device
    ///   is closed first.
    pub async fn start(config: BridgeConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let device = SystemSerialDevice::open(&config.serial).map_err(StartupError::DeviceOpen)?;
        Self::with_device(config, Arc::new(device)).await
    }

    /// Binds the listener for an already-open serial device.
    ///
    /// On any error the device is closed before returning, so the caller
    /// never has to clean it up.
    ///
    /// # Errors
    ///
    /// [`StartupError::InvalidConfig`] or [`StartupError::Bind`].
    pub async fn with_device(
        config: BridgeConfig,
        serial: Arc<dyn SerialDevice>,
    ) -> Result<Self, StartupError> {
        if let Err(e) = config.validate() {
            close_device(serial.as_ref()).await;
            return Err(e.into());
        }

        let bound = match bind_listener(&config.listen).await {
            Ok(listener) => listener
                .local_addr()
                .map(|local_addr| (listener, local_addr)),
            Err(e) => Err(e),
        };

        match bound {
            Ok((listener, local_addr)) => Ok(Self {
                config,
                serial,
                listener,
                local_addr,
            }),
            Err(source) => {
                close_device(serial.as_ref()).await;
                Err(StartupError::Bind {
                    addr: config.listen_display(),
                    source,
                })
            }
        }
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves clients one after another until `running` is cleared, then
    /// releases the listener and the serial device.
    ///
    /// A session in progress when the flag is cleared is allowed to finish.
    pub async fn run(self, running: Arc<AtomicBool>) -> ServerSummary {
        info!("TCP server listening on {}", self.local_addr);
        info!("waiting for connections...");

        let sessions_served =
            accept_loop(&self.listener, &self.serial, &self.config.tuning, &running).await;

        self.shutdown().await;
        ServerSummary { sessions_served }
    }

    /// Consumes the server so the listener and device are released once.
    async fn shutdown(self) {
        let BridgeServer {
            serial, listener, ..
        } = self;
        drop(listener);
        close_device(serial.as_ref()).await;
        info!("cleanup complete");
    }
}

/// Starts the bridge for `config` and serves until `running` is cleared.
///
/// # Errors
///
/// Any [`StartupError`]; once serving has begun the loop never fails.
pub async fn run_server(
    config: BridgeConfig,
    running: Arc<AtomicBool>,
) -> Result<ServerSummary, StartupError> {
    let server = BridgeServer::start(config).await?;
    Ok(server.run(running).await)
}

/// Source of accepted client connections.
#[async_trait]
trait Acceptor: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Runs sessions inline until `running` is cleared.  Returns how many
/// sessions were served.
///
/// A failed `accept` is logged and retried after `accept_retry_delay`.
async fn accept_loop<A>(
    acceptor: &A,
    serial: &Arc<dyn SerialDevice>,
    tuning: &RelayTuning,
    running: &AtomicBool,
) -> u64
where
    A: Acceptor + ?Sized,
{
    let mut sessions_served = 0u64;
    let retry_delay = tuning.accept_retry_delay;

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL_INTERVAL, acceptor.accept()).await {
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("could not set TCP_NODELAY for {peer}: {e}");
                }

                let session =
                    BridgeSession::from_tcp(stream, peer, Arc::clone(serial), tuning.clone());
                info!("client connected from {peer} (session {})", session.id());
                session.run().await;
                sessions_served += 1;
                info!("client {peer} disconnected");
            }
            Ok(Err(e)) => {
                error!("error accepting connection: {e}; retrying in {retry_delay:?}");
                tokio::time::sleep(retry_delay).await;
            }
            Err(_) => {
                // Poll interval elapsed with no client; re-check the flag.
            }
        }
    }

    sessions_served
}

async fn close_device(serial: &dyn SerialDevice) {
    if let Err(e) = serial.close().await {
        warn!("failed to close serial device: {e}");
    }
}

/// Resolves `listen.host` and binds the first address that accepts.
async fn bind_listener(listen: &ListenSettings) -> io::Result<TcpListener> {
    let mut last_error = None;
    for addr in tokio::net::lookup_host((listen.host.as_str(), listen.port)).await? {
        match bind_reusable(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("bind {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} resolved to no addresses", listen.host),
        )
    }))
}

fn bind_reusable(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
