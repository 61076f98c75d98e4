//! One client's bidirectional relay to the shared serial device.
//!
//! ```text
//!              ┌──────── serial_to_socket ────────┐
//!  serial ─────┤ read (bounded wait) → write_all  ├────▶ socket write half
//!              └──────────────────────────────────┘
//!              ┌──────── socket_to_serial ────────┐
//!  serial ◀────┤ write_all ← read chunk           ├───── socket read half
//!              └──────────────────────────────────┘
//! ```
//!
//! Each task owns its socket half outright; the only shared state is the
//! serial device and the [`SessionControl`].  `socket_to_serial` defines the
//! session: when it ends, [`BridgeSession::run`] clears the running flag,
//! joins `serial_to_socket` (which notices within one serial read timeout),
//! shuts the socket down and reports `STOPPED`.
//!
//! Failure policy:
//!
//! | Condition                         | Outcome                          |
//! |-----------------------------------|----------------------------------|
//! | socket read returns 0 bytes       | session ends (client closed)     |
//! | socket reset / broken pipe        | session ends (client closed)     |
//! | other socket read/write error     | session ends (socket error)      |
//! | serial read or write error        | logged, pause, loop continues    |

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{RelayTuning, SessionState};
use crate::infrastructure::serial::{write_all, SerialDevice};

/// Read half of the client connection, owned by `socket_to_serial`.
pub type SocketReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of the client connection, owned by `serial_to_socket`.
pub type SocketWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Consecutive serial failures between repeated warnings.
const FAILURE_WARN_EVERY: u32 = 50;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the connection or it was reset (broken pipe counts).
    ClientClosed,
    /// Reading from the client failed for a reason other than a disconnect.
    SocketReadError,
    /// Writing to the client failed for a reason other than a disconnect.
    SocketWriteError,
    /// A copy task panicked.
    TaskFailed,
    /// A stop was requested from outside the copy loops.
    Stopped,
}

/// Shared cancellation and lifecycle state of one session.
///
/// The running flag is what the copy loops poll once per iteration.  The
/// watch channel mirrors it so a task parked on a socket read can wake up as
/// soon as the other side stops the session.
#[derive(Debug)]
pub struct SessionControl {
    running: AtomicBool,
    state: AtomicU8,
    stop_signal: watch::Sender<bool>,
    end: OnceLock<SessionEnd>,
}

impl SessionControl {
    /// A control in the `STARTING` state with the running flag set.
    pub fn new() -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            running: AtomicBool::new(true),
            state: AtomicU8::new(SessionState::Starting as u8),
            stop_signal,
            end: OnceLock::new(),
        }
    }

    /// `true` until the session is stopped.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The first recorded reason the session ended, if it has.
    pub fn end_reason(&self) -> Option<SessionEnd> {
        self.end.get().copied()
    }

    /// Requests an external stop.  Returns `true` if this call moved the
    /// session into `STOPPING`.
    pub fn stop(&self) -> bool {
        self.stop_with(SessionEnd::Stopped)
    }

    /// Clears the running flag, wakes waiters and enters `STOPPING`.
    ///
    /// Only the first reason is kept.  Returns `true` for the call that
    /// performed the transition.
    fn stop_with(&self, reason: SessionEnd) -> bool {
        let _ = self.end.set(reason);
        self.running.store(false, Ordering::Release);
        self.stop_signal.send_replace(true);

        if self.state().is_winding_down() {
            return false;
        }
        [SessionState::Running, SessionState::Starting]
            .into_iter()
            .any(|from| self.transition(from, SessionState::Stopping))
    }

    /// Resolves once the session has been stopped.
    pub async fn stopped(&self) {
        let mut rx = self.stop_signal.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we
        // are borrowing it.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    fn begin(&self) -> bool {
        self.transition(SessionState::Starting, SessionState::Running)
    }

    fn finish(&self) {
        self.state
            .store(SessionState::Stopped as u8, Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle for observing or stopping a session from outside.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    control: Arc<SessionControl>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Asks both copy loops to wind down.  [`BridgeSession::run`] still
    /// joins them and closes the socket before returning.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }
}

/// What happened during one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: Uuid,
    pub peer: SocketAddr,
    /// Bytes written to the serial device (client → serial).
    pub bytes_to_serial: u64,
    /// Bytes written to the client (serial → client).
    pub bytes_to_socket: u64,
    pub end: SessionEnd,
}

/// One client connection relayed to the shared serial device.
pub struct BridgeSession {
    id: Uuid,
    peer: SocketAddr,
    serial: Arc<dyn SerialDevice>,
    reader: SocketReader,
    writer: SocketWriter,
    control: Arc<SessionControl>,
    tuning: RelayTuning,
}

impl BridgeSession {
    /// Builds a session in the `STARTING` state from already-split socket
    /// halves.
    pub fn new(
        peer: SocketAddr,
        reader: SocketReader,
        writer: SocketWriter,
        serial: Arc<dyn SerialDevice>,
        tuning: RelayTuning,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            serial,
            reader,
            writer,
            control: Arc::new(SessionControl::new()),
            tuning,
        }
    }

    /// Builds a session for an accepted TCP connection, splitting it into
    /// owned halves.
    pub fn from_tcp(
        stream: TcpStream,
        peer: SocketAddr,
        serial: Arc<dyn SerialDevice>,
        tuning: RelayTuning,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::new(peer, Box::new(read_half), Box::new(write_half), serial, tuning)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// A handle that stays valid after `run` consumes the session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            control: Arc::clone(&self.control),
        }
    }

    /// Relays bytes in both directions until the client goes away (or a stop
    /// is requested), then tears the session down.
    ///
    /// Returns only after both copy tasks have exited and the socket has
    /// been shut down; the serial device is left open.
    pub async fn run(self) -> SessionReport {
        let BridgeSession {
            id,
            peer,
            serial,
            reader,
            writer,
            control,
            tuning,
        } = self;

        let session = format!("session {id} ({peer})");
        control.begin();
        debug!("{session}: {}", control.state());

        let serial_task = tokio::spawn(serial_to_socket(
            Arc::clone(&serial),
            writer,
            Arc::clone(&control),
            tuning.clone(),
            session.clone(),
        ));
        let socket_task = tokio::spawn(socket_to_serial(
            reader,
            serial,
            Arc::clone(&control),
            tuning,
            session.clone(),
        ));

        let bytes_to_serial = match socket_task.await {
            Ok(n) => n,
            Err(e) => {
                error!("{session}: socket→serial task failed: {e}");
                control.stop_with(SessionEnd::TaskFailed);
                0
            }
        };

        // No-op when the loop already recorded why it stopped.
        control.stop_with(SessionEnd::Stopped);
        debug!("{session}: {}", control.state());

        let bytes_to_socket = match serial_task.await {
            Ok((mut writer, n)) => {
                if let Err(e) = writer.shutdown().await {
                    debug!("{session}: socket shutdown: {e}");
                }
                n
            }
            Err(e) => {
                error!("{session}: serial→socket task failed: {e}");
                0
            }
        };

        control.finish();
        let end = control.end_reason().unwrap_or(SessionEnd::Stopped);
        info!(
            "{session}: {} ({end:?}; {bytes_to_serial} bytes to serial, {bytes_to_socket} bytes to client)",
            control.state()
        );

        SessionReport {
            id,
            peer,
            bytes_to_serial,
            bytes_to_socket,
            end,
        }
    }
}

// ── Copy loops ────────────────────────────────────────────────────────────────

/// Serial → client.  Returns the write half so `run` can shut it down.
async fn serial_to_socket(
    serial: Arc<dyn SerialDevice>,
    mut writer: SocketWriter,
    control: Arc<SessionControl>,
    tuning: RelayTuning,
    session: String,
) -> (SocketWriter, u64) {
    let mut buf = vec![0u8; tuning.chunk_size];
    let mut forwarded = 0u64;
    let mut failures = FailureStreak::new("serial read");

    while control.is_running() {
        let n = match serial.read(&mut buf).await {
            Ok(n) => {
                failures.succeeded(&session);
                n
            }
            Err(e) => {
                failures.failed(&session, &e, tuning.serial_retry_delay);
                tokio::time::sleep(tuning.serial_retry_delay).await;
                continue;
            }
        };
        if n == 0 {
            continue;
        }

        if let Err(e) = send(&mut writer, &buf[..n]).await {
            if is_disconnect(&e) {
                info!("{session}: client gone while sending ({e})");
                control.stop_with(SessionEnd::ClientClosed);
            } else {
                warn!("{session}: socket write failed: {e}");
                control.stop_with(SessionEnd::SocketWriteError);
            }
            break;
        }
        forwarded += n as u64;
        debug!("{session}: serial → client {n} bytes");
    }

    (writer, forwarded)
}

/// Client → serial.  Its exit defines the end of the session.
async fn socket_to_serial(
    mut reader: SocketReader,
    serial: Arc<dyn SerialDevice>,
    control: Arc<SessionControl>,
    tuning: RelayTuning,
    session: String,
) -> u64 {
    let mut buf = vec![0u8; tuning.chunk_size];
    let mut forwarded = 0u64;
    let mut failures = FailureStreak::new("serial write");

    while control.is_running() {
        let read = tokio::select! {
            result = reader.read(&mut buf) => result,
            () = control.stopped() => break,
        };

        let n = match read {
            Ok(0) => {
                info!("{session}: client disconnected");
                control.stop_with(SessionEnd::ClientClosed);
                break;
            }
            Ok(n) => n,
            Err(e) if is_disconnect(&e) => {
                info!("{session}: client connection reset ({e})");
                control.stop_with(SessionEnd::ClientClosed);
                break;
            }
            Err(e) => {
                warn!("{session}: socket read failed: {e}");
                control.stop_with(SessionEnd::SocketReadError);
                break;
            }
        };

        match write_all(serial.as_ref(), &buf[..n]).await {
            Ok(()) => {
                failures.succeeded(&session);
                forwarded += n as u64;
                debug!("{session}: client → serial {n} bytes");
            }
            Err(e) => {
                // The chunk is dropped; the loop goes back to the socket so a
                // dead device never hides a client disconnect.
                failures.failed(&session, &e, tuning.serial_retry_delay);
                debug!("{session}: dropped {n} bytes bound for serial");
                tokio::time::sleep(tuning.serial_retry_delay).await;
            }
        }
    }

    forwarded
}

async fn send(writer: &mut SocketWriter, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

/// Errors that mean the peer is gone rather than that something broke.
fn is_disconnect(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        BrokenPipe | ConnectionReset | ConnectionAborted | UnexpectedEof
    )
}

/// Rate-limits logging of a run of consecutive serial failures.
///
/// The first failure and every [`FAILURE_WARN_EVERY`]th one are warnings;
/// the rest go to debug.  A success after failures logs the recovery.
struct FailureStreak {
    operation: &'static str,
    consecutive: u32,
}

impl FailureStreak {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            consecutive: 0,
        }
    }

    fn failed(&mut self, session: &str, error: &dyn std::fmt::Display, retry_in: Duration) {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive == 1 || self.consecutive % FAILURE_WARN_EVERY == 0 {
            warn!(
                "{session}: {} failed ({} in a row): {error}; retrying in {retry_in:?}",
                self.operation, self.consecutive
            );
        } else {
            debug!("{session}: {} failed again: {error}", self.operation);
        }
    }

    fn succeeded(&mut self, session: &str) {
        if self.consecutive > 0 {
            info!(
                "{session}: {} recovered after {} failure(s)",
                self.operation, self.consecutive
            );
            self.consecutive = 0;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::{SerialError, SimulatedSerialDevice};
    use async_trait::async_trait;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    const READ_TIMEOUT: Duration = Duration::from_millis(50);
    const DEADLINE: Duration = Duration::from_secs(5);

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn fast_tuning() -> RelayTuning {
        RelayTuning {
            serial_retry_delay: Duration::from_millis(5),
            ..RelayTuning::default()
        }
    }

    /// A session wired to one end of an in-memory duplex pipe; the other end
    /// plays the TCP client.
    fn duplex_session(device: &Arc<SimulatedSerialDevice>) -> (BridgeSession, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(server);
        let serial: Arc<dyn SerialDevice> = device.clone();
        let session = BridgeSession::new(
            peer(),
            Box::new(read_half),
            Box::new(write_half),
            serial,
            fast_tuning(),
        );
        (session, client)
    }

    async fn wait_for_written(device: &SimulatedSerialDevice, expected: &[u8]) {
        timeout(DEADLINE, async {
            while device.written() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("serial device never received the expected bytes");
    }

    // ── SessionControl ────────────────────────────────────────────────────────

    #[test]
    fn test_new_control_is_starting_and_running() {
        let control = SessionControl::new();
        assert_eq!(control.state(), SessionState::Starting);
        assert!(control.is_running());
        assert_eq!(control.end_reason(), None);
    }

    #[test]
    fn test_first_stop_wins_and_later_stops_are_noops() {
        // Arrange
        let control = SessionControl::new();
        control.begin();

        // Act
        let first = control.stop_with(SessionEnd::ClientClosed);
        let second = control.stop_with(SessionEnd::SocketWriteError);

        // Assert
        assert!(first);
        assert!(!second);
        assert!(!control.is_running());
        assert_eq!(control.state(), SessionState::Stopping);
        assert_eq!(control.end_reason(), Some(SessionEnd::ClientClosed));
    }

    #[test]
    fn test_stop_before_begin_still_enters_stopping() {
        let control = SessionControl::new();
        assert!(control.stop());
        assert!(!control.begin(), "a stopped session must not start running");
        assert_eq!(control.state(), SessionState::Stopping);
    }

    #[test]
    fn test_stop_after_finish_keeps_stopped_state() {
        // Arrange
        let control = SessionControl::new();
        control.begin();
        control.stop_with(SessionEnd::ClientClosed);
        control.finish();

        // Act
        let moved = control.stop();

        // Assert
        assert!(!moved);
        assert_eq!(control.state(), SessionState::Stopped);
        assert_eq!(control.end_reason(), Some(SessionEnd::ClientClosed));
    }

    #[tokio::test]
    async fn test_stopped_resolves_even_if_stop_happened_first() {
        let control = SessionControl::new();
        control.stop();
        timeout(Duration::from_millis(100), control.stopped())
            .await
            .expect("stopped() must not miss an earlier stop");
    }

    #[tokio::test]
    async fn test_stopped_wakes_a_waiting_task() {
        let control = Arc::new(SessionControl::new());
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        control.stop();

        timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter must wake")
            .expect("waiter task");
    }

    // ── Relay behaviour ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_client_bytes_reach_serial_and_serial_bytes_reach_client() {
        // Arrange
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let (session, mut client) = duplex_session(&device);
        let running = tokio::spawn(session.run());

        // Act: client → serial
        client.write_all(&[0x41, 0x42, 0x43]).await.unwrap();
        wait_for_written(&device, &[0x41, 0x42, 0x43]).await;

        // Act: serial → client
        device.inject(&[0x58, 0x59]);
        let mut received = [0u8; 2];
        timeout(DEADLINE, client.read_exact(&mut received))
            .await
            .expect("client read timed out")
            .unwrap();

        // Assert
        assert_eq!(received, [0x58, 0x59]);
        drop(client);
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();
        assert_eq!(report.bytes_to_serial, 3);
        assert_eq!(report.bytes_to_socket, 2);
        assert_eq!(report.end, SessionEnd::ClientClosed);
    }

    #[tokio::test]
    async fn test_large_stream_is_forwarded_in_order_across_chunks() {
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let (session, mut client) = duplex_session(&device);
        let running = tokio::spawn(session.run());

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        client.write_all(&payload).await.unwrap();
        wait_for_written(&device, &payload).await;

        drop(client);
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();
        assert_eq!(report.bytes_to_serial, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_client_close_stops_session_within_one_read_timeout() {
        // Arrange
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let (session, client) = duplex_session(&device);
        assert_eq!(session.state(), SessionState::Starting);
        let handle = session.handle();
        let running = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), SessionState::Running);

        // Act
        let closed_at = tokio::time::Instant::now();
        drop(client);
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();

        // Assert: one read timeout plus scheduling slack
        assert!(closed_at.elapsed() < READ_TIMEOUT + Duration::from_millis(500));
        assert_eq!(report.end, SessionEnd::ClientClosed);
        assert_eq!(handle.state(), SessionState::Stopped);
        assert!(!device.is_closed(), "the session must leave the serial device open");
        assert_eq!(device.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_external_stop_ends_session_while_client_is_idle() {
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let (session, _client) = duplex_session(&device);
        let session_id = session.id();
        let handle = session.handle();
        let running = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(handle.stop());
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();

        assert_eq!(report.id, session_id);
        assert_eq!(handle.id(), session_id);
        assert_eq!(report.end, SessionEnd::Stopped);
        assert_eq!(handle.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_socket_closed_after_session_stops() {
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let (session, mut client) = duplex_session(&device);
        let handle = session.handle();
        let running = tokio::spawn(session.run());

        handle.stop();
        timeout(DEADLINE, running).await.unwrap().unwrap();

        // The bridge shut its write half down, so the client sees EOF.
        let mut buf = [0u8; 1];
        let n = timeout(DEADLINE, client.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_serial_write_failure_drops_chunk_but_keeps_session() {
        // Arrange
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        device.fail_next_writes(1);
        let (session, mut client) = duplex_session(&device);
        let running = tokio::spawn(session.run());

        // Act: the first chunk hits the injected failure
        client.write_all(b"lost").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"kept").await.unwrap();

        // Assert
        wait_for_written(&device, b"kept").await;
        drop(client);
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();
        assert_eq!(report.bytes_to_serial, 4);
        assert_eq!(report.end, SessionEnd::ClientClosed);
    }

    #[tokio::test]
    async fn test_serial_read_failures_are_retried() {
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        device.fail_next_reads(3);
        let (session, mut client) = duplex_session(&device);
        let running = tokio::spawn(session.run());

        device.inject(b"ok");
        let mut received = [0u8; 2];
        timeout(DEADLINE, client.read_exact(&mut received))
            .await
            .expect("bytes must arrive once the device recovers")
            .unwrap();

        assert_eq!(&received, b"ok");
        drop(client);
        timeout(DEADLINE, running).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_socket_read_error_ends_session() {
        // Arrange: a scripted client that sends one chunk then errors
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let reader = tokio_test::io::Builder::new()
            .read(b"AB")
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
            .build();
        let writer = tokio_test::io::Builder::new().build();
        let serial: Arc<dyn SerialDevice> = device.clone();
        let session = BridgeSession::new(
            peer(),
            Box::new(reader),
            Box::new(writer),
            serial,
            fast_tuning(),
        );

        // Act
        let report = timeout(DEADLINE, session.run()).await.unwrap();

        // Assert
        assert_eq!(device.written(), b"AB".to_vec());
        assert_eq!(report.end, SessionEnd::SocketReadError);
    }

    #[tokio::test]
    async fn test_connection_reset_counts_as_client_closed() {
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let reader = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();
        let writer = tokio_test::io::Builder::new().build();
        let serial: Arc<dyn SerialDevice> = device.clone();
        let session =
            BridgeSession::new(peer(), Box::new(reader), Box::new(writer), serial, fast_tuning());

        let report = timeout(DEADLINE, session.run()).await.unwrap();

        assert_eq!(report.end, SessionEnd::ClientClosed);
        assert_eq!(report.bytes_to_serial, 0);
    }

    #[tokio::test]
    async fn test_broken_pipe_on_send_ends_session() {
        // Arrange: the client stays connected for reading, but every send to
        // it fails as if the peer had vanished.
        let device = SimulatedSerialDevice::new(READ_TIMEOUT);
        let (client, server) = tokio::io::duplex(64);
        let (read_half, _unused_write) = tokio::io::split(server);
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))
            .build();
        let serial: Arc<dyn SerialDevice> = device.clone();
        let session = BridgeSession::new(
            peer(),
            Box::new(read_half),
            Box::new(writer),
            serial,
            fast_tuning(),
        );
        let running = tokio::spawn(session.run());

        // Act
        device.inject(b"Z");
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();

        // Assert
        assert_eq!(report.end, SessionEnd::ClientClosed);
        assert_eq!(report.bytes_to_socket, 0);
        drop(client);
    }

    /// A device that idles on reads and panics on the first write.
    struct PanicOnWrite;

    #[async_trait]
    impl SerialDevice for PanicOnWrite {
        async fn read(&self, _buf: &mut [u8]) -> Result<usize, SerialError> {
            tokio::time::sleep(READ_TIMEOUT).await;
            Ok(0)
        }

        async fn write(&self, _data: &[u8]) -> Result<usize, SerialError> {
            panic!("driver crashed mid-write");
        }

        async fn close(&self) -> Result<(), SerialError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_copy_task_ends_session_as_task_failed() {
        // Arrange
        let (mut client, server) = tokio::io::duplex(64);
        let (read_half, write_half) = tokio::io::split(server);
        let session = BridgeSession::new(
            peer(),
            Box::new(read_half),
            Box::new(write_half),
            Arc::new(PanicOnWrite),
            fast_tuning(),
        );
        let handle = session.handle();
        let running = tokio::spawn(session.run());

        // Act: one byte makes socket_to_serial call the panicking write
        client.write_all(b"!").await.unwrap();
        let report = timeout(DEADLINE, running).await.unwrap().unwrap();

        // Assert
        assert_eq!(report.end, SessionEnd::TaskFailed);
        assert_eq!(report.bytes_to_serial, 0);
        assert_eq!(handle.state(), SessionState::Stopped);
        let mut buf = [0u8; 1];
        let n = timeout(DEADLINE, client.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0, "the client must see the connection closed");
    }

    #[test]
    fn test_failure_streak_counts_until_success() {
        let mut streak = FailureStreak::new("serial read");
        let error = SerialError::Closed;

        for _ in 0..3 {
            streak.failed("session", &error, Duration::from_millis(100));
        }
        let during = streak.consecutive;
        streak.succeeded("session");

        assert_eq!(during, 3);
        assert_eq!(streak.consecutive, 0);
    }

    #[test]
    fn test_is_disconnect_classification() {
        use std::io::{Error, ErrorKind};
        assert!(is_disconnect(&Error::from(ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&Error::from(ErrorKind::PermissionDenied)));
    }
}
