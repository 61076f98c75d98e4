//! serial-bridge: entry point.
//!
//! Opens one serial device and serves it to one TCP client at a time.
//! Whatever the client sends is written to the device; whatever the device
//! produces is sent to the client.
//!
//! # Usage
//!
//! ```text
//! serial-bridge [OPTIONS] <SERIAL_PORT> <BAUDRATE>
//! serial-bridge --list-ports
//!
//! Options:
//!   -p, --port <PORT>             TCP port to listen on [default: 4999]
//!   -H, --host <HOST>             Address to bind [default: 0.0.0.0]
//!       --read-timeout-ms <MS>    Serial read timeout [default: 1000]
//!   -c, --config <FILE>           TOML tuning file
//!       --list-ports              Print available serial ports and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Default   | Description           |
//! |-----------------------|-----------|-----------------------|
//! | `SERIAL_BRIDGE_PORT`  | `4999`    | TCP listen port       |
//! | `SERIAL_BRIDGE_HOST`  | `0.0.0.0` | Bind address          |
//! | `SERIAL_BRIDGE_CONFIG`| (none)    | Tuning file path      |
//! | `RUST_LOG`            | `info`    | Log filter            |
//!
//! Command-line values win over the tuning file, which wins over the
//! built-in defaults.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serial_bridge::domain::config::{BridgeConfig, DEFAULT_HOST, DEFAULT_PORT};
use serial_bridge::infrastructure::run_server;
use serial_bridge::infrastructure::serial::available_ports;
use serial_bridge::infrastructure::storage::{load_config, FileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Transparent TCP-to-serial bridge.
#[derive(Debug, Parser)]
#[command(
    name = "serial-bridge",
    about = "Expose a serial device to one TCP client at a time",
    version
)]
struct Cli {
    /// Serial device, e.g. /dev/ttyUSB0 or COM3.
    #[arg(required_unless_present = "list_ports")]
    serial_port: Option<String>,

    /// Line speed, e.g. 9600 or 115200.
    #[arg(required_unless_present = "list_ports")]
    baudrate: Option<u32>,

    /// TCP port to listen on.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT, env = "SERIAL_BRIDGE_PORT")]
    port: u16,

    /// Address to bind the listener to.  Use 127.0.0.1 to accept local
    /// clients only.
    #[arg(short = 'H', long = "host", default_value = DEFAULT_HOST, env = "SERIAL_BRIDGE_HOST")]
    host: String,

    /// Upper bound on one serial read, in milliseconds.  Also bounds how
    /// long a disconnect takes to release the session.
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// TOML tuning file.
    #[arg(short = 'c', long, env = "SERIAL_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the serial ports the OS reports and exit.
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    /// Reads the tuning file named by `--config`, or returns the defaults.
    fn file_config(&self) -> anyhow::Result<FileConfig> {
        match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display())),
            None => Ok(FileConfig::default()),
        }
    }

    /// Layers the CLI arguments over `file` into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the serial port or baud rate is missing, which
    /// clap only allows together with `--list-ports`.
    fn into_bridge_config(self, file: &FileConfig) -> anyhow::Result<BridgeConfig> {
        let serial_port = self.serial_port.context("missing serial port argument")?;
        let baudrate = self.baudrate.context("missing baud rate argument")?;

        let mut config = BridgeConfig::new(serial_port, baudrate);
        config.serial.read_timeout = self
            .read_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| file.relay.read_timeout());
        config.listen.host = self.host;
        config.listen.port = self.port;
        config.tuning = file.relay.tuning();
        Ok(config)
    }
}

// ── Startup plan ──────────────────────────────────────────────────────────────

/// What the process does after argument parsing.
#[derive(Debug, PartialEq)]
enum Plan {
    /// `--list-ports`: print ports and exit.  The tuning file is not read.
    ListPorts,
    /// Serve `config`, logging at `log_level` unless `RUST_LOG` is set.
    Serve {
        config: BridgeConfig,
        log_level: String,
    },
}

/// Decides what to run, reading the tuning file only when serving.
fn plan(cli: Cli) -> anyhow::Result<Plan> {
    if cli.list_ports {
        return Ok(Plan::ListPorts);
    }
    let file_config = cli.file_config()?;
    let log_level = file_config.logging.level.clone();
    let config = cli.into_bridge_config(&file_config)?;
    Ok(Plan::Serve { config, log_level })
}

/// `RUST_LOG` wins; otherwise `level`; otherwise `info`.
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn list_ports() -> anyhow::Result<()> {
    let ports = available_ports().context("failed to list serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, log_level) = match plan(cli)? {
        Plan::ListPorts => {
            init_tracing("info");
            return list_ports();
        }
        Plan::Serve { config, log_level } => (config, log_level),
    };
    init_tracing(&log_level);

    info!(
        "serial-bridge starting: serial={} @ {} baud, listen={}",
        config.serial.path,
        config.serial.baud_rate,
        config.listen_display()
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    //
    // The accept loop checks this every poll interval.  A session already in
    // progress is allowed to finish; a second signal exits immediately.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => {
                info!("received {signal}; shutting down after the current session");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                error!("failed to listen for shutdown signals: {e}");
                return;
            }
        }
        if wait_for_shutdown_signal().await.is_ok() {
            warn!("second shutdown signal; exiting without waiting for the session");
            std::process::exit(130);
        }
    });

    let summary = run_server(config, running)
        .await
        .context("serial-bridge failed to start")?;

    info!(
        "serial-bridge stopped after serving {} session(s)",
        summary.sessions_served
    );
    Ok(())
}

/// Resolves when the process is asked to stop, naming the signal.
async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "Ctrl+C"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
