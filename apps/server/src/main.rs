//! Snowcast Server - multi-station streaming radio daemon.
//!
//! Broadcasts the bytes of local song files over UDP to every tuned
//! listener at a constant rate, and runs the binary control protocol over
//! TCP. Operator commands arrive on standard input: `p [path]` prints the
//! station/listener table, `q` shuts down.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snowcast_core::constants::OPERATOR_CHANNEL_CAPACITY;
use snowcast_core::Server;
use tokio::signal;
use tokio::sync::mpsc;

use crate::config::ServerConfig;

/// Snowcast Server - streams song files to tuned listeners.
#[derive(Parser, Debug)]
#[command(name = "snowcast_server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port for the control channel (e.g. 8000).
    tcp_port: u16,

    /// Song files, one station each.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<String>,

    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SNOWCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Snowcast Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let pacing = config
        .to_pacing_config()
        .context("Invalid pacing configuration")?;

    let addr = SocketAddr::from((config.bind_host, args.tcp_port));
    let server = Arc::new(
        Server::bind(addr, args.files, pacing)
            .await
            .context("Failed to start server")?,
    );
    server.start_stations();

    let acceptor = Arc::clone(&server);
    tokio::spawn(async move { acceptor.run().await });

    let mut operator_rx = spawn_keyboard_reader();
    let mut operator_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown signal received");
                break;
            }
            line = operator_rx.recv(), if operator_open => {
                let Some(line) = line else {
                    // Stdin closed (daemonized); keep serving until a signal.
                    operator_open = false;
                    continue;
                };
                if !handle_operator_command(&server, &line) {
                    break;
                }
            }
        }
    }

    server.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

/// Handles one operator line. Returns false on `q`.
fn handle_operator_command(server: &Server, line: &str) -> bool {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        ["p"] => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = server.membership().report(&mut stdout) {
                log::warn!("[Server] station report failed: {e}");
            }
            true
        }
        ["p", path] => {
            match std::fs::File::create(path) {
                Ok(mut file) => {
                    if let Err(e) = server.membership().report(&mut file) {
                        log::warn!("[Server] station report to {path} failed: {e}");
                    }
                }
                Err(e) => log::warn!("[Server] cannot create {path}: {e}"),
            }
            true
        }
        ["q"] => false,
        _ => {
            log::warn!("[Server] unknown operator command: {line}");
            true
        }
    }
}

/// Feeds non-empty stdin lines into a channel from a blocking thread.
fn spawn_keyboard_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(OPERATOR_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        use std::io::BufRead as _;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { return };
            if line.trim().is_empty() {
                continue;
            }
            if tx.blocking_send(line).is_err() {
                return;
            }
        }
    });
    rx
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
