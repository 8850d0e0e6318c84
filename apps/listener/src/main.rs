//! Snowcast listener - binds a UDP port and writes received song bytes to
//! standard output.
//!
//! Pipe into a player: `snowcast_listener 16384 | mpg123 -`.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;

/// Snowcast listener.
#[derive(Parser, Debug)]
#[command(name = "snowcast_listener")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port to bind (the port announced to the server, e.g. 16384).
    udp_port: u16,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "warn", env = "SNOWCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let socket = UdpSocket::bind(("0.0.0.0", args.udp_port))
        .await
        .with_context(|| format!("failed to bind UDP port {}", args.udp_port))?;
    log::info!("[Listener] receiving on {}", socket.local_addr()?);

    let mut stdout = tokio::io::stdout();
    // Receive buffer larger than any song-data chunk.
    let mut buf = [0u8; 2048];
    loop {
        let (n, _) = socket
            .recv_from(&mut buf)
            .await
            .context("UDP receive failed")?;
        stdout
            .write_all(&buf[..n])
            .await
            .context("stdout write failed")?;
        stdout.flush().await.context("stdout flush failed")?;
    }
}
