//! Snowcast control client.
//!
//! Connects to a Snowcast server, performs the Hello/Welcome handshake,
//! then turns keyboard input into commands: a station number tunes
//! (`SetStation`), `stations` requests the listing, `q` quits. Server
//! replies are printed as they arrive.

use anyhow::{bail, Context, Result};
use clap::Parser;
use snowcast_core::constants::OPERATOR_CHANNEL_CAPACITY;
use snowcast_core::protocol::{self, Message};
use tokio::net::TcpStream;
use tokio::signal;
use tokio::sync::mpsc;

/// Snowcast control client.
#[derive(Parser, Debug)]
#[command(name = "snowcast_control")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address (e.g. localhost).
    server_name: String,

    /// Server control port (e.g. 8000).
    server_port: u16,

    /// UDP port the listener is bound to (e.g. 16384).
    udp_port: u16,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "warn", env = "SNOWCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

/// One parsed keyboard command.
enum Command {
    Quit,
    Stations,
    SetStation(u16),
    Invalid,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let stream = TcpStream::connect((args.server_name.as_str(), args.server_port))
        .await
        .with_context(|| {
            format!(
                "failed to connect to {}:{}",
                args.server_name, args.server_port
            )
        })?;
    let (mut reader, mut writer) = stream.into_split();

    protocol::write_message(
        &mut writer,
        &Message::Hello {
            udp_port: args.udp_port,
        },
    )
    .await
    .context("failed to send Hello")?;

    let num_stations = match protocol::read_message(&mut reader, true)
        .await
        .context("no reply to Hello within the deadline")?
    {
        Message::Welcome { num_stations } => num_stations,
        other => bail!("unexpected reply to Hello (tag {})", other.tag()),
    };
    println!("Welcome to Snowcast! The server has {num_stations} stations.");

    // Server replies arrive on their own task so keyboard input stays live.
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        loop {
            match protocol::read_message(&mut reader, false).await {
                Ok(reply) => {
                    if reply_tx.send(reply).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::debug!("[Control] read loop ended: {e}");
                    return;
                }
            }
        }
    });

    let mut keyboard_rx = spawn_keyboard_reader();
    let mut current_station: Option<u16> = None;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            maybe_reply = reply_rx.recv() => {
                let Some(reply) = maybe_reply else {
                    log::error!("[Control] server closed the connection");
                    break;
                };
                if !handle_reply(reply, current_station) {
                    break;
                }
            }
            maybe_line = keyboard_rx.recv() => {
                let Some(line) = maybe_line else { break };
                match parse_command(&line, num_stations) {
                    Command::Quit => break,
                    Command::Stations => {
                        protocol::write_message(&mut writer, &Message::StationsCommand)
                            .await
                            .context("failed to send StationsCommand")?;
                    }
                    Command::SetStation(station) => {
                        protocol::write_message(&mut writer, &Message::SetStation { station })
                            .await
                            .context("failed to send SetStation")?;
                        current_station = Some(station);
                    }
                    Command::Invalid => log::warn!("invalid input"),
                }
            }
        }
    }

    Ok(())
}

/// Parses one keyboard line; station numbers outside the range the server
/// announced are rejected locally.
fn parse_command(line: &str, num_stations: u16) -> Command {
    let trimmed = line.trim();
    match trimmed {
        "q" => Command::Quit,
        "stations" => Command::Stations,
        _ => match trimmed.parse::<u16>() {
            Ok(station) if station < num_stations => Command::SetStation(station),
            _ => Command::Invalid,
        },
    }
}

/// Prints one server reply. Returns false when the client should exit.
fn handle_reply(reply: Message, current_station: Option<u16>) -> bool {
    match reply {
        Message::Announce { song_name } => {
            if current_station.is_none() {
                // An announce before any successful tune is not expected.
                println!("unknown reply");
                return false;
            }
            println!("New song announced: {song_name}");
            true
        }
        Message::InvalidCommand { reason } => {
            println!("{reason}");
            false
        }
        Message::StationsReply { listing } => {
            println!("{listing}");
            true
        }
        // A Welcome mid-session, or any client-to-server tag.
        _ => {
            println!("unknown reply");
            false
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_numbers_are_bounds_checked_locally() {
        assert!(matches!(parse_command("1", 2), Command::SetStation(1)));
        assert!(matches!(parse_command("2", 2), Command::Invalid));
        assert!(matches!(parse_command("not-a-number", 2), Command::Invalid));
    }

    #[test]
    fn keywords_parse_before_numbers() {
        assert!(matches!(parse_command("q", 2), Command::Quit));
        assert!(matches!(parse_command("stations", 2), Command::Stations));
        assert!(matches!(parse_command("  stations  ", 2), Command::Stations));
    }

    #[test]
    fn announce_before_any_tune_is_unknown() {
        let announce = Message::announce("a.mp3");
        assert!(!handle_reply(announce.clone(), None));
        assert!(handle_reply(announce, Some(0)));
    }

    #[test]
    fn invalid_command_ends_the_client() {
        let reply = Message::invalid_command("invalid station number");
        assert!(!handle_reply(reply, Some(0)));
    }

    #[test]
    fn welcome_mid_session_is_unknown() {
        let reply = Message::Welcome { num_stations: 2 };
        assert!(!handle_reply(reply, Some(0)));
    }
}
