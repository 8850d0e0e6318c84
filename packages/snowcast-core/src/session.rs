//! Per-connection control session.
//!
//! Each accepted TCP connection runs one session actor. A spawned reader
//! task owns the read half and forwards decoded frames over a channel; the
//! session loop owns the write half and multiplexes over incoming frames,
//! song-change announcements, and the close signal. One loop owning the
//! writer keeps replies in request order.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

use crate::constants::{ANNOUNCE_CHANNEL_CAPACITY, SESSION_FRAME_CHANNEL_CAPACITY};
use crate::error::SnowcastError;
use crate::membership::{ClientHandle, Membership};
use crate::protocol::{self, Message};

/// Runs one control session to completion.
///
/// The greeting must be a `Hello` under the frame deadline; anything else
/// closes the connection without a reply. After the handshake the session
/// answers commands until the peer misbehaves, the socket fails, or the
/// server shuts down, then removes itself from the membership table.
pub async fn run_session(stream: TcpStream, membership: Arc<Membership>) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            log::debug!("[Session] peer address unavailable: {e}");
            return;
        }
    };
    let (mut reader, mut writer) = stream.into_split();

    // AwaitingGreeting
    let udp_port = match protocol::read_message(&mut reader, true).await {
        Ok(Message::Hello { udp_port }) => udp_port,
        Ok(other) => {
            log::debug!(
                "[Session] {peer}: expected Hello, got tag {}; closing",
                other.tag()
            );
            return;
        }
        Err(e) => {
            log::debug!("[Session] {peer}: handshake failed: {e}");
            return;
        }
    };

    let welcome = Message::Welcome {
        num_stations: membership.station_count(),
    };
    if let Err(e) = protocol::write_message(&mut writer, &welcome).await {
        log::debug!("[Session] {peer}: welcome write failed: {e}");
        return;
    }

    let udp = match connect_udp(peer.ip(), udp_port).await {
        Ok(udp) => udp,
        Err(e) => {
            log::warn!("[Session] {peer}: cannot set up UDP to port {udp_port}: {e}");
            return;
        }
    };

    let (announce_tx, mut announce_rx) = mpsc::channel(ANNOUNCE_CHANNEL_CAPACITY);
    let client = membership.add_client(udp, announce_tx);
    log::info!(
        "[Session] {peer} connected as client {}, song data to {}:{}",
        client.id(),
        peer.ip(),
        udp_port
    );

    // The reader task owns the read half; when it drops its sender (EOF,
    // decode error, mid-frame timeout) the session loop sees the channel
    // close and terminates.
    let (frame_tx, mut frame_rx) = mpsc::channel(SESSION_FRAME_CHANNEL_CAPACITY);
    let reader_task = tokio::spawn(async move {
        loop {
            match protocol::read_message(&mut reader, false).await {
                Ok(message) => {
                    if frame_tx.send(message).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::debug!("[Session] {peer}: read loop ended: {e}");
                    return;
                }
            }
        }
    });

    // Ready
    let cancel = client.cancel().clone();
    loop {
        tokio::select! {
            maybe_frame = frame_rx.recv() => {
                let Some(message) = maybe_frame else { break };
                if !handle_command(&mut writer, &client, &membership, message).await {
                    break;
                }
            }
            maybe_song = announce_rx.recv() => {
                let Some(song_name) = maybe_song else { break };
                if protocol::write_message(&mut writer, &Message::announce(&song_name))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    // Terminating
    membership.remove_client(&client);
    reader_task.abort();
    log::info!("[Session] {peer} closed");
}

/// Handles one decoded frame. Returns false when the session must end.
async fn handle_command(
    writer: &mut OwnedWriteHalf,
    client: &ClientHandle,
    membership: &Membership,
    message: Message,
) -> bool {
    match message {
        Message::SetStation { station } => match membership.set_station(client, station) {
            Ok(song_name) => protocol::write_message(writer, &Message::announce(&song_name))
                .await
                .is_ok(),
            Err(SnowcastError::BadStation { .. }) => {
                let reply = Message::invalid_command("invalid station number");
                let _ = protocol::write_message(writer, &reply).await;
                false
            }
            Err(e) => {
                log::warn!("[Session] client {}: set station failed: {e}", client.id());
                false
            }
        },
        Message::StationsCommand => {
            let reply = Message::stations_reply(&membership.stations_listing());
            protocol::write_message(writer, &reply).await.is_ok()
        }
        other => {
            // A second Hello, or any tag that only the server may send.
            log::debug!(
                "[Session] client {}: unexpected tag {}; closing",
                client.id(),
                other.tag()
            );
            let reply = Message::invalid_command("invalid command");
            let _ = protocol::write_message(writer, &reply).await;
            false
        }
    }
}

/// Binds an ephemeral socket and connects it to the peer's announced UDP
/// endpoint. One dialed socket per client.
async fn connect_udp(peer_ip: IpAddr, udp_port: u16) -> std::io::Result<UdpSocket> {
    let bind_addr = match peer_ip {
        IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let udp = UdpSocket::bind(bind_addr).await?;
    udp.connect((peer_ip, udp_port)).await?;
    Ok(udp)
}
