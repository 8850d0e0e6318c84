//! Wire codec for the Snowcast control channel.
//!
//! Every frame is one tag byte followed by a body whose shape the tag
//! determines: fixed two-byte bodies for `Hello`, `SetStation`, `Welcome`
//! and `StationsCommand`; a one-byte length prefix plus UTF-8 payload for
//! `Announce`, `InvalidCommand` and `StationsReply`. All multi-byte
//! integers are big-endian and there is no trailing terminator.

use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::constants::{FRAME_READ_TIMEOUT_MS, MAX_TEXT_LEN};

/// Client greeting carrying the listener's UDP port.
pub const HELLO_TAG: u8 = 0;
/// Client request to tune to a station.
pub const SET_STATION_TAG: u8 = 1;
/// Server handshake reply carrying the station count.
pub const WELCOME_TAG: u8 = 2;
/// Server notification of the song now playing.
pub const ANNOUNCE_TAG: u8 = 3;
/// Server rejection of a malformed or ill-timed command.
pub const INVALID_COMMAND_TAG: u8 = 4;
/// Client request for the station listing.
pub const STATIONS_COMMAND_TAG: u8 = 254;
/// Server reply carrying the station listing.
pub const STATIONS_REPLY_TAG: u8 = 255;

/// One complete frame on the control channel.
///
/// String payloads are clamped to [`MAX_TEXT_LEN`] bytes by the
/// constructors, so [`Message::encode`] is total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// C→S: greeting with the port the client's listener is bound to.
    Hello {
        /// UDP port announced by the client.
        udp_port: u16,
    },
    /// C→S: tune to the given station.
    SetStation {
        /// Zero-based station index.
        station: u16,
    },
    /// S→C: handshake accepted.
    Welcome {
        /// Number of stations the server carries.
        num_stations: u16,
    },
    /// S→C: the song now playing on the client's station.
    Announce {
        /// Song name (the operator-supplied file path).
        song_name: String,
    },
    /// S→C: the command was invalid; the session is about to close.
    InvalidCommand {
        /// Human-readable reason.
        reason: String,
    },
    /// C→S: request the station listing. The two body bytes are ignored.
    StationsCommand,
    /// S→C: one `"index song\n"` line per station.
    StationsReply {
        /// The formatted listing.
        listing: String,
    },
}

impl Message {
    /// Builds an `Announce`, clamping the song name to the wire limit.
    pub fn announce(song_name: &str) -> Self {
        Self::Announce {
            song_name: clamp_text(song_name),
        }
    }

    /// Builds an `InvalidCommand`, clamping the reason to the wire limit.
    pub fn invalid_command(reason: &str) -> Self {
        Self::InvalidCommand {
            reason: clamp_text(reason),
        }
    }

    /// Builds a `StationsReply`, clamping the listing to the wire limit.
    pub fn stations_reply(listing: &str) -> Self {
        Self::StationsReply {
            listing: clamp_text(listing),
        }
    }

    /// Returns the frame's tag byte.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Hello { .. } => HELLO_TAG,
            Self::SetStation { .. } => SET_STATION_TAG,
            Self::Welcome { .. } => WELCOME_TAG,
            Self::Announce { .. } => ANNOUNCE_TAG,
            Self::InvalidCommand { .. } => INVALID_COMMAND_TAG,
            Self::StationsCommand => STATIONS_COMMAND_TAG,
            Self::StationsReply { .. } => STATIONS_REPLY_TAG,
        }
    }

    /// Serializes the frame. Total: cannot fail.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(self.tag());
        match self {
            Self::Hello { udp_port } => buf.put_u16(*udp_port),
            Self::SetStation { station } => buf.put_u16(*station),
            Self::Welcome { num_stations } => buf.put_u16(*num_stations),
            Self::StationsCommand => buf.put_u16(0),
            Self::Announce { song_name: text }
            | Self::InvalidCommand { reason: text }
            | Self::StationsReply { listing: text } => {
                debug_assert!(text.len() <= MAX_TEXT_LEN);
                buf.put_u8(text.len() as u8);
                buf.put_slice(text.as_bytes());
            }
        }
        buf.freeze()
    }
}

/// Truncates `text` to [`MAX_TEXT_LEN`] bytes on a char boundary.
fn clamp_text(text: &str) -> String {
    if text.len() <= MAX_TEXT_LEN {
        return text.to_owned();
    }
    let mut end = MAX_TEXT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

/// Errors produced while reading one frame from a byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The first byte was not a recognised tag.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    /// A read did not complete within the frame deadline.
    #[error("frame read timed out after {FRAME_READ_TIMEOUT_MS}ms")]
    Timeout,

    /// The underlying stream failed (EOF before the frame completed
    /// surfaces as `UnexpectedEof`).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads exactly `buf.len()` bytes under the frame deadline.
async fn read_exact_deadline<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match timeout(Duration::from_millis(FRAME_READ_TIMEOUT_MS), reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(FrameError::Io(e)),
        Err(_) => Err(FrameError::Timeout),
    }
}

/// Reads exactly one frame from `reader`.
///
/// When `greeting` is true the tag byte itself carries the deadline (used
/// for the handshake, where a silent peer must not pin the session). Mid
/// session the tag byte is awaited without deadline — an idle client is
/// fine — but once a frame has started, every remaining byte must arrive
/// within the deadline.
pub async fn read_message<R>(reader: &mut R, greeting: bool) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    if greeting {
        read_exact_deadline(reader, &mut tag).await?;
    } else {
        reader.read_exact(&mut tag).await?;
    }

    match tag[0] {
        HELLO_TAG | SET_STATION_TAG | WELCOME_TAG | STATIONS_COMMAND_TAG => {
            let mut body = [0u8; 2];
            read_exact_deadline(reader, &mut body).await?;
            let value = u16::from_be_bytes(body);
            Ok(match tag[0] {
                HELLO_TAG => Message::Hello { udp_port: value },
                SET_STATION_TAG => Message::SetStation { station: value },
                WELCOME_TAG => Message::Welcome {
                    num_stations: value,
                },
                _ => Message::StationsCommand,
            })
        }
        ANNOUNCE_TAG | INVALID_COMMAND_TAG | STATIONS_REPLY_TAG => {
            let mut len = [0u8; 1];
            read_exact_deadline(reader, &mut len).await?;
            let mut payload = vec![0u8; len[0] as usize];
            read_exact_deadline(reader, &mut payload).await?;
            let text = String::from_utf8_lossy(&payload).into_owned();
            Ok(match tag[0] {
                ANNOUNCE_TAG => Message::Announce { song_name: text },
                INVALID_COMMAND_TAG => Message::InvalidCommand { reason: text },
                _ => Message::StationsReply { listing: text },
            })
        }
        other => Err(FrameError::UnknownTag(other)),
    }
}

/// Encodes `message` and writes it in full.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.encode()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(message: Message) {
        let bytes = message.encode();
        let decoded = read_message(&mut &bytes[..], false)
            .await
            .expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn hello_encodes_big_endian() {
        let bytes = Message::Hello { udp_port: 0x1234 }.encode();
        assert_eq!(&bytes[..], &[HELLO_TAG, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn stations_command_carries_two_ignored_bytes() {
        let bytes = Message::StationsCommand.encode();
        assert_eq!(&bytes[..], &[STATIONS_COMMAND_TAG, 0, 0]);
    }

    #[tokio::test]
    async fn announce_is_length_prefixed() {
        let bytes = Message::announce("a.mp3").encode();
        assert_eq!(&bytes[..2], &[ANNOUNCE_TAG, 5]);
        assert_eq!(&bytes[2..], b"a.mp3");
    }

    #[tokio::test]
    async fn every_tag_round_trips() {
        round_trip(Message::Hello { udp_port: 16384 }).await;
        round_trip(Message::SetStation { station: 1 }).await;
        round_trip(Message::Welcome { num_stations: 3 }).await;
        round_trip(Message::announce("b.mp3")).await;
        round_trip(Message::invalid_command("invalid station number")).await;
        round_trip(Message::StationsCommand).await;
        round_trip(Message::stations_reply("0 a\n1 b\n")).await;
    }

    #[tokio::test]
    async fn empty_payload_round_trips() {
        round_trip(Message::announce("")).await;
    }

    #[tokio::test]
    async fn unknown_tag_is_rejected() {
        let bytes = [9u8, 0, 0];
        match read_message(&mut &bytes[..], false).await {
            Err(FrameError::UnknownTag(9)) => {}
            other => panic!("expected UnknownTag(9), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_before_tag_is_io_error() {
        let bytes: [u8; 0] = [];
        match read_message(&mut &bytes[..], false).await {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_body_is_io_error() {
        // Announce claiming 5 payload bytes but delivering 2 before EOF.
        let bytes = [ANNOUNCE_TAG, 5, b'a', b'b'];
        match read_message(&mut &bytes[..], false).await {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_times_out() {
        let (mut client, mut server) = tokio::io::duplex(16);
        // Tag byte only; the body never arrives but the stream stays open.
        client.write_all(&[SET_STATION_TAG]).await.unwrap();
        match read_message(&mut server, false).await {
            Err(FrameError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_greeting_times_out() {
        let (_client, mut server) = tokio::io::duplex(16);
        match read_message(&mut server, true).await {
            Err(FrameError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_text_is_clamped() {
        let long = "x".repeat(300);
        let Message::Announce { song_name } = Message::announce(&long) else {
            unreachable!();
        };
        assert_eq!(song_name.len(), MAX_TEXT_LEN);
        round_trip(Message::announce(&long)).await;
    }
}
