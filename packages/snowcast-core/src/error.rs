//! Centralized error types for the Snowcast core library.
//!
//! Per-module error enums (e.g. [`FrameError`](crate::protocol::FrameError))
//! convert into [`SnowcastError`] at the seams, so callers see one taxonomy:
//! protocol violations, deadlines, transport failures, and configuration
//! problems.

use thiserror::Error;

use crate::protocol::FrameError;

/// Application-wide error type for the Snowcast server.
#[derive(Debug, Error)]
pub enum SnowcastError {
    /// Peer violated the control protocol (unknown tag, wrong tag for the
    /// current state, semantically invalid body).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A control frame did not arrive within its read deadline.
    #[error("control frame read timed out")]
    Timeout,

    /// TCP read/write or UDP send failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Client selected a station index the server does not have.
    #[error("invalid station {station}: server has {station_count} stations")]
    BadStation {
        /// The requested station index.
        station: u16,
        /// Number of stations the server was started with.
        station_count: u16,
    },

    /// Bad CLI arguments, bind failure, or an unopenable song file at
    /// startup. Fatal to the whole server only at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<FrameError> for SnowcastError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnknownTag(tag) => Self::Protocol(format!("unknown message tag {tag}")),
            FrameError::Timeout => Self::Timeout,
            FrameError::Io(e) => Self::Transport(e),
        }
    }
}

/// Convenient Result alias for core operations.
pub type SnowcastResult<T> = Result<T, SnowcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timeout_maps_to_timeout() {
        let err: SnowcastError = FrameError::Timeout.into();
        assert!(matches!(err, SnowcastError::Timeout));
    }

    #[test]
    fn unknown_tag_maps_to_protocol() {
        let err: SnowcastError = FrameError::UnknownTag(9).into();
        match err {
            SnowcastError::Protocol(msg) => assert!(msg.contains('9')),
            other => panic!("expected Protocol, got {other:?}"),
        }
    }
}
