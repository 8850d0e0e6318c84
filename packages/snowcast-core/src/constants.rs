//! Fixed protocol and pacing constants that should NOT be changed.
//!
//! The wire values are defined by the Snowcast control protocol; changing
//! them would break interoperability with existing clients and listeners.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Control Channel
// ─────────────────────────────────────────────────────────────────────────────

/// Deadline applied to control-frame reads (milliseconds).
///
/// A peer that has started a frame must deliver the rest of it within this
/// window, otherwise the session is torn down. The same deadline covers the
/// initial greeting.
pub const FRAME_READ_TIMEOUT_MS: u64 = 100;

/// Maximum length of a string payload on the wire (one-byte length prefix).
pub const MAX_TEXT_LEN: usize = u8::MAX as usize;

// ─────────────────────────────────────────────────────────────────────────────
// Audio Fan-Out
// ─────────────────────────────────────────────────────────────────────────────

/// Size of one song-data chunk, sent as a single UDP datagram.
pub const CHUNK_SIZE: usize = 1024;

/// Chunks sent per second per station.
///
/// With [`CHUNK_SIZE`] this yields a 16 KiB/s aggregate rate, the rate the
/// reference listener expects.
pub const CHUNKS_PER_SECOND: u32 = 16;

/// Interval between fan-out ticks at the default rate.
pub const TICK_INTERVAL: Duration = Duration::from_micros(1_000_000 / CHUNKS_PER_SECOND as u64);

// ─────────────────────────────────────────────────────────────────────────────
// Channel Capacities
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of a client's song-change announcement channel.
///
/// A single slot: a client has at most one announcement pending, and the
/// pacer drops the notification for a tick rather than block on a slow
/// session writer.
pub const ANNOUNCE_CHANNEL_CAPACITY: usize = 1;

/// Capacity of the per-session decoded-frame channel.
///
/// One frame in flight keeps replies in request order.
pub const SESSION_FRAME_CHANNEL_CAPACITY: usize = 1;

/// Capacity of the operator keyboard-input channel.
pub const OPERATOR_CHANNEL_CAPACITY: usize = 8;
