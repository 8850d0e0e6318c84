//! Snowcast core — a multi-station streaming radio engine.
//!
//! This crate provides the server side of Snowcast: stations broadcast the
//! bytes of local song files over UDP at a constant rate to every tuned
//! listener, while clients tune and receive announcements over a small
//! binary TCP protocol. It is consumed by the `snowcast_server` binary;
//! the control client and listener binaries share only the [`protocol`]
//! codec.
//!
//! # Architecture
//!
//! - [`protocol`]: wire codec for the control channel (bit-exact framing)
//! - [`membership`]: authoritative client/station table under one lock
//! - [`station`]: per-station pacing loop with UDP fan-out
//! - [`session`]: per-connection control actor
//! - [`server`]: acceptor, supervision, graceful shutdown
//! - [`error`]: centralized error types
//! - [`constants`]: protocol and pacing constants

#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod membership;
pub mod protocol;
pub mod server;
pub mod session;
pub mod station;

// Re-export commonly used types at the crate root
pub use error::{SnowcastError, SnowcastResult};
pub use membership::{ClientHandle, Membership};
pub use protocol::{read_message, write_message, FrameError, Message};
pub use server::Server;
pub use station::{PacingConfig, StationPacer};
