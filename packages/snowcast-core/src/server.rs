//! TCP acceptor and supervisor.
//!
//! [`Server`] owns the listen socket, the membership table, and the
//! shutdown machinery: station pacers and the acceptor observe one
//! cancellation token, sessions are tracked so shutdown can wait for them
//! to drain.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{SnowcastError, SnowcastResult};
use crate::membership::Membership;
use crate::session;
use crate::station::{PacingConfig, StationPacer};

/// The Snowcast server: acceptor, station pacers, and shutdown control.
pub struct Server {
    listener: TcpListener,
    membership: Arc<Membership>,
    songs: Vec<String>,
    pacing: PacingConfig,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Server {
    /// Binds the control port and builds the membership table, one station
    /// per song file. Bind failure and an empty station list are
    /// configuration errors, fatal at startup.
    pub async fn bind(
        addr: SocketAddr,
        songs: Vec<String>,
        pacing: PacingConfig,
    ) -> SnowcastResult<Self> {
        pacing.validate().map_err(SnowcastError::Configuration)?;
        if songs.is_empty() {
            return Err(SnowcastError::Configuration(
                "at least one song file is required".into(),
            ));
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SnowcastError::Configuration(format!("failed to bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            membership: Arc::new(Membership::new(songs.clone())),
            songs,
            pacing,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Returns the bound control address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the membership table (for the operator report).
    #[must_use]
    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    /// Starts one pacer task per station.
    pub fn start_stations(&self) {
        for (index, song) in self.songs.iter().enumerate() {
            let pacer = StationPacer::new(
                index,
                song.clone(),
                Arc::clone(&self.membership),
                self.pacing.clone(),
            );
            tokio::spawn(pacer.run(self.cancel.child_token()));
        }
        log::info!("[Server] started {} station(s)", self.songs.len());
    }

    /// Accepts control connections until shutdown, spawning one session per
    /// connection. The acceptor never reads protocol data itself.
    pub async fn run(&self) {
        match self.local_addr() {
            Ok(addr) => log::info!("[Server] accepting control connections on {addr}"),
            Err(_) => log::info!("[Server] accepting control connections"),
        }
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::debug!("[Server] accepted {peer}");
                        let membership = Arc::clone(&self.membership);
                        self.tracker.spawn(session::run_session(stream, membership));
                    }
                    Err(e) => log::warn!("[Server] accept failed: {e}"),
                }
            }
        }
        log::debug!("[Server] acceptor stopped");
    }

    /// Graceful shutdown: stop the acceptor and pacers, signal every
    /// session to close, and wait for them to drain.
    pub async fn shutdown(&self) {
        log::info!("[Server] beginning graceful shutdown...");
        self.cancel.cancel();
        let signalled = self.membership.close_all();
        self.tracker.close();
        self.tracker.wait().await;
        log::info!("[Server] shutdown complete ({signalled} session(s) closed)");
    }
}
