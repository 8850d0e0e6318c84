//! Per-station pacing loop.
//!
//! Each station runs one long-lived pacer task that reads its song file in
//! fixed-size chunks and fans each chunk out to every current subscriber as
//! a single UDP datagram, at a constant aggregate rate. Reaching the end of
//! the file rewinds it and queues a song-change announcement for every
//! subscriber, so a listener that joins mid-song sees the announce at the
//! next wrap.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::constants::{CHUNKS_PER_SECOND, CHUNK_SIZE};
use crate::membership::Membership;

/// Validated pacing parameters.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Bytes per chunk; one chunk becomes one UDP datagram.
    pub chunk_size: usize,
    /// Fan-out ticks per second.
    pub chunks_per_second: u32,
}

impl PacingConfig {
    /// Creates a new `PacingConfig` with validated values.
    ///
    /// # Errors
    ///
    /// Returns an error if either value would stall or flood the pacer.
    pub fn new(chunk_size: usize, chunks_per_second: u32) -> Result<Self, String> {
        let config = Self {
            chunk_size,
            chunks_per_second,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be >= 1".to_string());
        }
        if self.chunk_size > u16::MAX as usize {
            return Err("chunk_size must fit one UDP datagram (<= 65535)".to_string());
        }
        if self.chunks_per_second == 0 {
            return Err("chunks_per_second must be >= 1".to_string());
        }
        Ok(())
    }

    /// Interval between fan-out ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.chunks_per_second))
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            chunks_per_second: CHUNKS_PER_SECOND,
        }
    }
}

/// Long-lived pacer for one station.
pub struct StationPacer {
    index: usize,
    song_name: String,
    membership: Arc<Membership>,
    config: PacingConfig,
}

impl StationPacer {
    /// Creates the pacer for station `index` playing `song_name`.
    #[must_use]
    pub fn new(
        index: usize,
        song_name: String,
        membership: Arc<Membership>,
        config: PacingConfig,
    ) -> Self {
        Self {
            index,
            song_name,
            membership,
            config,
        }
    }

    /// Runs the pacing loop until `cancel` fires or the file errors.
    ///
    /// An unopenable file or an unrecoverable read error ends the task and
    /// the station goes dark: no fan-out, no announcements, subscriptions
    /// left intact.
    pub async fn run(self, cancel: CancellationToken) {
        let mut file = match File::open(&self.song_name).await {
            Ok(file) => file,
            Err(e) => {
                log::error!(
                    "[Pacer] station {} failed to open {}: {e}; station is dark",
                    self.index,
                    self.song_name
                );
                return;
            }
        };
        log::info!(
            "[Pacer] station {} playing {} at {} chunks/s",
            self.index,
            self.song_name,
            self.config.chunks_per_second
        );

        // Burst catch-up keeps the aggregate rate at chunks_per_second even
        // when a slow tick overruns the interval.
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut chunk = vec![0u8; self.config.chunk_size];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("[Pacer] station {} stopped", self.index);
                    return;
                }
                _ = ticker.tick() => {}
            }

            let n = match file.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    log::error!(
                        "[Pacer] station {} read error on {}: {e}; station is dark",
                        self.index,
                        self.song_name
                    );
                    return;
                }
            };

            if n < self.config.chunk_size {
                // Wrap: rewind and let every current subscriber know the
                // song starts over.
                if let Err(e) = file.seek(SeekFrom::Start(0)).await {
                    log::error!(
                        "[Pacer] station {} rewind error on {}: {e}; station is dark",
                        self.index,
                        self.song_name
                    );
                    return;
                }
                self.announce_wrap();
            }

            self.fan_out(&chunk[..n]).await;
        }
    }

    fn announce_wrap(&self) {
        for subscriber in self.membership.subscriber_snapshot(self.index) {
            subscriber.notify_song(&self.song_name);
        }
    }

    /// Sends one chunk to every current subscriber. Best effort: a failed
    /// send is skipped and must not disturb the other subscribers or the
    /// schedule.
    async fn fan_out(&self, data: &[u8]) {
        for subscriber in self.membership.subscriber_snapshot(self.index) {
            if let Err(e) = subscriber.udp().send(data).await {
                log::debug!(
                    "[Pacer] station {} send to client {} failed: {e}; skipping",
                    self.index,
                    subscriber.id()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ANNOUNCE_CHANNEL_CAPACITY;
    use crate::membership::ClientHandle;
    use std::io::Write as _;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Fast pacing so the tests finish quickly: 10ms ticks, 64-byte chunks.
    fn fast_config() -> PacingConfig {
        PacingConfig::new(64, 100).unwrap()
    }

    fn song_file(bytes: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0x5a; bytes]).unwrap();
        file.flush().unwrap();
        file
    }

    async fn subscribed_client(
        membership: &Arc<Membership>,
    ) -> (Arc<ClientHandle>, mpsc::Receiver<String>, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        udp.connect(peer.local_addr().unwrap()).await.unwrap();
        let (tx, rx) = mpsc::channel(ANNOUNCE_CHANNEL_CAPACITY);
        let client = membership.add_client(udp, tx);
        membership.set_station(&client, 0).unwrap();
        (client, rx, peer)
    }

    #[tokio::test]
    async fn announces_on_wrap_and_delivers_chunks() {
        let config = fast_config();
        let file = song_file(config.chunk_size * 2);
        let song = file.path().to_string_lossy().into_owned();
        let membership = Arc::new(Membership::new(vec![song.clone()]));
        let (_client, mut announce_rx, peer) = subscribed_client(&membership).await;

        let cancel = CancellationToken::new();
        let pacer = StationPacer::new(0, song.clone(), Arc::clone(&membership), config.clone());
        let task = tokio::spawn(pacer.run(cancel.clone()));

        let mut buf = [0u8; 2048];
        let n = timeout(Duration::from_secs(1), peer.recv(&mut buf))
            .await
            .expect("datagram within a second")
            .unwrap();
        assert_eq!(n, config.chunk_size);

        // Two full chunks, so the wrap announce lands on the third tick.
        let announced = timeout(Duration::from_secs(1), announce_rx.recv())
            .await
            .expect("announce within a second")
            .unwrap();
        assert_eq!(announced, song);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn partial_final_chunk_is_sent_before_wrap() {
        let config = fast_config();
        let file = song_file(config.chunk_size + config.chunk_size / 2);
        let song = file.path().to_string_lossy().into_owned();
        let membership = Arc::new(Membership::new(vec![song.clone()]));
        let (_client, _announce_rx, peer) = subscribed_client(&membership).await;

        let cancel = CancellationToken::new();
        let pacer = StationPacer::new(0, song, Arc::clone(&membership), config.clone());
        let task = tokio::spawn(pacer.run(cancel.clone()));

        let mut buf = [0u8; 2048];
        let first = timeout(Duration::from_secs(1), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_secs(1), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, config.chunk_size);
        assert_eq!(second, config.chunk_size / 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn full_announce_slot_does_not_stall_the_pacer() {
        let config = fast_config();
        // Shorter than one chunk: wraps on every tick.
        let file = song_file(config.chunk_size / 2);
        let song = file.path().to_string_lossy().into_owned();
        let membership = Arc::new(Membership::new(vec![song.clone()]));
        // Announce receiver is never drained; the slot fills after one wrap.
        let (_client, _announce_rx, peer) = subscribed_client(&membership).await;

        let cancel = CancellationToken::new();
        let pacer = StationPacer::new(0, song, Arc::clone(&membership), config);
        let task = tokio::spawn(pacer.run(cancel.clone()));

        let mut buf = [0u8; 2048];
        for _ in 0..3 {
            timeout(Duration::from_secs(1), peer.recv(&mut buf))
                .await
                .expect("pacer keeps ticking with a full announce slot")
                .unwrap();
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_darkens_the_station() {
        let membership = Arc::new(Membership::new(vec!["no-such-file.mp3".into()]));
        let pacer = StationPacer::new(
            0,
            "no-such-file.mp3".into(),
            membership,
            PacingConfig::default(),
        );
        let task = tokio::spawn(pacer.run(CancellationToken::new()));
        timeout(Duration::from_secs(1), task)
            .await
            .expect("dark station terminates its pacer")
            .unwrap();
    }

    #[test]
    fn pacing_config_is_validated() {
        assert!(PacingConfig::new(0, 16).is_err());
        assert!(PacingConfig::new(1024, 0).is_err());
        assert!(PacingConfig::new(70_000, 16).is_err());
        assert_eq!(
            PacingConfig::default().tick_interval(),
            Duration::from_micros(62_500)
        );
    }
}
