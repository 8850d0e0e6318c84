//! Authoritative membership table: live clients and per-station subscriber
//! lists.
//!
//! Every mutation — add, remove, tune — takes the single write lock, so a
//! reader always observes a state where a client sits in at most one
//! subscriber list and its current-station field agrees with that list.
//! Station pacers and the operator report take the read lock and work from
//! snapshots.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{SnowcastError, SnowcastResult};

/// One live client session, owned by the membership table and borrowed
/// (via `Arc`) by pacers during fan-out.
pub struct ClientHandle {
    id: u64,
    /// Socket connected to the peer's announced UDP endpoint.
    udp: UdpSocket,
    announce_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Returns the client's unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the connected UDP socket for song-data datagrams.
    #[must_use]
    pub fn udp(&self) -> &UdpSocket {
        &self.udp
    }

    /// Returns the close signal for this session.
    ///
    /// Use this in `tokio::select!` to observe server shutdown.
    #[must_use]
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the UDP endpoint datagrams are sent to.
    pub fn udp_peer(&self) -> io::Result<SocketAddr> {
        self.udp.peer_addr()
    }

    /// Queues a song-change announcement for the session to deliver.
    ///
    /// The slot holds at most one pending announcement; when it is full the
    /// notification for this tick is dropped so a slow TCP writer cannot
    /// stall the pacer.
    pub(crate) fn notify_song(&self, song_name: &str) {
        if self.announce_tx.try_send(song_name.to_owned()).is_err() {
            log::debug!(
                "[Membership] client {}: announce slot full, dropping notification",
                self.id
            );
        }
    }
}

struct StationEntry {
    song_name: String,
    subscribers: Vec<Arc<ClientHandle>>,
}

struct ClientEntry {
    handle: Arc<ClientHandle>,
    station: Option<usize>,
}

struct Inner {
    clients: HashMap<u64, ClientEntry>,
    stations: Vec<StationEntry>,
}

/// The set of all live clients plus each station's subscriber list.
pub struct Membership {
    next_id: AtomicU64,
    inner: RwLock<Inner>,
}

impl Membership {
    /// Creates the table with one station per song name. Station indices
    /// are dense and fixed for the server's lifetime.
    #[must_use]
    pub fn new(song_names: Vec<String>) -> Self {
        let stations = song_names
            .into_iter()
            .map(|song_name| StationEntry {
                song_name,
                subscribers: Vec::new(),
            })
            .collect();
        Self {
            next_id: AtomicU64::new(1),
            inner: RwLock::new(Inner {
                clients: HashMap::new(),
                stations,
            }),
        }
    }

    /// Returns the number of stations.
    #[must_use]
    pub fn station_count(&self) -> u16 {
        self.inner.read().stations.len() as u16
    }

    /// Returns the song playing on `station`, or `None` when out of range.
    #[must_use]
    pub fn song_name(&self, station: usize) -> Option<String> {
        self.inner
            .read()
            .stations
            .get(station)
            .map(|s| s.song_name.clone())
    }

    /// Returns the number of live clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    /// Inserts a new session record. The client starts with no station.
    pub fn add_client(
        &self,
        udp: UdpSocket,
        announce_tx: mpsc::Sender<String>,
    ) -> Arc<ClientHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ClientHandle {
            id,
            udp,
            announce_tx,
            cancel: CancellationToken::new(),
        });
        let mut inner = self.inner.write();
        inner.clients.insert(
            id,
            ClientEntry {
                handle: Arc::clone(&handle),
                station: None,
            },
        );
        log::info!(
            "[Membership] client {} registered (total: {})",
            id,
            inner.clients.len()
        );
        handle
    }

    /// Removes a session record and, if subscribed, drops it from its
    /// station's list. Idempotent: removing an unknown client only logs.
    pub fn remove_client(&self, handle: &ClientHandle) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.clients.remove(&handle.id()) else {
            log::debug!(
                "[Membership] client {} already removed, ignoring",
                handle.id()
            );
            return;
        };
        if let Some(station) = entry.station {
            inner.stations[station]
                .subscribers
                .retain(|c| c.id() != handle.id());
        }
        log::info!(
            "[Membership] client {} removed (remaining: {})",
            handle.id(),
            inner.clients.len()
        );
    }

    /// Moves the client to `station`, returning the station's song name.
    ///
    /// Bounds-checks before any side effect; on `BadStation` the table is
    /// untouched.
    pub fn set_station(&self, handle: &ClientHandle, station: u16) -> SnowcastResult<String> {
        let mut inner = self.inner.write();
        let station_count = inner.stations.len() as u16;
        if station >= station_count {
            return Err(SnowcastError::BadStation {
                station,
                station_count,
            });
        }
        let new = station as usize;
        let song_name = inner.stations[new].song_name.clone();

        let Some(entry) = inner.clients.get_mut(&handle.id()) else {
            // The session is already unwinding; nothing to move.
            log::debug!(
                "[Membership] client {} tuned while unregistered, ignoring",
                handle.id()
            );
            return Ok(song_name);
        };
        let old = entry.station.replace(new);
        let moved = Arc::clone(&entry.handle);

        if let Some(old) = old {
            inner.stations[old]
                .subscribers
                .retain(|c| c.id() != handle.id());
        }
        inner.stations[new].subscribers.push(moved);
        log::debug!(
            "[Membership] client {} tuned to station {} ({})",
            handle.id(),
            new,
            song_name
        );
        Ok(song_name)
    }

    /// Returns a copy of `station`'s subscriber list for one fan-out tick.
    #[must_use]
    pub fn subscriber_snapshot(&self, station: usize) -> Vec<Arc<ClientHandle>> {
        self.inner
            .read()
            .stations
            .get(station)
            .map(|s| s.subscribers.clone())
            .unwrap_or_default()
    }

    /// Formats the `"index song\n"` listing sent in `StationsReply`.
    #[must_use]
    pub fn stations_listing(&self) -> String {
        let inner = self.inner.read();
        let mut listing = String::new();
        for (index, station) in inner.stations.iter().enumerate() {
            listing.push_str(&format!("{index} {}\n", station.song_name));
        }
        listing
    }

    /// Writes the operator report: one `index,song,peer,peer…` line per
    /// station.
    pub fn report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let inner = self.inner.read();
        for (index, station) in inner.stations.iter().enumerate() {
            write!(out, "{index},{}", station.song_name)?;
            for subscriber in &station.subscribers {
                if let Ok(peer) = subscriber.udp_peer() {
                    write!(out, ",{peer}")?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Signals every live session to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let inner = self.inner.read();
        for entry in inner.clients.values() {
            entry.handle.cancel.cancel();
        }
        let count = inner.clients.len();
        if count > 0 {
            log::info!("[Membership] signalled {count} session(s) to close");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ANNOUNCE_CHANNEL_CAPACITY;

    async fn test_client(
        membership: &Membership,
    ) -> (Arc<ClientHandle>, mpsc::Receiver<String>, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        udp.connect(peer.local_addr().unwrap()).await.unwrap();
        let (tx, rx) = mpsc::channel(ANNOUNCE_CHANNEL_CAPACITY);
        (membership.add_client(udp, tx), rx, peer)
    }

    fn subscriber_ids(membership: &Membership, station: usize) -> Vec<u64> {
        membership
            .subscriber_snapshot(station)
            .iter()
            .map(|c| c.id())
            .collect()
    }

    #[tokio::test]
    async fn client_appears_in_at_most_one_station() {
        let membership = Membership::new(vec!["a.mp3".into(), "b.mp3".into()]);
        let (client, _rx, _peer) = test_client(&membership).await;

        membership.set_station(&client, 0).unwrap();
        membership.set_station(&client, 1).unwrap();

        assert!(subscriber_ids(&membership, 0).is_empty());
        assert_eq!(subscriber_ids(&membership, 1), vec![client.id()]);
    }

    #[tokio::test]
    async fn set_station_returns_song_name() {
        let membership = Membership::new(vec!["a.mp3".into(), "b.mp3".into()]);
        let (client, _rx, _peer) = test_client(&membership).await;

        assert_eq!(membership.set_station(&client, 1).unwrap(), "b.mp3");
    }

    #[tokio::test]
    async fn bad_station_leaves_table_untouched() {
        let membership = Membership::new(vec!["a.mp3".into(), "b.mp3".into()]);
        let (client, _rx, _peer) = test_client(&membership).await;
        membership.set_station(&client, 0).unwrap();

        match membership.set_station(&client, 7) {
            Err(SnowcastError::BadStation {
                station: 7,
                station_count: 2,
            }) => {}
            other => panic!("expected BadStation, got {other:?}"),
        }
        assert_eq!(subscriber_ids(&membership, 0), vec![client.id()]);
    }

    #[tokio::test]
    async fn remove_client_is_idempotent() {
        let membership = Membership::new(vec!["a.mp3".into()]);
        let (client, _rx, _peer) = test_client(&membership).await;
        membership.set_station(&client, 0).unwrap();

        membership.remove_client(&client);
        membership.remove_client(&client);

        assert_eq!(membership.client_count(), 0);
        assert!(subscriber_ids(&membership, 0).is_empty());
    }

    #[tokio::test]
    async fn notify_drops_when_slot_full() {
        let membership = Membership::new(vec!["a.mp3".into()]);
        let (client, mut rx, _peer) = test_client(&membership).await;

        client.notify_song("a.mp3");
        client.notify_song("a.mp3");

        assert_eq!(rx.recv().await.unwrap(), "a.mp3");
        assert!(rx.try_recv().is_err(), "second notification was dropped");
    }

    #[tokio::test]
    async fn listing_and_report_formats() {
        let membership = Membership::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(membership.stations_listing(), "0 a\n1 b\n2 c\n");

        let (client, _rx, peer) = test_client(&membership).await;
        membership.set_station(&client, 1).unwrap();

        let mut out = Vec::new();
        membership.report(&mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        let expected_peer = peer.local_addr().unwrap();
        assert_eq!(report, format!("0,a\n1,b,{expected_peer}\n2,c\n"));
    }

    #[tokio::test]
    async fn close_all_signals_every_session() {
        let membership = Membership::new(vec!["a".into()]);
        let (first, _rx1, _p1) = test_client(&membership).await;
        let (second, _rx2, _p2) = test_client(&membership).await;

        assert_eq!(membership.close_all(), 2);
        assert!(first.cancel().is_cancelled());
        assert!(second.cancel().is_cancelled());
    }
}
