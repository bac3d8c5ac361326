//! Multi-peer display host.
//!
//! Accepts WebSocket connections, keeps the set of open peers, and shows
//! the most recently received image from any of them on one shared display
//! slot — last write wins, no fan-out back to peers. All registry state is
//! owned by a single task fed by one merged event channel, so peer set and
//! display slot need no locking.

use anyhow::Result;
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;

use crate::connection::{ConnectionEvent, PeerConnection};
use crate::protocol::{Frame, Opcode};
use crate::viewer::DisplaySink;

/// The set of currently-open peer connections plus the shared display slot.
pub struct ConnectionRegistry<D: DisplaySink> {
    peers: HashMap<String, PeerConnection>,
    last_seen: Option<Frame>,
    display: D,
}

impl<D: DisplaySink> ConnectionRegistry<D> {
    pub fn new(display: D) -> Self {
        Self {
            peers: HashMap::new(),
            last_seen: None,
            display,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The most recent image frame received from any peer.
    pub fn last_seen(&self) -> Option<&Frame> {
        self.last_seen.as_ref()
    }

    pub fn insert(&mut self, id: String, conn: PeerConnection) {
        self.peers.insert(id, conn);
        self.display.set_peer_count(self.peers.len());
    }

    /// Remove and discard a peer. Idempotent — safe to call from both the
    /// error path and an explicit close.
    pub fn remove(&mut self, id: &str) {
        if let Some(conn) = self.peers.remove(id) {
            conn.close();
            self.display.set_peer_count(self.peers.len());
        }
    }

    /// Route one event from peer `id`. Image frames update the shared slot;
    /// errors and closes deregister the peer. Events arriving for a peer
    /// already removed are ignored.
    pub fn handle_event(&mut self, id: &str, event: ConnectionEvent) {
        if !self.peers.contains_key(id) {
            return;
        }
        match event {
            ConnectionEvent::Open => {}
            ConnectionEvent::Frame(frame) => {
                if frame.opcode == Opcode::Jpeg {
                    self.display.show(&frame.payload);
                    self.last_seen = Some(frame);
                }
            }
            ConnectionEvent::Error(e) => {
                eprintln!("❌ Peer {} error: {}", id, e);
                self.remove(id);
            }
            ConnectionEvent::Closed => self.remove(id),
        }
    }

    /// Close every peer. Used on host shutdown.
    pub fn close_all(&mut self) {
        for conn in self.peers.values() {
            conn.close();
        }
        self.peers.clear();
        self.display.set_peer_count(0);
    }
}

/// Short random identity tag for an accepted peer.
fn peer_tag() -> String {
    use rand::Rng;
    let bytes: Vec<u8> = (0..4).map(|_| rand::thread_rng().gen()).collect();
    hex::encode(bytes)
}

/// Run the host on an already-bound listener until `quit_rx` fires.
pub async fn run_host<D: DisplaySink>(
    listener: TcpListener,
    display: D,
    mut quit_rx: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let accept = tokio::spawn(accept_loop(listener, peer_tx, event_tx));

    let mut registry = ConnectionRegistry::new(display);
    loop {
        tokio::select! {
            Some((id, conn)) = peer_rx.recv() => registry.insert(id, conn),
            Some((id, event)) = event_rx.recv() => registry.handle_event(&id, event),
            _ = quit_rx.recv() => break,
        }
    }

    accept.abort();
    registry.close_all();
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    peer_tx: mpsc::UnboundedSender<(String, PeerConnection)>,
    event_tx: mpsc::UnboundedSender<(String, ConnectionEvent)>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("❌ Accept error: {}", e);
                continue;
            }
        };

        let peer_tx = peer_tx.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            // Handshake failure is fatal to this attempt only; no retry here
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    eprintln!("❌ Handshake failed from {}: {}", addr, e);
                    return;
                }
            };

            let (mut conn, mut events) = PeerConnection::accept(ws);
            conn.start();

            let id = peer_tag();
            if peer_tx.send((id.clone(), conn)).is_err() {
                return;
            }
            // Pump this peer's events into the registry's merged channel
            while let Some(event) = events.recv().await {
                if event_tx.send((id.clone(), event)).is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::ws_pair;
    use crate::connection::ConnectionEvent;
    use crate::protocol::{Frame, Opcode};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        shown: Vec<Vec<u8>>,
        peer_counts: Vec<usize>,
    }

    impl DisplaySink for RecordingSink {
        fn show(&mut self, payload: &[u8]) {
            self.shown.push(payload.to_vec());
        }

        fn set_peer_count(&mut self, count: usize) {
            self.peer_counts.push(count);
        }
    }

    async fn registry_with_peers(
        n: usize,
    ) -> (
        ConnectionRegistry<RecordingSink>,
        Vec<String>,
        Vec<tokio_tungstenite::WebSocketStream<tokio::io::DuplexStream>>,
        mpsc::UnboundedReceiver<(String, ConnectionEvent)>,
    ) {
        let mut registry = ConnectionRegistry::new(RecordingSink::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut ids = Vec::new();
        let mut remotes = Vec::new();

        for i in 0..n {
            let (host_ws, remote_ws) = ws_pair().await;
            let (mut conn, mut events) = PeerConnection::accept(host_ws);
            conn.start();
            let id = format!("peer-{}", i);
            registry.insert(id.clone(), conn);

            let pump_id = id.clone();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event_tx.send((pump_id.clone(), event)).is_err() {
                        break;
                    }
                }
            });

            ids.push(id);
            remotes.push(remote_ws);
        }

        (registry, ids, remotes, event_rx)
    }

    #[tokio::test]
    async fn test_disconnect_cleanup() {
        let (mut registry, ids, mut remotes, mut events) = registry_with_peers(3).await;
        assert_eq!(registry.peer_count(), 3);

        // One peer's transport goes away
        drop(remotes.remove(1));

        // Drain Open notifications until the failing peer's terminal event
        loop {
            let (id, event) = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            let terminal = !matches!(event, ConnectionEvent::Open);
            if terminal {
                assert_eq!(id, ids[1]);
            }
            registry.handle_event(&id, event);
            if terminal {
                break;
            }
        }

        assert_eq!(registry.peer_count(), 2);
        assert_eq!(*registry.display.peer_counts.last().unwrap(), 2);

        // Straggler events for the removed peer are ignored
        registry.handle_event(&ids[1], ConnectionEvent::Frame(Frame::jpeg(b"late".to_vec())));
        assert!(registry.display.shown.is_empty());
        assert_eq!(registry.peer_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (mut registry, ids, _remotes, _events) = registry_with_peers(2).await;

        registry.remove(&ids[0]);
        registry.remove(&ids[0]);
        assert_eq!(registry.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_shared_slot_is_last_write_wins_across_peers() {
        let (mut registry, ids, _remotes, _events) = registry_with_peers(2).await;

        registry.handle_event(&ids[0], ConnectionEvent::Frame(Frame::jpeg(b"a".to_vec())));
        registry.handle_event(&ids[1], ConnectionEvent::Frame(Frame::jpeg(b"b".to_vec())));
        registry.handle_event(&ids[0], ConnectionEvent::Frame(Frame::jpeg(b"c".to_vec())));

        assert_eq!(registry.display.shown.len(), 3);
        assert_eq!(registry.last_seen().unwrap().payload, b"c");
    }

    #[tokio::test]
    async fn test_unknown_opcode_does_not_touch_the_display() {
        let (mut registry, ids, _remotes, _events) = registry_with_peers(1).await;

        registry.handle_event(
            &ids[0],
            ConnectionEvent::Frame(Frame {
                opcode: Opcode::Unknown(3),
                payload: b"x".to_vec(),
            }),
        );

        assert!(registry.display.shown.is_empty());
        assert!(registry.last_seen().is_none());
        assert_eq!(registry.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_host_end_to_end_over_listener() {
        use futures_util::SinkExt;
        use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (quit_tx, quit_rx) = mpsc::unbounded_channel();

        let host = tokio::spawn(async move {
            run_host(listener, RecordingSink::default(), quit_rx).await
        });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(WsMessage::Binary(Frame::jpeg(b"live".to_vec()).encode()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        // Give the host a moment to route the frame, then shut it down
        tokio::time::sleep(Duration::from_millis(200)).await;
        quit_tx.send(()).unwrap();
        host.await.unwrap().unwrap();
    }
}
