use crate::error::GossipError;
use crate::peers::PeerBook;
use crate::wire::Announcement;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const INTAKE_BUFFER: usize = 64;

/// Accepts announcements from peers and forwards them, deduplicated, to
/// the node's intake channel. The subscriber never touches the registry
/// itself; every forwarded record goes through the full local pipeline.
pub struct Subscriber {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Subscriber {
    pub async fn bind(
        addr: &str,
        peers: Arc<PeerBook>,
    ) -> Result<(Self, mpsc::Receiver<Announcement>), GossipError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(INTAKE_BUFFER);
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let handle = tokio::spawn(accept_loop(listener, tx, seen, peers));
        info!("Subscriber listening on {}", local_addr);

        Ok((
            Self {
                local_addr,
                handle,
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Announcement>,
    seen: Arc<Mutex<HashSet<String>>>,
    peers: Arc<PeerBook>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tokio::spawn(handle_conn(
                    stream,
                    remote,
                    tx.clone(),
                    seen.clone(),
                    peers.clone(),
                ));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_conn(
    stream: TcpStream,
    remote: SocketAddr,
    tx: mpsc::Sender<Announcement>,
    seen: Arc<Mutex<HashSet<String>>>,
    peers: Arc<PeerBook>,
) {
    let reader = BufReader::new(stream);
    let mut lines = reader.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Announcement>(&line) {
            Ok(announcement) => {
                let fresh = seen.lock().await.insert(announcement.announce_id.clone());
                if !fresh {
                    debug!(
                        "Duplicate announcement for {} ignored",
                        announcement.name
                    );
                    continue;
                }
                peers.observe(&announcement.origin_peer_id).await;
                if tx.send(announcement).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Discarding malformed announcement from {}: {}", remote, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use toolforge_core::{Origin, Param, ToolRecord, ToolSignature, ToolStatus, ValueShape};

    fn signature() -> ToolSignature {
        ToolSignature {
            params: vec![Param {
                name: "x".to_string(),
                shape: ValueShape::Number,
            }],
            returns: ValueShape::Number,
            deterministic: true,
        }
    }

    fn record(name: &str) -> ToolRecord {
        ToolRecord {
            name: name.to_string(),
            description: "test".to_string(),
            source: format!("def {}(x):\n    return x\n", name),
            status: ToolStatus::Active,
            origin: Origin::Local,
            created_at: chrono::Utc::now().timestamp(),
            validation_report: None,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let receiver_peers = Arc::new(PeerBook::new());
        let (subscriber, mut rx) = Subscriber::bind("127.0.0.1:0", receiver_peers.clone())
            .await
            .unwrap();

        let sender_peers = Arc::new(PeerBook::new());
        sender_peers
            .add("peer-b", &subscriber.local_addr().to_string())
            .await;
        let broadcaster = Broadcaster::new(sender_peers, Duration::from_secs(2));

        let announcement = Announcement::for_record(&record("square"), &signature(), "node-a");
        broadcaster.announce(&announcement).await;

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.name, "square");
        assert_eq!(received.origin_peer_id, "node-a");

        // The origin peer is now a known contact.
        assert!(receiver_peers
            .list()
            .await
            .iter()
            .any(|p| p.peer_id == "node-a"));
    }

    #[tokio::test]
    async fn test_duplicate_announcement_is_idempotent() {
        let peers = Arc::new(PeerBook::new());
        let (subscriber, mut rx) = Subscriber::bind("127.0.0.1:0", peers).await.unwrap();

        let announcement = Announcement::for_record(&record("square"), &signature(), "node-a");
        let line = serde_json::to_string(&announcement).unwrap();

        // At-least-once transport: the same announcement arrives twice.
        for _ in 0..2 {
            let mut stream = TcpStream::connect(subscriber.local_addr()).await.unwrap();
            stream.write_all(line.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
            stream.shutdown().await.unwrap();
        }

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.name, "square");

        let second = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(second.is_err(), "duplicate must not be delivered");
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_kill_connection() {
        let peers = Arc::new(PeerBook::new());
        let (subscriber, mut rx) = Subscriber::bind("127.0.0.1:0", peers).await.unwrap();

        let announcement = Announcement::for_record(&record("square"), &signature(), "node-a");
        let line = serde_json::to_string(&announcement).unwrap();

        let mut stream = TcpStream::connect(subscriber.local_addr()).await.unwrap();
        stream.write_all(b"{not json}\n").await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        stream.shutdown().await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.name, "square");
    }
}
