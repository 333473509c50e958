use crate::peers::PeerBook;
use crate::wire::Announcement;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Fire-and-forget push of announcements to every known peer. Each peer
/// gets its own detached task with its own timeout; a dead peer never
/// blocks the others or the local registration that triggered the send.
pub struct Broadcaster {
    peers: Arc<PeerBook>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(peers: Arc<PeerBook>, send_timeout: Duration) -> Self {
        Self {
            peers,
            send_timeout,
        }
    }

    pub async fn announce(&self, announcement: &Announcement) {
        let line = match serde_json::to_string(announcement) {
            Ok(line) => line,
            Err(e) => {
                warn!("Cannot encode announcement for {}: {}", announcement.name, e);
                return;
            }
        };

        for address in self.peers.addresses().await {
            let line = line.clone();
            let name = announcement.name.clone();
            let send_timeout = self.send_timeout;

            tokio::spawn(async move {
                match timeout(send_timeout, send_line(&address, &line)).await {
                    Ok(Ok(())) => debug!("Announced {} to {}", name, address),
                    Ok(Err(e)) => warn!("Failed to announce {} to {}: {}", name, address, e),
                    Err(_) => warn!("Timed out announcing {} to {}", name, address),
                }
            });
        }
    }
}

async fn send_line(address: &str, line: &str) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(address).await?;
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;
    Ok(())
}
