//! UDP adapter.
//!
//! A thin stand-in for a radio mesh so the harness can be bench-tested over
//! a LAN. Announce frames teach receivers the sender's identity-to-address
//! mapping; data frames carry opaque payload bytes. UDP reports no signal
//! metadata, so received datagrams carry none.
//!
//! Frame layout: 1 type byte, 16 identity bytes, payload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::identity::IDENTITY_LEN;
use super::{Datagram, Identity, SignalMetrics, Transport, TransportError};

const FRAME_ANNOUNCE: u8 = 0x01;
const FRAME_DATA: u8 = 0x02;
const HEADER_LEN: usize = 1 + IDENTITY_LEN;
const MAX_FRAME: usize = 1500;
const CHANNEL_CAPACITY: usize = 64;
const PATH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Identity-addressed messaging over UDP unicast.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    identity: Identity,
    peers: Arc<RwLock<HashMap<Identity, SocketAddr>>>,
    /// Static addresses we announce to even before hearing from anyone.
    gateways: Vec<SocketAddr>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Datagram>>,
    recv_task: tokio::task::JoinHandle<()>,
}

impl UdpTransport {
    pub async fn bind(
        identity: Identity,
        listen: SocketAddr,
        gateways: Vec<SocketAddr>,
    ) -> Result<Self> {
        let socket = Arc::new(
            UdpSocket::bind(listen)
                .await
                .with_context(|| format!("failed to bind UDP socket on {}", listen))?,
        );
        let peers = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let recv_task = tokio::spawn(recv_loop(
            Arc::clone(&socket),
            identity,
            Arc::clone(&peers),
            tx,
        ));

        Ok(Self {
            socket,
            identity,
            peers,
            gateways,
            rx: tokio::sync::Mutex::new(rx),
            recv_task,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn frame(&self, frame_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(frame_type);
        buf.extend_from_slice(self.identity.as_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn announce_targets(&self) -> Vec<SocketAddr> {
        let mut targets = self.gateways.clone();
        targets.extend(self.peers.read().values().copied());
        targets.sort();
        targets.dedup();
        targets
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_identity(&self) -> Identity {
        self.identity
    }

    async fn announce(&self, app_data: &[u8]) {
        let frame = self.frame(FRAME_ANNOUNCE, app_data);
        for addr in self.announce_targets() {
            // Best effort, like radio broadcast.
            let _ = self.socket.send_to(&frame, addr).await;
        }
    }

    async fn establish_path(&self, destination: Identity, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.peers.read().contains_key(&destination) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            // Re-announce so the destination learns our address and answers.
            self.announce(&[]).await;
            tokio::time::sleep(PATH_POLL_INTERVAL).await;
        }
    }

    async fn send(&self, destination: Identity, payload: &[u8]) -> Result<(), TransportError> {
        let addr = self
            .peers
            .read()
            .get(&destination)
            .copied()
            .ok_or(TransportError::NoPath(destination))?;
        let frame = self.frame(FRAME_DATA, payload);
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    async fn recv(&self) -> Option<Datagram> {
        self.rx.lock().await.recv().await
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    local: Identity,
    peers: Arc<RwLock<HashMap<Identity, SocketAddr>>>,
    tx: mpsc::Sender<Datagram>,
) {
    let mut buf = [0u8; MAX_FRAME];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                eprintln!("⚠ UDP receive error: {}", e);
                continue;
            }
        };
        if len < HEADER_LEN {
            continue;
        }
        let mut sender_bytes = [0u8; IDENTITY_LEN];
        sender_bytes.copy_from_slice(&buf[1..HEADER_LEN]);
        let sender = Identity::from_bytes(sender_bytes);
        if sender == local {
            continue;
        }

        match buf[0] {
            FRAME_ANNOUNCE => {
                let first_contact = peers.write().insert(sender, addr).is_none();
                if first_contact {
                    // Answer with our own announce so the path works both ways.
                    let mut reply = Vec::with_capacity(HEADER_LEN);
                    reply.push(FRAME_ANNOUNCE);
                    reply.extend_from_slice(local.as_bytes());
                    let _ = socket.send_to(&reply, addr).await;
                }
            }
            FRAME_DATA => {
                // Data frames refresh the mapping too; mobile nodes change addresses.
                peers.write().insert(sender, addr);
                let dgram = Datagram {
                    payload: buf[HEADER_LEN..len].to_vec(),
                    signal: SignalMetrics::default(),
                };
                if tx.send(dgram).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_pair() -> (UdpTransport, UdpTransport) {
        let a_id = Identity::generate();
        let b_id = Identity::generate();
        let a = UdpTransport::bind(a_id, "127.0.0.1:0".parse().unwrap(), Vec::new())
            .await
            .unwrap();
        let a_addr = a.local_addr().unwrap();
        let b = UdpTransport::bind(b_id, "127.0.0.1:0".parse().unwrap(), vec![a_addr])
            .await
            .unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_announce_then_send() {
        let (a, b) = bind_pair().await;

        // b announces toward its gateway (a); both sides learn the mapping.
        assert!(
            b.establish_path(a.local_identity(), Duration::from_secs(2))
                .await
        );
        b.send(a.local_identity(), b"ping").await.unwrap();
        let dgram = a.recv().await.unwrap();
        assert_eq!(dgram.payload, b"ping");
        assert!(dgram.signal.is_empty());

        // The data frame taught a the reverse mapping.
        a.send(b.local_identity(), b"pong").await.unwrap();
        let dgram = b.recv().await.unwrap();
        assert_eq!(dgram.payload, b"pong");
    }

    #[tokio::test]
    async fn test_send_without_path_fails() {
        let a = UdpTransport::bind(
            Identity::generate(),
            "127.0.0.1:0".parse().unwrap(),
            Vec::new(),
        )
        .await
        .unwrap();
        let err = a.send(Identity::generate(), b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NoPath(_)));
    }
}
