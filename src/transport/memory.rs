//! In-process transport for tests and the selftest mode.
//!
//! A hub routes datagrams between registered nodes with a configurable
//! one-way delivery delay and injectable signal metrics. Individual nodes
//! can be partitioned to simulate moving out of radio range: sends still
//! succeed (the radio has no delivery feedback) but nothing arrives.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Datagram, Identity, SignalMetrics, Transport, TransportError};

const CHANNEL_CAPACITY: usize = 64;
const PATH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared routing table for a set of in-process nodes.
pub struct MemoryHub {
    nodes: Mutex<HashMap<Identity, mpsc::Sender<Datagram>>>,
    partitioned: Mutex<HashSet<Identity>>,
    latency: Duration,
    signal: SignalMetrics,
}

impl MemoryHub {
    pub fn new(latency: Duration, signal: SignalMetrics) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            partitioned: Mutex::new(HashSet::new()),
            latency,
            signal,
        })
    }

    /// Register a node and hand back its transport endpoint.
    pub fn register(self: &Arc<Self>, identity: Identity) -> MemoryTransport {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.nodes.lock().insert(identity, tx);
        MemoryTransport {
            hub: Arc::clone(self),
            identity,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Drop all datagrams destined for `identity` until healed.
    pub fn partition(&self, identity: Identity) {
        self.partitioned.lock().insert(identity);
    }

    pub fn heal(&self, identity: Identity) {
        self.partitioned.lock().remove(&identity);
    }

    fn is_registered(&self, identity: Identity) -> bool {
        self.nodes.lock().contains_key(&identity)
    }

    fn deliver(self: &Arc<Self>, to: Identity, payload: Vec<u8>) {
        if self.partitioned.lock().contains(&to) {
            return;
        }
        let Some(tx) = self.nodes.lock().get(&to).cloned() else {
            return;
        };
        let latency = self.latency;
        let signal = self.signal;
        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let _ = tx.send(Datagram { payload, signal }).await;
        });
    }
}

/// One node's endpoint on a [`MemoryHub`].
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    identity: Identity,
    rx: tokio::sync::Mutex<mpsc::Receiver<Datagram>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_identity(&self) -> Identity {
        self.identity
    }

    async fn announce(&self, _app_data: &[u8]) {
        // Registered nodes are already discoverable on the hub.
    }

    async fn establish_path(&self, destination: Identity, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.hub.is_registered(destination) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(PATH_POLL_INTERVAL).await;
        }
    }

    async fn send(&self, destination: Identity, payload: &[u8]) -> Result<(), TransportError> {
        if !self.hub.is_registered(destination) {
            return Err(TransportError::NoPath(destination));
        }
        self.hub.deliver(destination, payload.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Option<Datagram> {
        self.rx.lock().await.recv().await
    }
}
