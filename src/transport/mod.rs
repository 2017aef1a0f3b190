//! Transport seam.
//!
//! The measurement core treats the mesh as an opaque request/response-capable
//! messaging substrate: addressable destinations, announce-based path
//! discovery, unicast datagrams, and per-received-packet signal metadata.
//! Messages may be lost; latency is unbounded but typically well under tens
//! of seconds.

pub mod identity;
pub mod memory;
pub mod udp;

pub use identity::Identity;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Signal metadata the radio layer reported for a received datagram.
///
/// Both fields are independently optional: a transport may report neither,
/// either, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    /// Received signal strength in dBm.
    pub rssi_dbm: Option<i32>,
    /// Signal-to-noise ratio in dB.
    pub snr_db: Option<f64>,
}

impl SignalMetrics {
    pub fn is_empty(&self) -> bool {
        self.rssi_dbm.is_none() && self.snr_db.is_none()
    }
}

/// A received datagram plus whatever the transport knew about it.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub signal: SignalMetrics,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// No discoverable route to the destination. Retryable: the caller is
    /// expected to re-establish the path rather than give up.
    #[error("no known path to {0}")]
    NoPath(Identity),
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The messaging substrate a node runs on.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's addressable identity.
    fn local_identity(&self) -> Identity;

    /// Broadcast a presence announce so forwarding nodes can learn or
    /// refresh a route back to us. `app_data` carries the display name.
    async fn announce(&self, app_data: &[u8]);

    /// Discover a usable route to `destination`, waiting up to `timeout`.
    /// Returns whether the path is usable.
    async fn establish_path(&self, destination: Identity, timeout: Duration) -> bool;

    /// Send one unicast datagram.
    async fn send(&self, destination: Identity, payload: &[u8]) -> Result<(), TransportError>;

    /// Next received datagram, or `None` once the transport shuts down.
    async fn recv(&self) -> Option<Datagram>;
}
