//! Path establishment and liveness for one destination.
//!
//! In a mesh with forwarding nodes the return path decays unless the node
//! keeps announcing, so a background timer announces on a fixed interval
//! regardless of probe activity.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::{Identity, Transport};

/// Where path discovery stands for the session's destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Unknown,
    Establishing,
    Established,
    Lost,
}

/// Establishment deadline exceeded. Fatal before probing starts, retryable
/// once a path has been up and dropped.
#[derive(Debug, Error)]
#[error("no path to {destination} within {waited:?}")]
pub struct PathUnavailable {
    pub destination: Identity,
    pub waited: Duration,
}

/// Owns path state for one destination.
pub struct PathSession {
    transport: Arc<dyn Transport>,
    destination: Identity,
    state: RwLock<PathState>,
}

impl PathSession {
    pub fn new(transport: Arc<dyn Transport>, destination: Identity) -> Self {
        Self {
            transport,
            destination,
            state: RwLock::new(PathState::Unknown),
        }
    }

    pub fn destination(&self) -> Identity {
        self.destination
    }

    pub fn state(&self) -> PathState {
        *self.state.read()
    }

    pub fn is_established(&self) -> bool {
        self.state() == PathState::Established
    }

    /// Resolve a usable route, waiting up to `timeout`.
    pub async fn establish(&self, timeout: Duration) -> Result<(), PathUnavailable> {
        *self.state.write() = PathState::Establishing;
        if self.transport.establish_path(self.destination, timeout).await {
            *self.state.write() = PathState::Established;
            Ok(())
        } else {
            *self.state.write() = PathState::Lost;
            Err(PathUnavailable {
                destination: self.destination,
                waited: timeout,
            })
        }
    }

    /// Downgrade after the transport reported no path on a send attempt.
    pub fn mark_lost(&self) {
        *self.state.write() = PathState::Lost;
    }
}

/// Announce presence immediately and then every `interval` until cancelled.
pub fn spawn_announcer(
    transport: Arc<dyn Transport>,
    display_name: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    transport.announce(display_name.as_bytes()).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryHub;
    use crate::transport::SignalMetrics;

    #[tokio::test]
    async fn test_establish_against_known_destination() {
        let hub = MemoryHub::new(Duration::ZERO, SignalMetrics::default());
        let client = Arc::new(hub.register(Identity::generate()));
        let server = hub.register(Identity::generate());

        let session = PathSession::new(client, server.local_identity());
        assert_eq!(session.state(), PathState::Unknown);

        session.establish(Duration::from_millis(200)).await.unwrap();
        assert!(session.is_established());
    }

    #[tokio::test]
    async fn test_establish_deadline_reports_unavailable() {
        let hub = MemoryHub::new(Duration::ZERO, SignalMetrics::default());
        let client = Arc::new(hub.register(Identity::generate()));
        let nowhere = Identity::generate();

        let session = PathSession::new(client, nowhere);
        let err = session.establish(Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.destination, nowhere);
        assert_eq!(session.state(), PathState::Lost);
    }

    #[tokio::test]
    async fn test_mark_lost_is_retryable() {
        let hub = MemoryHub::new(Duration::ZERO, SignalMetrics::default());
        let client = Arc::new(hub.register(Identity::generate()));
        let server = hub.register(Identity::generate());

        let session = PathSession::new(client, server.local_identity());
        session.establish(Duration::from_millis(200)).await.unwrap();
        session.mark_lost();
        assert_eq!(session.state(), PathState::Lost);
        session.establish(Duration::from_millis(200)).await.unwrap();
        assert!(session.is_established());
    }
}
