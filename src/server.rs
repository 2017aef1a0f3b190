//! The fixed half of a range test: answer every ping with a matching pong.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::probe::{Ping, Pong};
use crate::transport::{Identity, Transport, TransportError};

/// Receive loop that answers pings for as long as it runs.
///
/// Reply paths are established once per client and cached; a later send
/// failure evicts the entry so the next ping re-establishes.
pub struct ServerResponder {
    transport: Arc<dyn Transport>,
    /// Clients with an established reply path.
    clients: HashSet<Identity>,
    reply_path_wait: Duration,
    log: Option<BufWriter<File>>,
    answered: u64,
}

impl ServerResponder {
    pub fn new(transport: Arc<dyn Transport>, reply_path_wait: Duration) -> Self {
        Self {
            transport,
            clients: HashSet::new(),
            reply_path_wait,
            log: None,
            answered: 0,
        }
    }

    /// Append one JSON line per answered ping to `path`.
    pub fn with_log_file(mut self, path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.log = Some(BufWriter::new(file));
        Ok(self)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        println!(
            "Range test server {} listening, ctrl-c to stop",
            self.transport.local_identity().short()
        );
        loop {
            let datagram = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.transport.recv() => match received {
                    Some(datagram) => datagram,
                    None => break,
                },
            };
            let ping = match Ping::decode(&datagram.payload) {
                Some(ping) => ping,
                None => continue,
            };
            self.answer(ping).await;
        }
        println!(
            "Server stopping, answered {} pings from {} clients",
            self.answered,
            self.clients.len()
        );
    }

    async fn answer(&mut self, ping: Ping) {
        let from = ping.from;
        if !self.clients.contains(&from) {
            println!("• New client {}", from.short());
            if !self
                .transport
                .establish_path(from, self.reply_path_wait)
                .await
            {
                eprintln!("✗ No reply path to {}, dropping ping", from.short());
                return;
            }
            self.clients.insert(from);
        }

        let payload = match (Pong { pong: ping.ping }).encode() {
            Ok(payload) => payload,
            Err(e) => {
                eprintln!("✗ Failed to encode pong: {}", e);
                return;
            }
        };
        match self.transport.send(from, &payload).await {
            Ok(()) => {
                self.answered += 1;
                println!("← Ping #{} from {}", ping.ping, from.short());
                self.log_ping(&ping);
            }
            Err(TransportError::NoPath(_)) => {
                // Path went away. Forget the client so the next ping
                // re-establishes before we reply.
                eprintln!("✗ Lost reply path to {}", from.short());
                self.clients.remove(&from);
            }
            Err(e) => eprintln!("✗ Failed to send pong to {}: {}", from.short(), e),
        }
    }

    fn log_ping(&mut self, ping: &Ping) {
        if let Some(log) = self.log.as_mut() {
            let line = json!({
                "ping": ping.ping,
                "from": ping.from.to_hex(),
                "time": Utc::now().to_rfc3339(),
            });
            if writeln!(log, "{}", line).and_then(|_| log.flush()).is_err() {
                eprintln!("✗ Server log write failed, disabling log");
                self.log = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryHub;
    use crate::transport::SignalMetrics;

    #[tokio::test]
    async fn test_answers_pings_with_matching_pong() {
        let hub = MemoryHub::new(Duration::ZERO, SignalMetrics::default());
        let server_transport = hub.register(Identity::generate());
        let client = hub.register(Identity::generate());
        let server_id = server_transport.local_identity();
        let client_id = client.local_identity();

        let cancel = CancellationToken::new();
        let responder =
            ServerResponder::new(Arc::new(server_transport), Duration::from_millis(100));
        let server = tokio::spawn(responder.run(cancel.clone()));

        for n in 1..=3u64 {
            let ping = Ping {
                ping: n,
                from: client_id,
            };
            client.send(server_id, &ping.encode().unwrap()).await.unwrap();
            let reply = client.recv().await.unwrap();
            let pong = Pong::decode(&reply.payload).unwrap();
            assert_eq!(pong.pong, n);
        }

        cancel.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_payloads_are_ignored() {
        let hub = MemoryHub::new(Duration::ZERO, SignalMetrics::default());
        let server_transport = hub.register(Identity::generate());
        let client = hub.register(Identity::generate());
        let server_id = server_transport.local_identity();
        let client_id = client.local_identity();

        let cancel = CancellationToken::new();
        let responder =
            ServerResponder::new(Arc::new(server_transport), Duration::from_millis(100));
        let server = tokio::spawn(responder.run(cancel.clone()));

        client.send(server_id, b"not json").await.unwrap();
        let ping = Ping {
            ping: 1,
            from: client_id,
        };
        client.send(server_id, &ping.encode().unwrap()).await.unwrap();

        // Only the valid ping draws a reply.
        let reply = client.recv().await.unwrap();
        assert_eq!(Pong::decode(&reply.payload).unwrap().pong, 1);

        cancel.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_log_file_records_answered_pings() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("rt_server_log");
        let hub = MemoryHub::new(Duration::ZERO, SignalMetrics::default());
        let server_transport = hub.register(Identity::generate());
        let client = hub.register(Identity::generate());
        let server_id = server_transport.local_identity();
        let client_id = client.local_identity();

        let cancel = CancellationToken::new();
        let responder =
            ServerResponder::new(Arc::new(server_transport), Duration::from_millis(100))
                .with_log_file(&log_path)
                .unwrap();
        let server = tokio::spawn(responder.run(cancel.clone()));

        let ping = Ping {
            ping: 7,
            from: client_id,
        };
        client.send(server_id, &ping.encode().unwrap()).await.unwrap();
        client.recv().await.unwrap();

        cancel.cancel();
        server.await.unwrap();

        let text = std::fs::read_to_string(&log_path).unwrap();
        let line: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(line["ping"], 7);
        assert_eq!(line["from"], client_id.to_hex());
    }
}
