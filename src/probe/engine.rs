//! The ping/pong measurement engine.
//!
//! One probe is outstanding at a time. Each cycle sends a sequenced ping,
//! waits up to the timeout for the matching pong, correlates the reply's
//! signal metrics and the current position fix into an immutable result,
//! appends it to the log, and brings the export documents up to date.
//! Pacing is measured from the send, not from the response, so the probe
//! cadence stays on-interval under variable RTT.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::export::ExportManager;
use crate::path::PathSession;
use crate::position::PositionProvider;
use crate::probe::wire::{Ping, Pong};
use crate::state::{MeasurementLog, ProbeResult, ProbeStatus, StatsAggregator};
use crate::transport::{SignalMetrics, Transport, TransportError};

/// Probe timing knobs.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Time between probe sends, measured send-to-send.
    pub ping_interval: Duration,
    /// Extra cooldown after a successful probe.
    pub ping_delay: Duration,
    /// How long to wait for the matching pong.
    pub ping_timeout: Duration,
    /// One-time settle delay before the very first probe.
    pub pre_first_ping_delay: Duration,
    /// Stop after this many probes (`None` = run until interrupted).
    pub count: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            ping_delay: Duration::ZERO,
            ping_timeout: Duration::from_secs(10),
            pre_first_ping_delay: Duration::from_secs(3),
            count: None,
        }
    }
}

enum PongWait {
    Matched {
        responded_at: DateTime<Utc>,
        rtt: Duration,
        signal: SignalMetrics,
    },
    TimedOut,
    Cancelled,
}

/// Drives the send/receive cycle against one base station.
pub struct ProbeEngine {
    transport: Arc<dyn Transport>,
    path: Arc<PathSession>,
    position: Arc<dyn PositionProvider>,
    log: Arc<MeasurementLog>,
    stats: Arc<StatsAggregator>,
    exports: ExportManager,
    config: ProbeConfig,
    /// Deadline for re-establishing after a mid-run path loss.
    reestablish_wait: Duration,
    cancel: CancellationToken,
}

impl ProbeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        path: Arc<PathSession>,
        position: Arc<dyn PositionProvider>,
        log: Arc<MeasurementLog>,
        stats: Arc<StatsAggregator>,
        exports: ExportManager,
        config: ProbeConfig,
        reestablish_wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            path,
            position,
            log,
            stats,
            exports,
            config,
            reestablish_wait,
            cancel,
        }
    }

    /// Run the probe loop until the count is reached or the run is
    /// interrupted. Always finishes with one full export pass.
    pub async fn run(mut self) -> Result<()> {
        if !self.config.pre_first_ping_delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.pre_first_ping_delay) => {}
            }
        }

        let mut sequence: u64 = 1;
        while !self.cancel.is_cancelled() {
            if let Some(count) = self.config.count {
                if sequence > count {
                    break;
                }
            }

            let ping = Ping {
                ping: sequence,
                from: self.transport.local_identity(),
            };
            let payload = ping.encode()?;
            match self
                .transport
                .send(self.path.destination(), &payload)
                .await
            {
                Ok(()) => {}
                Err(TransportError::NoPath(_)) => {
                    // Retryable: the mesh forgot us. Re-establish and retry
                    // the same sequence so the log stays gap-free.
                    self.path.mark_lost();
                    eprintln!("⚠ Path lost, re-establishing...");
                    if let Err(e) = self.path.establish(self.reestablish_wait).await {
                        eprintln!("✗ {}", e);
                    }
                    continue;
                }
                Err(e) => {
                    eprintln!("✗ Send failed: {}", e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.ping_interval) => {}
                    }
                    continue;
                }
            }
            let sent_instant = Instant::now();
            let sent_at = Utc::now();
            println!("→ Ping #{}", sequence);

            let (result, interrupted) = match self.await_pong(sequence, sent_instant).await {
                PongWait::Matched {
                    responded_at,
                    rtt,
                    signal,
                } => {
                    let position = self.position.current_fix().await;
                    (
                        ProbeResult::success(sequence, sent_at, responded_at, rtt, signal, position),
                        false,
                    )
                }
                PongWait::TimedOut => {
                    let position = self.position.current_fix().await;
                    (ProbeResult::timeout(sequence, sent_at, position), false)
                }
                // Interrupt finalizes the in-flight probe as a timeout.
                PongWait::Cancelled => {
                    let position = self.position.current_fix().await;
                    (ProbeResult::timeout(sequence, sent_at, position), true)
                }
            };

            let succeeded = result.status == ProbeStatus::Success;
            self.record(result.clone())?;
            self.report(&result);
            sequence += 1;

            if interrupted {
                break;
            }
            if succeeded && !self.config.ping_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.ping_delay) => {}
                }
            }
            if let Some(remaining) = self.config.ping_interval.checked_sub(sent_instant.elapsed())
            {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
        }

        // Final full export pass; shutdown must never leave the documents
        // behind the log.
        self.exports.sync(&self.log.snapshot());
        self.print_summary();
        Ok(())
    }

    /// Wait for the pong matching `sequence`. A pong carrying any other
    /// sequence belongs to an already finalized probe and is discarded;
    /// results are never rewritten.
    async fn await_pong(&self, sequence: u64, sent: Instant) -> PongWait {
        let deadline = tokio::time::sleep(self.config.ping_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return PongWait::Cancelled,
                _ = &mut deadline => return PongWait::TimedOut,
                dgram = self.transport.recv() => {
                    let Some(dgram) = dgram else {
                        return PongWait::Cancelled;
                    };
                    if let Some(pong) = Pong::decode(&dgram.payload) {
                        if pong.pong == sequence {
                            return PongWait::Matched {
                                responded_at: Utc::now(),
                                rtt: sent.elapsed(),
                                signal: dgram.signal,
                            };
                        }
                    }
                }
            }
        }
    }

    fn record(&mut self, result: ProbeResult) -> Result<()> {
        self.stats.record(&result);
        // A sequence violation here is a logic defect; let it take the run down.
        self.log.append(result)?;
        self.exports.sync(&self.log.snapshot());
        Ok(())
    }

    fn report(&self, result: &ProbeResult) {
        let stats = self.stats.snapshot();
        match result.status {
            ProbeStatus::Success => {
                let mut line = format!(
                    "✓ Pong #{} RTT:{:.0}ms",
                    result.sequence,
                    result.rtt_millis().unwrap_or(0.0)
                );
                if let Some(signal) = &result.signal {
                    if let Some(rssi) = signal.rssi_dbm {
                        line.push_str(&format!(" RSSI:{}dBm", rssi));
                    }
                    if let Some(snr) = signal.snr_db {
                        line.push_str(&format!(" SNR:{:.1}dB", snr));
                    }
                }
                match &result.position {
                    Some(fix) => {
                        line.push_str(&format!(" GPS:{:.6},{:.6}", fix.latitude, fix.longitude))
                    }
                    None => line.push_str(" (no GPS - not exported)"),
                }
                line.push_str(&format!(" [{}/{}]", stats.success, stats.sent));
                println!("{}", line);
            }
            ProbeStatus::Timeout => println!("✗ Timeout #{}", result.sequence),
        }
    }

    fn print_summary(&self) {
        let stats = self.stats.snapshot();
        println!("⏹ Done: {}/{} pongs received", stats.success, stats.sent);
        if let (Some(min), Some(mean), Some(max)) =
            (stats.rtt_ms.min(), stats.rtt_ms.mean(), stats.rtt_ms.max())
        {
            println!("  RTT min/avg/max: {:.0}/{:.0}/{:.0} ms", min, mean, max);
        }
        if let Some(mean_rssi) = stats.rssi_dbm.mean() {
            println!("  RSSI avg: {:.0} dBm", mean_rssi);
        }
    }
}
