//! Running statistics over the measurement series.
//!
//! Updated incrementally on each append, never recomputed from scratch.

use parking_lot::RwLock;
use serde::Serialize;

use super::log::{ProbeResult, ProbeStatus};

/// Online min/max/mean without retaining samples.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunningStats {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
}

impl RunningStats {
    pub fn record(&mut self, sample: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = sample;
            self.max = sample;
            self.mean = sample;
            return;
        }
        if sample < self.min {
            self.min = sample;
        }
        if sample > self.max {
            self.max = sample;
        }
        self.mean += (sample - self.mean) / self.count as f64;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }
}

/// Read-only view of the aggregate state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub success: u64,
    pub timeouts: u64,
    /// RTT in milliseconds over successful probes.
    pub rtt_ms: RunningStats,
    /// Signal strength over probes where the transport reported it.
    pub rssi_dbm: RunningStats,
    pub snr_db: RunningStats,
}

impl StatsSnapshot {
    pub fn success_rate_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.success as f64 / self.sent as f64 * 100.0
        }
    }
}

/// Incrementally maintained aggregate, one writer and many readers.
pub struct StatsAggregator {
    inner: RwLock<StatsSnapshot>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StatsSnapshot::default()),
        }
    }

    pub fn record(&self, result: &ProbeResult) {
        let mut stats = self.inner.write();
        stats.sent += 1;
        match result.status {
            ProbeStatus::Success => stats.success += 1,
            ProbeStatus::Timeout => stats.timeouts += 1,
        }
        if let Some(rtt_ms) = result.rtt_millis() {
            stats.rtt_ms.record(rtt_ms);
        }
        if let Some(signal) = &result.signal {
            if let Some(rssi) = signal.rssi_dbm {
                stats.rssi_dbm.record(rssi as f64);
            }
            if let Some(snr) = signal.snr_db {
                stats.snr_db.record(snr);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.read()
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SignalMetrics;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_running_stats_min_max_mean() {
        let mut stats = RunningStats::default();
        assert!(stats.mean().is_none());

        stats.record(10.0);
        stats.record(20.0);
        stats.record(30.0);

        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min(), Some(10.0));
        assert_eq!(stats.max(), Some(30.0));
        assert!((stats.mean().unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregator_splits_success_and_timeout() {
        let aggregator = StatsAggregator::new();
        let now = Utc::now();

        aggregator.record(&ProbeResult::success(
            1,
            now,
            now,
            Duration::from_millis(234),
            SignalMetrics {
                rssi_dbm: Some(-95),
                snr_db: Some(8.5),
            },
            None,
        ));
        aggregator.record(&ProbeResult::timeout(2, now, None));
        aggregator.record(&ProbeResult::success(
            3,
            now,
            now,
            Duration::from_millis(456),
            SignalMetrics::default(),
            None,
        ));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.success, 2);
        assert_eq!(snapshot.timeouts, 1);
        // Timeouts contribute no RTT sample.
        assert_eq!(snapshot.rtt_ms.count(), 2);
        assert_eq!(snapshot.rtt_ms.min(), Some(234.0));
        assert_eq!(snapshot.rtt_ms.max(), Some(456.0));
        // Signal stats only cover probes where the radio reported them.
        assert_eq!(snapshot.rssi_dbm.count(), 1);
        assert_eq!(snapshot.snr_db.mean(), Some(8.5));
    }

    #[test]
    fn test_success_rate() {
        let aggregator = StatsAggregator::new();
        let now = Utc::now();
        assert_eq!(aggregator.snapshot().success_rate_pct(), 0.0);

        aggregator.record(&ProbeResult::timeout(1, now, None));
        aggregator.record(&ProbeResult::success(
            2,
            now,
            now,
            Duration::from_millis(100),
            SignalMetrics::default(),
            None,
        ));
        assert!((aggregator.snapshot().success_rate_pct() - 50.0).abs() < 1e-9);
    }
}
