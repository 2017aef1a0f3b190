//! The append-only measurement log.
//!
//! Results arrive strictly in ascending sequence order from a single
//! producer and are never mutated or removed after append. Export and
//! display code only ever sees read snapshots.

use chrono::{DateTime, Utc};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::position::PositionFix;
use crate::transport::SignalMetrics;

/// Terminal outcome of one probe. Never revised after assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Success,
    Timeout,
}

/// One immutable record of a single ping/pong attempt and its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Assigned by the client, gap-free from 1.
    pub sequence: u64,
    pub sent_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(rename = "rtt_ms", with = "opt_duration_ms")]
    pub rtt: Option<Duration>,
    pub status: ProbeStatus,
    /// Present only on success; read from the pong's received-datagram event.
    pub signal: Option<SignalMetrics>,
    pub position: Option<PositionFix>,
}

impl ProbeResult {
    pub fn success(
        sequence: u64,
        sent_at: DateTime<Utc>,
        responded_at: DateTime<Utc>,
        rtt: Duration,
        signal: SignalMetrics,
        position: Option<PositionFix>,
    ) -> Self {
        Self {
            sequence,
            sent_at,
            responded_at: Some(responded_at),
            rtt: Some(rtt),
            status: ProbeStatus::Success,
            signal: Some(signal),
            position,
        }
    }

    /// A timed-out probe carries no response timestamp, RTT, or signal.
    /// A position fix is still attached when one was available.
    pub fn timeout(sequence: u64, sent_at: DateTime<Utc>, position: Option<PositionFix>) -> Self {
        Self {
            sequence,
            sent_at,
            responded_at: None,
            rtt: None,
            status: ProbeStatus::Timeout,
            signal: None,
            position,
        }
    }

    pub fn rtt_millis(&self) -> Option<f64> {
        self.rtt.map(|rtt| rtt.as_secs_f64() * 1000.0)
    }

    /// Timestamp shown for this entry: response time when there was one.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.responded_at.unwrap_or(self.sent_at)
    }
}

/// Appends must arrive in gap-free ascending sequence order starting at 1.
/// This firing means a producer bug, not a network condition, and is fatal.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("out-of-order measurement append: expected sequence {expected}, got {got}")]
pub struct SequenceOrderError {
    pub expected: u64,
    pub got: u64,
}

struct RawLog {
    writer: BufWriter<File>,
}

impl RawLog {
    fn write_line(&mut self, result: &ProbeResult) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        // One line per probe, flushed so a crash loses nothing.
        self.writer.flush()
    }
}

/// Ordered sequence of probe results. Single writer, many readers.
pub struct MeasurementLog {
    results: RwLock<Vec<ProbeResult>>,
    raw: Mutex<Option<RawLog>>,
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self {
            results: RwLock::new(Vec::new()),
            raw: Mutex::new(None),
        }
    }

    /// A log that mirrors every append as one JSON line to `path`.
    pub fn with_raw_log(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            results: RwLock::new(Vec::new()),
            raw: Mutex::new(Some(RawLog {
                writer: BufWriter::new(file),
            })),
        })
    }

    pub fn append(&self, result: ProbeResult) -> Result<(), SequenceOrderError> {
        let mut results = self.results.write();
        let expected = results.last().map_or(1, |last| last.sequence + 1);
        if result.sequence != expected {
            return Err(SequenceOrderError {
                expected,
                got: result.sequence,
            });
        }
        self.write_raw(&result);
        results.push(result);
        Ok(())
    }

    /// Immutable view of all results so far. Cheap to obtain; holds a read
    /// lock, so drop it before the next append from the same task.
    pub fn snapshot(&self) -> MappedRwLockReadGuard<'_, [ProbeResult]> {
        RwLockReadGuard::map(self.results.read(), |results| results.as_slice())
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_raw(&self, result: &ProbeResult) {
        let mut slot = self.raw.lock();
        if let Some(raw) = slot.as_mut() {
            if let Err(e) = raw.write_line(result) {
                // Reported once; measurement continues without the raw log.
                eprintln!("⚠ raw log write failed, disabling raw log: {}", e);
                *slot = None;
            }
        }
    }
}

impl Default for MeasurementLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Serde helper: optional RTT as fractional milliseconds.
mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(rtt: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        rtt.map(|d| d.as_secs_f64() * 1000.0).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<f64>::deserialize(deserializer)?;
        Ok(millis.map(|ms| Duration::from_secs_f64(ms / 1000.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionFix;

    fn success(sequence: u64) -> ProbeResult {
        let now = Utc::now();
        ProbeResult::success(
            sequence,
            now,
            now,
            Duration::from_millis(250),
            SignalMetrics::default(),
            Some(PositionFix::at(45.0, -122.0)),
        )
    }

    #[test]
    fn test_appends_form_gap_free_run_from_one() {
        let log = MeasurementLog::new();
        for sequence in 1..=5 {
            log.append(success(sequence)).unwrap();
        }
        let snapshot = log.snapshot();
        let sequences: Vec<u64> = snapshot.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_first_append_must_be_sequence_one() {
        let log = MeasurementLog::new();
        let err = log.append(success(2)).unwrap_err();
        assert_eq!(err, SequenceOrderError { expected: 1, got: 2 });
    }

    #[test]
    fn test_gap_and_duplicate_are_rejected() {
        let log = MeasurementLog::new();
        log.append(success(1)).unwrap();
        assert!(log.append(success(3)).is_err());
        assert!(log.append(success(1)).is_err());
        // The failed appends left the log untouched.
        assert_eq!(log.len(), 1);
        log.append(success(2)).unwrap();
    }

    #[test]
    fn test_timeout_result_has_no_response_fields() {
        let result = ProbeResult::timeout(7, Utc::now(), None);
        assert_eq!(result.status, ProbeStatus::Timeout);
        assert!(result.responded_at.is_none());
        assert!(result.rtt.is_none());
        assert!(result.rtt_millis().is_none());
        assert!(result.signal.is_none());
    }

    #[test]
    fn test_result_serializes_rtt_as_millis() {
        let result = success(1);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rtt_ms"].as_f64().unwrap(), 250.0);
        assert_eq!(json["status"], "Success");

        let back: ProbeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_raw_log_mirrors_appends_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("range_test.json");
        let log = MeasurementLog::with_raw_log(&path).unwrap();
        log.append(success(1)).unwrap();
        log.append(ProbeResult::timeout(2, Utc::now(), None)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["sequence"], 1);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "Timeout");
        assert!(second["rtt_ms"].is_null());
    }
}
