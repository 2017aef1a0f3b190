//! Flat JSON array export, one object per exported probe.

use anyhow::Result;
use chrono::SecondsFormat;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{atomic_replace, ExportFormat, ExportWriter};
use crate::state::{ProbeResult, ProbeStatus};

pub struct JsonWriter {
    path: PathBuf,
}

impl JsonWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ExportFormat::Json.file_name()),
        }
    }
}

#[derive(Serialize)]
struct Entry {
    ping: u64,
    status: ProbeStatus,
    rtt_ms: Option<f64>,
    sent_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    responded_at: Option<String>,
    timestamp: String,
    latitude: f64,
    longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bearing: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi_dbm: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snr_db: Option<f64>,
}

impl Entry {
    fn from_result(result: &ProbeResult) -> Option<Self> {
        let fix = result.position.as_ref()?;
        Some(Self {
            ping: result.sequence,
            status: result.status,
            rtt_ms: result.rtt_millis(),
            sent_at: result.sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            responded_at: result
                .responded_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            timestamp: result
                .timestamp()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
            bearing: fix.bearing,
            rssi_dbm: result.signal.as_ref().and_then(|s| s.rssi_dbm),
            snr_db: result.signal.as_ref().and_then(|s| s.snr_db),
        })
    }
}

impl ExportWriter for JsonWriter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn write(&mut self, entries: &[&ProbeResult]) -> Result<()> {
        let objects: Vec<Entry> = entries
            .iter()
            .filter_map(|entry| Entry::from_result(entry))
            .collect();
        let doc = serde_json::to_string_pretty(&objects)?;
        atomic_replace(&self.path, doc.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_fixture::fixture;

    #[test]
    fn test_document_holds_all_exported_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonWriter::new(dir.path());
        let results = fixture();
        let entries: Vec<&ProbeResult> =
            results.iter().filter(|r| r.position.is_some()).collect();
        writer.write(&entries).unwrap();

        let text = std::fs::read_to_string(dir.path().join("range_test.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array[0]["ping"], 1);
        assert_eq!(array[0]["status"], "Success");
        assert_eq!(array[0]["rtt_ms"], 234.0);
        assert_eq!(array[0]["sent_at"], "2025-06-01T12:00:00.000Z");
        assert_eq!(array[0]["responded_at"], "2025-06-01T12:00:00.234Z");
        assert_eq!(array[0]["latitude"], 45.123456);
        assert_eq!(array[0]["rssi_dbm"], -95);
        // The second success carried no signal readings.
        assert!(array[1].get("rssi_dbm").is_none());
        assert_eq!(array[2]["ping"], 4);
    }

    #[test]
    fn test_geo_tagged_timeout_keeps_status_and_null_rtt() {
        use crate::position::PositionFix;
        use chrono::{TimeZone, Utc};

        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonWriter::new(dir.path());
        let sent = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap();
        let result = ProbeResult::timeout(5, sent, Some(PositionFix::at(45.1, -122.6)));
        writer.write(&[&result]).unwrap();

        let text = std::fs::read_to_string(dir.path().join("range_test.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let entry = &parsed.as_array().unwrap()[0];
        assert_eq!(entry["status"], "Timeout");
        assert!(entry["rtt_ms"].is_null());
        assert_eq!(entry["sent_at"], "2025-06-01T12:00:30.000Z");
        assert!(entry.get("responded_at").is_none());
        // With no response, the display timestamp falls back to the send.
        assert_eq!(entry["timestamp"], entry["sent_at"]);
    }

    #[test]
    fn test_empty_log_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonWriter::new(dir.path());
        writer.write(&[]).unwrap();

        let text = std::fs::read_to_string(dir.path().join("range_test.json")).unwrap();
        assert_eq!(text.trim(), "[]");
    }
}
