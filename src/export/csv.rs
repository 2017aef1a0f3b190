//! Tabular export.
//!
//! One row per exported probe. This is the only format that can grow
//! in place: when the file on disk already reflects the cursor, new rows
//! are appended; otherwise the whole document is rewritten atomically.

use anyhow::Result;
use chrono::SecondsFormat;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{atomic_replace, opt_cell, ExportFormat, ExportWriter};
use crate::state::ProbeResult;

const HEADER: &str =
    "Ping,RTT_ms,Timestamp,Latitude,Longitude,Altitude,Accuracy,Speed,Bearing,RSSI_dBm,SNR_dB";

pub struct CsvWriter {
    path: PathBuf,
    /// Rows the on-disk file holds, excluding the header.
    rows: usize,
}

impl CsvWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ExportFormat::Csv.file_name()),
            rows: 0,
        }
    }
}

impl ExportWriter for CsvWriter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn write(&mut self, entries: &[&ProbeResult]) -> Result<()> {
        if self.rows > 0 && self.rows <= entries.len() && self.path.is_file() {
            let mut file = OpenOptions::new().append(true).open(&self.path)?;
            for entry in &entries[self.rows..] {
                writeln!(file, "{}", render_row(entry))?;
            }
            file.flush()?;
        } else {
            let mut doc = String::with_capacity(64 * (entries.len() + 1));
            doc.push_str(HEADER);
            doc.push('\n');
            for entry in entries {
                doc.push_str(&render_row(entry));
                doc.push('\n');
            }
            atomic_replace(&self.path, doc.as_bytes())?;
        }
        self.rows = entries.len();
        Ok(())
    }
}

/// Deterministic row rendering, shared by the append and rewrite paths so
/// both produce byte-identical documents.
fn render_row(entry: &ProbeResult) -> String {
    // Exported entries always carry a fix; the filter upstream guarantees it.
    let (lat, lon, alt, accuracy, speed, bearing) = match &entry.position {
        Some(fix) => (
            fix.latitude.to_string(),
            fix.longitude.to_string(),
            opt_cell(fix.altitude),
            opt_cell(fix.accuracy),
            opt_cell(fix.speed),
            opt_cell(fix.bearing),
        ),
        None => Default::default(),
    };
    let rtt = entry
        .rtt_millis()
        .map(|ms| format!("{:.1}", ms))
        .unwrap_or_default();
    let rssi = opt_cell(entry.signal.as_ref().and_then(|s| s.rssi_dbm));
    let snr = opt_cell(entry.signal.as_ref().and_then(|s| s.snr_db));

    format!(
        "{},{},{},{},{},{},{},{},{},{},{}",
        entry.sequence,
        rtt,
        entry
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        lat,
        lon,
        alt,
        accuracy,
        speed,
        bearing,
        rssi,
        snr,
    )
}
