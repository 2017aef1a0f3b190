//! Incremental multi-format export of the measurement log.
//!
//! After every new geo-tagged sample each enabled writer brings its output
//! file up to date with the entire history, so a human can open any of the
//! documents mid-test. Whole-document formats are regenerated in memory and
//! swapped in with an atomic rename; the tabular format appends rows when
//! the file already reflects its cursor. Results without a position fix are
//! logged but never exported: a geospatial document has no meaningful entry
//! without coordinates.

pub mod csv;
pub mod geojson;
pub mod html;
pub mod json;
pub mod kml;

use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::state::ProbeResult;

/// Severity tier derived from RTT, used for marker coloring everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTier {
    Good,
    Ok,
    Poor,
}

impl SignalTier {
    /// Under 500 ms is good; 500 through 2000 ms inclusive is ok; above is
    /// poor. Entries without an RTT (timeouts) rank poor.
    pub fn from_rtt_ms(rtt_ms: Option<f64>) -> Self {
        match rtt_ms {
            Some(ms) if ms < 500.0 => Self::Good,
            Some(ms) if ms <= 2000.0 => Self::Ok,
            Some(_) => Self::Poor,
            None => Self::Poor,
        }
    }

    pub fn css_color(&self) -> &'static str {
        match self {
            Self::Good => "green",
            Self::Ok => "yellow",
            Self::Poor => "red",
        }
    }

    pub fn kml_style_id(&self) -> &'static str {
        match self {
            Self::Good => "goodSignal",
            Self::Ok => "okSignal",
            Self::Poor => "poorSignal",
        }
    }
}

/// The enabled output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    GeoJson,
    Kml,
    Html,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Csv,
        ExportFormat::Json,
        ExportFormat::GeoJson,
        ExportFormat::Kml,
        ExportFormat::Html,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Csv => "range_test.csv",
            Self::Json => "range_test.json",
            Self::GeoJson => "range_test.geojson",
            Self::Kml => "range_test.kml",
            Self::Html => "range_test.html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::GeoJson => "geojson",
            Self::Kml => "kml",
            Self::Html => "html",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "geojson" => Ok(Self::GeoJson),
            "kml" => Ok(Self::Kml),
            "html" => Ok(Self::Html),
            other => Err(format!(
                "unknown export format: {} (use csv, json, geojson, kml, html, or all)",
                other
            )),
        }
    }
}

/// One output format's writer. `write` must leave the on-disk document
/// complete and independently openable for the given entry list.
pub trait ExportWriter: Send + Sync {
    fn format(&self) -> ExportFormat;

    /// Bring the document up to date. `entries` is every exported result so
    /// far, in ascending sequence order.
    fn write(&mut self, entries: &[&ProbeResult]) -> Result<()>;
}

struct FormatSlot {
    writer: Box<dyn ExportWriter>,
    /// How many entries this format's file already reflects.
    cursor: usize,
    enabled: bool,
}

/// Owns one writer per enabled format and the per-format failure policy.
pub struct ExportManager {
    slots: Vec<FormatSlot>,
}

impl ExportManager {
    /// Create writers for `formats` under `dir`, creating the directory.
    pub fn new(dir: &Path, formats: &[ExportFormat]) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let slots = formats
            .iter()
            .map(|format| {
                let writer: Box<dyn ExportWriter> = match format {
                    ExportFormat::Csv => Box::new(csv::CsvWriter::new(dir)),
                    ExportFormat::Json => Box::new(json::JsonWriter::new(dir)),
                    ExportFormat::GeoJson => Box::new(geojson::GeoJsonWriter::new(dir)),
                    ExportFormat::Kml => Box::new(kml::KmlWriter::new(dir)),
                    ExportFormat::Html => Box::new(html::HtmlWriter::new(dir)),
                };
                FormatSlot {
                    writer,
                    cursor: 0,
                    enabled: true,
                }
            })
            .collect();
        Ok(Self { slots })
    }

    /// Bring every enabled format up to date with the log snapshot.
    ///
    /// A failing format is reported once and disabled for the rest of the
    /// run; it never aborts the probe loop or the other formats.
    pub fn sync(&mut self, snapshot: &[ProbeResult]) {
        let entries: Vec<&ProbeResult> = snapshot
            .iter()
            .filter(|result| result.position.is_some())
            .collect();
        for slot in &mut self.slots {
            if !slot.enabled || slot.cursor == entries.len() {
                continue;
            }
            match slot.writer.write(&entries) {
                Ok(()) => slot.cursor = entries.len(),
                Err(e) => {
                    eprintln!(
                        "✗ {} export failed, disabling for this run: {:#}",
                        slot.writer.format(),
                        e
                    );
                    slot.enabled = false;
                }
            }
        }
    }

    /// Formats still being written.
    pub fn enabled_formats(&self) -> Vec<ExportFormat> {
        self.slots
            .iter()
            .filter(|slot| slot.enabled)
            .map(|slot| slot.writer.format())
            .collect()
    }
}

/// Write the full document to a temporary sibling, then rename it over the
/// target, so a concurrent reader never observes a truncated file.
pub fn atomic_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Empty string for `None`, plain `Display` otherwise. Blank cells are how
/// the tabular output renders missing optional fields.
pub(crate) fn opt_cell<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
