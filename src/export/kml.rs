//! KML export for Google Earth and compatible viewers.
//!
//! Each exported probe becomes a placemark styled by its signal tier, and
//! once two or more points exist a path placemark traces the route.

use anyhow::Result;
use chrono::SecondsFormat;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::{atomic_replace, ExportFormat, ExportWriter, SignalTier};
use crate::state::ProbeResult;

pub struct KmlWriter {
    path: PathBuf,
}

impl KmlWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ExportFormat::Kml.file_name()),
        }
    }
}

// KML colors are aabbggrr.
const STYLES: &[(&str, &str)] = &[
    ("goodSignal", "ff00ff00"),
    ("okSignal", "ff00ffff"),
    ("poorSignal", "ff0000ff"),
];

impl ExportWriter for KmlWriter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Kml
    }

    fn write(&mut self, entries: &[&ProbeResult]) -> Result<()> {
        let mut doc = String::with_capacity(1024 + 512 * entries.len());
        doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        doc.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
        doc.push_str("<Document>\n<name>Range Test</name>\n");

        for (id, color) in STYLES {
            let _ = write!(
                doc,
                "<Style id=\"{id}\"><IconStyle><color>{color}</color>\
                 <Icon><href>http://maps.google.com/mapfiles/kml/shapes/placemark_circle.png</href></Icon>\
                 </IconStyle></Style>\n"
            );
        }
        doc.push_str(
            "<Style id=\"testPath\"><LineStyle><color>ff0000ff</color><width>3</width></LineStyle></Style>\n",
        );

        let track: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.position.as_ref())
            .map(|fix| {
                format!(
                    "{},{},{}",
                    fix.longitude,
                    fix.latitude,
                    fix.altitude.unwrap_or(0.0)
                )
            })
            .collect();
        if track.len() > 1 {
            doc.push_str("<Placemark>\n<name>Test Path</name>\n<styleUrl>#testPath</styleUrl>\n");
            doc.push_str("<LineString>\n<tessellate>1</tessellate>\n<coordinates>\n");
            for coordinate in &track {
                doc.push_str(coordinate);
                doc.push('\n');
            }
            doc.push_str("</coordinates>\n</LineString>\n</Placemark>\n");
        }

        for entry in entries {
            let fix = match &entry.position {
                Some(fix) => fix,
                None => continue,
            };
            let tier = SignalTier::from_rtt_ms(entry.rtt_millis());
            let rtt = entry
                .rtt_millis()
                .map(|ms| format!("{:.1} ms", ms))
                .unwrap_or_else(|| "timeout".to_string());
            let mut description = format!(
                "RTT: {}&lt;br/&gt;Time: {}",
                rtt,
                entry
                    .timestamp()
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            );
            if let Some(rssi) = entry.signal.as_ref().and_then(|s| s.rssi_dbm) {
                let _ = write!(description, "&lt;br/&gt;RSSI: {} dBm", rssi);
            }
            if let Some(snr) = entry.signal.as_ref().and_then(|s| s.snr_db) {
                let _ = write!(description, "&lt;br/&gt;SNR: {} dB", snr);
            }

            let _ = write!(
                doc,
                "<Placemark>\n<name>Ping #{}</name>\n<description>{}</description>\n\
                 <styleUrl>#{}</styleUrl>\n<Point>\n<coordinates>{},{},{}</coordinates>\n</Point>\n</Placemark>\n",
                entry.sequence,
                description,
                tier.kml_style_id(),
                fix.longitude,
                fix.latitude,
                fix.altitude.unwrap_or(0.0),
            );
        }

        doc.push_str("</Document>\n</kml>\n");
        atomic_replace(&self.path, doc.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_fixture::fixture;

    #[test]
    fn test_placemarks_styled_by_tier() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = KmlWriter::new(dir.path());
        let results = fixture();
        let entries: Vec<&ProbeResult> =
            results.iter().filter(|r| r.position.is_some()).collect();
        writer.write(&entries).unwrap();

        let text = std::fs::read_to_string(dir.path().join("range_test.kml")).unwrap();
        assert!(text.contains("<Style id=\"goodSignal\"><IconStyle><color>ff00ff00</color>"));
        assert!(text.contains("<Style id=\"poorSignal\"><IconStyle><color>ff0000ff</color>"));
        assert!(text.contains("<name>Ping #1</name>"));
        // All fixture RTTs are under 500 ms.
        assert_eq!(text.matches("#goodSignal").count(), 3);
        // Coordinates are longitude first.
        assert!(text.contains("<coordinates>-122.654321,45.123456,0</coordinates>"));
        assert!(text.contains("RSSI: -95 dBm"));
    }

    #[test]
    fn test_path_needs_two_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = KmlWriter::new(dir.path());
        let results = fixture();
        let entries: Vec<&ProbeResult> =
            results.iter().filter(|r| r.position.is_some()).collect();

        writer.write(&entries[..1]).unwrap();
        let text = std::fs::read_to_string(dir.path().join("range_test.kml")).unwrap();
        assert!(!text.contains("<LineString>"));

        writer.write(&entries).unwrap();
        let text = std::fs::read_to_string(dir.path().join("range_test.kml")).unwrap();
        assert!(text.contains("<LineString>"));
        assert!(text.contains("<name>Test Path</name>"));
    }
}
