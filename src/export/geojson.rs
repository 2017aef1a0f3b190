//! GeoJSON export: one Point feature per exported probe plus a LineString
//! tracing the route once there are at least two points.

use anyhow::Result;
use chrono::SecondsFormat;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{atomic_replace, ExportFormat, ExportWriter};
use crate::state::ProbeResult;

pub struct GeoJsonWriter {
    path: PathBuf,
}

impl GeoJsonWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ExportFormat::GeoJson.file_name()),
        }
    }
}

impl ExportWriter for GeoJsonWriter {
    fn format(&self) -> ExportFormat {
        ExportFormat::GeoJson
    }

    fn write(&mut self, entries: &[&ProbeResult]) -> Result<()> {
        let mut features: Vec<Value> = Vec::with_capacity(entries.len() + 1);
        let mut track: Vec<Value> = Vec::with_capacity(entries.len());

        for entry in entries {
            let fix = match &entry.position {
                Some(fix) => fix,
                None => continue,
            };
            let coordinates = json!([fix.longitude, fix.latitude, fix.altitude.unwrap_or(0.0)]);
            track.push(coordinates.clone());

            let mut properties = serde_json::Map::new();
            properties.insert("ping".into(), json!(entry.sequence));
            properties.insert("rtt_ms".into(), json!(entry.rtt_millis()));
            properties.insert(
                "timestamp".into(),
                json!(entry
                    .timestamp()
                    .to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            if let Some(accuracy) = fix.accuracy {
                properties.insert("accuracy".into(), json!(accuracy));
            }
            if let Some(speed) = fix.speed {
                properties.insert("speed".into(), json!(speed));
            }
            if let Some(bearing) = fix.bearing {
                properties.insert("bearing".into(), json!(bearing));
            }
            if let Some(rssi) = entry.signal.as_ref().and_then(|s| s.rssi_dbm) {
                properties.insert("rssi_dbm".into(), json!(rssi));
            }
            if let Some(snr) = entry.signal.as_ref().and_then(|s| s.snr_db) {
                properties.insert("snr_db".into(), json!(snr));
            }

            features.push(json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": coordinates },
                "properties": Value::Object(properties),
            }));
        }

        if track.len() >= 2 {
            features.push(json!({
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": track },
                "properties": { "name": "Range test path" },
            }));
        }

        let doc = serde_json::to_string_pretty(&json!({
            "type": "FeatureCollection",
            "features": features,
        }))?;
        atomic_replace(&self.path, doc.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_fixture::fixture;

    #[test]
    fn test_points_plus_path_feature() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GeoJsonWriter::new(dir.path());
        let results = fixture();
        let entries: Vec<&ProbeResult> =
            results.iter().filter(|r| r.position.is_some()).collect();
        writer.write(&entries).unwrap();

        let text = std::fs::read_to_string(dir.path().join("range_test.geojson")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["type"], "FeatureCollection");
        let features = doc["features"].as_array().unwrap();
        // Three point features and one path feature.
        assert_eq!(features.len(), 4);
        assert_eq!(features[0]["geometry"]["type"], "Point");
        // GeoJSON positions are longitude first.
        assert_eq!(
            features[0]["geometry"]["coordinates"][0].as_f64().unwrap(),
            -122.654321
        );
        assert_eq!(features[0]["properties"]["ping"], 1);
        let path = &features[3];
        assert_eq!(path["geometry"]["type"], "LineString");
        assert_eq!(path["geometry"]["coordinates"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_single_point_has_no_path_feature() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GeoJsonWriter::new(dir.path());
        let results = fixture();
        let entries: Vec<&ProbeResult> =
            results.iter().filter(|r| r.position.is_some()).collect();
        writer.write(&entries[..1]).unwrap();

        let text = std::fs::read_to_string(dir.path().join("range_test.geojson")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["features"].as_array().unwrap().len(), 1);
    }
}
