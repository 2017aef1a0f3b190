//! Self-contained Leaflet map page.
//!
//! The sample data is embedded in the document as a JSON array, so the file
//! can be opened straight from disk; only the Leaflet assets and the tile
//! layer come from the network.

use anyhow::Result;
use chrono::SecondsFormat;
use serde_json::json;
use std::path::{Path, PathBuf};

use super::{atomic_replace, ExportFormat, ExportWriter};
use crate::state::ProbeResult;

pub struct HtmlWriter {
    path: PathBuf,
}

impl HtmlWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ExportFormat::Html.file_name()),
        }
    }
}

impl ExportWriter for HtmlWriter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Html
    }

    fn write(&mut self, entries: &[&ProbeResult]) -> Result<()> {
        let points: Vec<serde_json::Value> = entries
            .iter()
            .filter_map(|entry| {
                let fix = entry.position.as_ref()?;
                Some(json!({
                    "ping": entry.sequence,
                    "rtt": entry.rtt_millis(),
                    "time": entry.timestamp().to_rfc3339_opts(SecondsFormat::Millis, true),
                    "lat": fix.latitude,
                    "lon": fix.longitude,
                    "rssi": entry.signal.as_ref().and_then(|s| s.rssi_dbm),
                    "snr": entry.signal.as_ref().and_then(|s| s.snr_db),
                }))
            })
            .collect();

        let doc = if points.is_empty() {
            EMPTY_PAGE.to_string()
        } else {
            let count = points.len();
            let center_lat: f64 = points
                .iter()
                .map(|p| p["lat"].as_f64().unwrap_or(0.0))
                .sum::<f64>()
                / count as f64;
            let center_lon: f64 = points
                .iter()
                .map(|p| p["lon"].as_f64().unwrap_or(0.0))
                .sum::<f64>()
                / count as f64;
            PAGE_TEMPLATE
                .replace("__POINTS__", &serde_json::to_string(&points)?)
                .replace("__CENTER_LAT__", &center_lat.to_string())
                .replace("__CENTER_LON__", &center_lon.to_string())
        };

        atomic_replace(&self.path, doc.as_bytes())?;
        Ok(())
    }
}

const EMPTY_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Range Test Map</title></head>
<body><p>No geo-tagged samples yet.</p></body>
</html>
"#;

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Range Test Map</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
  html, body, #map { height: 100%; margin: 0; }
  .legend {
    background: white; padding: 8px 12px; border-radius: 4px;
    box-shadow: 0 1px 4px rgba(0,0,0,0.4); font: 13px sans-serif;
  }
  .legend .dot {
    display: inline-block; width: 10px; height: 10px;
    border-radius: 50%; margin-right: 6px;
  }
</style>
</head>
<body>
<div id="map"></div>
<script>
var points = __POINTS__;

var map = L.map('map').setView([__CENTER_LAT__, __CENTER_LON__], 15);
L.tileLayer('https://tile.openstreetmap.org/{z}/{x}/{y}.png', {
  maxZoom: 19,
  attribution: '&copy; OpenStreetMap contributors'
}).addTo(map);

var track = points.map(function (p) { return [p.lat, p.lon]; });
if (track.length > 1) {
  L.polyline(track, { color: 'blue', weight: 3, opacity: 0.7 }).addTo(map);
}

function markerColor(p) {
  if (p.rtt !== null && p.rtt < 500) return 'green';
  if (p.rtt !== null && p.rtt <= 2000) return 'yellow';
  return 'red';
}

points.forEach(function (p) {
  var popup = '<b>Ping #' + p.ping + '</b><br/>' +
    'RTT: ' + (p.rtt !== null ? p.rtt.toFixed(1) + ' ms' : 'timeout') + '<br/>' +
    'Time: ' + p.time + '<br/>' +
    'Location: ' + p.lat.toFixed(6) + ', ' + p.lon.toFixed(6);
  if (p.rssi !== null) popup += '<br/>RSSI: ' + p.rssi + ' dBm';
  if (p.snr !== null) popup += '<br/>SNR: ' + p.snr + ' dB';
  L.circleMarker([p.lat, p.lon], {
    radius: 7,
    color: markerColor(p),
    fillColor: markerColor(p),
    fillOpacity: 0.8
  }).addTo(map).bindPopup(popup);
});

var legend = L.control({ position: 'bottomright' });
legend.onAdd = function () {
  var div = L.DomUtil.create('div', 'legend');
  div.innerHTML = '<b>Signal Quality</b><br/>' +
    '<span class="dot" style="background:green"></span>Good (&lt;500ms)<br/>' +
    '<span class="dot" style="background:yellow"></span>OK (500-2000ms)<br/>' +
    '<span class="dot" style="background:red"></span>Poor (&gt;2000ms)';
  return div;
};
legend.addTo(map);
</script>
</body>
</html>
"#;
