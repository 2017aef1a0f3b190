//! Position fixes and the provider seam.
//!
//! A fix is read on demand when a probe completes; "no fix yet" is a normal
//! state, never an error. Probes without a fix are logged but excluded from
//! the geospatial exports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One timestamped geographic fix. Immutable once read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Ground speed in m/s.
    pub speed: Option<f64>,
    /// Course over ground in degrees.
    pub bearing: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl PositionFix {
    /// A bare fix with only coordinates, captured now.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            bearing: None,
            captured_at: Utc::now(),
        }
    }
}

/// Source of position fixes. Absence is a first-class value.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Most recent fix, or `None` when no fix is available.
    async fn current_fix(&self) -> Option<PositionFix>;
}

/// Provider for runs without GPS hardware. Every probe is logged without a
/// position and stays out of the geospatial exports.
pub struct NoPositionProvider;

#[async_trait]
impl PositionProvider for NoPositionProvider {
    async fn current_fix(&self) -> Option<PositionFix> {
        None
    }
}

/// Reads fixes from the Termux location API (`termux-location -p gps`),
/// the usual setup for a phone strapped to the mobile node.
pub struct TermuxLocationProvider {
    timeout: Duration,
}

impl TermuxLocationProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TermuxLocationProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[derive(Deserialize)]
struct TermuxFix {
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    accuracy: Option<f64>,
    speed: Option<f64>,
    bearing: Option<f64>,
}

impl TermuxFix {
    fn into_fix(self) -> PositionFix {
        PositionFix {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            accuracy: self.accuracy,
            speed: self.speed,
            bearing: self.bearing,
            captured_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PositionProvider for TermuxLocationProvider {
    async fn current_fix(&self) -> Option<PositionFix> {
        let mut command = tokio::process::Command::new("termux-location");
        command
            .args(["-p", "gps"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .ok()?
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let parsed: TermuxFix = serde_json::from_slice(&output.stdout).ok()?;
        Some(parsed.into_fix())
    }
}

/// Serves a pre-arranged sequence of fixes, then `None` forever. Test helper.
pub struct ScriptedPositionProvider {
    fixes: Mutex<VecDeque<Option<PositionFix>>>,
}

impl ScriptedPositionProvider {
    pub fn new(fixes: Vec<Option<PositionFix>>) -> Self {
        Self {
            fixes: Mutex::new(fixes.into()),
        }
    }
}

#[async_trait]
impl PositionProvider for ScriptedPositionProvider {
    async fn current_fix(&self) -> Option<PositionFix> {
        self.fixes.lock().pop_front().flatten()
    }
}

/// Synthesizes a straight-line walk from an origin, one step per read.
/// Used by the selftest mode so the exports have something to draw.
pub struct SyntheticTrackProvider {
    origin: (f64, f64),
    step_degrees: f64,
    reads: AtomicU64,
}

impl SyntheticTrackProvider {
    pub fn new(origin: (f64, f64), step_degrees: f64) -> Self {
        Self {
            origin,
            step_degrees,
            reads: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PositionProvider for SyntheticTrackProvider {
    async fn current_fix(&self) -> Option<PositionFix> {
        let n = self.reads.fetch_add(1, Ordering::Relaxed) as f64;
        Some(PositionFix::at(
            self.origin.0 + n * self.step_degrees,
            self.origin.1 + n * self.step_degrees,
        ))
    }
}
