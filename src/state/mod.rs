pub mod log;
pub mod stats;

pub use log::{MeasurementLog, ProbeResult, ProbeStatus, SequenceOrderError};
pub use stats::{RunningStats, StatsAggregator, StatsSnapshot};
