//! Field range testing for mesh radio links.
//!
//! A mobile client pings a fixed base station at a steady cadence, tags
//! every result with a GPS fix, and keeps a set of geospatial documents
//! (CSV, JSON, GeoJSON, KML, Leaflet HTML) continuously up to date so
//! coverage can be judged while still in the field.

pub mod cli;
pub mod config;
pub mod export;
pub mod path;
pub mod position;
pub mod probe;
pub mod server;
pub mod state;
pub mod transport;
