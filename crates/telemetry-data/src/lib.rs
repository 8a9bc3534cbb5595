//! Ingestion and analysis layer for fleet telemetry.
//!
//! Parses raw stability, GPS and beacon logs, splits each stream into
//! sessions, correlates the streams into operational sessions and classifies
//! unstable samples into geolocated events.

pub mod analysis;
pub mod classifier;
pub mod correlator;
pub mod detector;
pub mod parsers;
pub mod point_correlator;
pub mod reader;

pub use telemetry_core as core;
