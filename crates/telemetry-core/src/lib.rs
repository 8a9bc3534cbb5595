//! Shared building blocks for the fleet telemetry workspace.
//!
//! Domain models, the error type, configuration, and the time and geodesy
//! helpers used by the parsers and correlators.

pub mod error;
pub mod formatting;
pub mod geo;
pub mod models;
pub mod settings;
pub mod time_utils;

pub use error::{Result, TelemetryError};
