//! Runtime layer for fleet telemetry.
//!
//! Fans vehicle-day groups out over a bounded pool of blocking workers and
//! hands each finished analysis to a [`store::SessionStore`].

pub mod orchestrator;
pub mod store;

pub use telemetry_core as core;
pub use telemetry_data as data;
