//! Persistence seam for analysis results.
//!
//! The runtime hands each finished group to a [`SessionStore`]. The bundled
//! [`JsonFileStore`] writes one pretty-printed JSON document per group.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use telemetry_core::error::{Result, TelemetryError};
use telemetry_data::analysis::AnalysisResult;
use tracing::debug;

/// Sink for per-group analysis results. Implementations must tolerate
/// concurrent calls from several worker threads.
pub trait SessionStore: Send + Sync {
    /// Persist one group's result.
    fn save_group(&self, result: &AnalysisResult) -> Result<()>;
}

/// Writes `<output_dir>/<vehicle>_<YYYYMMDD>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    output_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Destination file for a group.
    pub fn path_for(&self, vehicle: &str, date: chrono::NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.json", vehicle, date.format("%Y%m%d")))
    }
}

impl SessionStore for JsonFileStore {
    fn save_group(&self, result: &AnalysisResult) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.path_for(&result.vehicle, result.date);
        let json = serde_json::to_string_pretty(result)?;

        // Write to a sibling temp file, then rename into place.
        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            TelemetryError::Io(e)
        })?;

        debug!("Saved {} ({} bytes)", path.display(), json.len());
        Ok(())
    }
}
