use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, TelemetryError};
use crate::time_utils::{parse_compact_date, TimezoneHandler, DEFAULT_TIMEZONE};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Batch ingestion of vehicle stability, GPS and beacon logs
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fleet-telemetry",
    about = "Batch ingestion of vehicle stability, GPS and beacon logs",
    version
)]
pub struct Settings {
    /// Directory containing TYPE_VEHICLEID_YYYYMMDD.txt log files
    #[arg(long, env = "FLEET_TELEMETRY_DATA")]
    pub data_dir: Option<PathBuf>,

    /// Directory where per-group JSON results are written
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Only process this vehicle id
    #[arg(long)]
    pub vehicle: Option<String>,

    /// Only process this date (YYYYMMDD)
    #[arg(long)]
    pub date: Option<String>,

    /// Inactivity gap (seconds) that splits a sensor stream into sessions
    #[arg(long, default_value = "300")]
    pub gap_threshold_secs: u64,

    /// Minimum samples for a run to count as a session
    #[arg(long, default_value = "10")]
    pub min_measurements: usize,

    /// Padding (seconds) around a stability session when matching other sensors
    #[arg(long, default_value = "300")]
    pub tolerance_secs: u64,

    /// Maximum time difference (ms) for nearest GPS / beacon lookups
    #[arg(long, default_value = "5000")]
    pub max_diff_ms: i64,

    /// Number of vehicle+date groups processed concurrently (1-64)
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: u16,

    /// Abort a single group after this many seconds
    #[arg(long)]
    pub group_timeout_secs: Option<u64>,

    /// Local timezone of the vehicle clocks
    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── PipelineConfig ─────────────────────────────────────────────────────────────

/// Tunables consumed by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub gap_threshold_secs: u64,
    pub min_measurements: usize,
    pub tolerance_secs: u64,
    pub max_diff_ms: i64,
    pub timezone: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gap_threshold_secs: 300,
            min_measurements: 10,
            tolerance_secs: 300,
            max_diff_ms: 5_000,
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

// ── SavedConfig ────────────────────────────────────────────────────────────────

/// Tunables persisted to `~/.fleet-telemetry/config.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct SavedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_threshold_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_measurements: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_diff_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl SavedConfig {
    /// Return the default path to the persisted config file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".fleet-telemetry").join("config.json")
    }

    /// Load persisted config from an explicit path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write the config to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> std::result::Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with the saved config where no explicit CLI
    /// value was provided, and persist the result.
    pub fn load_with_saved() -> Self {
        Self::load_with_saved_impl(std::env::args_os().collect(), &SavedConfig::config_path())
    }

    /// Same as [`load_with_saved`](Self::load_with_saved) but with explicit
    /// arguments and config path so tests can redirect to a temp directory.
    pub fn load_with_saved_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            let _ = SavedConfig::clear_at(config_path);
            return Self::apply_debug(settings);
        }

        let saved = SavedConfig::load_from(config_path);

        // NOTE: clap stores the arg id using the field name (underscores).
        if !is_arg_explicitly_set(&matches, "gap_threshold_secs") {
            if let Some(v) = saved.gap_threshold_secs {
                settings.gap_threshold_secs = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "min_measurements") {
            if let Some(v) = saved.min_measurements {
                settings.min_measurements = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "tolerance_secs") {
            if let Some(v) = saved.tolerance_secs {
                settings.tolerance_secs = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "max_diff_ms") {
            if let Some(v) = saved.max_diff_ms {
                settings.max_diff_ms = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "timezone") {
            if let Some(v) = saved.timezone {
                settings.timezone = v;
            }
        }
        if settings.output_dir.is_none() {
            settings.output_dir = saved.output_dir;
        }

        settings = Self::apply_debug(settings);

        let _ = SavedConfig::from(&settings).save_to(config_path);

        settings
    }

    /// Check values clap cannot validate on its own.
    pub fn validate(&self) -> Result<()> {
        if !TimezoneHandler::validate_timezone(&self.timezone) {
            return Err(TelemetryError::Config(format!(
                "unknown timezone \"{}\"",
                self.timezone
            )));
        }
        if let Some(date) = &self.date {
            if parse_compact_date(date).is_none() {
                return Err(TelemetryError::Config(format!(
                    "--date must be YYYYMMDD, got \"{}\"",
                    date
                )));
            }
        }
        if self.gap_threshold_secs == 0 {
            return Err(TelemetryError::Config(
                "gap threshold must be positive".to_string(),
            ));
        }
        if self.max_diff_ms < 0 {
            return Err(TelemetryError::Config(
                "max diff must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// The tunables handed to the pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            gap_threshold_secs: self.gap_threshold_secs,
            min_measurements: self.min_measurements,
            tolerance_secs: self.tolerance_secs,
            max_diff_ms: self.max_diff_ms,
            timezone: self.timezone.clone(),
        }
    }

    /// `--debug` overrides log level.
    fn apply_debug(mut settings: Settings) -> Settings {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for SavedConfig {
    fn from(s: &Settings) -> Self {
        SavedConfig {
            gap_threshold_secs: Some(s.gap_threshold_secs),
            min_measurements: Some(s.min_measurements),
            tolerance_secs: Some(s.tolerance_secs),
            max_diff_ms: Some(s.max_diff_ms),
            timezone: Some(s.timezone.clone()),
            output_dir: s.output_dir.clone(),
        }
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
