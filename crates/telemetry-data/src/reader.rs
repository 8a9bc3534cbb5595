//! Log file discovery and grouping.
//!
//! Telemetry units write one file per sensor per day, named
//! `TYPE_VEHICLEID_YYYYMMDD.txt`. Files are grouped by vehicle and date so a
//! day's three streams are analysed together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use telemetry_core::error::{Result, TelemetryError};
use telemetry_core::models::SensorType;
use telemetry_core::time_utils::parse_compact_date;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────────

/// What a log file name says about its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    pub sensor: SensorType,
    pub vehicle: String,
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// The files of one vehicle on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub vehicle: String,
    pub date: NaiveDate,
    pub stability: Option<PathBuf>,
    pub gps: Option<PathBuf>,
    pub beacon: Option<PathBuf>,
}

impl FileGroup {
    fn new(vehicle: String, date: NaiveDate) -> Self {
        Self {
            vehicle,
            date,
            stability: None,
            gps: None,
            beacon: None,
        }
    }

    fn slot_mut(&mut self, sensor: SensorType) -> &mut Option<PathBuf> {
        match sensor {
            SensorType::Stability => &mut self.stability,
            SensorType::Gps => &mut self.gps,
            SensorType::Beacon => &mut self.beacon,
        }
    }

    /// `VEHICLE_YYYYMMDD`, used for output names and log lines.
    pub fn key(&self) -> String {
        format!("{}_{}", self.vehicle, self.date.format("%Y%m%d"))
    }
}

/// Raw buffers of one group, ready for parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInputs {
    pub vehicle: String,
    pub date: NaiveDate,
    pub stability: Option<Vec<u8>>,
    pub gps: Option<Vec<u8>>,
    pub beacon: Option<Vec<u8>>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Find all `.txt` files recursively under `data_path`, sorted by path.
pub fn find_log_files(data_path: &Path) -> Vec<PathBuf> {
    if !data_path.exists() {
        warn!("Data path does not exist: {}", data_path.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(data_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Parse a `TYPE_VEHICLEID_YYYYMMDD.txt` file name.
pub fn parse_file_name(path: &Path) -> Result<LogFileInfo> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"(?i)^(ESTABILIDAD|GPS|ROTATIVO)_(.+)_(\d{8})\.txt$").expect("regex is valid")
    });

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TelemetryError::InvalidFileName(path.display().to_string()))?;
    let caps = re
        .captures(name)
        .ok_or_else(|| TelemetryError::InvalidFileName(name.to_string()))?;
    let sensor = SensorType::from_file_prefix(&caps[1])
        .ok_or_else(|| TelemetryError::InvalidFileName(name.to_string()))?;
    let date = parse_compact_date(&caps[3])
        .ok_or_else(|| TelemetryError::InvalidFileName(name.to_string()))?;

    Ok(LogFileInfo {
        sensor,
        vehicle: caps[2].to_string(),
        date,
        path: path.to_path_buf(),
    })
}

/// Group paths by vehicle and date, sorted by vehicle then date.
///
/// Names that do not follow the convention are skipped. If two files claim
/// the same slot the first (in path order) is kept.
pub fn group_files(paths: &[PathBuf]) -> Vec<FileGroup> {
    let mut groups: BTreeMap<(String, NaiveDate), FileGroup> = BTreeMap::new();

    for path in paths {
        let info = match parse_file_name(path) {
            Ok(info) => info,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let group = groups
            .entry((info.vehicle.clone(), info.date))
            .or_insert_with(|| FileGroup::new(info.vehicle.clone(), info.date));
        let slot = group.slot_mut(info.sensor);
        if slot.is_none() {
            *slot = Some(info.path);
        } else {
            warn!(
                "Duplicate {} file for {} on {}: ignoring {}",
                info.sensor,
                info.vehicle,
                info.date,
                info.path.display()
            );
        }
    }

    debug!("Grouped {} files into {} groups", paths.len(), groups.len());
    groups.into_values().collect()
}

/// Read every file of a group into memory.
pub fn load_group(group: &FileGroup) -> Result<GroupInputs> {
    Ok(GroupInputs {
        vehicle: group.vehicle.clone(),
        date: group.date,
        stability: read_optional(group.stability.as_deref())?,
        gps: read_optional(group.gps.as_deref())?,
        beacon: read_optional(group.beacon.as_deref())?,
    })
}

fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|p| {
        std::fs::read(p).map_err(|source| TelemetryError::FileRead {
            path: p.to_path_buf(),
            source,
        })
    })
    .transpose()
}
