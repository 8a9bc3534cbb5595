//! Session detector.
//!
//! Splits one sensor's timestamp stream into [`DetectedSession`]s wherever the
//! inactivity between consecutive readings reaches the gap threshold.

use chrono::{NaiveDateTime, TimeDelta};
use telemetry_core::models::{DetectedSession, SensorType, Timestamped};
use telemetry_core::settings::PipelineConfig;
use tracing::{debug, warn};

/// Tunables for [`detect_sessions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionConfig {
    /// A gap of at least this many seconds closes the current run.
    pub gap_threshold_secs: u64,
    /// Runs with fewer samples are dropped.
    pub min_measurements: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            gap_threshold_secs: 300,
            min_measurements: 10,
        }
    }
}

impl From<&PipelineConfig> for DetectionConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            gap_threshold_secs: config.gap_threshold_secs,
            min_measurements: config.min_measurements,
        }
    }
}

impl DetectionConfig {
    fn gap(&self) -> TimeDelta {
        TimeDelta::seconds(self.gap_threshold_secs as i64)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Detect sessions in a bare timestamp sequence.
///
/// Input need not be sorted. Line ranges are left at 0.
pub fn detect_sessions(
    timestamps: &[NaiveDateTime],
    sensor: SensorType,
    config: &DetectionConfig,
) -> Vec<DetectedSession> {
    let points = timestamps.iter().map(|&ts| (ts, 0)).collect();
    detect_runs(points, sensor, config)
}

/// Detect sessions in parsed records, filling each session's source-line range.
pub fn detect_sessions_in<T: Timestamped>(
    records: &[T],
    sensor: SensorType,
    config: &DetectionConfig,
) -> Vec<DetectedSession> {
    let points = records
        .iter()
        .map(|r| (r.timestamp(), r.line_number()))
        .collect();
    detect_runs(points, sensor, config)
}

// ── Run building ──────────────────────────────────────────────────────────────

/// An open run being extended sample by sample.
#[derive(Debug)]
struct Run {
    start: NaiveDateTime,
    end: NaiveDateTime,
    count: usize,
    first_line: usize,
    last_line: usize,
}

impl Run {
    fn open(ts: NaiveDateTime, line: usize) -> Self {
        Self {
            start: ts,
            end: ts,
            count: 1,
            first_line: line,
            last_line: line,
        }
    }

    fn push(&mut self, ts: NaiveDateTime, line: usize) {
        self.end = ts;
        self.count += 1;
        self.first_line = self.first_line.min(line);
        self.last_line = self.last_line.max(line);
    }

    fn into_session(self, sensor: SensorType) -> DetectedSession {
        DetectedSession {
            sensor,
            start: self.start,
            end: self.end,
            duration_secs: (self.end - self.start).num_seconds(),
            sample_count: self.count,
            first_line: self.first_line,
            last_line: self.last_line,
            fragments: 1,
        }
    }
}

fn detect_runs(
    mut points: Vec<(NaiveDateTime, usize)>,
    sensor: SensorType,
    config: &DetectionConfig,
) -> Vec<DetectedSession> {
    // Stable: equal timestamps keep their source order.
    points.sort_by_key(|&(ts, _)| ts);

    let gap = config.gap();
    let mut sessions = Vec::new();
    let mut current: Option<Run> = None;

    for (ts, line) in points {
        if let Some(run) = current.as_mut().filter(|run| ts - run.end < gap) {
            run.push(ts, line);
            continue;
        }
        if let Some(run) = current.take() {
            flush(run, sensor, config, &mut sessions);
        }
        current = Some(Run::open(ts, line));
    }
    if let Some(run) = current {
        flush(run, sensor, config, &mut sessions);
    }

    debug!("{}: detected {} sessions", sensor, sessions.len());
    sessions
}

fn flush(run: Run, sensor: SensorType, config: &DetectionConfig, out: &mut Vec<DetectedSession>) {
    if run.count < config.min_measurements {
        warn!(
            "{}: dropping run {} - {} with {} samples (minimum {})",
            sensor, run.start, run.end, run.count, config.min_measurements
        );
        return;
    }
    out.push(run.into_session(sensor));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use telemetry_core::models::BeaconState;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn at(secs: i64) -> NaiveDateTime {
        base() + Duration::seconds(secs)
    }

    fn config(min: usize) -> DetectionConfig {
        DetectionConfig {
            gap_threshold_secs: 300,
            min_measurements: min,
        }
    }

    #[test]
    fn test_empty_input_yields_no_sessions() {
        assert!(detect_sessions(&[], SensorType::Gps, &config(1)).is_empty());
    }

    #[test]
    fn test_gap_over_threshold_splits() {
        let ts = [at(0), at(1), at(301), at(302)];
        let sessions = detect_sessions(&ts, SensorType::Stability, &config(1));

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].sample_count, 2);
        assert_eq!(sessions[1].sample_count, 2);
        assert_eq!(sessions[0].end, at(1));
        assert_eq!(sessions[1].start, at(301));
        assert_eq!(sessions[1].duration_secs, 1);
        assert_eq!(sessions[0].sensor, SensorType::Stability);
    }

    #[test]
    fn test_gap_equal_to_threshold_splits() {
        let ts = [at(0), at(300), at(600)];
        let sessions = detect_sessions(&ts, SensorType::Gps, &config(1));
        assert_eq!(sessions.len(), 3);
        assert!(sessions.iter().all(|s| s.sample_count == 1));
    }

    #[test]
    fn test_gap_just_under_threshold_keeps_run() {
        let ts = [at(0), at(299), at(598)];
        let sessions = detect_sessions(&ts, SensorType::Gps, &config(1));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_secs, 598);
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let ts = [at(302), at(0), at(301), at(1)];
        let sessions = detect_sessions(&ts, SensorType::Gps, &config(1));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].start, at(0));
    }

    #[test]
    fn test_short_runs_dropped() {
        let mut ts: Vec<_> = (0..12).map(at).collect();
        ts.extend([at(1000), at(1001)]);
        let sessions = detect_sessions(&ts, SensorType::Gps, &DetectionConfig::default());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].sample_count, 12);
    }

    #[test]
    fn test_record_variant_fills_line_range() {
        let records: Vec<BeaconState> = [(0, 5), (10, 6), (20, 7), (900, 9)]
            .iter()
            .map(|&(secs, line)| BeaconState {
                timestamp: at(secs),
                state: "1".to_string(),
                key: None,
                line_number: line,
            })
            .collect();
        let sessions = detect_sessions_in(&records, SensorType::Beacon, &config(1));

        assert_eq!(sessions.len(), 2);
        assert_eq!((sessions[0].first_line, sessions[0].last_line), (5, 7));
        assert_eq!((sessions[1].first_line, sessions[1].last_line), (9, 9));
        assert_eq!(sessions[1].duration_secs, 0);
        assert!(sessions.iter().all(|s| s.fragments == 1));
    }

    #[test]
    fn test_from_pipeline_config() {
        let pipeline = PipelineConfig {
            gap_threshold_secs: 120,
            min_measurements: 3,
            ..PipelineConfig::default()
        };
        let config = DetectionConfig::from(&pipeline);
        assert_eq!(config.gap_threshold_secs, 120);
        assert_eq!(config.min_measurements, 3);
    }
}
