//! Stability (IMU) log parser.
//!
//! The unit writes ~10 samples per second between `HH:MM:SS` time markers, so
//! absolute sample time is reconstructed as `marker + offset × 100 ms` where
//! `offset` counts data lines since the last marker.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use telemetry_core::error::Result;
use telemetry_core::models::{
    ParseProblem, ProblemKind, StabilityReport, StabilitySample, StabilityStats,
};
use telemetry_core::time_utils::{combine_with_rollover, parse_dmy_hms, parse_marker_line};
use tracing::{debug, warn};

use super::{decode_buffer, numbered_lines, parse_number};

/// Spacing between consecutive samples after a marker.
pub const SAMPLE_INTERVAL_MS: i64 = 100;
/// Expected vertical acceleration at rest, m/s².
pub const GRAVITY: f64 = 9.81;
/// Allowed deviation of the trailing `az` average from [`GRAVITY`].
pub const GRAVITY_TOLERANCE: f64 = 3.0;
/// Samples averaged by the gravity check, which also runs every this many samples.
pub const GRAVITY_WINDOW: usize = 100;

const HEADER_PREFIX: &str = "ESTABILIDAD;";
const MIN_FIELDS: usize = 19;
const MAX_FIELDS: usize = 20;
/// Raw device units per m/s² (and percent per unit of `si`).
const RAW_SCALE: f64 = 100.0;

// ── Time model ────────────────────────────────────────────────────────────────

/// A time marker and how many samples have been read since it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMarker {
    pub base: NaiveDateTime,
    pub offset: u32,
}

impl TimeMarker {
    pub fn new(base: NaiveDateTime) -> Self {
        Self { base, offset: 0 }
    }

    /// Absolute time of the sample at the current offset.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.base + Duration::milliseconds(i64::from(self.offset) * SAMPLE_INTERVAL_MS)
    }

    /// The marker positioned at the next sample.
    pub fn advance(self) -> Self {
        Self {
            base: self.base,
            offset: self.offset + 1,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse a stability log buffer.
///
/// `session_date_hint` supplies the calendar date for marker lines that are
/// not preceded by a session header; a header always takes precedence.
pub fn parse_stability(
    buffer: &[u8],
    session_date_hint: Option<NaiveDate>,
) -> Result<StabilityReport> {
    let text = decode_buffer(buffer)?;
    let scan = numbered_lines(&text).fold(StabilityScan::new(session_date_hint), |scan, (n, line)| {
        scan.consume(n, line)
    });
    let report = scan.finish();

    debug!(
        "Stability: {} data lines, {} valid, {} without timestamp, {} invalid, {} markers",
        report.stats.total,
        report.stats.valid,
        report.stats.no_timestamp,
        report.stats.invalid_values,
        report.stats.markers_seen,
    );
    Ok(report)
}

// ── Line classification ───────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum StabilityLine<'a> {
    Header(&'a str),
    ColumnHeader,
    Marker(NaiveTime),
    Data(Vec<&'a str>),
}

fn classify_line(line: &str) -> StabilityLine<'_> {
    if line.to_ascii_uppercase().starts_with(HEADER_PREFIX) {
        return StabilityLine::Header(line);
    }
    if line.starts_with("ax") {
        return StabilityLine::ColumnHeader;
    }
    if let Some(time) = parse_marker_line(line) {
        return StabilityLine::Marker(time);
    }
    let fields = line.trim_end_matches(';').split(';').map(str::trim).collect();
    StabilityLine::Data(fields)
}

/// Session header fields: start time, device id and session number.
#[derive(Debug, Default, PartialEq)]
struct SessionHeader {
    start: Option<NaiveDateTime>,
    device_id: Option<String>,
    session: Option<u32>,
}

fn parse_header(line: &str) -> SessionHeader {
    let fields: Vec<&str> = line.split(';').map(str::trim).collect();
    let start = fields.get(1).and_then(|s| parse_dmy_hms(s));
    let device_id = fields
        .get(2)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let session = fields
        .iter()
        .skip(3)
        .find_map(|f| f.split_once(':'))
        .and_then(|(_, n)| n.trim().parse::<u32>().ok());
    SessionHeader {
        start,
        device_id,
        session,
    }
}

/// Build a sample from the 19–20 raw fields, or `None` if any is non-numeric.
fn build_sample(
    fields: &[&str],
    timestamp: NaiveDateTime,
    line_number: usize,
) -> Option<StabilitySample> {
    let values: Vec<f64> = fields
        .iter()
        .map(|f| parse_number(f))
        .collect::<Option<Vec<f64>>>()?;

    Some(StabilitySample {
        timestamp,
        ax: values[0] / RAW_SCALE,
        ay: values[1] / RAW_SCALE,
        az: values[2] / RAW_SCALE,
        gx: values[3],
        gy: values[4],
        gz: values[5],
        roll: values[6],
        pitch: values[7],
        yaw: values[8],
        timeantwifi: values[9],
        usciclo: [values[10], values[11], values[12], values[13], values[14]],
        si: values[15] / RAW_SCALE,
        accmag: values[16] / RAW_SCALE,
        microsds: values[17],
        k3: values[18],
        line_number,
    })
}

// ── Scan accumulator ──────────────────────────────────────────────────────────

/// Fold state threaded through the lines of one buffer.
#[derive(Debug)]
struct StabilityScan {
    date: Option<NaiveDate>,
    marker: Option<TimeMarker>,
    samples: Vec<StabilitySample>,
    problems: Vec<ParseProblem>,
    stats: StabilityStats,
}

impl StabilityScan {
    fn new(session_date_hint: Option<NaiveDate>) -> Self {
        Self {
            date: session_date_hint,
            marker: None,
            samples: Vec::new(),
            problems: Vec::new(),
            stats: StabilityStats::default(),
        }
    }

    fn consume(mut self, line_number: usize, line: &str) -> Self {
        match classify_line(line) {
            StabilityLine::Header(raw) => self.on_header(line_number, raw),
            StabilityLine::ColumnHeader => {}
            StabilityLine::Marker(time) => self.on_marker(line_number, time),
            StabilityLine::Data(fields) => self.on_data(line_number, &fields),
        }
        self
    }

    fn on_header(&mut self, line_number: usize, raw: &str) {
        let header = parse_header(raw);
        if self.stats.device_id.is_none() {
            self.stats.device_id = header.device_id;
        }
        if let Some(n) = header.session {
            self.stats.declared_sessions.push(n);
        }
        match header.start {
            Some(start) => {
                self.date = Some(start.date());
                self.marker = Some(TimeMarker::new(start));
            }
            None => warn!("Stability line {}: header without a valid start time", line_number),
        }
    }

    fn on_marker(&mut self, line_number: usize, time: NaiveTime) {
        self.stats.markers_seen += 1;
        let Some(date) = self.date else {
            self.marker = None;
            self.problems.push(ParseProblem::new(
                ProblemKind::NoTimestamp,
                line_number,
                format!("time marker {} without a session date", time),
            ));
            return;
        };
        let base = combine_with_rollover(date, time, self.marker.map(|m| m.base));
        self.date = Some(base.date());
        self.marker = Some(TimeMarker::new(base));
    }

    fn on_data(&mut self, line_number: usize, fields: &[&str]) {
        self.stats.total += 1;

        let Some(marker) = self.marker else {
            self.stats.no_timestamp += 1;
            self.problems.push(ParseProblem::new(
                ProblemKind::NoTimestamp,
                line_number,
                "data line before any time marker",
            ));
            return;
        };

        if !(MIN_FIELDS..=MAX_FIELDS).contains(&fields.len()) {
            self.stats.invalid_values += 1;
            self.problems.push(ParseProblem::new(
                ProblemKind::InvalidValues,
                line_number,
                format!(
                    "expected {}-{} fields, found {}",
                    MIN_FIELDS,
                    MAX_FIELDS,
                    fields.len()
                ),
            ));
            return;
        }

        let Some(sample) = build_sample(fields, marker.timestamp(), line_number) else {
            self.stats.invalid_values += 1;
            self.problems.push(ParseProblem::new(
                ProblemKind::InvalidValues,
                line_number,
                "non-numeric field",
            ));
            return;
        };

        self.marker = Some(marker.advance());
        self.samples.push(sample);
        self.stats.valid += 1;

        if self.stats.valid % GRAVITY_WINDOW == 0 {
            self.check_gravity(line_number);
        }
    }

    /// Flag the trailing window if its mean `az` is far from gravity.
    fn check_gravity(&mut self, line_number: usize) {
        let window = &self.samples[self.samples.len() - GRAVITY_WINDOW..];
        let avg_az = window.iter().map(|s| s.az).sum::<f64>() / GRAVITY_WINDOW as f64;
        if (avg_az - GRAVITY).abs() > GRAVITY_TOLERANCE {
            self.problems.push(ParseProblem::new(
                ProblemKind::PhysicalValidation,
                line_number,
                format!(
                    "physical validation failed: mean az {:.2} m/s² over last {} samples",
                    avg_az, GRAVITY_WINDOW
                ),
            ));
        }
    }

    fn finish(mut self) -> StabilityReport {
        self.samples.sort_by_key(|s| s.timestamp);
        StabilityReport {
            records: self.samples,
            problems: self.problems,
            stats: self.stats,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
