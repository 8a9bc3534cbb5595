//! GPS receiver log parser and 1 Hz gap interpolation.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use telemetry_core::error::Result;
use telemetry_core::geo::{haversine_distance_m, is_valid_coordinate, OPERATING_REGION};
use telemetry_core::models::{GpsPoint, GpsReport, GpsStats, ParseProblem, ProblemKind};
use telemetry_core::time_utils::{
    combine_with_rollover, find_dmy_date, parse_dmy, parse_hms, TimezoneHandler,
};
use tracing::debug;

use super::{decode_buffer, numbered_lines, parse_number};

/// Fastest plausible ground speed, km/h.
pub const MAX_SPEED_KMH: f64 = 200.0;
/// Distance from the previous fix above which a point is flagged as a jump.
pub const MAX_JUMP_M: f64 = 1000.0;
/// Gaps up to this long are filled by [`interpolate_gps`].
pub const MAX_INTERPOLATION_GAP_MS: i64 = 10_000;

const HEADER_PREFIX: &str = "GPS;";
const DATA_FIELDS: usize = 10;
const NO_SIGNAL_PHRASES: &[&str] = &["sin datos gps", "sin señal", "no gps"];

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse a GPS log buffer.
///
/// The session date comes from `session_date_hint` if given, else from the
/// `GPS;` header, else from the first data line's date field. Receiver (UTC)
/// clock readings are converted to local time with `timezone`.
pub fn parse_gps(
    buffer: &[u8],
    session_date_hint: Option<NaiveDate>,
    timezone: &TimezoneHandler,
) -> Result<GpsReport> {
    let text = decode_buffer(buffer)?;
    let scan = numbered_lines(&text).fold(
        GpsScan::new(session_date_hint, timezone),
        |scan, (n, line)| scan.consume(n, line),
    );
    let report = scan.finish();

    debug!(
        "GPS: {} data lines, {} valid, {} no signal, {} rejected, {} jumps",
        report.stats.total,
        report.stats.valid,
        report.stats.no_signal,
        report.stats.total - report.stats.valid - report.stats.no_signal,
        report.stats.jumps,
    );
    Ok(report)
}

/// Fill gaps of more than 1 s and at most 10 s between consecutive points
/// with synthesised 1 Hz points.
///
/// Latitude, longitude, altitude and speed are interpolated linearly; the
/// synthetic points carry `interpolated = true` and `fix = "1"`.
pub fn interpolate_gps(points: &[GpsPoint]) -> Vec<GpsPoint> {
    let mut out = Vec::with_capacity(points.len());
    for (idx, point) in points.iter().enumerate() {
        out.push(point.clone());
        let Some(next) = points.get(idx + 1) else {
            continue;
        };
        let gap_ms = (next.timestamp - point.timestamp).num_milliseconds();
        if gap_ms <= 1000 || gap_ms > MAX_INTERPOLATION_GAP_MS {
            continue;
        }

        let mut step = 1;
        loop {
            let timestamp = point.timestamp + Duration::seconds(step);
            if timestamp >= next.timestamp {
                break;
            }
            let frac = (step * 1000) as f64 / gap_ms as f64;
            out.push(GpsPoint {
                timestamp,
                latitude: lerp(point.latitude, next.latitude, frac),
                longitude: lerp(point.longitude, next.longitude, frac),
                altitude: lerp(point.altitude, next.altitude, frac),
                hdop: point.hdop,
                fix: "1".to_string(),
                satellites: point.satellites,
                speed: lerp(point.speed, next.speed, frac),
                interpolated: true,
                line_number: 0,
            });
            step += 1;
        }
    }

    if out.len() > points.len() {
        debug!("GPS interpolation added {} points", out.len() - points.len());
    }
    out
}

fn lerp(a: f64, b: f64, frac: f64) -> f64 {
    (b - a).mul_add(frac, a)
}

// ── Line evaluation ───────────────────────────────────────────────────────────

/// Result of evaluating one data line against the validation pipeline.
#[derive(Debug)]
enum LineOutcome {
    Accepted {
        point: GpsPoint,
        warning: Option<ParseProblem>,
    },
    Rejected(ParseProblem),
}

/// The ten comma-separated fields of a data line, still raw.
struct RawFix<'a> {
    raspberry_time: Option<NaiveTime>,
    date: Option<NaiveDate>,
    gps_time: Option<NaiveTime>,
    fields: Vec<&'a str>,
}

impl<'a> RawFix<'a> {
    fn split(line: &'a str) -> Option<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < DATA_FIELDS {
            return None;
        }
        Some(Self {
            raspberry_time: clock_field(fields[0]),
            date: parse_dmy(fields[1]),
            gps_time: clock_field(fields[2]),
            fields,
        })
    }
}

/// Parse `Hora Raspberry-HH:MM:SS` / `Hora GPS-HH:MM:SS` style fields.
fn clock_field(field: &str) -> Option<NaiveTime> {
    let value = field.rsplit_once('-').map_or(field, |(_, t)| t);
    parse_hms(value)
}

fn is_no_signal(line: &str) -> bool {
    let lower = line.to_lowercase();
    NO_SIGNAL_PHRASES.iter().any(|p| lower.contains(p))
}

fn is_column_header(line: &str) -> bool {
    line.to_lowercase().contains("latitud")
}

// ── Scan accumulator ──────────────────────────────────────────────────────────

struct GpsScan<'tz> {
    date: Option<NaiveDate>,
    timezone: &'tz TimezoneHandler,
    last: Option<(NaiveDateTime, f64, f64)>,
    points: Vec<GpsPoint>,
    problems: Vec<ParseProblem>,
    stats: GpsStats,
}

impl<'tz> GpsScan<'tz> {
    fn new(session_date_hint: Option<NaiveDate>, timezone: &'tz TimezoneHandler) -> Self {
        Self {
            date: session_date_hint,
            timezone,
            last: None,
            points: Vec::new(),
            problems: Vec::new(),
            stats: GpsStats::default(),
        }
    }

    fn consume(mut self, line_number: usize, line: &str) -> Self {
        if line.to_ascii_uppercase().starts_with(HEADER_PREFIX) {
            if self.date.is_none() {
                self.date = find_dmy_date(line);
            }
            return self;
        }
        if is_column_header(line) {
            return self;
        }

        self.stats.total += 1;
        if is_no_signal(line) {
            self.stats.no_signal += 1;
            self.problems.push(ParseProblem::new(
                ProblemKind::NoSignal,
                line_number,
                "no GPS signal",
            ));
            return self;
        }

        match self.evaluate(line_number, line) {
            LineOutcome::Accepted { point, warning } => {
                if let Some(warning) = warning {
                    self.stats.jumps += 1;
                    self.problems.push(warning);
                }
                self.stats.valid += 1;
                self.last = Some((point.timestamp, point.latitude, point.longitude));
                self.points.push(point);
            }
            LineOutcome::Rejected(problem) => {
                self.count_rejection(problem.kind);
                self.problems.push(problem);
            }
        }
        self
    }

    fn count_rejection(&mut self, kind: ProblemKind) {
        match kind {
            ProblemKind::InvalidFormat => self.stats.invalid_format += 1,
            ProblemKind::ZeroCoordinates | ProblemKind::InvalidCoordinates => {
                self.stats.invalid_coordinates += 1
            }
            ProblemKind::InvalidSpeed => self.stats.invalid_speed += 1,
            ProblemKind::OutOfRegion => self.stats.out_of_region += 1,
            ProblemKind::InvalidTimestamp => self.stats.invalid_timestamp += 1,
            _ => {}
        }
    }

    fn evaluate(&mut self, line_number: usize, line: &str) -> LineOutcome {
        let reject = |kind, description: String| {
            LineOutcome::Rejected(ParseProblem::new(kind, line_number, description))
        };

        let Some(raw) = RawFix::split(line) else {
            return reject(
                ProblemKind::InvalidFormat,
                format!("expected {} comma-separated fields", DATA_FIELDS),
            );
        };
        let (Some(latitude), Some(longitude)) =
            (parse_number(raw.fields[3]), parse_number(raw.fields[4]))
        else {
            return reject(
                ProblemKind::InvalidFormat,
                format!("non-numeric coordinates '{}', '{}'", raw.fields[3], raw.fields[4]),
            );
        };

        if latitude == 0.0 || longitude == 0.0 {
            return reject(ProblemKind::ZeroCoordinates, "zero coordinates".to_string());
        }
        if !is_valid_coordinate(latitude, longitude) {
            return reject(
                ProblemKind::InvalidCoordinates,
                format!("coordinates out of range ({}, {})", latitude, longitude),
            );
        }

        let speed = parse_number(raw.fields[9]).unwrap_or(0.0);
        if speed > MAX_SPEED_KMH {
            return reject(
                ProblemKind::InvalidSpeed,
                format!("speed {:.1} km/h exceeds {}", speed, MAX_SPEED_KMH),
            );
        }
        if !OPERATING_REGION.contains(latitude, longitude) {
            return reject(
                ProblemKind::OutOfRegion,
                format!("({}, {}) outside operating region", latitude, longitude),
            );
        }

        if self.date.is_none() {
            self.date = raw.date;
        }
        let Some(timestamp) = self.resolve_timestamp(&raw) else {
            return reject(
                ProblemKind::InvalidTimestamp,
                "no usable raspberry or receiver clock".to_string(),
            );
        };

        let warning = self.last.and_then(|(_, prev_lat, prev_lon)| {
            let distance = haversine_distance_m(prev_lat, prev_lon, latitude, longitude);
            (distance > MAX_JUMP_M).then(|| {
                ParseProblem::new(
                    ProblemKind::GpsJump,
                    line_number,
                    format!("jump of {:.0} m from previous fix", distance),
                )
            })
        });

        let point = GpsPoint {
            timestamp,
            latitude,
            longitude,
            altitude: parse_number(raw.fields[5]).unwrap_or(0.0),
            hdop: parse_number(raw.fields[6]),
            fix: raw.fields[7].to_string(),
            satellites: raw.fields[8].parse().unwrap_or(0),
            speed,
            interpolated: false,
            line_number,
        };
        LineOutcome::Accepted { point, warning }
    }

    /// Raspberry clock on the session date, rolling over midnight; failing
    /// that, the receiver's UTC clock converted to local time.
    fn resolve_timestamp(&mut self, raw: &RawFix<'_>) -> Option<NaiveDateTime> {
        let previous = self.last.map(|(ts, _, _)| ts);
        if let (Some(date), Some(time)) = (self.date, raw.raspberry_time) {
            let timestamp = combine_with_rollover(date, time, previous);
            self.date = Some(timestamp.date());
            return Some(timestamp);
        }
        let utc_date = raw.date.or(self.date)?;
        let gps_time = raw.gps_time?;
        Some(self.timezone.utc_to_local(utc_date.and_time(gps_time)))
    }

    fn finish(mut self) -> GpsReport {
        self.points.sort_by_key(|p| p.timestamp);
        GpsReport {
            records: self.points,
            problems: self.problems,
            stats: self.stats,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "GPS;01/10/2025-09:30:00;DOBACK024;Sesión:1";
    const COLUMNS: &str = "HoraRaspberry,Fecha,Hora(GPS),Latitud,Longitud,Altitud,HDOP,Fix,NumSats,Velocidad(km/h)";

    fn line(time: &str, lat: f64, lon: f64, speed: f64) -> String {
        format!("Hora Raspberry-{time},01/10/2025,Hora GPS-07:00:00,{lat},{lon},650.5,1.2,1,8,{speed}")
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn parse(text: &str) -> GpsReport {
        parse_gps(text.as_bytes(), None, &TimezoneHandler::default()).unwrap()
    }

    fn point(t: NaiveDateTime, lat: f64, speed: f64) -> GpsPoint {
        GpsPoint {
            timestamp: t,
            latitude: lat,
            longitude: -3.7,
            altitude: 600.0,
            hdop: Some(1.0),
            fix: "1".to_string(),
            satellites: 9,
            speed,
            interpolated: false,
            line_number: 1,
        }
    }

    // ── acceptance ────────────────────────────────────────────────────────

    #[test]
    fn test_valid_line_fields() {
        let text = format!("{HEADER}\n{COLUMNS}\n{}", line("10:00:00", 40.4168, -3.7038, 35.5));
        let report = parse(&text);

        assert_eq!(report.records.len(), 1);
        let p = &report.records[0];
        assert_eq!(p.timestamp, ts(10, 0, 0));
        assert!((p.latitude - 40.4168).abs() < 1e-9);
        assert!((p.longitude + 3.7038).abs() < 1e-9);
        assert!((p.altitude - 650.5).abs() < 1e-9);
        assert_eq!(p.hdop, Some(1.2));
        assert_eq!(p.fix, "1");
        assert_eq!(p.satellites, 8);
        assert!((p.speed - 35.5).abs() < 1e-9);
        assert!(!p.interpolated);
        assert_eq!(p.line_number, 3);
        assert_eq!(report.stats.total, 1);
        assert_eq!(report.stats.valid, 1);
    }

    // ── rejection pipeline ────────────────────────────────────────────────

    #[test]
    fn test_rejections_by_kind() {
        let text = [
            HEADER.to_string(),
            line("10:00:00", 0.0, -3.7, 10.0),
            line("10:00:01", 95.0, -3.7, 10.0),
            line("10:00:02", 50.0, -3.7, 10.0),
            line("10:00:03", 40.4, -3.7, 250.0),
            "Hora Raspberry-10:00:04,01/10/2025,Hora GPS-08:00:04,abc,-3.7,1,1,1,1,1".to_string(),
            "Hora Raspberry-10:00:05,01/10/2025".to_string(),
        ]
        .join("\n");
        let report = parse(&text);

        assert!(report.records.is_empty());
        let kinds: Vec<_> = report.problems.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProblemKind::ZeroCoordinates,
                ProblemKind::InvalidCoordinates,
                ProblemKind::OutOfRegion,
                ProblemKind::InvalidSpeed,
                ProblemKind::InvalidFormat,
                ProblemKind::InvalidFormat,
            ]
        );
        assert_eq!(report.stats.invalid_coordinates, 2);
        assert_eq!(report.stats.out_of_region, 1);
        assert_eq!(report.stats.invalid_speed, 1);
        assert_eq!(report.stats.invalid_format, 2);
        assert_eq!(report.stats.total, 6);
    }

    #[test]
    fn test_no_signal_lines() {
        let text = format!(
            "{HEADER}\nHora Raspberry-10:00:00,sin datos GPS\nSIN SEÑAL\n{}",
            line("10:00:02", 40.4, -3.7, 0.0)
        );
        let report = parse(&text);
        assert_eq!(report.stats.no_signal, 2);
        assert_eq!(report.count_of(ProblemKind::NoSignal), 2);
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_jump_flagged_but_kept() {
        let text = format!(
            "{HEADER}\n{}\n{}",
            line("10:00:00", 40.4168, -3.7038, 10.0),
            line("10:00:01", 41.3874, 2.1686, 10.0)
        );
        let report = parse(&text);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.stats.jumps, 1);
        assert_eq!(report.problems[0].kind, ProblemKind::GpsJump);
        assert!(!report.problems[0].kind.is_rejection());
    }

    // ── timestamps ────────────────────────────────────────────────────────

    #[test]
    fn test_hint_takes_precedence_over_header() {
        let text = format!("{HEADER}\n{}", line("10:00:00", 40.4, -3.7, 0.0));
        let hint = NaiveDate::from_ymd_opt(2025, 9, 30);
        let report = parse_gps(text.as_bytes(), hint, &TimezoneHandler::default()).unwrap();
        assert_eq!(report.records[0].timestamp.date(), hint.unwrap());
    }

    #[test]
    fn test_date_from_first_data_line_without_header() {
        let report = parse(&line("10:00:00", 40.4, -3.7, 0.0));
        assert_eq!(report.records[0].timestamp, ts(10, 0, 0));
    }

    #[test]
    fn test_raspberry_clock_midnight_rollover() {
        let text = format!(
            "{HEADER}\n{}\n{}",
            line("23:59:59", 40.4, -3.7, 0.0),
            line("00:00:01", 40.4, -3.7, 0.0)
        );
        let report = parse(&text);
        assert_eq!(
            report.records[1].timestamp,
            NaiveDate::from_ymd_opt(2025, 10, 2)
                .unwrap()
                .and_hms_opt(0, 0, 1)
                .unwrap()
        );
    }

    #[test]
    fn test_receiver_clock_fallback_converts_to_local() {
        let text = format!(
            "{HEADER}\nHora Raspberry-,01/10/2025,Hora GPS-08:15:00,40.4,-3.7,600,1.0,1,7,12"
        );
        let report = parse(&text);
        // Madrid is UTC+2 in October before the DST change.
        assert_eq!(report.records[0].timestamp, ts(10, 15, 0));
    }

    #[test]
    fn test_no_clock_is_invalid_timestamp() {
        let text = format!("{HEADER}\nHora Raspberry-,01/10/2025,Hora GPS-,40.4,-3.7,600,1.0,1,7,12");
        let report = parse(&text);
        assert!(report.records.is_empty());
        assert_eq!(report.stats.invalid_timestamp, 1);
        assert_eq!(report.problems[0].kind, ProblemKind::InvalidTimestamp);
    }

    // ── interpolation ─────────────────────────────────────────────────────

    #[test]
    fn test_interpolation_fills_six_second_gap() {
        let points = vec![point(ts(10, 0, 0), 40.0, 0.0), point(ts(10, 0, 6), 40.006, 60.0)];
        let out = interpolate_gps(&points);

        assert_eq!(out.len(), 7);
        let synthetic: Vec<_> = out.iter().filter(|p| p.interpolated).collect();
        assert_eq!(synthetic.len(), 5);
        assert!(synthetic.iter().all(|p| p.fix == "1"));
        assert_eq!(synthetic[0].timestamp, ts(10, 0, 1));
        assert_eq!(synthetic[4].timestamp, ts(10, 0, 5));
        assert!((synthetic[2].latitude - 40.003).abs() < 1e-9);
        assert!((synthetic[2].speed - 30.0).abs() < 1e-9);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_interpolation_skips_short_and_long_gaps() {
        let points = vec![
            point(ts(10, 0, 0), 40.0, 0.0),
            point(ts(10, 0, 1), 40.0, 0.0),
            point(ts(10, 0, 12), 40.0, 0.0),
        ];
        assert_eq!(interpolate_gps(&points).len(), 3);
    }

    #[test]
    fn test_interpolation_ten_second_gap_included() {
        let points = vec![point(ts(10, 0, 0), 40.0, 0.0), point(ts(10, 0, 10), 40.0, 0.0)];
        assert_eq!(interpolate_gps(&points).len(), 11);
    }
}
