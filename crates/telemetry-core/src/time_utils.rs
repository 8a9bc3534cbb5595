use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tracing::warn;

/// Local timezone of the fleet; the GPS receiver clock is UTC.
pub const DEFAULT_TIMEZONE: &str = "Europe/Madrid";

/// Hour drop that signals the clock wrapped past midnight.
pub const MIDNIGHT_ROLLOVER_HOURS: u32 = 12;

// ── Date / time fragments ─────────────────────────────────────────────────────

/// Parse a `DD/MM/YYYY` date.
pub fn parse_dmy(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y").ok()
}

/// Parse a compact `YYYYMMDD` date as used in log file names.
///
/// Exactly eight digits are required; chrono alone would accept `2025101`.
pub fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Parse an `HH:MM:SS` clock reading, optionally with fractional seconds.
pub fn parse_hms(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
        .ok()
}

/// Parse `DD/MM/YYYY HH:MM:SS` (stability headers) or `DD/MM/YYYY-HH:MM:SS`
/// (beacon lines).
pub fn parse_dmy_hms(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%d/%m/%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%d/%m/%Y-%H:%M:%S"))
        .ok()
}

/// Return the first `DD/MM/YYYY` date embedded anywhere in `line`.
pub fn find_dmy_date(line: &str) -> Option<NaiveDate> {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    let re = DATE_RE
        .get_or_init(|| Regex::new(r"(\d{2}/\d{2}/\d{4})").expect("regex is valid"));
    re.captures_iter(line)
        .find_map(|cap| parse_dmy(&cap[1]))
}

/// Return the clock time if `line` is a bare `HH:MM:SS` marker.
pub fn parse_marker_line(line: &str) -> Option<NaiveTime> {
    static MARKER_RE: OnceLock<Regex> = OnceLock::new();
    let re = MARKER_RE
        .get_or_init(|| Regex::new(r"^\d{1,2}:\d{2}:\d{2}$").expect("regex is valid"));
    let trimmed = line.trim().trim_end_matches(';');
    if re.is_match(trimmed) {
        parse_hms(trimmed)
    } else {
        None
    }
}

/// `true` when a clock reading at `hour` following one at `previous_hour`
/// means the clock wrapped past midnight.
pub fn crossed_midnight(previous_hour: u32, hour: u32) -> bool {
    previous_hour > hour && previous_hour - hour > MIDNIGHT_ROLLOVER_HOURS
}

/// Combine `date` and `time`, advancing one day if `time` wrapped past
/// midnight relative to `previous`.
pub fn combine_with_rollover(
    date: NaiveDate,
    time: NaiveTime,
    previous: Option<NaiveDateTime>,
) -> NaiveDateTime {
    let candidate = date.and_time(time);
    match previous {
        Some(prev) if crossed_midnight(prev.hour(), time.hour()) => prev
            .date()
            .succ_opt()
            .map(|next_day| next_day.and_time(time))
            .unwrap_or(candidate),
        _ => candidate,
    }
}

// ── TimezoneHandler ───────────────────────────────────────────────────────────

/// Converts receiver UTC clock readings to fleet-local wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct TimezoneHandler {
    local_tz: Tz,
}

impl Default for TimezoneHandler {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl TimezoneHandler {
    /// Create a handler for the given IANA timezone name.
    ///
    /// If `tz_name` is not a recognised IANA timezone, falls back to UTC
    /// and logs a warning.
    pub fn new(tz_name: &str) -> Self {
        let tz = tz_name.parse::<Tz>().unwrap_or_else(|_| {
            warn!(
                "TimezoneHandler: unrecognised timezone \"{}\", falling back to UTC",
                tz_name
            );
            Tz::UTC
        });
        Self { local_tz: tz }
    }

    /// Validate that `tz_name` is a recognised IANA timezone identifier.
    pub fn validate_timezone(tz_name: &str) -> bool {
        tz_name.parse::<Tz>().is_ok()
    }

    /// Convert a UTC wall-clock reading into local wall-clock time.
    pub fn utc_to_local(&self, utc: NaiveDateTime) -> NaiveDateTime {
        Utc.from_utc_datetime(&utc)
            .with_timezone(&self.local_tz)
            .naive_local()
    }

    pub fn local_tz(&self) -> Tz {
        self.local_tz
    }
}
