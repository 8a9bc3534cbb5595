//! Emergency-beacon (rotativo) state log parser.

use chrono::{NaiveDate, NaiveDateTime};
use telemetry_core::error::Result;
use telemetry_core::models::{
    BeaconReport, BeaconState, BeaconStats, ParseProblem, ProblemKind, VALID_BEACON_KEYS,
};
use telemetry_core::time_utils::{combine_with_rollover, find_dmy_date, parse_dmy_hms, parse_hms};
use tracing::debug;

use super::{decode_buffer, numbered_lines, parse_number};

const HEADER_PREFIX: &str = "ROTATIVO;";
const COLUMN_HEADER_PREFIX: &str = "FECHA-HORA";

/// Parse a beacon log buffer.
///
/// Lines are `DD/MM/YYYY-HH:MM:SS;state[;key]`. A line carrying only a clock
/// reading is placed on the session date (`session_date_hint`, else the
/// `ROTATIVO;` header date).
pub fn parse_beacon(buffer: &[u8], session_date_hint: Option<NaiveDate>) -> Result<BeaconReport> {
    let text = decode_buffer(buffer)?;
    let mut date = session_date_hint;
    let mut previous: Option<NaiveDateTime> = None;
    let mut records = Vec::new();
    let mut problems = Vec::new();
    let mut stats = BeaconStats::default();

    for (line_number, line) in numbered_lines(&text) {
        let upper = line.to_ascii_uppercase();
        if upper.starts_with(HEADER_PREFIX) {
            if date.is_none() {
                date = find_dmy_date(line);
            }
            continue;
        }
        if upper.starts_with(COLUMN_HEADER_PREFIX) {
            continue;
        }

        stats.total += 1;
        let fields: Vec<&str> = line.trim_end_matches(';').split(';').map(str::trim).collect();
        if fields.len() < 2 {
            stats.invalid_format += 1;
            problems.push(ParseProblem::new(
                ProblemKind::InvalidFormat,
                line_number,
                "expected timestamp;state[;key]",
            ));
            continue;
        }

        let timestamp = parse_dmy_hms(fields[0]).or_else(|| {
            let time = parse_hms(fields[0])?;
            Some(combine_with_rollover(date?, time, previous))
        });
        let Some(timestamp) = timestamp else {
            stats.invalid_timestamp += 1;
            problems.push(ParseProblem::new(
                ProblemKind::InvalidTimestamp,
                line_number,
                format!("unparseable timestamp '{}'", fields[0]),
            ));
            continue;
        };

        let state = fields[1];
        if state != "0" && state != "1" {
            stats.invalid_state += 1;
            problems.push(ParseProblem::new(
                ProblemKind::InvalidState,
                line_number,
                format!("state '{}' is not 0 or 1", state),
            ));
            continue;
        }

        let key = match fields.get(2).filter(|k| !k.is_empty()) {
            Some(raw) => {
                let key = parse_key(raw);
                if key.is_none() {
                    stats.keys_ignored += 1;
                    debug!("Beacon line {}: ignoring key '{}'", line_number, raw);
                }
                key
            }
            None => None,
        };

        previous = Some(timestamp);
        stats.valid += 1;
        records.push(BeaconState {
            timestamp,
            state: state.to_string(),
            key,
            line_number,
        });
    }

    records.sort_by_key(|r: &BeaconState| r.timestamp);
    debug!(
        "Beacon: {} lines, {} valid, {} invalid state, {} invalid timestamp, {} keys ignored",
        stats.total, stats.valid, stats.invalid_state, stats.invalid_timestamp, stats.keys_ignored
    );
    Ok(BeaconReport {
        records,
        problems,
        stats,
    })
}

/// Accept a key whose integer value is one of the known operational modes.
fn parse_key(raw: &str) -> Option<u8> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 || !(0.0..=255.0).contains(&value) {
        return None;
    }
    let key = value as u8;
    VALID_BEACON_KEYS.contains(&key).then_some(key)
}
