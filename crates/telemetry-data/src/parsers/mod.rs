//! Tolerant parsers for the three telemetry log formats.
//!
//! Every parser takes a complete byte buffer and returns a
//! [`ParseReport`](telemetry_core::models::ParseReport): the accepted records,
//! one [`ParseProblem`](telemetry_core::models::ParseProblem) per rejected or
//! flagged line, and counters. Only an undecodable buffer is an error.

use std::borrow::Cow;

use telemetry_core::error::{Result, TelemetryError};

pub mod beacon;
pub mod gps;
pub mod stability;

pub use beacon::parse_beacon;
pub use gps::{interpolate_gps, parse_gps};
pub use stability::parse_stability;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decode a log buffer into text.
///
/// UTF-8 is tried first (a leading BOM is dropped). Older units write
/// ISO-8859-1 headers (`Sesión`), so a non-UTF-8 buffer is decoded byte-wise
/// as Latin-1 unless it contains control bytes that never occur in a text
/// log, in which case it is rejected.
pub fn decode_buffer(buffer: &[u8]) -> Result<Cow<'_, str>> {
    let bytes = buffer.strip_prefix(UTF8_BOM).unwrap_or(buffer);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Cow::Borrowed(text)),
        Err(_) => {
            if let Some(pos) = bytes.iter().position(|&b| is_binary_byte(b)) {
                return Err(TelemetryError::Decode(format!(
                    "control byte 0x{:02x} at offset {}",
                    bytes[pos], pos
                )));
            }
            Ok(Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()))
        }
    }
}

fn is_binary_byte(b: u8) -> bool {
    (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 0x7f
}

/// Parse a finite decimal number, tolerating surrounding whitespace.
pub(crate) fn parse_number(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Iterate non-empty trimmed lines with their 1-based line numbers.
pub(crate) fn numbered_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_buffer_utf8() {
        let text = decode_buffer("ESTABILIDAD;Sesión:1;".as_bytes()).unwrap();
        assert!(matches!(text, Cow::Borrowed(_)));
        assert!(text.contains("Sesión"));
    }

    #[test]
    fn test_decode_buffer_strips_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"GPS;01/10/2025");
        assert_eq!(decode_buffer(&bytes).unwrap(), "GPS;01/10/2025");
    }

    #[test]
    fn test_decode_buffer_latin1_fallback() {
        // "Sesión" with ó encoded as a single ISO-8859-1 byte.
        let bytes = b"ESTABILIDAD;Sesi\xf3n:1;";
        let text = decode_buffer(bytes).unwrap();
        assert_eq!(text, "ESTABILIDAD;Sesión:1;");
    }

    #[test]
    fn test_decode_buffer_rejects_binary() {
        let bytes = [0xff, 0x00, 0x13, 0x37];
        let err = decode_buffer(&bytes).unwrap_err();
        assert!(matches!(err, TelemetryError::Decode(_)));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("-3"), Some(-3.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_numbered_lines_skips_blank_and_keeps_numbers() {
        let lines: Vec<_> = numbered_lines("a\n\n  b  \r\nc").collect();
        assert_eq!(lines, vec![(1, "a"), (3, "b"), (4, "c")]);
    }
}
