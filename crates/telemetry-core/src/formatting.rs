/// Format a duration in seconds as a compact human-readable string.
///
/// # Examples
///
/// ```
/// use telemetry_core::formatting::format_duration;
///
/// assert_eq!(format_duration(45), "45s");
/// assert_eq!(format_duration(300), "5m");
/// assert_eq!(format_duration(2_430), "40m 30s");
/// assert_eq!(format_duration(7_200), "2h");
/// assert_eq!(format_duration(3_900), "1h 5m");
/// ```
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        return format!("{}s", seconds);
    }
    if seconds < 3_600 {
        let mins = seconds / 60;
        let secs = seconds % 60;
        return if secs == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m {}s", mins, secs)
        };
    }
    let hours = seconds / 3_600;
    let mins = (seconds % 3_600) / 60;
    if mins == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h {}m", hours, mins)
    }
}

/// Format a coordinate pair with six decimals (roughly 0.1 m).
///
/// ```
/// use telemetry_core::formatting::format_coordinates;
///
/// assert_eq!(format_coordinates(40.4168, -3.7038), "40.416800, -3.703800");
/// ```
pub fn format_coordinates(lat: f64, lon: f64) -> String {
    format!("{:.6}, {:.6}", lat, lon)
}

/// Calculate `(part / whole) * 100`, rounded to `decimal_places`.
///
/// Returns `0.0` if `whole` is zero to avoid division by zero.
pub fn percentage(part: f64, whole: f64, decimal_places: u32) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    let raw = (part / whole) * 100.0;
    let factor = 10_f64.powi(decimal_places as i32);
    (raw * factor).round() / factor
}

// ── Tests ──────────────────────────────────────────────────────────────────────
