use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the telemetry crates.
///
/// Data-quality issues inside a log file are never errors; they are reported
/// as [`ParseProblem`](crate::models::ParseProblem) values next to the parsed
/// records.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A raw buffer could not be decoded as text.
    #[error("Buffer is not decodable as text: {0}")]
    Decode(String),

    /// A log file name does not follow `TYPE_VEHICLEID_YYYYMMDD.txt`.
    #[error("Unrecognised log file name: {0}")]
    InvalidFileName(String),

    /// A JSON document could not be parsed or written.
    #[error("Failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The expected data directory does not exist.
    #[error("Data path not found: {0}")]
    DataPathNotFound(PathBuf),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the telemetry crates.
pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = TelemetryError::FileRead {
            path: PathBuf::from("/data/GPS_DOBACK024_20251001.txt"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("GPS_DOBACK024_20251001.txt"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_error_display_decode() {
        let err = TelemetryError::Decode("NUL byte at offset 12".to_string());
        assert_eq!(
            err.to_string(),
            "Buffer is not decodable as text: NUL byte at offset 12"
        );
    }

    #[test]
    fn test_error_display_invalid_file_name() {
        let err = TelemetryError::InvalidFileName("notes.txt".to_string());
        assert_eq!(err.to_string(), "Unrecognised log file name: notes.txt");
    }

    #[test]
    fn test_error_display_data_path_not_found() {
        let err = TelemetryError::DataPathNotFound(PathBuf::from("/missing/dir"));
        assert_eq!(err.to_string(), "Data path not found: /missing/dir");
    }

    #[test]
    fn test_error_display_config() {
        let err = TelemetryError::Config("concurrency must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: concurrency must be positive"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TelemetryError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: TelemetryError = json_err.into();
        assert!(err.to_string().contains("Failed to process JSON"));
    }
}
