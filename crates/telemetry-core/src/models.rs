use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The three kinds of log a telemetry unit produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorType {
    /// Inertial stability sensor (`ESTABILIDAD` files).
    #[serde(rename = "ESTABILIDAD")]
    Stability,
    /// Satellite receiver (`GPS` files).
    #[serde(rename = "GPS")]
    Gps,
    /// Emergency-beacon state line (`ROTATIVO` files).
    #[serde(rename = "ROTATIVO")]
    Beacon,
}

impl SensorType {
    /// Prefix used in log file names and header lines.
    pub fn file_prefix(self) -> &'static str {
        match self {
            SensorType::Stability => "ESTABILIDAD",
            SensorType::Gps => "GPS",
            SensorType::Beacon => "ROTATIVO",
        }
    }

    /// Inverse of [`file_prefix`](Self::file_prefix), case-insensitive.
    pub fn from_file_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "ESTABILIDAD" => Some(SensorType::Stability),
            "GPS" => Some(SensorType::Gps),
            "ROTATIVO" => Some(SensorType::Beacon),
            _ => None,
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// Anything that sits on the device timeline and came from a source line.
pub trait Timestamped {
    /// Local wall-clock time of the record.
    fn timestamp(&self) -> NaiveDateTime;
    /// 1-based line number in the source buffer (0 for synthesised records).
    fn line_number(&self) -> usize;
}

// ── Measurements ──────────────────────────────────────────────────────────────

/// One inertial/orientation reading from the stability sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilitySample {
    pub timestamp: NaiveDateTime,
    /// Linear acceleration in m/s².
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    /// Angular rates as reported by the device.
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    /// Orientation in degrees.
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub timeantwifi: f64,
    /// Auxiliary duty-cycle fields `usciclo1..5`.
    pub usciclo: [f64; 5],
    /// Instability index on a 0–1 scale; lower is worse.
    pub si: f64,
    /// Acceleration magnitude in m/s².
    pub accmag: f64,
    pub microsds: f64,
    pub k3: f64,
    #[serde(default)]
    pub line_number: usize,
}

impl Timestamped for StabilitySample {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    fn line_number(&self) -> usize {
        self.line_number
    }
}

/// One satellite-fix reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub timestamp: NaiveDateTime,
    /// Degrees, WGS84.
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    pub altitude: f64,
    pub hdop: Option<f64>,
    /// `"1"` when the receiver reported a fix.
    pub fix: String,
    pub satellites: u32,
    /// Ground speed in km/h.
    pub speed: f64,
    /// `true` for points synthesised between two real fixes.
    #[serde(default)]
    pub interpolated: bool,
    #[serde(default)]
    pub line_number: usize,
}

impl Timestamped for GpsPoint {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    fn line_number(&self) -> usize {
        self.line_number
    }
}

/// Operational-mode keys a beacon line may carry.
pub const VALID_BEACON_KEYS: &[u8] = &[0, 1, 2, 3, 5];

/// One emergency-beacon state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconState {
    pub timestamp: NaiveDateTime,
    /// `"0"` (off) or `"1"` (on), as written in the log.
    pub state: String,
    /// Operational-mode key, one of [`VALID_BEACON_KEYS`].
    pub key: Option<u8>,
    #[serde(default)]
    pub line_number: usize,
}

impl BeaconState {
    /// Whether the beacon was active.
    pub fn is_on(&self) -> bool {
        self.state == "1"
    }
}

impl Timestamped for BeaconState {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    fn line_number(&self) -> usize {
        self.line_number
    }
}

// ── Parse reports ─────────────────────────────────────────────────────────────

/// Category of a rejected or flagged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// Data line seen before any time marker or date context.
    NoTimestamp,
    /// Wrong field count or non-numeric stability values.
    InvalidValues,
    /// Trailing gravity average is implausible (sample kept).
    PhysicalValidation,
    /// GPS line explicitly reporting no signal.
    NoSignal,
    /// GPS line that cannot be split into its fields or has non-numeric coordinates.
    InvalidFormat,
    ZeroCoordinates,
    InvalidCoordinates,
    InvalidSpeed,
    OutOfRegion,
    /// Implausible distance from the previous fix (point kept).
    GpsJump,
    InvalidTimestamp,
    /// Beacon state other than `"0"`/`"1"`.
    InvalidState,
}

impl ProblemKind {
    /// Returns `false` for warnings whose record is still kept.
    pub fn is_rejection(self) -> bool {
        !matches!(self, ProblemKind::PhysicalValidation | ProblemKind::GpsJump)
    }
}

/// A rejected or flagged source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseProblem {
    pub kind: ProblemKind,
    /// 1-based line number in the buffer.
    pub line_number: usize,
    pub description: String,
}

impl ParseProblem {
    pub fn new(kind: ProblemKind, line_number: usize, description: impl Into<String>) -> Self {
        Self {
            kind,
            line_number,
            description: description.into(),
        }
    }
}

/// Everything a parser extracted from one buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseReport<T, S> {
    /// Accepted records in timestamp order.
    pub records: Vec<T>,
    /// Rejected lines and non-fatal warnings, in line order.
    pub problems: Vec<ParseProblem>,
    pub stats: S,
}

impl<T, S> ParseReport<T, S> {
    /// Number of problems of the given kind.
    pub fn count_of(&self, kind: ProblemKind) -> usize {
        self.problems.iter().filter(|p| p.kind == kind).count()
    }
}

/// Counters for one stability buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityStats {
    /// Lines considered as data records.
    pub total: usize,
    pub valid: usize,
    pub no_timestamp: usize,
    pub invalid_values: usize,
    pub markers_seen: usize,
    /// Device identifier from the first session header, if any.
    pub device_id: Option<String>,
    /// Session numbers declared by `Sesión:<n>` headers, in file order.
    pub declared_sessions: Vec<u32>,
}

/// Counters for one GPS buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsStats {
    pub total: usize,
    pub valid: usize,
    pub no_signal: usize,
    pub invalid_format: usize,
    pub invalid_coordinates: usize,
    pub invalid_speed: usize,
    pub out_of_region: usize,
    pub jumps: usize,
    pub invalid_timestamp: usize,
}

/// Counters for one beacon buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconStats {
    pub total: usize,
    pub valid: usize,
    pub invalid_format: usize,
    pub invalid_state: usize,
    pub invalid_timestamp: usize,
    pub keys_ignored: usize,
}

pub type StabilityReport = ParseReport<StabilitySample, StabilityStats>;
pub type GpsReport = ParseReport<GpsPoint, GpsStats>;
pub type BeaconReport = ParseReport<BeaconState, BeaconStats>;

// ── Sessions ──────────────────────────────────────────────────────────────────

/// A contiguous run of one sensor type with no internal gap over the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSession {
    pub sensor: SensorType,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_secs: i64,
    pub sample_count: usize,
    /// Source-line range covered by the run.
    pub first_line: usize,
    pub last_line: usize,
    /// Number of detected runs fused into this one (1 for a plain run).
    #[serde(default = "one")]
    pub fragments: usize,
}

fn one() -> usize {
    1
}

impl DetectedSession {
    /// Whether `[start, end]` intersects `[from, to]`.
    pub fn overlaps(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.start <= to && self.end >= from
    }
}

/// An operational period fused from up to three per-sensor sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedSession {
    /// 1-based position after sorting by start time.
    pub session_number: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_secs: i64,
    pub stability: Option<DetectedSession>,
    pub gps: Option<DetectedSession>,
    pub beacon: Option<DetectedSession>,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    /// Tags such as `no_gps`, `stability_only` or `gps_fragments:3`.
    pub observations: Vec<String>,
}

impl CorrelatedSession {
    pub fn has_observation(&self, tag: &str) -> bool {
        self.observations.iter().any(|o| o == tag)
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// A stability sample joined with its nearest GPS fix and beacon state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSample {
    pub sample: StabilitySample,
    /// Zero when no fix was found inside the window.
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub beacon_on: bool,
    pub gps_matched: bool,
    pub beacon_matched: bool,
}

/// Severity tier of a stability event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Grave,
    Moderada,
    Leve,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Grave => "GRAVE",
            Severity::Moderada => "MODERADA",
            Severity::Leve => "LEVE",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geolocated, severity-tagged safety event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityEvent {
    pub timestamp: NaiveDateTime,
    pub severity: Severity,
    /// Comma-joined cause tags, e.g. `imminent_rollover,rollover_risk`.
    pub causes: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub gps_matched: bool,
    pub beacon_on: bool,
    pub sample: StabilitySample,
}

impl StabilityEvent {
    pub fn cause_tags(&self) -> impl Iterator<Item = &str> {
        self.causes.split(',')
    }
}
