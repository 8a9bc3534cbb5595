//! Per-group analysis pipeline.
//!
//! Runs one vehicle-day through every stage: parse, interpolate GPS, detect
//! per-sensor sessions, correlate them, then enrich and classify the samples
//! of every valid session. Returns an [`AnalysisResult`] ready for storage.
//!
//! Every stability sample is classified at most once: an anchored session
//! owns the samples of its own stability run, and a session without one only
//! takes samples no anchored session owns.

use std::borrow::Cow;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use telemetry_core::error::Result;
use telemetry_core::models::{
    BeaconState, BeaconStats, CorrelatedSession, DetectedSession, GpsPoint, GpsStats,
    ParseProblem, ParseReport, SensorType, StabilityEvent, StabilitySample, StabilityStats,
};
use telemetry_core::settings::PipelineConfig;
use telemetry_core::time_utils::TimezoneHandler;
use tracing::{debug, info};

use crate::classifier::{classify, ClassifierThresholds};
use crate::correlator::{correlate, CorrelationConfig, CorrelationStats};
use crate::detector::{detect_sessions_in, DetectionConfig};
use crate::parsers::{interpolate_gps, parse_beacon, parse_gps, parse_stability};
use crate::point_correlator::{enrich, window, window_range, EnrichmentStats, DEFAULT_MAX_DIFF_MS};
use crate::reader::GroupInputs;

// ── Public types ──────────────────────────────────────────────────────────────

/// Every tunable of the pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub detection: DetectionConfig,
    pub correlation: CorrelationConfig,
    /// Nearest-neighbour window for point enrichment.
    pub max_diff_ms: i64,
    pub timezone: TimezoneHandler,
    pub thresholds: ClassifierThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            correlation: CorrelationConfig::default(),
            max_diff_ms: DEFAULT_MAX_DIFF_MS,
            timezone: TimezoneHandler::default(),
            thresholds: ClassifierThresholds::default(),
        }
    }
}

impl From<&PipelineConfig> for AnalysisConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            detection: DetectionConfig::from(config),
            correlation: CorrelationConfig::from(config),
            max_diff_ms: config.max_diff_ms,
            timezone: TimezoneHandler::new(&config.timezone),
            thresholds: ClassifierThresholds::default(),
        }
    }
}

/// Parse outcome of one source file, without the records themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary<S> {
    pub records: usize,
    pub stats: S,
    pub problems: Vec<ParseProblem>,
}

impl<T, S> From<ParseReport<T, S>> for SourceSummary<S> {
    fn from(report: ParseReport<T, S>) -> Self {
        Self {
            records: report.records.len(),
            stats: report.stats,
            problems: report.problems,
        }
    }
}

/// Per-sensor sessions before correlation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedSessions {
    pub stability: Vec<DetectedSession>,
    pub gps: Vec<DetectedSession>,
    pub beacon: Vec<DetectedSession>,
}

/// One correlated session and what was found inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: CorrelatedSession,
    /// `None` for invalid sessions, which are not enriched.
    pub enrichment: Option<EnrichmentStats>,
    pub events: Vec<StabilityEvent>,
}

/// Metadata produced alongside the analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// ISO-8601 timestamp when this result was generated.
    pub generated_at: String,
    pub stability_samples: usize,
    pub gps_points: usize,
    /// Points added by 1 Hz interpolation.
    pub gps_interpolated: usize,
    pub beacon_states: usize,
    pub sessions_correlated: usize,
    pub valid_sessions: usize,
    pub events_detected: usize,
    /// Wall-clock seconds spent decoding and parsing buffers.
    pub parse_time_seconds: f64,
    /// Wall-clock seconds spent detecting and correlating sessions.
    pub correlate_time_seconds: f64,
    /// Wall-clock seconds spent enriching and classifying samples.
    pub classify_time_seconds: f64,
}

/// The complete output of [`analyze_group`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub vehicle: String,
    pub date: NaiveDate,
    pub stability: Option<SourceSummary<StabilityStats>>,
    pub gps: Option<SourceSummary<GpsStats>>,
    pub beacon: Option<SourceSummary<BeaconStats>>,
    pub detected: DetectedSessions,
    pub sessions: Vec<SessionReport>,
    pub correlation: CorrelationStats,
    pub warnings: Vec<String>,
    pub metadata: AnalysisMetadata,
}

impl AnalysisResult {
    pub fn events(&self) -> impl Iterator<Item = &StabilityEvent> {
        self.sessions.iter().flat_map(|s| s.events.iter())
    }
}

// ── Public function ───────────────────────────────────────────────────────────

/// Run the full pipeline over one vehicle-day.
///
/// The group date is the session-date hint for all three parsers. Fails only
/// when a buffer cannot be decoded.
pub fn analyze_group(inputs: &GroupInputs, config: &AnalysisConfig) -> Result<AnalysisResult> {
    let hint = Some(inputs.date);

    // ── Step 1: Parse ─────────────────────────────────────────────────────────
    let parse_start = Instant::now();
    let stability = inputs
        .stability
        .as_deref()
        .map(|buf| parse_stability(buf, hint))
        .transpose()?;
    let gps = inputs
        .gps
        .as_deref()
        .map(|buf| parse_gps(buf, hint, &config.timezone))
        .transpose()?;
    let beacon = inputs
        .beacon
        .as_deref()
        .map(|buf| parse_beacon(buf, hint))
        .transpose()?;

    let samples: &[StabilitySample] = stability
        .as_ref()
        .map(|r| r.records.as_slice())
        .unwrap_or_default();
    let fixes: &[GpsPoint] = gps.as_ref().map(|r| r.records.as_slice()).unwrap_or_default();
    let states: &[BeaconState] = beacon
        .as_ref()
        .map(|r| r.records.as_slice())
        .unwrap_or_default();
    let dense_fixes = interpolate_gps(fixes);
    let parse_time = parse_start.elapsed().as_secs_f64();

    // ── Step 2: Detect and correlate ──────────────────────────────────────────
    let correlate_start = Instant::now();
    let detected = DetectedSessions {
        stability: detect_sessions_in(samples, SensorType::Stability, &config.detection),
        gps: detect_sessions_in(fixes, SensorType::Gps, &config.detection),
        beacon: detect_sessions_in(states, SensorType::Beacon, &config.detection),
    };
    let outcome = correlate(
        &detected.stability,
        &detected.gps,
        &detected.beacon,
        &config.correlation,
    );
    let correlate_time = correlate_start.elapsed().as_secs_f64();

    // ── Step 3: Enrich and classify ───────────────────────────────────────────
    let classify_start = Instant::now();
    let pad = TimeDelta::milliseconds(config.max_diff_ms);
    let mut owned = vec![false; samples.len()];
    for anchor in outcome
        .sessions
        .iter()
        .filter(|s| s.is_valid)
        .filter_map(|s| s.stability.as_ref())
    {
        owned[window_range(samples, anchor.start, anchor.end)].fill(true);
    }
    let sessions: Vec<SessionReport> = outcome
        .sessions
        .into_iter()
        .map(|session| {
            if !session.is_valid {
                return SessionReport {
                    session,
                    enrichment: None,
                    events: Vec::new(),
                };
            }
            let in_session: Cow<'_, [StabilitySample]> = match &session.stability {
                Some(anchor) => Cow::Borrowed(window(samples, anchor.start, anchor.end)),
                None => Cow::Owned(claim_unowned(samples, &mut owned, session.start, session.end)),
            };
            let nearby_fixes = window(&dense_fixes, session.start - pad, session.end + pad);
            let nearby_states = window(states, session.start - pad, session.end + pad);
            let enrichment = enrich(&in_session, nearby_fixes, nearby_states, config.max_diff_ms);
            let events = classify(&enrichment.enriched, &config.thresholds);
            SessionReport {
                session,
                enrichment: Some(enrichment.stats),
                events,
            }
        })
        .collect();
    let classify_time = classify_start.elapsed().as_secs_f64();

    // ── Step 4: Build result ──────────────────────────────────────────────────
    let metadata = AnalysisMetadata {
        generated_at: Utc::now().to_rfc3339(),
        stability_samples: samples.len(),
        gps_points: fixes.len(),
        gps_interpolated: dense_fixes.len() - fixes.len(),
        beacon_states: states.len(),
        sessions_correlated: sessions.len(),
        valid_sessions: sessions.iter().filter(|s| s.session.is_valid).count(),
        events_detected: sessions.iter().map(|s| s.events.len()).sum(),
        parse_time_seconds: parse_time,
        correlate_time_seconds: correlate_time,
        classify_time_seconds: classify_time,
    };

    info!(
        "{} {}: {} sessions ({} valid), {} events",
        inputs.vehicle,
        inputs.date,
        metadata.sessions_correlated,
        metadata.valid_sessions,
        metadata.events_detected
    );
    debug!(
        "{} {}: parse {:.3}s, correlate {:.3}s, classify {:.3}s",
        inputs.vehicle, inputs.date, parse_time, correlate_time, classify_time
    );

    Ok(AnalysisResult {
        vehicle: inputs.vehicle.clone(),
        date: inputs.date,
        stability: stability.map(SourceSummary::from),
        gps: gps.map(SourceSummary::from),
        beacon: beacon.map(SourceSummary::from),
        detected,
        sessions,
        correlation: outcome.stats,
        warnings: outcome.warnings,
        metadata,
    })
}

/// Samples inside `[start, end]` not yet owned by another session; marks
/// them owned.
fn claim_unowned(
    samples: &[StabilitySample],
    owned: &mut [bool],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<StabilitySample> {
    let range = window_range(samples, start, end);
    samples[range.clone()]
        .iter()
        .zip(&mut owned[range])
        .filter_map(|(sample, taken)| {
            if *taken {
                return None;
            }
            *taken = true;
            Some(sample.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};
    use telemetry_core::error::TelemetryError;
    use telemetry_core::models::Severity;

    const RUN_SECS: i64 = 40 * 60;
    const DIP_SECS: i64 = 20 * 60;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()
    }

    fn start() -> NaiveDateTime {
        date().and_hms_opt(10, 0, 0).unwrap()
    }

    fn stability_line(si: &str, roll: f64) -> String {
        format!("12; -8; 981; 1.0; 0.5; 2.0; {roll}; 0.8; 90.0; 10; 1; 2; 3; 4; 5; {si}; 982; 0; 0;")
    }

    /// One sample per second over each `[from, to)` span (seconds after
    /// 10:00), a marker before each, and a single sample at `dip` whose raw
    /// `si` field reads 0.15.
    fn stability_spans(spans: &[(i64, i64)], dip: i64) -> Vec<u8> {
        let mut text = String::from("ESTABILIDAD;01/10/2025 10:00:00;DOBACK024;Sesión:1;\n");
        text.push_str("ax; ay; az; gx; gy; gz; roll; pitch; yaw; timeantwifi; usciclo1; usciclo2; usciclo3; usciclo4; usciclo5; si; accmag; microsds; k3\n");
        for &(from, to) in spans {
            for i in from..to {
                if i > 0 {
                    let t = start() + Duration::seconds(i);
                    text.push_str(&format!("{}\n", t.format("%H:%M:%S")));
                }
                let line = if i == dip {
                    stability_line("0.15", 12.0)
                } else {
                    stability_line("85", 1.0)
                };
                text.push_str(&line);
                text.push('\n');
            }
        }
        text.into_bytes()
    }

    fn stability_buffer() -> Vec<u8> {
        stability_spans(&[(0, RUN_SECS)], DIP_SECS)
    }

    fn gps_lat(i: i64) -> f64 {
        40.4 + i as f64 * 0.00001
    }

    fn gps_span(from: i64, to: i64) -> Vec<u8> {
        let mut text = String::from("GPS;01/10/2025-10:00:00;DOBACK024;Sesión:1\n");
        text.push_str("HoraRaspberry,Fecha,Hora(GPS),Latitud,Longitud,Altitud,HDOP,Fix,NumSats,Velocidad(km/h)\n");
        for i in from..to {
            let local = start() + Duration::seconds(i);
            let utc = local - Duration::hours(2);
            text.push_str(&format!(
                "Hora Raspberry-{},01/10/2025,Hora GPS-{},{:.5},-3.70000,650.0,0.9,1,9,45.0\n",
                local.format("%H:%M:%S"),
                utc.format("%H:%M:%S"),
                gps_lat(i)
            ));
        }
        text.into_bytes()
    }

    fn gps_buffer() -> Vec<u8> {
        gps_span(0, RUN_SECS)
    }

    fn beacon_buffer() -> Vec<u8> {
        let mut text = String::from("ROTATIVO;01/10/2025-10:00:00;DOBACK024;Sesión:1\nFecha-Hora;Estado;Clave\n");
        for i in (0..=RUN_SECS).step_by(30) {
            let t = start() + Duration::seconds(i);
            text.push_str(&format!("{};1;2\n", t.format("%d/%m/%Y-%H:%M:%S")));
        }
        text.into_bytes()
    }

    fn inputs() -> GroupInputs {
        GroupInputs {
            vehicle: "DOBACK024".to_string(),
            date: date(),
            stability: Some(stability_buffer()),
            gps: Some(gps_buffer()),
            beacon: Some(beacon_buffer()),
        }
    }

    // ── end-to-end ────────────────────────────────────────────────────────

    #[test]
    fn test_end_to_end_single_rollover_event() {
        let result = analyze_group(&inputs(), &AnalysisConfig::default()).unwrap();

        assert_eq!(result.detected.stability.len(), 1);
        assert_eq!(result.detected.gps.len(), 1);
        assert_eq!(result.detected.beacon.len(), 1);
        assert_eq!(result.sessions.len(), 1);

        let report = &result.sessions[0];
        assert!(report.session.is_valid);
        assert!(report.session.observations.is_empty());
        assert_eq!(report.session.start, start());

        let events: Vec<_> = result.events().collect();
        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.severity, Severity::Grave);
        assert_eq!(event.causes, "imminent_rollover,rollover_risk");
        assert_eq!(event.timestamp, start() + Duration::seconds(DIP_SECS));
        assert!(event.gps_matched);
        assert!(event.beacon_on);
        assert!((event.latitude - gps_lat(DIP_SECS)).abs() < 1e-9);
        assert!((event.longitude + 3.7).abs() < 1e-9);
        assert!((event.speed - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_end_to_end_metadata_and_summaries() {
        let result = analyze_group(&inputs(), &AnalysisConfig::default()).unwrap();
        let meta = &result.metadata;

        assert_eq!(meta.stability_samples, RUN_SECS as usize);
        assert_eq!(meta.gps_points, RUN_SECS as usize);
        assert_eq!(meta.gps_interpolated, 0);
        assert_eq!(meta.beacon_states, 81);
        assert_eq!(meta.valid_sessions, 1);
        assert_eq!(meta.events_detected, 1);

        let stability = result.stability.as_ref().unwrap();
        assert_eq!(stability.records, RUN_SECS as usize);
        assert_eq!(stability.stats.device_id.as_deref(), Some("DOBACK024"));
        assert!(stability.problems.is_empty());
        assert_eq!(result.gps.as_ref().unwrap().stats.jumps, 0);

        let enrichment = result.sessions[0].enrichment.unwrap();
        assert_eq!(enrichment.total, RUN_SECS as usize);
        assert_eq!(enrichment.without_gps, 0);
    }

    // ── sample ownership ──────────────────────────────────────────────────

    #[test]
    fn test_fused_gps_overlap_does_not_duplicate_events() {
        // Stability runs 10:00-10:10 and 10:16-10:40; GPS 10:14-10:30 is
        // claimed by the first run, stretching it over the dip at 10:20.
        let inputs = GroupInputs {
            stability: Some(stability_spans(&[(0, 600), (960, RUN_SECS)], DIP_SECS)),
            gps: Some(gps_span(840, 1800)),
            beacon: None,
            ..inputs()
        };
        let result = analyze_group(&inputs, &AnalysisConfig::default()).unwrap();

        assert_eq!(result.detected.stability.len(), 2);
        assert_eq!(result.sessions.len(), 2);
        let first = &result.sessions[0];
        let second = &result.sessions[1];
        assert!(first.session.is_valid && second.session.is_valid);
        assert!(first.session.gps.is_some());
        assert!(first.session.end > start() + Duration::seconds(DIP_SECS));

        assert!(first.events.is_empty());
        assert_eq!(second.events.len(), 1);
        assert_eq!(result.metadata.events_detected, 1);

        let enriched: usize = result
            .sessions
            .iter()
            .filter_map(|s| s.enrichment)
            .map(|e| e.total)
            .sum();
        assert_eq!(enriched, result.metadata.stability_samples);
        assert_eq!(first.enrichment.unwrap().total, 600);
    }

    #[test]
    fn test_beacon_only_session_takes_unowned_samples() {
        // Five samples are too few for a stability session; the beacon
        // session covering them still classifies them once.
        let inputs = GroupInputs {
            stability: Some(stability_spans(&[(0, 5)], 2)),
            gps: None,
            beacon: Some(beacon_buffer()),
            ..inputs()
        };
        let result = analyze_group(&inputs, &AnalysisConfig::default()).unwrap();

        assert!(result.detected.stability.is_empty());
        assert_eq!(result.sessions.len(), 1);
        let report = &result.sessions[0];
        assert!(report.session.is_valid);
        assert!(report.session.has_observation("beacon_only"));
        assert_eq!(report.enrichment.unwrap().total, 5);
        assert_eq!(report.events.len(), 1);
        assert!(!report.events[0].gps_matched);
    }

    #[test]
    fn test_claim_unowned_skips_owned_samples() {
        let text = stability_spans(&[(0, 10)], -1);
        let samples = crate::parsers::parse_stability(&text, Some(date())).unwrap().records;
        let mut owned = vec![false; samples.len()];
        owned[2..5].fill(true);

        let end = start() + Duration::seconds(6);
        let claimed = claim_unowned(&samples, &mut owned, start(), end);
        assert_eq!(claimed.len(), 4);
        assert!(owned[..7].iter().all(|&o| o));
        assert!(!owned[7]);
        assert!(claim_unowned(&samples, &mut owned, start(), end).is_empty());
    }

    #[test]
    fn test_gps_only_group_has_no_valid_sessions() {
        let inputs = GroupInputs {
            stability: None,
            beacon: None,
            ..inputs()
        };
        let result = analyze_group(&inputs, &AnalysisConfig::default()).unwrap();

        assert!(result.stability.is_none());
        assert_eq!(result.sessions.len(), 1);
        assert!(!result.sessions[0].session.is_valid);
        assert!(result.sessions[0].enrichment.is_none());
        assert_eq!(result.events().count(), 0);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_undecodable_buffer_is_an_error() {
        let inputs = GroupInputs {
            beacon: Some(vec![0xff, 0x00, 0x01]),
            ..inputs()
        };
        let err = analyze_group(&inputs, &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, TelemetryError::Decode(_)));
    }

    #[test]
    fn test_empty_group() {
        let inputs = GroupInputs {
            vehicle: "V1".to_string(),
            date: date(),
            stability: None,
            gps: None,
            beacon: None,
        };
        let result = analyze_group(&inputs, &AnalysisConfig::default()).unwrap();
        assert!(result.sessions.is_empty());
        assert_eq!(result.metadata.events_detected, 0);
    }

    #[test]
    fn test_config_from_pipeline() {
        let pipeline = PipelineConfig {
            max_diff_ms: 2000,
            tolerance_secs: 60,
            ..PipelineConfig::default()
        };
        let config = AnalysisConfig::from(&pipeline);
        assert_eq!(config.max_diff_ms, 2000);
        assert_eq!(config.correlation.tolerance_secs, 60);
        assert_eq!(config.detection.min_measurements, pipeline.min_measurements);
    }

    #[test]
    fn test_result_serializes() {
        let result = analyze_group(&inputs(), &AnalysisConfig::default()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["vehicle"], "DOBACK024");
        assert_eq!(json["sessions"][0]["events"][0]["severity"], "GRAVE");
    }
}
