//! Temporal correlator.
//!
//! Fuses independently detected stability, GPS and beacon sessions into
//! [`CorrelatedSession`]s. Stability sessions are the anchors; every unused
//! GPS or beacon session overlapping an anchor's padded window is absorbed
//! into it, so a fragmented stream collapses into one virtual session.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use telemetry_core::models::{CorrelatedSession, DetectedSession, SensorType};
use telemetry_core::settings::PipelineConfig;
use tracing::{debug, warn};

pub const REASON_MISSING_ANCHORS: &str = "missing both stability and beacon sessions";
pub const REASON_NON_POSITIVE_DURATION: &str = "non-positive duration";

/// Tunables for [`correlate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationConfig {
    /// Padding applied to both ends of an anchor when testing overlap.
    pub tolerance_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: 300,
        }
    }
}

impl From<&PipelineConfig> for CorrelationConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            tolerance_secs: config.tolerance_secs,
        }
    }
}

/// How well the other streams lined up with the stability anchors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationStats {
    pub anchors: usize,
    pub matched_gps: usize,
    pub matched_beacon: usize,
    /// Absolute start offsets, in seconds, between an anchor and its matches.
    pub min_offset_secs: Option<i64>,
    pub max_offset_secs: Option<i64>,
    pub avg_offset_secs: Option<f64>,
    pub without_gps: usize,
    pub without_beacon: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationOutcome {
    /// Sorted by start, numbered from 1.
    pub sessions: Vec<CorrelatedSession>,
    pub stats: CorrelationStats,
    pub warnings: Vec<String>,
}

impl CorrelationOutcome {
    pub fn valid_sessions(&self) -> impl Iterator<Item = &CorrelatedSession> {
        self.sessions.iter().filter(|s| s.is_valid)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Correlate per-sensor sessions into operational sessions.
///
/// Anchors are processed in the given order and the first anchor to claim a
/// GPS or beacon session keeps it. Left-over GPS sessions are paired with the
/// unused beacon session whose start is nearest (within tolerance, first wins
/// on ties); left-over beacon sessions are emitted on their own.
pub fn correlate(
    stability: &[DetectedSession],
    gps: &[DetectedSession],
    beacon: &[DetectedSession],
    config: &CorrelationConfig,
) -> CorrelationOutcome {
    let tolerance = TimeDelta::seconds(config.tolerance_secs as i64);
    let mut gps_used = vec![false; gps.len()];
    let mut beacon_used = vec![false; beacon.len()];
    let mut drafts: Vec<Draft> = Vec::new();
    let mut offsets: Vec<i64> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut stats = CorrelationStats {
        anchors: stability.len(),
        ..CorrelationStats::default()
    };

    for anchor in stability {
        let from = anchor.start - tolerance;
        let to = anchor.end + tolerance;
        let gps_match = claim_overlapping(gps, &mut gps_used, from, to);
        let beacon_match = claim_overlapping(beacon, &mut beacon_used, from, to);

        for matched in [&gps_match, &beacon_match].into_iter().flatten() {
            offsets.push((matched.start - anchor.start).num_seconds().abs());
            if matched.fragments > 1 {
                warnings.push(format!(
                    "{} fragments of {} fused into the session starting {}",
                    matched.fragments, matched.sensor, anchor.start
                ));
            }
        }
        match gps_match {
            Some(_) => stats.matched_gps += 1,
            None => stats.without_gps += 1,
        }
        match beacon_match {
            Some(_) => stats.matched_beacon += 1,
            None => stats.without_beacon += 1,
        }

        drafts.push(Draft {
            stability: Some(anchor.clone()),
            gps: gps_match,
            beacon: beacon_match,
            unanchored_gps: false,
        });
    }

    for (idx, session) in gps.iter().enumerate() {
        if gps_used[idx] {
            continue;
        }
        gps_used[idx] = true;
        let paired = nearest_unused(beacon, &beacon_used, session.start, tolerance);
        if let Some(b) = paired {
            beacon_used[b] = true;
        }
        drafts.push(Draft {
            stability: None,
            gps: Some(session.clone()),
            beacon: paired.map(|b| beacon[b].clone()),
            unanchored_gps: true,
        });
    }

    for (idx, session) in beacon.iter().enumerate() {
        if beacon_used[idx] {
            continue;
        }
        beacon_used[idx] = true;
        drafts.push(Draft {
            stability: None,
            gps: None,
            beacon: Some(session.clone()),
            unanchored_gps: false,
        });
    }

    if !offsets.is_empty() {
        stats.min_offset_secs = offsets.iter().min().copied();
        stats.max_offset_secs = offsets.iter().max().copied();
        stats.avg_offset_secs = Some(offsets.iter().sum::<i64>() as f64 / offsets.len() as f64);
    }

    let mut sessions: Vec<CorrelatedSession> = drafts.into_iter().map(Draft::build).collect();
    sessions.sort_by_key(|s| s.start);
    for (idx, session) in sessions.iter_mut().enumerate() {
        session.session_number = idx + 1;
        if let Some(reason) = &session.invalid_reason {
            warn!("Session {} invalid: {}", session.session_number, reason);
            warnings.push(format!("session {} invalid: {}", session.session_number, reason));
        }
    }

    debug!(
        "Correlated {} stability, {} GPS, {} beacon sessions into {}",
        stability.len(),
        gps.len(),
        beacon.len(),
        sessions.len()
    );
    CorrelationOutcome {
        sessions,
        stats,
        warnings,
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Claim every unused session intersecting `[from, to]` and fuse them.
fn claim_overlapping(
    sessions: &[DetectedSession],
    used: &mut [bool],
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Option<DetectedSession> {
    let mut claimed: Vec<&DetectedSession> = Vec::new();
    for (session, flag) in sessions.iter().zip(used.iter_mut()) {
        if !*flag && session.overlaps(from, to) {
            *flag = true;
            claimed.push(session);
        }
    }
    fuse(&claimed)
}

/// Merge fragments of one sensor into a single virtual session.
fn fuse(parts: &[&DetectedSession]) -> Option<DetectedSession> {
    let (first, rest) = parts.split_first()?;
    let mut fused = (*first).clone();
    for part in rest {
        fused.start = fused.start.min(part.start);
        fused.end = fused.end.max(part.end);
        fused.sample_count += part.sample_count;
        fused.first_line = fused.first_line.min(part.first_line);
        fused.last_line = fused.last_line.max(part.last_line);
        fused.fragments += part.fragments;
    }
    fused.duration_secs = (fused.end - fused.start).num_seconds();
    Some(fused)
}

/// Index of the unused session whose start is closest to `start`, within
/// `tolerance`. Strict `<` keeps the first on ties.
fn nearest_unused(
    sessions: &[DetectedSession],
    used: &[bool],
    start: NaiveDateTime,
    tolerance: TimeDelta,
) -> Option<usize> {
    let mut best: Option<(usize, TimeDelta)> = None;
    for (idx, session) in sessions.iter().enumerate() {
        if used[idx] {
            continue;
        }
        let diff = (session.start - start).abs();
        if diff > tolerance {
            continue;
        }
        if best.map_or(true, |(_, d)| diff < d) {
            best = Some((idx, diff));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Constituents of one correlated session before validation.
struct Draft {
    stability: Option<DetectedSession>,
    gps: Option<DetectedSession>,
    beacon: Option<DetectedSession>,
    /// A GPS session no stability anchor claimed.
    unanchored_gps: bool,
}

impl Draft {
    fn build(self) -> CorrelatedSession {
        let present: Vec<&DetectedSession> = [&self.stability, &self.gps, &self.beacon]
            .into_iter()
            .flatten()
            .collect();
        // Every draft carries at least one constituent.
        let start = present.iter().map(|s| s.start).min().unwrap_or_default();
        let end = present.iter().map(|s| s.end).max().unwrap_or_default();

        let mut observations = Vec::new();
        if self.gps.is_none() {
            observations.push("no_gps".to_string());
        }
        match (&self.stability, &self.beacon) {
            (Some(_), None) => observations.push("stability_only".to_string()),
            (None, Some(_)) => observations.push("beacon_only".to_string()),
            _ => {}
        }
        for session in [&self.gps, &self.beacon].into_iter().flatten() {
            if session.fragments > 1 {
                let tag = match session.sensor {
                    SensorType::Gps => "gps_fragments",
                    _ => "beacon_fragments",
                };
                observations.push(format!("{}:{}", tag, session.fragments));
            }
        }
        if self.unanchored_gps {
            observations.push("no_stability_anchor".to_string());
        }

        let invalid_reason = if self.stability.is_none() && self.beacon.is_none() {
            Some(REASON_MISSING_ANCHORS.to_string())
        } else if end <= start {
            Some(REASON_NON_POSITIVE_DURATION.to_string())
        } else {
            None
        };

        CorrelatedSession {
            session_number: 0,
            start,
            end,
            duration_secs: (end - start).num_seconds(),
            stability: self.stability,
            gps: self.gps,
            beacon: self.beacon,
            is_valid: invalid_reason.is_none(),
            invalid_reason,
            observations,
        }
    }
}
