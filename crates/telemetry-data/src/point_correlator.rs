//! Point-level nearest-neighbour joins between sensor streams.

use std::ops::Range;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use telemetry_core::formatting::percentage;
use telemetry_core::models::{BeaconState, EnrichedSample, GpsPoint, StabilitySample, Timestamped};
use tracing::debug;

/// Largest time difference accepted by [`enrich`] by default.
pub const DEFAULT_MAX_DIFF_MS: i64 = 5000;

/// Record in `candidates` nearest to `timestamp`, if within `max_diff_ms`.
///
/// Candidates need not be sorted. On equal distance the earlier-listed
/// candidate is returned.
pub fn nearest_within<'a, T: Timestamped>(
    timestamp: NaiveDateTime,
    candidates: &'a [T],
    max_diff_ms: i64,
) -> Option<&'a T> {
    let mut best: Option<(&T, i64)> = None;
    for candidate in candidates {
        let diff = (candidate.timestamp() - timestamp).num_milliseconds().abs();
        if diff > max_diff_ms {
            continue;
        }
        if best.map_or(true, |(_, d)| diff < d) {
            best = Some((candidate, diff));
        }
    }
    best.map(|(c, _)| c)
}

/// [`nearest_within`] for every sample, in sample order.
pub fn join_nearest<'a, S: Timestamped, T: Timestamped>(
    samples: &[S],
    candidates: &'a [T],
    max_diff_ms: i64,
) -> Vec<Option<&'a T>> {
    samples
        .iter()
        .map(|s| nearest_within(s.timestamp(), candidates, max_diff_ms))
        .collect()
}

/// Records of a time-sorted slice falling inside `[start, end]`.
pub fn window<T: Timestamped>(records: &[T], start: NaiveDateTime, end: NaiveDateTime) -> &[T] {
    &records[window_range(records, start, end)]
}

/// Index range of [`window`]; empty when `end < start`.
pub fn window_range<T: Timestamped>(
    records: &[T],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Range<usize> {
    let lo = records.partition_point(|r| r.timestamp() < start);
    let hi = records.partition_point(|r| r.timestamp() <= end);
    lo..hi.max(lo)
}

// ── Enrichment ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub total: usize,
    pub with_gps: usize,
    pub with_beacon: usize,
    pub without_gps: usize,
    pub without_beacon: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub enriched: Vec<EnrichedSample>,
    pub stats: EnrichmentStats,
}

/// Attach the nearest GPS fix and beacon state to every stability sample.
///
/// Unmatched samples get zero coordinates and speed and `beacon_on = false`.
pub fn enrich(
    samples: &[StabilitySample],
    gps: &[GpsPoint],
    beacon: &[BeaconState],
    max_diff_ms: i64,
) -> Enrichment {
    let gps_matches = join_nearest(samples, gps, max_diff_ms);
    let beacon_matches = join_nearest(samples, beacon, max_diff_ms);
    let mut stats = EnrichmentStats {
        total: samples.len(),
        ..EnrichmentStats::default()
    };

    let enriched = samples
        .iter()
        .zip(gps_matches)
        .zip(beacon_matches)
        .map(|((sample, fix), state)| {
            match fix {
                Some(_) => stats.with_gps += 1,
                None => stats.without_gps += 1,
            }
            match state {
                Some(_) => stats.with_beacon += 1,
                None => stats.without_beacon += 1,
            }
            EnrichedSample {
                sample: sample.clone(),
                latitude: fix.map_or(0.0, |p| p.latitude),
                longitude: fix.map_or(0.0, |p| p.longitude),
                speed: fix.map_or(0.0, |p| p.speed),
                beacon_on: state.is_some_and(BeaconState::is_on),
                gps_matched: fix.is_some(),
                beacon_matched: state.is_some(),
            }
        })
        .collect();

    debug!(
        "Enriched {} samples: {}% with GPS, {}% with beacon",
        stats.total,
        percentage(stats.with_gps as f64, stats.total as f64, 1),
        percentage(stats.with_beacon as f64, stats.total as f64, 1),
    );
    Enrichment { enriched, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(ms: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + Duration::milliseconds(ms)
    }

    fn sample(ms: i64) -> StabilitySample {
        StabilitySample {
            timestamp: at(ms),
            ax: 0.0,
            ay: 0.0,
            az: 9.81,
            gx: 0.0,
            gy: 0.0,
            gz: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            timeantwifi: 0.0,
            usciclo: [0.0; 5],
            si: 0.9,
            accmag: 9.81,
            microsds: 0.0,
            k3: 0.0,
            line_number: 0,
        }
    }

    fn fix(ms: i64, lat: f64) -> GpsPoint {
        GpsPoint {
            timestamp: at(ms),
            latitude: lat,
            longitude: -3.7,
            altitude: 600.0,
            hdop: None,
            fix: "1".to_string(),
            satellites: 8,
            speed: 42.0,
            interpolated: false,
            line_number: 0,
        }
    }

    fn state(ms: i64, on: bool) -> BeaconState {
        BeaconState {
            timestamp: at(ms),
            state: if on { "1" } else { "0" }.to_string(),
            key: None,
            line_number: 0,
        }
    }

    #[test]
    fn test_nearest_within_picks_closest() {
        let fixes = [fix(0, 40.0), fix(1000, 40.1), fix(2000, 40.2)];
        let hit = nearest_within(at(1400), &fixes, 5000).unwrap();
        assert_eq!(hit.latitude, 40.1);
    }

    #[test]
    fn test_nearest_within_respects_max() {
        let fixes = [fix(0, 40.0)];
        assert!(nearest_within(at(5001), &fixes, 5000).is_none());
        assert!(nearest_within(at(5000), &fixes, 5000).is_some());
    }

    #[test]
    fn test_nearest_within_tie_keeps_first() {
        let fixes = [fix(0, 40.0), fix(2000, 40.2)];
        let hit = nearest_within(at(1000), &fixes, 5000).unwrap();
        assert_eq!(hit.latitude, 40.0);
    }

    #[test]
    fn test_join_nearest_order() {
        let samples = [sample(0), sample(10_000)];
        let fixes = [fix(100, 40.0)];
        let joined = join_nearest(&samples, &fixes, 5000);
        assert!(joined[0].is_some());
        assert!(joined[1].is_none());
    }

    #[test]
    fn test_window_bounds_inclusive() {
        let fixes: Vec<_> = (0..10).map(|i| fix(i * 1000, 40.0)).collect();
        let slice = window(&fixes, at(2000), at(5000));
        assert_eq!(slice.len(), 4);
        assert_eq!(slice[0].timestamp, at(2000));
        assert!(window(&fixes, at(20_000), at(30_000)).is_empty());
        assert!(window(&fixes, at(5000), at(2000)).is_empty());
    }

    #[test]
    fn test_window_range_indices() {
        let fixes: Vec<_> = (0..10).map(|i| fix(i * 1000, 40.0)).collect();
        assert_eq!(window_range(&fixes, at(2000), at(5000)), 2..6);
        assert_eq!(window_range(&fixes, at(2500), at(2600)), 3..3);
        assert!(window_range(&fixes, at(5000), at(2000)).is_empty());
    }

    #[test]
    fn test_enrich_defaults_when_unmatched() {
        let samples = [sample(0), sample(60_000)];
        let out = enrich(&samples, &[fix(500, 40.4)], &[state(-1000, true)], DEFAULT_MAX_DIFF_MS);

        let first = &out.enriched[0];
        assert!(first.gps_matched && first.beacon_matched && first.beacon_on);
        assert_eq!(first.latitude, 40.4);
        assert_eq!(first.speed, 42.0);

        let second = &out.enriched[1];
        assert!(!second.gps_matched && !second.beacon_matched && !second.beacon_on);
        assert_eq!((second.latitude, second.longitude, second.speed), (0.0, 0.0, 0.0));

        assert_eq!(
            out.stats,
            EnrichmentStats {
                total: 2,
                with_gps: 1,
                with_beacon: 1,
                without_gps: 1,
                without_beacon: 1,
            }
        );
    }
}
