//! Threshold-based stability event classifier.
//!
//! Severity depends only on the instability index `si`; cause tags describe
//! which physical signals were extreme at the time.

use telemetry_core::formatting::format_coordinates;
use telemetry_core::models::{EnrichedSample, Severity, StabilityEvent, StabilitySample};
use tracing::debug;

pub const CAUSE_IMMINENT_ROLLOVER: &str = "imminent_rollover";
pub const CAUSE_DANGEROUS_YAW_DRIFT: &str = "dangerous_yaw_drift";
pub const CAUSE_ABRUPT_MANEUVER: &str = "abrupt_maneuver";
pub const CAUSE_ROLLOVER_RISK: &str = "rollover_risk";
pub const CAUSE_UNSTABLE_ZONE: &str = "unstable_zone";
pub const CAUSE_LOW_STABILITY: &str = "low_stability";

/// Classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierThresholds {
    /// `si` below this is GRAVE.
    pub grave_si: f64,
    /// `si` below this is MODERADA.
    pub moderate_si: f64,
    /// `si` below this is LEVE; at or above, no event.
    pub mild_si: f64,
    pub imminent_rollover_si: f64,
    pub imminent_rollover_roll_deg: f64,
    pub imminent_rollover_gx: f64,
    pub yaw_drift_gx: f64,
    pub abrupt_maneuver_ay: f64,
    pub rollover_risk_si: f64,
    pub unstable_zone_gz: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            grave_si: 0.20,
            moderate_si: 0.35,
            mild_si: 0.50,
            imminent_rollover_si: 0.10,
            imminent_rollover_roll_deg: 10.0,
            imminent_rollover_gx: 30.0,
            yaw_drift_gx: 45.0,
            abrupt_maneuver_ay: 300.0,
            rollover_risk_si: 0.30,
            unstable_zone_gz: 1000.0,
        }
    }
}

impl ClassifierThresholds {
    /// Severity tier for an instability index, or `None` when stable enough.
    pub fn severity(&self, si: f64) -> Option<Severity> {
        if si < self.grave_si {
            Some(Severity::Grave)
        } else if si < self.moderate_si {
            Some(Severity::Moderada)
        } else if si < self.mild_si {
            Some(Severity::Leve)
        } else {
            None
        }
    }

    /// Cause tags for a sample, in fixed order; never empty.
    pub fn causes(&self, s: &StabilitySample) -> Vec<&'static str> {
        let mut causes = Vec::new();
        if s.si < self.imminent_rollover_si
            && (s.roll.abs() > self.imminent_rollover_roll_deg
                || s.gx.abs() > self.imminent_rollover_gx)
        {
            causes.push(CAUSE_IMMINENT_ROLLOVER);
        }
        if s.gx.abs() > self.yaw_drift_gx {
            causes.push(CAUSE_DANGEROUS_YAW_DRIFT);
        }
        if s.ay.abs() > self.abrupt_maneuver_ay {
            causes.push(CAUSE_ABRUPT_MANEUVER);
        }
        if s.si < self.rollover_risk_si {
            causes.push(CAUSE_ROLLOVER_RISK);
        }
        if s.gz.abs() > self.unstable_zone_gz {
            causes.push(CAUSE_UNSTABLE_ZONE);
        }
        if causes.is_empty() {
            causes.push(CAUSE_LOW_STABILITY);
        }
        causes
    }
}

/// Turn enriched samples into events; samples with `si` at or above the
/// mild threshold produce none.
pub fn classify(enriched: &[EnrichedSample], thresholds: &ClassifierThresholds) -> Vec<StabilityEvent> {
    let events: Vec<StabilityEvent> = enriched
        .iter()
        .filter_map(|e| {
            let severity = thresholds.severity(e.sample.si)?;
            let causes = thresholds.causes(&e.sample).join(",");
            if severity == Severity::Grave {
                debug!(
                    "GRAVE event at {} ({}): {}",
                    e.sample.timestamp,
                    format_coordinates(e.latitude, e.longitude),
                    causes
                );
            }
            Some(StabilityEvent {
                timestamp: e.sample.timestamp,
                severity,
                causes,
                latitude: e.latitude,
                longitude: e.longitude,
                speed: e.speed,
                gps_matched: e.gps_matched,
                beacon_on: e.beacon_on,
                sample: e.sample.clone(),
            })
        })
        .collect();

    debug!("Classified {} events from {} samples", events.len(), enriched.len());
    events
}
