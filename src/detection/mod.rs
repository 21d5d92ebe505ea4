//! Shockwave Detection Engine
//!
//! Stateless tiered detector over one station's time-ordered readings.
//! Each consecutive sample pair is tested against every severity tier's
//! speed-drop band; the physics gate accepts a candidate when the implied
//! density rise clears the tier minimum, or unconditionally when the drop
//! alone is a strong signal. Wave speed follows the Rankine-Hugoniot flow
//! jump, clamped to the plausible backward-wave range.
//!
//! Overlapping candidates from different tiers describing the same
//! disturbance are collapsed to the most severe one.

use chrono::Utc;
use tracing::debug;

use crate::config::{defaults, DetectionConfig, TierConfig};
use crate::types::{Reading, Severity, ShockEvent};

/// Tiered pairwise shockwave detector. Cheap to construct per cycle.
pub struct ShockDetector {
    config: DetectionConfig,
}

impl ShockDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Detect shock events in one station's time-ordered reading run.
    /// Fewer than two samples can never witness a transition.
    pub fn detect(&self, station_id: &str, readings: &[Reading]) -> Vec<ShockEvent> {
        if readings.len() < 2 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (severity, tier) in self.config.tiers() {
            for i in 0..readings.len() - 1 {
                if let Some(event) =
                    self.evaluate_pair(station_id, severity, tier, readings, i)
                {
                    candidates.push(event);
                }
            }
        }

        let events = dedup_overlapping(candidates);
        if !events.is_empty() {
            debug!(
                station = station_id,
                events = events.len(),
                "Shock events detected"
            );
        }
        events
    }

    /// Test one consecutive sample pair against one tier.
    fn evaluate_pair(
        &self,
        station_id: &str,
        severity: Severity,
        tier: &TierConfig,
        readings: &[Reading],
        i: usize,
    ) -> Option<ShockEvent> {
        let current = &readings[i];
        let next = &readings[i + 1];

        let time_gap_min =
            (next.timestamp - current.timestamp).num_seconds() as f64 / 60.0;
        if time_gap_min < 0.0 || time_gap_min > tier.max_time_gap_min {
            return None;
        }

        let speed_drop = current.median_speed - next.median_speed;
        if speed_drop < tier.speed_drop_min
            || speed_drop > tier.speed_drop_max
            || current.median_speed < tier.initial_speed_min
        {
            return None;
        }

        let initial_density = current.density();
        let final_density = next.density();
        let density_increase = final_density - initial_density;

        // Physics gate: a shock front compresses traffic. A very large drop
        // is accepted on its own even when flow data is too thin to show
        // the compression.
        let strong_signal = speed_drop >= self.config.strong_signal_drop_kmh;
        if density_increase < tier.density_increase_min && !strong_signal {
            return None;
        }

        Some(ShockEvent {
            station_id: station_id.to_string(),
            severity,
            start_idx: i,
            end_idx: i + 1,
            speed_drop,
            initial_speed: current.median_speed,
            final_speed: next.median_speed,
            density_increase,
            wave_speed: wave_speed(current.flow, next.flow, initial_density, final_density),
            time_gap_min,
            confidence: band_confidence(severity, tier, speed_drop),
            detection_time: Utc::now(),
        })
    }
}

/// Rankine-Hugoniot shock speed: flow jump over density jump. Near-equal
/// densities make the quotient meaningless, so it pins to exactly zero.
/// Clamped to the plausible range for backward-forming waves.
fn wave_speed(initial_flow: f64, final_flow: f64, initial_density: f64, final_density: f64) -> f64 {
    let density_delta = final_density - initial_density;
    if density_delta.abs() < defaults::DENSITY_DELTA_EPSILON {
        return 0.0;
    }
    ((final_flow - initial_flow) / density_delta)
        .clamp(-defaults::MAX_WAVE_SPEED_KMH, defaults::MAX_WAVE_SPEED_KMH)
}

/// Confidence grows from the tier's base toward 1.0 as the measured drop
/// moves deeper into the tier's band.
fn band_confidence(severity: Severity, tier: &TierConfig, speed_drop: f64) -> f64 {
    let band = tier.speed_drop_max - tier.speed_drop_min;
    let depth = if band > 0.0 {
        ((speed_drop - tier.speed_drop_min) / band).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let base = severity.base_confidence();
    (base + (1.0 - base) * depth).clamp(0.0, 1.0)
}

/// Collapse candidates whose sample ranges overlap (within a small index
/// tolerance) to the single most severe one.
fn dedup_overlapping(mut candidates: Vec<ShockEvent>) -> Vec<ShockEvent> {
    if candidates.is_empty() {
        return candidates;
    }

    candidates.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(b.speed_drop.total_cmp(&a.speed_drop))
    });

    let tolerance = defaults::OVERLAP_DEDUP_SAMPLES;
    let mut kept: Vec<ShockEvent> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|existing| {
            candidate.start_idx <= existing.end_idx + tolerance
                && existing.start_idx <= candidate.end_idx + tolerance
        });
        if !overlaps {
            kept.push(candidate);
        }
    }

    kept.sort_by_key(|event| event.start_idx);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTag;
    use chrono::{TimeZone, Utc};

    fn reading(minute: u32, flow: f64, speed: f64) -> Reading {
        Reading {
            station_id: "01F0340N".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 8, minute, 0).unwrap(),
            flow,
            median_speed: speed,
            avg_travel_time: 0.0,
            source: SourceTag::Live,
        }
    }

    fn detector() -> ShockDetector {
        ShockDetector::new(DetectionConfig::default())
    }

    #[test]
    fn severe_drop_with_density_rise_yields_one_event() {
        // 90 -> 50 km/h, flow held: density jumps from ~11 to 20 veh/km.
        let readings = vec![reading(0, 1000.0, 90.0), reading(5, 1000.0, 50.0)];
        let events = detector().detect("01F0340N", &readings);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.severity, Severity::Severe);
        assert!((event.speed_drop - 40.0).abs() < f64::EPSILON);
        assert!(event.density_increase > 3.0);
        assert!(event.confidence >= 0.9);
    }

    #[test]
    fn gap_beyond_tier_tolerance_yields_nothing() {
        // Same magnitudes, but 25 minutes apart (> 20-minute tolerance).
        let readings = vec![reading(0, 1000.0, 90.0), reading(25, 1000.0, 50.0)];
        assert!(detector().detect("01F0340N", &readings).is_empty());
    }

    #[test]
    fn fewer_than_two_samples_yields_nothing() {
        let d = detector();
        assert!(d.detect("01F0340N", &[]).is_empty());
        assert!(d.detect("01F0340N", &[reading(0, 1000.0, 90.0)]).is_empty());
    }

    #[test]
    fn low_initial_speed_is_not_a_shock() {
        // Already congested; a further drop is not a new front.
        let readings = vec![reading(0, 500.0, 20.0), reading(5, 500.0, 8.0)];
        assert!(detector().detect("01F0340N", &readings).is_empty());
    }

    #[test]
    fn equal_densities_pin_wave_speed_to_zero() {
        assert_eq!(wave_speed(1000.0, 1200.0, 15.0, 15.05), 0.0);
    }

    #[test]
    fn wave_speed_is_clamped() {
        // Huge flow jump over a minimal density jump.
        let speed = wave_speed(500.0, 2000.0, 10.0, 10.2);
        assert!((speed - defaults::MAX_WAVE_SPEED_KMH).abs() < f64::EPSILON);
        let speed = wave_speed(2000.0, 500.0, 10.0, 10.2);
        assert!((speed + defaults::MAX_WAVE_SPEED_KMH).abs() < f64::EPSILON);
    }

    #[test]
    fn severity_is_monotone_in_speed_drop() {
        let d = detector();
        let drops = [15.0, 30.0, 50.0];
        let mut ranks = Vec::new();
        for drop in drops {
            let readings = vec![reading(0, 1500.0, 95.0), reading(5, 1500.0, 95.0 - drop)];
            let events = d.detect("01F0340N", &readings);
            assert_eq!(events.len(), 1, "drop {drop}");
            ranks.push(events[0].severity.rank());
        }
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn strong_signal_overrides_thin_density_evidence() {
        // Flow collapses with the speed, so density barely moves, but a
        // 45 km/h drop is accepted on magnitude alone.
        let readings = vec![reading(0, 1000.0, 90.0), reading(5, 500.0, 45.0)];
        let events = detector().detect("01F0340N", &readings);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Severe);
    }

    #[test]
    fn overlapping_tiers_collapse_to_the_most_severe() {
        // A 30 km/h drop sits inside the moderate band only, but a run of
        // drops produces candidates from several pairs; ranges touching
        // within the tolerance collapse to one event.
        let readings = vec![
            reading(0, 1500.0, 95.0),
            reading(5, 1500.0, 65.0),
            reading(10, 1500.0, 40.0),
        ];
        let events = detector().detect("01F0340N", &readings);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Moderate);
    }

    #[test]
    fn distant_events_both_survive_dedup() {
        let mut readings = vec![reading(0, 1500.0, 95.0), reading(5, 1500.0, 65.0)];
        // Recovery, then a second independent front well past the overlap
        // tolerance.
        for (offset, speed) in [(10, 90.0), (15, 92.0), (20, 91.0), (25, 90.0)] {
            readings.push(reading(offset, 1500.0, speed));
        }
        readings.push(reading(30, 1500.0, 60.0));
        let events = detector().detect("01F0340N", &readings);
        assert_eq!(events.len(), 2);
        assert!(events[0].start_idx < events[1].start_idx);
    }
}
