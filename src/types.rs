//! Shared data structures for the shockwave pipeline
//!
//! This module defines the records flowing between pipeline stages:
//! - Ingestion: [`Reading`] (one fused station sample, minute resolution)
//! - Topology: [`Station`], [`Direction`] (immutable after bootstrap)
//! - Detection: [`ShockEvent`], [`Severity`]
//! - Prediction: [`PropagationPrediction`]
//!
//! Everything here is a plain serializable record with no behavior beyond
//! small accessors — transport layers consume these as-is.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Topology
// ============================================================================

/// Travel direction along a highway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
}

impl Direction {
    /// Single-letter suffix used in canonical station IDs (`01F0340N`).
    pub fn suffix(self) -> char {
        match self {
            Direction::North => 'N',
            Direction::South => 'S',
        }
    }

    /// Parse from the canonical ID suffix.
    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            'N' => Some(Direction::North),
            'S' => Some(Direction::South),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::North => write!(f, "northbound"),
            Direction::South => write!(f, "southbound"),
        }
    }
}

/// A fixed sensor gantry on the highway. Immutable after registry load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    /// Canonical station ID, e.g. `01F0340N`.
    pub id: String,
    /// Highway code, e.g. `01F`.
    pub highway: String,
    pub direction: Direction,
    /// Mileage along the highway in km, extracted from the canonical ID.
    pub mileage_km: f64,
    pub latitude: f64,
    pub longitude: f64,
}

// ============================================================================
// Readings
// ============================================================================

/// Which feed a reading came from. Live data wins over historical when both
/// report the same station-minute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceTag {
    Live,
    Historical,
}

impl SourceTag {
    /// Dedup priority — higher wins for the same station-minute.
    pub fn priority(self) -> u8 {
        match self {
            SourceTag::Live => 2,
            SourceTag::Historical => 1,
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTag::Live => write!(f, "live"),
            SourceTag::Historical => write!(f, "historical"),
        }
    }
}

/// One fused traffic sample for a station at minute resolution.
///
/// Appended only by the fusion layer; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    /// Sample time, truncated to the minute.
    pub timestamp: DateTime<Utc>,
    /// Vehicle-equivalent flow (passenger-car units per hour).
    pub flow: f64,
    /// Median speed across vehicle classes (km/h).
    pub median_speed: f64,
    /// Volume-weighted average travel time over the pair section (seconds).
    pub avg_travel_time: f64,
    pub source: SourceTag,
}

impl Reading {
    /// Traffic density estimate (veh/km). Speed is floored to avoid
    /// dividing by a stalled sensor reporting ~0 km/h.
    pub fn density(&self) -> f64 {
        self.flow / self.median_speed.max(crate::config::defaults::SPEED_EPSILON_KMH)
    }

    /// Timestamp truncated to the minute — the dedup key within a window.
    pub fn minute_key(&self) -> DateTime<Utc> {
        self.timestamp
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.timestamp)
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Shockwave severity tier, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    /// Numeric rank for dedup ordering (higher = more severe).
    pub fn rank(self) -> u8 {
        match self {
            Severity::Mild => 1,
            Severity::Moderate => 2,
            Severity::Severe => 3,
        }
    }

    /// Base confidence carried into propagation predictions.
    pub fn base_confidence(self) -> f64 {
        match self {
            Severity::Mild => 0.6,
            Severity::Moderate => 0.8,
            Severity::Severe => 0.9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected speed/density discontinuity at one station.
///
/// Produced once per detection cycle and never mutated; superseded by the
/// next cycle's events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockEvent {
    pub station_id: String,
    pub severity: Severity,
    /// Index of the pre-shock sample within the analyzed window.
    pub start_idx: usize,
    /// Index of the post-shock sample (always `start_idx + 1`).
    pub end_idx: usize,
    /// Speed drop across the discontinuity (km/h, positive).
    pub speed_drop: f64,
    pub initial_speed: f64,
    pub final_speed: f64,
    /// Density jump across the discontinuity (veh/km).
    pub density_increase: f64,
    /// Rankine-Hugoniot shock speed estimate (km/h, clamped to ±20).
    pub wave_speed: f64,
    /// Minutes between the two samples.
    pub time_gap_min: f64,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    pub detection_time: DateTime<Utc>,
}

impl ShockEvent {
    /// Relative strength of the shock as a percentage of the initial speed.
    pub fn strength_percent(&self) -> f64 {
        if self.initial_speed <= 0.0 {
            return 0.0;
        }
        self.speed_drop / self.initial_speed * 100.0
    }
}

// ============================================================================
// Prediction
// ============================================================================

/// Predicted downstream arrival of a detected shockwave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationPrediction {
    /// Station where the source shock was detected.
    pub source_station: String,
    pub source_severity: Severity,
    pub target_station: String,
    /// Shortest-path distance over the station graph (km).
    pub distance_km: f64,
    /// Propagation speed used for this prediction (km/h).
    pub propagation_speed: f64,
    /// Estimated travel time to the target (minutes, >= 1).
    pub travel_time_min: f64,
    pub predicted_arrival: DateTime<Utc>,
    /// Confidence in [0, 1], non-increasing with distance.
    pub confidence: f64,
    pub predicted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn density_guards_near_zero_speed() {
        let r = Reading {
            station_id: "01F0340N".into(),
            timestamp: Utc::now(),
            flow: 100.0,
            median_speed: 0.0,
            avg_travel_time: 0.0,
            source: SourceTag::Live,
        };
        assert!(r.density().is_finite());
        assert!((r.density() - 100.0 / 0.1).abs() < 1e-9);
    }

    #[test]
    fn minute_key_truncates_seconds() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 8, 3, 42).unwrap();
        let r = Reading {
            station_id: "01F0340N".into(),
            timestamp: ts,
            flow: 0.0,
            median_speed: 0.0,
            avg_travel_time: 0.0,
            source: SourceTag::Historical,
        };
        assert_eq!(
            r.minute_key(),
            Utc.with_ymd_and_hms(2025, 1, 15, 8, 3, 0).unwrap()
        );
    }

    #[test]
    fn severity_ranks_are_ordered() {
        assert!(Severity::Severe.rank() > Severity::Moderate.rank());
        assert!(Severity::Moderate.rank() > Severity::Mild.rank());
        assert!(Severity::Severe > Severity::Mild);
    }
}
