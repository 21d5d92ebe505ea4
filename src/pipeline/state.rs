//! Shared Pipeline State
//!
//! The orchestrator publishes each cycle's results here; readers (status
//! reporting, tests, any future transport) take copies under a short read
//! lock. Wrapped in `Arc<RwLock<>>` across the async runtime.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PropagationPrediction, Reading, ShockEvent};

// ============================================================================
// Status
// ============================================================================

/// Pipeline operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    /// Starting up, cache not yet bootstrapped.
    Initializing,
    /// Normal operation, cycles running.
    Monitoring,
    /// Too many consecutive total failures; paused before retrying.
    CoolingDown,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Initializing => write!(f, "Initializing"),
            PipelineStatus::Monitoring => write!(f, "Monitoring"),
            PipelineStatus::CoolingDown => write!(f, "CoolingDown"),
        }
    }
}

/// Success/failure counters for one snapshot source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub successes: u64,
    pub failures: u64,
}

// ============================================================================
// State
// ============================================================================

/// Shared pipeline state. Everything here is a copy the orchestrator
/// published; mutating a returned value never touches the pipeline.
#[derive(Debug)]
pub struct PipelineState {
    /// Per-station recent readings as of the last cycle.
    readings: HashMap<String, Vec<Reading>>,
    /// Events from the last cycle.
    events: Vec<ShockEvent>,
    /// Predictions from the last cycle.
    predictions: Vec<PropagationPrediction>,

    pub status: PipelineStatus,
    pub last_successful_tick: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cycles_completed: u64,
    pub source_stats: HashMap<&'static str, SourceStats>,
    started: Instant,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            readings: HashMap::new(),
            events: Vec::new(),
            predictions: Vec::new(),
            status: PipelineStatus::Initializing,
            last_successful_tick: None,
            consecutive_failures: 0,
            cycles_completed: 0,
            source_stats: HashMap::new(),
            started: Instant::now(),
        }
    }
}

impl PipelineState {
    /// Recent readings for one station, newest last, limited to the given
    /// lookback from the station's freshest sample.
    pub fn latest_readings(&self, station_id: &str, window_minutes: i64) -> Vec<Reading> {
        let Some(run) = self.readings.get(station_id) else {
            return Vec::new();
        };
        let Some(newest) = run.last() else {
            return Vec::new();
        };
        let cutoff = newest.timestamp - ChronoDuration::minutes(window_minutes);
        run.iter()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// All shock events from the most recent cycle.
    pub fn active_shock_events(&self) -> Vec<ShockEvent> {
        self.events.clone()
    }

    /// Predictions from the most recent cycle, optionally filtered to one
    /// target station.
    pub fn propagation_predictions(&self, station_id: Option<&str>) -> Vec<PropagationPrediction> {
        match station_id {
            Some(id) => self
                .predictions
                .iter()
                .filter(|p| p.target_station == id)
                .cloned()
                .collect(),
            None => self.predictions.clone(),
        }
    }

    /// Replace the published cycle results in one shot.
    pub fn publish_cycle(
        &mut self,
        readings: HashMap<String, Vec<Reading>>,
        events: Vec<ShockEvent>,
        predictions: Vec<PropagationPrediction>,
    ) {
        self.readings = readings;
        self.events = events;
        self.predictions = predictions;
        self.cycles_completed += 1;
        self.last_successful_tick = Some(Utc::now());
        self.status = PipelineStatus::Monitoring;
        self.consecutive_failures = 0;
    }

    pub fn record_source(&mut self, name: &'static str, success: bool) {
        let stats = self.source_stats.entry(name).or_default();
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
    }

    pub fn station_count(&self) -> usize {
        self.readings.len()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTag;
    use chrono::TimeZone;

    fn reading(minute: u32) -> Reading {
        Reading {
            station_id: "01F0340N".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 8, minute, 0).unwrap(),
            flow: 1200.0,
            median_speed: 90.0,
            avg_travel_time: 120.0,
            source: SourceTag::Live,
        }
    }

    #[test]
    fn default_state_is_initializing() {
        let state = PipelineState::default();
        assert_eq!(state.status, PipelineStatus::Initializing);
        assert_eq!(state.cycles_completed, 0);
        assert!(state.active_shock_events().is_empty());
    }

    #[test]
    fn publish_cycle_resets_failure_tracking() {
        let mut state = PipelineState::default();
        state.consecutive_failures = 3;
        state.publish_cycle(HashMap::new(), Vec::new(), Vec::new());
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.status, PipelineStatus::Monitoring);
        assert_eq!(state.cycles_completed, 1);
        assert!(state.last_successful_tick.is_some());
    }

    #[test]
    fn latest_readings_respects_the_lookback() {
        let mut state = PipelineState::default();
        let run: Vec<Reading> = (0..30).map(reading).collect();
        state.publish_cycle(
            HashMap::from([("01F0340N".to_string(), run)]),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(state.latest_readings("01F0340N", 10).len(), 11);
        assert!(state.latest_readings("03F0010S", 10).is_empty());
    }

    #[test]
    fn predictions_filter_by_target() {
        let mut state = PipelineState::default();
        let prediction = PropagationPrediction {
            source_station: "01F0100N".into(),
            source_severity: crate::types::Severity::Severe,
            target_station: "01F0150N".into(),
            distance_km: 5.0,
            propagation_speed: 25.0,
            travel_time_min: 12.0,
            predicted_arrival: Utc::now(),
            confidence: 0.85,
            predicted_at: Utc::now(),
        };
        state.publish_cycle(HashMap::new(), Vec::new(), vec![prediction]);
        assert_eq!(state.propagation_predictions(Some("01F0150N")).len(), 1);
        assert!(state.propagation_predictions(Some("01F0200N")).is_empty());
        assert_eq!(state.propagation_predictions(None).len(), 1);
    }

    #[test]
    fn source_stats_accumulate() {
        let mut state = PipelineState::default();
        state.record_source("live", true);
        state.record_source("live", false);
        state.record_source("historical", true);
        assert_eq!(state.source_stats["live"].successes, 1);
        assert_eq!(state.source_stats["live"].failures, 1);
        assert_eq!(state.source_stats["historical"].successes, 1);
    }
}
