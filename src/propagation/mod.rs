//! Propagation Predictor
//!
//! Projects each detected shock onto the next K downstream stations in the
//! source station's highway sequence. Distances come from Dijkstra over the
//! station graph; a station the graph cannot reach is skipped rather than
//! guessed at. Confidence starts from the tier base and decays linearly
//! with distance down to a floor.
//!
//! When a later detection at a predicted target lands close to the
//! predicted arrival, the implied wave speed is folded into a per-corridor
//! rolling average that gradually replaces the static default.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing::{debug, info};

use crate::config::{defaults, PropagationConfig};
use crate::topology::{DistanceGraph, StationRegistry};
use crate::types::{Direction, PropagationPrediction, ShockEvent};

// ============================================================================
// Corridor speed learning
// ============================================================================

/// Rolling mean of corroborated propagation speeds for one
/// highway+direction corridor.
#[derive(Debug, Default, Clone)]
struct CorridorSpeed {
    sum_kmh: f64,
    samples: usize,
}

impl CorridorSpeed {
    fn fold(&mut self, speed_kmh: f64) {
        self.sum_kmh += speed_kmh;
        self.samples += 1;
    }

    /// Learned mean, only once enough corroborations have accumulated.
    fn mean(&self) -> Option<f64> {
        (self.samples >= defaults::LEARNING_MIN_SAMPLES).then(|| self.sum_kmh / self.samples as f64)
    }
}

// ============================================================================
// Predictor
// ============================================================================

pub struct PropagationPredictor {
    config: PropagationConfig,
    registry: Arc<StationRegistry>,
    graph: Arc<DistanceGraph>,
    corridors: HashMap<(String, Direction), CorridorSpeed>,
}

impl PropagationPredictor {
    pub fn new(
        config: PropagationConfig,
        registry: Arc<StationRegistry>,
        graph: Arc<DistanceGraph>,
    ) -> Self {
        Self {
            config,
            registry,
            graph,
            corridors: HashMap::new(),
        }
    }

    /// Propagation speed for a corridor: the learned rolling mean when it
    /// has matured, otherwise the static default.
    pub fn effective_speed(&self, highway: &str, direction: Direction) -> f64 {
        if self.config.learning_enabled {
            if let Some(speed) = self
                .corridors
                .get(&(highway.to_string(), direction))
                .and_then(CorridorSpeed::mean)
            {
                return speed;
            }
        }
        self.config.default_speed_kmh
    }

    /// Predict downstream arrivals for one shock event. An unknown source
    /// station or an empty downstream run yields no predictions.
    pub fn predict(&self, event: &ShockEvent) -> Vec<PropagationPrediction> {
        let Some(source) = self.registry.get(&event.station_id) else {
            debug!(station = %event.station_id, "Shock at unregistered station, skipping");
            return Vec::new();
        };

        let speed_kmh = self.effective_speed(&source.highway, source.direction);
        let mut predictions = Vec::new();

        for target_id in self
            .registry
            .downstream(&event.station_id, self.config.downstream_stations)
        {
            // Unreachable in the graph means no usable distance.
            let Some(distance_km) = self.graph.shortest_distance(&event.station_id, target_id)
            else {
                debug!(
                    source = %event.station_id,
                    target = target_id,
                    "No path in distance graph, skipping target"
                );
                continue;
            };
            if distance_km <= 0.0 {
                continue;
            }

            let travel_time_min =
                (distance_km / speed_kmh * 60.0).max(defaults::MIN_TRAVEL_TIME_MIN);
            let confidence = event.severity.base_confidence()
                * (1.0 - distance_km / defaults::CONFIDENCE_DISTANCE_SCALE_KM)
                    .max(defaults::CONFIDENCE_DISTANCE_FLOOR);

            predictions.push(PropagationPrediction {
                source_station: event.station_id.clone(),
                source_severity: event.severity,
                target_station: target_id.to_string(),
                distance_km,
                propagation_speed: speed_kmh,
                travel_time_min,
                predicted_arrival: event.detection_time
                    + ChronoDuration::seconds((travel_time_min * 60.0) as i64),
                confidence: confidence.clamp(0.0, 1.0),
                predicted_at: event.detection_time,
            });
        }

        predictions
    }

    /// Match fresh detections against outstanding predictions and fold the
    /// implied corridor speed into the rolling mean. A detection
    /// corroborates a prediction when it happens at the predicted target
    /// within the arrival tolerance. Matched predictions are removed from
    /// `outstanding`: a front that keeps getting re-detected while its
    /// readings sit in the window teaches at most one sample per
    /// prediction, not one per cycle.
    pub fn corroborate(
        &mut self,
        outstanding: &mut Vec<PropagationPrediction>,
        events: &[ShockEvent],
    ) {
        if !self.config.learning_enabled {
            return;
        }
        let tolerance = ChronoDuration::minutes(defaults::CORROBORATION_TOLERANCE_MIN);

        for event in events {
            while let Some(idx) = outstanding.iter().position(|p| {
                p.target_station == event.station_id
                    && (event.detection_time - p.predicted_arrival).abs() <= tolerance
            }) {
                let prediction = outstanding.swap_remove(idx);
                let elapsed = event.detection_time - prediction.predicted_at;
                let elapsed_hours = elapsed.num_seconds() as f64 / 3600.0;
                if elapsed_hours <= 0.0 {
                    continue;
                }

                let implied = (prediction.distance_km / elapsed_hours).clamp(
                    defaults::PROPAGATION_SPEED_MIN_KMH,
                    defaults::PROPAGATION_SPEED_MAX_KMH,
                );
                let Some(source) = self.registry.get(&prediction.source_station) else {
                    continue;
                };
                let corridor = self
                    .corridors
                    .entry((source.highway.clone(), source.direction))
                    .or_default();
                corridor.fold(implied);
                info!(
                    highway = %source.highway,
                    direction = %source.direction,
                    implied_kmh = implied,
                    samples = corridor.samples,
                    "Corroborated propagation speed"
                );
            }
        }
    }
}
