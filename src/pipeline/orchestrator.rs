//! Pipeline Orchestrator
//!
//! Single driving loop: fusion tick -> per-station detection -> propagation
//! -> publish -> persist -> cancellable sleep. Detection runs on immutable
//! snapshot copies across a rayon pool; nothing in the loop holds the cache
//! across an await. A run of totally failed ticks triggers a cool-down
//! pause instead of a crash; cancellation finishes the in-flight cycle and
//! stops cleanly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rayon::prelude::*;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::state::{PipelineState, PipelineStatus};
use crate::config::{defaults, OrchestratorConfig};
use crate::detection::ShockDetector;
use crate::fusion::{FusionCache, TickReport};
use crate::output::{CycleRecord, OutputWriter};
use crate::propagation::PropagationPredictor;
use crate::types::{PropagationPrediction, ShockEvent};

pub struct Orchestrator {
    config: OrchestratorConfig,
    cache: FusionCache,
    detector: ShockDetector,
    predictor: PropagationPredictor,
    writer: OutputWriter,
    state: Arc<RwLock<PipelineState>>,
    cancel: CancellationToken,
    /// Predictions awaiting corroboration by a later downstream detection.
    outstanding: Vec<PropagationPrediction>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        cache: FusionCache,
        detector: ShockDetector,
        predictor: PropagationPredictor,
        writer: OutputWriter,
        state: Arc<RwLock<PipelineState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            cache,
            detector,
            predictor,
            writer,
            state,
            cancel,
            outstanding: Vec::new(),
        }
    }

    /// Drive cycles until cancelled.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.tick_interval_secs,
            "Orchestrator started"
        );

        while !self.cancel.is_cancelled() {
            self.run_cycle().await;

            if self.cancel.is_cancelled() {
                break;
            }
            let sleep = Duration::from_secs(self.config.tick_interval_secs);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        info!("Orchestrator stopped");
    }

    /// One full cycle: tick, detect, predict, publish, persist.
    pub async fn run_cycle(&mut self) {
        let report = self.cache.tick(&self.cancel).await;
        self.record_tick(&report).await;

        if report.total_failure {
            if report.consecutive_failures >= self.config.max_consecutive_failures {
                self.cool_down(report.consecutive_failures).await;
            }
            return;
        }

        let snapshot = self.cache.snapshot();

        // Detection over immutable copies, parallel per station.
        let mut events: Vec<ShockEvent> = snapshot
            .par_iter()
            .flat_map(|(station_id, readings)| self.detector.detect(station_id, readings))
            .collect();
        events.sort_by(|a, b| {
            a.station_id
                .cmp(&b.station_id)
                .then(a.start_idx.cmp(&b.start_idx))
        });

        // Fresh detections may corroborate arrivals predicted in earlier
        // cycles; each matched prediction is consumed so a front that stays
        // detectable across cycles teaches only once.
        self.predictor.corroborate(&mut self.outstanding, &events);

        let predictions: Vec<PropagationPrediction> = events
            .iter()
            .flat_map(|event| self.predictor.predict(event))
            .collect();
        self.retain_outstanding(&predictions);

        let record = CycleRecord {
            completed_at: Utc::now(),
            cycle: 0, // backfilled below once the counter is known
            stations: snapshot.len(),
            readings_cached: self.cache.reading_count(),
            latest_readings: self.cache.latest_readings(),
            shock_events: events.clone(),
            predictions: predictions.clone(),
        };

        let cycle = {
            let mut state = self.state.write().await;
            state.publish_cycle(snapshot, events, predictions);
            state.cycles_completed
        };

        let record = CycleRecord { cycle, ..record };
        if let Err(e) = self
            .writer
            .write_cycle(&record)
            .and_then(|_| self.writer.purge_expired(record.completed_at))
        {
            warn!(error = %e, "Cycle persistence failed");
        }

        if cycle % defaults::STATUS_REPORT_EVERY_CYCLES == 0 {
            self.report_status(cycle).await;
        }
    }

    /// Update per-source counters and failure tracking after a tick.
    async fn record_tick(&self, report: &TickReport) {
        let mut state = self.state.write().await;
        for source in &report.sources {
            state.record_source(source.name, !source.is_total_failure());
        }
        state.consecutive_failures = report.consecutive_failures;
        if !report.total_failure {
            state.last_successful_tick = Some(report.started_at);
        }
    }

    /// Pause after repeated total failures, then resume automatically.
    async fn cool_down(&self, failures: u32) {
        warn!(
            failures,
            cooldown_secs = self.config.cooldown_secs,
            "Every source failing, entering cool-down"
        );
        {
            let mut state = self.state.write().await;
            state.status = PipelineStatus::CoolingDown;
        }
        let pause = Duration::from_secs(self.config.cooldown_secs);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(pause) => {
                info!("Cool-down elapsed, resuming cycles");
            }
        }
    }

    /// Keep unexpired earlier predictions and add this cycle's, bounded by
    /// the corroboration tolerance past each predicted arrival.
    fn retain_outstanding(&mut self, fresh: &[PropagationPrediction]) {
        let horizon = Utc::now()
            - chrono::Duration::minutes(defaults::CORROBORATION_TOLERANCE_MIN);
        self.outstanding.retain(|p| p.predicted_arrival >= horizon);
        self.outstanding.extend_from_slice(fresh);
    }

    async fn report_status(&self, cycle: u64) {
        let state = self.state.read().await;
        let (successes, failures) = state.source_stats.values().fold((0, 0), |acc, s| {
            (acc.0 + s.successes, acc.1 + s.failures)
        });
        info!(
            cycle,
            stations = state.station_count(),
            readings = self.cache.reading_count(),
            events = state.active_shock_events().len(),
            predictions = state.propagation_predictions(None).len(),
            source_successes = successes,
            source_failures = failures,
            uptime_secs = state.uptime_secs(),
            "Pipeline status"
        );
    }
}
