//! Pipeline Cycle Integration Tests
//!
//! Drives the full cycle (fusion tick -> detection -> propagation ->
//! publish -> persist) with scripted in-process snapshot sources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use shockline::config::{
    defaults, CacheConfig, DetectionConfig, OrchestratorConfig, OutputConfig, PropagationConfig,
};
use shockline::connectors::{ConnectorError, SnapshotResult, SnapshotSource};
use shockline::pipeline::PipelineStatus;
use shockline::topology::station_from_id;
use shockline::{
    DistanceGraph, FusionCache, Orchestrator, OutputWriter, PipelineState, PropagationPredictor,
    Reading, ShockDetector, SourceTag, StationRegistry,
};

// ============================================================================
// Scripted sources
// ============================================================================

/// Serves a fixed number of total failures, then good readings forever.
struct FlakySource {
    failures_left: AtomicU32,
    batch: Vec<Reading>,
}

impl FlakySource {
    fn healthy(batch: Vec<Reading>) -> Arc<dyn SnapshotSource> {
        Arc::new(Self {
            failures_left: AtomicU32::new(0),
            batch,
        })
    }

    fn failing_first(failures: u32, batch: Vec<Reading>) -> Arc<dyn SnapshotSource> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            batch,
        })
    }
}

#[async_trait]
impl SnapshotSource for FlakySource {
    async fn fetch_snapshot(&self, _cancel: &CancellationToken) -> SnapshotResult {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return SnapshotResult::failed(ConnectorError::NoPublishedSlice);
        }
        SnapshotResult::ok(self.batch.clone())
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

fn reading(station: &str, minute: i64, speed: f64, source: SourceTag) -> Reading {
    Reading {
        station_id: station.into(),
        timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap() + Duration::minutes(minute),
        flow: 1200.0,
        median_speed: speed,
        avg_travel_time: 120.0,
        source,
    }
}

fn shock_batch() -> Vec<Reading> {
    vec![
        reading("01F0100N", 0, 90.0, SourceTag::Live),
        reading("01F0100N", 5, 45.0, SourceTag::Live),
        reading("01F0150N", 0, 95.0, SourceTag::Live),
        reading("01F0150N", 5, 94.0, SourceTag::Live),
    ]
}

fn build_orchestrator(
    source: Arc<dyn SnapshotSource>,
    state: Arc<RwLock<PipelineState>>,
    cancel: CancellationToken,
    output_dir: &std::path::Path,
) -> Orchestrator {
    let stations = ["01F0100N", "01F0150N"]
        .iter()
        .filter_map(|id| station_from_id(id, 24.8, 121.0))
        .collect();
    let registry = Arc::new(StationRegistry::new(stations));
    let graph = Arc::new(DistanceGraph::from_edges(vec![(
        "01F0100N".into(),
        "01F0150N".into(),
        5.0,
    )]));

    Orchestrator::new(
        OrchestratorConfig {
            tick_interval_secs: 0,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FAILURES,
            cooldown_secs: 0,
        },
        FusionCache::new(&CacheConfig::default(), vec![source]),
        ShockDetector::new(DetectionConfig::default()),
        PropagationPredictor::new(PropagationConfig::default(), registry, graph),
        OutputWriter::new(&OutputConfig {
            dir: output_dir.to_path_buf(),
            retention_hours: 24,
        })
        .unwrap(),
        state,
        cancel,
    )
}

// ============================================================================
// Cycle behavior
// ============================================================================

#[tokio::test]
async fn full_cycle_publishes_and_persists() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(RwLock::new(PipelineState::default()));
    let mut orch = build_orchestrator(
        FlakySource::healthy(shock_batch()),
        Arc::clone(&state),
        CancellationToken::new(),
        tmp.path(),
    );

    orch.run_cycle().await;

    let state = state.read().await;
    assert_eq!(state.status, PipelineStatus::Monitoring);

    // One severe event at the shocked station, none at the quiet one.
    let events = state.active_shock_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].station_id, "01F0100N");

    // It propagates to the single downstream neighbor.
    let predictions = state.propagation_predictions(Some("01F0150N"));
    assert_eq!(predictions.len(), 1);
    assert!((predictions[0].distance_km - 5.0).abs() < 1e-9);

    // Readings for both stations are visible through the state.
    assert_eq!(state.latest_readings("01F0100N", 60).len(), 2);
    assert_eq!(state.latest_readings("01F0150N", 60).len(), 2);

    // Exactly one cycle file on disk.
    let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn cool_down_after_repeated_failures_then_recovery() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(RwLock::new(PipelineState::default()));
    let mut orch = build_orchestrator(
        FlakySource::failing_first(defaults::MAX_CONSECUTIVE_FAILURES, shock_batch()),
        Arc::clone(&state),
        CancellationToken::new(),
        tmp.path(),
    );

    for _ in 0..defaults::MAX_CONSECUTIVE_FAILURES {
        orch.run_cycle().await;
    }
    {
        let state = state.read().await;
        assert_eq!(state.status, PipelineStatus::CoolingDown);
        assert_eq!(state.consecutive_failures, defaults::MAX_CONSECUTIVE_FAILURES);
        assert_eq!(state.cycles_completed, 0);
        assert_eq!(
            state.source_stats["scripted"].failures,
            u64::from(defaults::MAX_CONSECUTIVE_FAILURES)
        );
    }

    // With the source healthy again the pipeline resumes on its own.
    orch.run_cycle().await;
    let state = state.read().await;
    assert_eq!(state.status, PipelineStatus::Monitoring);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.cycles_completed, 1);
}

/// Readers on the shared state are never blocked or corrupted by a cycle
/// running concurrently.
#[tokio::test]
async fn concurrent_state_reads_during_cycles() {
    let tmp = tempfile::tempdir().unwrap();
    let state = Arc::new(RwLock::new(PipelineState::default()));
    let cancel = CancellationToken::new();
    let orch = build_orchestrator(
        FlakySource::healthy(shock_batch()),
        Arc::clone(&state),
        cancel.clone(),
        tmp.path(),
    );

    let pipeline = tokio::spawn(orch.run());

    let reader_state = Arc::clone(&state);
    let reader = tokio::spawn(async move {
        for _ in 0..50 {
            let state = reader_state.read().await;
            let readings = state.latest_readings("01F0100N", 60);
            // Snapshot copies are internally consistent and time-ordered.
            assert!(readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            for event in state.active_shock_events() {
                assert!(event.confidence >= 0.0 && event.confidence <= 1.0);
            }
            drop(state);
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    });

    reader.await.unwrap();
    cancel.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), pipeline)
        .await
        .expect("pipeline did not stop")
        .unwrap();
}

// ============================================================================
// Fusion behavior through the public API
// ============================================================================

#[tokio::test]
async fn same_minute_live_beats_historical() {
    let live = FlakySource::healthy(vec![reading("01F0100N", 5, 60.0, SourceTag::Live)]);
    let historical =
        FlakySource::healthy(vec![reading("01F0100N", 5, 90.0, SourceTag::Historical)]);
    let mut cache = FusionCache::new(&CacheConfig::default(), vec![historical, live]);

    cache.tick(&CancellationToken::new()).await;

    let snapshot = cache.snapshot();
    let run = &snapshot["01F0100N"];
    assert_eq!(run.len(), 1);
    assert_eq!(run[0].source, SourceTag::Live);
    assert!((run[0].median_speed - 60.0).abs() < 1e-9);
}

#[tokio::test]
async fn window_capacity_evicts_oldest_first() {
    let batch: Vec<Reading> = (0..10)
        .map(|m| reading("01F0100N", m, 90.0, SourceTag::Historical))
        .collect();
    let config = CacheConfig {
        capacity: 4,
        window_minutes: 60,
    };
    let mut cache = FusionCache::new(&config, vec![FlakySource::healthy(batch)]);

    cache.tick(&CancellationToken::new()).await;

    let snapshot = cache.snapshot();
    let run = &snapshot["01F0100N"];
    assert_eq!(run.len(), 4);
    // The four newest minutes survive, in order.
    let minutes: Vec<i64> = run
        .iter()
        .map(|r| i64::from(chrono::Timelike::minute(&r.timestamp)))
        .collect();
    assert_eq!(minutes, vec![6, 7, 8, 9]);
}

#[tokio::test]
async fn bootstrap_applies_once() {
    let mut cache = FusionCache::new(&CacheConfig::default(), Vec::new());
    let seed = vec![
        reading("01F0100N", 0, 90.0, SourceTag::Historical),
        reading("01F0100N", 5, 88.0, SourceTag::Historical),
    ];

    assert_eq!(cache.bootstrap(seed.clone()), 2);
    assert_eq!(cache.bootstrap(seed), 0);
    assert_eq!(cache.reading_count(), 2);
    assert!(cache.is_bootstrapped());
}

#[tokio::test]
async fn snapshot_is_ordered_and_deduplicated() {
    let mut cache = FusionCache::new(&CacheConfig::default(), Vec::new());
    cache.bootstrap(vec![
        reading("01F0100N", 10, 85.0, SourceTag::Historical),
        reading("01F0100N", 0, 90.0, SourceTag::Historical),
        reading("01F0100N", 5, 88.0, SourceTag::Historical),
        // Duplicate minute, same priority: the later arrival wins.
        reading("01F0100N", 5, 87.0, SourceTag::Historical),
    ]);

    let snapshot = cache.snapshot();
    let run = &snapshot["01F0100N"];
    assert_eq!(run.len(), 3);
    assert!(run.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!((run[1].median_speed - 87.0).abs() < 1e-9);
}
