//! Fusion Cache — merges every feed into one per-station timeline.
//!
//! The cache runs all configured sources concurrently each tick, with an
//! independent timeout per source, and folds whatever arrives into bounded
//! per-station windows ([`StationWindow`]). One dead source degrades the
//! tick; only a tick where every source comes back empty counts toward the
//! consecutive-failure total the orchestrator watches.

pub mod window;

pub use window::{InsertOutcome, StationWindow};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{defaults, CacheConfig};
use crate::connectors::{ConnectorError, SnapshotResult, SnapshotSource};
use crate::types::Reading;

// ============================================================================
// Tick reporting
// ============================================================================

/// Per-source outcome of one tick.
#[derive(Debug)]
pub struct SourceOutcome {
    pub name: &'static str,
    pub fetched: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub rejected: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn is_total_failure(&self) -> bool {
        self.fetched == 0 && self.error.is_some()
    }
}

/// Outcome of one fusion tick across all sources.
#[derive(Debug)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    /// Every source came back empty with an error.
    pub total_failure: bool,
    /// Running count of back-to-back totally failed ticks.
    pub consecutive_failures: u32,
}

impl TickReport {
    pub fn inserted(&self) -> usize {
        self.sources.iter().map(|s| s.inserted + s.replaced).sum()
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Bounded per-station reading cache fed by one or more snapshot sources.
pub struct FusionCache {
    windows: HashMap<String, StationWindow>,
    capacity: usize,
    window_minutes: i64,
    sources: Vec<Arc<dyn SnapshotSource>>,
    fetch_timeout: Duration,
    bootstrapped: bool,
    consecutive_failures: u32,
}

impl FusionCache {
    pub fn new(config: &CacheConfig, sources: Vec<Arc<dyn SnapshotSource>>) -> Self {
        Self {
            windows: HashMap::new(),
            capacity: config.capacity,
            window_minutes: config.window_minutes,
            sources,
            fetch_timeout: Duration::from_secs(defaults::CONNECTOR_TIMEOUT_SECS),
            bootstrapped: false,
            consecutive_failures: 0,
        }
    }

    /// Seed the cache with backfilled readings. Idempotent: a second call
    /// is a no-op so a restarted bootstrap cannot double-ingest.
    pub fn bootstrap(&mut self, readings: Vec<Reading>) -> usize {
        if self.bootstrapped {
            debug!("Bootstrap already applied, skipping");
            return 0;
        }
        self.bootstrapped = true;
        let (inserted, replaced, _) = self.ingest(readings);
        info!(inserted, replaced, stations = self.windows.len(), "Cache bootstrapped");
        inserted + replaced
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Run every source concurrently and fold the results in.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> TickReport {
        let started_at = Utc::now();

        let fetches = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let timeout = self.fetch_timeout;
            async move {
                let name = source.source_name();
                match tokio::time::timeout(timeout, source.fetch_snapshot(cancel)).await {
                    Ok(result) => (name, result),
                    Err(_) => (
                        name,
                        SnapshotResult::failed(ConnectorError::Timeout(timeout)),
                    ),
                }
            }
        });
        let results = futures::future::join_all(fetches).await;

        let mut sources = Vec::with_capacity(results.len());
        for (name, result) in results {
            let fetched = result.readings.len();
            let error = result.error.as_ref().map(ToString::to_string);
            if let Some(e) = &error {
                warn!(source = name, error = %e, fetched, "Source fetch degraded");
            }
            let (inserted, replaced, rejected) = self.ingest(result.readings);
            sources.push(SourceOutcome {
                name,
                fetched,
                inserted,
                replaced,
                rejected,
                error,
            });
        }

        let total_failure = !sources.is_empty() && sources.iter().all(SourceOutcome::is_total_failure);
        if total_failure {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }

        TickReport {
            started_at,
            sources,
            total_failure,
            consecutive_failures: self.consecutive_failures,
        }
    }

    /// Fold readings into their station windows.
    fn ingest(&mut self, readings: Vec<Reading>) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for reading in readings {
            let window = self
                .windows
                .entry(reading.station_id.clone())
                .or_insert_with(|| StationWindow::new(self.capacity));
            match window.insert(reading) {
                InsertOutcome::Inserted => counts.0 += 1,
                InsertOutcome::Replaced => counts.1 += 1,
                InsertOutcome::Rejected => counts.2 += 1,
            }
        }
        counts
    }

    /// Time-ordered copy of each station's recent readings, suitable for a
    /// detection pass without holding the cache.
    pub fn snapshot(&self) -> HashMap<String, Vec<Reading>> {
        self.windows
            .iter()
            .filter(|(_, window)| !window.is_empty())
            .map(|(id, window)| (id.clone(), window.recent(self.window_minutes)))
            .collect()
    }

    /// The freshest reading per station.
    pub fn latest_readings(&self) -> Vec<Reading> {
        let mut latest: Vec<Reading> = self
            .windows
            .values()
            .filter_map(|window| window.latest().cloned())
            .collect();
        latest.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        latest
    }

    pub fn station_count(&self) -> usize {
        self.windows.values().filter(|w| !w.is_empty()).count()
    }

    pub fn reading_count(&self) -> usize {
        self.windows.values().map(StationWindow::len).sum()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTag;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct StaticSource {
        name: &'static str,
        result: fn() -> SnapshotResult,
    }

    #[async_trait]
    impl SnapshotSource for StaticSource {
        async fn fetch_snapshot(&self, _cancel: &CancellationToken) -> SnapshotResult {
            (self.result)()
        }

        fn source_name(&self) -> &'static str {
            self.name
        }
    }

    fn reading(station: &str, minute: u32, source: SourceTag) -> Reading {
        Reading {
            station_id: station.into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 8, minute, 0).unwrap(),
            flow: 1200.0,
            median_speed: 90.0,
            avg_travel_time: 120.0,
            source,
        }
    }

    fn cache(sources: Vec<Arc<dyn SnapshotSource>>) -> FusionCache {
        FusionCache::new(&CacheConfig::default(), sources)
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let mut cache = cache(Vec::new());
        let seed = vec![
            reading("01F0340N", 0, SourceTag::Historical),
            reading("01F0340N", 5, SourceTag::Historical),
        ];
        assert_eq!(cache.bootstrap(seed.clone()), 2);
        assert_eq!(cache.bootstrap(seed), 0);
        assert_eq!(cache.reading_count(), 2);
    }

    #[tokio::test]
    async fn tick_merges_both_sources_with_live_priority() {
        let live: Arc<dyn SnapshotSource> = Arc::new(StaticSource {
            name: "live",
            result: || SnapshotResult::ok(vec![reading("01F0340N", 5, SourceTag::Live)]),
        });
        let historical: Arc<dyn SnapshotSource> = Arc::new(StaticSource {
            name: "historical",
            result: || {
                SnapshotResult::ok(vec![
                    reading("01F0340N", 5, SourceTag::Historical),
                    reading("01F0376N", 5, SourceTag::Historical),
                ])
            },
        });
        let mut cache = cache(vec![live, historical]);
        let report = cache.tick(&CancellationToken::new()).await;

        assert!(!report.total_failure);
        assert_eq!(cache.station_count(), 2);
        let snapshot = cache.snapshot();
        assert_eq!(snapshot["01F0340N"].len(), 1);
        assert_eq!(snapshot["01F0340N"][0].source, SourceTag::Live);
    }

    #[tokio::test]
    async fn one_dead_source_does_not_fail_the_tick() {
        let live: Arc<dyn SnapshotSource> = Arc::new(StaticSource {
            name: "live",
            result: || SnapshotResult::failed(ConnectorError::Auth("rejected".into())),
        });
        let historical: Arc<dyn SnapshotSource> = Arc::new(StaticSource {
            name: "historical",
            result: || SnapshotResult::ok(vec![reading("01F0340N", 5, SourceTag::Historical)]),
        });
        let mut cache = cache(vec![live, historical]);
        let report = cache.tick(&CancellationToken::new()).await;

        assert!(!report.total_failure);
        assert_eq!(report.consecutive_failures, 0);
        assert_eq!(report.inserted(), 1);
    }

    #[tokio::test]
    async fn total_failures_accumulate_and_reset() {
        let dead: Arc<dyn SnapshotSource> = Arc::new(StaticSource {
            name: "historical",
            result: || SnapshotResult::failed(ConnectorError::NoPublishedSlice),
        });
        let mut cache = cache(vec![dead]);
        let cancel = CancellationToken::new();

        for expected in 1..=3 {
            let report = cache.tick(&cancel).await;
            assert!(report.total_failure);
            assert_eq!(report.consecutive_failures, expected);
        }

        cache.sources = vec![Arc::new(StaticSource {
            name: "historical",
            result: || SnapshotResult::ok(vec![reading("01F0340N", 5, SourceTag::Historical)]),
        })];
        let report = cache.tick(&cancel).await;
        assert!(!report.total_failure);
        assert_eq!(report.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let source: Arc<dyn SnapshotSource> = Arc::new(StaticSource {
            name: "historical",
            result: || SnapshotResult::ok(vec![reading("01F0340N", 5, SourceTag::Historical)]),
        });
        let mut cache = cache(vec![source]);
        cache.tick(&CancellationToken::new()).await;

        let mut snapshot = cache.snapshot();
        snapshot.get_mut("01F0340N").unwrap().clear();
        assert_eq!(cache.reading_count(), 1);
    }
}
