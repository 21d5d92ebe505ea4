//! Cycle Output Persistence
//!
//! Writes one JSON file per pipeline cycle into the configured output
//! directory and purges files past the retention horizon. Output failures
//! are logged by the caller and never abort a cycle.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OutputConfig;
use crate::types::{PropagationPrediction, Reading, ShockEvent};

const CYCLE_PREFIX: &str = "cycle_";
const CYCLE_SUFFIX: &str = ".json";
const CYCLE_STAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything one cycle produced, as persisted to disk.
#[derive(Debug, Serialize, Deserialize)]
pub struct CycleRecord {
    pub completed_at: DateTime<Utc>,
    pub cycle: u64,
    pub stations: usize,
    pub readings_cached: usize,
    pub latest_readings: Vec<Reading>,
    pub shock_events: Vec<ShockEvent>,
    pub predictions: Vec<PropagationPrediction>,
}

/// Per-cycle file writer with age-based purge.
pub struct OutputWriter {
    dir: PathBuf,
    retention: ChronoDuration,
    enabled: bool,
}

impl OutputWriter {
    pub fn new(config: &OutputConfig) -> Result<Self, OutputError> {
        let enabled = !config.dir.as_os_str().is_empty();
        if enabled {
            fs::create_dir_all(&config.dir)?;
        }
        Ok(Self {
            dir: config.dir.clone(),
            retention: ChronoDuration::hours(config.retention_hours),
            enabled,
        })
    }

    /// Persist one cycle record. Returns the written path.
    pub fn write_cycle(&self, record: &CycleRecord) -> Result<Option<PathBuf>, OutputError> {
        if !self.enabled {
            return Ok(None);
        }
        let name = format!(
            "{CYCLE_PREFIX}{}{CYCLE_SUFFIX}",
            record.completed_at.format(CYCLE_STAMP)
        );
        let path = self.dir.join(name);
        fs::write(&path, serde_json::to_vec_pretty(record)?)?;
        debug!(path = %path.display(), events = record.shock_events.len(), "Cycle persisted");
        Ok(Some(path))
    }

    /// Delete cycle files older than the retention horizon. Files that do
    /// not follow the cycle naming convention are left alone.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, OutputError> {
        if !self.enabled {
            return Ok(0);
        }
        let cutoff = now - self.retention;
        let mut purged = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(stamp) = cycle_timestamp(&path) else {
                continue;
            };
            if stamp < cutoff {
                fs::remove_file(&path)?;
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "Expired cycle files removed");
        }
        Ok(purged)
    }
}

/// Parse the UTC timestamp out of a `cycle_YYYYMMDD_HHMMSS.json` path.
fn cycle_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stamp = name
        .strip_prefix(CYCLE_PREFIX)?
        .strip_suffix(CYCLE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, CYCLE_STAMP)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(completed_at: DateTime<Utc>) -> CycleRecord {
        CycleRecord {
            completed_at,
            cycle: 1,
            stations: 0,
            readings_cached: 0,
            latest_readings: Vec::new(),
            shock_events: Vec::new(),
            predictions: Vec::new(),
        }
    }

    fn writer(dir: &Path, retention_hours: i64) -> OutputWriter {
        OutputWriter::new(&OutputConfig {
            dir: dir.to_path_buf(),
            retention_hours,
        })
        .unwrap()
    }

    #[test]
    fn cycle_files_follow_the_naming_convention() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 24);
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 8, 5, 0).unwrap();
        let path = w.write_cycle(&record(at)).unwrap().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "cycle_20260314_080500.json"
        );
        assert_eq!(cycle_timestamp(&path), Some(at));
    }

    #[test]
    fn purge_removes_only_expired_cycle_files() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 24);
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();

        w.write_cycle(&record(now - ChronoDuration::hours(30))).unwrap();
        w.write_cycle(&record(now - ChronoDuration::hours(1))).unwrap();
        // Unrelated file must survive.
        fs::write(tmp.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(w.purge_expired(now).unwrap(), 1);
        let remaining: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"notes.txt".to_string()));
    }

    #[test]
    fn empty_dir_disables_persistence() {
        let w = writer(Path::new(""), 24);
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 8, 5, 0).unwrap();
        assert!(w.write_cycle(&record(at)).unwrap().is_none());
        assert_eq!(w.purge_expired(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn round_trips_through_json() {
        let tmp = tempfile::tempdir().unwrap();
        let w = writer(tmp.path(), 24);
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 8, 5, 0).unwrap();
        let path = w.write_cycle(&record(at)).unwrap().unwrap();
        let loaded: CycleRecord =
            serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(loaded.completed_at, at);
        assert_eq!(loaded.cycle, 1);
    }
}
