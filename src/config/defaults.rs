//! System-wide default constants.
//!
//! Centralises the hand-tuned magic numbers used across the pipeline.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Cache / Fusion
// ============================================================================

/// Per-station cache window capacity (samples).
///
/// 120 samples at 1-minute resolution = 2 hours of history.
pub const CACHE_CAPACITY: usize = 120;

/// Default time window for bootstrap backfill and snapshot reads (minutes).
pub const WINDOW_MINUTES: i64 = 60;

/// Consecutive tick failures before the orchestrator enters cool-down.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Cool-down pause after too many consecutive failures (seconds).
pub const COOLDOWN_SECS: u64 = 600;

/// Per-connector fetch timeout inside a tick (seconds).
pub const CONNECTOR_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Connectors
// ============================================================================

/// Historical feed publishes in 5-minute slices.
pub const PROBE_STEP_MINUTES: i64 = 5;

/// How far back to probe for the latest published historical slice (minutes).
pub const PROBE_MAX_BACK_MINUTES: i64 = 120;

/// Refresh the live-feed access token this many seconds before expiry.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Bounded retry attempts for transient connector failures.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between retries (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

// ============================================================================
// Detection
// ============================================================================

/// Floor applied to speed before density division (km/h).
pub const SPEED_EPSILON_KMH: f64 = 0.1;

/// Density deltas below this are treated as zero when estimating wave speed.
pub const DENSITY_DELTA_EPSILON: f64 = 0.1;

/// Rankine-Hugoniot wave-speed clamp (km/h). Literature reports backward
/// shock speeds of roughly 4-7 km/h; anything past ±20 is measurement noise.
pub const MAX_WAVE_SPEED_KMH: f64 = 20.0;

/// Speed drop that qualifies on its own even without a density signal (km/h).
/// Handles sparse/irregular sampling where the density jump is unreliable.
pub const STRONG_SIGNAL_DROP_KMH: f64 = 30.0;

/// Events whose index ranges fall within this many samples of each other are
/// considered overlapping during dedup.
pub const OVERLAP_DEDUP_SAMPLES: usize = 2;

// ============================================================================
// Propagation
// ============================================================================

/// Downstream stations to predict per shock event.
pub const DOWNSTREAM_STATIONS: usize = 5;

/// Static propagation speed used until enough history accumulates (km/h).
pub const DEFAULT_PROPAGATION_SPEED_KMH: f64 = 25.0;

/// Minimum predicted travel time (minutes).
pub const MIN_TRAVEL_TIME_MIN: f64 = 1.0;

/// Distance at which prediction confidence bottoms out (km).
pub const CONFIDENCE_DISTANCE_SCALE_KM: f64 = 100.0;

/// Confidence floor for the distance decay factor.
pub const CONFIDENCE_DISTANCE_FLOOR: f64 = 0.3;

/// Plausible propagation speed bounds for learned speeds (km/h).
pub const PROPAGATION_SPEED_MIN_KMH: f64 = 2.0;
pub const PROPAGATION_SPEED_MAX_KMH: f64 = 80.0;

/// Corroborations required before a learned speed replaces the default.
pub const LEARNING_MIN_SAMPLES: usize = 3;

/// A downstream detection corroborates a prediction if it lands within this
/// many minutes of the predicted arrival.
pub const CORROBORATION_TOLERANCE_MIN: i64 = 15;

// ============================================================================
// Orchestrator / Output
// ============================================================================

/// Interval between pipeline cycles (seconds).
pub const TICK_INTERVAL_SECS: u64 = 60;

/// Cycle output files older than this are purged (hours).
pub const OUTPUT_RETENTION_HOURS: i64 = 24;

/// Emit a periodic status report every N cycles.
pub const STATUS_REPORT_EVERY_CYCLES: u64 = 10;
