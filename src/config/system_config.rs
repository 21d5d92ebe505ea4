//! System Configuration - all pipeline thresholds as operator-tunable TOML
//! values.
//!
//! Every struct implements `Default` with the hand-tuned constants from
//! [`defaults`], so behavior is identical when no config file is present.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use super::validation::{self, ConfigError};
use crate::types::Severity;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a shockline deployment.
///
/// Load with `SystemConfig::load()` which searches:
/// 1. `$SHOCKLINE_CONFIG` env var
/// 2. `./shockline.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Static topology inputs
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Live-feed connector
    #[serde(default)]
    pub live_feed: LiveFeedConfig,

    /// Historical-feed connector
    #[serde(default)]
    pub historical_feed: HistoricalFeedConfig,

    /// Fusion & cache layer
    #[serde(default)]
    pub cache: CacheConfig,

    /// Shockwave detection tiers
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Propagation predictor
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Orchestrator cycle timing and failure handling
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Per-cycle output persistence
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            live_feed: LiveFeedConfig::default(),
            historical_feed: HistoricalFeedConfig::default(),
            cache: CacheConfig::default(),
            detection: DetectionConfig::default(),
            propagation: PropagationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Load configuration using the standard search order, then validate.
    ///
    /// Returns `Err` only for a malformed or inconsistent file — a missing
    /// file silently falls back to defaults (which always validate).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("SHOCKLINE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded config from SHOCKLINE_CONFIG");
                return Ok(config);
            }
            warn!(path = %path, "SHOCKLINE_CONFIG points to non-existent file, falling back");
        }

        let local = Path::new("shockline.toml");
        if local.exists() {
            let config = Self::load_from_file(local)?;
            info!(path = %local.display(), "Loaded config from ./shockline.toml");
            return Ok(config);
        }

        info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validation::validate(&config)?;
        Ok(config)
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Where the static reference data lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Station registry CSV (canonical ID, highway, direction, lat, lon).
    #[serde(default = "TopologyConfig::default_registry_path")]
    pub registry_path: PathBuf,
    /// Pairwise distance edge list CSV (from, to, km).
    #[serde(default = "TopologyConfig::default_distance_path")]
    pub distance_path: PathBuf,
}

impl TopologyConfig {
    fn default_registry_path() -> PathBuf {
        PathBuf::from("data/stations.csv")
    }
    fn default_distance_path() -> PathBuf {
        PathBuf::from("data/distances.csv")
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            registry_path: Self::default_registry_path(),
            distance_path: Self::default_distance_path(),
        }
    }
}

// ============================================================================
// Connectors
// ============================================================================

/// OAuth2-authenticated live snapshot feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFeedConfig {
    #[serde(default = "LiveFeedConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "LiveFeedConfig::default_auth_url")]
    pub auth_url: String,
    /// Client credentials; empty values disable the live connector.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "LiveFeedConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "LiveFeedConfig::default_max_retries")]
    pub max_retries: u32,
}

impl LiveFeedConfig {
    fn default_base_url() -> String {
        "https://tdx.transportdata.tw/api/basic".into()
    }
    fn default_auth_url() -> String {
        "https://tdx.transportdata.tw/auth/realms/TDXConnect/protocol/openid-connect/token".into()
    }
    fn default_timeout_secs() -> u64 {
        defaults::CONNECTOR_TIMEOUT_SECS
    }
    fn default_max_retries() -> u32 {
        defaults::MAX_RETRY_ATTEMPTS
    }

    /// Whether credentials are configured at all.
    pub fn enabled(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            auth_url: Self::default_auth_url(),
            client_id: std::env::var("SHOCKLINE_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("SHOCKLINE_CLIENT_SECRET").unwrap_or_default(),
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
        }
    }
}

/// Time-indexed historical snapshot feed (two feed codes per timepoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalFeedConfig {
    #[serde(default = "HistoricalFeedConfig::default_base_url")]
    pub base_url: String,
    /// Feed code carrying per-class speed/volume rows.
    #[serde(default = "HistoricalFeedConfig::default_speed_code")]
    pub speed_volume_code: String,
    /// Feed code carrying per-class travel-time rows.
    #[serde(default = "HistoricalFeedConfig::default_travel_code")]
    pub travel_time_code: String,
    #[serde(default = "HistoricalFeedConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// How far back to probe for the latest published slice (minutes).
    #[serde(default = "HistoricalFeedConfig::default_probe_back")]
    pub probe_max_back_minutes: i64,
}

impl HistoricalFeedConfig {
    fn default_base_url() -> String {
        "https://tisvcloud.freeway.gov.tw".into()
    }
    fn default_speed_code() -> String {
        "M05A".into()
    }
    fn default_travel_code() -> String {
        "M04A".into()
    }
    fn default_timeout_secs() -> u64 {
        20
    }
    fn default_probe_back() -> i64 {
        defaults::PROBE_MAX_BACK_MINUTES
    }
}

impl Default for HistoricalFeedConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            speed_volume_code: Self::default_speed_code(),
            travel_time_code: Self::default_travel_code(),
            timeout_secs: Self::default_timeout_secs(),
            probe_max_back_minutes: Self::default_probe_back(),
        }
    }
}

// ============================================================================
// Fusion & Cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Per-station window capacity (samples).
    #[serde(default = "CacheConfig::default_capacity")]
    pub capacity: usize,
    /// Bootstrap backfill window (minutes).
    #[serde(default = "CacheConfig::default_window_minutes")]
    pub window_minutes: i64,
}

impl CacheConfig {
    fn default_capacity() -> usize {
        defaults::CACHE_CAPACITY
    }
    fn default_window_minutes() -> i64 {
        defaults::WINDOW_MINUTES
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            window_minutes: Self::default_window_minutes(),
        }
    }
}

// ============================================================================
// Detection
// ============================================================================

/// One severity tier of the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Speed drop band for this tier (km/h).
    pub speed_drop_min: f64,
    pub speed_drop_max: f64,
    /// Minimum pre-shock speed for the tier to apply (km/h).
    pub initial_speed_min: f64,
    /// Minimum density jump (veh/km).
    pub density_increase_min: f64,
    /// Maximum minutes between the two samples of a candidate pair.
    pub max_time_gap_min: f64,
}

/// Ordered tier set plus the strong-signal override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "DetectionConfig::default_mild")]
    pub mild: TierConfig,
    #[serde(default = "DetectionConfig::default_moderate")]
    pub moderate: TierConfig,
    #[serde(default = "DetectionConfig::default_severe")]
    pub severe: TierConfig,
    /// A speed drop at or above this qualifies even without a density signal.
    #[serde(default = "DetectionConfig::default_strong_signal")]
    pub strong_signal_drop_kmh: f64,
}

impl DetectionConfig {
    fn default_mild() -> TierConfig {
        TierConfig {
            speed_drop_min: 10.0,
            speed_drop_max: 25.0,
            initial_speed_min: 25.0,
            density_increase_min: 1.0,
            max_time_gap_min: 20.0,
        }
    }
    fn default_moderate() -> TierConfig {
        TierConfig {
            speed_drop_min: 25.0,
            speed_drop_max: 40.0,
            initial_speed_min: 30.0,
            density_increase_min: 2.0,
            max_time_gap_min: 20.0,
        }
    }
    fn default_severe() -> TierConfig {
        TierConfig {
            speed_drop_min: 40.0,
            speed_drop_max: 100.0,
            initial_speed_min: 35.0,
            density_increase_min: 3.0,
            max_time_gap_min: 20.0,
        }
    }
    fn default_strong_signal() -> f64 {
        defaults::STRONG_SIGNAL_DROP_KMH
    }

    /// Tier configs in ascending severity order.
    pub fn tiers(&self) -> [(Severity, &TierConfig); 3] {
        [
            (Severity::Mild, &self.mild),
            (Severity::Moderate, &self.moderate),
            (Severity::Severe, &self.severe),
        ]
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mild: Self::default_mild(),
            moderate: Self::default_moderate(),
            severe: Self::default_severe(),
            strong_signal_drop_kmh: Self::default_strong_signal(),
        }
    }
}

// ============================================================================
// Propagation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Downstream stations to predict per event.
    #[serde(default = "PropagationConfig::default_downstream")]
    pub downstream_stations: usize,
    /// Static propagation speed used absent learned history (km/h).
    #[serde(default = "PropagationConfig::default_speed")]
    pub default_speed_kmh: f64,
    /// Whether to fold corroborated detections into a rolling speed average.
    #[serde(default = "PropagationConfig::default_learning")]
    pub learning_enabled: bool,
}

impl PropagationConfig {
    fn default_downstream() -> usize {
        defaults::DOWNSTREAM_STATIONS
    }
    fn default_speed() -> f64 {
        defaults::DEFAULT_PROPAGATION_SPEED_KMH
    }
    fn default_learning() -> bool {
        true
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            downstream_stations: Self::default_downstream(),
            default_speed_kmh: Self::default_speed(),
            learning_enabled: Self::default_learning(),
        }
    }
}

// ============================================================================
// Orchestrator / Output
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds between pipeline cycles.
    #[serde(default = "OrchestratorConfig::default_interval")]
    pub tick_interval_secs: u64,
    /// Consecutive tick failures before cool-down.
    #[serde(default = "OrchestratorConfig::default_max_failures")]
    pub max_consecutive_failures: u32,
    /// Cool-down pause duration (seconds).
    #[serde(default = "OrchestratorConfig::default_cooldown")]
    pub cooldown_secs: u64,
}

impl OrchestratorConfig {
    fn default_interval() -> u64 {
        defaults::TICK_INTERVAL_SECS
    }
    fn default_max_failures() -> u32 {
        defaults::MAX_CONSECUTIVE_FAILURES
    }
    fn default_cooldown() -> u64 {
        defaults::COOLDOWN_SECS
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: Self::default_interval(),
            max_consecutive_failures: Self::default_max_failures(),
            cooldown_secs: Self::default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for per-cycle JSON output files. Empty disables persistence.
    #[serde(default = "OutputConfig::default_dir")]
    pub dir: PathBuf,
    /// Files older than this are purged (hours).
    #[serde(default = "OutputConfig::default_retention")]
    pub retention_hours: i64,
}

impl OutputConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from("data/cycles")
    }
    fn default_retention() -> i64 {
        defaults::OUTPUT_RETENTION_HOURS
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            retention_hours: Self::default_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = SystemConfig::default();
        assert!(validation::validate(&config).is_ok());
    }

    #[test]
    fn tier_bands_are_contiguous_by_default() {
        let d = DetectionConfig::default();
        assert!((d.mild.speed_drop_max - d.moderate.speed_drop_min).abs() < f64::EPSILON);
        assert!((d.moderate.speed_drop_max - d.severe.speed_drop_min).abs() < f64::EPSILON);
    }

    #[test]
    fn toml_roundtrip_preserves_tiers() {
        let config = SystemConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: SystemConfig = toml::from_str(&text).unwrap();
        assert!((back.detection.severe.speed_drop_min - 40.0).abs() < f64::EPSILON);
        assert_eq!(back.propagation.downstream_stations, 5);
    }
}
