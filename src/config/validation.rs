//! Load-time validation for detection tiers and pipeline parameters.
//!
//! Tier thresholds must be monotonically consistent across severity levels:
//! a stronger tier can never be triggered by a weaker measurement. Checked
//! once at configuration load; a violation is fatal at startup.

use thiserror::Error;

use super::system_config::{SystemConfig, TierConfig};

/// Fatal configuration errors. Only raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("inconsistent tier thresholds: {0}")]
    InconsistentTiers(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid topology: {0}")]
    Topology(String),
}

/// Validate a loaded configuration. Returns the first violation found.
pub fn validate(config: &SystemConfig) -> Result<(), ConfigError> {
    validate_tier_internals(config)?;
    validate_tier_monotonicity(config)?;
    validate_ranges(config)?;
    Ok(())
}

/// Each tier's own band must be well-formed.
fn validate_tier_internals(config: &SystemConfig) -> Result<(), ConfigError> {
    for (severity, tier) in config.detection.tiers() {
        if tier.speed_drop_min <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("detection.{severity}.speed_drop_min"),
                reason: "must be positive".into(),
            });
        }
        if tier.speed_drop_max <= tier.speed_drop_min {
            return Err(ConfigError::InconsistentTiers(format!(
                "{severity}: speed_drop_max ({}) must exceed speed_drop_min ({})",
                tier.speed_drop_max, tier.speed_drop_min
            )));
        }
        if tier.max_time_gap_min <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("detection.{severity}.max_time_gap_min"),
                reason: "must be positive".into(),
            });
        }
        if tier.density_increase_min < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: format!("detection.{severity}.density_increase_min"),
                reason: "must be non-negative".into(),
            });
        }
    }
    Ok(())
}

/// Thresholds must not regress as severity increases.
fn validate_tier_monotonicity(config: &SystemConfig) -> Result<(), ConfigError> {
    let tiers = config.detection.tiers();
    for pair in tiers.windows(2) {
        let (lo_sev, lo) = (pair[0].0, pair[0].1);
        let (hi_sev, hi) = (pair[1].0, pair[1].1);
        check_non_decreasing(lo_sev.as_str(), hi_sev.as_str(), "speed_drop_min", lo, hi, |t| {
            t.speed_drop_min
        })?;
        check_non_decreasing(lo_sev.as_str(), hi_sev.as_str(), "speed_drop_max", lo, hi, |t| {
            t.speed_drop_max
        })?;
        check_non_decreasing(
            lo_sev.as_str(),
            hi_sev.as_str(),
            "initial_speed_min",
            lo,
            hi,
            |t| t.initial_speed_min,
        )?;
        check_non_decreasing(
            lo_sev.as_str(),
            hi_sev.as_str(),
            "density_increase_min",
            lo,
            hi,
            |t| t.density_increase_min,
        )?;
    }
    Ok(())
}

fn check_non_decreasing(
    lo_name: &str,
    hi_name: &str,
    field: &str,
    lo: &TierConfig,
    hi: &TierConfig,
    get: impl Fn(&TierConfig) -> f64,
) -> Result<(), ConfigError> {
    if get(hi) < get(lo) {
        return Err(ConfigError::InconsistentTiers(format!(
            "{field} decreases from {lo_name} ({}) to {hi_name} ({})",
            get(lo),
            get(hi)
        )));
    }
    Ok(())
}

fn validate_ranges(config: &SystemConfig) -> Result<(), ConfigError> {
    if config.cache.capacity < 2 {
        return Err(ConfigError::InvalidValue {
            field: "cache.capacity".into(),
            reason: "detection needs at least 2 samples".into(),
        });
    }
    if config.cache.window_minutes <= 0 {
        return Err(ConfigError::InvalidValue {
            field: "cache.window_minutes".into(),
            reason: "must be positive".into(),
        });
    }
    if config.propagation.default_speed_kmh <= 0.0 {
        return Err(ConfigError::InvalidValue {
            field: "propagation.default_speed_kmh".into(),
            reason: "must be positive".into(),
        });
    }
    if config.propagation.downstream_stations == 0 {
        return Err(ConfigError::InvalidValue {
            field: "propagation.downstream_stations".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.orchestrator.tick_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "orchestrator.tick_interval_secs".into(),
            reason: "must be positive".into(),
        });
    }
    if config.detection.strong_signal_drop_kmh <= 0.0 {
        return Err(ConfigError::InvalidValue {
            field: "detection.strong_signal_drop_kmh".into(),
            reason: "must be positive".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;

    #[test]
    fn default_config_validates() {
        assert!(validate(&SystemConfig::default()).is_ok());
    }

    #[test]
    fn decreasing_drop_min_across_tiers_is_rejected() {
        let mut config = SystemConfig::default();
        config.detection.severe.speed_drop_min = 5.0;
        config.detection.severe.speed_drop_max = 100.0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentTiers(_)));
    }

    #[test]
    fn inverted_band_within_tier_is_rejected() {
        let mut config = SystemConfig::default();
        config.detection.mild.speed_drop_max = 5.0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentTiers(_)));
    }

    #[test]
    fn decreasing_initial_speed_is_rejected() {
        let mut config = SystemConfig::default();
        config.detection.moderate.initial_speed_min = 10.0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentTiers(_)));
    }

    #[test]
    fn tiny_cache_is_rejected() {
        let mut config = SystemConfig::default();
        config.cache.capacity = 1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let mut config = SystemConfig::default();
        config.orchestrator.tick_interval_secs = 0;
        assert!(validate(&config).is_err());
    }
}
