//! System Configuration Module
//!
//! Provides pipeline configuration loaded from TOML files, replacing all
//! hardcoded detection thresholds with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `SHOCKLINE_CONFIG` environment variable (path to TOML file)
//! 2. `shockline.toml` in the current working directory
//! 3. Built-in hand-tuned defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(SystemConfig::load()?);
//!
//! // Anywhere in the codebase:
//! let interval = config::get().orchestrator.tick_interval_secs;
//! ```
//!
//! Tier thresholds are validated for monotonic consistency at load time;
//! an inconsistent configuration is a fatal startup error.

mod system_config;
pub mod defaults;
pub mod validation;

pub use system_config::*;
pub use validation::ConfigError;

use std::sync::OnceLock;

/// Global system configuration, initialized once at startup.
static SYSTEM_CONFIG: OnceLock<SystemConfig> = OnceLock::new();

/// Initialize the global system configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: SystemConfig) {
    if SYSTEM_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global system configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
#[allow(clippy::expect_used)]
pub fn get() -> &'static SystemConfig {
    SYSTEM_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    SYSTEM_CONFIG.get().is_some()
}
