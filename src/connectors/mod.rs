//! Source Connectors — independent feed clients behind one trait.
//!
//! Each connector fetches and normalizes raw feed records into [`Reading`]s.
//! A connector never blocks indefinitely and never throws past its boundary:
//! `fetch_snapshot` always returns best-effort partial results plus an
//! optional error flag ([`SnapshotResult`]), so a failing source degrades
//! the fusion cycle instead of aborting it.

pub mod historical;
pub mod live;

pub use historical::HistoricalConnector;
pub use live::LiveConnector;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::types::Reading;

// ============================================================================
// Errors
// ============================================================================

/// Connector failure taxonomy. Transient variants are retried locally with
/// bounded backoff; the rest surface in the tick report unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("credential exchange failed: {0}")]
    Auth(String),

    #[error("malformed feed payload: {0}")]
    Parse(String),

    #[error("no published slice found within probe window")]
    NoPublishedSlice,

    #[error("fetch cancelled")]
    Cancelled,
}

impl ConnectorError {
    /// Whether a bounded retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::Timeout(_) => true,
            ConnectorError::Http(e) => e.is_timeout() || e.is_connect(),
            ConnectorError::Status(code) => code.is_server_error(),
            ConnectorError::Auth(_)
            | ConnectorError::Parse(_)
            | ConnectorError::NoPublishedSlice
            | ConnectorError::Cancelled => false,
        }
    }
}

// ============================================================================
// Snapshot contract
// ============================================================================

/// Outcome of one snapshot fetch: whatever readings were recovered, plus the
/// error that cut the fetch short (if any).
#[derive(Debug)]
pub struct SnapshotResult {
    pub readings: Vec<Reading>,
    pub error: Option<ConnectorError>,
}

impl SnapshotResult {
    pub fn ok(readings: Vec<Reading>) -> Self {
        Self {
            readings,
            error: None,
        }
    }

    pub fn failed(error: ConnectorError) -> Self {
        Self {
            readings: Vec::new(),
            error: Some(error),
        }
    }

    pub fn partial(readings: Vec<Reading>, error: ConnectorError) -> Self {
        Self {
            readings,
            error: Some(error),
        }
    }

    /// True when the fetch produced nothing usable at all.
    pub fn is_total_failure(&self) -> bool {
        self.readings.is_empty() && self.error.is_some()
    }
}

/// A cancellable, bounded-timeout snapshot feed.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the latest snapshot. Cancellation aborts in-flight work
    /// promptly; the result then carries [`ConnectorError::Cancelled`].
    async fn fetch_snapshot(&self, cancel: &CancellationToken) -> SnapshotResult;

    fn source_name(&self) -> &'static str;
}

// ============================================================================
// Retry policy
// ============================================================================

/// Bounded exponential backoff with jitter. Each connector owns one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), with ±25% jitter so
    /// parallel connectors don't hammer a recovering upstream in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * (1u64 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        Duration::from_millis((exp as f64 * jitter) as u64)
    }

    /// Sleep before the next attempt, returning `false` if cancelled.
    pub async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay_for(attempt)) => true,
        }
    }
}
