//! Live snapshot connector — OAuth2-authenticated per-pair feed.
//!
//! The live feed returns one record per gantry pair with nested per-vehicle-
//! class flow/speed/travel-time rows and a collection timestamp. Raw class
//! volumes are converted to uniform vehicle-equivalent flow with a piecewise,
//! speed-dependent weighting, then aggregated to one [`Reading`] per station.
//!
//! The access credential comes from a client-credentials exchange and is
//! cached until shortly before expiry. A 401 invalidates the cached
//! credential exactly once and retries; transient failures back off
//! exponentially with bounded attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ConnectorError, RetryPolicy, SnapshotResult, SnapshotSource};
use crate::config::{defaults, LiveFeedConfig};
use crate::topology::{normalize_station_id, StationRegistry};
use crate::types::{Reading, SourceTag};

/// Live feed reports 1-minute vehicle counts; scale to per-hour flow.
const LIVE_FLOW_SCALE: f64 = 60.0;

// ============================================================================
// Vehicle-equivalent weighting
// ============================================================================

/// Mixed-class vehicle volumes are converted to passenger-car equivalents
/// with a speed-dependent weighting. Class codes follow the feed:
/// 1/2 small car/truck, 3 bus, 4 heavy truck, 5 trailer (plus the legacy
/// 31/32/41/42 aliases).
pub fn vehicle_equivalent(vehicle_type: u8, speed_kmh: f64) -> f64 {
    match vehicle_type {
        1 | 2 | 31 | 32 => 1.0,
        3 | 41 => {
            if speed_kmh < 70.0 {
                1.13 + 1.66 * (-speed_kmh / 34.93).exp()
            } else if speed_kmh <= 87.0 {
                2.79 - 0.0206 * speed_kmh
            } else {
                1.0
            }
        }
        4 | 42 => {
            if speed_kmh <= 105.0 {
                1.9 - 0.008_57 * speed_kmh
            } else {
                1.0
            }
        }
        5 => {
            if speed_kmh <= 108.0 {
                2.7 - 0.015_7 * speed_kmh
            } else {
                1.0
            }
        }
        _ => 1.0,
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LivePayload {
    Wrapped {
        #[serde(rename = "ETagPairLives")]
        lives: Vec<LivePairRecord>,
    },
    Bare(Vec<LivePairRecord>),
}

impl LivePayload {
    fn into_records(self) -> Vec<LivePairRecord> {
        match self {
            LivePayload::Wrapped { lives } => lives,
            LivePayload::Bare(records) => records,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LivePairRecord {
    #[serde(rename = "ETagPairID", default)]
    pair_id: String,
    #[serde(rename = "Flows", default)]
    flows: Vec<LiveFlowRecord>,
    #[serde(rename = "DataCollectTime", default)]
    collect_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LiveFlowRecord {
    #[serde(rename = "VehicleType", default)]
    vehicle_type: u8,
    #[serde(rename = "TravelTime", default)]
    travel_time: f64,
    #[serde(rename = "SpaceMeanSpeed", default)]
    speed: f64,
    #[serde(rename = "VehicleCount", default)]
    count: f64,
}

// ============================================================================
// Token cache
// ============================================================================

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Live-feed connector with lazily refreshed credentials.
pub struct LiveConnector {
    http: reqwest::Client,
    config: LiveFeedConfig,
    registry: Arc<StationRegistry>,
    retry: RetryPolicy,
    /// Single shared mutable credential; refreshed lazily before expiry.
    token: Mutex<Option<CachedToken>>,
}

impl LiveConnector {
    pub fn new(config: LiveFeedConfig, registry: Arc<StationRegistry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        let retry = RetryPolicy::with_max_attempts(config.max_retries);
        Self {
            http,
            config,
            registry,
            retry,
            token: Mutex::new(None),
        }
    }

    /// Return the cached access token, exchanging credentials if the cache
    /// is empty or near expiry.
    async fn access_token(&self) -> Result<String, ConnectorError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.is_valid() {
                return Ok(cached.access_token.clone());
            }
        }

        debug!("Exchanging client credentials for live-feed token");
        let response = self
            .http
            .post(&self.config.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ConnectorError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Auth(e.to_string()))?;

        let expires_at = Utc::now()
            + ChronoDuration::seconds(
                (token.expires_in - defaults::TOKEN_REFRESH_MARGIN_SECS).max(0),
            );
        let access_token = token.access_token.clone();
        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// One authenticated snapshot request, no retries.
    async fn fetch_once(&self) -> Result<Vec<Reading>, ConnectorError> {
        let token = self.access_token().await?;
        let url = format!("{}/v2/Road/Traffic/Live/ETag/Freeway", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[("$format", "JSON")])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ConnectorError::Auth("access token rejected".into()));
        }
        if !status.is_success() {
            return Err(ConnectorError::Status(status));
        }

        let payload: LivePayload = response
            .json()
            .await
            .map_err(|e| ConnectorError::Parse(e.to_string()))?;

        Ok(self.normalize(payload.into_records()))
    }

    /// Convert per-pair class rows into one reading per known station.
    fn normalize(&self, records: Vec<LivePairRecord>) -> Vec<Reading> {
        let now = Utc::now();
        let mut readings = Vec::new();

        for record in records {
            let Some(station_id) = normalize_station_id(&record.pair_id) else {
                continue;
            };
            if !self.registry.contains(&station_id) {
                continue;
            }

            let mut weighted_flow = 0.0;
            let mut speed_volume = 0.0;
            let mut travel_volume = 0.0;
            let mut total_volume = 0.0;
            for flow in &record.flows {
                if flow.count <= 0.0 || flow.speed <= 0.0 {
                    continue;
                }
                weighted_flow += flow.count * vehicle_equivalent(flow.vehicle_type, flow.speed);
                speed_volume += flow.speed * flow.count;
                travel_volume += flow.travel_time * flow.count;
                total_volume += flow.count;
            }
            if total_volume <= 0.0 {
                continue;
            }

            let timestamp = record
                .collect_time
                .unwrap_or(now)
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now);

            readings.push(Reading {
                station_id,
                timestamp,
                flow: weighted_flow * LIVE_FLOW_SCALE,
                median_speed: speed_volume / total_volume,
                avg_travel_time: travel_volume / total_volume,
                source: SourceTag::Live,
            });
        }

        readings
    }
}

#[async_trait]
impl SnapshotSource for LiveConnector {
    async fn fetch_snapshot(&self, cancel: &CancellationToken) -> SnapshotResult {
        if !self.config.enabled() {
            return SnapshotResult::ok(Vec::new());
        }

        let mut auth_retried = false;
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return SnapshotResult::failed(ConnectorError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
                result = self.fetch_once() => result,
            };

            match outcome {
                Ok(readings) => {
                    debug!(readings = readings.len(), "Live snapshot fetched");
                    return SnapshotResult::ok(readings);
                }
                // An expired-but-cached token surfaces as a 401; drop it
                // once and retry immediately.
                Err(ConnectorError::Auth(reason)) if !auth_retried => {
                    warn!(%reason, "Live credential rejected, refreshing once");
                    self.invalidate_token().await;
                    auth_retried = true;
                }
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Transient live-feed failure, backing off");
                    if !self.retry.backoff(attempt, cancel).await {
                        return SnapshotResult::failed(ConnectorError::Cancelled);
                    }
                }
                Err(e) => return SnapshotResult::failed(e),
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "live"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_vehicles_are_unity() {
        assert!((vehicle_equivalent(1, 90.0) - 1.0).abs() < f64::EPSILON);
        assert!((vehicle_equivalent(2, 30.0) - 1.0).abs() < f64::EPSILON);
        assert!((vehicle_equivalent(31, 50.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bus_weighting_is_piecewise() {
        // Slow bus: exponential regime, heavier than a car.
        let slow = vehicle_equivalent(3, 40.0);
        assert!(slow > 1.5, "got {slow}");
        // Mid band: linear regime.
        let mid = vehicle_equivalent(3, 80.0);
        assert!((mid - (2.79 - 0.0206 * 80.0)).abs() < 1e-9);
        // Free flow: unity.
        assert!((vehicle_equivalent(3, 100.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn heavy_classes_decay_with_speed() {
        assert!(vehicle_equivalent(4, 30.0) > vehicle_equivalent(4, 100.0));
        assert!(vehicle_equivalent(5, 30.0) > vehicle_equivalent(5, 100.0));
        assert!((vehicle_equivalent(5, 110.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_class_defaults_to_unity() {
        assert!((vehicle_equivalent(99, 50.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn equivalents_exceed_unity_in_congestion() {
        // At congested speeds every heavy class outweighs a passenger car.
        for class in [3u8, 4, 5] {
            assert!(vehicle_equivalent(class, 25.0) > 1.0, "class {class}");
        }
    }
}
