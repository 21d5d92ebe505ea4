//! Historical snapshot connector — unauthenticated 5-minute CSV archive.
//!
//! The archive publishes one CSV per feed code per 5-minute slice, with a
//! variable publication lag. Each snapshot first probes backward from the
//! current slice to find the newest published file, then downloads the
//! speed/volume feed and the travel-time feed for that slice and merges
//! them into one [`Reading`] per station.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ConnectorError, SnapshotResult, SnapshotSource};
use crate::config::{defaults, HistoricalFeedConfig};
use crate::connectors::live::vehicle_equivalent;
use crate::topology::{normalize_station_id, StationRegistry};
use crate::types::{Reading, SourceTag};

/// Archive volumes cover 5 minutes; scale to per-hour flow.
const HIST_FLOW_SCALE: f64 = 12.0;

/// Per-station accumulator while folding CSV rows.
#[derive(Debug, Default)]
struct StationAccumulator {
    /// (class speed, class volume) pairs for the weighted median.
    speed_samples: Vec<(f64, f64)>,
    equivalent_flow: f64,
    travel_time_volume: f64,
    travel_volume: f64,
}

impl StationAccumulator {
    fn add_speed_row(&mut self, vehicle_type: u8, speed: f64, volume: f64) {
        if volume <= 0.0 || speed <= 0.0 {
            return;
        }
        self.speed_samples.push((speed, volume));
        self.equivalent_flow += volume * vehicle_equivalent(vehicle_type, speed);
    }

    fn add_travel_row(&mut self, travel_time: f64, volume: f64) {
        if volume <= 0.0 || travel_time <= 0.0 {
            return;
        }
        self.travel_time_volume += travel_time * volume;
        self.travel_volume += volume;
    }

    /// Volume-weighted median of the per-class speeds.
    fn median_speed(&self) -> Option<f64> {
        if self.speed_samples.is_empty() {
            return None;
        }
        let mut samples = self.speed_samples.clone();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        let half: f64 = samples.iter().map(|(_, v)| v).sum::<f64>() / 2.0;
        let mut seen = 0.0;
        for (speed, volume) in &samples {
            seen += volume;
            if seen >= half {
                return Some(*speed);
            }
        }
        samples.last().map(|(speed, _)| *speed)
    }

    fn avg_travel_time(&self) -> f64 {
        if self.travel_volume > 0.0 {
            self.travel_time_volume / self.travel_volume
        } else {
            0.0
        }
    }
}

/// Archive connector. Stateless apart from the shared HTTP client.
pub struct HistoricalConnector {
    http: reqwest::Client,
    config: HistoricalFeedConfig,
    registry: Arc<StationRegistry>,
}

impl HistoricalConnector {
    pub fn new(config: HistoricalFeedConfig, registry: Arc<StationRegistry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            registry,
        }
    }

    /// Archive URL for one feed code and one 5-minute slice.
    fn slice_url(&self, code: &str, slot: DateTime<Utc>) -> String {
        format!(
            "{}/history/TDCS/{code}/{date}/{hour:02}/TDCS_{code}_{date}_{hour:02}{minute:02}00.csv",
            self.config.base_url,
            code = code,
            date = slot.format("%Y%m%d"),
            hour = slot.hour(),
            minute = slot.minute(),
        )
    }

    /// Truncate a timestamp down to its 5-minute slice boundary.
    fn align_slot(ts: DateTime<Utc>) -> DateTime<Utc> {
        let extra = ts.minute() % defaults::PROBE_STEP_MINUTES as u32;
        ts.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .map(|t| t - ChronoDuration::minutes(i64::from(extra)))
            .unwrap_or(ts)
    }

    /// Probe backward from the current slice for the newest published file.
    /// Publication lags a few minutes normally; a long outage exhausts the
    /// probe window and surfaces as [`ConnectorError::NoPublishedSlice`].
    async fn probe_latest_slot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Utc>, ConnectorError> {
        let newest = Self::align_slot(Utc::now());
        let steps = self.config.probe_max_back_minutes / defaults::PROBE_STEP_MINUTES;

        for step in 0..=steps {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }
            let slot = newest - ChronoDuration::minutes(step * defaults::PROBE_STEP_MINUTES);
            let url = self.slice_url(&self.config.speed_volume_code, slot);
            match self.http.head(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(slot = %slot, back_minutes = step * defaults::PROBE_STEP_MINUTES,
                        "Found latest archive slice");
                    return Ok(slot);
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, slot = %slot, "Archive probe request failed");
                    continue;
                }
            }
        }
        Err(ConnectorError::NoPublishedSlice)
    }

    async fn fetch_csv(&self, url: &str) -> Result<String, ConnectorError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Status(status));
        }
        let body = response.text().await?;
        // The archive serves UTF-8 with a BOM.
        Ok(body.trim_start_matches('\u{feff}').to_string())
    }

    /// Fetch and merge both feed codes for one slice.
    async fn fetch_slot(&self, slot: DateTime<Utc>) -> Result<Vec<Reading>, ConnectorError> {
        let speed_url = self.slice_url(&self.config.speed_volume_code, slot);
        let travel_url = self.slice_url(&self.config.travel_time_code, slot);

        let speed_csv = self.fetch_csv(&speed_url).await?;
        let mut accumulators: HashMap<String, StationAccumulator> = HashMap::new();
        self.fold_speed_rows(&speed_csv, &mut accumulators);

        if accumulators.is_empty() {
            return Err(ConnectorError::Parse(format!(
                "no usable rows in {speed_url}"
            )));
        }

        // Travel time is a best-effort enrichment; a missing file still
        // yields speed/flow readings.
        match self.fetch_csv(&travel_url).await {
            Ok(travel_csv) => self.fold_travel_rows(&travel_csv, &mut accumulators),
            Err(e) => warn!(error = %e, "Travel-time feed unavailable for slice"),
        }

        let mut readings: Vec<Reading> = accumulators
            .into_iter()
            .filter_map(|(station_id, acc)| {
                let median_speed = acc.median_speed()?;
                Some(Reading {
                    station_id,
                    timestamp: slot,
                    flow: acc.equivalent_flow * HIST_FLOW_SCALE,
                    median_speed,
                    avg_travel_time: acc.avg_travel_time(),
                    source: SourceTag::Historical,
                })
            })
            .collect();
        readings.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        Ok(readings)
    }

    /// Speed/volume rows: TimeInterval, GantryFrom, GantryTo, VehicleType,
    /// SpaceMeanSpeed, Volume.
    fn fold_speed_rows(&self, csv: &str, accumulators: &mut HashMap<String, StationAccumulator>) {
        for line in csv.lines() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            if fields.len() < 6 {
                continue;
            }
            let Some(station_id) = self.resolve_station(fields[1], fields[2]) else {
                continue;
            };
            let vehicle_type = fields[3].trim().parse::<u8>().unwrap_or(0);
            let speed = fields[4].trim().parse::<f64>().unwrap_or(0.0);
            let volume = fields[5].trim().parse::<f64>().unwrap_or(0.0);
            accumulators
                .entry(station_id)
                .or_default()
                .add_speed_row(vehicle_type, speed, volume);
        }
    }

    /// Travel-time rows: TimeInterval, GantryFrom, GantryTo, VehicleType,
    /// TravelTime, Volume. Only merged onto stations already seen in the
    /// speed feed.
    fn fold_travel_rows(&self, csv: &str, accumulators: &mut HashMap<String, StationAccumulator>) {
        for line in csv.lines() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            if fields.len() < 6 {
                continue;
            }
            let Some(station_id) = self.resolve_station(fields[1], fields[2]) else {
                continue;
            };
            let travel_time = fields[4].trim().parse::<f64>().unwrap_or(0.0);
            let volume = fields[5].trim().parse::<f64>().unwrap_or(0.0);
            if let Some(acc) = accumulators.get_mut(&station_id) {
                acc.add_travel_row(travel_time, volume);
            }
        }
    }

    /// Map a gantry pair onto a registered station, exit side first.
    fn resolve_station(&self, from: &str, to: &str) -> Option<String> {
        let pair = format!("{}-{}", from.trim(), to.trim());
        let station_id = normalize_station_id(&pair)?;
        self.registry.contains(&station_id).then_some(station_id)
    }

    /// Backfill every published slice in the closed interval
    /// `[latest - minutes, latest]`, oldest first. Gaps in the archive are
    /// skipped, not fatal.
    pub async fn fetch_window(
        &self,
        minutes: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Reading>, ConnectorError> {
        let latest = self.probe_latest_slot(cancel).await?;
        let slices = minutes / defaults::PROBE_STEP_MINUTES;
        let mut readings = Vec::new();

        for step in (0..=slices).rev() {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }
            let slot = latest - ChronoDuration::minutes(step * defaults::PROBE_STEP_MINUTES);
            match self.fetch_slot(slot).await {
                Ok(mut batch) => readings.append(&mut batch),
                Err(e) => debug!(slot = %slot, error = %e, "Skipping unavailable backfill slice"),
            }
        }
        Ok(readings)
    }
}

#[async_trait]
impl SnapshotSource for HistoricalConnector {
    async fn fetch_snapshot(&self, cancel: &CancellationToken) -> SnapshotResult {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            result = async {
                let slot = self.probe_latest_slot(cancel).await?;
                self.fetch_slot(slot).await
            } => result,
        };

        match outcome {
            Ok(readings) => {
                debug!(readings = readings.len(), "Historical snapshot fetched");
                SnapshotResult::ok(readings)
            }
            Err(e) => SnapshotResult::failed(e),
        }
    }

    fn source_name(&self) -> &'static str {
        "historical"
    }
}
