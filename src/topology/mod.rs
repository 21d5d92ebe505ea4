//! Station Topology Registry
//!
//! Static, read-only station metadata plus the pairwise distance graph.
//! Loaded once at startup from the reference CSVs; everything here is
//! immutable afterwards and shared lock-free via `Arc`.
//!
//! Station IDs arrive in several historical formats; [`normalize_station_id`]
//! is the single canonicalization point for all of them.

pub mod graph;

pub use graph::DistanceGraph;

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::types::{Direction, Station};

// ============================================================================
// Station ID normalization
// ============================================================================

/// Normalize a station identifier to the canonical form `01F0340N`.
///
/// Accepted input formats, in precedence order:
/// 1. Canonical: `01F0340N` — returned uppercased as-is.
/// 2. Registry form with separators: `01F-034.0N` — separators stripped.
/// 3. Pair ID: `01F0339N-01F0340N` — the second gantry (pair exit) is taken,
///    then normalized recursively.
/// 4. Loose form: any string containing a highway prefix (`NNX`), a run of
///    mileage digits, and a trailing `N`/`S` — digits are zero-padded to 4.
///
/// Returns `None` when no format matches; callers treat that as an
/// unmappable record, not an error.
pub fn normalize_station_id(raw: &str) -> Option<String> {
    static CANONICAL: OnceLock<Regex> = OnceLock::new();
    static LOOSE: OnceLock<Regex> = OnceLock::new();

    let id = raw.trim().to_ascii_uppercase();
    if id.is_empty() {
        return None;
    }

    #[allow(clippy::unwrap_used)]
    let canonical =
        CANONICAL.get_or_init(|| Regex::new(r"^\d{2}[A-Z]\d{4}[NS]$").unwrap());

    if canonical.is_match(&id) {
        return Some(id);
    }

    // Pair IDs contain two full gantry codes; the exit gantry identifies
    // the measuring station.
    if let Some((_, exit)) = id.split_once('-') {
        if exit.len() >= 6 {
            if let Some(normalized) = normalize_station_id(exit) {
                return Some(normalized);
            }
        }
    }

    // Separator-laden registry form: strip and re-check.
    let stripped: String = id.chars().filter(|c| *c != '-' && *c != '.').collect();
    if stripped != id && canonical.is_match(&stripped) {
        return Some(stripped);
    }

    #[allow(clippy::unwrap_used)]
    let loose = LOOSE.get_or_init(|| {
        Regex::new(r"^(\d{2}[A-Z])\D*?(\d{1,4})(?:\.(\d))?\D*?([NS])$").unwrap()
    });

    // Match against the raw (uppercased) form so a mileage decimal point is
    // still visible; a bare digit run is zero-filled to 4 like the
    // historical pair-ID fallback did.
    if let Some(caps) = loose.captures(&id) {
        let highway = &caps[1];
        let whole = &caps[2];
        let direction = &caps[4];
        let mileage = match caps.get(3) {
            Some(tenth) => format!("{:0>3}{}", whole, tenth.as_str()),
            None => format!("{whole:0>4}"),
        };
        if mileage.len() == 4 {
            return Some(format!("{highway}{mileage}{direction}"));
        }
    }

    None
}

/// Extract mileage in km from a canonical ID (`01F0340N` -> 34.0).
pub fn mileage_from_id(canonical: &str) -> Option<f64> {
    if canonical.len() != 8 {
        return None;
    }
    let digits = &canonical[3..7];
    let whole: f64 = digits[..3].parse().ok()?;
    let tenth: f64 = digits[3..].parse().ok()?;
    Some(whole + tenth / 10.0)
}

/// Build a [`Station`] from a canonical ID and coordinates.
pub fn station_from_id(canonical: &str, latitude: f64, longitude: f64) -> Option<Station> {
    let direction = Direction::from_suffix(canonical.chars().last()?)?;
    let mileage_km = mileage_from_id(canonical)?;
    Some(Station {
        id: canonical.to_string(),
        highway: canonical[..3].to_string(),
        direction,
        mileage_km,
        latitude,
        longitude,
    })
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable station registry with precomputed highway+direction sequences.
#[derive(Debug)]
pub struct StationRegistry {
    stations: HashMap<String, Station>,
    /// Mileage-ascending station sequences, keyed by (highway, direction).
    sequences: HashMap<(String, Direction), Vec<String>>,
}

impl StationRegistry {
    /// Build a registry from already-normalized stations.
    pub fn new(stations: Vec<Station>) -> Self {
        let mut by_id = HashMap::with_capacity(stations.len());
        let mut sequences: HashMap<(String, Direction), Vec<Station>> = HashMap::new();

        for station in stations {
            sequences
                .entry((station.highway.clone(), station.direction))
                .or_default()
                .push(station.clone());
            by_id.insert(station.id.clone(), station);
        }

        let sequences = sequences
            .into_iter()
            .map(|(key, mut group)| {
                group.sort_by(|a, b| {
                    a.mileage_km
                        .partial_cmp(&b.mileage_km)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                (key, group.into_iter().map(|s| s.id).collect())
            })
            .collect();

        Self {
            stations: by_id,
            sequences,
        }
    }

    /// Load the registry from the station CSV
    /// (`station_id,latitude,longitude`, header line expected).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;

        let mut stations = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in contents.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 3 {
                skipped += 1;
                continue;
            }
            let Some(canonical) = normalize_station_id(fields[0]) else {
                warn!(line = line_no + 1, raw = fields[0], "Unmappable station ID, skipping");
                skipped += 1;
                continue;
            };
            let (Ok(lat), Ok(lon)) = (fields[1].parse::<f64>(), fields[2].parse::<f64>()) else {
                skipped += 1;
                continue;
            };
            if let Some(station) = station_from_id(&canonical, lat, lon) {
                stations.push(station);
            } else {
                skipped += 1;
            }
        }

        if stations.is_empty() {
            return Err(ConfigError::Topology(format!(
                "no usable stations in {}",
                path.display()
            )));
        }

        info!(
            stations = stations.len(),
            skipped, "Station registry loaded"
        );
        Ok(Self::new(stations))
    }

    pub fn get(&self, station_id: &str) -> Option<&Station> {
        self.stations.get(station_id)
    }

    pub fn contains(&self, station_id: &str) -> bool {
        self.stations.contains_key(station_id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn station_ids(&self) -> impl Iterator<Item = &str> {
        self.stations.keys().map(String::as_str)
    }

    /// Mileage-ascending sequence for one highway+direction.
    pub fn sequence(&self, highway: &str, direction: Direction) -> &[String] {
        self.sequences
            .get(&(highway.to_string(), direction))
            .map_or(&[], Vec::as_slice)
    }

    /// The next `k` stations downstream of `station_id` along its own
    /// highway+direction sequence. Empty when the station is unknown or last.
    pub fn downstream(&self, station_id: &str, k: usize) -> Vec<&str> {
        let Some(station) = self.get(station_id) else {
            return Vec::new();
        };
        let seq = self.sequence(&station.highway, station.direction);
        let Some(pos) = seq.iter().position(|id| id == station_id) else {
            return Vec::new();
        };
        seq.iter()
            .skip(pos + 1)
            .take(k)
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_station(id: &str) -> Station {
        station_from_id(id, 24.0, 121.0).unwrap()
    }

    #[test]
    fn canonical_id_passes_through() {
        assert_eq!(normalize_station_id("01F0340N").as_deref(), Some("01F0340N"));
        assert_eq!(normalize_station_id("01f0340n").as_deref(), Some("01F0340N"));
    }

    #[test]
    fn registry_form_is_stripped() {
        assert_eq!(
            normalize_station_id("01F-034.0N").as_deref(),
            Some("01F0340N")
        );
        assert_eq!(
            normalize_station_id("03F-102.2S").as_deref(),
            Some("03F1022S")
        );
    }

    #[test]
    fn pair_id_takes_exit_gantry() {
        assert_eq!(
            normalize_station_id("01F0339N-01F0340N").as_deref(),
            Some("01F0340N")
        );
    }

    #[test]
    fn loose_form_pads_mileage() {
        assert_eq!(normalize_station_id("01F 34.0 N").as_deref(), Some("01F0340N"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(normalize_station_id(""), None);
        assert_eq!(normalize_station_id("hello"), None);
        assert_eq!(normalize_station_id("01F"), None);
    }

    #[test]
    fn mileage_extraction() {
        assert_eq!(mileage_from_id("01F0340N"), Some(34.0));
        assert_eq!(mileage_from_id("03F1022S"), Some(102.2));
    }

    #[test]
    fn sequence_is_mileage_ordered() {
        let registry = StationRegistry::new(vec![
            make_station("01F0413N"),
            make_station("01F0340N"),
            make_station("01F0376N"),
            make_station("01F0340S"),
        ]);
        let seq = registry.sequence("01F", Direction::North);
        assert_eq!(seq, &["01F0340N", "01F0376N", "01F0413N"]);
    }

    #[test]
    fn downstream_respects_direction_and_k() {
        let registry = StationRegistry::new(vec![
            make_station("01F0340N"),
            make_station("01F0376N"),
            make_station("01F0413N"),
            make_station("01F0467N"),
        ]);
        assert_eq!(
            registry.downstream("01F0340N", 2),
            vec!["01F0376N", "01F0413N"]
        );
        assert!(registry.downstream("01F0467N", 5).is_empty());
        assert!(registry.downstream("09F0000N", 5).is_empty());
    }
}
