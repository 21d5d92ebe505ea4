//! Pairwise station distance graph with shortest-path queries.
//!
//! Edges are symmetric section lengths in km. The graph is built once at
//! startup and read-only afterwards, so queries take `&self` and need no
//! locking.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;

use tracing::info;

use crate::config::ConfigError;
use crate::topology::normalize_station_id;

/// Symmetric weighted station graph (km).
#[derive(Debug, Default)]
pub struct DistanceGraph {
    index: HashMap<String, usize>,
    ids: Vec<String>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

/// Min-heap entry for Dijkstra. Ordering is reversed on distance so the
/// std max-heap pops the nearest node first.
#[derive(Debug, PartialEq)]
struct HeapEntry {
    distance: f64,
    node: usize,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl DistanceGraph {
    /// Build from an edge list. Zero or negative weights are ignored.
    /// Edges are inserted symmetrically.
    pub fn from_edges(edges: impl IntoIterator<Item = (String, String, f64)>) -> Self {
        let mut graph = Self::default();
        for (from, to, km) in edges {
            if km <= 0.0 || from == to {
                continue;
            }
            let a = graph.intern(from);
            let b = graph.intern(to);
            graph.adjacency[a].push((b, km));
            graph.adjacency[b].push((a, km));
        }
        graph
    }

    /// Load from the distance edge CSV (`from,to,distance_km`, header line
    /// expected). Station IDs are normalized; unmappable rows are skipped.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;

        let mut edges = Vec::new();
        for line in contents.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 3 {
                continue;
            }
            let (Some(from), Some(to)) = (
                normalize_station_id(fields[0]),
                normalize_station_id(fields[1]),
            ) else {
                continue;
            };
            let Ok(km) = fields[2].parse::<f64>() else {
                continue;
            };
            edges.push((from, to, km));
        }

        if edges.is_empty() {
            return Err(ConfigError::Topology(format!(
                "no usable edges in {}",
                path.display()
            )));
        }

        let graph = Self::from_edges(edges);
        info!(
            nodes = graph.ids.len(),
            "Distance graph loaded"
        );
        Ok(graph)
    }

    fn intern(&mut self, id: String) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id.clone(), idx);
        self.ids.push(id);
        self.adjacency.push(Vec::new());
        idx
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Direct edge weight between two stations, if connected.
    pub fn edge(&self, from: &str, to: &str) -> Option<f64> {
        let a = *self.index.get(from)?;
        let b = *self.index.get(to)?;
        self.adjacency[a]
            .iter()
            .find(|(n, _)| *n == b)
            .map(|(_, km)| *km)
    }

    /// Shortest-path distance in km via Dijkstra.
    ///
    /// `None` when either station is unknown or no path exists — callers
    /// skip unreachable targets rather than treating this as an error.
    pub fn shortest_distance(&self, from: &str, to: &str) -> Option<f64> {
        let source = *self.index.get(from)?;
        let target = *self.index.get(to)?;
        if source == target {
            return Some(0.0);
        }

        let mut dist = vec![f64::INFINITY; self.ids.len()];
        dist[source] = 0.0;
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            distance: 0.0,
            node: source,
        });

        while let Some(HeapEntry { distance, node }) = heap.pop() {
            if node == target {
                return Some(distance);
            }
            if distance > dist[node] {
                continue;
            }
            for &(next, weight) in &self.adjacency[node] {
                let candidate = distance + weight;
                if candidate < dist[next] {
                    dist[next] = candidate;
                    heap.push(HeapEntry {
                        distance: candidate,
                        node: next,
                    });
                }
            }
        }

        None
    }
}
