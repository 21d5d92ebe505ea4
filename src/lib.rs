//! Shockline: highway shockwave detection and propagation forecasting
//!
//! Fuses live and historical highway sensor feeds into per-station time
//! series, detects traffic shockwaves with physics-informed tiered
//! heuristics, and predicts downstream arrival times over the station
//! distance graph.
//!
//! ## Architecture
//!
//! - **Connectors**: live (authenticated) and historical (archive) snapshot
//!   feeds behind one [`connectors::SnapshotSource`] trait
//! - **Fusion**: bounded per-station windows with source-priority dedup
//! - **Detection**: stateless tiered pairwise shockwave detector
//! - **Propagation**: Dijkstra-based downstream arrival prediction with
//!   corridor speed learning
//! - **Pipeline**: the orchestrating cycle loop and its shared state

pub mod config;
pub mod connectors;
pub mod detection;
pub mod fusion;
pub mod output;
pub mod pipeline;
pub mod propagation;
pub mod topology;
pub mod types;

// Re-export the shared data model
pub use types::{
    Direction, PropagationPrediction, Reading, Severity, ShockEvent, SourceTag, Station,
};

// Re-export the component entry points
pub use config::SystemConfig;
pub use connectors::{HistoricalConnector, LiveConnector, SnapshotSource};
pub use detection::ShockDetector;
pub use fusion::FusionCache;
pub use output::{CycleRecord, OutputWriter};
pub use pipeline::{Orchestrator, PipelineState, PipelineStatus};
pub use propagation::PropagationPredictor;
pub use topology::{DistanceGraph, StationRegistry};
