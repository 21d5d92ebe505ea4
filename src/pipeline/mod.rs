//! Pipeline orchestration: the cycle loop and the shared state it publishes.

pub mod orchestrator;
pub mod state;

pub use orchestrator::Orchestrator;
pub use state::{PipelineState, PipelineStatus, SourceStats};
