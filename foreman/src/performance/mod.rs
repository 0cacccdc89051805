//! Agent Performance Tracking
//!
//! Per-agent metrics, the composite score, rankings, MVP selection and the
//! problem-agent list.

use serde::{Deserialize, Serialize};

pub mod metrics;
pub mod report;
pub mod scoring;
pub mod tracker;

pub use metrics::*;
pub use report::*;
pub use scoring::*;
pub use tracker::*;

/// Result type for performance operations
pub type Result<T> = std::result::Result<T, PerformanceError>;

/// Performance errors
#[derive(Debug, thiserror::Error)]
pub enum PerformanceError {
    /// No metrics for this agent
    #[error("Agent not tracked: {0}")]
    AgentNotFound(foreman_core::AgentId),
}
