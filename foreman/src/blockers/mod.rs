//! Blocker Resolution
//!
//! Classifies reported obstructions against an ordered pattern table, walks
//! active blockers up a fixed escalation ladder, and keeps resolution history
//! for metrics and chronic-offender detection.

use serde::{Deserialize, Serialize};

pub mod patterns;
pub mod resolver;
pub mod types;

pub use patterns::*;
pub use resolver::*;
pub use types::*;

/// Result type for blocker operations
pub type Result<T> = std::result::Result<T, BlockerError>;

/// Blocker errors
#[derive(Debug, thiserror::Error)]
pub enum BlockerError {
    /// Report rejected before anything was recorded
    #[error("Invalid blocker: {0}")]
    Validation(String),

    /// No active blocker with this id
    #[error("Blocker not found: {0}")]
    NotFound(foreman_core::BlockerId),

    /// A pattern regex failed to compile
    #[error("Invalid pattern '{id}': {source}")]
    InvalidPattern {
        /// Pattern id
        id: String,
        /// Compile error
        #[source]
        source: regex::Error,
    },
}

impl BlockerError {
    /// Whether the blocker id was unknown or already resolved
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
