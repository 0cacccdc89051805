//! Supervisor Orchestration
//!
//! The [`Coordinator`] is the supervisor-facing entry point. It wires the
//! message bus, blocker resolver and performance tracker together, turns
//! inbound agent events into tracker updates, and turns resolution actions
//! into outbound messages.

use serde::{Deserialize, Serialize};

pub mod coordinator;
pub mod events;
pub mod report;

pub use coordinator::*;
pub use events::*;
pub use report::*;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Unknown event kind, missing field or out-of-range value
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Message bus failure
    #[error(transparent)]
    Coordination(#[from] crate::coordination::CoordinationError),

    /// Blocker resolver failure
    #[error(transparent)]
    Blocker(#[from] crate::blockers::BlockerError),

    /// Performance tracker failure
    #[error(transparent)]
    Performance(#[from] crate::performance::PerformanceError),

    /// Invalid configuration or agent id
    #[error(transparent)]
    Config(#[from] foreman_core::ForemanError),
}

impl OrchestrationError {
    /// Whether a blocker or agent lookup came up empty
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Blocker(e) => e.is_not_found(),
            Self::Performance(crate::performance::PerformanceError::AgentNotFound(_)) => true,
            _ => false,
        }
    }
}
