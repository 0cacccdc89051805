//! Core types for the Foreman agent coordination system.
//!
//! This crate provides the identifiers, error type and configuration shared
//! by the coordination components.

pub mod config;
pub mod error;
pub mod id;

pub use config::{
    BlockerConfig, BusConfig, ForemanConfig, GeneralConfig, PerformanceConfig,
    MAX_CHRONIC_WINDOW_SECS, MAX_RESPONSE_TIMEOUT_SECS,
};
pub use error::{ForemanError, Result};
pub use id::{AgentId, BlockerId, MessageId, BROADCAST};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ForemanConfig;
    pub use crate::error::{ForemanError, Result};
    pub use crate::id::{AgentId, BlockerId, MessageId, BROADCAST};
}
