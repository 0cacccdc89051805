//! Agent Messaging
//!
//! Priority-ordered, per-recipient message delivery between agents and the
//! supervisor, with request/response correlation, hop limits and loop
//! detection.

use serde::{Deserialize, Serialize};

pub mod mailbox;
pub mod message;
pub mod message_bus;
pub mod responses;

pub use message::*;
pub use message_bus::*;
pub use responses::PendingResponse;

/// Hop limit given to messages when neither the caller nor the config says otherwise
pub const DEFAULT_HOP_LIMIT: i32 = 5;

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Coordination errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// Message or option rejected before routing
    #[error("Invalid message: {0}")]
    Validation(String),

    /// The request's response deadline passed
    #[error("No response to message {message_id} before the deadline")]
    Timeout {
        /// Id of the unanswered request
        message_id: foreman_core::MessageId,
    },

    /// The response slot was dropped without an answer
    #[error("Response channel for message {0} closed")]
    ResponseChannelClosed(foreman_core::MessageId),
}

impl CoordinationError {
    /// Whether this is a response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
