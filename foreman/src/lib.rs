//! Foreman - Agent Fleet Coordination
//!
//! Foreman keeps a fleet of worker agents moving. It routes messages between
//! agents, notices when one agent is holding up another and pushes the
//! blocker toward resolution, and scores every agent so the supervisor knows
//! who to reward and who to replace.
//!
//! # Architecture
//!
//! - `coordination` - Message bus with per-agent priority mailboxes, hop
//!   limits, loop detection and request/response correlation
//! - `blockers` - Blocker classification and the escalation ladder
//! - `performance` - Per-agent metrics, composite scoring, MVP and shame list
//! - `orchestration` - Supervisor façade wiring the three together
//! - `monitoring` - Telemetry events and sinks
//! - `commands` - CLI command implementations
//!
//! # Example
//!
//! ```no_run
//! use foreman::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let coordinator = Coordinator::new(ForemanConfig::default())?;
//! let blocker = coordinator.report_blocker(
//!     "waiting for agent-db to complete migration",
//!     &AgentId::from("agent-api"),
//!     &[AgentId::from("agent-db")],
//!     Priority::High,
//! )?;
//! let action = coordinator.attempt_resolution(&blocker.id)?;
//! println!("{}: {}", action.strategy, action.message);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Fleet coordination
pub mod blockers;
pub mod coordination;
pub mod orchestration;
pub mod performance;

// Observability
pub mod monitoring;

// CLI commands
pub mod commands;

pub use blockers::{Blocker, BlockerResolver, BlockerType, ResolutionAction, ResolutionStrategy};
pub use coordination::{Message, MessageBus, MessageType, Priority, Recipient, SendOptions};
pub use orchestration::{AgentEvent, Coordinator, SummaryReport};
pub use performance::{PerformanceLevel, PerformanceTracker};

pub use foreman_core::{AgentId, BlockerId, ForemanConfig, MessageId};

/// Commonly used types
pub mod prelude {
    pub use crate::blockers::{Blocker, BlockerResolver, BlockerType, ResolutionStrategy};
    pub use crate::coordination::{
        ChannelHandler, Message, MessageBus, MessageHandler, MessageType, Payload, Priority,
        Recipient, SendOptions, SendOutcome,
    };
    pub use crate::orchestration::{AgentEvent, Coordinator};
    pub use crate::performance::{PerformanceLevel, PerformanceTracker};
    pub use foreman_core::{AgentId, BlockerId, ForemanConfig, MessageId};
}

/// Foreman version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
