//! Telemetry events emitted by the coordination components
//!
//! Components never log-and-forget operational facts such as strikes or
//! dropped messages; they hand a [`TelemetryEvent`] to a [`TelemetrySink`].
//! The default sink writes structured `tracing` records.

use chrono::{DateTime, Utc};
use foreman_core::{AgentId, BlockerId, MessageId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Operational fact worth recording
///
/// Variants are named after what happened; [`TelemetryEvent::name`] gives the
/// snake_case form used in logs.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    StrikeIssued {
        agent_id: AgentId,
        reason: String,
        strikes: u32,
    },
    CommendationIssued {
        agent_id: AgentId,
        reason: String,
        commendations: u32,
    },
    ShameListed {
        agent_id: AgentId,
        reason: String,
    },
    MvpSelected {
        agent_id: AgentId,
        score: f64,
        week: u32,
    },
    MessageDropped {
        message_id: MessageId,
        recipient: AgentId,
        reason: String,
    },
    MessageBlocked {
        message_id: MessageId,
        recipient: AgentId,
        reason: String,
    },
    HandlerFailed {
        message_id: MessageId,
        recipient: AgentId,
        error: String,
    },
    ResponseTimedOut {
        request_id: MessageId,
        requester: AgentId,
    },
    AgentBlocked {
        agent_id: AgentId,
        reason: String,
    },
    AgentUnblocked {
        agent_id: AgentId,
    },
    BlockerReported {
        blocker_id: BlockerId,
        blocker_type: String,
        blocking_agents: Vec<AgentId>,
    },
    ResolutionAttempted {
        blocker_id: BlockerId,
        attempt: u32,
        strategy: String,
        severity: u8,
    },
    BlockerResolved {
        blocker_id: BlockerId,
        resolution_secs: f64,
    },
    ResolutionOutcome {
        blocker_id: BlockerId,
        pattern_id: Option<String>,
        success: bool,
    },
}

impl TelemetryEvent {
    /// Short name of the event kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::StrikeIssued { .. } => "strike_issued",
            Self::CommendationIssued { .. } => "commendation_issued",
            Self::ShameListed { .. } => "shame_listed",
            Self::MvpSelected { .. } => "mvp_selected",
            Self::MessageDropped { .. } => "message_dropped",
            Self::MessageBlocked { .. } => "message_blocked",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::ResponseTimedOut { .. } => "response_timed_out",
            Self::AgentBlocked { .. } => "agent_blocked",
            Self::AgentUnblocked { .. } => "agent_unblocked",
            Self::BlockerReported { .. } => "blocker_reported",
            Self::ResolutionAttempted { .. } => "resolution_attempted",
            Self::BlockerResolved { .. } => "blocker_resolved",
            Self::ResolutionOutcome { .. } => "resolution_outcome",
        }
    }
}

/// An event stamped with the time it was emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Emission time
    pub at: DateTime<Utc>,
    /// The event itself
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

/// Destination for telemetry events
pub trait TelemetrySink: Send + Sync {
    /// Record one event. Must not block.
    fn emit(&self, event: TelemetryEvent);
}

/// Writes every event as a `tracing` record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::StrikeIssued { agent_id, reason, strikes } => {
                warn!("Strike {} issued to {}: {}", strikes, agent_id, reason);
            }
            TelemetryEvent::CommendationIssued { agent_id, reason, commendations } => {
                info!("Commendation {} for {}: {}", commendations, agent_id, reason);
            }
            TelemetryEvent::ShameListed { agent_id, reason } => {
                warn!("{} added to the shame list: {}", agent_id, reason);
            }
            TelemetryEvent::MvpSelected { agent_id, score, week } => {
                info!("MVP of week {}: {} ({:.1})", week, agent_id, score);
            }
            TelemetryEvent::MessageDropped { message_id, recipient, reason } => {
                warn!("Dropped message {} for {}: {}", message_id, recipient, reason);
            }
            TelemetryEvent::MessageBlocked { message_id, recipient, reason } => {
                warn!("Message {} not sent, {} is blocked: {}", message_id, recipient, reason);
            }
            TelemetryEvent::HandlerFailed { message_id, recipient, error } => {
                warn!("Handler of {} failed on message {}: {}", recipient, message_id, error);
            }
            TelemetryEvent::ResponseTimedOut { request_id, requester } => {
                warn!("{} gave up waiting for a response to {}", requester, request_id);
            }
            TelemetryEvent::AgentBlocked { agent_id, reason } => {
                warn!("Agent {} blocked: {}", agent_id, reason);
            }
            TelemetryEvent::AgentUnblocked { agent_id } => {
                info!("Agent {} unblocked", agent_id);
            }
            TelemetryEvent::BlockerReported { blocker_id, blocker_type, blocking_agents } => {
                info!(
                    "Blocker {} ({}) reported against {:?}",
                    blocker_id, blocker_type, blocking_agents
                );
            }
            TelemetryEvent::ResolutionAttempted { blocker_id, attempt, strategy, severity } => {
                info!(
                    "Resolution attempt {} for {}: {} (severity {})",
                    attempt, blocker_id, strategy, severity
                );
            }
            TelemetryEvent::BlockerResolved { blocker_id, resolution_secs } => {
                info!("Blocker {} resolved after {:.0}s", blocker_id, resolution_secs);
            }
            TelemetryEvent::ResolutionOutcome { blocker_id, pattern_id, success } => {
                debug!(
                    "Resolution outcome for {} (pattern {:?}): success={}",
                    blocker_id, pattern_id, success
                );
            }
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl RecordingSink {
    /// Empty recording
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record so far
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().clone()
    }

    /// Every event so far, without timestamps
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Number of recorded events with the given [`TelemetryEvent::name`]
    pub fn count(&self, name: &str) -> usize {
        self.records.lock().iter().filter(|r| r.event.name() == name).count()
    }

    /// Forget everything recorded
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: TelemetryEvent) {
        self.records.lock().push(TelemetryRecord {
            at: Utc::now(),
            event,
        });
    }
}

/// Publishes events on a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TelemetryRecord>,
}

impl BroadcastSink {
    /// Channel that keeps up to `capacity` unread records per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver for records emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for BroadcastSink {
    fn emit(&self, event: TelemetryEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(TelemetryRecord {
            at: Utc::now(),
            event,
        });
    }
}

/// Sends each event to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    /// Fanout with no sinks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Default sink used when a component is built without one
pub fn default_sink() -> Arc<dyn TelemetrySink> {
    Arc::new(TracingSink)
}
