//! Message model for agent-to-agent communication

use super::*;
use chrono::{DateTime, Utc};
use foreman_core::{AgentId, MessageId, BROADCAST};
use std::fmt;
use uuid::Uuid;

/// Opaque key-value payload carried by a message
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Highest sass level the protocol knows about
pub const MAX_SASS_LEVEL: u8 = 11;

/// Kinds of messages exchanged between agents and the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks the recipient to do or answer something
    Request,
    /// Answer to a request, carries its `correlation_id`
    Response,
    /// Announcement to every agent
    Broadcast,
    /// Supervisor pressure on a blocking agent
    Escalation,
    /// Progress update
    Status,
    /// Work handed to an agent
    TaskAssignment,
    /// Blocker notice
    Blocker,
    /// Work finished
    Completion,
    /// Failure report
    Error,
    /// Pointed commentary, priority low
    Sass,
}

impl MessageType {
    /// Wire name, e.g. `task_assignment`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Broadcast => "broadcast",
            Self::Escalation => "escalation",
            Self::Status => "status",
            Self::TaskAssignment => "task_assignment",
            Self::Blocker => "blocker",
            Self::Completion => "completion",
            Self::Error => "error",
            Self::Sass => "sass",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message priority, ordered from `Low` to `Emergency`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background chatter
    Low,
    /// Normal traffic
    #[default]
    Medium,
    /// Needs attention soon
    High,
    /// Needs attention now
    Critical,
    /// Drop everything
    Emergency,
}

impl Priority {
    /// Numeric weight used by external bridges
    pub fn weight(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 5,
            Self::High => 7,
            Self::Critical => 9,
            Self::Emergency => 10,
        }
    }

    /// Map a 1-10 weight back to the closest priority at or below it
    pub fn from_weight(weight: u8) -> Self {
        match weight {
            0..=4 => Self::Low,
            5..=6 => Self::Medium,
            7..=8 => Self::High,
            9 => Self::Critical,
            _ => Self::Emergency,
        }
    }
}

/// Addressee of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Recipient {
    /// A single agent
    Agent(AgentId),
    /// Every registered agent except the sender
    Broadcast,
}

impl Recipient {
    /// Address a single agent
    pub fn agent(id: impl Into<AgentId>) -> Self {
        Self::Agent(id.into())
    }

    /// Whether this addresses every agent
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }

    /// The addressed agent, `None` for broadcasts
    pub fn as_agent(&self) -> Option<&AgentId> {
        match self {
            Self::Agent(id) => Some(id),
            Self::Broadcast => None,
        }
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        if value == BROADCAST {
            Self::Broadcast
        } else {
            Self::Agent(AgentId::from(value))
        }
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.to_string()
    }
}

impl From<AgentId> for Recipient {
    fn from(value: AgentId) -> Self {
        Self::Agent(value)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{}", id),
            Self::Broadcast => f.write_str(BROADCAST),
        }
    }
}

/// Sass annotations attached to every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SassMetadata {
    /// Sass level, `0..=11`
    pub level: u8,
    /// One-liner shown with the message
    pub quip: Option<String>,
    /// `level / 11`
    pub frustration_factor: f32,
    /// Set from level 9 up
    pub contains_threat: bool,
    /// `level - 5`, floored at zero
    pub eye_roll_count: u8,
}

impl SassMetadata {
    /// Derive the metadata from a level in `0..=11`.
    pub fn new(level: u8, quip: Option<String>) -> Self {
        Self {
            level,
            quip,
            frustration_factor: f32::from(level) / f32::from(MAX_SASS_LEVEL),
            contains_threat: level >= 9,
            eye_roll_count: level.saturating_sub(5),
        }
    }
}

/// A routed message.
///
/// Messages are values: the bus never edits a message in place, it produces a
/// new hop (see [`Message::forwarded`]) with the hop limit and visited list
/// carried along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: AgentId,
    recipient: Recipient,
    message_type: MessageType,
    subject: String,
    payload: Payload,
    priority: Priority,
    sass: SassMetadata,
    requires_response: bool,
    correlation_id: Option<MessageId>,
    thread_id: Uuid,
    timestamp: DateTime<Utc>,
    hop_limit: i32,
    visited_agents: Vec<AgentId>,
}

impl Message {
    /// Unique message id
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Agent that built the message
    pub fn sender(&self) -> &AgentId {
        &self.sender
    }

    /// Addressee
    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    /// Kind of message
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// One-line subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Structured payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Delivery priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Sass annotations
    pub fn sass(&self) -> &SassMetadata {
        &self.sass
    }

    /// Whether the sender is waiting for a response
    pub fn requires_response(&self) -> bool {
        self.requires_response
    }

    /// Id of the request this message answers
    pub fn correlation_id(&self) -> Option<MessageId> {
        self.correlation_id
    }

    /// Conversation thread shared by a request and its response
    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    /// When the message was built
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Hops left before the message is dropped
    pub fn hop_limit(&self) -> i32 {
        self.hop_limit
    }

    /// Agents that have handled the message, sender first
    pub fn visited_agents(&self) -> &[AgentId] {
        &self.visited_agents
    }

    /// Whether `agent` already handled this message
    pub fn has_visited(&self, agent: &AgentId) -> bool {
        self.visited_agents.contains(agent)
    }

    /// String field from the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Next hop of this message, re-addressed by `by` to `to`.
    ///
    /// Keeps id, correlation, thread and the remaining hop limit; appends the
    /// forwarding agent to the visited list.
    pub fn forwarded(&self, by: &AgentId, to: Recipient) -> Self {
        let mut next = self.clone();
        next.recipient = to;
        if !next.visited_agents.contains(by) {
            next.visited_agents.push(by.clone());
        }
        next
    }

    /// Consume one hop. Returns `false` when no hops were left.
    pub(crate) fn take_hop(&mut self) -> bool {
        if self.hop_limit <= 0 {
            return false;
        }
        self.hop_limit -= 1;
        true
    }
}

/// Builder that validates a message before it exists
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    sender: AgentId,
    recipient: Recipient,
    message_type: MessageType,
    subject: String,
    payload: Payload,
    priority: Priority,
    sass_level: u8,
    quip: Option<String>,
    requires_response: bool,
    correlation_id: Option<MessageId>,
    thread_id: Option<Uuid>,
    hop_limit: i32,
}

impl MessageBuilder {
    /// Start a message from `sender` to `recipient`
    pub fn new(sender: impl Into<AgentId>, recipient: Recipient, message_type: MessageType) -> Self {
        Self {
            sender: sender.into(),
            recipient,
            message_type,
            subject: String::new(),
            payload: Payload::new(),
            priority: Priority::default(),
            sass_level: 0,
            quip: None,
            requires_response: false,
            correlation_id: None,
            thread_id: None,
            hop_limit: DEFAULT_HOP_LIMIT,
        }
    }

    /// Set the subject
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Replace the payload
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Insert one payload field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Set the priority
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach sass at `level` with an optional quip
    pub fn sass(mut self, level: u8, quip: Option<String>) -> Self {
        self.sass_level = level;
        self.quip = quip;
        self
    }

    /// Mark the message as waiting for a response
    pub fn requires_response(mut self, requires_response: bool) -> Self {
        self.requires_response = requires_response;
        self
    }

    /// Link to the request being answered
    pub fn correlation_id(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Join an existing thread
    pub fn thread_id(mut self, thread_id: Uuid) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the hop limit
    pub fn hop_limit(mut self, hop_limit: i32) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    /// Apply the optional fields of [`SendOptions`].
    pub fn options(mut self, options: &SendOptions) -> Self {
        self.requires_response = options.requires_response;
        if let Some(correlation_id) = options.correlation_id {
            self.correlation_id = Some(correlation_id);
        }
        if let Some(thread_id) = options.thread_id {
            self.thread_id = Some(thread_id);
        }
        if let Some(hop_limit) = options.hop_limit {
            self.hop_limit = hop_limit;
        }
        self.sass_level = options.sass_level;
        self.quip = options.quip.clone();
        self
    }

    /// Validate and produce the message with a fresh id.
    ///
    /// The sender is recorded as the first visited agent.
    pub fn build(self) -> Result<Message> {
        self.validate()?;

        let visited_agents = vec![self.sender.clone()];
        Ok(Message {
            id: MessageId::new(),
            sender: self.sender,
            recipient: self.recipient,
            message_type: self.message_type,
            subject: self.subject,
            payload: self.payload,
            priority: self.priority,
            sass: SassMetadata::new(self.sass_level, self.quip),
            requires_response: self.requires_response,
            correlation_id: self.correlation_id,
            thread_id: self.thread_id.unwrap_or_else(Uuid::new_v4),
            timestamp: Utc::now(),
            hop_limit: self.hop_limit,
            visited_agents,
        })
    }

    fn validate(&self) -> Result<()> {
        self.sender
            .validate()
            .map_err(|e| CoordinationError::Validation(format!("sender: {}", e)))?;

        if let Recipient::Agent(agent) = &self.recipient {
            agent
                .validate()
                .map_err(|e| CoordinationError::Validation(format!("recipient: {}", e)))?;
        }

        if self.subject.trim().is_empty() {
            return Err(CoordinationError::Validation(
                "subject must not be empty".to_string(),
            ));
        }

        if self.payload.keys().any(|k| k.trim().is_empty()) {
            return Err(CoordinationError::Validation(
                "payload keys must not be empty".to_string(),
            ));
        }

        if self.hop_limit <= 0 {
            return Err(CoordinationError::Validation(format!(
                "hop limit must be positive, got {}",
                self.hop_limit
            )));
        }

        if self.sass_level > MAX_SASS_LEVEL {
            return Err(CoordinationError::Validation(format!(
                "sass level {} exceeds {}",
                self.sass_level, MAX_SASS_LEVEL
            )));
        }

        if self.requires_response && self.recipient.is_broadcast() {
            return Err(CoordinationError::Validation(
                "broadcast messages cannot require a response".to_string(),
            ));
        }

        match self.message_type {
            MessageType::Response if self.correlation_id.is_none() => {
                return Err(CoordinationError::Validation(
                    "response messages need a correlation id".to_string(),
                ));
            }
            MessageType::TaskAssignment if !self.has_string_field("task_id") => {
                return Err(CoordinationError::Validation(
                    "task assignments need a string 'task_id' field".to_string(),
                ));
            }
            MessageType::Blocker if !self.has_string_field("blocker") => {
                return Err(CoordinationError::Validation(
                    "blocker messages need a string 'blocker' field".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    fn has_string_field(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty())
    }
}

/// Optional knobs for [`MessageBus::send`]
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Register a pending response on send
    pub requires_response: bool,
    /// Request this message answers
    pub correlation_id: Option<MessageId>,
    /// Thread to join instead of starting a new one
    pub thread_id: Option<Uuid>,
    /// Overrides the bus default hop limit
    pub hop_limit: Option<i32>,
    /// Sass level, `0..=11`
    pub sass_level: u8,
    /// Quip to attach with the sass level
    pub quip: Option<String>,
    /// Overrides the bus default response timeout
    pub response_timeout: Option<std::time::Duration>,
}

impl SendOptions {
    /// Options for a request that waits for an answer
    pub fn expecting_response() -> Self {
        Self {
            requires_response: true,
            ..Self::default()
        }
    }

    /// Attach sass at `level` with a quip
    pub fn with_sass(mut self, level: u8, quip: impl Into<String>) -> Self {
        self.sass_level = level;
        self.quip = Some(quip.into());
        self
    }

    /// Override the hop limit for this send
    pub fn with_hop_limit(mut self, hop_limit: i32) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    /// Response timeout for this send, at most one day
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(message_type: MessageType) -> MessageBuilder {
        MessageBuilder::new("supervisor", Recipient::agent("worker-1"), message_type)
            .subject("status check")
    }

    #[test]
    fn test_build_records_sender_as_visited() {
        let message = builder(MessageType::Status).build().unwrap();
        assert_eq!(message.visited_agents(), &[AgentId::from("supervisor")]);
        assert_eq!(message.hop_limit(), DEFAULT_HOP_LIMIT);
        assert_eq!(message.priority(), Priority::Medium);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::High < Priority::Critical);
        assert!(Priority::Critical < Priority::Emergency);
        assert_eq!(Priority::Critical.weight(), 9);
        assert_eq!(Priority::from_weight(7), Priority::High);
    }

    #[test]
    fn test_sass_metadata_derivation() {
        let sass = SassMetadata::new(9, Some("really?".to_string()));
        assert!(sass.contains_threat);
        assert_eq!(sass.eye_roll_count, 4);
        assert!((sass.frustration_factor - 9.0 / 11.0).abs() < f32::EPSILON);

        let mild = SassMetadata::new(3, None);
        assert!(!mild.contains_threat);
        assert_eq!(mild.eye_roll_count, 0);
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert!(builder(MessageType::Status).subject("  ").build().is_err());
        assert!(builder(MessageType::Status).field("", 1).build().is_err());
        assert!(builder(MessageType::Status).hop_limit(0).build().is_err());
        assert!(builder(MessageType::Status).sass(12, None).build().is_err());
        assert!(builder(MessageType::Response).build().is_err());
        assert!(builder(MessageType::TaskAssignment).build().is_err());
        assert!(builder(MessageType::Blocker).field("blocker", "").build().is_err());

        let to_broadcast = MessageBuilder::new("supervisor", Recipient::agent("broadcast"), MessageType::Status)
            .subject("hi")
            .build();
        assert!(matches!(to_broadcast, Err(CoordinationError::Validation(_))));

        let broadcast_request = MessageBuilder::new("supervisor", Recipient::Broadcast, MessageType::Request)
            .subject("anyone?")
            .requires_response(true)
            .build();
        assert!(broadcast_request.is_err());
    }

    #[test]
    fn test_valid_typed_messages() {
        assert!(builder(MessageType::TaskAssignment).field("task_id", "T-1").build().is_ok());
        assert!(
            builder(MessageType::Response)
                .correlation_id(MessageId::new())
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_forwarded_appends_forwarder_once() {
        let message = builder(MessageType::Status).build().unwrap();
        let worker = AgentId::from("worker-1");
        let next = message.forwarded(&worker, Recipient::agent("worker-2"));
        assert_eq!(next.id(), message.id());
        assert_eq!(next.visited_agents().len(), 2);
        assert!(next.has_visited(&worker));

        let again = next.forwarded(&worker, Recipient::agent("worker-3"));
        assert_eq!(again.visited_agents().len(), 2);
    }

    #[test]
    fn test_take_hop() {
        let mut message = builder(MessageType::Status).hop_limit(1).build().unwrap();
        assert!(message.take_hop());
        assert_eq!(message.hop_limit(), 0);
        assert!(!message.take_hop());
    }

    #[test]
    fn test_recipient_serialization() {
        let json = serde_json::to_string(&Recipient::Broadcast).unwrap();
        assert_eq!(json, "\"broadcast\"");
        let parsed: Recipient = serde_json::from_str("\"worker-9\"").unwrap();
        assert_eq!(parsed, Recipient::agent("worker-9"));
    }
}
