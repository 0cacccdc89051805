//! Message Bus
//!
//! Routes [`Message`]s between registered agents. Every registered agent owns
//! a priority [`Mailbox`] drained by its own delivery task, so a slow handler
//! only delays its own agent.
//!
//! # Delivery rules
//!
//! - Sending to a blocked agent is a no-op that reports [`SendOutcome::Blocked`].
//! - Broadcasts reach every registered agent except the sender and blocked agents.
//! - On receipt one hop is consumed; a message with no hops left, or one that
//!   already visited the receiving agent, is dropped and reported.
//! - A response whose correlation id matches a pending request completes that
//!   request and is not handed to handlers.

use super::mailbox::Mailbox;
use super::responses::PendingResponses;
use super::*;
use crate::monitoring::{default_sink, Counter, TelemetryEvent, TelemetrySink};
use async_trait::async_trait;
use dashmap::DashMap;
use foreman_core::{AgentId, BusConfig, MessageId, MAX_RESPONSE_TIMEOUT_SECS};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ==============================================================================
// Handlers
// ==============================================================================

/// Receives messages delivered to an agent
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message delivered to `agent`.
    ///
    /// Errors and panics are counted by the bus and never reach the sender.
    async fn handle(&self, agent: &AgentId, message: Message) -> anyhow::Result<()>;
}

/// Handler backed by an async closure
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, _agent: &AgentId, message: Message) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}

/// Handler that forwards every delivered message into a channel
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelHandler {
    /// Handler plus the receiving end of its channel
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn handle(&self, agent: &AgentId, message: Message) -> anyhow::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow::anyhow!("inbox of {} is closed", agent))
    }
}

// ==============================================================================
// Outcomes
// ==============================================================================

/// Why a message was dropped on receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The message arrived with no hops left
    HopLimitExhausted,
    /// The recipient already handled this message
    LoopDetected,
    /// The recipient was blocked after the message was queued
    RecipientBlocked,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HopLimitExhausted => f.write_str("hop limit exhausted"),
            Self::LoopDetected => f.write_str("loop detected"),
            Self::RecipientBlocked => f.write_str("recipient blocked"),
        }
    }
}

/// What happened to a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for delivery
    Queued {
        /// Number of mailboxes the message went into
        recipients: usize,
    },
    /// Completed a pending request directly
    Correlated,
    /// Recipient is blocked; nothing was queued
    Blocked {
        /// The blocked recipient
        agent: AgentId,
        /// Reason given when it was blocked
        reason: String,
    },
    /// Recipient has no registered handlers
    NoRoute {
        /// The unknown recipient
        agent: AgentId,
    },
}

/// Result of a send: the message as built, its outcome, and the response
/// handle when a response was requested and the message was queued
#[derive(Debug)]
pub struct SendReceipt {
    /// The message as built and routed
    pub message: Message,
    /// What the router did with it
    pub outcome: SendOutcome,
    /// Response handle, present only for queued requests
    pub response: Option<PendingResponse>,
}

impl SendReceipt {
    /// Id of the sent message
    pub fn message_id(&self) -> MessageId {
        self.message.id()
    }

    /// Whether the message went into at least one mailbox
    pub fn is_queued(&self) -> bool {
        matches!(self.outcome, SendOutcome::Queued { .. })
    }

    /// Wait for the response to this message.
    pub async fn response(self) -> Result<Message> {
        match self.response {
            Some(pending) => pending.wait().await,
            None => Err(CoordinationError::Validation(format!(
                "message {} has no pending response ({:?})",
                self.message.id(),
                self.outcome
            ))),
        }
    }
}

/// What happened when a message reached its recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A handler accepted the message
    Delivered,
    /// The message answered a pending request
    Correlated {
        /// The answered request
        request_id: MessageId,
    },
    /// No handler for this type and no fallback
    Unhandled,
    /// The handler returned an error or panicked
    HandlerFailed {
        /// Error text, or the panic message
        error: String,
    },
    /// Rejected before any handler ran
    Dropped(DropReason),
}

/// Bus statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStats {
    /// Messages accepted by the router
    pub total_sent: u64,
    /// Messages a handler accepted
    pub delivered: u64,
    /// Responses matched to a pending request
    pub correlated: u64,
    /// Messages dropped for hop limit, loop or blocked recipient
    pub dropped: u64,
    /// Sends refused because the recipient was blocked
    pub blocked: u64,
    /// Sends with no route
    pub undeliverable: u64,
    /// Deliveries with no matching handler
    pub unhandled: u64,
    /// Handler errors and panics
    pub handler_failures: u64,
    /// Pending responses that expired
    pub response_timeouts: u64,
    /// Requests still waiting for an answer
    pub pending_responses: usize,
    /// Sent messages per type
    pub messages_by_type: BTreeMap<MessageType, u64>,
    /// Mean sass level over sent messages
    pub average_sass_level: f64,
    /// Agents with a delivery task
    pub registered_agents: usize,
    /// Currently blocked agents
    pub blocked_agents: Vec<AgentId>,
}

// ==============================================================================
// Bus
// ==============================================================================

struct Route {
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>,
    fallback: RwLock<Option<Arc<dyn MessageHandler>>>,
    mailbox: Arc<Mailbox>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Route {
    fn handler_for(&self, message_type: MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .get(&message_type)
            .cloned()
            .or_else(|| self.fallback.read().clone())
    }
}

#[derive(Default)]
struct BusCounters {
    sent: Counter,
    delivered: Counter,
    correlated: Counter,
    dropped: Counter,
    blocked: Counter,
    undeliverable: Counter,
    unhandled: Counter,
    handler_failures: Counter,
    sass_total: Counter,
}

struct BusInner {
    config: BusConfig,
    routes: DashMap<AgentId, Arc<Route>>,
    blocked: RwLock<HashMap<AgentId, String>>,
    pending: Arc<PendingResponses>,
    log: Mutex<VecDeque<Message>>,
    counters: BusCounters,
    by_type: DashMap<MessageType, u64>,
    in_flight: AtomicUsize,
    idle: Notify,
    telemetry: Arc<dyn TelemetrySink>,
}

impl BusInner {
    fn finish(&self, n: usize) {
        if n == 0 {
            return;
        }
        if self.in_flight.fetch_sub(n, Ordering::SeqCst) == n {
            self.idle.notify_waiters();
        }
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        for route in self.routes.iter() {
            route.mailbox.close();
        }
    }
}

/// Priority message bus shared by the supervisor and its agents
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Bus with the `tracing` telemetry sink
    pub fn new(config: BusConfig) -> Self {
        Self::with_telemetry(config, default_sink())
    }

    /// Bus that reports to `telemetry`
    pub fn with_telemetry(config: BusConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                routes: DashMap::new(),
                blocked: RwLock::new(HashMap::new()),
                pending: Arc::new(PendingResponses::new(telemetry.clone())),
                log: Mutex::new(VecDeque::new()),
                counters: BusCounters::default(),
                by_type: DashMap::new(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                telemetry,
            }),
        }
    }

    /// Active bus configuration
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // --------------------------------------------------------------------------
    // Registration
    // --------------------------------------------------------------------------

    /// Register `handler` for messages of `message_type` sent to `agent`.
    ///
    /// The first registration for an agent starts its delivery task, so this
    /// must be called from within a Tokio runtime.
    pub fn register_handler(
        &self,
        agent: &AgentId,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let route = self.route_for(agent)?;
        route.handlers.write().insert(message_type, handler);
        debug!("Registered {} handler for {}", message_type, agent);
        Ok(())
    }

    /// Register a handler for every message type without a specific handler.
    pub fn register_fallback(&self, agent: &AgentId, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let route = self.route_for(agent)?;
        *route.fallback.write() = Some(handler);
        debug!("Registered fallback handler for {}", agent);
        Ok(())
    }

    /// Remove an agent's handlers and discard its queued messages.
    pub fn unregister_agent(&self, agent: &AgentId) -> bool {
        let Some((_, route)) = self.inner.routes.remove(agent) else {
            return false;
        };
        let discarded = route.mailbox.close();
        self.inner.finish(discarded);
        if discarded > 0 {
            warn!("Unregistered {} with {} undelivered messages", agent, discarded);
        } else {
            info!("Unregistered {}", agent);
        }
        true
    }

    /// Whether `agent` has a delivery task
    pub fn is_registered(&self, agent: &AgentId) -> bool {
        self.inner.routes.contains_key(agent)
    }

    /// Registered agents, sorted
    pub fn registered_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.inner.routes.iter().map(|e| e.key().clone()).collect();
        agents.sort();
        agents
    }

    fn route_for(&self, agent: &AgentId) -> Result<Arc<Route>> {
        agent
            .validate()
            .map_err(|e| CoordinationError::Validation(e.to_string()))?;

        let route = self
            .inner
            .routes
            .entry(agent.clone())
            .or_insert_with(|| {
                let mailbox = Arc::new(Mailbox::new());
                let worker = tokio::spawn(deliver_loop(
                    agent.clone(),
                    mailbox.clone(),
                    Arc::downgrade(&self.inner),
                ));
                Arc::new(Route {
                    handlers: RwLock::new(HashMap::new()),
                    fallback: RwLock::new(None),
                    mailbox,
                    worker: Mutex::new(Some(worker)),
                })
            })
            .clone();
        Ok(route)
    }

    // --------------------------------------------------------------------------
    // Sending
    // --------------------------------------------------------------------------

    /// Build and route a message.
    ///
    /// When `options.requires_response` is set and the message is queued, the
    /// receipt carries a [`PendingResponse`] that resolves with the matching
    /// response or times out.
    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &self,
        sender: &AgentId,
        recipient: Recipient,
        message_type: MessageType,
        subject: impl Into<String>,
        payload: Payload,
        priority: Priority,
        options: SendOptions,
    ) -> Result<SendReceipt> {
        let timeout = options
            .response_timeout
            .unwrap_or_else(|| self.inner.config.response_timeout());
        if timeout > Duration::from_secs(MAX_RESPONSE_TIMEOUT_SECS) {
            return Err(CoordinationError::Validation(format!(
                "response timeout {:?} exceeds the {}s limit",
                timeout, MAX_RESPONSE_TIMEOUT_SECS
            )));
        }
        let message = MessageBuilder::new(sender.clone(), recipient, message_type)
            .subject(subject)
            .payload(payload)
            .priority(priority)
            .hop_limit(self.inner.config.default_hop_limit)
            .options(&options)
            .build()?;
        Ok(self.dispatch(message, Some(timeout)))
    }

    /// Route a message built elsewhere.
    pub fn send_message(&self, message: Message) -> SendReceipt {
        let timeout = self.inner.config.response_timeout();
        self.dispatch(message, Some(timeout))
    }

    /// Reply to `request` on behalf of `responder`.
    pub fn respond(&self, request: &Message, responder: &AgentId, payload: Payload) -> Result<SendReceipt> {
        let message = MessageBuilder::new(
            responder.clone(),
            Recipient::Agent(request.sender().clone()),
            MessageType::Response,
        )
        .subject(format!("Re: {}", request.subject()))
        .payload(payload)
        .priority(request.priority())
        .correlation_id(request.id())
        .thread_id(request.thread_id())
        .hop_limit(self.inner.config.default_hop_limit)
        .build()?;
        Ok(self.dispatch(message, None))
    }

    /// Pass `message` on to another recipient.
    ///
    /// The forwarded copy keeps its remaining hop limit and records `by` as
    /// visited. The original requester's pending response, if any, is left
    /// in place.
    pub fn forward(&self, message: &Message, by: &AgentId, to: Recipient) -> SendReceipt {
        debug!("{} forwarding {} to {}", by, message.id(), to);
        self.dispatch(message.forwarded(by, to), None)
    }

    /// Send to every registered agent except the sender and blocked agents.
    pub fn broadcast(
        &self,
        sender: &AgentId,
        subject: impl Into<String>,
        payload: Payload,
        priority: Priority,
    ) -> Result<SendReceipt> {
        self.send(
            sender,
            Recipient::Broadcast,
            MessageType::Broadcast,
            subject,
            payload,
            priority,
            SendOptions::default(),
        )
    }

    /// Deliver some attitude.
    pub fn send_sass(
        &self,
        sender: &AgentId,
        recipient: &AgentId,
        level: u8,
        quip: impl Into<String>,
        context: Option<&str>,
    ) -> Result<SendReceipt> {
        let quip = quip.into();
        let mut payload = Payload::new();
        payload.insert("sass_delivered".to_string(), true.into());
        payload.insert("message".to_string(), quip.clone().into());
        if let Some(context) = context {
            payload.insert("context".to_string(), context.into());
        }

        self.send(
            sender,
            Recipient::Agent(recipient.clone()),
            MessageType::Sass,
            format!("Sass level {}", level),
            payload,
            Priority::Low,
            SendOptions::default().with_sass(level, quip),
        )
    }

    /// Announce a blocker to every registered agent.
    pub fn report_blocker(
        &self,
        sender: &AgentId,
        description: &str,
        blocking_agents: &[AgentId],
        priority: Priority,
    ) -> Result<SendReceipt> {
        let mut payload = Payload::new();
        payload.insert("blocker".to_string(), description.into());
        payload.insert(
            "blocking_agents".to_string(),
            serde_json::to_value(blocking_agents).map_err(|e| CoordinationError::Validation(e.to_string()))?,
        );
        payload.insert("reported_at".to_string(), chrono::Utc::now().to_rfc3339().into());
        payload.insert("status".to_string(), "active".into());

        let subject: String = description.chars().take(50).collect();
        self.send(
            sender,
            Recipient::Broadcast,
            MessageType::Blocker,
            format!("BLOCKER: {}", subject),
            payload,
            priority,
            SendOptions::default().with_sass(7, "Another blocker. Riveting."),
        )
    }

    fn dispatch(&self, message: Message, response_timeout: Option<Duration>) -> SendReceipt {
        match message.recipient().clone() {
            Recipient::Broadcast => self.fan_out(message),
            Recipient::Agent(agent) => self.route_one(agent, message, response_timeout),
        }
    }

    fn route_one(&self, agent: AgentId, message: Message, response_timeout: Option<Duration>) -> SendReceipt {
        if let Some(reason) = self.blocked_reason(&agent) {
            self.inner.counters.blocked.incr();
            self.inner.telemetry.emit(TelemetryEvent::MessageBlocked {
                message_id: message.id(),
                recipient: agent.clone(),
                reason: reason.clone(),
            });
            return SendReceipt {
                message,
                outcome: SendOutcome::Blocked { agent, reason },
                response: None,
            };
        }

        self.record(&message);

        // Register before queueing so a fast responder cannot miss the slot.
        let mut response = match response_timeout {
            Some(timeout) if message.requires_response() => {
                let now = Instant::now();
                let bounded = timeout.min(Duration::from_secs(MAX_RESPONSE_TIMEOUT_SECS));
                let deadline = now.checked_add(bounded).unwrap_or(now);
                Some(self.inner.pending.register(message.id(), message.sender().clone(), deadline))
            }
            _ => None,
        };

        let route = self.inner.routes.get(&agent).map(|r| Arc::clone(r.value()));
        let outcome = match route {
            Some(route) if self.enqueue(&route, message.clone()) => SendOutcome::Queued { recipients: 1 },
            _ if message.message_type() == MessageType::Response
                && self.inner.pending.resolve(&agent, message.clone()) =>
            {
                self.inner.counters.correlated.incr();
                SendOutcome::Correlated
            }
            _ => {
                self.inner.counters.undeliverable.incr();
                debug!("No route to {} for message {}", agent, message.id());
                response = None;
                SendOutcome::NoRoute { agent }
            }
        };

        SendReceipt {
            message,
            outcome,
            response,
        }
    }

    fn fan_out(&self, message: Message) -> SendReceipt {
        let targets: Vec<(AgentId, Arc<Route>)> = {
            let blocked = self.inner.blocked.read();
            let mut targets: Vec<(AgentId, Arc<Route>)> = self
                .inner
                .routes
                .iter()
                .filter(|e| e.key() != message.sender() && !blocked.contains_key(e.key()))
                .map(|e| (e.key().clone(), Arc::clone(e.value())))
                .collect();
            targets.sort_by(|a, b| a.0.cmp(&b.0));
            targets
        };

        self.record(&message);
        let recipients = targets
            .iter()
            .filter(|(_, route)| self.enqueue(route, message.clone()))
            .count();
        debug!("Broadcast {} from {} to {} agents", message.id(), message.sender(), recipients);

        SendReceipt {
            message,
            outcome: SendOutcome::Queued { recipients },
            response: None,
        }
    }

    fn enqueue(&self, route: &Route, message: Message) -> bool {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        if route.mailbox.push(message) {
            true
        } else {
            self.inner.finish(1);
            false
        }
    }

    fn record(&self, message: &Message) {
        let counters = &self.inner.counters;
        counters.sent.incr();
        counters.sass_total.add(u64::from(message.sass().level));
        *self.inner.by_type.entry(message.message_type()).or_insert(0) += 1;

        let mut log = self.inner.log.lock();
        log.push_back(message.clone());
        while log.len() > self.inner.config.message_log_size {
            log.pop_front();
        }
    }

    // --------------------------------------------------------------------------
    // Receiving
    // --------------------------------------------------------------------------

    /// Deliver `message` to `agent`: consume a hop, check for loops, then
    /// complete a pending request or invoke the agent's handler.
    ///
    /// Normally called by the agent's delivery task.
    pub async fn receive(&self, agent: &AgentId, mut message: Message) -> ReceiveOutcome {
        if !message.take_hop() {
            return self.drop_message(agent, &message, DropReason::HopLimitExhausted);
        }
        if message.has_visited(agent) {
            return self.drop_message(agent, &message, DropReason::LoopDetected);
        }
        if self.is_blocked(agent) {
            return self.drop_message(agent, &message, DropReason::RecipientBlocked);
        }

        if message.message_type() == MessageType::Response {
            if let Some(request_id) = message.correlation_id() {
                if self.inner.pending.resolve(agent, message.clone()) {
                    self.inner.counters.correlated.incr();
                    return ReceiveOutcome::Correlated { request_id };
                }
            }
        }

        let handler = self
            .inner
            .routes
            .get(agent)
            .and_then(|route| route.handler_for(message.message_type()));
        let Some(handler) = handler else {
            self.inner.counters.unhandled.incr();
            debug!("{} has no handler for {} message {}", agent, message.message_type(), message.id());
            return ReceiveOutcome::Unhandled;
        };

        let message_id = message.id();
        match AssertUnwindSafe(handler.handle(agent, message)).catch_unwind().await {
            Ok(Ok(())) => {
                self.inner.counters.delivered.incr();
                ReceiveOutcome::Delivered
            }
            Ok(Err(e)) => self.handler_failed(agent, message_id, e.to_string()),
            Err(panic) => self.handler_failed(agent, message_id, panic_message(panic.as_ref())),
        }
    }

    fn drop_message(&self, agent: &AgentId, message: &Message, reason: DropReason) -> ReceiveOutcome {
        self.inner.counters.dropped.incr();
        self.inner.telemetry.emit(TelemetryEvent::MessageDropped {
            message_id: message.id(),
            recipient: agent.clone(),
            reason: reason.to_string(),
        });
        ReceiveOutcome::Dropped(reason)
    }

    fn handler_failed(&self, agent: &AgentId, message_id: MessageId, error: String) -> ReceiveOutcome {
        self.inner.counters.handler_failures.incr();
        self.inner.telemetry.emit(TelemetryEvent::HandlerFailed {
            message_id,
            recipient: agent.clone(),
            error: error.clone(),
        });
        ReceiveOutcome::HandlerFailed { error }
    }

    // --------------------------------------------------------------------------
    // Blocking
    // --------------------------------------------------------------------------

    /// Stop routing messages to `agent` until unblocked.
    pub fn block_agent(&self, agent: &AgentId, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.blocked.write().insert(agent.clone(), reason.clone());
        self.inner.telemetry.emit(TelemetryEvent::AgentBlocked {
            agent_id: agent.clone(),
            reason,
        });
    }

    /// Lift a block; returns whether the agent was blocked
    pub fn unblock_agent(&self, agent: &AgentId) -> bool {
        let removed = self.inner.blocked.write().remove(agent).is_some();
        if removed {
            self.inner.telemetry.emit(TelemetryEvent::AgentUnblocked {
                agent_id: agent.clone(),
            });
        }
        removed
    }

    /// Whether `agent` is blocked
    pub fn is_blocked(&self, agent: &AgentId) -> bool {
        self.inner.blocked.read().contains_key(agent)
    }

    /// Reason `agent` was blocked
    pub fn blocked_reason(&self, agent: &AgentId) -> Option<String> {
        self.inner.blocked.read().get(agent).cloned()
    }

    /// Blocked agents, sorted
    pub fn blocked_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.inner.blocked.read().keys().cloned().collect();
        agents.sort();
        agents
    }

    // --------------------------------------------------------------------------
    // Housekeeping
    // --------------------------------------------------------------------------

    /// Wait until every queued message has been handled, including messages
    /// sent by handlers along the way. Must not be called from a handler.
    pub async fn flush(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Expire pending responses whose deadline has passed.
    pub fn reap_expired(&self) -> usize {
        self.reap_expired_at(Instant::now())
    }

    /// [`Self::reap_expired`] against a fixed instant
    pub fn reap_expired_at(&self, now: Instant) -> usize {
        let reaped = self.inner.pending.reap(now);
        if reaped > 0 {
            debug!("Reaped {} expired response slots", reaped);
        }
        reaped
    }

    /// Requests still waiting for an answer
    pub fn pending_responses(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of messages queued or being handled
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Most recent sent messages, oldest first
    pub fn message_log(&self) -> Vec<Message> {
        self.inner.log.lock().iter().cloned().collect()
    }

    /// Snapshot of the bus counters
    pub fn stats(&self) -> MessageStats {
        let counters = &self.inner.counters;
        let total_sent = counters.sent.get();
        let average_sass_level = if total_sent == 0 {
            0.0
        } else {
            counters.sass_total.get() as f64 / total_sent as f64
        };

        MessageStats {
            total_sent,
            delivered: counters.delivered.get(),
            correlated: counters.correlated.get(),
            dropped: counters.dropped.get(),
            blocked: counters.blocked.get(),
            undeliverable: counters.undeliverable.get(),
            unhandled: counters.unhandled.get(),
            handler_failures: counters.handler_failures.get(),
            response_timeouts: self.inner.pending.timeouts.get(),
            pending_responses: self.inner.pending.len(),
            messages_by_type: self.inner.by_type.iter().map(|e| (*e.key(), *e.value())).collect(),
            average_sass_level,
            registered_agents: self.inner.routes.len(),
            blocked_agents: self.blocked_agents(),
        }
    }

    /// Unregister every agent and stop their delivery tasks.
    pub async fn shutdown(&self) {
        let agents = self.registered_agents();
        let mut workers = Vec::new();
        for agent in &agents {
            if let Some((_, route)) = self.inner.routes.remove(agent) {
                self.inner.finish(route.mailbox.close());
                if let Some(worker) = route.worker.lock().take() {
                    workers.push(worker);
                }
            }
        }
        for worker in workers {
            let _ = worker.await;
        }
        info!("Message bus shut down ({} agents)", agents.len());
    }
}

async fn deliver_loop(agent: AgentId, mailbox: Arc<Mailbox>, bus: Weak<BusInner>) {
    while let Some(message) = mailbox.next().await {
        let Some(inner) = bus.upgrade() else { break };
        let bus = MessageBus { inner };
        bus.receive(&agent, message).await;
        bus.inner.finish(1);
    }
    debug!("Delivery task for {} stopped", agent);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
