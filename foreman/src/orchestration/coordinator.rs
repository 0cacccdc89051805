//! Coordinator
//!
//! Supervisor-facing façade over the bus, the resolver and the tracker.
//! Every outbound message is sent as the configured supervisor.

use super::*;
use crate::blockers::{ActionTarget, Blocker, BlockerResolver, ResolutionAction, ResolutionStrategy, ResolvedBlocker};
use crate::coordination::{
    MessageBus, MessageType, Payload, Priority, Recipient, SendOptions, SendReceipt,
};
use crate::monitoring::{default_sink, TelemetrySink};
use crate::performance::PerformanceTracker;
use chrono::Utc;
use foreman_core::{AgentId, BlockerId, ForemanConfig};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Supervisor-facing entry point that owns the bus, tracker and resolver.
///
/// Events flow into the tracker, blockers into the resolver, and every
/// resolution step turns into bus traffic from the supervisor.
pub struct Coordinator {
    config: ForemanConfig,
    supervisor: AgentId,
    bus: MessageBus,
    tracker: Arc<PerformanceTracker>,
    resolver: Arc<BlockerResolver>,
}

impl Coordinator {
    /// Build from a config, logging telemetry through `tracing`
    pub fn new(config: ForemanConfig) -> Result<Self> {
        Self::with_telemetry(config, default_sink())
    }

    /// Build all components from one validated config, sharing `telemetry`.
    pub fn with_telemetry(config: ForemanConfig, telemetry: Arc<dyn TelemetrySink>) -> Result<Self> {
        config.validate()?;
        let supervisor = AgentId::parse(config.general().supervisor_id.clone())?;

        let bus = MessageBus::with_telemetry(config.bus().clone(), telemetry.clone());
        let tracker = Arc::new(PerformanceTracker::with_telemetry(
            config.performance().clone(),
            telemetry.clone(),
        ));
        let resolver = Arc::new(BlockerResolver::with_telemetry(
            config.blockers().clone(),
            tracker.clone(),
            telemetry,
        ));

        info!("Coordinator ready (supervisor: {})", supervisor);
        Ok(Self {
            config,
            supervisor,
            bus,
            tracker,
            resolver,
        })
    }

    /// Configuration the coordinator was built from
    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    /// Agent id used as the sender of supervisor messages
    pub fn supervisor(&self) -> &AgentId {
        &self.supervisor
    }

    /// Message bus
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Shared performance tracker
    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// Shared blocker resolver
    pub fn resolver(&self) -> &Arc<BlockerResolver> {
        &self.resolver
    }

    // --------------------------------------------------------------------------
    // Inbound
    // --------------------------------------------------------------------------

    /// Apply an agent event to the tracker.
    pub fn report_event(&self, agent: &AgentId, event: AgentEvent) -> Result<()> {
        event.validate()?;
        agent
            .validate()
            .map_err(|e| OrchestrationError::InvalidEvent(format!("agent: {}", e)))?;
        debug!("Event {} for {}", event.kind(), agent);

        let tracker = &self.tracker;
        match event {
            AgentEvent::TaskAssigned { task_id } => tracker.record_task_assignment(agent, &task_id),
            AgentEvent::TaskCompleted { task_id, duration_secs } => {
                tracker.record_task_completion(agent, &task_id, true, duration_secs)
            }
            AgentEvent::TaskFailed { task_id, duration_secs } => {
                tracker.record_task_completion(agent, &task_id, false, duration_secs)
            }
            AgentEvent::Error { error_type } => tracker.record_error(agent, &error_type),
            AgentEvent::Blocker => {
                tracker.record_blocker(agent);
            }
            AgentEvent::SassDelivered { level } => {
                tracker.record_sass_received(agent, level);
            }
            AgentEvent::Commendation { reason } => {
                tracker.issue_commendation(agent, &reason);
            }
            AgentEvent::Strike { reason } => {
                tracker.issue_strike(agent, &reason);
            }
            AgentEvent::Downtime { secs } => tracker.record_downtime(agent, secs),
            AgentEvent::Collaboration { delta } => {
                tracker.update_collaboration_score(agent, delta);
            }
            AgentEvent::Innovation { delta } => {
                tracker.update_innovation_score(agent, delta);
            }
        }
        Ok(())
    }

    /// Parse and apply an event given as a kind and JSON fields.
    pub fn report_raw_event(&self, agent: &AgentId, kind: &str, data: &serde_json::Value) -> Result<()> {
        let event = AgentEvent::from_kind(kind, data)?;
        self.report_event(agent, event)
    }

    /// Send a message on behalf of the supervisor.
    pub fn send_message(
        &self,
        recipient: Recipient,
        message_type: MessageType,
        subject: &str,
        payload: Payload,
        priority: Priority,
        options: SendOptions,
    ) -> Result<SendReceipt> {
        Ok(self.bus.send(
            &self.supervisor,
            recipient,
            message_type,
            subject,
            payload,
            priority,
            options,
        )?)
    }

    /// Record a blocker and announce it to the fleet.
    pub fn report_blocker(
        &self,
        description: &str,
        reported_by: &AgentId,
        blocking_agents: &[AgentId],
        priority: Priority,
    ) -> Result<Blocker> {
        let blocker = self
            .resolver
            .report_blocker(description, reported_by, blocking_agents, priority)?;
        let receipt = self
            .bus
            .report_blocker(reported_by, &blocker.description, &blocker.blocking_agents, priority)?;
        debug!("Blocker {} announced: {:?}", blocker.id, receipt.outcome);
        Ok(blocker)
    }

    /// Take the next ladder step for a blocker and send the messages it calls
    /// for. The action is returned to the caller either way.
    pub fn attempt_resolution(&self, blocker_id: &BlockerId) -> Result<ResolutionAction> {
        let action = self.resolver.attempt_resolution(blocker_id)?;
        let blocker = self
            .resolver
            .get(blocker_id)
            .ok_or_else(|| crate::blockers::BlockerError::NotFound(blocker_id.clone()))?;

        match action.strategy {
            ResolutionStrategy::Delegate => {
                if let ActionTarget::Agent(target) = &action.target {
                    let mut payload = Payload::new();
                    payload.insert("task_id".to_string(), json!(blocker_id.as_str()));
                    payload.insert("blocker".to_string(), json!(blocker.description));
                    payload.insert("message".to_string(), json!(action.message));
                    self.dispatch(
                        target,
                        MessageType::TaskAssignment,
                        &format!("Delegated blocker {}", blocker_id),
                        payload,
                        blocker.priority,
                        SendOptions::default(),
                    );
                    self.tracker.record_task_assignment(target, blocker_id.as_str());
                }
            }
            ResolutionStrategy::Sass => {
                for agent in action.target.agents() {
                    self.deliver_sass(&agent, action.severity, &action.message, Some(blocker.description.as_str()))?;
                }
            }
            ResolutionStrategy::Threaten | ResolutionStrategy::Replace => {
                let (priority, threat_level) = if action.strategy == ResolutionStrategy::Replace {
                    (Priority::Critical, "replacement")
                } else {
                    (Priority::High, "performance_review")
                };
                for agent in action.target.agents() {
                    let mut payload = Payload::new();
                    payload.insert("blocker_id".to_string(), json!(blocker_id.as_str()));
                    payload.insert("threat_level".to_string(), json!(threat_level));
                    payload.insert("message".to_string(), json!(action.message));
                    self.dispatch(
                        &agent,
                        MessageType::Escalation,
                        &format!("Blocker {}: attempt {}", blocker_id, action.attempt),
                        payload,
                        priority,
                        SendOptions::default().with_sass(action.severity, action.message.clone()),
                    );
                }
            }
            ResolutionStrategy::Escalate | ResolutionStrategy::Automate | ResolutionStrategy::Ignore => {}
        }

        Ok(action)
    }

    /// Resolve a blocker and count it as a successful outcome for its pattern.
    pub fn resolve_blocker(&self, blocker_id: &BlockerId, notes: Option<&str>) -> Result<ResolvedBlocker> {
        let resolved = self.resolver.resolve_blocker(blocker_id, notes)?;
        self.resolver.record_outcome(blocker_id, true)?;
        Ok(resolved)
    }

    /// Send sass to an agent and record that it was received.
    pub fn deliver_sass(
        &self,
        agent: &AgentId,
        level: u8,
        quip: &str,
        context: Option<&str>,
    ) -> Result<SendReceipt> {
        let receipt = self.bus.send_sass(&self.supervisor, agent, level, quip, context)?;
        if receipt.is_queued() {
            self.tracker.record_sass_received(agent, level);
        }
        Ok(receipt)
    }

    fn dispatch(
        &self,
        agent: &AgentId,
        message_type: MessageType,
        subject: &str,
        payload: Payload,
        priority: Priority,
        options: SendOptions,
    ) {
        match self.bus.send(
            &self.supervisor,
            Recipient::Agent(agent.clone()),
            message_type,
            subject,
            payload,
            priority,
            options,
        ) {
            Ok(receipt) => debug!("{} to {}: {:?}", message_type, agent, receipt.outcome),
            Err(e) => debug!("Could not send {} to {}: {}", message_type, agent, e),
        }
    }

    // --------------------------------------------------------------------------
    // Reviews
    // --------------------------------------------------------------------------

    /// Weekly ranking plus MVP selection. A new MVP is announced to the fleet.
    pub fn weekly_review(&self) -> WeeklyReview {
        let rankings = self.tracker.calculate_weekly_rankings();
        let mvp = self.tracker.crown_mvp(&rankings);

        if let Some(record) = &mvp {
            let mut payload = Payload::new();
            payload.insert("agent_id".to_string(), json!(record.agent_id));
            payload.insert("score".to_string(), json!(record.score));
            payload.insert("week".to_string(), json!(record.week));
            if let Err(e) = self.bus.broadcast(
                &self.supervisor,
                format!("Weekly MVP: {}", record.agent_id),
                payload,
                Priority::Medium,
            ) {
                debug!("MVP announcement not sent: {}", e);
            }
        }

        WeeklyReview { rankings, mvp }
    }

    /// Rankings, problem agents, blocker and message statistics
    pub fn summary_report(&self) -> SummaryReport {
        let agents = self
            .tracker
            .rankings()
            .into_iter()
            .map(AgentSummary::from)
            .collect();
        let blockers = self.resolver.metrics();

        SummaryReport {
            generated_at: Utc::now(),
            agents,
            mvp: self.tracker.current_mvp(),
            problem_agents: self.tracker.identify_problem_agents(),
            chronic_blockers: blockers.chronic_blockers.clone(),
            blockers,
            messages: self.bus.stats(),
        }
    }

    /// Wait for queued messages to drain.
    pub async fn flush(&self) {
        self.bus.flush().await;
    }

    /// Stop every delivery task; later sends find no route
    pub async fn shutdown(&self) {
        self.bus.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::ChannelHandler;
    use crate::monitoring::RecordingSink;

    fn coordinator() -> (Coordinator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (
            Coordinator::with_telemetry(ForemanConfig::default(), sink.clone()).unwrap(),
            sink,
        )
    }

    fn id(name: &str) -> AgentId {
        AgentId::from(name)
    }

    #[tokio::test]
    async fn test_report_event_updates_tracker() {
        let (coordinator, _) = coordinator();
        let agent = id("worker");
        coordinator
            .report_event(&agent, AgentEvent::TaskAssigned { task_id: "t1".into() })
            .unwrap();
        coordinator
            .report_raw_event(&agent, "task_completed", &json!({"task_id": "t1", "duration": 2.0}))
            .unwrap();

        let m = coordinator.tracker().metrics(&agent).unwrap();
        assert_eq!(m.total_tasks, 1);
        assert_eq!(m.completed_tasks, 1);

        assert!(coordinator.report_raw_event(&agent, "nap", &json!({})).is_err());
    }

    #[tokio::test]
    async fn test_sass_rung_messages_and_records() {
        let (coordinator, _) = coordinator();
        let (handler, mut rx) = ChannelHandler::new();
        coordinator.bus().register_fallback(&id("slacker"), handler).unwrap();

        let blocker = coordinator
            .report_blocker("waiting for slacker to finish", &id("builder"), &[id("slacker")], Priority::High)
            .unwrap();
        coordinator.attempt_resolution(&blocker.id).unwrap();
        let sass = coordinator.attempt_resolution(&blocker.id).unwrap();
        assert_eq!(sass.strategy, ResolutionStrategy::Sass);

        coordinator.flush().await;
        let mut kinds = Vec::new();
        while let Ok(message) = rx.try_recv() {
            kinds.push(message.message_type());
        }
        assert_eq!(kinds, vec![MessageType::Blocker, MessageType::Sass]);
        assert_eq!(coordinator.tracker().metrics(&id("slacker")).unwrap().sass_count, 1);
    }

    #[tokio::test]
    async fn test_resolve_records_outcome() {
        let (coordinator, sink) = coordinator();
        let blocker = coordinator
            .report_blocker("Service timeout", &id("a"), &[id("b")], Priority::Medium)
            .unwrap();
        coordinator.resolve_blocker(&blocker.id, Some("restarted")).unwrap();

        assert_eq!(sink.count("resolution_outcome"), 1);
        let err = coordinator.resolve_blocker(&blocker.id, None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_bad_agent_id_is_not_a_lookup_miss() {
        let err = OrchestrationError::from(AgentId::parse("").unwrap_err());
        assert!(matches!(err, OrchestrationError::Config(ref e) if !e.is_config()));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_summary_report() {
        let (coordinator, _) = coordinator();
        coordinator.tracker().register_agent(&id("a"));
        coordinator.tracker().issue_strike(&id("b"), "late");
        coordinator.tracker().issue_strike(&id("b"), "later");

        let report = coordinator.summary_report();
        assert_eq!(report.agents.len(), 2);
        assert_eq!(report.agents[0].agent_id, id("a"));
        assert_eq!(report.problem_agents, vec![id("b")]);
        assert!(report.mvp.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["agents"][0]["performance_level"].is_string());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ForemanConfig::default();
        config.bus_mut().default_hop_limit = 0;
        assert!(matches!(Coordinator::new(config), Err(OrchestrationError::Config(_))));
    }
}
