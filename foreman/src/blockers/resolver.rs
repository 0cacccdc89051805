//! Blocker Resolver
//!
//! Active blockers live in one locked table. Per-agent blocker counts and
//! the strikes they trigger are owned by the [`PerformanceTracker`]; the
//! resolver only keeps report timestamps to find chronic offenders inside
//! the observation window.

use super::*;
use crate::coordination::Priority;
use crate::monitoring::{default_sink, TelemetryEvent, TelemetrySink};
use crate::performance::PerformanceTracker;
use chrono::{DateTime, Utc};
use foreman_core::{AgentId, BlockerConfig, BlockerId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_RESOLUTION_NOTES: &str = "Resolved through sheer force of will";

#[derive(Default)]
struct ResolverState {
    active: HashMap<BlockerId, Blocker>,
    resolved: VecDeque<Blocker>,
    resolution_times: HashMap<BlockerType, VecDeque<f64>>,
    reports_by_agent: HashMap<AgentId, VecDeque<DateTime<Utc>>>,
}

/// Tracks reported blockers and escalates each one up the resolution ladder.
///
/// Blocker counts and strikes are recorded on the shared [`PerformanceTracker`].
pub struct BlockerResolver {
    config: BlockerConfig,
    patterns: RwLock<Vec<BlockerPattern>>,
    state: Mutex<ResolverState>,
    tracker: Arc<PerformanceTracker>,
    telemetry: Arc<dyn TelemetrySink>,
    sequence: AtomicU64,
}

impl BlockerResolver {
    /// Resolver with the default patterns and the `tracing` telemetry sink
    pub fn new(config: BlockerConfig, tracker: Arc<PerformanceTracker>) -> Self {
        Self::with_telemetry(config, tracker, default_sink())
    }

    /// Resolver with the default patterns and a custom sink
    pub fn with_telemetry(
        config: BlockerConfig,
        tracker: Arc<PerformanceTracker>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::with_patterns(config, tracker, telemetry, default_patterns())
    }

    /// Resolver with a custom pattern table
    pub fn with_patterns(
        config: BlockerConfig,
        tracker: Arc<PerformanceTracker>,
        telemetry: Arc<dyn TelemetrySink>,
        patterns: Vec<BlockerPattern>,
    ) -> Self {
        info!("BlockerResolver initialized with {} patterns", patterns.len());
        Self {
            config,
            patterns: RwLock::new(patterns),
            state: Mutex::new(ResolverState::default()),
            tracker,
            telemetry,
            sequence: AtomicU64::new(0),
        }
    }

    /// Tracker that receives blocker counts and strikes
    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    // --------------------------------------------------------------------------
    // Reporting
    // --------------------------------------------------------------------------

    /// Classify `description` without recording anything
    pub fn classify(&self, description: &str) -> Classification {
        classify(&self.patterns.read(), description)
    }

    /// Classify and record a new active blocker.
    ///
    /// Each blocking agent gets one blocker counted against it in the tracker
    /// (every third one is a strike).
    pub fn report_blocker(
        &self,
        description: &str,
        reported_by: &AgentId,
        blocking_agents: &[AgentId],
        priority: Priority,
    ) -> Result<Blocker> {
        self.report_blocker_at(description, reported_by, blocking_agents, priority, Utc::now())
    }

    /// [`report_blocker`](Self::report_blocker) with an explicit report time.
    pub fn report_blocker_at(
        &self,
        description: &str,
        reported_by: &AgentId,
        blocking_agents: &[AgentId],
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Blocker> {
        let description = description.trim();
        if description.is_empty() {
            return Err(BlockerError::Validation("description must not be empty".to_string()));
        }
        reported_by
            .validate()
            .map_err(|e| BlockerError::Validation(format!("reporter: {}", e)))?;

        let mut agents: Vec<AgentId> = Vec::with_capacity(blocking_agents.len());
        for agent in blocking_agents {
            agent
                .validate()
                .map_err(|e| BlockerError::Validation(format!("blocking agent: {}", e)))?;
            if !agents.contains(agent) {
                agents.push(agent.clone());
            }
        }

        let classification = self.classify(description);
        let id = BlockerId::from_parts(now.timestamp(), self.sequence.fetch_add(1, Ordering::Relaxed));
        let blocker = Blocker {
            id: id.clone(),
            description: description.to_string(),
            blocker_type: classification.blocker_type,
            reported_by: reported_by.clone(),
            blocking_agents: agents.clone(),
            priority,
            status: BlockerStatus::Active,
            attempt_count: 0,
            created_at: now,
            resolved_at: None,
            resolution_notes: None,
            pattern_id: classification.pattern_id,
            suggested_strategy: classification.strategy,
            suggested_severity: classification.severity,
        };

        {
            let mut state = self.state.lock();
            state.active.insert(id.clone(), blocker.clone());
            let horizon = self.horizon(now);
            for agent in &agents {
                let reports = state.reports_by_agent.entry(agent.clone()).or_default();
                reports.retain(|at| *at >= horizon);
                reports.push_back(now);
            }
        }

        for agent in &agents {
            self.tracker.record_blocker(agent);
        }

        self.telemetry.emit(TelemetryEvent::BlockerReported {
            blocker_id: id,
            blocker_type: blocker.blocker_type.to_string(),
            blocking_agents: agents,
        });
        Ok(blocker)
    }

    // --------------------------------------------------------------------------
    // Resolution
    // --------------------------------------------------------------------------

    /// Take the next step on the escalation ladder for an active blocker.
    ///
    /// Attempt 1 delegates, 2 applies sass, 3 threatens, 4 and later propose
    /// replacing the blocking agents. The ladder ignores the blocker type.
    pub fn attempt_resolution(&self, blocker_id: &BlockerId) -> Result<ResolutionAction> {
        let blocker = {
            let mut state = self.state.lock();
            let blocker = state
                .active
                .get_mut(blocker_id)
                .ok_or_else(|| BlockerError::NotFound(blocker_id.clone()))?;
            blocker.attempt_count += 1;
            blocker.clone()
        };

        let attempt = blocker.attempt_count;
        let (strategy, severity) = ResolutionStrategy::for_attempt(attempt);
        let (target, message) = match strategy {
            ResolutionStrategy::Delegate => (
                ActionTarget::Agent(self.find_delegate(&blocker)),
                format!("Take this one off their hands: {}", blocker.description),
            ),
            ResolutionStrategy::Sass => (
                ActionTarget::Agents(blocker.blocking_agents.clone()),
                "This blocker has your name written all over it.".to_string(),
            ),
            ResolutionStrategy::Threaten => (
                ActionTarget::Agents(blocker.blocking_agents.clone()),
                "Noted for your performance review. Permanently.".to_string(),
            ),
            ResolutionStrategy::Replace => (
                ActionTarget::Agents(blocker.blocking_agents.clone()),
                "A shell script has applied for your position.".to_string(),
            ),
            ResolutionStrategy::Escalate | ResolutionStrategy::Automate | ResolutionStrategy::Ignore => (
                ActionTarget::Human,
                format!("Human attention needed: {}", blocker.description),
            ),
        };

        self.telemetry.emit(TelemetryEvent::ResolutionAttempted {
            blocker_id: blocker_id.clone(),
            attempt,
            strategy: strategy.to_string(),
            severity,
        });

        Ok(ResolutionAction {
            blocker_id: blocker_id.clone(),
            attempt,
            strategy,
            target,
            severity,
            message,
        })
    }

    /// Best agent outside the blocker's blocking set: the tracker's top-scored
    /// agent not on the shame list, else the configured pool, else the last
    /// resort.
    fn find_delegate(&self, blocker: &Blocker) -> AgentId {
        let mut exclude = blocker.blocking_agents.clone();
        exclude.push(blocker.reported_by.clone());

        if let Some(agent) = self.tracker.best_delegate(&exclude) {
            return agent;
        }
        self.config
            .delegate_pool
            .iter()
            .map(|name| AgentId::from(name.as_str()))
            .find(|agent| !blocker.blocking_agents.contains(agent))
            .unwrap_or_else(|| AgentId::from(self.config.last_resort_agent.as_str()))
    }

    /// Mark a blocker resolved and move it to the resolved history.
    pub fn resolve_blocker(&self, blocker_id: &BlockerId, notes: Option<&str>) -> Result<ResolvedBlocker> {
        self.resolve_blocker_at(blocker_id, notes, Utc::now())
    }

    /// [`resolve_blocker`](Self::resolve_blocker) with an explicit resolution time.
    pub fn resolve_blocker_at(
        &self,
        blocker_id: &BlockerId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedBlocker> {
        let resolved = {
            let mut state = self.state.lock();
            let Some(mut blocker) = state.active.remove(blocker_id) else {
                warn!("Cannot resolve {}: not an active blocker", blocker_id);
                return Err(BlockerError::NotFound(blocker_id.clone()));
            };

            let notes = notes
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_RESOLUTION_NOTES)
                .to_string();
            blocker.status = BlockerStatus::Resolved;
            blocker.resolved_at = Some(now);
            blocker.resolution_notes = Some(notes.clone());
            let resolution_secs = blocker.resolution_secs().unwrap_or(0.0).max(0.0);

            let history_size = self.config.resolution_history_size;
            let times = state.resolution_times.entry(blocker.blocker_type).or_default();
            times.push_back(resolution_secs);
            while times.len() > history_size {
                times.pop_front();
            }

            let resolved = ResolvedBlocker {
                blocker_id: blocker.id.clone(),
                blocker_type: blocker.blocker_type,
                resolution_secs,
                resolution_notes: notes,
            };

            state.resolved.push_back(blocker);
            while state.resolved.len() > self.config.resolved_history_size {
                state.resolved.pop_front();
            }
            resolved
        };

        self.telemetry.emit(TelemetryEvent::BlockerResolved {
            blocker_id: resolved.blocker_id.clone(),
            resolution_secs: resolved.resolution_secs,
        });
        Ok(resolved)
    }

    /// Feed a resolution outcome back into the pattern that classified the
    /// blocker. Returns the pattern's new success rate, or `None` when the
    /// blocker matched no pattern.
    pub fn record_outcome(&self, blocker_id: &BlockerId, success: bool) -> Result<Option<f64>> {
        let blocker = self
            .get(blocker_id)
            .ok_or_else(|| BlockerError::NotFound(blocker_id.clone()))?;

        let rate = blocker.pattern_id.as_deref().and_then(|pattern_id| {
            let mut patterns = self.patterns.write();
            patterns
                .iter_mut()
                .find(|p| p.id() == pattern_id)
                .map(|p| p.record_outcome(success))
        });
        if let (Some(pattern_id), Some(rate)) = (&blocker.pattern_id, rate) {
            debug!("Pattern {} success rate now {:.1}%", pattern_id, rate * 100.0);
        }

        self.telemetry.emit(TelemetryEvent::ResolutionOutcome {
            blocker_id: blocker_id.clone(),
            pattern_id: blocker.pattern_id,
            success,
        });
        Ok(rate)
    }

    // --------------------------------------------------------------------------
    // Queries
    // --------------------------------------------------------------------------

    /// Agents reported as blocking at least `chronic_threshold` times inside
    /// the observation window, most frequent first, ties by id.
    pub fn chronic_blockers(&self) -> Vec<ChronicBlocker> {
        self.chronic_blockers_at(Utc::now())
    }

    /// Oldest report time still inside the chronic window
    fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.config.chronic_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// [`Self::chronic_blockers`] as seen at `now`
    pub fn chronic_blockers_at(&self, now: DateTime<Utc>) -> Vec<ChronicBlocker> {
        let horizon = self.horizon(now);
        let state = self.state.lock();
        let mut chronic: Vec<ChronicBlocker> = state
            .reports_by_agent
            .iter()
            .map(|(agent, reports)| ChronicBlocker {
                agent_id: agent.clone(),
                count: reports.iter().filter(|at| **at >= horizon && **at <= now).count(),
            })
            .filter(|c| c.count >= self.config.chronic_threshold)
            .collect();
        chronic.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.agent_id.cmp(&b.agent_id)));
        chronic
    }

    /// Counts and average resolution times
    pub fn metrics(&self) -> BlockerMetrics {
        let chronic_blockers = self.chronic_blockers();
        let state = self.state.lock();

        let mut active_by_type = BTreeMap::new();
        for blocker in state.active.values() {
            *active_by_type.entry(blocker.blocker_type).or_insert(0) += 1;
        }

        let average_resolution_secs = state
            .resolution_times
            .iter()
            .filter(|(_, times)| !times.is_empty())
            .map(|(blocker_type, times)| (*blocker_type, times.iter().sum::<f64>() / times.len() as f64))
            .collect();

        let active = state.active.len();
        let resolved = state.resolved.len();
        let total = active + resolved;

        BlockerMetrics {
            active,
            resolved,
            active_by_type,
            average_resolution_secs,
            chronic_blockers,
            resolution_success_rate: if total == 0 {
                0.0
            } else {
                resolved as f64 / total as f64
            },
        }
    }

    /// Active blockers, oldest first
    pub fn active_blockers(&self) -> Vec<Blocker> {
        let mut active: Vec<Blocker> = self.state.lock().active.values().cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        active
    }

    /// Resolved blockers, oldest first
    pub fn resolved_history(&self) -> Vec<Blocker> {
        self.state.lock().resolved.iter().cloned().collect()
    }

    /// Look a blocker up among active and resolved records.
    pub fn get(&self, blocker_id: &BlockerId) -> Option<Blocker> {
        let state = self.state.lock();
        state
            .active
            .get(blocker_id)
            .or_else(|| state.resolved.iter().rev().find(|b| &b.id == blocker_id))
            .cloned()
    }

    /// Snapshot of the pattern table with current success rates
    pub fn patterns(&self) -> Vec<BlockerPattern> {
        self.patterns.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::RecordingSink;
    use chrono::Duration;
    use foreman_core::PerformanceConfig;

    fn resolver() -> (BlockerResolver, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let tracker = Arc::new(PerformanceTracker::with_telemetry(
            PerformanceConfig::default(),
            sink.clone(),
        ));
        (
            BlockerResolver::with_telemetry(BlockerConfig::default(), tracker, sink.clone()),
            sink,
        )
    }

    fn id(name: &str) -> AgentId {
        AgentId::from(name)
    }

    #[test]
    fn test_report_classifies_and_dedupes() {
        let (resolver, sink) = resolver();
        let blocker = resolver
            .report_blocker(
                "Out of disk on the build box",
                &id("builder"),
                &[id("infra"), id("infra")],
                Priority::High,
            )
            .unwrap();

        assert_eq!(blocker.blocker_type, BlockerType::Resource);
        assert_eq!(blocker.pattern_id.as_deref(), Some("resource_unavailable"));
        assert_eq!(blocker.suggested_strategy, ResolutionStrategy::Escalate);
        assert_eq!(blocker.blocking_agents, vec![id("infra")]);
        assert!(blocker.id.as_str().starts_with("BLK-"));
        assert_eq!(resolver.tracker().metrics(&id("infra")).unwrap().blocker_count, 1);
        assert_eq!(sink.count("blocker_reported"), 1);
    }

    #[test]
    fn test_report_validation_has_no_side_effects() {
        let (resolver, _) = resolver();
        assert!(matches!(
            resolver.report_blocker("   ", &id("a"), &[id("b")], Priority::Low),
            Err(BlockerError::Validation(_))
        ));
        assert!(resolver.report_blocker("stuck", &id(""), &[], Priority::Low).is_err());
        assert!(resolver.report_blocker("stuck", &id("a"), &[id("")], Priority::Low).is_err());
        assert!(resolver.active_blockers().is_empty());
        assert!(resolver.tracker().is_empty());
    }

    #[test]
    fn test_escalation_ladder() {
        let (resolver, _) = resolver();
        let blocker = resolver
            .report_blocker("Approval needed", &id("pm"), &[id("legal")], Priority::Medium)
            .unwrap();

        let steps: Vec<(ResolutionStrategy, u8)> = (0..4)
            .map(|_| {
                let action = resolver.attempt_resolution(&blocker.id).unwrap();
                (action.strategy, action.severity)
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                (ResolutionStrategy::Delegate, 5),
                (ResolutionStrategy::Sass, 7),
                (ResolutionStrategy::Threaten, 9),
                (ResolutionStrategy::Replace, 11),
            ]
        );
        assert_eq!(resolver.get(&blocker.id).unwrap().attempt_count, 4);
    }

    #[test]
    fn test_delegate_avoids_blocking_agents() {
        let (resolver, _) = resolver();
        let blocker = resolver
            .report_blocker(
                "stuck",
                &id("supervisor"),
                &[id("agent-resolver"), id("agent-fixer")],
                Priority::Medium,
            )
            .unwrap();
        // The tracker only knows the blocking agents, so the pool is used.
        let action = resolver.attempt_resolution(&blocker.id).unwrap();
        assert_eq!(action.target, ActionTarget::Agent(id("agent-specialist")));

        resolver.tracker().register_agent(&id("helper"));
        let other = resolver
            .report_blocker("stuck again", &id("supervisor"), &[id("agent-fixer")], Priority::Medium)
            .unwrap();
        let action = resolver.attempt_resolution(&other.id).unwrap();
        assert_eq!(action.target, ActionTarget::Agent(id("helper")));
    }

    #[test]
    fn test_delegate_falls_back_to_last_resort() {
        let (resolver, _) = resolver();
        let blocker = resolver
            .report_blocker(
                "stuck",
                &id("supervisor"),
                &[id("agent-resolver"), id("agent-fixer"), id("agent-specialist")],
                Priority::Medium,
            )
            .unwrap();
        let action = resolver.attempt_resolution(&blocker.id).unwrap();
        assert_eq!(action.target, ActionTarget::Agent(id("agent-last-resort")));
    }

    #[test]
    fn test_unknown_blocker_is_not_found() {
        let (resolver, _) = resolver();
        let missing = BlockerId::from("BLK-0-0");
        assert!(resolver.attempt_resolution(&missing).unwrap_err().is_not_found());
        assert!(resolver.resolve_blocker(&missing, None).unwrap_err().is_not_found());
        assert!(resolver.record_outcome(&missing, true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_moves_to_history() {
        let (resolver, _) = resolver();
        let created = Utc::now() - Duration::seconds(90);
        let blocker = resolver
            .report_blocker_at("Error: flaky test", &id("ci"), &[id("tests")], Priority::Low, created)
            .unwrap();

        let resolved = resolver.resolve_blocker(&blocker.id, None).unwrap();
        assert_eq!(resolved.resolution_notes, DEFAULT_RESOLUTION_NOTES);
        assert!(resolved.resolution_secs >= 90.0);

        let history = resolver.resolved_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved_at.unwrap() > history[0].created_at);
        assert!(resolver.active_blockers().is_empty());

        // Second resolve is a not-found, not a panic.
        assert!(resolver.resolve_blocker(&blocker.id, Some("again")).is_err());

        let metrics = resolver.metrics();
        assert_eq!(metrics.resolved, 1);
        assert_eq!(metrics.resolution_success_rate, 1.0);
        assert!(metrics.average_resolution_secs[&BlockerType::Technical] >= 90.0);
    }

    #[test]
    fn test_record_outcome_updates_pattern() {
        let (resolver, sink) = resolver();
        let matched = resolver
            .report_blocker("Service unreachable", &id("a"), &[id("b")], Priority::Medium)
            .unwrap();
        let unmatched = resolver
            .report_blocker("the vibes are off", &id("a"), &[id("b")], Priority::Medium)
            .unwrap();

        assert_eq!(resolver.record_outcome(&matched.id, true).unwrap(), Some(0.1));
        resolver.resolve_blocker(&matched.id, Some("restarted")).unwrap();
        let rate = resolver.record_outcome(&matched.id, false).unwrap().unwrap();
        assert!((rate - 0.09).abs() < 1e-12);
        assert_eq!(resolver.record_outcome(&unmatched.id, true).unwrap(), None);

        let pattern = resolver
            .patterns()
            .into_iter()
            .find(|p| p.id() == "comm_failure")
            .unwrap();
        assert!((pattern.success_rate() - 0.09).abs() < 1e-12);
        assert_eq!(sink.count("resolution_outcome"), 3);
    }

    #[test]
    fn test_chronic_blockers_order_and_window() {
        let (resolver, _) = resolver();
        let now = Utc::now();
        let old = now - Duration::days(30);

        for _ in 0..4 {
            resolver.report_blocker_at("stuck", &id("pm"), &[id("zed")], Priority::Low, now).unwrap();
        }
        for _ in 0..3 {
            resolver
                .report_blocker_at("stuck", &id("pm"), &[id("amy"), id("bob")], Priority::Low, now)
                .unwrap();
        }
        for _ in 0..5 {
            resolver.report_blocker_at("stuck", &id("pm"), &[id("old")], Priority::Low, old).unwrap();
        }

        let chronic = resolver.chronic_blockers_at(now);
        let order: Vec<(&str, usize)> = chronic.iter().map(|c| (c.agent_id.as_str(), c.count)).collect();
        assert_eq!(order, vec![("zed", 4), ("amy", 3), ("bob", 3)]);
    }

    #[test]
    fn test_every_third_blocker_strikes_once() {
        let (resolver, sink) = resolver();
        for _ in 0..3 {
            resolver
                .report_blocker("blocked by slowpoke", &id("a"), &[id("slowpoke")], Priority::Low)
                .unwrap();
        }
        assert_eq!(resolver.tracker().metrics(&id("slowpoke")).unwrap().strikes, 1);
        assert_eq!(sink.count("strike_issued"), 1);
    }
}
