//! Performance Tracker
//!
//! Owns one [`AgentMetrics`] record per agent. Records live behind their own
//! mutex inside a concurrent map, so writes to one agent are serialized while
//! rankings and reports read other agents freely. No record lock is ever held
//! while another record or the map is locked.

use super::*;
use crate::monitoring::{default_sink, TelemetryEvent, TelemetrySink};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use foreman_core::{AgentId, PerformanceConfig};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Record = Arc<Mutex<AgentMetrics>>;

/// Per-agent metrics, composite scores and disciplinary records.
///
/// Agents are tracked from the first event that mentions them.
pub struct PerformanceTracker {
    config: PerformanceConfig,
    agents: DashMap<AgentId, Record>,
    events: Mutex<VecDeque<PerformanceEvent>>,
    mvp_history: Mutex<Vec<MvpRecord>>,
    shame_list: Mutex<Vec<ShameEntry>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl PerformanceTracker {
    /// Tracker with the `tracing` telemetry sink
    pub fn new(config: PerformanceConfig) -> Self {
        Self::with_telemetry(config, default_sink())
    }

    /// Tracker that reports to `telemetry`
    pub fn with_telemetry(config: PerformanceConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        info!("PerformanceTracker initialized (MVP threshold {:.1})", config.mvp_threshold);
        Self {
            config,
            agents: DashMap::new(),
            events: Mutex::new(VecDeque::new()),
            mvp_history: Mutex::new(Vec::new()),
            shame_list: Mutex::new(Vec::new()),
            telemetry,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    // --------------------------------------------------------------------------
    // Registry
    // --------------------------------------------------------------------------

    /// Start tracking `agent`. Returns `false` if it was already tracked.
    pub fn register_agent(&self, agent: &AgentId) -> bool {
        let mut created = false;
        self.agents.entry(agent.clone()).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(AgentMetrics::new(agent.clone(), Utc::now())))
        });
        if created {
            info!("Agent {} registered for performance tracking", agent);
        }
        created
    }

    /// Drop every record of `agent`, including its shame list entry.
    pub fn forget_agent(&self, agent: &AgentId) -> bool {
        let removed = self.agents.remove(agent).is_some();
        if removed {
            self.shame_list.lock().retain(|entry| &entry.agent_id != agent);
            info!("Forgot agent {}", agent);
        }
        removed
    }

    /// Whether `agent` has metrics
    pub fn is_tracked(&self, agent: &AgentId) -> bool {
        self.agents.contains_key(agent)
    }

    /// Tracked agents, sorted
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of tracked agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is tracked
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Copy of an agent's current metrics
    pub fn metrics(&self, agent: &AgentId) -> Option<AgentMetrics> {
        self.get(agent).map(|record| record.lock().clone())
    }

    fn get(&self, agent: &AgentId) -> Option<Record> {
        self.agents.get(agent).map(|r| Arc::clone(r.value()))
    }

    fn record(&self, agent: &AgentId) -> Record {
        if let Some(record) = self.get(agent) {
            return record;
        }
        self.register_agent(agent);
        self.agents
            .entry(agent.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AgentMetrics::new(agent.clone(), Utc::now()))))
            .clone()
    }

    fn records(&self) -> Vec<Record> {
        self.agents.iter().map(|e| Arc::clone(e.value())).collect()
    }

    // --------------------------------------------------------------------------
    // Event recorders
    // --------------------------------------------------------------------------

    /// Count a task handed to `agent`
    pub fn record_task_assignment(&self, agent: &AgentId, task_id: &str) {
        let record = self.record(agent);
        let mut m = record.lock();
        m.total_tasks += 1;
        m.last_activity = Utc::now();
        m.push_task(
            TaskRecord {
                task_id: task_id.to_string(),
                assigned_at: Utc::now(),
                status: TaskStatus::Assigned,
                duration_secs: None,
            },
            self.config.task_history_size,
        );
        info!("Task {} assigned to {}", task_id, agent);
    }

    /// Record a finished task and its duration
    pub fn record_task_completion(&self, agent: &AgentId, task_id: &str, success: bool, duration_secs: f64) {
        let record = self.record(agent);
        let mut m = record.lock();
        if success {
            m.completed_tasks += 1;
        } else {
            m.failed_tasks += 1;
        }
        m.push_response_time(duration_secs.max(0.0), self.config.response_window);
        m.last_activity = Utc::now();
        if !m.finish_task(task_id, success, duration_secs) {
            debug!("Task {} finished by {} without a recorded assignment", task_id, agent);
        }
        info!(
            "Task {} {} by {} in {:.2}s",
            task_id,
            if success { "completed" } else { "failed" },
            agent,
            duration_secs
        );
    }

    /// Count an error reported by or about `agent`
    pub fn record_error(&self, agent: &AgentId, error_type: &str) {
        {
            let record = self.record(agent);
            record.lock().error_count += 1;
        }
        self.log_event(agent, PerformanceEventKind::Error, error_type);
        warn!("Error recorded for {}: {}", agent, error_type);
    }

    /// Count a blocker against `agent`. Every `blockers_per_strike`-th blocker
    /// issues a strike; returns whether one was issued.
    pub fn record_blocker(&self, agent: &AgentId) -> bool {
        let count = {
            let record = self.record(agent);
            let mut m = record.lock();
            m.blocker_count += 1;
            m.blocker_count
        };
        let per_strike = u64::from(self.config.blockers_per_strike.max(1));
        debug!("Blocker {} recorded against {}", count, agent);

        if count % per_strike == 0 {
            self.issue_strike(agent, &format!("{} blockers and counting", count));
            return true;
        }
        false
    }

    /// Count sass delivered to `agent`. Sass at or above the strike level also
    /// issues a strike; returns whether one was issued.
    pub fn record_sass_received(&self, agent: &AgentId, level: u8) -> bool {
        {
            let record = self.record(agent);
            record.lock().sass_count += 1;
        }
        if level >= self.config.strike_sass_level {
            self.issue_strike(agent, &format!("Earned level {} sass", level));
            return true;
        }
        false
    }

    /// Issue a strike and return the agent's strike total.
    pub fn issue_strike(&self, agent: &AgentId, reason: &str) -> u32 {
        let strikes = {
            let record = self.record(agent);
            let mut m = record.lock();
            m.strikes += 1;
            m.strikes
        };
        self.log_event(agent, PerformanceEventKind::Strike, reason);
        self.telemetry.emit(TelemetryEvent::StrikeIssued {
            agent_id: agent.clone(),
            reason: reason.to_string(),
            strikes,
        });

        if strikes >= self.config.strikes_for_shame {
            self.add_to_shame_list(agent, &format!("{} strikes", strikes));
        }
        strikes
    }

    /// Issue a commendation and return the agent's commendation total.
    pub fn issue_commendation(&self, agent: &AgentId, reason: &str) -> u32 {
        let commendations = {
            let record = self.record(agent);
            let mut m = record.lock();
            m.commendations += 1;
            m.commendations
        };
        self.log_event(agent, PerformanceEventKind::Commendation, reason);
        self.telemetry.emit(TelemetryEvent::CommendationIssued {
            agent_id: agent.clone(),
            reason: reason.to_string(),
            commendations,
        });
        commendations
    }

    /// Shift the collaboration score by `delta`, clamped to `[0, 1]`
    pub fn update_collaboration_score(&self, agent: &AgentId, delta: f64) -> f64 {
        let record = self.record(agent);
        let mut m = record.lock();
        m.collaboration_score = (m.collaboration_score + delta).clamp(0.0, 1.0);
        m.collaboration_score
    }

    /// Shift the innovation score by `delta`, clamped to `[0, 1]`
    pub fn update_innovation_score(&self, agent: &AgentId, delta: f64) -> f64 {
        let record = self.record(agent);
        let mut m = record.lock();
        m.innovation_score = (m.innovation_score + delta).clamp(0.0, 1.0);
        m.innovation_score
    }

    /// Add `secs` of downtime; negative values count as zero
    pub fn record_downtime(&self, agent: &AgentId, secs: f64) {
        let record = self.record(agent);
        record.lock().downtime_total += secs.max(0.0);
        debug!("{:.1}s downtime recorded for {}", secs, agent);
    }

    fn log_event(&self, agent: &AgentId, kind: PerformanceEventKind, details: &str) {
        let mut events = self.events.lock();
        events.push_back(PerformanceEvent {
            timestamp: Utc::now(),
            agent_id: agent.clone(),
            kind,
            details: details.to_string(),
        });
        while events.len() > self.config.event_log_size {
            events.pop_front();
        }
    }

    fn add_to_shame_list(&self, agent: &AgentId, reason: &str) {
        let score = self.score(agent).unwrap_or(0.0);
        {
            let mut shame_list = self.shame_list.lock();
            if shame_list.iter().any(|entry| &entry.agent_id == agent) {
                return;
            }
            shame_list.push(ShameEntry {
                agent_id: agent.clone(),
                reason: reason.to_string(),
                score,
                enrolled_at: Utc::now(),
            });
        }
        self.telemetry.emit(TelemetryEvent::ShameListed {
            agent_id: agent.clone(),
            reason: reason.to_string(),
        });
    }

    // --------------------------------------------------------------------------
    // Scoring
    // --------------------------------------------------------------------------

    /// Overall score now, `None` for untracked agents
    pub fn score(&self, agent: &AgentId) -> Option<f64> {
        self.score_at(agent, Utc::now())
    }

    /// Overall score as of `now`
    pub fn score_at(&self, agent: &AgentId, now: DateTime<Utc>) -> Option<f64> {
        self.breakdown_at(agent, now).map(|b| b.overall)
    }

    /// Every score component as of `now`
    pub fn breakdown_at(&self, agent: &AgentId, now: DateTime<Utc>) -> Option<ScoreBreakdown> {
        let record = self.get(agent)?;
        let m = record.lock();
        Some(ScoreBreakdown::compute(&m, now, self.config.uptime_floor_secs))
    }

    /// Band of the current score
    pub fn performance_level(&self, agent: &AgentId) -> Option<PerformanceLevel> {
        self.score(agent).map(PerformanceLevel::from_score)
    }

    /// Current scores, best first, without touching weekly history.
    pub fn rankings(&self) -> Vec<Ranking> {
        self.rank(false)
    }

    /// Rank every agent and append each score to its weekly window.
    pub fn calculate_weekly_rankings(&self) -> Vec<Ranking> {
        self.rank(true)
    }

    fn rank(&self, record_weekly: bool) -> Vec<Ranking> {
        let now = Utc::now();
        let mut rankings: Vec<Ranking> = self
            .records()
            .into_iter()
            .map(|record| {
                let mut m = record.lock();
                let score = ScoreBreakdown::compute(&m, now, self.config.uptime_floor_secs).overall;
                if record_weekly {
                    m.push_weekly_score(score, self.config.weekly_window);
                }
                Ranking {
                    agent_id: m.agent_id.clone(),
                    score,
                }
            })
            .collect();
        sort_rankings(&mut rankings);
        rankings
    }

    /// Run the weekly ranking and crown the top agent if it clears the MVP
    /// threshold. The MVP receives a commendation.
    pub fn select_weekly_mvp(&self) -> Option<MvpRecord> {
        let rankings = self.calculate_weekly_rankings();
        self.crown_mvp(&rankings)
    }

    /// Crown the head of already sorted `rankings` if it clears the threshold.
    pub fn crown_mvp(&self, rankings: &[Ranking]) -> Option<MvpRecord> {
        let Some(top) = select_mvp(rankings, self.config.mvp_threshold) else {
            info!("No MVP this week, nobody reached {:.1}", self.config.mvp_threshold);
            return None;
        };

        let record = {
            let mut history = self.mvp_history.lock();
            let record = MvpRecord {
                week: history.len() as u32 + 1,
                agent_id: top.agent_id.clone(),
                score: top.score,
                selected_at: Utc::now(),
            };
            history.push(record.clone());
            record
        };

        self.telemetry.emit(TelemetryEvent::MvpSelected {
            agent_id: record.agent_id.clone(),
            score: record.score,
            week: record.week,
        });
        self.issue_commendation(&record.agent_id, "Weekly MVP");
        Some(record)
    }

    /// Agents at disaster level or worse, with two or more strikes, or with an
    /// error rate above 30%. Sorted by id.
    pub fn identify_problem_agents(&self) -> Vec<AgentId> {
        let now = Utc::now();
        let mut problems: Vec<AgentId> = self
            .records()
            .into_iter()
            .filter_map(|record| {
                let m = record.lock();
                let score = ScoreBreakdown::compute(&m, now, self.config.uptime_floor_secs).overall;
                let problem = PerformanceLevel::from_score(score).needs_intervention()
                    || m.strikes >= 2
                    || m.error_rate() > 0.3;
                problem.then(|| m.agent_id.clone())
            })
            .collect();
        problems.sort();
        problems
    }

    /// Highest-scored agent outside `exclude` that is not on the shame list.
    pub fn best_delegate(&self, exclude: &[AgentId]) -> Option<AgentId> {
        let shamed = self.shamed_agents();
        self.rankings()
            .into_iter()
            .find(|r| !exclude.contains(&r.agent_id) && !shamed.contains(&r.agent_id))
            .map(|r| r.agent_id)
    }

    // --------------------------------------------------------------------------
    // Reports and history
    // --------------------------------------------------------------------------

    /// Full report for one agent
    pub fn agent_report(&self, agent: &AgentId) -> Result<AgentReport> {
        let record = self
            .get(agent)
            .ok_or_else(|| PerformanceError::AgentNotFound(agent.clone()))?;
        let shamed = self.is_shamed(agent);
        let m = record.lock();
        let score = ScoreBreakdown::compute(&m, Utc::now(), self.config.uptime_floor_secs);
        Ok(AgentReport::build(&m, &score, shamed))
    }

    /// Fleet-wide totals and score range
    pub fn summary(&self) -> PerformanceSummary {
        let now = Utc::now();
        let mut scores = Vec::new();
        let mut level_distribution = BTreeMap::new();
        let mut total_strikes = 0u64;
        let mut total_commendations = 0u64;

        for record in self.records() {
            let m = record.lock();
            let score = ScoreBreakdown::compute(&m, now, self.config.uptime_floor_secs).overall;
            *level_distribution
                .entry(PerformanceLevel::from_score(score))
                .or_insert(0) += 1;
            total_strikes += u64::from(m.strikes);
            total_commendations += u64::from(m.commendations);
            scores.push(score);
        }

        if scores.is_empty() {
            return PerformanceSummary::default();
        }

        PerformanceSummary {
            total_agents: scores.len(),
            average_score: scores.iter().sum::<f64>() / scores.len() as f64,
            highest_score: scores.iter().copied().fold(f64::MIN, f64::max),
            lowest_score: scores.iter().copied().fold(f64::MAX, f64::min),
            level_distribution,
            current_mvp: self.current_mvp(),
            problem_agents: self.identify_problem_agents(),
            total_strikes,
            total_commendations,
        }
    }

    /// Most recent MVP
    pub fn current_mvp(&self) -> Option<AgentId> {
        self.mvp_history.lock().last().map(|r| r.agent_id.clone())
    }

    /// Every MVP, oldest first
    pub fn mvp_history(&self) -> Vec<MvpRecord> {
        self.mvp_history.lock().clone()
    }

    /// Agents that reached the strike limit, in enrolment order
    pub fn shame_list(&self) -> Vec<ShameEntry> {
        self.shame_list.lock().clone()
    }

    /// Whether `agent` is on the shame list
    pub fn is_shamed(&self, agent: &AgentId) -> bool {
        self.shame_list.lock().iter().any(|e| &e.agent_id == agent)
    }

    fn shamed_agents(&self) -> Vec<AgentId> {
        self.shame_list.lock().iter().map(|e| e.agent_id.clone()).collect()
    }

    /// Performance event log, oldest first
    pub fn events(&self) -> Vec<PerformanceEvent> {
        self.events.lock().iter().cloned().collect()
    }
}
