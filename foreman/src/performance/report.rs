//! Performance reports and history records

#![allow(missing_docs)]

use super::*;
use chrono::{DateTime, Utc};
use foreman_core::AgentId;
use std::collections::BTreeMap;

/// Kind of entry in the performance event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceEventKind {
    Error,
    Strike,
    Commendation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEvent {
    pub timestamp: DateTime<Utc>,
    pub agent_id: AgentId,
    pub kind: PerformanceEventKind,
    pub details: String,
}

/// A weekly MVP selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MvpRecord {
    pub week: u32,
    pub agent_id: AgentId,
    pub score: f64,
    pub selected_at: DateTime<Utc>,
}

/// Shame list enrollment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShameEntry {
    pub agent_id: AgentId,
    pub reason: String,
    pub score: f64,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMetrics {
    pub completion_rate: f64,
    pub error_rate: f64,
    pub average_response_time: Option<f64>,
    pub reliability: f64,
    pub availability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub errors: u64,
    pub blockers: u64,
    pub sass_received: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disciplinary {
    pub strikes: u32,
    pub commendations: u32,
    pub shamed: bool,
}

/// Detailed report for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: AgentId,
    pub overall_score: f64,
    pub performance_level: PerformanceLevel,
    pub metrics: RateMetrics,
    pub counts: CountMetrics,
    pub disciplinary: Disciplinary,
    pub collaboration_score: f64,
    pub innovation_score: f64,
    pub recommendation: String,
}

impl AgentReport {
    pub(crate) fn build(metrics: &AgentMetrics, score: &ScoreBreakdown, shamed: bool) -> Self {
        let level = PerformanceLevel::from_score(score.overall);
        Self {
            agent_id: metrics.agent_id.clone(),
            overall_score: score.overall,
            performance_level: level,
            metrics: RateMetrics {
                completion_rate: metrics.completion_rate(),
                error_rate: metrics.error_rate(),
                average_response_time: metrics.average_response_time(),
                reliability: score.reliability,
                availability: score.availability,
            },
            counts: CountMetrics {
                total_tasks: metrics.total_tasks,
                completed_tasks: metrics.completed_tasks,
                failed_tasks: metrics.failed_tasks,
                errors: metrics.error_count,
                blockers: metrics.blocker_count,
                sass_received: metrics.sass_count,
            },
            disciplinary: Disciplinary {
                strikes: metrics.strikes,
                commendations: metrics.commendations,
                shamed,
            },
            collaboration_score: metrics.collaboration_score,
            innovation_score: metrics.innovation_score,
            recommendation: level.recommendation().to_string(),
        }
    }
}

/// Fleet-wide summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_agents: usize,
    pub average_score: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub level_distribution: BTreeMap<PerformanceLevel, usize>,
    pub current_mvp: Option<AgentId>,
    pub problem_agents: Vec<AgentId>,
    pub total_strikes: u64,
    pub total_commendations: u64,
}
