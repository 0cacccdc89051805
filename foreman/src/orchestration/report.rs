//! Reports handed back to the supervisor

#![allow(missing_docs)]

use super::*;
use crate::blockers::{BlockerMetrics, ChronicBlocker};
use crate::coordination::MessageStats;
use crate::performance::{MvpRecord, PerformanceLevel, Ranking};
use chrono::{DateTime, Utc};
use foreman_core::AgentId;

/// Score line for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: AgentId,
    pub overall_score: f64,
    pub performance_level: PerformanceLevel,
}

impl From<Ranking> for AgentSummary {
    fn from(ranking: Ranking) -> Self {
        Self {
            performance_level: PerformanceLevel::from_score(ranking.score),
            overall_score: ranking.score,
            agent_id: ranking.agent_id,
        }
    }
}

/// Periodic summary for the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    /// Best first
    pub agents: Vec<AgentSummary>,
    pub mvp: Option<AgentId>,
    pub problem_agents: Vec<AgentId>,
    pub chronic_blockers: Vec<ChronicBlocker>,
    pub blockers: BlockerMetrics,
    pub messages: MessageStats,
}

/// Outcome of a weekly review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReview {
    pub rankings: Vec<Ranking>,
    pub mvp: Option<MvpRecord>,
}
