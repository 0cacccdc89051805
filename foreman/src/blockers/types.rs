//! Blocker records and resolution actions

#![allow(missing_docs)]

use super::*;
use crate::coordination::Priority;
use chrono::{DateTime, Utc};
use foreman_core::{AgentId, BlockerId};
use std::collections::BTreeMap;
use std::fmt;

/// Category of a blocker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    Dependency,
    Resource,
    Communication,
    Technical,
    Process,
    Human,
    Other,
}

impl BlockerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dependency => "dependency",
            Self::Resource => "resource",
            Self::Communication => "communication",
            Self::Technical => "technical",
            Self::Process => "process",
            Self::Human => "human",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for BlockerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerStatus {
    Active,
    Resolved,
}

/// How to push a blocker toward resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Delegate,
    Escalate,
    Sass,
    Automate,
    Ignore,
    Threaten,
    Replace,
}

impl ResolutionStrategy {
    /// Escalation ladder step for the given attempt number (1-based),
    /// with its severity.
    pub fn for_attempt(attempt: u32) -> (Self, u8) {
        match attempt {
            0 | 1 => (Self::Delegate, 5),
            2 => (Self::Sass, 7),
            3 => (Self::Threaten, 9),
            _ => (Self::Replace, 11),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delegate => "delegate",
            Self::Escalate => "escalate",
            Self::Sass => "sass",
            Self::Automate => "automate",
            Self::Ignore => "ignore",
            Self::Threaten => "threaten",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reported obstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: BlockerId,
    pub description: String,
    pub blocker_type: BlockerType,
    pub reported_by: AgentId,
    pub blocking_agents: Vec<AgentId>,
    pub priority: Priority,
    pub status: BlockerStatus,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    /// Pattern that classified the description, if any
    pub pattern_id: Option<String>,
    pub suggested_strategy: ResolutionStrategy,
    pub suggested_severity: u8,
}

impl Blocker {
    pub fn is_active(&self) -> bool {
        self.status == BlockerStatus::Active
    }

    /// Seconds between creation and resolution
    pub fn resolution_secs(&self) -> Option<f64> {
        self.resolved_at
            .map(|resolved| (resolved - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Who a resolution action is aimed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum ActionTarget {
    Agent(AgentId),
    Agents(Vec<AgentId>),
    Human,
}

impl ActionTarget {
    pub fn agents(&self) -> Vec<AgentId> {
        match self {
            Self::Agent(id) => vec![id.clone()],
            Self::Agents(ids) => ids.clone(),
            Self::Human => Vec::new(),
        }
    }
}

/// Step chosen by [`BlockerResolver::attempt_resolution`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub blocker_id: BlockerId,
    pub attempt: u32,
    pub strategy: ResolutionStrategy,
    pub target: ActionTarget,
    pub severity: u8,
    pub message: String,
}

/// Result of resolving a blocker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBlocker {
    pub blocker_id: BlockerId,
    pub blocker_type: BlockerType,
    pub resolution_secs: f64,
    pub resolution_notes: String,
}

/// Agent that keeps showing up in blocker reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronicBlocker {
    pub agent_id: AgentId,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockerMetrics {
    pub active: usize,
    pub resolved: usize,
    pub active_by_type: BTreeMap<BlockerType, usize>,
    pub average_resolution_secs: BTreeMap<BlockerType, f64>,
    pub chronic_blockers: Vec<ChronicBlocker>,
    /// `resolved / (active + resolved)`
    pub resolution_success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder() {
        let steps: Vec<_> = (1..=5).map(ResolutionStrategy::for_attempt).collect();
        assert_eq!(
            steps,
            vec![
                (ResolutionStrategy::Delegate, 5),
                (ResolutionStrategy::Sass, 7),
                (ResolutionStrategy::Threaten, 9),
                (ResolutionStrategy::Replace, 11),
                (ResolutionStrategy::Replace, 11),
            ]
        );
    }

    #[test]
    fn test_action_target_agents() {
        assert!(ActionTarget::Human.agents().is_empty());
        let target = ActionTarget::Agents(vec![AgentId::from("a"), AgentId::from("b")]);
        assert_eq!(target.agents().len(), 2);

        let json = serde_json::to_value(ActionTarget::Agent(AgentId::from("a"))).unwrap();
        assert_eq!(json["kind"], "agent");
        assert_eq!(json["ids"], "a");
    }
}
