//! Per-agent performance record

#![allow(missing_docs)]

use super::*;
use chrono::{DateTime, Utc};
use foreman_core::AgentId;
use std::collections::VecDeque;

/// Outcome of an assigned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Assigned,
    Completed,
    Failed,
}

/// One entry of an agent's task history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub assigned_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub duration_secs: Option<f64>,
}

/// Cumulative metrics for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent_id: AgentId,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub error_count: u64,
    pub blocker_count: u64,
    pub sass_count: u64,
    pub strikes: u32,
    pub commendations: u32,
    /// Recent task durations in seconds, oldest first
    pub response_times: VecDeque<f64>,
    pub collaboration_score: f64,
    pub innovation_score: f64,
    /// Composite score recorded at each weekly ranking, oldest first
    pub weekly_scores: VecDeque<f64>,
    pub uptime_start: DateTime<Utc>,
    /// Accumulated downtime in seconds
    pub downtime_total: f64,
    pub last_activity: DateTime<Utc>,
    pub task_history: VecDeque<TaskRecord>,
}

impl AgentMetrics {
    pub fn new(agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            error_count: 0,
            blocker_count: 0,
            sass_count: 0,
            strikes: 0,
            commendations: 0,
            response_times: VecDeque::new(),
            collaboration_score: 0.5,
            innovation_score: 0.5,
            weekly_scores: VecDeque::new(),
            uptime_start: now,
            downtime_total: 0.0,
            last_activity: now,
            task_history: VecDeque::new(),
        }
    }

    /// Completed over assigned tasks, in `[0, 1]`
    pub fn completion_rate(&self) -> f64 {
        ratio(self.completed_tasks, self.total_tasks)
    }

    /// Errors over assigned tasks, in `[0, 1]`
    pub fn error_rate(&self) -> f64 {
        ratio(self.error_count, self.total_tasks)
    }

    pub fn average_response_time(&self) -> Option<f64> {
        if self.response_times.is_empty() {
            return None;
        }
        Some(self.response_times.iter().sum::<f64>() / self.response_times.len() as f64)
    }

    /// Seconds since tracking started, never below `floor_secs`
    pub fn uptime_secs(&self, now: DateTime<Utc>, floor_secs: f64) -> f64 {
        let elapsed = (now - self.uptime_start).num_milliseconds() as f64 / 1000.0;
        elapsed.max(floor_secs)
    }

    /// `1 - downtime / uptime`, clamped to `[0, 1]`
    pub fn availability(&self, now: DateTime<Utc>, floor_secs: f64) -> f64 {
        let uptime = self.uptime_secs(now, floor_secs);
        if uptime <= 0.0 {
            return 0.0;
        }
        (1.0 - self.downtime_total / uptime).clamp(0.0, 1.0)
    }

    pub(crate) fn push_response_time(&mut self, secs: f64, window: usize) {
        push_bounded(&mut self.response_times, secs, window);
    }

    pub(crate) fn push_weekly_score(&mut self, score: f64, window: usize) {
        push_bounded(&mut self.weekly_scores, score, window);
    }

    pub(crate) fn push_task(&mut self, record: TaskRecord, limit: usize) {
        push_bounded(&mut self.task_history, record, limit);
    }

    /// Mark the most recent assignment of `task_id` as finished.
    pub(crate) fn finish_task(&mut self, task_id: &str, success: bool, duration_secs: f64) -> bool {
        let Some(task) = self
            .task_history
            .iter_mut()
            .rev()
            .find(|t| t.task_id == task_id && t.status == TaskStatus::Assigned)
        else {
            return false;
        };
        task.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.duration_secs = Some(duration_secs);
        true
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    (numerator as f64 / denominator as f64).min(1.0)
}

fn push_bounded<T>(deque: &mut VecDeque<T>, value: T, limit: usize) {
    if limit == 0 {
        return;
    }
    while deque.len() >= limit {
        deque.pop_front();
    }
    deque.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn metrics() -> AgentMetrics {
        AgentMetrics::new(AgentId::from("a1"), Utc::now())
    }

    #[test]
    fn test_rates_with_no_tasks() {
        let m = metrics();
        assert_eq!(m.completion_rate(), 0.0);
        assert_eq!(m.error_rate(), 0.0);
        assert!(m.average_response_time().is_none());
    }

    #[test]
    fn test_rates_are_capped() {
        let mut m = metrics();
        m.total_tasks = 2;
        m.completed_tasks = 5;
        m.error_count = 7;
        assert_eq!(m.completion_rate(), 1.0);
        assert_eq!(m.error_rate(), 1.0);
    }

    #[test]
    fn test_availability_uses_floor() {
        let mut m = metrics();
        let start = m.uptime_start;
        assert_eq!(m.uptime_secs(start, 1.0), 1.0);
        assert_eq!(m.availability(start, 1.0), 1.0);

        m.downtime_total = 25.0;
        assert!((m.availability(start + Duration::seconds(100), 1.0) - 0.75).abs() < 1e-9);

        m.downtime_total = 500.0;
        assert_eq!(m.availability(start + Duration::seconds(100), 1.0), 0.0);
    }

    #[test]
    fn test_windows_are_bounded() {
        let mut m = metrics();
        for i in 0..5 {
            m.push_response_time(i as f64, 3);
        }
        assert_eq!(m.response_times, VecDeque::from(vec![2.0, 3.0, 4.0]));
        assert_eq!(m.average_response_time(), Some(3.0));
    }

    #[test]
    fn test_finish_task_updates_latest_assignment() {
        let mut m = metrics();
        let record = |id: &str| TaskRecord {
            task_id: id.to_string(),
            assigned_at: Utc::now(),
            status: TaskStatus::Assigned,
            duration_secs: None,
        };
        m.push_task(record("t1"), 10);
        m.push_task(record("t2"), 10);

        assert!(m.finish_task("t1", false, 4.5));
        assert!(!m.finish_task("t1", true, 1.0));
        assert!(!m.finish_task("missing", true, 1.0));
        assert_eq!(m.task_history[0].status, TaskStatus::Failed);
        assert_eq!(m.task_history[0].duration_secs, Some(4.5));
        assert_eq!(m.task_history[1].status, TaskStatus::Assigned);
    }
}
