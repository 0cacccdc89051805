//! Composite performance score
//!
//! ```text
//! reliability = availability*0.3 + completion*0.5 + (1 - error_rate)*0.2
//! score = (reliability*40 + collaboration*20 + innovation*20
//!          + blocker_penalty*10 + sass_penalty*10)
//!         * commendation_bonus * strike_penalty
//! ```
//!
//! clamped to `[0, 100]`.

use super::*;
use chrono::{DateTime, Utc};
use foreman_core::AgentId;
use std::fmt;

/// Score components for one agent at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// `1 - downtime / uptime`
    pub availability: f64,
    /// Availability, completion and error rate combined
    pub reliability: f64,
    /// `1 - 0.1` per blocker, floored at 0
    pub blocker_penalty: f64,
    /// `1 - 0.05` per sass received, floored at 0
    pub sass_penalty: f64,
    /// `1 + 0.05` per commendation, capped at 1.2
    pub commendation_bonus: f64,
    /// `1 - 0.2` per strike, floored at 0.3
    pub strike_penalty: f64,
    /// Final score in `[0, 100]`
    pub overall: f64,
}

impl ScoreBreakdown {
    /// Score `metrics` as of `now`
    pub fn compute(metrics: &AgentMetrics, now: DateTime<Utc>, uptime_floor_secs: f64) -> Self {
        let availability = metrics.availability(now, uptime_floor_secs);
        let reliability = availability * 0.3
            + metrics.completion_rate() * 0.5
            + (1.0 - metrics.error_rate()) * 0.2;

        let blocker_penalty = (1.0 - metrics.blocker_count as f64 * 0.1).max(0.0);
        let sass_penalty = (1.0 - metrics.sass_count as f64 * 0.05).max(0.0);
        let commendation_bonus = (1.0 + f64::from(metrics.commendations) * 0.05).min(1.2);
        let strike_penalty = (1.0 - f64::from(metrics.strikes) * 0.2).max(0.3);

        let raw = (reliability * 40.0
            + metrics.collaboration_score * 20.0
            + metrics.innovation_score * 20.0
            + blocker_penalty * 10.0
            + sass_penalty * 10.0)
            * commendation_bonus
            * strike_penalty;

        Self {
            availability,
            reliability,
            blocker_penalty,
            sass_penalty,
            commendation_bonus,
            strike_penalty,
            overall: clamp_score(raw),
        }
    }
}

fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

/// Performance band derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    /// Below 20
    ReplaceImmediately,
    /// 20 to 40
    Disaster,
    /// 40 to 60
    Struggling,
    /// 60 to 75
    Adequate,
    /// 75 to 90
    Solid,
    /// 90 and up
    Rockstar,
}

impl PerformanceLevel {
    /// Band containing `score`
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Rockstar
        } else if score >= 75.0 {
            Self::Solid
        } else if score >= 60.0 {
            Self::Adequate
        } else if score >= 40.0 {
            Self::Struggling
        } else if score >= 20.0 {
            Self::Disaster
        } else {
            Self::ReplaceImmediately
        }
    }

    /// Disaster or replace-immediately
    pub fn needs_intervention(&self) -> bool {
        *self <= Self::Disaster
    }

    /// snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rockstar => "rockstar",
            Self::Solid => "solid",
            Self::Adequate => "adequate",
            Self::Struggling => "struggling",
            Self::Disaster => "disaster",
            Self::ReplaceImmediately => "replace_immediately",
        }
    }

    /// Suggested supervisor action for the band
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Rockstar => "Outstanding. Put them up for promotion and keep them away from meetings.",
            Self::Solid => "Dependable. A little polish and this is rockstar material.",
            Self::Adequate => "Meets expectations, and not one inch beyond them.",
            Self::Struggling => "Needs coaching and support, starting today.",
            Self::Disaster => "Start a performance improvement plan now.",
            Self::ReplaceImmediately => "Replace or reassign without delay.",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An agent's position in a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    /// Ranked agent
    pub agent_id: AgentId,
    /// Overall score at ranking time
    pub score: f64,
}

/// Sort by score descending, ties by agent id ascending.
pub fn sort_rankings(rankings: &mut [Ranking]) {
    rankings.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
}

/// The top entry of sorted `rankings`, if it reaches `threshold`.
pub fn select_mvp(rankings: &[Ranking], threshold: f64) -> Option<&Ranking> {
    rankings.first().filter(|top| top.score >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn worked_example() -> (AgentMetrics, DateTime<Utc>) {
        let start = Utc::now();
        let mut m = AgentMetrics::new(AgentId::from("a1"), start);
        m.total_tasks = 10;
        m.completed_tasks = 8;
        m.failed_tasks = 2;
        m.error_count = 1;
        m.blocker_count = 2;
        m.sass_count = 1;
        m.commendations = 1;
        m.collaboration_score = 0.6;
        m.innovation_score = 0.6;
        (m, start + Duration::seconds(100))
    }

    #[test]
    fn test_worked_example() {
        let (m, now) = worked_example();
        let score = ScoreBreakdown::compute(&m, now, 1.0);
        assert!((score.reliability - 0.88).abs() < 1e-9);
        assert!((score.overall - 80.535).abs() < 1e-9);
        assert_eq!(PerformanceLevel::from_score(score.overall), PerformanceLevel::Solid);
    }

    #[test]
    fn test_strike_penalty_floor() {
        let (mut m, now) = worked_example();
        m.strikes = 10;
        let score = ScoreBreakdown::compute(&m, now, 1.0);
        assert_eq!(score.strike_penalty, 0.3);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(PerformanceLevel::from_score(90.0), PerformanceLevel::Rockstar);
        assert_eq!(PerformanceLevel::from_score(89.99), PerformanceLevel::Solid);
        assert_eq!(PerformanceLevel::from_score(60.0), PerformanceLevel::Adequate);
        assert_eq!(PerformanceLevel::from_score(40.0), PerformanceLevel::Struggling);
        assert_eq!(PerformanceLevel::from_score(20.0), PerformanceLevel::Disaster);
        assert_eq!(PerformanceLevel::from_score(19.9), PerformanceLevel::ReplaceImmediately);
        assert!(PerformanceLevel::Disaster.needs_intervention());
        assert!(!PerformanceLevel::Struggling.needs_intervention());
    }

    #[test]
    fn test_mvp_threshold_boundary() {
        let mut rankings = vec![
            Ranking { agent_id: AgentId::from("b"), score: 74.9 },
            Ranking { agent_id: AgentId::from("a"), score: 60.0 },
        ];
        sort_rankings(&mut rankings);
        assert!(select_mvp(&rankings, 75.0).is_none());

        rankings[0].score = 75.0;
        assert_eq!(select_mvp(&rankings, 75.0).unwrap().agent_id, AgentId::from("b"));
        assert!(select_mvp(&[], 75.0).is_none());
    }

    #[test]
    fn test_ranking_ties_break_on_id() {
        let mut rankings = vec![
            Ranking { agent_id: AgentId::from("zed"), score: 50.0 },
            Ranking { agent_id: AgentId::from("amy"), score: 50.0 },
            Ranking { agent_id: AgentId::from("bob"), score: 70.0 },
        ];
        sort_rankings(&mut rankings);
        let order: Vec<&str> = rankings.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(order, vec!["bob", "amy", "zed"]);
    }

    proptest! {
        #[test]
        fn prop_score_is_clamped(
            total in 0u64..1_000,
            completed in 0u64..2_000,
            errors in 0u64..2_000,
            blockers in 0u64..100,
            sass in 0u64..100,
            strikes in 0u32..50,
            commendations in 0u32..50,
            collaboration in 0.0f64..=1.0,
            innovation in 0.0f64..=1.0,
            downtime in 0.0f64..10_000.0,
            uptime in 0i64..10_000,
        ) {
            let start = Utc::now();
            let mut m = AgentMetrics::new(AgentId::from("p"), start);
            m.total_tasks = total;
            m.completed_tasks = completed;
            m.error_count = errors;
            m.blocker_count = blockers;
            m.sass_count = sass;
            m.strikes = strikes;
            m.commendations = commendations;
            m.collaboration_score = collaboration;
            m.innovation_score = innovation;
            m.downtime_total = downtime;

            let score = ScoreBreakdown::compute(&m, start + Duration::seconds(uptime), 1.0);
            prop_assert!((0.0..=100.0).contains(&score.overall));
            prop_assert!((0.0..=1.0).contains(&score.availability));
        }
    }
}
