//! Integration tests for blocker reporting, escalation and resolution

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{agent, harness, harness_with};
use foreman::blockers::{ActionTarget, BlockerStatus, BlockerType, ResolutionStrategy};
use foreman::coordination::Priority;
use foreman_core::{BlockerConfig, BlockerId, PerformanceConfig};

#[test]
fn test_full_ladder_until_replacement() {
    let h = harness();
    h.tracker.register_agent(&agent("helper"));

    let blocker = h
        .resolver
        .report_blocker(
            "approval needed for deploy",
            &agent("builder"),
            &[agent("gatekeeper")],
            Priority::High,
        )
        .unwrap();
    assert_eq!(blocker.blocker_type, BlockerType::Process);
    assert_eq!(blocker.suggested_strategy, ResolutionStrategy::Threaten);

    let steps: Vec<(ResolutionStrategy, u8)> = (0..5)
        .map(|_| {
            let action = h.resolver.attempt_resolution(&blocker.id).unwrap();
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
            (ResolutionStrategy::Replace, 11),
        ]
    );
    assert_eq!(h.resolver.get(&blocker.id).unwrap().attempt_count, 5);
    assert_eq!(h.sink.count("resolution_attempted"), 5);
}

#[test]
fn test_delegation_prefers_best_tracked_agent() {
    let h = harness();
    for name in ["strong", "weak"] {
        h.tracker.register_agent(&agent(name));
    }
    h.tracker.issue_commendation(&agent("strong"), "shipped it");
    h.tracker.issue_strike(&agent("weak"), "broke it");

    let blocker = h
        .resolver
        .report_blocker("blocked by flaky tests", &agent("reporter"), &[agent("weak")], Priority::Medium)
        .unwrap();
    let action = h.resolver.attempt_resolution(&blocker.id).unwrap();
    assert_eq!(action.target, ActionTarget::Agent(agent("strong")));
}

#[test]
fn test_resolved_blocker_leaves_the_ladder() {
    let h = harness();
    let blocker = h
        .resolver
        .report_blocker("service unreachable", &agent("a"), &[agent("b")], Priority::Medium)
        .unwrap();

    let resolved = h.resolver.resolve_blocker(&blocker.id, None).unwrap();
    assert_eq!(resolved.resolution_notes, "Resolved through sheer force of will");
    assert_eq!(resolved.blocker_type, BlockerType::Communication);

    let err = h.resolver.attempt_resolution(&blocker.id).unwrap_err();
    assert!(err.is_not_found());
    assert!(h.resolver.resolve_blocker(&blocker.id, None).unwrap_err().is_not_found());

    let history = h.resolver.resolved_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, BlockerStatus::Resolved);
    assert!(h.resolver.active_blockers().is_empty());
}

#[test]
fn test_unknown_id_is_not_found() {
    let h = harness();
    let ghost = BlockerId::from_parts(0, 999);
    assert!(h.resolver.attempt_resolution(&ghost).unwrap_err().is_not_found());
    assert!(h.resolver.record_outcome(&ghost, true).unwrap_err().is_not_found());
}

#[test]
fn test_three_blockers_make_one_strike() {
    let h = harness();
    for i in 0..3 {
        h.resolver
            .report_blocker(
                &format!("waiting for laggard to complete step {}", i),
                &agent("reporter"),
                &[agent("laggard")],
                Priority::Medium,
            )
            .unwrap();
    }

    let metrics = h.tracker.metrics(&agent("laggard")).unwrap();
    assert_eq!(metrics.blocker_count, 3);
    assert_eq!(metrics.strikes, 1);
    assert_eq!(h.sink.count("strike_issued"), 1);
}

#[test]
fn test_strike_cadence_follows_config() {
    let performance = PerformanceConfig {
        blockers_per_strike: 2,
        ..PerformanceConfig::default()
    };
    let h = harness_with(BlockerConfig::default(), performance);
    for _ in 0..4 {
        h.resolver
            .report_blocker("blocked by review", &agent("r"), &[agent("slow")], Priority::Low)
            .unwrap();
    }
    assert_eq!(h.tracker.metrics(&agent("slow")).unwrap().strikes, 2);
}

#[test]
fn test_chronic_blockers_respect_window() {
    let config = BlockerConfig {
        chronic_threshold: 2,
        chronic_window_secs: 3600,
        ..BlockerConfig::default()
    };
    let h = harness_with(config, PerformanceConfig::default());
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

    let report = |who: &str, at| {
        h.resolver
            .report_blocker_at("depends on upstream", &agent("r"), &[agent(who)], Priority::Low, at)
            .unwrap();
    };
    report("old", start);
    report("old", start + Duration::minutes(10));
    report("fresh", start + Duration::minutes(50));
    report("fresh", start + Duration::minutes(55));
    report("fresh", start + Duration::minutes(58));

    let now = start + Duration::minutes(60);
    let chronic = h.resolver.chronic_blockers_at(now);
    assert_eq!(chronic.len(), 2);
    assert_eq!(chronic[0].agent_id, agent("fresh"));
    assert_eq!(chronic[0].count, 3);
    assert_eq!(chronic[1].agent_id, agent("old"));

    let later = start + Duration::minutes(65);
    let chronic = h.resolver.chronic_blockers_at(later);
    assert_eq!(chronic.len(), 1);
    assert_eq!(chronic[0].agent_id, agent("fresh"));
}

#[test]
fn test_unbounded_chronic_window_still_counts() {
    for window in [100_000_000_000_000_000, u64::MAX] {
        let config = BlockerConfig {
            chronic_window_secs: window,
            ..BlockerConfig::default()
        };
        let h = harness_with(config, PerformanceConfig::default());
        for _ in 0..3 {
            h.resolver
                .report_blocker("waiting for b", &agent("a"), &[agent("b")], Priority::Low)
                .unwrap();
        }

        let chronic = h.resolver.chronic_blockers();
        assert_eq!(chronic.len(), 1, "window {}", window);
        assert_eq!(chronic[0].agent_id, agent("b"));
        assert_eq!(chronic[0].count, 3);
    }
}

#[test]
fn test_metrics_average_resolution_time_by_type() {
    let h = harness();
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

    let mut ids = Vec::new();
    for minutes in [10, 30] {
        let blocker = h
            .resolver
            .report_blocker_at("out of disk space", &agent("r"), &[agent("ops")], Priority::High, start)
            .unwrap();
        ids.push((blocker.id, minutes));
    }
    h.resolver
        .report_blocker("why are we doing this", &agent("r"), &[], Priority::Low)
        .unwrap();

    for (id, minutes) in &ids {
        h.resolver
            .resolve_blocker_at(id, Some("cleaned up"), start + Duration::minutes(*minutes))
            .unwrap();
    }

    let metrics = h.resolver.metrics();
    assert_eq!(metrics.active, 1);
    assert_eq!(metrics.resolved, 2);
    assert_eq!(metrics.active_by_type.get(&BlockerType::Other), Some(&1));
    let average = metrics.average_resolution_secs[&BlockerType::Resource];
    assert!((average - 1200.0).abs() < 1e-9);
    assert!((metrics.resolution_success_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_outcomes_feed_pattern_success_rate() {
    let h = harness();
    let blocker = h
        .resolver
        .report_blocker("builder is not responding", &agent("a"), &[agent("builder")], Priority::Medium)
        .unwrap();
    assert_eq!(blocker.pattern_id.as_deref(), Some("comm_failure"));

    let success = h.resolver.record_outcome(&blocker.id, true).unwrap().unwrap();
    let failure = h.resolver.record_outcome(&blocker.id, false).unwrap().unwrap();
    assert!((success - 0.1).abs() < 1e-9);
    assert!((failure - 0.09).abs() < 1e-9);
    let stored = h
        .resolver
        .patterns()
        .into_iter()
        .find(|p| p.id() == "comm_failure")
        .unwrap()
        .success_rate();
    assert!((stored - failure).abs() < 1e-12);

    let unmatched = h
        .resolver
        .report_blocker("the coffee machine is sad", &agent("a"), &[], Priority::Low)
        .unwrap();
    assert_eq!(unmatched.blocker_type, BlockerType::Technical);
    assert!(unmatched.pattern_id.is_none());
    assert_eq!(h.resolver.record_outcome(&unmatched.id, true).unwrap(), None);
}

#[test]
fn test_invalid_reports_are_rejected() {
    let h = harness();
    assert!(h
        .resolver
        .report_blocker("   ", &agent("a"), &[agent("b")], Priority::Low)
        .is_err());
    assert!(h
        .resolver
        .report_blocker("blocked by nobody", &agent("a"), &[agent("broadcast")], Priority::Low)
        .is_err());
    assert!(h.resolver.active_blockers().is_empty());
    assert!(h.tracker.is_empty());
}
