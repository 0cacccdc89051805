//! End-to-end tests for the supervisor coordinator

mod common;

use common::{agent, drain, inbox};
use foreman::blockers::ResolutionStrategy;
use foreman::coordination::{MessageType, Payload, Priority, Recipient, SendOptions, SendOutcome};
use foreman::monitoring::RecordingSink;
use foreman::orchestration::{AgentEvent, Coordinator, OrchestrationError};
use foreman::performance::PerformanceLevel;
use foreman_core::ForemanConfig;
use serde_json::json;
use std::sync::Arc;

fn coordinator() -> (Coordinator, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let coordinator = Coordinator::with_telemetry(ForemanConfig::default(), sink.clone()).unwrap();
    (coordinator, sink)
}

#[tokio::test]
async fn test_raw_events_drive_the_tracker() {
    let (coordinator, _) = coordinator();
    let worker = agent("worker");

    let events = [
        ("task_assigned", json!({"task_id": "T-1"})),
        ("task_completed", json!({"task_id": "T-1", "duration": 3.0})),
        ("task_assigned", json!({"task_id": "T-2"})),
        ("task_failed", json!({"task_id": "T-2", "duration_secs": 9.0})),
        ("error", json!({"error_type": "oom"})),
        ("commendation", json!({"reason": "tidy diff"})),
        ("innovation", json!({"delta": 0.2})),
        ("downtime", json!({"secs": 0.0})),
    ];
    for (kind, data) in &events {
        coordinator.report_raw_event(&worker, kind, data).unwrap();
    }

    let m = coordinator.tracker().metrics(&worker).unwrap();
    assert_eq!((m.total_tasks, m.completed_tasks, m.failed_tasks), (2, 1, 1));
    assert_eq!(m.error_count, 1);
    assert_eq!(m.commendations, 1);
    assert!((m.innovation_score - 0.7).abs() < 1e-9);
    assert_eq!(m.average_response_time(), Some(6.0));
}

#[tokio::test]
async fn test_bad_events_change_nothing() {
    let (coordinator, _) = coordinator();
    let worker = agent("worker");

    let err = coordinator
        .report_raw_event(&worker, "vacation", &json!({"days": 30}))
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidEvent(_)));

    let err = coordinator
        .report_event(&worker, AgentEvent::SassDelivered { level: 12 })
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidEvent(_)));

    let err = coordinator
        .report_event(&agent("broadcast"), AgentEvent::Blocker)
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidEvent(_)));

    assert!(coordinator.tracker().is_empty());
}

#[tokio::test]
async fn test_escalation_messages_reach_the_blocking_agent() {
    let (coordinator, sink) = coordinator();
    let mut slow = inbox(coordinator.bus(), "slow");
    let _reporter = inbox(coordinator.bus(), "reporter");

    let blocker = coordinator
        .report_blocker("waiting for slow to complete the schema", &agent("reporter"), &[agent("slow")], Priority::High)
        .unwrap();

    let strategies: Vec<ResolutionStrategy> = (0..4)
        .map(|_| coordinator.attempt_resolution(&blocker.id).unwrap().strategy)
        .collect();
    assert_eq!(
        strategies,
        vec![
            ResolutionStrategy::Delegate,
            ResolutionStrategy::Sass,
            ResolutionStrategy::Threaten,
            ResolutionStrategy::Replace,
        ]
    );
    coordinator.flush().await;

    let received = drain(&mut slow);
    let blocker_notices = received
        .iter()
        .filter(|m| m.message_type() == MessageType::Blocker)
        .count();
    assert_eq!(blocker_notices, 1);

    let from_supervisor: Vec<(MessageType, Priority)> = received
        .iter()
        .filter(|m| m.sender() == coordinator.supervisor())
        .map(|m| (m.message_type(), m.priority()))
        .collect();
    assert_eq!(
        from_supervisor,
        vec![
            (MessageType::Sass, Priority::Low),
            (MessageType::Escalation, Priority::High),
            (MessageType::Escalation, Priority::Critical),
        ]
    );
    let replacement = received.last().unwrap();
    assert_eq!(replacement.payload_str("threat_level"), Some("replacement"));
    assert_eq!(replacement.sass().level, 11);
    assert!(replacement.sass().contains_threat);

    let m = coordinator.tracker().metrics(&agent("slow")).unwrap();
    assert_eq!(m.blocker_count, 1);
    assert_eq!(m.sass_count, 1);
    assert_eq!(sink.count("resolution_attempted"), 4);
}

#[tokio::test]
async fn test_delegation_assigns_a_task() {
    let (coordinator, _) = coordinator();
    let mut helper = inbox(coordinator.bus(), "helper");
    coordinator.tracker().register_agent(&agent("helper"));

    let blocker = coordinator
        .report_blocker("error: migration failed", &agent("api"), &[agent("db")], Priority::Medium)
        .unwrap();
    let action = coordinator.attempt_resolution(&blocker.id).unwrap();
    assert_eq!(action.strategy, ResolutionStrategy::Delegate);
    coordinator.flush().await;

    let tasks: Vec<_> = drain(&mut helper)
        .into_iter()
        .filter(|m| m.message_type() == MessageType::TaskAssignment)
        .collect();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].payload_str("task_id"), Some(blocker.id.as_str()));
    assert_eq!(coordinator.tracker().metrics(&agent("helper")).unwrap().total_tasks, 1);
}

#[tokio::test]
async fn test_sass_to_blocked_agent_is_not_recorded() {
    let (coordinator, _) = coordinator();
    let _rx = inbox(coordinator.bus(), "quiet");
    coordinator.bus().block_agent(&agent("quiet"), "do not disturb");

    let receipt = coordinator
        .deliver_sass(&agent("quiet"), 5, "knock knock", None)
        .unwrap();
    assert!(matches!(receipt.outcome, SendOutcome::Blocked { .. }));
    assert!(coordinator.tracker().metrics(&agent("quiet")).is_none());
}

#[tokio::test]
async fn test_sass_without_route_is_not_recorded() {
    let (coordinator, _) = coordinator();

    let receipt = coordinator
        .deliver_sass(&agent("ghost"), 9, "anyone home?", None)
        .unwrap();
    assert_eq!(receipt.outcome, SendOutcome::NoRoute { agent: agent("ghost") });
    assert!(coordinator.tracker().metrics(&agent("ghost")).is_none());
}

#[tokio::test]
async fn test_weekly_review_announces_mvp() {
    let (coordinator, _) = coordinator();
    let mut inboxes: Vec<_> = ["ace", "bench"].iter().map(|n| inbox(coordinator.bus(), n)).collect();

    let ace = agent("ace");
    for i in 0..4 {
        let task_id = format!("T-{}", i);
        coordinator
            .report_event(&ace, AgentEvent::TaskAssigned { task_id: task_id.clone() })
            .unwrap();
        coordinator
            .report_event(&ace, AgentEvent::TaskCompleted { task_id, duration_secs: 1.0 })
            .unwrap();
    }
    coordinator
        .report_event(&ace, AgentEvent::Collaboration { delta: 0.5 })
        .unwrap();
    coordinator.tracker().register_agent(&agent("bench"));

    let review = coordinator.weekly_review();
    assert_eq!(review.rankings[0].agent_id, ace);
    let mvp = review.mvp.unwrap();
    assert_eq!(mvp.agent_id, ace);
    assert_eq!(mvp.week, 1);
    coordinator.flush().await;

    for rx in &mut inboxes {
        let messages = drain(rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type(), MessageType::Broadcast);
        assert_eq!(messages[0].payload_str("agent_id"), Some("ace"));
    }

    let report = coordinator.summary_report();
    assert_eq!(report.mvp, Some(ace));
    assert_eq!(report.agents.len(), 2);
    assert_eq!(report.agents[1].performance_level, PerformanceLevel::Adequate);
}

#[tokio::test]
async fn test_no_mvp_means_no_announcement() {
    let (coordinator, _) = coordinator();
    let mut rx = inbox(coordinator.bus(), "meh");
    coordinator.tracker().register_agent(&agent("meh"));

    let review = coordinator.weekly_review();
    assert!(review.mvp.is_none());
    assert_eq!(review.rankings.len(), 1);
    coordinator.flush().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_send_message_goes_out_as_supervisor() {
    let (coordinator, _) = coordinator();
    let mut rx = inbox(coordinator.bus(), "worker");

    let mut payload = Payload::new();
    payload.insert("deadline".to_string(), json!("friday"));
    let receipt = coordinator
        .send_message(
            Recipient::agent("worker"),
            MessageType::Request,
            "ship it",
            payload,
            Priority::High,
            SendOptions::default(),
        )
        .unwrap();
    assert!(receipt.is_queued());
    coordinator.flush().await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender(), &agent("supervisor"));
    assert_eq!(messages[0].payload_str("deadline"), Some("friday"));

    let stats = coordinator.summary_report().messages;
    assert_eq!(stats.total_sent, 1);
    assert_eq!(stats.delivered, 1);
    coordinator.shutdown().await;
}
