//! Fleet simulation
//!
//! Drives a [`Coordinator`] with a synthetic fleet so the scoring, the
//! blocker ladder and the bus can be watched end to end without real agents.

use super::output::{self, OutputFormat};
use crate::coordination::{handler_fn, MessageType, Payload, Priority, Recipient, SendOptions};
use crate::orchestration::{AgentEvent, Coordinator, SummaryReport, WeeklyReview};
use anyhow::Result;
use foreman_core::{AgentId, ForemanConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

/// Probability that some agent reports a blocker in a given round
const BLOCKER_CHANCE: f64 = 0.35;
const MAX_TASKS_PER_ROUND: u32 = 4;
const MAX_RESOLUTION_ATTEMPTS: u32 = 4;

/// Knobs for a simulated run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Number of worker agents, at least 2
    pub agents: usize,
    /// Weeks to simulate
    pub rounds: u32,
    /// RNG seed; random when unset
    pub seed: Option<u64>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            agents: 6,
            rounds: 4,
            seed: None,
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    /// Seed actually used
    pub seed: u64,
    /// One weekly review per round
    pub reviews: Vec<WeeklyReview>,
    /// Final summary
    pub report: SummaryReport,
}

struct SimAgent {
    id: AgentId,
    /// Chance of finishing a task successfully
    reliability: f64,
}

/// Run the simulation and return what happened.
pub async fn run_simulation(config: ForemanConfig, options: &SimulationOptions) -> Result<SimulationResult> {
    if options.agents < 2 {
        anyhow::bail!("simulation needs at least 2 agents, got {}", options.agents);
    }

    let seed = options.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    info!(
        "Simulating {} agents for {} rounds (seed {})",
        options.agents, options.rounds, seed
    );

    let coordinator = Coordinator::new(config)?;
    let fleet: Vec<SimAgent> = (1..=options.agents)
        .map(|n| SimAgent {
            id: AgentId::from(format!("agent-{:02}", n)),
            reliability: rng.random_range(0.4..0.98),
        })
        .collect();

    for agent in &fleet {
        coordinator
            .bus()
            .register_fallback(&agent.id, handler_fn(|_message| async { Ok(()) }))?;
        coordinator.tracker().register_agent(&agent.id);
    }

    let mut reviews = Vec::with_capacity(options.rounds as usize);
    let mut task_seq = 0u64;

    for round in 1..=options.rounds {
        debug!("Round {}", round);

        for agent in &fleet {
            let tasks = rng.random_range(1..=MAX_TASKS_PER_ROUND);
            for _ in 0..tasks {
                task_seq += 1;
                let task_id = format!("T-{}", task_seq);
                coordinator.report_event(&agent.id, AgentEvent::TaskAssigned { task_id: task_id.clone() })?;

                let duration_secs = rng.random_range(1.0..30.0) * (2.0 - agent.reliability);
                let event = if rng.random_bool(agent.reliability) {
                    AgentEvent::TaskCompleted { task_id, duration_secs }
                } else {
                    AgentEvent::TaskFailed { task_id, duration_secs }
                };
                coordinator.report_event(&agent.id, event)?;
            }

            if rng.random_bool((1.0 - agent.reliability) * 0.5) {
                coordinator.report_event(&agent.id, AgentEvent::Error { error_type: "crash".into() })?;
            }
            let delta = rng.random_range(-0.05..0.05);
            coordinator.report_event(&agent.id, AgentEvent::Collaboration { delta })?;

            let peer = &fleet[rng.random_range(0..fleet.len())];
            if peer.id != agent.id {
                let mut payload = Payload::new();
                payload.insert("round".to_string(), json!(round));
                coordinator.bus().send(
                    &agent.id,
                    Recipient::Agent(peer.id.clone()),
                    MessageType::Status,
                    "status update",
                    payload,
                    Priority::Low,
                    SendOptions::default(),
                )?;
            }
        }

        if rng.random_bool(BLOCKER_CHANCE) {
            simulate_blocker(&coordinator, &fleet, &mut rng)?;
        }

        coordinator.flush().await;
        let review = coordinator.weekly_review();
        if let Some(mvp) = &review.mvp {
            info!("Round {} MVP: {} ({:.1})", round, mvp.agent_id, mvp.score);
        }
        reviews.push(review);
    }

    coordinator.flush().await;
    let report = coordinator.summary_report();
    coordinator.shutdown().await;

    Ok(SimulationResult { seed, reviews, report })
}

/// One blocker from report to resolution, or until the ladder runs out.
fn simulate_blocker(coordinator: &Coordinator, fleet: &[SimAgent], rng: &mut StdRng) -> Result<()> {
    let reporter = &fleet[rng.random_range(0..fleet.len())];
    // The less reliable of two candidates gets the blame
    let blocking = (0..2)
        .map(|_| &fleet[rng.random_range(0..fleet.len())])
        .filter(|candidate| candidate.id != reporter.id)
        .min_by(|a, b| a.reliability.total_cmp(&b.reliability));
    let Some(blocking) = blocking else {
        return Ok(());
    };

    let description = format!("waiting for {} to complete handoff", blocking.id);
    let blocker = coordinator.report_blocker(
        &description,
        &reporter.id,
        std::slice::from_ref(&blocking.id),
        Priority::High,
    )?;

    for _ in 0..MAX_RESOLUTION_ATTEMPTS {
        let action = coordinator.attempt_resolution(&blocker.id)?;
        debug!("{}: attempt {} -> {}", blocker.id, action.attempt, action.strategy);
        if rng.random_bool(blocking.reliability) {
            coordinator.resolve_blocker(&blocker.id, Some("handoff completed"))?;
            return Ok(());
        }
    }

    coordinator.resolver().record_outcome(&blocker.id, false)?;
    Ok(())
}

/// `foreman simulate`
pub async fn simulate(config: ForemanConfig, options: SimulationOptions, format: OutputFormat) -> Result<()> {
    let result = run_simulation(config, &options).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Table => {
            output::info(format!(
                "{} agents, {} rounds, seed {}",
                options.agents, options.rounds, result.seed
            ));
            output::print_summary(&result.report);
        }
    }
    Ok(())
}
