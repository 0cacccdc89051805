//! Output formatting utilities for CLI

use crate::blockers::ChronicBlocker;
use crate::coordination::MessageStats;
use crate::orchestration::{AgentSummary, SummaryReport};
use crate::performance::PerformanceLevel;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use console::{style, Emoji};

/// Success marker
pub static CHECK: Emoji<'_, '_> = Emoji("✓ ", "OK ");
/// Failure marker
pub static CROSS: Emoji<'_, '_> = Emoji("✗ ", "ERR");
/// Info marker
pub static INFO: Emoji<'_, '_> = Emoji("ℹ ", "i ");
/// MVP marker
pub static TROPHY: Emoji<'_, '_> = Emoji("🏆 ", "* ");

/// How reports are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables
    Table,
    /// Pretty-printed JSON
    Json,
}

/// Print success message
pub fn success(msg: impl Into<String>) {
    println!("{} {}", style(CHECK).green(), style(msg.into()).green());
}

/// Print error message
pub fn error(msg: impl Into<String>) {
    eprintln!("{} {}", style(CROSS).red(), style(msg.into()).red());
}

/// Print info message
pub fn info(msg: impl Into<String>) {
    println!("{} {}", style(INFO).cyan(), msg.into());
}

/// Print warning message
pub fn warn(msg: impl Into<String>) {
    println!("{} {}", style("⚠").yellow(), style(msg.into()).yellow());
}

fn level_color(level: PerformanceLevel) -> Color {
    match level {
        PerformanceLevel::Rockstar => Color::Green,
        PerformanceLevel::Solid => Color::Cyan,
        PerformanceLevel::Adequate => Color::White,
        PerformanceLevel::Struggling => Color::Yellow,
        PerformanceLevel::Disaster | PerformanceLevel::ReplaceImmediately => Color::Red,
    }
}

/// Print the agent ranking table
pub fn print_agent_table(agents: &[AgentSummary]) {
    if agents.is_empty() {
        info("No agents tracked");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Rank", "Agent", "Score", "Level", "Recommendation"]);

    for (rank, agent) in agents.iter().enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(agent.agent_id.as_str()),
            Cell::new(format!("{:.1}", agent.overall_score)),
            Cell::new(agent.performance_level).fg(level_color(agent.performance_level)),
            Cell::new(agent.performance_level.recommendation()),
        ]);
    }

    println!("{table}");
}

/// Print agents with chronic blockers; prints nothing when there are none
pub fn print_chronic_blockers(chronic: &[ChronicBlocker]) {
    if chronic.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Chronic blocker", "Reports"]);
    for entry in chronic {
        table.add_row(vec![
            Cell::new(entry.agent_id.as_str()).fg(Color::Red),
            Cell::new(entry.count),
        ]);
    }
    println!("{table}");
}

/// Print bus counters
pub fn print_message_stats(stats: &MessageStats) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Messages", "Count"]);
    for (label, value) in [
        ("Sent", stats.total_sent),
        ("Delivered", stats.delivered),
        ("Correlated", stats.correlated),
        ("Dropped", stats.dropped),
        ("Blocked", stats.blocked),
        ("Undeliverable", stats.undeliverable),
        ("Handler failures", stats.handler_failures),
        ("Response timeouts", stats.response_timeouts),
    ] {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    println!("{table}");
    println!("Average sass level: {:.1}", stats.average_sass_level);
}

/// Print a full summary report
pub fn print_summary(report: &SummaryReport) {
    print_agent_table(&report.agents);

    match &report.mvp {
        Some(mvp) => println!("{} MVP: {}", TROPHY, style(mvp).bold().green()),
        None => info("No MVP crowned"),
    }

    if report.problem_agents.is_empty() {
        success("No problem agents");
    } else {
        let names: Vec<&str> = report.problem_agents.iter().map(|a| a.as_str()).collect();
        warn(format!("Problem agents: {}", names.join(", ")));
    }

    print_chronic_blockers(&report.chronic_blockers);

    println!(
        "Blockers: {} active, {} resolved ({:.0}% resolution rate)",
        report.blockers.active,
        report.blockers.resolved,
        report.blockers.resolution_success_rate * 100.0
    );
    print_message_stats(&report.messages);
}
