//! Foreman CLI - run and inspect the agent coordination core.
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration file
//! foreman config init
//!
//! # Show the effective configuration
//! foreman config show
//!
//! # Drive a synthetic fleet through a few weeks
//! foreman simulate --agents 8 --rounds 4 --seed 42
//! foreman simulate --format json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use foreman::commands::{self, output, OutputFormat, SimulationOptions};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Foreman - coordination core for a fleet of worker agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true, env = "FOREMAN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Run a synthetic fleet through the coordinator and print the summary
    Simulate {
        /// Number of agents
        #[arg(short, long, default_value = "6")]
        agents: usize,

        /// Number of weekly review rounds
        #[arg(short, long, default_value = "4")]
        rounds: u32,

        /// RNG seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Check the configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Init { force } => {
                commands::config::init(config_path, force).await?;
            }
            ConfigCommands::Show => {
                commands::config::show(config_path).await?;
            }
            ConfigCommands::Validate => {
                commands::config::validate(config_path).await?;
            }
        },

        Commands::Simulate {
            agents,
            rounds,
            seed,
            format,
        } => {
            let config = commands::config::load(config_path).await?;
            let options = SimulationOptions { agents, rounds, seed };
            commands::simulate::simulate(config, options, format).await?;
        }
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("foreman=debug,foreman_core=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("foreman=info,foreman_core=info,warn"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}
