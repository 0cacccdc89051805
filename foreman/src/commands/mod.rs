//! Command modules for the Foreman CLI

pub mod config;
pub mod output;
pub mod simulate;

pub use output::OutputFormat;
pub use simulate::{run_simulation, SimulationOptions, SimulationResult};
