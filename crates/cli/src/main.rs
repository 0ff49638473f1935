//! demandcast CLI
//!
//! Forecasts daily demand per item from a sales CSV with an ensemble of
//! model families, inspects how uploads are interpreted, and generates
//! sample data.

mod commands;
mod config;
mod explainer;
mod ingest;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{forecast, inspect, sample};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// demandcast CLI
#[derive(Parser)]
#[command(name = "demandcast")]
#[command(author, version, about = "Ensemble demand forecasting for daily sales data", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, global = true, env = "DEMANDCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Forecast demand for every item in a CSV upload
    Forecast(forecast::ForecastArgs),

    /// Show the inferred column mapping and cleaning report
    Inspect(inspect::InspectArgs),

    /// Generate a synthetic sales CSV
    Sample(sample::SampleArgs),
}

/// Logs go to stderr so JSON on stdout stays parseable
fn init_tracing(format: output::OutputFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        output::OutputFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        output::OutputFormat::Table => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.format, cli.verbose);

    match cli.command {
        Commands::Forecast(args) => {
            let config = config::AppConfig::load(cli.config.as_deref())?;
            forecast::run(args, config, cli.format).await?;
        }
        Commands::Inspect(args) => {
            let config = config::AppConfig::load(cli.config.as_deref())?;
            inspect::run(args, config, cli.format)?;
        }
        Commands::Sample(args) => {
            sample::run(args)?;
        }
    }

    Ok(())
}
