// Stationflow CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Stations run against simulated executors; PIPELINE_* env vars configure the engine.

mod commands;
mod output;
mod simulated;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stationflow_pipeline::{Orchestrator, PipelineConfig, StepExecutorRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stationflow")]
#[command(about = "Stationflow CLI - Run and inspect station pipelines")]
#[command(version)]
pub struct Cli {
    /// Where steps run: delegated or in-context
    #[arg(long, global = true, env = "PIPELINE_RUNNER")]
    pub runner: Option<String>,

    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the available stations
    Stations,

    /// Run stations and follow their progress
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stationflow=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::parse(&cli.output);

    let mut config = PipelineConfig::from_env()?;
    if let Some(runner) = &cli.runner {
        config.runner = runner.parse()?;
    }
    tracing::debug!(runner = %config.runner, "pipeline configured");

    match cli.command {
        Commands::Stations => {
            let orchestrator = Orchestrator::new(StepExecutorRegistry::new(), config);
            commands::stations::run(&orchestrator, output_format)
        }
        Commands::Run(args) => commands::run::run(args, config, output_format, cli.quiet).await,
    }
}
