// Run command - execute stations and follow progress

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use stationflow_pipeline::{
    Orchestrator, PipelineConfig, PipelineExecution, RunOptions, SevenStations, StationCatalogue,
};
use stationflow_schemas::{ExecutionStatus, JsonObject};

use crate::output::{print_field, OutputFormat};
use crate::simulated;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Script file; its text becomes `scriptContent`
    pub script: Option<PathBuf>,

    /// JSON or YAML file holding extra input fields
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Stations to run (repeatable; all stations if omitted)
    #[arg(long = "station", short)]
    pub stations: Vec<String>,

    /// Stations to leave out (repeatable)
    #[arg(long)]
    pub skip: Vec<String>,

    /// Stations to move to the front, keeping their order (repeatable)
    #[arg(long)]
    pub priority: Vec<String>,

    /// Per-step timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Retries per step after the first attempt
    #[arg(long)]
    pub retry_budget: Option<u32>,

    /// Simulated work per station in milliseconds
    #[arg(long, env = "STATIONFLOW_STEP_DELAY_MS", default_value = "1000")]
    pub step_delay_ms: u64,

    /// Use this execution id instead of a generated one
    #[arg(long)]
    pub execution_id: Option<String>,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        let mut options = RunOptions::new();
        for station in &self.skip {
            options = options.skip(station);
        }
        for station in &self.priority {
            options = options.prioritize(station);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            options = options.with_timeout_ms(timeout_ms);
        }
        if let Some(budget) = self.retry_budget {
            options = options.with_retry_budget(budget);
        }
        if let Some(id) = &self.execution_id {
            options = options.with_execution_id(id);
        }
        options
    }
}

pub async fn run(
    args: RunArgs,
    config: PipelineConfig,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let registry = simulated::registry(
        &SevenStations.get_all_stations(),
        Duration::from_millis(args.step_delay_ms),
    );
    let orchestrator =
        Orchestrator::from_config(registry, config).context("Failed to start runner")?;

    let input = load_input(args.input.as_deref(), args.script.as_deref())?;
    let options = args.options();
    let handle = if args.stations.is_empty() {
        orchestrator.run_all(input, options)?
    } else {
        orchestrator.run(&args.stations, input, options)?
    };
    let execution_id = handle.id().to_string();
    let verbose = output.is_text() && !quiet;

    if verbose {
        println!("Started execution: {}", execution_id);
    }

    let mut updates = orchestrator
        .store()
        .subscribe(&execution_id)
        .context("Execution disappeared before it started")?;
    let mut reported = HashSet::new();

    let execution = loop {
        let snapshot = updates.borrow_and_update().clone();
        if verbose {
            report_steps(&snapshot, &mut reported);
        }
        if snapshot.is_terminal() {
            break snapshot;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break handle.current();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(%execution_id, "Received interrupt, cancelling");
                orchestrator.cancel_execution(&execution_id);
            }
        }
    };

    orchestrator.shutdown();

    if output.is_text() {
        if quiet {
            println!("{}", execution.status);
        } else {
            print_summary(&execution);
        }
    } else {
        output.print_value(&execution)?;
    }

    if execution.status != ExecutionStatus::Completed {
        anyhow::bail!("Execution {} {}", execution.id, execution.status);
    }
    Ok(())
}

/// Build the input object from an input file and an optional script
fn load_input(input: Option<&Path>, script: Option<&Path>) -> Result<JsonObject> {
    let mut data = match input {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            // YAML is a superset of JSON
            serde_yaml::from_str::<JsonObject>(&content)
                .with_context(|| format!("Input must be an object: {}", path.display()))?
        }
        None => JsonObject::new(),
    };

    if let Some(path) = script {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        data.insert("scriptContent".into(), json!(script));
    }

    Ok(data)
}

/// Print steps that finished since the last snapshot
fn report_steps(execution: &PipelineExecution, reported: &mut HashSet<String>) {
    for (step_id, result) in &execution.results {
        if !reported.insert(step_id.clone()) {
            continue;
        }
        let mark = if result.success { "ok" } else { "failed" };
        println!(
            "  [{:>3.0}%] {:<12} {:<6} {}ms",
            execution.progress_percent, step_id, mark, result.duration_ms
        );
    }
}

fn print_summary(execution: &PipelineExecution) {
    println!();
    print_field("Execution", &execution.id);
    print_field("Status", &execution.status.to_string());
    if let Some(strategy) = execution.strategy {
        print_field("Runner", &strategy.to_string());
    }
    print_field(
        "Steps",
        &format!("{}/{}", execution.completed_steps, execution.total_steps),
    );
    print_field("Progress", &format!("{:.0}%", execution.progress_percent));
    if let Some(ms) = execution.total_duration_ms {
        print_field("Duration", &format!("{}ms", ms));
    }
    if let Some(error) = &execution.error {
        print_field("Error", error);
    }
}
