//! Concord CLI - run, validate and inspect decision scenarios offline
//!
//! Commands:
//! - `run`: replay a scenario file through the full coordinator
//! - `validate`: check a scenario file against the schema and its own plan
//! - `aggregate`: merge a JSON array of specialist results
//!
//! Reports go to stdout as JSON; logs and progress events go to stderr.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use concord_core::{aggregate, screen_result, Scenario, ScenarioError, SpecialistResult};
use concord_runtime::{
    cancellation, CachingEvaluator, Evaluator, EvaluatorEnvelope, FileArchive,
    RunControls, RunOptions, RuntimeConfig, ScriptedCollaborators,
};

#[derive(Parser)]
#[command(name = "concord")]
#[command(about = "Concord - multi-specialist decision coordination", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario end to end and print the final report
    Run {
        /// Scenario file (.yaml, .yml or .json)
        scenario: PathBuf,

        /// Runtime configuration file
        #[arg(short, long, env = "CONCORD_CONFIG")]
        config: Option<PathBuf>,

        /// Judgment rejections that may be retried
        #[arg(long)]
        retry_bound: Option<u32>,

        /// Maximum resolution steps
        #[arg(long)]
        steps: Option<u32>,

        /// Deadline for the whole run, e.g. "30s" or "2m"
        #[arg(long, value_parser = humantime::parse_duration)]
        deadline: Option<Duration>,

        /// Seed recorded in the report so the run can be replayed
        #[arg(long)]
        seed: Option<u64>,

        /// Directory to archive the final report in
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Print progress events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Validate a scenario file
    Validate {
        scenario: PathBuf,
    },

    /// Aggregate a JSON array of specialist results
    Aggregate {
        results: PathBuf,
    },
}

/// Flag values that take precedence over scenario and configuration.
struct RunFlags {
    retry_bound: Option<u32>,
    steps: Option<u32>,
    deadline: Option<Duration>,
    seed: Option<u64>,
    archive: Option<PathBuf>,
    events: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            config,
            retry_bound,
            steps,
            deadline,
            seed,
            archive,
            events,
        } => {
            let flags = RunFlags {
                retry_bound,
                steps,
                deadline,
                seed,
                archive,
                events,
            };
            run(&scenario, config.as_deref(), flags).await
        }
        Commands::Validate { scenario } => validate(&scenario),
        Commands::Aggregate { results } => aggregate_file(&results),
    }
}

async fn run(path: &Path, config: Option<&Path>, flags: RunFlags) -> Result<ExitCode> {
    let config = match config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let scenario = Scenario::from_file(path)
        .with_context(|| format!("Failed to load scenario {}", path.display()))?;

    let base = config.run.overridden_by(&scenario.options);
    let options = RunOptions {
        retry_bound: flags.retry_bound.unwrap_or(base.retry_bound),
        resolution_steps: flags.steps.unwrap_or(base.resolution_steps),
        deadline: flags.deadline.or(base.deadline),
        seed: flags.seed.or(base.seed),
    };

    let collaborators = ScriptedCollaborators::from_scenario(&scenario)?;
    let mut builder = collaborators.builder_with(|evaluator| {
        let envelope: Arc<dyn Evaluator> =
            Arc::new(EvaluatorEnvelope::new(evaluator, config.evaluator.clone()));
        if !config.cache.enabled {
            return envelope;
        }
        let cached: Arc<dyn Evaluator> = Arc::new(CachingEvaluator::new(envelope, &config.cache));
        cached
    });
    if let Some(dir) = flags.archive.or(config.archive_dir) {
        builder = builder.archive(Arc::new(FileArchive::new(dir)));
    }
    let coordinator = builder.build()?;

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let mut controls = RunControls::new().with_cancel(signal);
    let mut printer = None;
    if flags.events {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        controls = controls.with_events(tx);
        printer = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("{}", line),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode progress event"),
                }
            }
        }));
    }

    tracing::info!(scenario = %scenario.name, ?options, "Running scenario");
    let report = coordinator
        .run_scenario_with(&scenario.request, scenario.context.clone(), &options, controls)
        .await;

    if let Some(printer) = printer {
        // The sender went away with the run, so the printer drains and stops.
        printer.await.context("Event printer failed")?;
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.status.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn validate(path: &Path) -> Result<ExitCode> {
    match Scenario::from_file(path) {
        Ok(scenario) => {
            println!("✓ {} is valid ({})", path.display(), scenario.name);
            Ok(ExitCode::SUCCESS)
        }
        Err(ScenarioError::SchemaViolations(violations)) => {
            eprintln!("✗ {} violates the scenario schema:", path.display());
            for violation in violations {
                eprintln!("  - {}", violation);
            }
            Ok(ExitCode::FAILURE)
        }
        Err(
            e @ (ScenarioError::IoError(_)
            | ScenarioError::YamlError(_)
            | ScenarioError::JsonError(_)),
        ) => Err(e).with_context(|| format!("Failed to read scenario {}", path.display())),
        Err(e) => {
            eprintln!("✗ {}: {}", path.display(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn aggregate_file(path: &Path) -> Result<ExitCode> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let results = parse_results(&contents)
        .with_context(|| format!("Failed to parse specialist results in {}", path.display()))?;

    let Some(composite) = aggregate(&results) else {
        bail!("{} holds no specialist results", path.display());
    };
    println!("{}", serde_json::to_string_pretty(&composite)?);
    Ok(ExitCode::SUCCESS)
}

/// Parse specialist results and re-check them. Out-of-range decisions become
/// schema faults, as a live reply with the same values would.
fn parse_results(contents: &str) -> Result<Vec<SpecialistResult>> {
    let results: Vec<SpecialistResult> = serde_json::from_str(contents)?;
    let results: Vec<SpecialistResult> = results.into_iter().map(screen_result).collect();
    for result in &results {
        if let Some(fault) = result.fault() {
            tracing::warn!(role = %result.role, error = %fault.message, "Specialist result faulted");
        }
    }
    Ok(results)
}
