//! quire CLI
//!
//! Splits a document into chunks and drives them through the configured
//! stages, resumably.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use quire_core::app::unit_name;
use quire_core::config::{Aggregation, write_default_config};
use quire_core::impls::{AutoApprove, CommandWorker, GlossaryAggregator, LineReviewer};
use quire_core::observability::RunLog;
use quire_core::ports::TermReviewer;
use quire_core::{Pipeline, PipelineBuilder, PipelineConfig, PipelineError, RunOptions};

/// Exit status after Ctrl-C, as a shell reports SIGINT.
const INTERRUPTED: u8 = 130;

/// How long runtime shutdown waits on blocking work, such as a review
/// prompt's pending stdin read, before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "quire", version)]
#[command(about = "Crash-safe multi-stage chunk pipeline", long_about = None)]
struct Cli {
    /// Path to the pipeline configuration
    #[arg(short, long, default_value = "quire.json", global = true)]
    config: PathBuf,

    /// Override max_concurrent_workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or continue) the pipeline for one source document
    Run(RunArgs),

    /// Print the workspace state of a source document as JSON
    Status {
        source: PathBuf,

        /// Workspace name; defaults to the source's parent directory name
        #[arg(long)]
        unit: Option<String>,
    },

    /// Check the configuration and every file it refers to
    Validate,

    /// Write the default configuration
    InitConfig {
        #[arg(short, long, default_value = "quire.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    source: PathBuf,

    /// Workspace name; defaults to the source's parent directory name
    #[arg(long)]
    unit: Option<String>,

    /// Continue an interrupted or failed run, retrying unfinished tasks
    #[arg(long, conflicts_with = "force")]
    resume: bool,

    /// Delete the existing workspace and start over
    #[arg(long)]
    force: bool,

    /// Delete the workspace after a successful run
    #[arg(long)]
    cleanup: bool,

    /// Accept discovered terms without asking
    #[arg(short, long)]
    yes: bool,
}

fn main() -> ExitCode {
    let run_log = RunLog::new();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(run_log.clone()))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "cannot start the async runtime");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(execute(cli, &run_log));
    // drops every leftover task, which kills their worker processes
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    code
}

fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

async fn execute(cli: Cli, run_log: &RunLog) -> ExitCode {
    let result = match cli.command {
        Commands::Run(args) => run_command(&cli.config, cli.workers, args, run_log).await,
        Commands::Status { source, unit } => status_command(&cli.config, &source, unit.as_deref()),
        Commands::Validate => validate_command(&cli.config),
        Commands::InitConfig { output } => init_config_command(&output),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 2 for problems found before anything ran (configuration, lock), 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PipelineError>() {
        Some(e) if e.is_fatal_precondition() => 2,
        _ => 1,
    }
}

fn resolve_unit(source: &Path, unit: Option<&str>) -> Result<String, PipelineError> {
    match unit {
        Some(unit) => Ok(unit.to_string()),
        None => unit_name(source).ok_or_else(|| {
            PipelineError::Config(format!(
                "cannot derive a unit name from {}; pass --unit",
                source.display()
            ))
        }),
    }
}

fn build_pipeline(config: PipelineConfig, reviewer: Arc<dyn TermReviewer>) -> Result<Pipeline, PipelineError> {
    let aggregator = GlossaryAggregator::new(
        config.resources.glossary.clone(),
        config.glossary.clone(),
        reviewer,
    );
    let worker = CommandWorker::new(&config);
    PipelineBuilder::new(config)
        .invoker(worker)
        .register_aggregator(Aggregation::Glossary, Arc::new(aggregator))?
        .build()
}

fn load_config(path: &Path, workers: Option<usize>) -> Result<PipelineConfig, PipelineError> {
    let mut config = PipelineConfig::from_file(path)?;
    if let Some(n) = workers {
        config.max_concurrent_workers = n;
    }
    Ok(config)
}

async fn run_command(
    config_path: &Path,
    workers: Option<usize>,
    args: RunArgs,
    run_log: &RunLog,
) -> Result<ExitCode> {
    let config = load_config(config_path, workers)?;
    let reviewer: Arc<dyn TermReviewer> = if args.yes || !std::io::stdin().is_terminal() {
        Arc::new(AutoApprove)
    } else {
        Arc::new(LineReviewer::new(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        ))
    };
    let pipeline = build_pipeline(config, reviewer)?;
    let unit = resolve_unit(&args.source, args.unit.as_deref())?;
    let options = RunOptions {
        resume: args.resume,
        force: args.force,
        cleanup: args.cleanup,
    };

    let run = pipeline.run(&args.source, &unit, &options, Some(run_log));
    let Some(result) = until_interrupted(run, tokio::signal::ctrl_c()).await else {
        // the run is dropped by now and its lock released; tasks it had in
        // flight stay in progress until the next --resume
        tracing::warn!(%unit, "interrupted");
        return Ok(ExitCode::from(INTERRUPTED));
    };

    let summary = result?;
    tracing::info!(
        unit = %summary.unit,
        chunks = summary.chunks,
        output = %summary.output.display(),
        "done"
    );
    println!("{}", summary.output.display());
    Ok(ExitCode::SUCCESS)
}

/// Races `run` against `interrupt`. `None` means the interrupt won; `run` has
/// been dropped when this returns.
async fn until_interrupted<F, I>(run: F, interrupt: I) -> Option<F::Output>
where
    F: Future,
    I: Future,
{
    tokio::select! {
        output = run => Some(output),
        _ = interrupt => None,
    }
}

fn status_command(config_path: &Path, source: &Path, unit: Option<&str>) -> Result<ExitCode> {
    let config = load_config(config_path, None)?;
    let pipeline = build_pipeline(config, Arc::new(AutoApprove))?;
    let unit = resolve_unit(source, unit)?;
    let report = pipeline.status(&unit)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

fn validate_command(config_path: &Path) -> Result<ExitCode> {
    let config = load_config(config_path, None)?;
    config.check_resources()?;
    tracing::info!(
        stages = config.stages.len(),
        workspace = %config.workspace_dir.display(),
        "configuration is valid"
    );
    Ok(ExitCode::SUCCESS)
}

fn init_config_command(output: &Path) -> Result<ExitCode> {
    write_default_config(output)?;
    tracing::info!(path = %output.display(), "wrote default configuration");
    Ok(ExitCode::SUCCESS)
}
