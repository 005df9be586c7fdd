//! Recovery manager: decides how a run starts and owns the run's lifetime.
//!
//! The decision is made from the lock file alone, before anything on disk is
//! changed. Once the lock is held every exit path releases it; an error leaves
//! the workspace as it is so the next `--resume` can pick it up.

use std::path::{Path, PathBuf};

use tracing::Instrument;

use crate::app::Pipeline;
use crate::app::collector;
use crate::app::stages::{StageController, StageSummary};
use crate::chunking::chunk_source;
use crate::domain::RunId;
use crate::error::PipelineError;
use crate::observability::RunLog;
use crate::queue::TaskQueue;
use crate::workspace::{LockRecord, Workspace};

/// Command-line intent for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Take over an existing workspace and retry its unfinished tasks.
    pub resume: bool,
    /// Throw the existing workspace away and start over.
    pub force: bool,
    /// Remove the workspace after a successful run.
    pub cleanup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Fresh,
    Resume,
    Restart,
}

/// Chooses the start mode. Fails with [`PipelineError::AlreadyLocked`] when
/// the workspace is locked and neither resume nor force was asked for.
pub fn decide_start(workspace: &Workspace, options: &RunOptions) -> Result<StartMode, PipelineError> {
    if options.force {
        return Ok(StartMode::Restart);
    }
    if options.resume {
        return Ok(StartMode::Resume);
    }
    if workspace.is_locked() {
        return Err(PipelineError::AlreadyLocked {
            path: workspace.base().to_path_buf(),
            owner: workspace.lock_owner().unwrap_or_else(|| "unknown".to_string()),
        });
    }
    Ok(StartMode::Fresh)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub unit: String,
    pub mode: StartMode,
    pub chunks: usize,
    pub stages: Vec<StageSummary>,
    pub output: PathBuf,
}

impl Pipeline {
    /// Runs every stage of `unit` over `source` and assembles the result.
    ///
    /// `run_log`, when given, receives this run's log lines in the
    /// workspace's `logs/run.log` for as long as the lock is held.
    pub async fn run(
        &self,
        source: &Path,
        unit: &str,
        options: &RunOptions,
        run_log: Option<&RunLog>,
    ) -> Result<RunSummary, PipelineError> {
        let workspace = self.workspace(unit)?;
        let mode = decide_start(&workspace, options)?;
        self.config.check_resources()?;
        let needs_source = mode == StartMode::Restart || !workspace.source_dir().is_dir();
        if needs_source && !source.is_file() {
            return Err(PipelineError::MissingResource(source.to_path_buf()));
        }

        if mode == StartMode::Restart {
            tracing::warn!(workspace = %workspace.base().display(), "forced restart, removing workspace");
            workspace.destroy()?;
        }
        workspace.create()?;

        let run_id = self.ids.generate_run_id();
        let lock = workspace.acquire_lock(
            mode != StartMode::Fresh,
            &LockRecord {
                pid: std::process::id(),
                run_id,
                started_at: self.clock.now(),
            },
        )?;

        let result = {
            let _attached = run_log
                .map(|log| log.attach(&workspace.log_path()))
                .transpose()?;
            let span = tracing::info_span!("run", run = %run_id.short(), unit);
            let result = self
                .drive(&workspace, source, mode, run_id)
                .instrument(span)
                .await;
            match &result {
                Ok(summary) => tracing::info!(
                    run = %run_id.short(),
                    output = %summary.output.display(),
                    "run finished"
                ),
                Err(e) => tracing::error!(
                    run = %run_id.short(),
                    error = %e,
                    "run failed, workspace kept for --resume"
                ),
            }
            result
        };

        let released = lock.release();
        let summary = result?;
        released?;

        if options.cleanup {
            workspace.destroy()?;
            tracing::info!(workspace = %workspace.base().display(), "workspace removed");
        }
        Ok(summary)
    }

    async fn drive(
        &self,
        workspace: &Workspace,
        source: &Path,
        mode: StartMode,
        run_id: RunId,
    ) -> Result<RunSummary, PipelineError> {
        tracing::info!(?mode, workspace = %workspace.base().display(), "run started");

        if mode == StartMode::Resume {
            for stage in workspace.stages() {
                TaskQueue::new(stage).requeue()?;
            }
        }

        let chunks = chunk_source(workspace, source, &self.config.chunking)?;
        if let Some(index) = workspace.first_open_stage()
            && index > 0
        {
            tracing::info!(
                stage = %self.config.stages[index].name,
                skipped = index,
                "continuing from first unfinished stage"
            );
        }
        let stages = StageController::new(self, workspace, run_id).run_all().await?;

        let output = self
            .config
            .output_dir
            .join(self.config.output_file_name(workspace.unit()));
        collector::assemble(workspace, &output)?;

        Ok(RunSummary {
            run_id,
            unit: workspace.unit().to_string(),
            mode,
            chunks,
            stages,
            output,
        })
    }
}
