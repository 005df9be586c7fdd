//! Stage controller: drives the ordered stages of one workspace.
//!
//! Per stage: NotStarted -> Running -> Checkpointed. A checkpointed stage is
//! skipped without building an invoker. Otherwise the stage pulls its
//! upstream into Pending, runs the pool, runs its aggregation, and only then
//! writes the checkpoint and forwards its Done set downstream.

use tracing::Instrument;

use crate::app::Pipeline;
use crate::app::pool::{PoolOptions, PoolReport, run_pool};
use crate::domain::{RunId, TaskState};
use crate::error::PipelineError;
use crate::queue::{CommitPlan, TaskQueue};
use crate::workspace::{Checkpoint, Workspace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRun {
    /// Already checkpointed by an earlier run.
    Skipped,
    Completed(PoolReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: String,
    pub run: StageRun,
}

/// Drives the stages of one workspace in order.
///
/// # Stage gate
/// - a checkpointed stage is skipped without touching the pool
/// - a checkpoint is written only when every task of the stage is Done
///   and its aggregator, if any, succeeded
pub struct StageController<'a> {
    pipeline: &'a Pipeline,
    workspace: &'a Workspace,
    run_id: RunId,
}

impl<'a> StageController<'a> {
    /// `run_id` is recorded in the checkpoints this controller writes.
    pub fn new(pipeline: &'a Pipeline, workspace: &'a Workspace, run_id: RunId) -> Self {
        Self {
            pipeline,
            workspace,
            run_id,
        }
    }

    /// Runs every stage in order, stopping at the first one that fails.
    pub async fn run_all(&self) -> Result<Vec<StageSummary>, PipelineError> {
        let mut summaries = Vec::with_capacity(self.workspace.stages().len());
        for index in 0..self.workspace.stages().len() {
            summaries.push(self.run_stage(index).await?);
        }
        Ok(summaries)
    }

    /// Runs the stage at `index`: forward upstream output, run the pool,
    /// aggregate, checkpoint, then hand Done tasks to the next stage.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::StaleTasks`]: leftovers from an earlier run and no
    ///   `--resume`
    /// - [`PipelineError::NoTasks`]: nothing to do
    /// - [`PipelineError::StageFailed`]: at least one task ended in Failed
    pub async fn run_stage(&self, index: usize) -> Result<StageSummary, PipelineError> {
        let (Some(paths), Some(spec)) = (self.workspace.stage(index), self.pipeline.config.stages.get(index))
        else {
            return Err(PipelineError::Config(format!("no stage at index {index}")));
        };
        let span = tracing::info_span!("stage", name = %spec.name);

        async move {
            if paths.is_checkpointed() {
                tracing::info!("stage already checkpointed, skipping");
                return Ok(StageSummary {
                    stage: spec.name.clone(),
                    run: StageRun::Skipped,
                });
            }

            let queue = TaskQueue::new(paths);
            queue.forward_from(&self.workspace.upstream_dir(paths))?;

            let counts = queue.counts()?;
            if counts.orphaned() > 0 {
                return Err(PipelineError::StaleTasks {
                    stage: spec.name.clone(),
                    count: counts.orphaned(),
                });
            }
            if counts.total() == 0 {
                return Err(PipelineError::NoTasks(spec.name.clone()));
            }

            let pending = queue.list_pending()?;
            let report = if pending.is_empty() {
                tracing::info!(done = counts.done, "nothing pending, stage only needs its checkpoint");
                PoolReport::default()
            } else {
                let invoker = self.pipeline.invokers.for_stage(spec)?;
                let options = PoolOptions {
                    max_workers: self.pipeline.config.max_concurrent_workers,
                    timeout: self.pipeline.config.task_timeout(),
                    commit: CommitPlan {
                        mode: spec.output,
                        format: spec.format,
                    },
                };
                run_pool(&queue, pending, &options, invoker.as_ref(), self.pipeline.ids.as_ref()).await?
            };
            if report.failed > 0 {
                return Err(PipelineError::StageFailed {
                    stage: spec.name.clone(),
                    failed: report.failed,
                });
            }

            if let Some(aggregator) = self.pipeline.aggregator_for(spec)? {
                tracing::info!(kind = ?spec.aggregate, "aggregating stage outputs");
                aggregator.aggregate(paths).await?;
            }

            let counts = queue.counts()?;
            if !counts.all_done() {
                return Err(PipelineError::StageIncomplete {
                    stage: spec.name.clone(),
                    detail: format!(
                        "{} pending, {} in progress, {} failed",
                        counts.pending, counts.in_progress, counts.failed
                    ),
                });
            }
            paths.write_checkpoint(&Checkpoint {
                stage: spec.name.clone(),
                run_id: self.run_id,
                completed_at: self.pipeline.clock.now(),
                tasks: counts.done,
            })?;
            tracing::info!(tasks = counts.done, "stage checkpointed");

            if let Some(next) = self.workspace.stage(index + 1) {
                TaskQueue::new(next).forward_from(&paths.state_dir(TaskState::Done))?;
            }

            Ok(StageSummary {
                stage: spec.name.clone(),
                run: StageRun::Completed(report),
            })
        }
        .instrument(span)
        .await
    }
}
