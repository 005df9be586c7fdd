//! Status: a read-only snapshot of a workspace, for `quire status` and for
//! deciding how a run should start.

use crate::app::Pipeline;
use crate::error::PipelineError;
use crate::observability::{StageReport, WorkspaceReport};
use crate::queue::TaskQueue;

impl Pipeline {
    /// Per-stage status and task counts of `unit`. Creates nothing.
    pub fn status(&self, unit: &str) -> Result<WorkspaceReport, PipelineError> {
        let workspace = self.workspace(unit)?;
        let mut stages = Vec::with_capacity(workspace.stages().len());
        for stage in workspace.stages() {
            stages.push(StageReport {
                stage: stage.name().to_string(),
                status: workspace.stage_status(stage)?,
                counts: TaskQueue::new(stage).counts()?,
            });
        }
        Ok(WorkspaceReport {
            unit: unit.to_string(),
            exists: workspace.exists(),
            locked_by: workspace.lock_owner(),
            stages,
        })
    }
}
