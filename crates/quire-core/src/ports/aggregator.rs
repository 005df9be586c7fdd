//! StageAggregator port.

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::workspace::StagePaths;

/// Folds a stage's per-task side outputs into a shared resource.
///
/// Runs after the stage's pool succeeded and before its checkpoint is written.
/// It can be interrupted and run again, so it must be idempotent.
#[async_trait]
pub trait StageAggregator: Send + Sync {
    async fn aggregate(&self, stage: &StagePaths) -> Result<(), PipelineError>;
}
