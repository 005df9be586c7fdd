use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Operational classification of a [`PipelineError`].
///
/// - Configuration / Lock: the run halts before any worker is spawned
/// - Task: local to one task, recorded as a state transition
/// - Aggregation: one per-task output is skipped
/// - Internal: anything else, the workspace is left for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Lock,
    Task,
    Aggregation,
    Internal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("required resource not found: {}", .0.display())]
    MissingResource(PathBuf),

    #[error(
        "workspace {} is locked by process {owner}; pass --resume to continue it or --force to start over",
        .path.display()
    )]
    AlreadyLocked { path: PathBuf, owner: String },

    #[error("task file not found: {}", .0.display())]
    TaskNotFound(PathBuf),

    #[error("failed to launch worker for {task}: {reason}")]
    Dispatch { task: String, reason: String },

    #[error("stage '{stage}' has {count} task(s) left over from an interrupted run; pass --resume")]
    StaleTasks { stage: String, count: usize },

    #[error("stage '{stage}' finished with {failed} failed task(s)")]
    StageFailed { stage: String, failed: usize },

    #[error("stage '{stage}' cannot be checkpointed: {detail}")]
    StageIncomplete { stage: String, detail: String },

    #[error("stage '{0}' has no tasks to process")]
    NoTasks(String),

    #[error("no aggregator registered for stage '{0}'")]
    MissingAggregator(String),

    #[error("term review was cancelled")]
    ReviewCancelled,

    #[error("malformed worker output {}: {reason}", .path.display())]
    MalformedOutput { path: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("worker supervision failed: {0}")]
    Join(String),
}

impl PipelineError {
    /// An I/O error on `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Coarse classification, used for exit codes and logging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::MissingResource(_)
            | Self::MissingAggregator(_)
            | Self::StaleTasks { .. } => ErrorKind::Configuration,
            Self::AlreadyLocked { .. } => ErrorKind::Lock,
            Self::Dispatch { .. } | Self::StageFailed { .. } => ErrorKind::Task,
            Self::MalformedOutput { .. } => ErrorKind::Aggregation,
            Self::TaskNotFound(_)
            | Self::StageIncomplete { .. }
            | Self::NoTasks(_)
            | Self::ReviewCancelled
            | Self::Io { .. }
            | Self::Json(_)
            | Self::Join(_) => ErrorKind::Internal,
        }
    }

    /// Errors that stop a run before anything is mutated.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Lock)
    }
}

/// Attaches the offending path to an `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T, PipelineError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::io(path, e))
    }
}
