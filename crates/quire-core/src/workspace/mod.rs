//! Workspace store: the on-disk layout of one unit of work.
//!
//! ```text
//! <root>/<unit>/
//!   lock
//!   logs/run.log
//!   source/part_0001.txt ...
//!   checkpoints/<stage>.checkpoint
//!   stages/01-<stage>/{pending,in_progress,failed,done,outputs}/
//! ```
//!
//! This layout is the recovery protocol: a later process finds everything it
//! needs to resume by looking at which directory holds which file.

mod checkpoint;
mod lock;

pub use self::checkpoint::Checkpoint;
pub use self::lock::{LockGuard, LockRecord};

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::domain::{StageStatus, TaskState};
use crate::error::{IoResultExt, PipelineError};

const LOCK_FILE: &str = "lock";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "run.log";
const SOURCE_DIR: &str = "source";
const SOURCE_STAGING_DIR: &str = "source.partial";
const CHECKPOINTS_DIR: &str = "checkpoints";
const STAGES_DIR: &str = "stages";
const OUTPUTS_DIR: &str = "outputs";

/// Checks that `unit` names exactly one directory below the workspace root.
///
/// The workspace base is removed wholesale on a forced restart or cleanup, so
/// an empty name, a relative step or a separator would point that removal at
/// the root or outside it.
pub fn check_unit_name(unit: &str) -> Result<(), PipelineError> {
    let mut components = Path::new(unit).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single && !unit.contains(['/', '\\']) && !unit.starts_with('.') {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "unit name '{unit}' must be a single directory name without '/', '.' or '..'"
        )))
    }
}

/// Paths of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePaths {
    index: usize,
    name: String,
    dir: PathBuf,
    checkpoint: PathBuf,
}

impl StagePaths {
    /// Zero-based position in the stage list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the stage's tasks in `state`.
    pub fn state_dir(&self, state: TaskState) -> PathBuf {
        self.dir.join(state.dir_name())
    }

    /// Side outputs (e.g. discovered terms) keyed by task stem.
    pub fn outputs_dir(&self) -> PathBuf {
        self.dir.join(OUTPUTS_DIR)
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint
    }

    /// Whether the stage finished in some earlier or current run.
    pub fn is_checkpointed(&self) -> bool {
        self.checkpoint.is_file()
    }

    fn create(&self) -> Result<(), PipelineError> {
        for state in TaskState::ALL {
            let dir = self.state_dir(state);
            fs::create_dir_all(&dir).at(&dir)?;
        }
        let outputs = self.outputs_dir();
        fs::create_dir_all(&outputs).at(&outputs)
    }
}

/// The full on-disk state of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    unit: String,
    base: PathBuf,
    stages: Vec<StagePaths>,
}

impl Workspace {
    /// Computes the layout. Touches nothing on disk.
    pub fn at<S: AsRef<str>>(root: &Path, unit: &str, stage_names: &[S]) -> Self {
        let base = root.join(unit);
        let stages = stage_names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let name = name.as_ref();
                StagePaths {
                    index,
                    name: name.to_string(),
                    dir: base
                        .join(STAGES_DIR)
                        .join(format!("{:02}-{name}", index + 1)),
                    checkpoint: base
                        .join(CHECKPOINTS_DIR)
                        .join(format!("{name}.checkpoint")),
                }
            })
            .collect();
        Self {
            unit: unit.to_string(),
            base,
            stages,
        }
    }

    /// Creates every directory of the layout. Safe to call repeatedly.
    pub fn create(&self) -> Result<(), PipelineError> {
        for dir in [self.logs_dir(), self.checkpoints_dir()] {
            fs::create_dir_all(&dir).at(&dir)?;
        }
        for stage in &self.stages {
            stage.create()?;
        }
        Ok(())
    }

    /// Recursively removes the workspace. A missing workspace is not an error.
    pub fn destroy(&self) -> Result<(), PipelineError> {
        match fs::remove_dir_all(&self.base) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(&self.base, e)),
        }
    }

    /// Whether the workspace directory is on disk.
    pub fn exists(&self) -> bool {
        self.base.is_dir()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `<workspace_dir>/<unit>`.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn stages(&self) -> &[StagePaths] {
        &self.stages
    }

    /// Stage at `index`, in configuration order.
    pub fn stage(&self, index: usize) -> Option<&StagePaths> {
        self.stages.get(index)
    }

    /// The lock file; present while a run owns the workspace or after one
    /// crashed.
    pub fn lock_path(&self) -> PathBuf {
        self.base.join(LOCK_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join(LOGS_DIR)
    }

    /// Per-workspace run log, appended across runs.
    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    /// Chunker output; doubles as the upstream of the first stage.
    pub fn source_dir(&self) -> PathBuf {
        self.base.join(SOURCE_DIR)
    }

    /// Where chunking writes before the rename into [`Workspace::source_dir`].
    pub fn source_staging_dir(&self) -> PathBuf {
        self.base.join(SOURCE_STAGING_DIR)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.base.join(CHECKPOINTS_DIR)
    }

    /// Where `stage` takes its input from: the chunks for the first stage, the
    /// previous stage's Done set otherwise.
    pub fn upstream_dir(&self, stage: &StagePaths) -> PathBuf {
        match stage.index.checked_sub(1).and_then(|i| self.stages.get(i)) {
            Some(previous) => previous.state_dir(TaskState::Done),
            None => self.source_dir(),
        }
    }

    /// Checkpointed if the marker exists, Running if any task file exists,
    /// NotStarted otherwise.
    pub fn stage_status(&self, stage: &StagePaths) -> Result<StageStatus, PipelineError> {
        if stage.is_checkpointed() {
            return Ok(StageStatus::Checkpointed);
        }
        for state in TaskState::ALL {
            if has_entries(&stage.state_dir(state))? {
                return Ok(StageStatus::Running);
            }
        }
        Ok(StageStatus::NotStarted)
    }

    /// Index of the first stage without a checkpoint.
    pub fn first_open_stage(&self) -> Option<usize> {
        self.stages.iter().position(|s| !s.is_checkpointed())
    }
}

fn has_entries(dir: &Path) -> Result<bool, PipelineError> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.any(|e| {
            e.map(|e| !e.file_name().to_string_lossy().starts_with('.'))
                .unwrap_or(false)
        })),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::io(dir, e)),
    }
}
