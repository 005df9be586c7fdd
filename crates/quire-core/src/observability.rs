//! Per-stage counts and the run log sink.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::MakeWriter;

use crate::domain::{StageStatus, TaskState};
use crate::error::{IoResultExt, PipelineError};

/// Number of task files per state directory of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub done: usize,
}

impl StateCounts {
    /// Count for one state.
    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Pending => self.pending,
            TaskState::InProgress => self.in_progress,
            TaskState::Failed => self.failed,
            TaskState::Done => self.done,
        }
    }

    pub fn set(&mut self, state: TaskState, n: usize) {
        match state {
            TaskState::Pending => self.pending = n,
            TaskState::InProgress => self.in_progress = n,
            TaskState::Failed => self.failed = n,
            TaskState::Done => self.done = n,
        }
    }

    /// Tasks in any state.
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.failed + self.done
    }

    /// Tasks a resume would move back to Pending.
    pub fn orphaned(&self) -> usize {
        self.in_progress + self.failed
    }

    /// No task outside Done. True for an empty stage.
    pub fn all_done(&self) -> bool {
        self.done == self.total()
    }
}

/// Snapshot of one stage, as printed by `quire status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub status: StageStatus,
    pub counts: StateCounts,
}

/// Snapshot of a whole workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceReport {
    pub unit: String,
    pub exists: bool,
    pub locked_by: Option<String>,
    pub stages: Vec<StageReport>,
}

/// A `tracing` writer that goes to the current run's log file, if any.
///
/// The subscriber is installed once per process, before the workspace is even
/// known; a run attaches its `logs/run.log` after taking the lock and the
/// returned guard detaches it when the run ends. While detached, writes are
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLog {
    /// A detached handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts appending to `path` until the returned guard is dropped.
    pub fn attach(&self, path: &Path) -> Result<AttachedRunLog, PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .at(path)?;
        *lock(&self.file) = Some(file);
        Ok(AttachedRunLog { log: self.clone() })
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.file).is_some()
    }

    fn detach(&self) {
        if let Some(mut file) = lock(&self.file).take() {
            let _ = file.flush();
        }
    }
}

fn lock(file: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Detaches the run log on drop.
#[derive(Debug)]
pub struct AttachedRunLog {
    log: RunLog,
}

impl Drop for AttachedRunLog {
    fn drop(&mut self) {
        self.log.detach();
    }
}

/// Writer handed out per event by [`RunLog`].
pub struct RunLogWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.file).as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.file).as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter {
            file: Arc::clone(&self.file),
        }
    }
}
