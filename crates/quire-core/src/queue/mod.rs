//! Task queue: tasks are files, states are directories, transitions are renames.
//!
//! A rename within one filesystem is atomic, so a task is always visible in
//! exactly one state directory, including across a crash. The queue is
//! stateless; every call re-reads the directories.

mod staging;

pub(crate) use self::staging::{remove_if_exists, staging_path, write_atomic};

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::config::{OutputFormat, OutputMode};
use crate::domain::{TaskRef, TaskState};
use crate::error::{IoResultExt, PipelineError};
use crate::observability::StateCounts;
use crate::workspace::StagePaths;

use self::staging::{clear_staging, copy_atomic, is_staging_name};

/// Where a successful worker's stdout goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPlan {
    pub mode: OutputMode,
    pub format: OutputFormat,
}

/// Queue operations over one stage's state directories.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    stage: StagePaths,
}

impl TaskQueue {
    /// A queue over `stage`'s directories. Touches nothing on disk.
    pub fn new(stage: &StagePaths) -> Self {
        Self {
            stage: stage.clone(),
        }
    }

    pub fn stage(&self) -> &StagePaths {
        &self.stage
    }

    /// Tasks in `state`, in lexical file-name order.
    pub fn list(&self, state: TaskState) -> Result<Vec<TaskRef>, PipelineError> {
        let dir = self.stage.state_dir(state);
        Ok(list_task_names(&dir)?
            .into_iter()
            .map(|name| {
                let path = dir.join(&name);
                TaskRef::new(name, state, path)
            })
            .collect())
    }

    /// Pending tasks in dispatch order (lexical by file name).
    pub fn list_pending(&self) -> Result<Vec<TaskRef>, PipelineError> {
        self.list(TaskState::Pending)
    }

    /// Number of task files in each state directory. Staging files are not
    /// counted.
    pub fn counts(&self) -> Result<StateCounts, PipelineError> {
        let mut counts = StateCounts::default();
        for state in TaskState::ALL {
            counts.set(state, list_task_names(&self.stage.state_dir(state))?.len());
        }
        Ok(counts)
    }

    /// The state directory currently holding `name`, if any.
    pub fn locate(&self, name: &str) -> Option<TaskState> {
        TaskState::ALL
            .into_iter()
            .find(|state| self.stage.state_dir(*state).join(name).is_file())
    }

    /// Moves the task's file into `to`, keeping its name.
    ///
    /// `TaskNotFound` means the task was referenced after it had already moved,
    /// which is a bookkeeping bug in the caller.
    pub fn transition(&self, task: &TaskRef, to: TaskState) -> Result<TaskRef, PipelineError> {
        let dest = self.stage.state_dir(to).join(task.name());
        match fs::rename(task.path(), &dest) {
            Ok(()) => Ok(TaskRef::new(task.name(), to, dest)),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                tracing::error!(
                    stage = %self.stage.name(),
                    task = %task.name(),
                    from = %task.state(),
                    %to,
                    "task file vanished before transition"
                );
                Err(PipelineError::TaskNotFound(task.path().to_path_buf()))
            }
            Err(e) => Err(PipelineError::io(task.path(), e)),
        }
    }

    /// Moves every InProgress and Failed task back to Pending.
    ///
    /// An InProgress file whose name already exists in Done is the remnant of a
    /// commit interrupted after its output landed; it is dropped rather than
    /// re-run. Returns the number of tasks moved back.
    pub fn requeue(&self) -> Result<usize, PipelineError> {
        for state in TaskState::ALL {
            clear_staging(&self.stage.state_dir(state))?;
        }
        clear_staging(&self.stage.outputs_dir())?;

        let done_dir = self.stage.state_dir(TaskState::Done);
        let mut moved = 0;
        for state in [TaskState::InProgress, TaskState::Failed] {
            for task in self.list(state)? {
                if state == TaskState::InProgress && done_dir.join(task.name()).is_file() {
                    tracing::info!(
                        stage = %self.stage.name(),
                        task = %task.name(),
                        "dropping in-progress copy of an already committed task"
                    );
                    remove_if_exists(task.path())?;
                    continue;
                }
                self.transition(&task, TaskState::Pending)?;
                moved += 1;
            }
        }
        if moved > 0 {
            tracing::info!(stage = %self.stage.name(), tasks = moved, "requeued orphaned tasks");
        }
        Ok(moved)
    }

    /// Copies every file of `upstream` that this stage does not know yet into
    /// Pending. The upstream directory is left untouched.
    ///
    /// Safe to repeat: a task already present in any state is skipped.
    pub fn forward_from(&self, upstream: &Path) -> Result<usize, PipelineError> {
        let pending = self.stage.state_dir(TaskState::Pending);
        let mut copied = 0;
        for name in list_task_names(upstream)? {
            if self.locate(&name).is_some() {
                continue;
            }
            copy_atomic(&upstream.join(&name), &pending.join(&name))?;
            copied += 1;
        }
        if copied > 0 {
            tracing::info!(
                stage = %self.stage.name(),
                tasks = copied,
                from = %upstream.display(),
                "forwarded tasks into pending"
            );
        }
        Ok(copied)
    }

    /// Final location of a task's worker output.
    pub fn output_path(&self, task: &TaskRef, plan: CommitPlan) -> PathBuf {
        match plan.mode {
            OutputMode::Replace => self.stage.state_dir(TaskState::Done).join(task.name()),
            OutputMode::Side => self
                .stage
                .outputs_dir()
                .join(format!("{}.{}", task.stem(), plan.format.extension())),
        }
    }

    /// Persists a successful worker's stdout and marks the task Done.
    ///
    /// - Replace: the output is renamed into `done/<name>` (the commit point),
    ///   then the InProgress file is removed
    /// - Side: the output is renamed into `outputs/`, then the task file moves
    ///   to Done unchanged
    pub fn commit(
        &self,
        task: &TaskRef,
        stdout: &[u8],
        plan: CommitPlan,
    ) -> Result<TaskRef, PipelineError> {
        if !task.path().is_file() {
            return Err(PipelineError::TaskNotFound(task.path().to_path_buf()));
        }
        let output = self.output_path(task, plan);
        write_atomic(&output, stdout)?;
        match plan.mode {
            OutputMode::Replace => {
                remove_if_exists(task.path())?;
                Ok(TaskRef::new(task.name(), TaskState::Done, output))
            }
            OutputMode::Side => self.transition(task, TaskState::Done),
        }
    }

    /// Removes a half-written output of `task`, if any.
    pub fn discard_partial(&self, task: &TaskRef, plan: CommitPlan) -> Result<(), PipelineError> {
        remove_if_exists(&staging_path(&self.output_path(task, plan)))?;
        Ok(())
    }
}

/// Non-staging regular files in `dir`, sorted. A missing directory is empty.
pub(crate) fn list_task_names(dir: &Path) -> Result<Vec<String>, PipelineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.at(dir)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_staging_name(&name) || !entry.file_type().at(dir)?.is_file() {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use std::collections::BTreeMap;

    const REPLACE: CommitPlan = CommitPlan {
        mode: OutputMode::Replace,
        format: OutputFormat::Text,
    };
    const SIDE_JSON: CommitPlan = CommitPlan {
        mode: OutputMode::Side,
        format: OutputFormat::Json,
    };

    fn setup(root: &Path) -> (Workspace, TaskQueue) {
        let ws = Workspace::at(root, "ch1", &["discovery", "translation"]);
        ws.create().unwrap();
        let queue = TaskQueue::new(ws.stage(0).unwrap());
        (ws, queue)
    }

    fn put(queue: &TaskQueue, state: TaskState, name: &str, body: &str) {
        fs::write(queue.stage().state_dir(state).join(name), body).unwrap();
    }

    /// Task name -> every state directory it appears in.
    fn snapshot(queue: &TaskQueue) -> BTreeMap<String, Vec<TaskState>> {
        let mut seen: BTreeMap<String, Vec<TaskState>> = BTreeMap::new();
        for state in TaskState::ALL {
            for task in queue.list(state).unwrap() {
                seen.entry(task.name().to_string()).or_default().push(state);
            }
        }
        seen
    }

    #[test]
    fn list_is_lexical_and_skips_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        put(&queue, TaskState::Pending, "part_0002.txt", "b");
        put(&queue, TaskState::Pending, "part_0001.txt", "a");
        put(&queue, TaskState::Pending, ".part_0003.txt.partial", "c");

        let names: Vec<_> = queue
            .list_pending()
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["part_0001.txt", "part_0002.txt"]);
    }

    #[test]
    fn transition_moves_and_reports_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        put(&queue, TaskState::Pending, "part_0001.txt", "a");

        let task = queue.list_pending().unwrap().remove(0);
        let moved = queue.transition(&task, TaskState::InProgress).unwrap();

        assert_eq!(moved.state(), TaskState::InProgress);
        assert_eq!(fs::read_to_string(moved.path()).unwrap(), "a");
        assert_eq!(queue.locate("part_0001.txt"), Some(TaskState::InProgress));

        // the old handle is stale now
        assert!(matches!(
            queue.transition(&task, TaskState::InProgress),
            Err(PipelineError::TaskNotFound(_))
        ));
    }

    #[test]
    fn requeue_moves_orphans_back_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        put(&queue, TaskState::InProgress, "part_0001.txt", "a");
        put(&queue, TaskState::Failed, "part_0002.txt", "b");
        put(&queue, TaskState::Done, "part_0003.txt", "c");

        assert_eq!(queue.requeue().unwrap(), 2);
        let counts = queue.counts().unwrap();
        assert_eq!((counts.pending, counts.in_progress, counts.failed, counts.done), (2, 0, 0, 1));

        let before = snapshot(&queue);
        assert_eq!(queue.requeue().unwrap(), 0);
        assert_eq!(snapshot(&queue), before);
    }

    #[test]
    fn requeue_on_empty_stage_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        assert_eq!(queue.requeue().unwrap(), 0);
        assert_eq!(queue.counts().unwrap(), StateCounts::default());
    }

    #[test]
    fn requeue_drops_in_progress_copy_of_committed_task() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        // crash between "output renamed into done" and "in_progress removed"
        put(&queue, TaskState::Done, "part_0001.txt", "translated");
        put(&queue, TaskState::InProgress, "part_0001.txt", "source");
        put(&queue, TaskState::Done, ".part_0002.txt.partial", "half");

        assert_eq!(queue.requeue().unwrap(), 0);

        let snap = snapshot(&queue);
        assert_eq!(snap["part_0001.txt"], vec![TaskState::Done]);
        assert!(!queue.stage().state_dir(TaskState::Done).join(".part_0002.txt.partial").exists());
    }

    #[test]
    fn forward_copies_and_skips_known_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let (ws, _queue) = setup(dir.path());
        let upstream = TaskQueue::new(ws.stage(0).unwrap());
        let downstream = TaskQueue::new(ws.stage(1).unwrap());
        put(&upstream, TaskState::Done, "part_0001.txt", "a");
        put(&upstream, TaskState::Done, "part_0002.txt", "b");
        put(&downstream, TaskState::Failed, "part_0002.txt", "b");

        let done_dir = ws.stage(0).unwrap().state_dir(TaskState::Done);
        assert_eq!(downstream.forward_from(&done_dir).unwrap(), 1);
        assert_eq!(downstream.forward_from(&done_dir).unwrap(), 0);

        // copy, not move: upstream history stays
        assert_eq!(upstream.counts().unwrap().done, 2);
        assert_eq!(downstream.locate("part_0001.txt"), Some(TaskState::Pending));
        assert_eq!(downstream.locate("part_0002.txt"), Some(TaskState::Failed));
    }

    #[test]
    fn replace_commit_makes_output_the_done_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        put(&queue, TaskState::InProgress, "part_0001.txt", "source");
        let task = queue.list(TaskState::InProgress).unwrap().remove(0);

        let done = queue.commit(&task, b"translated", REPLACE).unwrap();

        assert_eq!(done.state(), TaskState::Done);
        assert_eq!(fs::read_to_string(done.path()).unwrap(), "translated");
        assert_eq!(snapshot(&queue)["part_0001.txt"], vec![TaskState::Done]);
    }

    #[test]
    fn side_commit_keeps_task_content_and_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        put(&queue, TaskState::InProgress, "part_0001.txt", "source");
        let task = queue.list(TaskState::InProgress).unwrap().remove(0);

        let done = queue.commit(&task, b"[]", SIDE_JSON).unwrap();

        assert_eq!(fs::read_to_string(done.path()).unwrap(), "source");
        let output = queue.stage().outputs_dir().join("part_0001.json");
        assert_eq!(fs::read_to_string(output).unwrap(), "[]");
    }

    #[test]
    fn discard_partial_removes_staging_output() {
        let dir = tempfile::tempdir().unwrap();
        let (_ws, queue) = setup(dir.path());
        put(&queue, TaskState::InProgress, "part_0001.txt", "source");
        let task = queue.list(TaskState::InProgress).unwrap().remove(0);
        let partial = staging_path(&queue.output_path(&task, SIDE_JSON));
        fs::write(&partial, "{").unwrap();

        queue.discard_partial(&task, SIDE_JSON).unwrap();
        assert!(!partial.exists());
    }
}
