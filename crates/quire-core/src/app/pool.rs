//! Worker pool: runs one stage's tasks as external processes, at most
//! `max_workers` at a time.
//!
//! The control loop is the only code that touches the queue. Spawned tasks
//! own nothing but their child process; they report a [`WorkerOutcome`] and
//! the loop applies it. The loop blocks on whichever worker finishes first,
//! so there is no polling interval.

use std::collections::VecDeque;
use std::fs;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::domain::{TaskRef, TaskState, WorkerId, WorkerOutcome};
use crate::error::PipelineError;
use crate::ports::{IdGenerator, Invoker};
use crate::queue::{CommitPlan, TaskQueue};

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_workers: usize,
    /// Kill the worker and fail the task after this long.
    pub timeout: Option<Duration>,
    pub commit: CommitPlan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Highest number of workers alive at the same time.
    pub peak_in_flight: usize,
}

impl PoolReport {
    /// Every task reached Done.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }
}

/// What a finished worker hands back to the control loop.
struct Completion {
    task: TaskRef,
    worker: WorkerId,
    elapsed: Duration,
    outcome: WorkerOutcome,
}

/// Runs `tasks` (Pending, in the given order) to completion.
///
/// Task-local problems (the invocation cannot be prepared or spawned, the
/// worker exits nonzero, times out, or is lost) move that task to Failed and
/// the pool carries on. Only queue bookkeeping errors abort the pool, and they
/// leave the remaining tasks where they are for the next resume.
pub async fn run_pool(
    queue: &TaskQueue,
    tasks: Vec<TaskRef>,
    options: &PoolOptions,
    invoker: &dyn Invoker,
    ids: &dyn IdGenerator,
) -> Result<PoolReport, PipelineError> {
    let max_workers = options.max_workers.max(1);
    let mut backlog: VecDeque<TaskRef> = tasks.into();
    let mut running: JoinSet<Completion> = JoinSet::new();
    let mut report = PoolReport {
        total: backlog.len(),
        ..PoolReport::default()
    };

    tracing::info!(
        stage = %queue.stage().name(),
        tasks = report.total,
        max_workers,
        "starting worker pool"
    );

    loop {
        while running.len() < max_workers
            && let Some(task) = backlog.pop_front()
        {
            if !dispatch(queue, task, options, invoker, ids, &mut running)? {
                report.failed += 1;
            }
            report.peak_in_flight = report.peak_in_flight.max(running.len());
        }

        let Some(joined) = running.join_next().await else {
            break;
        };
        let completion = joined.map_err(|e| PipelineError::Join(e.to_string()))?;
        if settle(queue, completion, options.commit)? {
            report.succeeded += 1;
        } else {
            report.failed += 1;
        }
    }

    tracing::info!(
        stage = %queue.stage().name(),
        succeeded = report.succeeded,
        failed = report.failed,
        "worker pool drained"
    );
    Ok(report)
}

/// Claims `task` and starts its worker. Returns `false` when the task failed
/// before a process was running.
fn dispatch(
    queue: &TaskQueue,
    task: TaskRef,
    options: &PoolOptions,
    invoker: &dyn Invoker,
    ids: &dyn IdGenerator,
    running: &mut JoinSet<Completion>,
) -> Result<bool, PipelineError> {
    let task = queue.transition(&task, TaskState::InProgress)?;
    let worker = ids.generate_worker_id();

    let (child, stdin) = match launch(&task, invoker) {
        Ok(spawned) => spawned,
        Err(reason) => {
            let err = PipelineError::Dispatch {
                task: task.name().to_string(),
                reason,
            };
            tracing::warn!(worker = %worker.short(), error = %err, "dispatch failed");
            queue.transition(&task, TaskState::Failed)?;
            return Ok(false);
        }
    };

    tracing::info!(
        worker = %worker.short(),
        task = %task.name(),
        pid = child.id(),
        "dispatched"
    );
    let span = tracing::info_span!("worker", id = %worker.short(), task = %task.name());
    let timeout = options.timeout;
    running.spawn(
        async move {
            let started = Instant::now();
            let outcome = supervise(child, stdin, timeout).await;
            Completion {
                task,
                worker,
                elapsed: started.elapsed(),
                outcome,
            }
        }
        .instrument(span),
    );
    Ok(true)
}

fn launch(task: &TaskRef, invoker: &dyn Invoker) -> Result<(Child, Option<String>), String> {
    let content = fs::read_to_string(task.path()).map_err(|e| e.to_string())?;
    let invocation = invoker.prepare(task, &content).map_err(|e| e.to_string())?;
    let child = invocation
        .command()
        .spawn()
        .map_err(|e| format!("spawn {}: {e}", invocation.program))?;
    Ok((child, invocation.stdin))
}

/// Applies a worker's outcome to the queue. Returns whether the task is Done.
fn settle(
    queue: &TaskQueue,
    completion: Completion,
    plan: CommitPlan,
) -> Result<bool, PipelineError> {
    let Completion {
        task,
        worker,
        elapsed,
        outcome,
    } = completion;

    if let WorkerOutcome::Succeeded { stdout } = &outcome {
        // a failed commit is a filesystem problem, not the worker's; the task
        // stays InProgress for the next resume
        let done = queue.commit(&task, stdout, plan)?;
        tracing::info!(
            worker = %worker.short(),
            task = %done.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            bytes = stdout.len(),
            "task done"
        );
        return Ok(true);
    }

    let failure = outcome.diagnostic().unwrap_or_default();
    tracing::warn!(
        worker = %worker.short(),
        task = %task.name(),
        elapsed_ms = elapsed.as_millis() as u64,
        "task failed: {failure}"
    );
    queue.discard_partial(&task, plan)?;
    queue.transition(&task, TaskState::Failed)?;
    Ok(false)
}

/// Feeds stdin and waits for exit, within `timeout` if set.
///
/// Dropping the wait future drops the child, and the child was spawned with
/// `kill_on_drop`, so a timeout kills the process.
async fn supervise(mut child: Child, stdin: Option<String>, timeout: Option<Duration>) -> WorkerOutcome {
    let pipe = child.stdin.take();
    let feed = async move {
        if let (Some(mut pipe), Some(input)) = (pipe, stdin) {
            // a worker that exits without reading its input reports that itself
            let _ = pipe.write_all(input.as_bytes()).await;
            let _ = pipe.shutdown().await;
        }
    };
    let wait = async move {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(output) => output,
            Err(_) => return WorkerOutcome::TimedOut { after: limit },
        },
        None => wait.await,
    };

    match output {
        Ok(output) if output.status.success() => WorkerOutcome::Succeeded {
            stdout: output.stdout,
        },
        Ok(output) => WorkerOutcome::Exited {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => WorkerOutcome::Lost {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::ShellInvoker;
    use crate::config::{OutputFormat, OutputMode};
    use crate::ports::{Invocation, SystemClock, UlidGenerator};
    use crate::workspace::Workspace;
    use std::path::Path;

    const UPPERCASE: &str = "tr a-z A-Z";

    fn options(max_workers: usize, timeout: Option<Duration>) -> PoolOptions {
        PoolOptions {
            max_workers,
            timeout,
            commit: CommitPlan {
                mode: OutputMode::Replace,
                format: OutputFormat::Text,
            },
        }
    }

    fn seeded(root: &Path, bodies: &[&str]) -> TaskQueue {
        let ws = Workspace::at(root, "ch1", &["translation"]);
        ws.create().unwrap();
        let queue = TaskQueue::new(ws.stage(0).unwrap());
        for (i, body) in bodies.iter().enumerate() {
            let name = crate::chunking::chunk_name(i + 1);
            fs::write(queue.stage().state_dir(TaskState::Pending).join(name), body).unwrap();
        }
        queue
    }

    #[tokio::test]
    async fn all_tasks_succeed_and_land_in_done() {
        let dir = tempfile::tempdir().unwrap();
        let queue = seeded(dir.path(), &["alpha", "beta", "gamma"]);
        let invoker = ShellInvoker::new(UPPERCASE);
        let ids = UlidGenerator::new(SystemClock);

        let report = run_pool(&queue, queue.list_pending().unwrap(), &options(2, None), &invoker, &ids)
            .await
            .unwrap();

        assert!(report.all_succeeded());
        assert_eq!(report.succeeded, 3);
        let counts = queue.counts().unwrap();
        assert_eq!((counts.pending, counts.in_progress, counts.done), (0, 0, 3));
        let done = queue.stage().state_dir(TaskState::Done).join("part_0002.txt");
        assert_eq!(fs::read_to_string(done).unwrap(), "BETA");
    }

    #[tokio::test]
    async fn never_more_than_max_workers_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let queue = seeded(dir.path(), &["a", "b", "c", "d", "e"]);
        let invoker = ShellInvoker::new("sleep 0.2; cat");
        let ids = UlidGenerator::new(SystemClock);

        let started = Instant::now();
        let report = run_pool(&queue, queue.list_pending().unwrap(), &options(2, None), &invoker, &ids)
            .await
            .unwrap();

        assert_eq!(report.peak_in_flight, 2);
        assert_eq!(report.succeeded, 5);
        assert_eq!(invoker.calls(), 5);
        // five 200ms jobs two at a time take at least three rounds
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let queue = seeded(dir.path(), &["ok one", "bad two", "ok three"]);
        let invoker = ShellInvoker::new(
            r#"input=$(cat); case "$input" in *bad*) echo "refused" >&2; exit 3;; esac; printf '%s' "$input""#,
        );
        let ids = UlidGenerator::new(SystemClock);

        let report = run_pool(&queue, queue.list_pending().unwrap(), &options(3, None), &invoker, &ids)
            .await
            .unwrap();

        assert!(!report.all_succeeded());
        assert_eq!((report.succeeded, report.failed), (2, 1));
        assert_eq!(queue.locate("part_0002.txt"), Some(TaskState::Failed));
        // the failed task keeps its original content for the retry
        let failed = queue.stage().state_dir(TaskState::Failed).join("part_0002.txt");
        assert_eq!(fs::read_to_string(failed).unwrap(), "bad two");
        assert_eq!(queue.counts().unwrap().in_progress, 0);
    }

    #[tokio::test]
    async fn hung_worker_is_killed_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = seeded(dir.path(), &["slow"]);
        let invoker = ShellInvoker::new("sleep 30");
        let ids = UlidGenerator::new(SystemClock);

        let started = Instant::now();
        let report = run_pool(
            &queue,
            queue.list_pending().unwrap(),
            &options(1, Some(Duration::from_millis(200))),
            &invoker,
            &ids,
        )
        .await
        .unwrap();

        assert_eq!(report.failed, 1);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(queue.locate("part_0001.txt"), Some(TaskState::Failed));
    }

    struct Unlaunchable;

    impl Invoker for Unlaunchable {
        fn prepare(&self, task: &TaskRef, _content: &str) -> Result<Invocation, PipelineError> {
            if task.name() == "part_0001.txt" {
                return Err(PipelineError::Config("template unreadable".to_string()));
            }
            Ok(Invocation::new("/nonexistent/quire-worker", Vec::new()))
        }
    }

    #[tokio::test]
    async fn dispatch_errors_fail_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let queue = seeded(dir.path(), &["a", "b"]);
        let ids = UlidGenerator::new(SystemClock);

        let report = run_pool(&queue, queue.list_pending().unwrap(), &options(2, None), &Unlaunchable, &ids)
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed), (0, 2));
        assert_eq!(report.peak_in_flight, 0);
        assert_eq!(queue.counts().unwrap().failed, 2);
    }

    #[tokio::test]
    async fn empty_task_list_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = seeded(dir.path(), &[]);
        let ids = UlidGenerator::new(SystemClock);

        let report = run_pool(&queue, Vec::new(), &options(2, None), &Unlaunchable, &ids)
            .await
            .unwrap();
        assert_eq!(report, PoolReport::default());
        assert!(report.all_succeeded());
    }
}
