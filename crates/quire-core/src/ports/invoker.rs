//! Invoker port: how a task becomes an external process.
//!
//! The pool never looks inside an [`Invocation`]; it spawns it, feeds it stdin,
//! and observes the exit status and captured streams.

use std::process::Stdio;

use tokio::process::Command;

use crate::config::StageSpec;
use crate::domain::TaskRef;
use crate::error::PipelineError;

/// A fully prepared external command for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl Invocation {
    /// `program` is looked up on `PATH` when it has no separator.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
        }
    }

    /// Feeds `input` to the process's stdin, then closes it.
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command with stdout/stderr captured. The child is killed if its handle
    /// is dropped, which is what enforces per-task timeouts and interrupts.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Prepares the invocation for one task of one stage.
///
/// Called from the pool's control loop for every dispatch; must not block.
pub trait Invoker: Send + Sync {
    fn prepare(&self, task: &TaskRef, content: &str) -> Result<Invocation, PipelineError>;
}

/// Builds a stage's [`Invoker`] when the stage starts.
///
/// Shared resources are read here, once per stage, so every worker of the
/// stage sees the same glossary snapshot.
pub trait InvokerFactory: Send + Sync {
    fn for_stage(&self, stage: &StageSpec) -> Result<Box<dyn Invoker>, PipelineError>;
}
