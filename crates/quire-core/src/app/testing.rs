//! Test doubles shared by the app-layer tests.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::{Aggregation, OutputFormat, OutputMode, PipelineConfig, StageSpec, WorkerConfig};
use crate::domain::TaskRef;
use crate::error::PipelineError;
use crate::ports::{Invocation, Invoker, InvokerFactory, StageAggregator};
use crate::workspace::StagePaths;

/// Runs `sh -c <script>` with the task content on stdin.
pub(crate) struct ShellInvoker {
    script: String,
    calls: Arc<AtomicUsize>,
}

impl ShellInvoker {
    pub(crate) fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Invoker for ShellInvoker {
    fn prepare(&self, _task: &TaskRef, content: &str) -> Result<Invocation, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Invocation::new("sh", vec!["-c".to_string(), self.script.clone()]).with_stdin(content))
    }
}

/// One shell script per stage name; counts invocations across all stages.
#[derive(Default)]
pub(crate) struct ShellFactory {
    scripts: HashMap<String, String>,
    calls: Arc<AtomicUsize>,
}

impl ShellFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stage(mut self, name: &str, script: &str) -> Self {
        self.scripts.insert(name.to_string(), script.to_string());
        self
    }

    /// Shared invocation counter; stays readable after the factory is moved
    /// into a pipeline.
    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl InvokerFactory for ShellFactory {
    fn for_stage(&self, stage: &StageSpec) -> Result<Box<dyn Invoker>, PipelineError> {
        let script = self
            .scripts
            .get(&stage.name)
            .ok_or_else(|| PipelineError::Config(format!("no script for stage '{}'", stage.name)))?;
        Ok(Box::new(ShellInvoker {
            script: script.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

/// Aggregator that only counts how often it ran.
#[derive(Default)]
pub(crate) struct CountingAggregator {
    pub(crate) runs: AtomicUsize,
}

#[async_trait]
impl StageAggregator for CountingAggregator {
    async fn aggregate(&self, _stage: &StagePaths) -> Result<(), PipelineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Two replace stages, `first` and `second`, rooted at `root`.
pub(crate) fn two_stage_config(root: &Path) -> PipelineConfig {
    let stage = |name: &str| StageSpec {
        name: name.to_string(),
        template: root.join(format!("{name}.txt")),
        format: OutputFormat::Text,
        output: OutputMode::Replace,
        uses: Vec::new(),
        aggregate: Aggregation::None,
    };
    let mut config = PipelineConfig::default_translation();
    config.workspace_dir = root.join("workspace");
    config.output_dir = root.join("output");
    config.max_concurrent_workers = 2;
    config.task_timeout_secs = Some(30);
    config.resources.glossary = root.join("glossary.json");
    config.resources.style_guide = None;
    config.worker = WorkerConfig {
        program: "sh".to_string(),
        args: Vec::new(),
        prompt_via_stdin: true,
    };
    config.stages = vec![stage("first"), stage("second")];
    for spec in &config.stages {
        fs::write(&spec.template, "{text}").unwrap();
    }
    config
}
