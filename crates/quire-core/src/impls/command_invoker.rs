//! CommandWorker: renders a stage's prompt template and runs the configured
//! worker program with it.

use std::path::PathBuf;

use crate::config::{OutputFormat, PipelineConfig, SharedResource, StageSpec, WorkerConfig, read_resource};
use crate::domain::{Glossary, TaskRef};
use crate::error::PipelineError;
use crate::ports::{Invocation, Invoker, InvokerFactory};

/// Replaces `{key}` placeholders in one pass.
///
/// Substituted values are never scanned again, so a chunk that happens to
/// contain `{glossary}` is passed through literally. Unknown placeholders are
/// left as they are.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = values.iter().find(|(key, _)| {
            tail.strip_prefix('{')
                .and_then(|t| t.strip_prefix(*key))
                .is_some_and(|t| t.starts_with('}'))
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// [`InvokerFactory`] for the external worker command of a [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct CommandWorker {
    worker: WorkerConfig,
    glossary: PathBuf,
    style_guide: Option<PathBuf>,
}

impl CommandWorker {
    /// Takes the worker command and shared resource paths from `config`;
    /// files are read per stage in [`InvokerFactory::for_stage`].
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            worker: config.worker.clone(),
            glossary: config.resources.glossary.clone(),
            style_guide: config.resources.style_guide.clone(),
        }
    }
}

impl InvokerFactory for CommandWorker {
    fn for_stage(&self, stage: &StageSpec) -> Result<Box<dyn Invoker>, PipelineError> {
        let template = read_resource(&stage.template)?;
        let glossary = if stage.uses(SharedResource::Glossary) {
            Glossary::load(&self.glossary)?.to_pretty_json()?
        } else {
            String::new()
        };
        let style_guide = match (&self.style_guide, stage.uses(SharedResource::StyleGuide)) {
            (Some(path), true) => read_resource(path)?,
            (None, true) => {
                return Err(PipelineError::Config(format!(
                    "stage '{}' uses the style guide but none is configured",
                    stage.name
                )));
            }
            (_, false) => String::new(),
        };
        tracing::debug!(
            stage = %stage.name,
            glossary_bytes = glossary.len(),
            style_guide_bytes = style_guide.len(),
            "prepared stage prompt"
        );
        Ok(Box::new(StageInvoker {
            worker: self.worker.clone(),
            format: stage.format,
            template,
            glossary,
            style_guide,
        }))
    }
}

/// Shared resources are captured once per stage.
struct StageInvoker {
    worker: WorkerConfig,
    format: OutputFormat,
    template: String,
    glossary: String,
    style_guide: String,
}

impl Invoker for StageInvoker {
    fn prepare(&self, _task: &TaskRef, content: &str) -> Result<Invocation, PipelineError> {
        let prompt = render(
            &self.template,
            &[
                ("text", content),
                ("glossary", self.glossary.as_str()),
                ("style_guide", self.style_guide.as_str()),
            ],
        );
        // with stdin delivery `{prompt}` in args renders empty
        let inline_prompt = if self.worker.prompt_via_stdin { "" } else { prompt.as_str() };
        let args = self
            .worker
            .args
            .iter()
            .map(|arg| render(arg, &[("prompt", inline_prompt), ("format", self.format.as_str())]))
            .collect();

        let invocation = Invocation::new(self.worker.program.clone(), args);
        Ok(if self.worker.prompt_via_stdin {
            invocation.with_stdin(prompt)
        } else {
            invocation
        })
    }
}
