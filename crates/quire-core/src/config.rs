//! Typed pipeline configuration, loaded from a JSON file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::GlossaryRules;
use crate::error::{IoResultExt, PipelineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Parent of every per-unit workspace.
    pub workspace_dir: PathBuf,

    /// Where assembled results are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name of the assembled result; `{unit}` is replaced by the unit name.
    #[serde(default = "default_output_name")]
    pub output_name: String,

    #[serde(default = "default_max_workers")]
    pub max_concurrent_workers: usize,

    /// Kill a worker and fail its task after this long. No limit when absent.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub resources: ResourceConfig,

    #[serde(default)]
    pub glossary: GlossaryRules,

    pub worker: WorkerConfig,

    pub stages: Vec<StageSpec>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_output_name() -> String {
    "{unit}_translated.txt".to_string()
}

fn default_max_workers() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chunk_size")]
    pub target_chunk_size: usize,
    #[serde(default = "default_max_part_chars")]
    pub max_part_chars: usize,
}

fn default_target_chunk_size() -> usize {
    3000
}

fn default_max_part_chars() -> usize {
    5000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: default_target_chunk_size(),
            max_part_chars: default_max_part_chars(),
        }
    }
}

/// Shared read-only inputs fed to workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_glossary_path")]
    pub glossary: PathBuf,
    #[serde(default)]
    pub style_guide: Option<PathBuf>,
}

fn default_glossary_path() -> PathBuf {
    PathBuf::from("data/glossary.json")
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            glossary: default_glossary_path(),
            style_guide: None,
        }
    }
}

/// The external worker command.
///
/// `args` may contain `{prompt}` and `{format}` placeholders. With
/// `prompt_via_stdin` the rendered prompt is piped to the process instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub prompt_via_stdin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Value substituted for `{format}` in worker args.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        }
    }

    /// File extension of side outputs.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }
}

/// What a successful worker's stdout becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The task's Done content; the next stage consumes it.
    Replace,
    /// A side output in the stage's `outputs/`; the task content passes through.
    Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedResource {
    Glossary,
    StyleGuide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    None,
    /// Merge discovered terms into the glossary after review.
    Glossary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub template: PathBuf,
    pub format: OutputFormat,
    pub output: OutputMode,
    #[serde(default)]
    pub uses: Vec<SharedResource>,
    #[serde(default)]
    pub aggregate: Aggregation,
}

impl StageSpec {
    /// Whether the stage's prompt embeds `resource`.
    pub fn uses(&self, resource: SharedResource) -> bool {
        self.uses.contains(&resource)
    }
}

impl PipelineConfig {
    /// Reads, resolves relative paths against the file's directory, and
    /// validates.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::MissingResource(path.to_path_buf()),
            _ => PipelineError::io(path, e),
        })?;
        let mut config: PipelineConfig = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Config(format!("{}: {e}", path.display()))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Default three-stage translation pipeline driving the `gemini` CLI.
    pub fn default_translation() -> Self {
        let text_stage = |name: &str, template: &str| StageSpec {
            name: name.to_string(),
            template: PathBuf::from(template),
            format: OutputFormat::Text,
            output: OutputMode::Replace,
            uses: vec![SharedResource::Glossary, SharedResource::StyleGuide],
            aggregate: Aggregation::None,
        };
        Self {
            workspace_dir: PathBuf::from("workspace"),
            output_dir: default_output_dir(),
            output_name: default_output_name(),
            max_concurrent_workers: default_max_workers(),
            task_timeout_secs: Some(900),
            chunking: ChunkingConfig::default(),
            resources: ResourceConfig {
                glossary: default_glossary_path(),
                style_guide: Some(PathBuf::from("data/style_guide.md")),
            },
            glossary: GlossaryRules::default(),
            worker: WorkerConfig {
                program: "gemini".to_string(),
                args: vec![
                    "-p".to_string(),
                    "{prompt}".to_string(),
                    "--output-format".to_string(),
                    "{format}".to_string(),
                ],
                prompt_via_stdin: false,
            },
            stages: vec![
                StageSpec {
                    name: "discovery".to_string(),
                    template: PathBuf::from("prompts/term_discovery.txt"),
                    format: OutputFormat::Json,
                    output: OutputMode::Side,
                    uses: Vec::new(),
                    aggregate: Aggregation::Glossary,
                },
                text_stage("translation", "prompts/translation.txt"),
                text_stage("proofreading", "prompts/proofreading.txt"),
            ],
        }
    }

    /// Makes every relative path absolute against `base`, usually the config
    /// file's directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.workspace_dir);
        resolve(&mut self.output_dir);
        resolve(&mut self.resources.glossary);
        if let Some(style_guide) = self.resources.style_guide.as_mut() {
            resolve(style_guide);
        }
        for stage in &mut self.stages {
            resolve(&mut stage.template);
        }
    }

    /// Per-task limit, `None` when unset.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// `output_name` with `{unit}` substituted.
    pub fn output_file_name(&self, unit: &str) -> String {
        self.output_name.replace("{unit}", unit)
    }

    /// Structural checks that need no filesystem access.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_concurrent_workers == 0 {
            return Err(PipelineError::Config(
                "max_concurrent_workers must be at least 1".to_string(),
            ));
        }
        if self.chunking.target_chunk_size == 0
            || self.chunking.max_part_chars < self.chunking.target_chunk_size
        {
            return Err(PipelineError::Config(format!(
                "chunking sizes must satisfy 0 < target_chunk_size ({}) <= max_part_chars ({})",
                self.chunking.target_chunk_size, self.chunking.max_part_chars
            )));
        }
        if self.worker.program.trim().is_empty() {
            return Err(PipelineError::Config("worker.program is empty".to_string()));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::Config("no stages configured".to_string()));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(PipelineError::Config(
                "task_timeout_secs must be positive when set".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !is_safe_stage_name(&stage.name) {
                return Err(PipelineError::Config(format!(
                    "stage name '{}' must be non-empty and use only [A-Za-z0-9_-]",
                    stage.name
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "stage '{}' is declared twice",
                    stage.name
                )));
            }
            if stage.aggregate == Aggregation::Glossary
                && (stage.output != OutputMode::Side || stage.format != OutputFormat::Json)
            {
                return Err(PipelineError::Config(format!(
                    "stage '{}' aggregates a glossary and must use output=side, format=json",
                    stage.name
                )));
            }
        }
        if self.stages.iter().all(|s| s.output == OutputMode::Side) {
            return Err(PipelineError::Config(
                "at least one stage must produce output=replace".to_string(),
            ));
        }
        Ok(())
    }

    /// Fails with the first required file that does not exist.
    ///
    /// Runs before any worker is spawned. The glossary is only required when a
    /// stage reads it and no earlier stage creates it.
    pub fn check_resources(&self) -> Result<(), PipelineError> {
        let mut glossary_produced = false;
        for stage in &self.stages {
            require_file(&stage.template)?;
            if stage.uses(SharedResource::StyleGuide) {
                match &self.resources.style_guide {
                    Some(path) => require_file(path)?,
                    None => {
                        return Err(PipelineError::Config(format!(
                            "stage '{}' uses the style guide but resources.style_guide is not set",
                            stage.name
                        )));
                    }
                }
            }
            if stage.uses(SharedResource::Glossary) && !glossary_produced {
                require_file(&self.resources.glossary)?;
            }
            if stage.aggregate == Aggregation::Glossary {
                glossary_produced = true;
            }
        }
        Ok(())
    }
}

fn is_safe_stage_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn require_file(path: &Path) -> Result<(), PipelineError> {
    let meta = fs::metadata(path).map_err(|_| PipelineError::MissingResource(path.to_path_buf()))?;
    if meta.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingResource(path.to_path_buf()))
    }
}

/// Reads a resource that [`PipelineConfig::check_resources`] already vouched for.
pub(crate) fn read_resource(path: &Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::MissingResource(path.to_path_buf()),
        _ => PipelineError::io(path, e),
    })
}

/// Writes `config` as pretty JSON, refusing to overwrite.
pub fn write_default_config(path: &Path) -> Result<(), PipelineError> {
    if path.exists() {
        return Err(PipelineError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    let json = serde_json::to_string_pretty(&PipelineConfig::default_translation())?;
    fs::write(path, json).at(path)
}
