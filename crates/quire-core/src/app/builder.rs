//! PipelineBuilder: wires the configuration to its collaborators.
//!
//! Everything a run needs is checked here, before any workspace is touched:
//! the configuration is valid, a worker invoker is present, and every stage
//! that declares an aggregation has an aggregator for it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Aggregation, PipelineConfig, StageSpec};
use crate::error::PipelineError;
use crate::ports::{Clock, IdGenerator, InvokerFactory, StageAggregator, SystemClock, UlidGenerator};
use crate::workspace::{Workspace, check_unit_name};

/// Builds a [`Pipeline`].
///
/// ```ignore
/// let pipeline = PipelineBuilder::new(config)
///     .invoker(CommandWorker::new(&config))
///     .register_aggregator(Aggregation::Glossary, aggregator)?
///     .build()?;
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    invokers: Option<Arc<dyn InvokerFactory>>,
    aggregators: HashMap<Aggregation, Arc<dyn StageAggregator>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl PipelineBuilder {
    /// Starts from `config` with the system clock and ULID ids.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            invokers: None,
            aggregators: HashMap::new(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    /// Sets the worker invoker factory. Required.
    pub fn invoker(mut self, factory: impl InvokerFactory + 'static) -> Self {
        self.invokers = Some(Arc::new(factory));
        self
    }

    /// Registers the aggregator for one aggregation kind. Registering the
    /// same kind twice is an error.
    pub fn register_aggregator(
        mut self,
        kind: Aggregation,
        aggregator: Arc<dyn StageAggregator>,
    ) -> Result<Self, PipelineError> {
        if kind == Aggregation::None {
            return Err(PipelineError::Config(
                "cannot register an aggregator for aggregate=none".to_string(),
            ));
        }
        if self.aggregators.contains_key(&kind) {
            return Err(PipelineError::Config(format!(
                "aggregator for {kind:?} registered twice"
            )));
        }
        self.aggregators.insert(kind, aggregator);
        Ok(self)
    }

    /// Replaces the clock used for lock and checkpoint timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the run and worker id source.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Validates the configuration and the wiring.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Config`]: invalid configuration or no invoker
    /// - [`PipelineError::MissingAggregator`]: a stage aggregates with a kind
    ///   nothing was registered for
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;
        let invokers = self
            .invokers
            .ok_or_else(|| PipelineError::Config("no worker invoker configured".to_string()))?;
        if let Some(stage) = self
            .config
            .stages
            .iter()
            .find(|s| s.aggregate != Aggregation::None && !self.aggregators.contains_key(&s.aggregate))
        {
            return Err(PipelineError::MissingAggregator(stage.name.clone()));
        }
        Ok(Pipeline {
            config: self.config,
            invokers,
            aggregators: self.aggregators,
            clock: self.clock,
            ids: self.ids,
        })
    }
}

/// A validated, fully wired pipeline. Runs and status reports start here.
pub struct Pipeline {
    pub(crate) config: PipelineConfig,
    pub(crate) invokers: Arc<dyn InvokerFactory>,
    pub(crate) aggregators: HashMap<Aggregation, Arc<dyn StageAggregator>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
}

impl Pipeline {
    /// The validated configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Layout of `unit`'s workspace. Touches nothing on disk.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when `unit` is not a single plain directory
    /// name (see [`check_unit_name`]).
    pub fn workspace(&self, unit: &str) -> Result<Workspace, PipelineError> {
        check_unit_name(unit)?;
        let names: Vec<&str> = self.config.stages.iter().map(|s| s.name.as_str()).collect();
        Ok(Workspace::at(&self.config.workspace_dir, unit, &names))
    }

    pub(crate) fn aggregator_for(
        &self,
        stage: &StageSpec,
    ) -> Result<Option<&Arc<dyn StageAggregator>>, PipelineError> {
        match stage.aggregate {
            Aggregation::None => Ok(None),
            kind => self
                .aggregators
                .get(&kind)
                .map(Some)
                .ok_or_else(|| PipelineError::MissingAggregator(stage.name.clone())),
        }
    }
}

/// Unit name for a source document: its parent directory's name, or the file
/// stem when the file sits at a filesystem root (`chapters/prologue/jp.txt` is
/// `prologue`).
pub fn unit_name(source: &Path) -> Option<String> {
    source
        .parent()
        .and_then(|p| p.file_name())
        .or_else(|| source.file_stem())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{CountingAggregator, ShellFactory, two_stage_config};
    use crate::config::{OutputFormat, OutputMode};
    use rstest::rstest;
    use std::path::PathBuf;

    fn glossary_stage(config: &mut PipelineConfig) {
        config.stages[0].output = OutputMode::Side;
        config.stages[0].format = OutputFormat::Json;
        config.stages[0].aggregate = Aggregation::Glossary;
    }

    #[test]
    fn build_success() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PipelineBuilder::new(two_stage_config(dir.path()))
            .invoker(ShellFactory::new())
            .build()
            .unwrap();

        let ws = pipeline.workspace("ch1").unwrap();
        assert_eq!(ws.stages().len(), 2);
        assert_eq!(ws.base(), dir.path().join("workspace/ch1"));
    }

    #[test]
    fn build_without_invoker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = PipelineBuilder::new(two_stage_config(dir.path())).build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn build_missing_aggregator() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = two_stage_config(dir.path());
        glossary_stage(&mut config);

        let result = PipelineBuilder::new(config).invoker(ShellFactory::new()).build();
        assert!(matches!(
            result,
            Err(PipelineError::MissingAggregator(stage)) if stage == "first"
        ));
    }

    #[test]
    fn duplicate_aggregator_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = two_stage_config(dir.path());
        glossary_stage(&mut config);

        let builder = PipelineBuilder::new(config)
            .register_aggregator(Aggregation::Glossary, Arc::new(CountingAggregator::default()))
            .unwrap();
        assert!(
            builder
                .register_aggregator(Aggregation::Glossary, Arc::new(CountingAggregator::default()))
                .is_err()
        );
    }

    #[test]
    fn registered_aggregator_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = two_stage_config(dir.path());
        glossary_stage(&mut config);

        let pipeline = PipelineBuilder::new(config)
            .invoker(ShellFactory::new())
            .register_aggregator(Aggregation::Glossary, Arc::new(CountingAggregator::default()))
            .unwrap()
            .build()
            .unwrap();

        let stages = &pipeline.config().stages;
        assert!(pipeline.aggregator_for(&stages[0]).unwrap().is_some());
        assert!(pipeline.aggregator_for(&stages[1]).unwrap().is_none());
    }

    #[rstest]
    #[case("text/chapters/prologue/jp.txt", Some("prologue"))]
    #[case("jp.txt", Some("jp"))]
    #[case("/jp.txt", Some("jp"))]
    fn unit_name_prefers_parent_directory(#[case] source: &str, #[case] unit: Option<&str>) {
        assert_eq!(unit_name(&PathBuf::from(source)).as_deref(), unit);
    }
}
