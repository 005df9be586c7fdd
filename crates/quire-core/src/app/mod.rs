//! Application layer: the pipeline and the control flow of a run.
//!
//! - **builder**: wiring and fail-fast validation ([`PipelineBuilder`])
//! - **recovery**: start-mode decision and the run lifetime ([`Pipeline::run`])
//! - **stages**: per-stage state machine ([`StageController`])
//! - **pool**: bounded worker pool ([`run_pool`])
//! - **collector**: final output assembly
//! - **status**: read-only workspace snapshot

pub mod builder;
pub mod collector;
pub mod pool;
pub mod recovery;
pub mod stages;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{Pipeline, PipelineBuilder, unit_name};
pub use self::pool::{PoolOptions, PoolReport, run_pool};
pub use self::recovery::{RunOptions, RunSummary, StartMode, decide_start};
pub use self::stages::{StageController, StageRun, StageSummary};
