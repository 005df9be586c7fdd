//! quire-core
//!
//! Crash-safe orchestration of multi-stage chunk pipelines: a document is split
//! into chunks, and every chunk passes through an ordered list of stages, each
//! stage running an external worker process per chunk.
//!
//! # Modules
//! - **domain**: ids, task/stage state, worker outcomes, glossary
//! - **ports**: seams to the outside (Clock, IdGenerator, Invoker, StageAggregator, TermReviewer)
//! - **workspace**: on-disk layout, lock, checkpoints
//! - **queue**: file-per-task queue with rename transitions
//! - **chunking**: source document -> initial tasks
//! - **app**: pipeline builder, stage controller, worker pool, recovery
//! - **impls**: worker command, glossary aggregation, term review
//! - **config** / **error** / **observability**: the ambient pieces

pub mod app;
pub mod chunking;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod workspace;

pub use crate::app::{Pipeline, PipelineBuilder, RunOptions, RunSummary};
pub use crate::config::PipelineConfig;
pub use crate::error::{ErrorKind, PipelineError};
