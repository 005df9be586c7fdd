//! Impls: the concrete collaborators behind the ports.
//!
//! - **CommandWorker**: external worker command with rendered prompt templates
//! - **GlossaryAggregator**: discovery outputs -> reviewed glossary entries
//! - **AutoApprove** / **LineReviewer**: term review, non-interactive and
//!   interactive

pub mod command_invoker;
pub mod glossary_aggregator;
pub mod review;

pub use self::command_invoker::CommandWorker;
pub use self::glossary_aggregator::GlossaryAggregator;
pub use self::review::{AutoApprove, LineReviewer};
