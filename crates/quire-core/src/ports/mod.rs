//! Ports - the seams between the orchestration engine and its collaborators.
//!
//! - Clock / IdGenerator: time and identity, swappable in tests
//! - Invoker / InvokerFactory: turning a task into an external process
//! - StageAggregator: stage-level commit step between pool run and checkpoint
//! - TermReviewer: human confirmation of discovered glossary terms

pub mod aggregator;
pub mod clock;
pub mod id_generator;
pub mod invoker;
pub mod reviewer;

pub use self::aggregator::StageAggregator;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::invoker::{Invocation, Invoker, InvokerFactory};
pub use self::reviewer::TermReviewer;
