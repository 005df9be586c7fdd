//! Domain model: ids, task/stage state, worker outcomes, glossary.

pub mod glossary;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::glossary::{DiscoveredTerm, Glossary, GlossaryEntry, GlossaryRules};
pub use self::ids::{RunId, WorkerId};
pub use self::outcome::WorkerOutcome;
pub use self::state::{StageStatus, TaskState};
pub use self::task::TaskRef;
