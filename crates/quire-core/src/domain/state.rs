//! Task and stage state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a task currently lives.
///
/// The state is physical: it is the name of the directory holding the task's
/// file. Transitions:
/// - Pending -> InProgress -> Done
/// - Pending -> InProgress -> Failed
/// - InProgress | Failed -> Pending (requeue on resume)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Failed,
    Done,
}

impl TaskState {
    /// Every state, in lifecycle order.
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::InProgress,
        TaskState::Failed,
        TaskState::Done,
    ];

    /// Directory name backing this state.
    pub fn dir_name(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Failed => "failed",
            TaskState::Done => "done",
        }
    }

    /// States a resume moves back to Pending.
    pub fn is_orphan(self) -> bool {
        matches!(self, TaskState::InProgress | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Progress of one stage within a workspace.
///
/// - NotStarted: no checkpoint, no tasks yet
/// - Running: no checkpoint, tasks present in some state directory
/// - Checkpointed: terminal for the workspace's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    Running,
    Checkpointed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_names_are_distinct() {
        let mut names: Vec<_> = TaskState::ALL.iter().map(|s| s.dir_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TaskState::ALL.len());
    }

    #[test]
    fn only_in_progress_and_failed_are_orphans() {
        assert!(TaskState::InProgress.is_orphan());
        assert!(TaskState::Failed.is_orphan());
        assert!(!TaskState::Pending.is_orphan());
        assert!(!TaskState::Done.is_orphan());
    }

    #[test]
    fn serializes_snake_case() {
        let s = serde_json::to_string(&TaskState::InProgress).unwrap();
        assert_eq!(s, "\"in_progress\"");
        let s = serde_json::to_string(&StageStatus::NotStarted).unwrap();
        assert_eq!(s, "\"not_started\"");
    }
}
