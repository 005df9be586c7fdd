use std::path::{Path, PathBuf};

use super::TaskState;

/// A handle to a task file as last observed by the queue.
///
/// Identity is the file name (`part_0003.txt`); it never changes across
/// transitions or stages. The path is only valid while the task is in `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    name: String,
    state: TaskState,
    path: PathBuf,
}

impl TaskRef {
    /// `path` is where the file lives while in `state`.
    pub fn new(name: impl Into<String>, state: TaskState, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            state,
            path,
        }
    }

    /// File name; the task's identity across states and stages.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without its extension, used to name side outputs.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("part_0001.txt", "part_0001")]
    #[case("part.v2.txt", "part.v2")]
    #[case("noext", "noext")]
    fn stem_strips_last_extension(#[case] name: &str, #[case] stem: &str) {
        let task = TaskRef::new(name, TaskState::Pending, PathBuf::from(name));
        assert_eq!(task.stem(), stem);
    }
}
