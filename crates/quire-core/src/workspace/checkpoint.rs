use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StagePaths;
use crate::domain::RunId;
use crate::error::{IoResultExt, PipelineError};
use crate::queue::write_atomic;

/// Durable "this stage is finished" marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: String,
    pub run_id: RunId,
    pub completed_at: DateTime<Utc>,
    pub tasks: usize,
}

impl StagePaths {
    /// The stage's checkpoint, `None` while the stage is unfinished.
    pub fn read_checkpoint(&self) -> Result<Option<Checkpoint>, PipelineError> {
        if !self.is_checkpointed() {
            return Ok(None);
        }
        let raw = fs::read_to_string(self.checkpoint_path()).at(self.checkpoint_path())?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Writes the checkpoint unless one already exists. Returns whether it was
    /// written; an existing checkpoint is never replaced.
    pub fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool, PipelineError> {
        if self.is_checkpointed() {
            return Ok(false);
        }
        let path = self.checkpoint_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        write_atomic(path, &serde_json::to_vec_pretty(checkpoint)?)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::staging_path;
    use crate::workspace::Workspace;
    use chrono::TimeZone;
    use ulid::Ulid;

    #[test]
    fn checkpoint_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path(), "ch1", &["translation"]);
        ws.create().unwrap();
        let stage = ws.stage(0).unwrap();

        let first = Checkpoint {
            stage: "translation".to_string(),
            run_id: RunId::from_ulid(Ulid::new()),
            completed_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            tasks: 5,
        };
        let second = Checkpoint {
            tasks: 99,
            ..first.clone()
        };

        assert_eq!(stage.read_checkpoint().unwrap(), None);
        assert!(stage.write_checkpoint(&first).unwrap());
        assert!(!stage.write_checkpoint(&second).unwrap());
        assert_eq!(stage.read_checkpoint().unwrap(), Some(first));
    }

    #[test]
    fn interrupted_checkpoint_write_is_not_a_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path(), "ch1", &["translation"]);
        ws.create().unwrap();
        let stage = ws.stage(0).unwrap();
        let staging = staging_path(stage.checkpoint_path());
        fs::write(&staging, "{").unwrap();

        assert!(!stage.is_checkpointed());
        assert_eq!(stage.read_checkpoint().unwrap(), None);

        let checkpoint = Checkpoint {
            stage: "translation".to_string(),
            run_id: RunId::from_ulid(Ulid::new()),
            completed_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            tasks: 1,
        };
        assert!(stage.write_checkpoint(&checkpoint).unwrap());
        assert_eq!(stage.read_checkpoint().unwrap(), Some(checkpoint));
        assert!(!staging.exists());
    }
}
