//! Workspace lock: one orchestrator per unit of work.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Workspace;
use crate::domain::RunId;
use crate::error::{IoResultExt, PipelineError};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
}

/// Holds the workspace lock; removes the lock file when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// The lock file held by this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases now and reports failures, instead of silently on drop.
    pub fn release(mut self) -> Result<(), PipelineError> {
        self.released = true;
        remove_lock(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = remove_lock(&self.path)
        {
            tracing::warn!(error = %e, "failed to release workspace lock");
        }
    }
}

fn remove_lock(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

impl Workspace {
    /// Whether a lock file exists, whoever holds it.
    pub fn is_locked(&self) -> bool {
        self.lock_path().exists()
    }

    /// Who holds the lock: the recorded pid, or the raw file contents when the
    /// file is not a lock record.
    pub fn lock_owner(&self) -> Option<String> {
        let raw = fs::read_to_string(self.lock_path()).ok()?;
        match serde_json::from_str::<LockRecord>(&raw) {
            Ok(record) => Some(record.pid.to_string()),
            Err(_) => Some(raw.trim().to_string()),
        }
    }

    /// Takes the lock.
    ///
    /// Without `takeover` the lock file is created exclusively and an existing
    /// one is reported as [`PipelineError::AlreadyLocked`]. With `takeover`
    /// (resume or forced restart) a stale lock is overwritten.
    pub fn acquire_lock(
        &self,
        takeover: bool,
        record: &LockRecord,
    ) -> Result<LockGuard, PipelineError> {
        let path = self.lock_path();
        let body = serde_json::to_vec_pretty(record)?;

        if takeover {
            fs::write(&path, &body).at(&path)?;
        } else {
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    return Err(PipelineError::AlreadyLocked {
                        path: self.base().to_path_buf(),
                        owner: self.lock_owner().unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                Err(e) => return Err(PipelineError::io(&path, e)),
            };
            file.write_all(&body).at(&path)?;
        }

        Ok(LockGuard {
            path,
            released: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record() -> LockRecord {
        LockRecord {
            pid: std::process::id(),
            run_id: RunId::from_ulid(Ulid::new()),
            started_at: Utc::now(),
        }
    }

    fn workspace(root: &Path) -> Workspace {
        let ws = Workspace::at(root, "ch1", &["translation"]);
        ws.create().unwrap();
        ws
    }

    #[test]
    fn second_acquire_without_takeover_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());

        let _guard = ws.acquire_lock(false, &record()).unwrap();
        let err = ws.acquire_lock(false, &record()).unwrap_err();

        match err {
            PipelineError::AlreadyLocked { owner, .. } => {
                assert_eq!(owner, std::process::id().to_string());
            }
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }

    #[test]
    fn guard_drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());

        {
            let _guard = ws.acquire_lock(false, &record()).unwrap();
            assert!(ws.is_locked());
        }
        assert!(!ws.is_locked());
        ws.acquire_lock(false, &record()).unwrap().release().unwrap();
        assert!(!ws.is_locked());
    }

    #[test]
    fn takeover_overwrites_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        fs::write(ws.lock_path(), "12345").unwrap();

        assert_eq!(ws.lock_owner().as_deref(), Some("12345"));
        let guard = ws.acquire_lock(true, &record()).unwrap();
        assert_eq!(ws.lock_owner(), Some(std::process::id().to_string()));
        drop(guard);
        assert!(!ws.is_locked());
    }
}
