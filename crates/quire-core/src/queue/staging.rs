//! Staging files: `.<name>.partial` siblings that become real by rename.
//!
//! Anything whose name starts with a dot is invisible to listings, so a crash
//! mid-write never produces a half-written task.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, PipelineError};

/// Dotfiles never count as tasks.
pub(crate) fn is_staging_name(name: &str) -> bool {
    name.starts_with('.')
}

/// `dir/.name.partial` for `dir/name`.
pub(crate) fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.partial"))
}

/// Writes `bytes` to `target` so that readers see either nothing or all of it.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let staging = staging_path(target);
    fs::write(&staging, bytes).at(&staging)?;
    fs::rename(&staging, target).at(target)
}

/// Copies `source` to `target` through a staging file.
pub(crate) fn copy_atomic(source: &Path, target: &Path) -> Result<(), PipelineError> {
    let staging = staging_path(target);
    fs::copy(source, &staging).at(source)?;
    fs::rename(&staging, target).at(target)
}

/// Returns whether a file was removed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

/// Removes leftover staging files in `dir`; returns how many were removed.
pub(crate) fn clear_staging(dir: &Path) -> Result<usize, PipelineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.at(dir)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_staging_name(&name) && name.ends_with(".partial") && remove_if_exists(&entry.path())? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("part_0001.txt");

        write_atomic(&target, b"hello").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn clear_staging_only_touches_partials() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".part_0001.txt.partial"), "half").unwrap();
        fs::write(dir.path().join("part_0002.txt"), "whole").unwrap();

        assert_eq!(clear_staging(dir.path()).unwrap(), 1);
        assert_eq!(clear_staging(dir.path()).unwrap(), 0);
        assert!(dir.path().join("part_0002.txt").exists());
        assert_eq!(clear_staging(&dir.path().join("missing")).unwrap(), 0);
    }
}
