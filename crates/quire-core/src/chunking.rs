//! Splits a source document into chunk files, the initial tasks of a run.
//!
//! Cuts prefer scene boundaries, then paragraph breaks that do not separate a
//! line from the dialogue that follows it.

use std::fs;
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::error::{IoResultExt, PipelineError};
use crate::workspace::Workspace;

/// File name of the `n`th chunk, 1-based.
///
/// Zero padded so that lexical order equals document order.
pub fn chunk_name(n: usize) -> String {
    format!("part_{n:04}.txt")
}

fn is_scene_marker(line: &str) -> bool {
    matches!(line.trim(), "[]" | "---")
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_dialogue_start(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('「') || line.starts_with('『')
}

fn char_len(lines: &[&str]) -> usize {
    lines.iter().map(|l| l.chars().count()).sum()
}

/// Index of the line after which the buffer should be cut, if any.
fn preferred_cut(buffer: &[&str]) -> Option<usize> {
    for j in (0..buffer.len()).rev() {
        if is_scene_marker(buffer[j]) {
            return Some(j);
        }
        if is_blank(buffer[j]) {
            let next = buffer[j + 1..].iter().find(|l| !is_blank(l));
            if !next.is_some_and(|l| is_dialogue_start(l)) {
                return Some(j);
            }
        }
    }
    None
}

/// Splits `text` into chunks of roughly `target_chunk_size` characters.
///
/// Line terminators are preserved, so concatenating the chunks gives back the
/// input. A chunk only exceeds `max_part_chars` when there is no blank line to
/// cut at.
pub fn split_text(text: &str, sizes: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut chars = 0;

    for line in text.split_inclusive('\n') {
        buffer.push(line);
        chars += line.chars().count();
        if chars < sizes.target_chunk_size {
            continue;
        }

        let cut = preferred_cut(&buffer).or_else(|| {
            if chars >= sizes.max_part_chars {
                buffer.iter().rposition(|l| is_blank(l))
            } else {
                None
            }
        });
        match cut {
            Some(j) => {
                let rest = buffer.split_off(j + 1);
                chunks.push(buffer.concat());
                buffer = rest;
                chars = char_len(&buffer);
            }
            None if chars >= sizes.max_part_chars => {
                chunks.push(buffer.concat());
                buffer.clear();
                chars = 0;
            }
            None => {}
        }
    }
    if !buffer.is_empty() {
        chunks.push(buffer.concat());
    }
    chunks
}

/// Writes the chunks of `source_file` into the workspace's `source/`.
///
/// The chunks are written into a staging directory first and renamed into
/// place, so `source/` either holds the complete set or does not exist. When
/// it already exists nothing is read or written. Returns the number of chunks
/// in `source/`.
pub fn chunk_source(
    workspace: &Workspace,
    source_file: &Path,
    sizes: &ChunkingConfig,
) -> Result<usize, PipelineError> {
    let source_dir = workspace.source_dir();
    if source_dir.is_dir() {
        let existing = crate::queue::list_task_names(&source_dir)?.len();
        tracing::info!(chunks = existing, "source already chunked, skipping split");
        return Ok(existing);
    }

    let text = fs::read_to_string(source_file).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::MissingResource(source_file.to_path_buf()),
        _ => PipelineError::io(source_file, e),
    })?;
    let chunks = split_text(&text, sizes);

    let staging = workspace.source_staging_dir();
    if staging.exists() {
        fs::remove_dir_all(&staging).at(&staging)?;
    }
    fs::create_dir_all(&staging).at(&staging)?;
    for (i, chunk) in chunks.iter().enumerate() {
        let path = staging.join(chunk_name(i + 1));
        fs::write(&path, chunk).at(&path)?;
        tracing::debug!(part = i + 1, chars = chunk.chars().count(), "wrote chunk");
    }
    fs::rename(&staging, &source_dir).at(&source_dir)?;

    tracing::info!(
        chunks = chunks.len(),
        source = %source_file.display(),
        "split source into chunks"
    );
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sizes(target: usize, max: usize) -> ChunkingConfig {
        ChunkingConfig {
            target_chunk_size: target,
            max_part_chars: max,
        }
    }

    #[test]
    fn chunk_names_sort_numerically() {
        let mut names: Vec<_> = [10, 2, 1].into_iter().map(chunk_name).collect();
        names.sort();
        assert_eq!(names, ["part_0001.txt", "part_0002.txt", "part_0010.txt"]);
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("one\ntwo\n", &sizes(100, 200));
        assert_eq!(chunks, ["one\ntwo\n"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_text("", &sizes(10, 20)).is_empty());
    }

    #[test]
    fn cuts_after_scene_marker() {
        let text = "aaaa\n---\nbbbb\ncccc\n";
        let chunks = split_text(text, &sizes(12, 100));
        assert_eq!(chunks, ["aaaa\n---\n", "bbbb\ncccc\n"]);
    }

    #[test]
    fn blank_line_before_dialogue_is_not_a_cut() {
        // the only blank line introduces dialogue, so the earlier scene marker wins
        let text = "aaaa\n[]\nbbbb\n\n「cccc」\n";
        let chunks = split_text(text, &sizes(20, 100));
        assert_eq!(chunks, ["aaaa\n[]\n", "bbbb\n\n「cccc」\n"]);
    }

    #[test]
    fn oversized_buffer_without_cut_point_is_flushed() {
        let text = "aaaaaaaaaa\nbbbbbbbbbb\ncccc\n";
        let chunks = split_text(text, &sizes(5, 15));
        assert_eq!(chunks, ["aaaaaaaaaa\nbbbbbbbbbb\n", "cccc\n"]);
    }

    #[rstest]
    #[case(sizes(10, 20))]
    #[case(sizes(50, 60))]
    #[case(sizes(3000, 5000))]
    fn chunks_reassemble_into_the_input(#[case] sizes: ChunkingConfig) {
        let text = "序章\n\n「やあ」\n\n彼は言った。\n---\n次の場面。\n\n『手紙』\nend";
        assert_eq!(split_text(text, &sizes).concat(), text);
    }

    #[test]
    fn chunk_source_publishes_complete_directory_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter.txt");
        fs::write(&source, "aaaa\n---\nbbbb\n---\ncccc\n").unwrap();
        let ws = Workspace::at(&dir.path().join("ws"), "ch1", &["translation"]);
        ws.create().unwrap();

        assert_eq!(chunk_source(&ws, &source, &sizes(6, 100)).unwrap(), 3);
        assert!(!ws.source_staging_dir().exists());
        assert_eq!(
            fs::read_to_string(ws.source_dir().join("part_0002.txt")).unwrap(),
            "bbbb\n---\n"
        );

        // a second call reuses the existing chunks even if the source changed
        fs::write(&source, "different").unwrap();
        assert_eq!(chunk_source(&ws, &source, &sizes(6, 100)).unwrap(), 3);
    }

    #[test]
    fn leftover_staging_directory_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter.txt");
        fs::write(&source, "only\n").unwrap();
        let ws = Workspace::at(dir.path(), "ch1", &["translation"]);
        ws.create().unwrap();
        fs::create_dir_all(ws.source_staging_dir()).unwrap();
        fs::write(ws.source_staging_dir().join("part_0009.txt"), "stale").unwrap();

        assert_eq!(chunk_source(&ws, &source, &sizes(100, 200)).unwrap(), 1);
        assert!(!ws.source_dir().join("part_0009.txt").exists());
    }
}
