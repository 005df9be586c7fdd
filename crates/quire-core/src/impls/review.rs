//! Term review: auto-approval and the line-oriented interactive session.
//!
//! Session commands (term numbers are 1-based, as listed):
//! - `ok` / `yes` / `y`: accept the list as shown
//! - `del 1 3`: drop terms 1 and 3
//! - `edit 2`: change the translation and note of term 2
//! - `quit` / `exit` / `q`: cancel; the stage gets no checkpoint

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::domain::DiscoveredTerm;
use crate::error::PipelineError;
use crate::ports::TermReviewer;

/// Accepts every term unchanged. Used with `--yes` and when stdin is not a
/// terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl TermReviewer for AutoApprove {
    async fn review(
        &self,
        terms: Vec<DiscoveredTerm>,
    ) -> Result<Option<Vec<DiscoveredTerm>>, PipelineError> {
        tracing::info!(terms = terms.len(), "auto-approving discovered terms");
        Ok(Some(terms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewCommand {
    Accept,
    Cancel,
    /// Zero-based, sorted, deduplicated.
    Delete(Vec<usize>),
    /// Zero-based.
    Edit(usize),
}

impl ReviewCommand {
    /// Parses one input line against a list of `len` terms.
    pub fn parse(line: &str, len: usize) -> Result<Self, String> {
        let line = line.trim().to_lowercase();
        let mut words = line.split_whitespace();
        let Some(action) = words.next() else {
            return Err("empty command".to_string());
        };
        match action {
            "ok" | "yes" | "y" => return Ok(Self::Accept),
            "quit" | "exit" | "q" => return Ok(Self::Cancel),
            "del" | "edit" => {}
            other => return Err(format!("unknown command '{other}'")),
        }

        let mut indices = Vec::new();
        for word in words {
            let n: usize = word
                .parse()
                .map_err(|_| format!("'{word}' is not a term number"))?;
            if n == 0 || n > len {
                return Err(format!("no term number {n}"));
            }
            indices.push(n - 1);
        }
        if indices.is_empty() {
            return Err(format!("'{action}' needs at least one term number"));
        }

        if action == "edit" {
            return match indices.as_slice() {
                [index] => Ok(Self::Edit(*index)),
                _ => Err("edit one term at a time".to_string()),
            };
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(Self::Delete(indices))
    }
}

/// Working copy of the terms under review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSession {
    terms: Vec<DiscoveredTerm>,
}

impl ReviewSession {
    /// Starts a session over `terms` in the order given.
    pub fn new(terms: Vec<DiscoveredTerm>) -> Self {
        Self { terms }
    }

    /// Terms as they currently stand.
    pub fn terms(&self) -> &[DiscoveredTerm] {
        &self.terms
    }

    pub fn into_terms(self) -> Vec<DiscoveredTerm> {
        self.terms
    }

    /// Removes the given zero-based indices.
    pub fn delete(&mut self, indices: &[usize]) -> usize {
        let before = self.terms.len();
        let mut index = 0;
        self.terms.retain(|_| {
            let keep = !indices.contains(&index);
            index += 1;
            keep
        });
        before - self.terms.len()
    }

    /// Empty values keep the current field.
    pub fn edit(&mut self, index: usize, translation: &str, note: &str) {
        if let Some(term) = self.terms.get_mut(index) {
            if !translation.trim().is_empty() {
                term.translation = translation.trim().to_string();
            }
            if !note.trim().is_empty() {
                term.note = note.trim().to_string();
            }
        }
    }

    /// Numbered listing, one term per line, as shown to the reviewer.
    pub fn listing(&self) -> String {
        self.terms
            .iter()
            .enumerate()
            .map(|(i, t)| format!("  {:02}. {} -> {} ({})\n", i + 1, t.original, t.translation, t.note))
            .collect()
    }
}

const HELP: &str = "\nCommands: ok | del N [N...] | edit N | quit\n> ";

/// Interactive review over any line reader and writer (stdin/stdout in the
/// CLI). End of input cancels.
pub struct LineReviewer<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> LineReviewer<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Prompts go to `writer`, answers are read line by line from `reader`.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    /// Gives back the reader and writer.
    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner()
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>, PipelineError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| PipelineError::io("<review input>", e))?;
    Ok((n > 0).then_some(line))
}

async fn say<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<(), PipelineError> {
    writer
        .write_all(text.as_bytes())
        .await
        .map_err(|e| PipelineError::io("<review output>", e))?;
    writer
        .flush()
        .await
        .map_err(|e| PipelineError::io("<review output>", e))
}

#[async_trait]
impl<R, W> TermReviewer for LineReviewer<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn review(
        &self,
        terms: Vec<DiscoveredTerm>,
    ) -> Result<Option<Vec<DiscoveredTerm>>, PipelineError> {
        let mut guard = self.io.lock().await;
        let (reader, writer) = &mut *guard;
        let mut session = ReviewSession::new(terms);

        say(writer, &format!("\n{} new term(s) found:\n", session.terms().len())).await?;
        loop {
            say(writer, &session.listing()).await?;
            say(writer, HELP).await?;
            let Some(line) = read_line(reader).await? else {
                say(writer, "\ninput closed, review cancelled\n").await?;
                return Ok(None);
            };

            match ReviewCommand::parse(&line, session.terms().len()) {
                Ok(ReviewCommand::Accept) => return Ok(Some(session.into_terms())),
                Ok(ReviewCommand::Cancel) => return Ok(None),
                Ok(ReviewCommand::Delete(indices)) => {
                    let removed = session.delete(&indices);
                    say(writer, &format!("removed {removed} term(s)\n")).await?;
                }
                Ok(ReviewCommand::Edit(index)) => {
                    let term = session.terms()[index].clone();
                    say(writer, &format!("{}\n  translation [{}]: ", term.original, term.translation)).await?;
                    let translation = read_line(reader).await?.unwrap_or_default();
                    say(writer, &format!("  note [{}]: ", term.note)).await?;
                    let note = read_line(reader).await?.unwrap_or_default();
                    session.edit(index, &translation, &note);
                }
                Err(message) => say(writer, &format!("error: {message}\n")).await?,
            }
        }
    }
}
