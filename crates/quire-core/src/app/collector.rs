use std::fs;
use std::path::Path;

use crate::domain::TaskState;
use crate::error::{IoResultExt, PipelineError};
use crate::queue::{list_task_names, write_atomic};
use crate::workspace::Workspace;

/// Concatenates the last stage's Done files, in chunk order and each followed
/// by a blank line, into `output`. Returns the number of chunks assembled.
pub fn assemble(workspace: &Workspace, output: &Path) -> Result<usize, PipelineError> {
    let Some(last) = workspace.stages().last() else {
        return Err(PipelineError::Config("no stages configured".to_string()));
    };
    if !last.is_checkpointed() {
        return Err(PipelineError::StageIncomplete {
            stage: last.name().to_string(),
            detail: "final stage has no checkpoint to assemble from".to_string(),
        });
    }

    let done = last.state_dir(TaskState::Done);
    let mut assembled = String::new();
    let names = list_task_names(&done)?;
    for name in &names {
        let path = done.join(name);
        assembled.push_str(&fs::read_to_string(&path).at(&path)?);
        assembled.push_str("\n\n");
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    write_atomic(output, assembled.as_bytes())?;
    tracing::info!(chunks = names.len(), output = %output.display(), "assembled final output");
    Ok(names.len())
}
