//! GlossaryAggregator: folds a discovery stage's per-chunk term lists into the
//! shared glossary, after review.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{DiscoveredTerm, Glossary, GlossaryRules};
use crate::error::{IoResultExt, PipelineError};
use crate::ports::{StageAggregator, TermReviewer};
use crate::queue::list_task_names;
use crate::workspace::StagePaths;

/// Parses one discovery worker's stdout.
///
/// Accepts a bare JSON array of term records, or an object whose `response`
/// field holds that array as a string, optionally inside a Markdown code
/// fence. Records without an `original` are dropped.
pub fn parse_discovery_output(raw: &str) -> Result<Vec<DiscoveredTerm>, String> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| e.to_string())?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("response") {
            Some(Value::String(inner)) => {
                let inner: Value = serde_json::from_str(strip_fence(&inner))
                    .map_err(|e| format!("response field: {e}"))?;
                match inner {
                    Value::Array(items) => items,
                    _ => return Err("response field is not a JSON array".to_string()),
                }
            }
            Some(Value::Array(items)) => items,
            _ => return Err("object without a usable 'response' field".to_string()),
        },
        _ => return Err("expected a JSON array of terms".to_string()),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<DiscoveredTerm>(item).ok())
        .filter(|term| !term.original.trim().is_empty())
        .collect())
}

fn strip_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    // drop the language tag line, e.g. ```json
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Every term found in `outputs_dir`'s `.json` files, deduplicated by
/// `original` (first occurrence in file order wins) and sorted by it.
/// Malformed files are logged and skipped.
pub fn collect_terms(outputs_dir: &Path) -> Result<Vec<DiscoveredTerm>, PipelineError> {
    let mut terms: BTreeMap<String, DiscoveredTerm> = BTreeMap::new();
    for name in list_task_names(outputs_dir)? {
        if !name.ends_with(".json") {
            continue;
        }
        let path = outputs_dir.join(&name);
        let raw = fs::read_to_string(&path).at(&path)?;
        match parse_discovery_output(&raw) {
            Ok(found) => {
                for term in found {
                    terms.entry(term.original.clone()).or_insert(term);
                }
            }
            Err(reason) => {
                let err = PipelineError::MalformedOutput { path, reason };
                tracing::warn!(error = %err, "skipping discovery output");
            }
        }
    }
    Ok(terms.into_values().collect())
}

/// [`StageAggregator`] for discovery stages.
///
/// # Behavior
/// - only terms the glossary does not know yet are shown for review
/// - existing entries are never overwritten
/// - the glossary file is rewritten only when something was added
pub struct GlossaryAggregator {
    glossary: PathBuf,
    rules: GlossaryRules,
    reviewer: Arc<dyn TermReviewer>,
}

impl GlossaryAggregator {
    /// `glossary` may not exist yet; it is created on the first addition.
    pub fn new(glossary: PathBuf, rules: GlossaryRules, reviewer: Arc<dyn TermReviewer>) -> Self {
        Self {
            glossary,
            rules,
            reviewer,
        }
    }
}

#[async_trait]
impl StageAggregator for GlossaryAggregator {
    async fn aggregate(&self, stage: &StagePaths) -> Result<(), PipelineError> {
        let mut glossary = Glossary::load(&self.glossary)?;
        let found = collect_terms(&stage.outputs_dir())?;
        let total = found.len();
        let fresh: Vec<_> = found
            .into_iter()
            .filter(|term| !glossary.knows(&term.original))
            .collect();
        tracing::info!(found = total, new = fresh.len(), "collected discovered terms");
        if fresh.is_empty() {
            return Ok(());
        }

        let Some(approved) = self.reviewer.review(fresh).await? else {
            return Err(PipelineError::ReviewCancelled);
        };
        let added = glossary.merge(&approved, &self.rules);
        if added > 0 {
            glossary.save(&self.glossary)?;
        }
        tracing::info!(
            added,
            glossary = %self.glossary.display(),
            entries = glossary.len(),
            "glossary updated"
        );
        Ok(())
    }
}
