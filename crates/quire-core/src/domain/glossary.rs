//! Shared glossary: category -> term id -> entry.
//!
//! On disk this is pretty-printed JSON with sorted keys, e.g.
//! `{"characters": {"taro": {"name": {"jp": "太郎", "ru": "Таро"}, ...}}}`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, PipelineError};
use crate::queue::write_atomic;

/// Category for names of people and creatures.
pub const CHARACTERS: &str = "characters";
/// Category for everything else.
pub const TERMINOLOGY: &str = "terminology";

/// One record emitted by a discovery worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTerm {
    pub original: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlossaryEntry {
    /// Language code -> spelling.
    pub name: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// How discovered terms are filed into the glossary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryRules {
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// A note containing any of these (case-insensitive) files the term under
    /// `characters`; everything else goes to `terminology`.
    #[serde(default = "default_character_markers")]
    pub character_markers: Vec<String>,
}

fn default_source_lang() -> String {
    "jp".to_string()
}

fn default_target_lang() -> String {
    "ru".to_string()
}

fn default_character_markers() -> Vec<String> {
    vec!["персонаж".to_string(), "character".to_string()]
}

impl Default for GlossaryRules {
    fn default() -> Self {
        Self {
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            character_markers: default_character_markers(),
        }
    }
}

impl GlossaryRules {
    /// Classifies by the term's note: any character marker means
    /// [`CHARACTERS`].
    pub fn category_for(&self, term: &DiscoveredTerm) -> &'static str {
        let note = term.note.to_lowercase();
        if self
            .character_markers
            .iter()
            .any(|m| note.contains(&m.to_lowercase()))
        {
            CHARACTERS
        } else {
            TERMINOLOGY
        }
    }
}

/// Stable id derived from the source-language spelling.
pub fn term_id(original: &str) -> String {
    original.to_lowercase().replace([' ', '・'], "_")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Glossary {
    categories: BTreeMap<String, BTreeMap<String, GlossaryEntry>>,
}

impl Default for Glossary {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(CHARACTERS.to_string(), BTreeMap::new());
        categories.insert(TERMINOLOGY.to_string(), BTreeMap::new());
        Self { categories }
    }
}

impl Glossary {
    /// Loads the glossary, or an empty one when the file does not exist yet.
    ///
    /// A file that exists but does not parse is an error: silently starting
    /// over would discard every confirmed entry on the next save.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        match fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                PipelineError::Config(format!("glossary {} is not valid: {e}", path.display()))
            }),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }

    /// Writes the glossary through a sibling staging file and a rename.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let json = self.to_pretty_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).at(parent)?;
        }
        write_atomic(path, json.as_bytes())
    }

    /// The text embedded in prompts as `{glossary}`.
    pub fn to_pretty_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Entries across all categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up by term id, as produced by [`term_id`].
    pub fn get(&self, category: &str, id: &str) -> Option<&GlossaryEntry> {
        self.categories.get(category)?.get(id)
    }

    /// Whether any category already knows this spelling.
    pub fn knows(&self, original: &str) -> bool {
        let id = term_id(original);
        self.categories.values().any(|c| c.contains_key(&id))
    }

    /// Adds terms whose id is not present anywhere yet; returns how many were
    /// added. Existing entries are never touched, so merging the same batch
    /// twice is a no-op.
    pub fn merge(&mut self, terms: &[DiscoveredTerm], rules: &GlossaryRules) -> usize {
        let mut added = 0;
        for term in terms {
            if term.original.trim().is_empty() || self.knows(&term.original) {
                continue;
            }
            let mut name = BTreeMap::new();
            name.insert(rules.source_lang.clone(), term.original.clone());
            name.insert(rules.target_lang.clone(), term.translation.clone());
            let entry = GlossaryEntry {
                name,
                description: term.note.clone(),
                aliases: Vec::new(),
            };
            self.categories
                .entry(rules.category_for(term).to_string())
                .or_default()
                .insert(term_id(&term.original), entry);
            added += 1;
        }
        added
    }
}
