//! Context assembly types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collections::Axis;

/// A context source kind (plural wire names, matching the tool input)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Memories,
    Code,
    Experiences,
    Values,
    Commits,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Memories,
        SourceKind::Code,
        SourceKind::Experiences,
        SourceKind::Values,
        SourceKind::Commits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Memories => "memories",
            SourceKind::Code => "code",
            SourceKind::Experiences => "experiences",
            SourceKind::Values => "values",
            SourceKind::Commits => "commits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|k| k.as_str() == s).copied()
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.as_str()).collect()
    }

    /// Section title in assembled markdown
    pub fn title(&self) -> &'static str {
        match self {
            SourceKind::Memories => "Memories",
            SourceKind::Code => "Code",
            SourceKind::Experiences => "Experiences",
            SourceKind::Values => "Values",
            SourceKind::Commits => "Commits",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity used for cross-source deduplication. The first present of
/// ghap id, file path, commit sha, memory id wins; content hash is the
/// fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Ghap(String),
    File(String),
    Commit(String),
    Memory(String),
    Content(u64),
}

/// One formatted item selected for the context pack
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub source: SourceKind,
    /// Rendered markdown content (possibly truncated + annotated)
    pub content: String,
    pub relevance: f32,
    /// Identifier reported in `truncated_items`
    pub id: String,
    pub dedup_key: DedupKey,
    /// Set for premortem experience items
    pub axis: Option<Axis>,
    /// `file:line` locator for code truncation notes
    pub locator: Option<String>,
}

/// The assembled context pack
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedContext {
    pub markdown: String,
    pub items: Vec<ContextItem>,
    pub token_count: usize,
    /// Item count per source actually used
    pub sources_used: BTreeMap<SourceKind, usize>,
    /// True when the final token count exceeds the requested budget
    /// (possible after slack redistribution and annotation overhead)
    pub budget_exceeded: bool,
    /// Ids of items whose content was cut to fit
    pub truncated_items: Vec<String>,
}

/// Context assembly errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid context type '{0}'. Valid: memories, code, experiences, values, commits")]
    InvalidContextType(String),

    #[error("{0}")]
    InvalidBudget(String),
}

/// Context assembly tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Sequence similarity at or above which two items are fuzzy
    /// duplicates
    pub similarity_threshold: f32,
    /// Items longer than this skip the fuzzy pass
    pub max_fuzzy_content_length: usize,
    /// Per-item cap as a fraction of its source budget
    pub max_item_fraction: f32,
    /// Upper bound accepted for `max_tokens`
    pub max_budget_tokens: usize,
    /// Relative budget weights per source
    pub weight_memories: f32,
    pub weight_code: f32,
    pub weight_experiences: f32,
    pub weight_values: f32,
    pub weight_commits: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_fuzzy_content_length: 2000,
            max_item_fraction: 0.25,
            max_budget_tokens: 100_000,
            weight_memories: 0.3,
            weight_code: 0.3,
            weight_experiences: 0.2,
            weight_values: 0.1,
            weight_commits: 0.1,
        }
    }
}

impl ContextConfig {
    pub fn weight(&self, source: SourceKind) -> f32 {
        match source {
            SourceKind::Memories => self.weight_memories,
            SourceKind::Code => self.weight_code,
            SourceKind::Experiences => self.weight_experiences,
            SourceKind::Values => self.weight_values,
            SourceKind::Commits => self.weight_commits,
        }
    }
}
