//! Collection names and the experience axis mapping
//!
//! Every record type lands in a named collection of the vector store;
//! experiences are projected across four axis collections sharing the
//! `ghap` prefix.

use serde::{Deserialize, Serialize};

/// Free-form memories
pub const MEMORIES: &str = "memories";
/// Indexed code units
pub const CODE: &str = "code";
/// Indexed git commits
pub const COMMITS: &str = "commits";
/// Validated values (principles)
pub const VALUES: &str = "values";

/// Prefix for the experience axis collections
pub const EXPERIENCE_PREFIX: &str = "ghap";

/// Semantic projection of a GHAP entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Full,
    Strategy,
    Surprise,
    RootCause,
}

impl Axis {
    /// All axes, in projection order
    pub const ALL: [Axis; 4] = [Axis::Full, Axis::Strategy, Axis::Surprise, Axis::RootCause];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Full => "full",
            Axis::Strategy => "strategy",
            Axis::Surprise => "surprise",
            Axis::RootCause => "root_cause",
        }
    }

    /// Parse from a wire name, `None` for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|a| a.as_str() == s).copied()
    }

    /// Wire names for all axes (used to generate tool schemas)
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|a| a.as_str()).collect()
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collection name for an experience axis: `{prefix}_{axis}`
pub fn experience_collection(axis: Axis) -> String {
    format!("{EXPERIENCE_PREFIX}_{}", axis.as_str())
}
