//! Git history analysis
//!
//! A thin reading layer over a repository ([`GitReader`], with a
//! git2-backed implementation) and the [`GitAnalyzer`] that indexes
//! commits into the vector store, computes churn metrics, and maps
//! text matches to blame records.

pub mod analyzer;
pub mod reader;

pub use analyzer::GitAnalyzer;
pub use reader::RepoReader;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// RECORDS
// ============================================================================

/// One commit with its change stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub files_changed: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
}

/// One blame hunk
#[derive(Debug, Clone, PartialEq)]
pub struct BlameEntry {
    pub sha: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    /// 1-based inclusive line range
    pub line_start: usize,
    pub line_end: usize,
    pub content: String,
}

/// Churn metrics for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnRecord {
    pub file_path: String,
    pub change_count: usize,
    pub total_insertions: usize,
    pub total_deletions: usize,
    pub authors: Vec<String>,
    pub author_emails: Vec<String>,
    pub last_changed: DateTime<Utc>,
}

/// Per-author statistics for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorStats {
    pub author: String,
    pub author_email: String,
    pub commit_count: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
}

/// A commit with its search score
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSearchResult {
    pub commit: Commit,
    pub score: f32,
}

/// A grep hit mapped through blame
#[derive(Debug, Clone, PartialEq)]
pub struct BlameSearchResult {
    pub file_path: String,
    pub line_number: usize,
    pub content: String,
    pub sha: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

/// One failed commit during indexing
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingError {
    pub sha: Option<String>,
    pub message: String,
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexingStats {
    pub commits_indexed: usize,
    pub commits_skipped: usize,
    pub errors: Vec<IndexingError>,
    pub duration_ms: u128,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Git layer errors
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git error: {0}")]
    Repo(String),

    #[error("file {0} is binary")]
    BinaryFile(String),

    #[error("file {0} is not tracked in the repository")]
    FileNotInRepo(String),

    #[error("ripgrep (rg) not found on PATH")]
    RipgrepMissing,

    #[error("ripgrep search failed: {0}")]
    Ripgrep(String),
}

impl From<git2::Error> for GitError {
    fn from(e: git2::Error) -> Self {
        GitError::Repo(e.message().to_string())
    }
}

// ============================================================================
// READER TRAIT
// ============================================================================

/// Read access to a repository's history.
///
/// Shallow-clone conditions (missing parents, truncated history)
/// return empty results rather than failing.
#[async_trait]
pub trait GitReader: Send + Sync {
    /// Commits from HEAD backwards, newest first, optionally bounded
    /// by time window and path.
    async fn get_commits(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Commit>, GitError>;

    /// Blame hunks for one tracked file
    async fn get_blame(&self, file: &str) -> Result<Vec<BlameEntry>, GitError>;

    /// Commits that touched one file, newest first
    async fn get_file_history(&self, file: &str, limit: usize) -> Result<Vec<Commit>, GitError>;

    /// Current HEAD sha
    async fn get_head_sha(&self) -> Result<String, GitError>;

    /// Absolute path of the working tree root
    fn get_repo_root(&self) -> String;
}
