//! git2-backed repository reader

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use git2::{BlameOptions, Repository};
use tracing::{debug, warn};

use super::{BlameEntry, Commit, GitError, GitReader};

/// Repository reader over libgit2.
///
/// git2 objects are not Sync, so the repository is reopened per call;
/// libgit2 caches make this cheap.
pub struct RepoReader {
    root: PathBuf,
}

impl RepoReader {
    /// Discover the repository containing `path`.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self, GitError> {
        let repo = Repository::discover(path.as_ref())?;
        let root = repo
            .workdir()
            .ok_or_else(|| GitError::Repo("bare repositories are not supported".to_string()))?
            .to_path_buf();
        Ok(Self { root })
    }

    fn open(&self) -> Result<Repository, GitError> {
        Ok(Repository::open(&self.root)?)
    }

    fn commit_timestamp(commit: &git2::Commit<'_>) -> DateTime<Utc> {
        Utc.timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Files, insertions, and deletions for one commit against its
    /// first parent (or the empty tree for a root commit).
    fn commit_stats(
        repo: &Repository,
        commit: &git2::Commit<'_>,
    ) -> Result<(Vec<String>, usize, usize), GitError> {
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };

        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        let mut files = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                files.push(path.to_string_lossy().to_string());
            }
        }

        let stats = diff.stats()?;
        Ok((files, stats.insertions(), stats.deletions()))
    }

    fn collect_commits(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Commit>, GitError> {
        let repo = self.open()?;

        let mut revwalk = match repo.revwalk() {
            Ok(walk) => walk,
            Err(e) => {
                warn!(error = %e, "revwalk unavailable");
                return Ok(vec![]);
            }
        };
        if revwalk.push_head().is_err() {
            // Unborn HEAD or truncated clone: nothing to report
            debug!("no walkable HEAD");
            return Ok(vec![]);
        }
        revwalk.set_sorting(git2::Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            if commits.len() >= limit {
                break;
            }
            let Ok(oid) = oid else {
                // Shallow boundary: stop quietly with what we have
                break;
            };
            let Ok(commit) = repo.find_commit(oid) else {
                break;
            };

            let timestamp = Self::commit_timestamp(&commit);
            if let Some(since) = since {
                if timestamp < since {
                    // TIME sort: everything further back is older
                    break;
                }
            }
            if let Some(until) = until {
                if timestamp > until {
                    continue;
                }
            }

            let (files, insertions, deletions) = match Self::commit_stats(&repo, &commit) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(sha = %oid, error = %e, "commit stats failed");
                    continue;
                }
            };

            if let Some(path) = path {
                if !files.iter().any(|f| f == path || f.starts_with(path)) {
                    continue;
                }
            }

            let author = commit.author();
            commits.push(Commit {
                sha: oid.to_string(),
                message: commit.message().unwrap_or_default().trim().to_string(),
                author: author.name().unwrap_or_default().to_string(),
                author_email: author.email().unwrap_or_default().to_string(),
                timestamp,
                files_changed: files,
                insertions,
                deletions,
            });
        }
        Ok(commits)
    }

    fn collect_blame(&self, file: &str) -> Result<Vec<BlameEntry>, GitError> {
        let repo = self.open()?;
        let rel = Path::new(file);

        let content = std::fs::read(self.root.join(rel))
            .map_err(|_| GitError::FileNotInRepo(file.to_string()))?;
        if content.contains(&0) {
            return Err(GitError::BinaryFile(file.to_string()));
        }
        let text = String::from_utf8_lossy(&content);
        let lines: Vec<&str> = text.lines().collect();

        let mut options = BlameOptions::new();
        let blame = repo
            .blame_file(rel, Some(&mut options))
            .map_err(|_| GitError::FileNotInRepo(file.to_string()))?;

        let mut entries = Vec::new();
        for hunk in blame.iter() {
            let line_start = hunk.final_start_line();
            let line_end = line_start + hunk.lines_in_hunk().saturating_sub(1);
            let signature = hunk.final_signature();
            let timestamp = Utc
                .timestamp_opt(signature.when().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now);

            let hunk_content = lines
                .get(line_start.saturating_sub(1)..line_end.min(lines.len()))
                .unwrap_or(&[])
                .join("\n");

            entries.push(BlameEntry {
                sha: hunk.final_commit_id().to_string(),
                author: signature.name().unwrap_or_default().to_string(),
                author_email: signature.email().unwrap_or_default().to_string(),
                timestamp,
                line_start,
                line_end,
                content: hunk_content,
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl GitReader for RepoReader {
    async fn get_commits(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Commit>, GitError> {
        self.collect_commits(since, until, path, limit)
    }

    async fn get_blame(&self, file: &str) -> Result<Vec<BlameEntry>, GitError> {
        self.collect_blame(file)
    }

    async fn get_file_history(&self, file: &str, limit: usize) -> Result<Vec<Commit>, GitError> {
        self.collect_commits(None, None, Some(file), limit)
    }

    async fn get_head_sha(&self) -> Result<String, GitError> {
        let repo = self.open()?;
        Ok(repo.head()?.peel_to_commit()?.id().to_string())
    }

    fn get_repo_root(&self) -> String {
        self.root.to_string_lossy().to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Create a repo with two commits touching `a.txt` and `b.txt`
    fn fixture_repo() -> (TempDir, RepoReader) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("Test Author", "test@example.com").unwrap();

        std::fs::write(dir.path().join("a.txt"), "line one\nline two\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let first = repo
            .commit(Some("HEAD"), &sig, &sig, "add a.txt", &tree, &[])
            .unwrap();

        std::fs::write(dir.path().join("b.txt"), "other\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("b.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parent = repo.find_commit(first).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "add b.txt", &tree, &[&parent])
            .unwrap();

        let reader = RepoReader::discover(dir.path()).unwrap();
        (dir, reader)
    }

    #[tokio::test]
    async fn test_get_commits_newest_first() {
        let (_dir, reader) = fixture_repo();
        let commits = reader.get_commits(None, None, None, 100).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].message, "add b.txt");
        assert_eq!(commits[1].message, "add a.txt");
        assert_eq!(commits[0].author, "Test Author");
        assert_eq!(commits[0].files_changed, vec!["b.txt".to_string()]);
        assert!(commits[1].insertions >= 2);
    }

    #[tokio::test]
    async fn test_get_commits_respects_limit() {
        let (_dir, reader) = fixture_repo();
        let commits = reader.get_commits(None, None, None, 1).await.unwrap();
        assert_eq!(commits.len(), 1);
    }

    #[tokio::test]
    async fn test_path_filter() {
        let (_dir, reader) = fixture_repo();
        let commits = reader.get_file_history("a.txt", 100).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "add a.txt");
    }

    #[tokio::test]
    async fn test_head_sha_matches_latest_commit() {
        let (_dir, reader) = fixture_repo();
        let head = reader.get_head_sha().await.unwrap();
        let commits = reader.get_commits(None, None, None, 1).await.unwrap();
        assert_eq!(head, commits[0].sha);
    }

    #[tokio::test]
    async fn test_blame_covers_all_lines() {
        let (_dir, reader) = fixture_repo();
        let entries = reader.get_blame("a.txt").await.unwrap();
        assert!(!entries.is_empty());
        assert_eq!(entries[0].author, "Test Author");
        assert_eq!(entries[0].line_start, 1);
        assert!(entries[0].content.contains("line one"));
    }

    #[tokio::test]
    async fn test_blame_missing_file() {
        let (_dir, reader) = fixture_repo();
        let result = reader.get_blame("missing.txt").await;
        assert!(matches!(result, Err(GitError::FileNotInRepo(_))));
    }

    #[tokio::test]
    async fn test_empty_repo_returns_no_commits() {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let reader = RepoReader::discover(dir.path()).unwrap();
        let commits = reader.get_commits(None, None, None, 10).await.unwrap();
        assert!(commits.is_empty());
    }
}
