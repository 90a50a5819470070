//! Git history indexing and metrics
//!
//! Orchestration over [`GitReader`] + the vector store + the metadata
//! store: incremental commit indexing keyed by the last indexed sha,
//! semantic commit search, churn hotspots, per-file author stats, and
//! blame-aware text search via an external ripgrep subprocess.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::collections;
use crate::embeddings::EmbeddingService;
use crate::metadata::MetadataStore;
use crate::search::CommitResult;
use crate::store::{Distance, FilterValue, Filters, Payload, StoreError, VectorStore};

use super::{
    AuthorStats, BlameSearchResult, ChurnRecord, Commit, CommitSearchResult, GitError, GitReader,
    IndexingError, IndexingStats,
};

/// Commits older than this are never indexed
const INDEX_WINDOW_DAYS: i64 = 5 * 365;

/// Batch size for embedding commit messages
const EMBED_BATCH: usize = 75;

/// Cap on commits walked during incremental catch-up
const INCREMENTAL_WALK_LIMIT: usize = 10_000;

/// Analyzes and indexes git history for semantic search and metrics
pub struct GitAnalyzer {
    reader: Arc<dyn GitReader>,
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    metadata: Arc<MetadataStore>,
    collection_ensured: AtomicBool,
}

impl GitAnalyzer {
    pub fn new(
        reader: Arc<dyn GitReader>,
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self {
            reader,
            embedder,
            store,
            metadata,
            collection_ensured: AtomicBool::new(false),
        }
    }

    async fn ensure_commits_collection(&self) -> Result<(), GitError> {
        if self.collection_ensured.load(Ordering::Acquire) {
            return Ok(());
        }
        match self
            .store
            .create_collection(
                collections::COMMITS,
                self.embedder.dimension(),
                Distance::Cosine,
            )
            .await
        {
            Ok(()) => info!(collection = collections::COMMITS, "collection created"),
            Err(StoreError::CollectionExists(_)) => {
                debug!(collection = collections::COMMITS, "collection exists")
            }
            Err(e) => return Err(GitError::Repo(e.to_string())),
        }
        self.collection_ensured.store(true, Ordering::Release);
        Ok(())
    }

    // === Indexing ===

    /// Index commits for semantic search. Incremental by the stored
    /// cursor sha; falls back to a full (time-windowed) reindex when
    /// the cursor is missing or no longer reachable from HEAD.
    pub async fn index_commits(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
        force: bool,
    ) -> Result<IndexingStats, GitError> {
        self.ensure_commits_collection().await?;

        let mut stats = IndexingStats::default();
        let started = Instant::now();
        let repo_path = self.reader.get_repo_root();

        let state = self
            .metadata
            .get_git_index_state(&repo_path)
            .await
            .map_err(|e| GitError::Repo(e.to_string()))?;
        let cursor = state.and_then(|s| s.last_indexed_sha).filter(|_| !force);

        let commits = match cursor {
            None => {
                info!(repo_path = %repo_path, force, "full index starting");
                self.commits_in_window(since, limit).await?
            }
            Some(last_sha) => {
                let head_sha = match self.reader.get_head_sha().await {
                    Ok(sha) => sha,
                    Err(e) => {
                        stats.errors.push(IndexingError {
                            sha: None,
                            message: format!("failed to get HEAD sha: {e}"),
                        });
                        stats.duration_ms = started.elapsed().as_millis();
                        return Ok(stats);
                    }
                };
                if head_sha == last_sha {
                    info!(repo_path = %repo_path, "index already up to date");
                    stats.duration_ms = started.elapsed().as_millis();
                    return Ok(stats);
                }

                let walked = self
                    .reader
                    .get_commits(None, None, None, INCREMENTAL_WALK_LIMIT)
                    .await?;
                let mut new_commits = Vec::new();
                let mut cursor_found = false;
                for commit in walked {
                    if commit.sha == last_sha {
                        cursor_found = true;
                        break;
                    }
                    new_commits.push(commit);
                }

                if cursor_found {
                    info!(
                        repo_path = %repo_path,
                        new_commits = new_commits.len(),
                        "incremental index starting"
                    );
                    new_commits
                } else {
                    warn!(
                        last_sha = %last_sha,
                        head_sha = %head_sha,
                        "cursor sha not reachable, full reindex"
                    );
                    self.commits_in_window(since, limit).await?
                }
            }
        };

        self.index_batch(&commits, &repo_path, &mut stats).await;
        stats.duration_ms = started.elapsed().as_millis();
        Ok(stats)
    }

    async fn commits_in_window(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Commit>, GitError> {
        let window_start = Utc::now() - Duration::days(INDEX_WINDOW_DAYS);
        let effective_since = Some(since.map_or(window_start, |s| s.max(window_start)));
        self.reader
            .get_commits(effective_since, None, None, limit.unwrap_or(100_000))
            .await
    }

    async fn index_batch(&self, commits: &[Commit], repo_path: &str, stats: &mut IndexingStats) {
        if commits.is_empty() {
            return;
        }

        for batch in commits.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(build_embedding_text).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (commit, vector) in batch.iter().zip(vectors) {
                        match self.upsert_commit(commit, vector, repo_path).await {
                            Ok(()) => stats.commits_indexed += 1,
                            Err(e) => stats.errors.push(IndexingError {
                                sha: Some(commit.sha.clone()),
                                message: e.to_string(),
                            }),
                        }
                    }
                }
                Err(e) => {
                    // Batch embed failed: fall back to per-commit
                    warn!(error = %e, "batch embed failed, falling back to sequential");
                    for commit in batch {
                        let result = async {
                            let vector =
                                self.embedder.embed(&build_embedding_text(commit)).await?;
                            self.upsert_commit(commit, vector, repo_path)
                                .await
                                .map_err(GitError::from_store)
                        }
                        .await;
                        match result {
                            Ok(()) => stats.commits_indexed += 1,
                            Err(e) => {
                                warn!(sha = %commit.sha, error = %e, "commit index failed");
                                stats.errors.push(IndexingError {
                                    sha: Some(commit.sha.clone()),
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Ok(head_sha) = self.reader.get_head_sha().await {
            if let Err(e) = self
                .metadata
                .update_git_index_state(repo_path, &head_sha, stats.commits_indexed as i64)
                .await
            {
                warn!(error = %e, "failed to update index state");
            }
        }
    }

    async fn upsert_commit(
        &self,
        commit: &Commit,
        vector: Vec<f32>,
        repo_path: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut payload = Payload::new();
        payload.insert("sha".into(), json!(commit.sha));
        payload.insert("message".into(), json!(commit.message));
        payload.insert("author".into(), json!(commit.author));
        payload.insert("author_email".into(), json!(commit.author_email));
        payload.insert(
            "timestamp".into(),
            json!(commit.timestamp.timestamp() as f64),
        );
        payload.insert("timestamp_iso".into(), json!(commit.timestamp.to_rfc3339()));
        payload.insert("files_changed".into(), json!(commit.files_changed));
        payload.insert("file_count".into(), json!(commit.files_changed.len()));
        payload.insert("insertions".into(), json!(commit.insertions));
        payload.insert("deletions".into(), json!(commit.deletions));
        payload.insert("indexed_at".into(), json!(now.timestamp() as f64));
        payload.insert("indexed_at_iso".into(), json!(now.to_rfc3339()));
        payload.insert("repo_path".into(), json!(repo_path));

        self.store
            .upsert(collections::COMMITS, &commit.sha, vector, payload)
            .await
    }

    // === Search ===

    /// Semantic search over indexed commits
    pub async fn search_commits(
        &self,
        query: &str,
        author: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CommitSearchResult>, GitError> {
        self.ensure_commits_collection().await?;

        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| GitError::Repo(e.to_string()))?;

        let mut filters = Filters::new();
        if let Some(author) = author {
            filters.insert("author".to_string(), FilterValue::Eq(json!(author)));
        }
        if let Some(since) = since {
            filters.insert(
                "timestamp".to_string(),
                FilterValue::Gte(json!(since.timestamp() as f64)),
            );
        }
        let filters = if filters.is_empty() {
            None
        } else {
            Some(filters)
        };

        let records = self
            .store
            .search(collections::COMMITS, &vector, limit, filters.as_ref())
            .await
            .map_err(GitError::from_store)?;

        Ok(records
            .iter()
            .map(|record| {
                let result = CommitResult::from_record(record);
                CommitSearchResult {
                    commit: Commit {
                        sha: result.sha,
                        message: result.message,
                        author: result.author,
                        author_email: result.author_email,
                        timestamp: result.committed_at.unwrap_or_else(Utc::now),
                        files_changed: result.files_changed,
                        insertions: result.insertions as usize,
                        deletions: result.deletions as usize,
                    },
                    score: record.score,
                }
            })
            .collect())
    }

    // === Metrics ===

    /// Files with the most changes over a day window
    pub async fn get_churn_hotspots(
        &self,
        days: i64,
        limit: usize,
        min_changes: usize,
    ) -> Result<Vec<ChurnRecord>, GitError> {
        let since = Utc::now() - Duration::days(days);
        let commits = self
            .reader
            .get_commits(Some(since), None, None, 100_000)
            .await?;

        struct FileTally {
            change_count: usize,
            insertions: usize,
            deletions: usize,
            authors: BTreeSet<String>,
            emails: BTreeSet<String>,
            last_changed: DateTime<Utc>,
        }

        let mut tallies: BTreeMap<String, FileTally> = BTreeMap::new();
        for commit in &commits {
            for file_path in &commit.files_changed {
                let tally = tallies.entry(file_path.clone()).or_insert_with(|| FileTally {
                    change_count: 0,
                    insertions: 0,
                    deletions: 0,
                    authors: BTreeSet::new(),
                    emails: BTreeSet::new(),
                    last_changed: commit.timestamp,
                });
                tally.change_count += 1;
                tally.insertions += commit.insertions;
                tally.deletions += commit.deletions;
                tally.authors.insert(commit.author.clone());
                tally.emails.insert(commit.author_email.clone());
                tally.last_changed = tally.last_changed.max(commit.timestamp);
            }
        }

        let mut records: Vec<ChurnRecord> = tallies
            .into_iter()
            .filter(|(_, tally)| tally.change_count >= min_changes)
            .map(|(file_path, tally)| ChurnRecord {
                file_path,
                change_count: tally.change_count,
                total_insertions: tally.insertions,
                total_deletions: tally.deletions,
                authors: tally.authors.into_iter().collect(),
                author_emails: tally.emails.into_iter().collect(),
                last_changed: tally.last_changed,
            })
            .collect();

        records.sort_by(|a, b| b.change_count.cmp(&a.change_count));
        records.truncate(limit);
        Ok(records)
    }

    /// Author statistics for one file, by commit count descending
    pub async fn get_file_authors(&self, file_path: &str) -> Result<Vec<AuthorStats>, GitError> {
        let commits = self.reader.get_file_history(file_path, 100_000).await?;

        let mut by_author: BTreeMap<String, AuthorStats> = BTreeMap::new();
        for commit in &commits {
            let entry = by_author
                .entry(commit.author.clone())
                .or_insert_with(|| AuthorStats {
                    author: commit.author.clone(),
                    author_email: commit.author_email.clone(),
                    commit_count: 0,
                    lines_added: 0,
                    lines_removed: 0,
                    first_commit: None,
                    last_commit: None,
                });
            entry.commit_count += 1;
            entry.lines_added += commit.insertions;
            entry.lines_removed += commit.deletions;
            entry.author_email = commit.author_email.clone();
            entry.first_commit = Some(
                entry
                    .first_commit
                    .map_or(commit.timestamp, |t| t.min(commit.timestamp)),
            );
            entry.last_commit = Some(
                entry
                    .last_commit
                    .map_or(commit.timestamp, |t| t.max(commit.timestamp)),
            );
        }

        let mut stats: Vec<AuthorStats> = by_author.into_values().collect();
        stats.sort_by(|a, b| b.commit_count.cmp(&a.commit_count));
        Ok(stats)
    }

    /// Change frequency for one file or path prefix
    pub async fn get_change_frequency(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<ChurnRecord>, GitError> {
        let commits = self
            .reader
            .get_commits(since, None, Some(path), 100_000)
            .await?;
        if commits.is_empty() {
            return Ok(None);
        }

        let mut authors = BTreeSet::new();
        let mut emails = BTreeSet::new();
        let mut insertions = 0;
        let mut deletions = 0;
        let last_changed = commits[0].timestamp;
        for commit in &commits {
            authors.insert(commit.author.clone());
            emails.insert(commit.author_email.clone());
            insertions += commit.insertions;
            deletions += commit.deletions;
        }

        Ok(Some(ChurnRecord {
            file_path: path.to_string(),
            change_count: commits.len(),
            total_insertions: insertions,
            total_deletions: deletions,
            authors: authors.into_iter().collect(),
            author_emails: emails.into_iter().collect(),
            last_changed,
        }))
    }

    // === Blame search ===

    /// Grep the working tree with ripgrep and map each hit to its
    /// blame record.
    pub async fn blame_search(
        &self,
        pattern: &str,
        file_pattern: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BlameSearchResult>, GitError> {
        let repo_root = self.reader.get_repo_root();

        let mut command = tokio::process::Command::new("rg");
        command
            .arg("--line-number")
            .arg("--no-heading")
            .arg(pattern)
            .current_dir(&repo_root)
            .stdin(std::process::Stdio::null());
        if let Some(glob) = file_pattern {
            command.arg("--glob").arg(glob);
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GitError::RipgrepMissing);
            }
            Err(e) => return Err(GitError::Ripgrep(e.to_string())),
        };

        // rg exits 1 on "no matches"
        if !matches!(output.status.code(), Some(0) | Some(1)) {
            return Err(GitError::Ripgrep(format!(
                "exit code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let matches = parse_grep_lines(&stdout, limit * 2);

        let mut results = Vec::new();
        for (file_path, line_number) in matches.into_iter().take(limit) {
            let blame = match self.reader.get_blame(&file_path).await {
                Ok(blame) => blame,
                Err(GitError::BinaryFile(_)) | Err(GitError::FileNotInRepo(_)) => continue,
                Err(e) => return Err(e),
            };

            for entry in blame {
                if entry.line_start <= line_number && line_number <= entry.line_end {
                    let line_content = entry
                        .content
                        .lines()
                        .nth(line_number - entry.line_start)
                        .unwrap_or_default()
                        .to_string();
                    results.push(BlameSearchResult {
                        file_path: file_path.clone(),
                        line_number,
                        content: line_content,
                        sha: entry.sha,
                        author: entry.author,
                        author_email: entry.author_email,
                        timestamp: entry.timestamp,
                    });
                    break;
                }
            }
        }
        Ok(results)
    }
}

impl GitError {
    fn from_store(e: StoreError) -> Self {
        GitError::Repo(e.to_string())
    }
}

impl From<crate::embeddings::EmbeddingError> for GitError {
    fn from(e: crate::embeddings::EmbeddingError) -> Self {
        GitError::Repo(e.to_string())
    }
}

/// Commit text fed to the embedding model: message, touched files
/// (capped), author.
fn build_embedding_text(commit: &Commit) -> String {
    let mut files = commit.files_changed.join(", ");
    if files.len() > 500 {
        let mut end = 500;
        while !files.is_char_boundary(end) {
            end -= 1;
        }
        files.truncate(end);
        files.push_str("...");
    }
    format!(
        "{}\n\nFiles: {}\n\nAuthor: {}",
        commit.message, files, commit.author
    )
}

/// Parse `file:line:content` rows from ripgrep output
fn parse_grep_lines(stdout: &str, cap: usize) -> Vec<(String, usize)> {
    stdout
        .lines()
        .take(cap)
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let file = parts.next()?;
            let line_num = parts.next()?.parse::<usize>().ok()?;
            Some((file.to_string(), line_num))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Canned reader with a fixed commit list (newest first)
    struct FakeReader {
        commits: Vec<Commit>,
        head: String,
    }

    #[async_trait]
    impl GitReader for FakeReader {
        async fn get_commits(
            &self,
            since: Option<DateTime<Utc>>,
            _until: Option<DateTime<Utc>>,
            path: Option<&str>,
            limit: usize,
        ) -> Result<Vec<Commit>, GitError> {
            Ok(self
                .commits
                .iter()
                .filter(|c| since.is_none_or(|s| c.timestamp >= s))
                .filter(|c| path.is_none_or(|p| c.files_changed.iter().any(|f| f.starts_with(p))))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn get_blame(&self, _file: &str) -> Result<Vec<super::super::BlameEntry>, GitError> {
            Ok(vec![])
        }

        async fn get_file_history(
            &self,
            file: &str,
            limit: usize,
        ) -> Result<Vec<Commit>, GitError> {
            self.get_commits(None, None, Some(file), limit).await
        }

        async fn get_head_sha(&self) -> Result<String, GitError> {
            Ok(self.head.clone())
        }

        fn get_repo_root(&self) -> String {
            "/repo".to_string()
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingService for StubEmbedder {
        fn dimension(&self) -> usize {
            4
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0_f32; 4];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += b as f32;
            }
            crate::embeddings::normalize(&mut v);
            Ok(v)
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    fn commit(sha: &str, day: u32, files: &[&str], message: &str) -> Commit {
        Commit {
            sha: sha.to_string(),
            message: message.to_string(),
            author: "Dev".to_string(),
            author_email: "dev@example.com".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 7, day, 12, 0, 0).unwrap(),
            files_changed: files.iter().map(|f| f.to_string()).collect(),
            insertions: 10,
            deletions: 2,
        }
    }

    fn analyzer(commits: Vec<Commit>, head: &str) -> (GitAnalyzer, Arc<crate::store::InMemoryStore>)
    {
        let store = Arc::new(crate::store::InMemoryStore::new());
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let reader = Arc::new(FakeReader {
            commits,
            head: head.to_string(),
        });
        (
            GitAnalyzer::new(reader, Arc::new(StubEmbedder), store.clone(), metadata),
            store,
        )
    }

    #[tokio::test]
    async fn test_full_index_then_up_to_date() {
        let commits = vec![
            commit("sha2", 20, &["b.rs"], "second"),
            commit("sha1", 10, &["a.rs"], "first"),
        ];
        let (analyzer, store) = analyzer(commits, "sha2");

        let stats = analyzer.index_commits(None, None, false).await.unwrap();
        assert_eq!(stats.commits_indexed, 2);
        assert!(stats.errors.is_empty());
        assert_eq!(store.count(collections::COMMITS, None).await.unwrap(), 2);

        // Second run: cursor equals HEAD, nothing to do
        let stats = analyzer.index_commits(None, None, false).await.unwrap();
        assert_eq!(stats.commits_indexed, 0);
    }

    #[tokio::test]
    async fn test_incremental_index_only_new_commits() {
        let old = vec![commit("sha1", 10, &["a.rs"], "first")];
        let (analyzer, store) = analyzer(old, "sha1");
        analyzer.index_commits(None, None, false).await.unwrap();

        // New commit lands on top
        let all = vec![
            commit("sha2", 20, &["b.rs"], "second"),
            commit("sha1", 10, &["a.rs"], "first"),
        ];
        let metadata = analyzer.metadata.clone();
        let store2 = store.clone();
        let analyzer2 = GitAnalyzer::new(
            Arc::new(FakeReader {
                commits: all,
                head: "sha2".to_string(),
            }),
            Arc::new(StubEmbedder),
            store2,
            metadata,
        );

        let stats = analyzer2.index_commits(None, None, false).await.unwrap();
        assert_eq!(stats.commits_indexed, 1);
        assert_eq!(store.count(collections::COMMITS, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_commits_roundtrip() {
        let commits = vec![commit("sha1", 10, &["auth.rs"], "fix token refresh race")];
        let (analyzer, _store) = analyzer(commits, "sha1");
        analyzer.index_commits(None, None, false).await.unwrap();

        let results = analyzer
            .search_commits("fix token refresh race", None, None, 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].commit.sha, "sha1");
        assert_eq!(results[0].commit.message, "fix token refresh race");
        assert_eq!(results[0].commit.insertions, 10);
    }

    #[tokio::test]
    async fn test_churn_hotspots_min_changes_and_order() {
        let commits = vec![
            commit("s4", 22, &["hot.rs"], "c4"),
            commit("s3", 21, &["hot.rs", "warm.rs"], "c3"),
            commit("s2", 20, &["hot.rs", "warm.rs"], "c2"),
            commit("s1", 19, &["cold.rs"], "c1"),
        ];
        let (analyzer, _store) = analyzer(commits, "s4");

        let hotspots = analyzer.get_churn_hotspots(90, 10, 2).await.unwrap();
        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].file_path, "hot.rs");
        assert_eq!(hotspots[0].change_count, 3);
        assert_eq!(hotspots[1].file_path, "warm.rs");
        assert_eq!(hotspots[0].authors, vec!["Dev".to_string()]);
    }

    #[tokio::test]
    async fn test_file_authors() {
        let mut second = commit("s2", 20, &["a.rs"], "c2");
        second.author = "Other".to_string();
        second.author_email = "other@example.com".to_string();
        let commits = vec![second, commit("s1", 10, &["a.rs"], "c1")];
        let (analyzer, _store) = analyzer(commits, "s2");

        let authors = analyzer.get_file_authors("a.rs").await.unwrap();
        assert_eq!(authors.len(), 2);
        assert!(authors.iter().any(|a| a.author == "Dev"));
        let dev = authors.iter().find(|a| a.author == "Dev").unwrap();
        assert_eq!(dev.commit_count, 1);
        assert_eq!(dev.lines_added, 10);
        assert_eq!(dev.first_commit, dev.last_commit);
    }

    #[tokio::test]
    async fn test_change_frequency_none_for_untouched_path() {
        let (analyzer, _store) = analyzer(vec![commit("s1", 10, &["a.rs"], "c1")], "s1");
        assert!(analyzer
            .get_change_frequency("missing.rs", None)
            .await
            .unwrap()
            .is_none());

        let record = analyzer
            .get_change_frequency("a.rs", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.change_count, 1);
    }

    #[test]
    fn test_parse_grep_lines() {
        let stdout = "src/a.rs:10:let x = 1;\nsrc/b.rs:20:fn main() {}\nbadline\n";
        let parsed = parse_grep_lines(stdout, 10);
        assert_eq!(
            parsed,
            vec![("src/a.rs".to_string(), 10), ("src/b.rs".to_string(), 20)]
        );
    }

    #[test]
    fn test_build_embedding_text_caps_files() {
        let mut c = commit("s", 10, &[], "msg");
        c.files_changed = (0..100).map(|i| format!("some/long/path/file{i}.rs")).collect();
        let text = build_embedding_text(&c);
        assert!(text.contains("msg"));
        assert!(text.contains("Author: Dev"));
        assert!(text.contains("..."));
    }
}
