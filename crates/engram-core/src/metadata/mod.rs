//! Metadata store - relational bookkeeping for incremental indexing
//!
//! A small SQLite schema (WAL mode) tracking indexed files, the call
//! graph, project configuration, and the git indexing cursor.
//! Timestamps are stored as ISO-8601 strings with offset; JSON
//! settings blobs round-trip exactly. Every write commits before the
//! call returns.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS indexed_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    project TEXT NOT NULL,
    language TEXT,
    file_hash TEXT NOT NULL,
    unit_count INTEGER DEFAULT 0,
    indexed_at TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    UNIQUE(file_path, project)
);
CREATE INDEX IF NOT EXISTS idx_indexed_files_project
    ON indexed_files(project);

CREATE TABLE IF NOT EXISTS call_graph (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    caller_qualified_name TEXT NOT NULL,
    callee_qualified_name TEXT NOT NULL,
    caller_file TEXT NOT NULL,
    callee_file TEXT NOT NULL,
    project TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    UNIQUE(caller_qualified_name, callee_qualified_name, project)
);
CREATE INDEX IF NOT EXISTS idx_call_graph_caller
    ON call_graph(caller_qualified_name, project);
CREATE INDEX IF NOT EXISTS idx_call_graph_callee
    ON call_graph(callee_qualified_name, project);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    root_path TEXT NOT NULL,
    settings TEXT DEFAULT '{}',
    created_at TEXT NOT NULL,
    last_indexed TEXT
);

CREATE TABLE IF NOT EXISTS git_index_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_path TEXT UNIQUE NOT NULL,
    last_indexed_sha TEXT,
    last_indexed_at TEXT,
    commit_count INTEGER DEFAULT 0
);
";

// ============================================================================
// RECORDS
// ============================================================================

/// An indexed source file
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFile {
    pub id: Option<i64>,
    pub file_path: String,
    pub project: String,
    pub language: String,
    pub file_hash: String,
    pub unit_count: i64,
    pub indexed_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// A call relationship between two code units
#[derive(Debug, Clone, PartialEq)]
pub struct CallGraphEntry {
    pub id: Option<i64>,
    pub caller_qualified_name: String,
    pub callee_qualified_name: String,
    pub caller_file: String,
    pub callee_file: String,
    pub project: String,
    pub indexed_at: DateTime<Utc>,
}

/// Project configuration and settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub id: Option<i64>,
    pub name: String,
    pub root_path: String,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// Git indexing cursor for one repository
#[derive(Debug, Clone, PartialEq)]
pub struct GitIndexState {
    pub id: Option<i64>,
    pub repo_path: String,
    pub last_indexed_sha: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub commit_count: i64,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Metadata store errors
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot open metadata store at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

fn parse_ts(s: &str) -> MetadataResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MetadataError::InvalidValue(format!("bad timestamp '{s}': {e}")))
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite metadata store with WAL mode for concurrent readers
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (creating if necessary) the database at `db_path` and
    /// apply the schema.
    pub fn open(db_path: impl AsRef<Path>) -> MetadataResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MetadataError::Open {
                path: db_path.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %db_path.display(), "metadata store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> MetadataResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // === Indexed files ===

    /// Add or update an indexed file record (upsert on
    /// `(file_path, project)`).
    pub async fn add_indexed_file(
        &self,
        file_path: &str,
        project: &str,
        language: &str,
        file_hash: &str,
        unit_count: i64,
        last_modified: DateTime<Utc>,
    ) -> MetadataResult<IndexedFile> {
        let conn = self.conn.lock().await;
        let indexed_at = Utc::now();
        conn.execute(
            "INSERT INTO indexed_files
                (file_path, project, language, file_hash, unit_count,
                 indexed_at, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(file_path, project) DO UPDATE SET
                language=excluded.language,
                file_hash=excluded.file_hash,
                unit_count=excluded.unit_count,
                indexed_at=excluded.indexed_at,
                last_modified=excluded.last_modified",
            params![
                file_path,
                project,
                language,
                file_hash,
                unit_count,
                indexed_at.to_rfc3339(),
                last_modified.to_rfc3339(),
            ],
        )?;

        Self::query_indexed_file(&conn, file_path, project)?.ok_or_else(|| {
            MetadataError::InvalidValue("indexed file missing after upsert".to_string())
        })
    }

    /// One indexed file record, or `None`
    pub async fn get_indexed_file(
        &self,
        file_path: &str,
        project: &str,
    ) -> MetadataResult<Option<IndexedFile>> {
        let conn = self.conn.lock().await;
        Self::query_indexed_file(&conn, file_path, project)
    }

    fn query_indexed_file(
        conn: &Connection,
        file_path: &str,
        project: &str,
    ) -> MetadataResult<Option<IndexedFile>> {
        let row = conn
            .query_row(
                "SELECT id, file_path, project, language, file_hash, unit_count,
                        indexed_at, last_modified
                 FROM indexed_files
                 WHERE file_path = ?1 AND project = ?2",
                params![file_path, project],
                Self::row_to_indexed_file,
            )
            .optional()?;
        row.transpose()
    }

    fn row_to_indexed_file(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<MetadataResult<IndexedFile>> {
        let indexed_at: String = row.get(6)?;
        let last_modified: String = row.get(7)?;
        Ok((|| {
            Ok(IndexedFile {
                id: row.get(0)?,
                file_path: row.get(1)?,
                project: row.get(2)?,
                language: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                file_hash: row.get(4)?,
                unit_count: row.get(5)?,
                indexed_at: parse_ts(&indexed_at)?,
                last_modified: parse_ts(&last_modified)?,
            })
        })())
    }

    /// All indexed files, optionally filtered by project, ordered by
    /// path
    pub async fn list_indexed_files(
        &self,
        project: Option<&str>,
    ) -> MetadataResult<Vec<IndexedFile>> {
        let conn = self.conn.lock().await;
        let mut stmt = match project {
            Some(_) => conn.prepare(
                "SELECT id, file_path, project, language, file_hash, unit_count,
                        indexed_at, last_modified
                 FROM indexed_files WHERE project = ?1 ORDER BY file_path",
            )?,
            None => conn.prepare(
                "SELECT id, file_path, project, language, file_hash, unit_count,
                        indexed_at, last_modified
                 FROM indexed_files ORDER BY file_path",
            )?,
        };

        let rows: Vec<MetadataResult<IndexedFile>> = match project {
            Some(p) => stmt
                .query_map(params![p], Self::row_to_indexed_file)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], Self::row_to_indexed_file)?
                .collect::<rusqlite::Result<_>>()?,
        };
        rows.into_iter().collect()
    }

    /// Files recorded for a project whose `file_path` is not in
    /// `current_paths` - candidates for deletion after a reindex.
    pub async fn get_stale_files(
        &self,
        project: &str,
        current_paths: &HashSet<String>,
    ) -> MetadataResult<Vec<IndexedFile>> {
        let all = self.list_indexed_files(Some(project)).await?;
        Ok(all
            .into_iter()
            .filter(|f| !current_paths.contains(&f.file_path))
            .collect())
    }

    /// Delete one indexed file record
    pub async fn delete_indexed_file(&self, file_path: &str, project: &str) -> MetadataResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM indexed_files WHERE file_path = ?1 AND project = ?2",
            params![file_path, project],
        )?;
        Ok(())
    }

    // === Call graph ===

    /// Record a call edge (upsert on the unique triple)
    pub async fn add_call_edge(
        &self,
        caller_qualified_name: &str,
        callee_qualified_name: &str,
        caller_file: &str,
        callee_file: &str,
        project: &str,
    ) -> MetadataResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO call_graph
                (caller_qualified_name, callee_qualified_name, caller_file,
                 callee_file, project, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(caller_qualified_name, callee_qualified_name, project)
             DO UPDATE SET
                caller_file=excluded.caller_file,
                callee_file=excluded.callee_file,
                indexed_at=excluded.indexed_at",
            params![
                caller_qualified_name,
                callee_qualified_name,
                caller_file,
                callee_file,
                project,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All edges whose callee matches, in a project
    pub async fn get_callers(
        &self,
        callee_qualified_name: &str,
        project: &str,
    ) -> MetadataResult<Vec<CallGraphEntry>> {
        self.query_call_graph(
            "SELECT id, caller_qualified_name, callee_qualified_name, caller_file,
                    callee_file, project, indexed_at
             FROM call_graph WHERE callee_qualified_name = ?1 AND project = ?2",
            callee_qualified_name,
            project,
        )
        .await
    }

    /// All edges whose caller matches, in a project
    pub async fn get_callees(
        &self,
        caller_qualified_name: &str,
        project: &str,
    ) -> MetadataResult<Vec<CallGraphEntry>> {
        self.query_call_graph(
            "SELECT id, caller_qualified_name, callee_qualified_name, caller_file,
                    callee_file, project, indexed_at
             FROM call_graph WHERE caller_qualified_name = ?1 AND project = ?2",
            caller_qualified_name,
            project,
        )
        .await
    }

    async fn query_call_graph(
        &self,
        sql: &str,
        qualified_name: &str,
        project: &str,
    ) -> MetadataResult<Vec<CallGraphEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<MetadataResult<CallGraphEntry>> = stmt
            .query_map(params![qualified_name, project], |row| {
                let indexed_at: String = row.get(6)?;
                Ok((|| {
                    Ok(CallGraphEntry {
                        id: row.get(0)?,
                        caller_qualified_name: row.get(1)?,
                        callee_qualified_name: row.get(2)?,
                        caller_file: row.get(3)?,
                        callee_file: row.get(4)?,
                        project: row.get(5)?,
                        indexed_at: parse_ts(&indexed_at)?,
                    })
                })())
            })?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().collect()
    }

    // === Projects ===

    /// Add or update a project configuration. Settings JSON
    /// round-trips exactly.
    pub async fn add_project(
        &self,
        name: &str,
        root_path: &str,
        settings: Option<serde_json::Value>,
    ) -> MetadataResult<ProjectConfig> {
        let conn = self.conn.lock().await;
        let settings = settings.unwrap_or_else(|| serde_json::json!({}));
        let settings_json = settings.to_string();
        conn.execute(
            "INSERT INTO projects (name, root_path, settings, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                root_path=excluded.root_path,
                settings=excluded.settings",
            params![name, root_path, settings_json, Utc::now().to_rfc3339()],
        )?;

        Self::query_project(&conn, name)?.ok_or_else(|| {
            MetadataError::InvalidValue("project missing after upsert".to_string())
        })
    }

    /// One project configuration, or `None`
    pub async fn get_project(&self, name: &str) -> MetadataResult<Option<ProjectConfig>> {
        let conn = self.conn.lock().await;
        Self::query_project(&conn, name)
    }

    fn query_project(conn: &Connection, name: &str) -> MetadataResult<Option<ProjectConfig>> {
        let row = conn
            .query_row(
                "SELECT id, name, root_path, settings, created_at, last_indexed
                 FROM projects WHERE name = ?1",
                params![name],
                |row| {
                    let settings: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    let last_indexed: Option<String> = row.get(5)?;
                    Ok((|| {
                        Ok(ProjectConfig {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            root_path: row.get(2)?,
                            settings: serde_json::from_str(&settings).map_err(|e| {
                                MetadataError::InvalidValue(format!("bad settings JSON: {e}"))
                            })?,
                            created_at: parse_ts(&created_at)?,
                            last_indexed: last_indexed.as_deref().map(parse_ts).transpose()?,
                        })
                    })())
                },
            )
            .optional()?;
        row.transpose()
    }

    /// Record a completed index run for a project
    pub async fn touch_project_indexed(&self, name: &str) -> MetadataResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE projects SET last_indexed = ?1 WHERE name = ?2",
            params![Utc::now().to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Delete a project and all its associated rows
    pub async fn delete_project(&self, name: &str) -> MetadataResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM call_graph WHERE project = ?1", params![name])?;
        conn.execute(
            "DELETE FROM indexed_files WHERE project = ?1",
            params![name],
        )?;
        conn.execute("DELETE FROM projects WHERE name = ?1", params![name])?;
        Ok(())
    }

    // === Git index state ===

    /// The indexing cursor for one repository, or `None`
    pub async fn get_git_index_state(
        &self,
        repo_path: &str,
    ) -> MetadataResult<Option<GitIndexState>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, repo_path, last_indexed_sha, last_indexed_at, commit_count
                 FROM git_index_state WHERE repo_path = ?1",
                params![repo_path],
                |row| {
                    let last_indexed_at: Option<String> = row.get(3)?;
                    Ok((|| {
                        Ok(GitIndexState {
                            id: row.get(0)?,
                            repo_path: row.get(1)?,
                            last_indexed_sha: row.get(2)?,
                            last_indexed_at: last_indexed_at
                                .as_deref()
                                .map(parse_ts)
                                .transpose()?,
                            commit_count: row.get(4)?,
                        })
                    })())
                },
            )
            .optional()?;
        row.transpose()
    }

    /// Advance the cursor after indexing `count` commits.
    /// `commit_count` accumulates across runs.
    pub async fn update_git_index_state(
        &self,
        repo_path: &str,
        last_sha: &str,
        count: i64,
    ) -> MetadataResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO git_index_state (
                repo_path, last_indexed_sha, last_indexed_at, commit_count
             )
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_path) DO UPDATE SET
                last_indexed_sha=excluded.last_indexed_sha,
                last_indexed_at=excluded.last_indexed_at,
                commit_count=commit_count + excluded.commit_count",
            params![repo_path, last_sha, Utc::now().to_rfc3339(), count],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
