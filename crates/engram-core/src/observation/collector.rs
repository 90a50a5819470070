//! Observation collector - local GHAP state machine
//!
//! Single source of truth for the active entry and the session's
//! resolved entries, backed by a filesystem journal:
//!
//! ```text
//! journal/
//!   .session_id             current session id, absent if none
//!   .tool_count             tool-call counter
//!   current_ghap.json       the active entry, absent if none
//!   session_entries.jsonl   append-only log of resolved entries
//!   archive/
//!     {yyyymmdd}_{session_id}.jsonl
//! ```
//!
//! Every mutation writes a temp file in the same directory and renames
//! it over the target. A corrupted `current_ghap.json` is renamed
//! aside as `current_ghap.corrupted.{unix_ts}` and treated as
//! "no active entry".

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::ids::{generate_ghap_id, generate_session_id};

use super::models::{
    compute_confidence_tier, truncate_text, ConfidenceTier, Domain, GhapEntry, HistoryEntry,
    Lesson, Outcome, OutcomeStatus, RootCause, Strategy,
};

// ============================================================================
// ERRORS
// ============================================================================

/// Journal state machine errors
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// A GHAP entry is already active; resolve or abandon it first
    #[error("GHAP entry {0} is already active")]
    AlreadyActive(String),

    /// No active entry for update/resolve
    #[error("{0}")]
    NotFound(String),

    /// The journal directory cannot be read or written
    #[error("journal corrupted: {0}")]
    Corrupted(String),
}

pub type JournalResult<T> = Result<T, JournalError>;

// ============================================================================
// UPDATE INPUT
// ============================================================================

/// Fields accepted by [`ObservationCollector::update`]
#[derive(Debug, Clone, Default)]
pub struct GhapUpdate {
    pub hypothesis: Option<String>,
    pub action: Option<String>,
    pub prediction: Option<String>,
    pub strategy: Option<Strategy>,
    pub note: Option<String>,
}

/// Fields accepted by [`ObservationCollector::resolve`]
#[derive(Debug, Clone)]
pub struct GhapResolution {
    pub status: OutcomeStatus,
    pub result: String,
    pub surprise: Option<String>,
    pub root_cause: Option<RootCause>,
    pub lesson: Option<Lesson>,
    pub auto_captured: bool,
}

// ============================================================================
// COLLECTOR
// ============================================================================

/// Local GHAP state machine using file-based persistence.
///
/// The journal directory is owned by one process per agent; concurrent
/// agents must use distinct directories.
pub struct ObservationCollector {
    journal_dir: PathBuf,
    archive_dir: PathBuf,
}

impl ObservationCollector {
    /// Open (creating if necessary) a journal at `journal_dir`.
    pub fn new(journal_dir: impl Into<PathBuf>) -> JournalResult<Self> {
        let journal_dir = journal_dir.into();
        let archive_dir = journal_dir.join("archive");
        std::fs::create_dir_all(&archive_dir)
            .map_err(|e| JournalError::Corrupted(format!("cannot create journal dir: {e}")))?;
        Ok(Self {
            journal_dir,
            archive_dir,
        })
    }

    /// The journal directory this collector owns
    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    // === GHAP lifecycle ===

    /// Create a new GHAP entry. Fails if one is already active in the
    /// current session; auto-starts a session if none exists. An
    /// orphaned entry (previous session) does not block creation: it
    /// is sealed as abandoned into its original session's archive
    /// first.
    pub async fn create(
        &self,
        domain: Domain,
        strategy: Strategy,
        goal: &str,
        hypothesis: &str,
        action: &str,
        prediction: &str,
    ) -> JournalResult<GhapEntry> {
        if let Some(current) = self.get_current().await? {
            if Some(&current.session_id) == self.get_session_id().await.as_ref() {
                warn!(current_id = %current.id, "ghap already active");
                return Err(JournalError::AlreadyActive(current.id));
            }
            warn!(orphan_id = %current.id, "abandoning orphan superseded by new entry");
            self.abandon_orphan("superseded by new entry").await?;
        }

        let session_id = match self.get_session_id().await {
            Some(id) => id,
            None => self.start_session().await?,
        };

        let entry = GhapEntry {
            id: generate_ghap_id(),
            session_id,
            created_at: Utc::now(),
            domain,
            strategy,
            goal: truncate_text(goal),
            hypothesis: truncate_text(hypothesis),
            action: truncate_text(action),
            prediction: truncate_text(prediction),
            iteration_count: 1,
            history: vec![],
            notes: vec![],
            outcome: None,
            surprise: None,
            root_cause: None,
            lesson: None,
            confidence_tier: None,
        };

        self.save_current(&entry).await?;
        info!(ghap_id = %entry.id, domain = %entry.domain, strategy = %entry.strategy, "ghap created");
        Ok(entry)
    }

    /// Update the active entry.
    ///
    /// A change to any of hypothesis/action/prediction pushes the
    /// prior triple onto the history and bumps `iteration_count`.
    /// Strategy and note updates do not produce history.
    pub async fn update(&self, update: GhapUpdate) -> JournalResult<GhapEntry> {
        let mut current = self
            .get_current()
            .await?
            .ok_or_else(|| JournalError::NotFound("No active GHAP entry to update".into()))?;

        let hap_changing = update
            .hypothesis
            .as_deref()
            .is_some_and(|h| h != current.hypothesis)
            || update.action.as_deref().is_some_and(|a| a != current.action)
            || update
                .prediction
                .as_deref()
                .is_some_and(|p| p != current.prediction);

        if hap_changing {
            current.history.push(HistoryEntry {
                timestamp: Utc::now(),
                hypothesis: current.hypothesis.clone(),
                action: current.action.clone(),
                prediction: current.prediction.clone(),
            });
            current.iteration_count += 1;

            if let Some(h) = &update.hypothesis {
                current.hypothesis = truncate_text(h);
            }
            if let Some(a) = &update.action {
                current.action = truncate_text(a);
            }
            if let Some(p) = &update.prediction {
                current.prediction = truncate_text(p);
            }
        }

        if let Some(strategy) = update.strategy {
            current.strategy = strategy;
        }

        if let Some(note) = &update.note {
            current.notes.push(truncate_text(note));
        }

        self.save_current(&current).await?;
        info!(
            ghap_id = %current.id,
            iteration = current.iteration_count,
            hap_changed = hap_changing,
            "ghap updated"
        );
        Ok(current)
    }

    /// Resolve the active entry: seal it with an outcome, compute the
    /// confidence tier, append it to `session_entries.jsonl`, then
    /// remove `current_ghap.json`.
    pub async fn resolve(&self, resolution: GhapResolution) -> JournalResult<GhapEntry> {
        let mut current = self
            .get_current()
            .await?
            .ok_or_else(|| JournalError::NotFound("No active GHAP entry to resolve".into()))?;

        current.outcome = Some(Outcome {
            status: resolution.status,
            result: truncate_text(&resolution.result),
            captured_at: Utc::now(),
            auto_captured: resolution.auto_captured,
        });
        if let Some(surprise) = &resolution.surprise {
            current.surprise = Some(truncate_text(surprise));
        }
        if let Some(root_cause) = resolution.root_cause {
            current.root_cause = Some(root_cause);
        }
        if let Some(lesson) = resolution.lesson {
            current.lesson = Some(lesson);
        }
        current.confidence_tier = Some(compute_confidence_tier(&current));

        self.append_session_entry(&current).await?;
        self.clear_current().await?;

        info!(
            ghap_id = %current.id,
            status = %resolution.status,
            tier = %current.confidence_tier.unwrap_or(ConfidenceTier::Bronze),
            iterations = current.iteration_count,
            "ghap resolved"
        );
        Ok(current)
    }

    /// Abandon the active entry without resolution.
    pub async fn abandon(&self, reason: &str) -> JournalResult<GhapEntry> {
        self.resolve(GhapResolution {
            status: OutcomeStatus::Abandoned,
            result: reason.to_string(),
            surprise: None,
            root_cause: None,
            lesson: None,
            auto_captured: false,
        })
        .await
    }

    // === State access ===

    /// The active entry, or `None` if none is active
    pub async fn get_current(&self) -> JournalResult<Option<GhapEntry>> {
        self.load_current().await
    }

    /// All resolved entries from the current session
    pub async fn get_session_entries(&self) -> JournalResult<Vec<GhapEntry>> {
        self.load_session_entries().await
    }

    /// True when `current_ghap.json` exists but belongs to a previous
    /// session.
    pub async fn has_orphaned_entry(&self) -> JournalResult<bool> {
        let Some(current) = self.get_current().await? else {
            return Ok(false);
        };
        let current_session = self.get_session_id().await;
        Ok(Some(current.session_id) != current_session)
    }

    /// The orphaned entry, if one exists
    pub async fn get_orphaned_entry(&self) -> JournalResult<Option<GhapEntry>> {
        if self.has_orphaned_entry().await? {
            self.get_current().await
        } else {
            Ok(None)
        }
    }

    /// Adopt an orphaned entry into the current session. Rewrites only
    /// `session_id`; every other field, `created_at` included, is
    /// preserved.
    pub async fn adopt_orphan(&self) -> JournalResult<Option<GhapEntry>> {
        let Some(mut orphan) = self.get_orphaned_entry().await? else {
            return Ok(None);
        };

        let session_id = match self.get_session_id().await {
            Some(id) => id,
            None => self.start_session().await?,
        };

        orphan.session_id = session_id.clone();
        self.save_current(&orphan).await?;

        info!(ghap_id = %orphan.id, new_session_id = %session_id, "orphan adopted");
        Ok(Some(orphan))
    }

    /// Abandon an orphaned entry without adopting it. The sealed entry
    /// is archived into its original session's archive file; the
    /// current session's entries are untouched.
    pub async fn abandon_orphan(&self, reason: &str) -> JournalResult<Option<GhapEntry>> {
        let Some(mut orphan) = self.get_orphaned_entry().await? else {
            return Ok(None);
        };

        orphan.outcome = Some(Outcome {
            status: OutcomeStatus::Abandoned,
            result: truncate_text(reason),
            captured_at: Utc::now(),
            auto_captured: false,
        });
        orphan.confidence_tier = Some(ConfidenceTier::Abandoned);

        let original_session = orphan.session_id.clone();
        self.archive_entry_to_session(&orphan, &original_session)
            .await?;
        self.clear_current().await?;

        info!(ghap_id = %orphan.id, original_session_id = %original_session, "orphan abandoned");
        Ok(Some(orphan))
    }

    // === Session management ===

    /// Start a new session. Any entries from the previous session are
    /// archived first.
    pub async fn start_session(&self) -> JournalResult<String> {
        if let Some(old_session_id) = self.get_session_id().await {
            let entries = self.get_session_entries().await?;
            if !entries.is_empty() {
                self.archive_session(&old_session_id, &entries).await?;
                self.clear_session_entries().await;
            }
        }

        let session_id = generate_session_id();
        atomic_write(&self.journal_dir.join(".session_id"), &session_id).await?;

        info!(session_id = %session_id, "session started");
        Ok(session_id)
    }

    /// Current session id, or `None` if no session has been started
    pub async fn get_session_id(&self) -> Option<String> {
        let path = self.journal_dir.join(".session_id");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                error!(error = %e, "error reading session id");
                None
            }
        }
    }

    /// End the current session: abandon any active entry with reason
    /// "session ended", archive the session's entries, clear the
    /// session id and tool counter. Returns all entries from the
    /// session, the abandoned one included.
    pub async fn end_session(&self) -> JournalResult<Vec<GhapEntry>> {
        if self.get_current().await?.is_some() {
            self.abandon("session ended").await?;
        }

        let entries = self.get_session_entries().await?;
        let session_id = self.get_session_id().await;

        if let Some(session_id) = &session_id {
            if !entries.is_empty() {
                self.archive_session(session_id, &entries).await?;
            }
        }

        self.clear_session_entries().await;
        let _ = tokio::fs::remove_file(self.journal_dir.join(".session_id")).await;
        let _ = tokio::fs::remove_file(self.journal_dir.join(".tool_count")).await;

        info!(
            session_id = session_id.as_deref().unwrap_or("-"),
            entries_archived = entries.len(),
            "session ended"
        );
        Ok(entries)
    }

    // === Tool check-in ===

    /// Increment the tool-call counter, returning the new count. The
    /// counter persists across process restarts within a session.
    pub async fn increment_tool_count(&self) -> JournalResult<u64> {
        let path = self.journal_dir.join(".tool_count");
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content.trim().parse::<u64>().unwrap_or(0),
            Err(_) => 0,
        };
        let new_count = current + 1;
        atomic_write(&path, &new_count.to_string()).await?;
        Ok(new_count)
    }

    /// True iff the counter has reached `frequency` and an entry is
    /// active.
    pub async fn should_check_in(&self, frequency: u64) -> JournalResult<bool> {
        if self.get_current().await?.is_none() {
            return Ok(false);
        }
        let path = self.journal_dir.join(".tool_count");
        let count = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content.trim().parse::<u64>().unwrap_or(0),
            Err(_) => return Ok(false),
        };
        Ok(count >= frequency)
    }

    /// Reset the tool counter to zero (after a check-in prompt).
    pub async fn reset_tool_count(&self) -> JournalResult<()> {
        atomic_write(&self.journal_dir.join(".tool_count"), "0").await
    }

    // === Internal helpers ===

    async fn load_current(&self) -> JournalResult<Option<GhapEntry>> {
        let path = self.journal_dir.join("current_ghap.json");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                error!(path = %path.display(), error = %e, "permission denied reading ghap");
                return Err(JournalError::Corrupted(format!("cannot read journal: {e}")));
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "io error reading ghap");
                return Err(JournalError::Corrupted(format!("journal I/O error: {e}")));
            }
        };

        match serde_json::from_str::<GhapEntry>(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // Corrupted file: quarantine and report no active entry
                let backup = path.with_extension(format!("corrupted.{}", Utc::now().timestamp()));
                if let Err(rename_err) = tokio::fs::rename(&path, &backup).await {
                    error!(error = %rename_err, "failed to quarantine corrupted ghap");
                }
                error!(
                    file = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "corrupted ghap backed up"
                );
                Ok(None)
            }
        }
    }

    async fn save_current(&self, entry: &GhapEntry) -> JournalResult<()> {
        let path = self.journal_dir.join("current_ghap.json");
        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| JournalError::Corrupted(format!("cannot serialize entry: {e}")))?;
        atomic_write(&path, &json).await?;
        debug!(ghap_id = %entry.id, "ghap saved");
        Ok(())
    }

    async fn clear_current(&self) -> JournalResult<()> {
        let path = self.journal_dir.join("current_ghap.json");
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JournalError::Corrupted(format!(
                "cannot clear current ghap: {e}"
            ))),
        }
    }

    async fn load_session_entries(&self) -> JournalResult<Vec<GhapEntry>> {
        let path = self.journal_dir.join("session_entries.jsonl");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                error!(error = %e, "error reading session entries");
                return Ok(vec![]);
            }
        };

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<GhapEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(line_num = line_num + 1, error = %e, "corrupt entry skipped");
                }
            }
        }
        Ok(entries)
    }

    async fn append_session_entry(&self, entry: &GhapEntry) -> JournalResult<()> {
        let path = self.journal_dir.join("session_entries.jsonl");
        let json = serde_json::to_string(entry)
            .map_err(|e| JournalError::Corrupted(format!("cannot serialize entry: {e}")))?;
        append_line(&path, &json).await.map_err(|e| {
            error!(error = %e, "error appending session entry");
            JournalError::Corrupted(format!("cannot append to session entries: {e}"))
        })
    }

    async fn clear_session_entries(&self) {
        let _ = tokio::fs::remove_file(self.journal_dir.join("session_entries.jsonl")).await;
    }

    fn archive_path(&self, session_id: &str) -> PathBuf {
        // session_{YYYYMMDD}_... embeds the date used in the file name
        let date = session_id
            .split('_')
            .nth(1)
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().format("%Y%m%d").to_string());
        self.archive_dir.join(format!("{date}_{session_id}.jsonl"))
    }

    async fn archive_session(&self, session_id: &str, entries: &[GhapEntry]) -> JournalResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let path = self.archive_path(session_id);
        let mut body = String::new();
        for entry in entries {
            let json = serde_json::to_string(entry)
                .map_err(|e| JournalError::Corrupted(format!("cannot serialize entry: {e}")))?;
            body.push_str(&json);
            body.push('\n');
        }
        atomic_write(&path, &body).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "error archiving session");
            e
        })?;
        info!(
            session_id = %session_id,
            archive_file = %path.display(),
            entry_count = entries.len(),
            "session archived"
        );
        Ok(())
    }

    async fn archive_entry_to_session(
        &self,
        entry: &GhapEntry,
        session_id: &str,
    ) -> JournalResult<()> {
        let path = self.archive_path(session_id);
        let json = serde_json::to_string(entry)
            .map_err(|e| JournalError::Corrupted(format!("cannot serialize entry: {e}")))?;
        append_line(&path, &json).await.map_err(|e| {
            error!(ghap_id = %entry.id, error = %e, "error archiving entry");
            JournalError::Corrupted(format!("cannot archive entry: {e}"))
        })?;
        info!(
            ghap_id = %entry.id,
            session_id = %session_id,
            archive_file = %path.display(),
            "entry archived to session"
        );
        Ok(())
    }
}

// ============================================================================
// FILE PRIMITIVES
// ============================================================================

/// Write `content` to a temp file next to `path` and rename it over
/// the target. Rename within one directory is atomic on POSIX.
async fn atomic_write(path: &Path, content: &str) -> JournalResult<()> {
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| JournalError::Corrupted(format!("cannot write journal: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| JournalError::Corrupted(format!("journal write failed: {e}")))
}

/// Append one line to a JSONL file. Appends are not atomic but the
/// file is append-only and readers tolerate a torn trailing line.
async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

// ============================================================================
// TESTS
// ============================================================================
