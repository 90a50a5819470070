//! Observation persister - multi-axis embedding
//!
//! Converts a resolved GHAP entry into one to four vector rows, one
//! per semantic axis. Each axis has a fixed plain-text rendering;
//! the rendered text is the sole input to the embedding model.
//! Payloads are never embedded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::collections::{experience_collection, Axis};
use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::store::{Distance, Payload, StoreError, VectorStore};

use super::models::{GhapEntry, OutcomeStatus};

// ============================================================================
// ERRORS
// ============================================================================

/// Persister errors
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Persisting an entry whose outcome is unset is a programmer error
    #[error("entry {0} has no outcome; only resolved entries can be persisted")]
    Unresolved(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// PERSISTER
// ============================================================================

/// Multi-axis persister for resolved GHAP entries
pub struct ObservationPersister {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    collections_ensured: AtomicBool,
}

impl ObservationPersister {
    pub fn new(embedder: Arc<dyn EmbeddingService>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            collections_ensured: AtomicBool::new(false),
        }
    }

    /// Create the four axis collections with the embedder's dimension.
    /// Already-existing collections are treated as success. Idempotent
    /// and safe under double-initialisation.
    pub async fn ensure_collections(&self) -> Result<(), PersistError> {
        if self.collections_ensured.load(Ordering::Acquire) {
            return Ok(());
        }
        let dimension = self.embedder.dimension();
        for axis in Axis::ALL {
            let name = experience_collection(axis);
            match self
                .store
                .create_collection(&name, dimension, Distance::Cosine)
                .await
            {
                Ok(()) => info!(collection = %name, "collection created"),
                Err(StoreError::CollectionExists(_)) => {
                    debug!(collection = %name, "collection exists")
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.collections_ensured.store(true, Ordering::Release);
        Ok(())
    }

    /// Persist one resolved entry across its selected axes. Idempotent:
    /// upserts are keyed by the entry id.
    pub async fn persist(&self, entry: &GhapEntry) -> Result<Vec<Axis>, PersistError> {
        if !entry.is_resolved() {
            return Err(PersistError::Unresolved(entry.id.clone()));
        }

        self.ensure_collections().await?;

        let axes = determine_axes(entry);
        for &axis in &axes {
            let text = render_axis(axis, entry);
            let vector = self.embedder.embed(&text).await?;
            let payload = build_axis_payload(entry, axis);
            self.store
                .upsert(&experience_collection(axis), &entry.id, vector, payload)
                .await?;
        }

        info!(ghap_id = %entry.id, axes = axes.len(), "entry persisted");
        Ok(axes)
    }

    /// Persist a batch of resolved entries. All entries are validated
    /// up front; nothing is written if any entry is unresolved.
    pub async fn persist_batch(&self, entries: &[GhapEntry]) -> Result<usize, PersistError> {
        for entry in entries {
            if !entry.is_resolved() {
                return Err(PersistError::Unresolved(entry.id.clone()));
            }
        }
        let mut rows = 0;
        for entry in entries {
            rows += self.persist(entry).await?.len();
        }
        Ok(rows)
    }
}

// ============================================================================
// AXIS SELECTION
// ============================================================================

/// Which axes a resolved entry projects into.
///
/// - full and strategy: always
/// - surprise: falsified with a non-empty surprise
/// - root_cause: falsified with root cause AND non-empty surprise
pub fn determine_axes(entry: &GhapEntry) -> Vec<Axis> {
    let mut axes = vec![Axis::Full, Axis::Strategy];

    let falsified = entry
        .outcome
        .as_ref()
        .is_some_and(|o| o.status == OutcomeStatus::Falsified);
    let has_surprise = entry.surprise.as_deref().is_some_and(|s| !s.is_empty());

    if falsified && has_surprise {
        axes.push(Axis::Surprise);
        if entry.root_cause.is_some() {
            axes.push(Axis::RootCause);
        }
    }
    axes
}

// ============================================================================
// RENDERING
// ============================================================================

fn nonempty(opt: Option<&str>) -> Option<&str> {
    opt.filter(|s| !s.is_empty())
}

/// Render the fixed plain-text projection for one axis. Missing
/// optional fields omit their line entirely (an empty string counts
/// as missing).
pub fn render_axis(axis: Axis, entry: &GhapEntry) -> String {
    let outcome = entry.outcome.as_ref();
    let status = outcome.map(|o| o.status.as_str()).unwrap_or("unresolved");
    let result = outcome.map(|o| o.result.as_str()).unwrap_or("");

    let mut lines: Vec<String> = Vec::new();
    match axis {
        Axis::Full => {
            lines.push(format!("Goal: {}", entry.goal));
            lines.push(format!("Hypothesis: {}", entry.hypothesis));
            lines.push(format!("Action: {}", entry.action));
            lines.push(format!("Prediction: {}", entry.prediction));
            lines.push(format!("Outcome: {status} - {result}"));
            if let Some(surprise) = nonempty(entry.surprise.as_deref()) {
                lines.push(format!("Surprise: {surprise}"));
            }
            if let Some(lesson) = &entry.lesson {
                if !lesson.what_worked.is_empty() {
                    lines.push(format!("Lesson: {}", lesson.what_worked));
                }
            }
        }
        Axis::Strategy => {
            lines.push(format!("Strategy: {}", entry.strategy));
            lines.push(format!("Applied to: {}", entry.goal));
            lines.push(format!(
                "Outcome: {status} after {} iteration(s)",
                entry.iteration_count
            ));
            if let Some(lesson) = &entry.lesson {
                if !lesson.what_worked.is_empty() {
                    lines.push(format!("What worked: {}", lesson.what_worked));
                }
            }
        }
        Axis::Surprise => {
            lines.push(format!("Expected: {}", entry.prediction));
            lines.push(format!("Actual: {result}"));
            if let Some(surprise) = nonempty(entry.surprise.as_deref()) {
                lines.push(format!("Surprise: {surprise}"));
            }
            if let Some(root_cause) = &entry.root_cause {
                lines.push(format!(
                    "Root cause: {} - {}",
                    root_cause.category, root_cause.description
                ));
            }
        }
        Axis::RootCause => {
            if let Some(root_cause) = &entry.root_cause {
                lines.push(format!("Category: {}", root_cause.category));
                lines.push(format!("Description: {}", root_cause.description));
            }
            lines.push(format!("Context: {} - {}", entry.domain, entry.strategy));
            lines.push(format!("Original hypothesis: {}", entry.hypothesis));
        }
    }
    lines.join("\n")
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Payload common to every axis row
pub fn build_payload(entry: &GhapEntry) -> Payload {
    let outcome = entry.outcome.as_ref();
    let mut payload = Payload::new();
    payload.insert("ghap_id".into(), json!(entry.id));
    payload.insert("session_id".into(), json!(entry.session_id));
    payload.insert("created_at".into(), json!(entry.created_at.to_rfc3339()));
    payload.insert(
        "created_at_ts".into(),
        json!(entry.created_at.timestamp() as f64),
    );
    payload.insert(
        "captured_at".into(),
        json!(outcome.map(|o| o.captured_at.timestamp() as f64)),
    );
    payload.insert("domain".into(), json!(entry.domain.as_str()));
    payload.insert("strategy".into(), json!(entry.strategy.as_str()));
    payload.insert(
        "outcome_status".into(),
        json!(outcome.map(|o| o.status.as_str())),
    );
    payload.insert(
        "confidence_tier".into(),
        json!(entry.confidence_tier.map(|t| t.as_str())),
    );
    payload.insert("iteration_count".into(), json!(entry.iteration_count));

    // Text fields used by keyword search and result mapping
    payload.insert("goal".into(), json!(entry.goal));
    payload.insert("hypothesis".into(), json!(entry.hypothesis));
    payload.insert("action".into(), json!(entry.action));
    payload.insert("prediction".into(), json!(entry.prediction));
    payload.insert(
        "outcome_result".into(),
        json!(outcome.map(|o| o.result.as_str()).unwrap_or("")),
    );
    if let Some(surprise) = nonempty(entry.surprise.as_deref()) {
        payload.insert("surprise".into(), json!(surprise));
    }
    if let Some(lesson) = &entry.lesson {
        payload.insert("lesson".into(), json!(lesson.what_worked));
    }
    payload
}

/// Payload for one axis: the common payload plus `root_cause_category`
/// on the surprise and root_cause axes.
pub fn build_axis_payload(entry: &GhapEntry, axis: Axis) -> Payload {
    let mut payload = build_payload(entry);
    if matches!(axis, Axis::Surprise | Axis::RootCause) {
        if let Some(root_cause) = &entry.root_cause {
            payload.insert(
                "root_cause_category".into(),
                json!(root_cause.category.as_str()),
            );
        }
    }
    payload
}

// ============================================================================
// TESTS
// ============================================================================
