//! Vector store abstraction
//!
//! The production binding is a remote index engine reached over the
//! network; this module defines the trait every binding satisfies,
//! the payload filter grammar, and an in-memory reference
//! implementation used by tests and standalone deployments.

mod filters;
mod memory;

pub use filters::{build, matches_filters, FilterValue, Filters};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Payload dictionary stored next to a vector
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Distance metric for a collection. Only cosine is used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
}

/// A stored row returned by search/scroll/get
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    /// Similarity score for search results; 0.0 for scroll/get
    pub score: f32,
    pub payload: Payload,
    /// Present only when requested with `with_vectors`
    pub vector: Option<Vec<f32>>,
}

/// Collection metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub vector_count: usize,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Vector store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("collection {0} not found")]
    CollectionNotFound(String),

    #[error("collection {0} already exists")]
    CollectionExists(String),

    #[error("vector dimension {got} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid collection dimension: {0}")]
    InvalidDimension(usize),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// TRAIT
// ============================================================================

/// Operations every vector store binding must provide.
///
/// Upserts are last-writer-wins by id; no cross-row ordering is
/// guaranteed. Search results are ordered by score descending with a
/// stable tiebreak. Implementations must not assume any particular
/// index structure.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection. Fails with [`StoreError::CollectionExists`]
    /// if the name is taken, [`StoreError::InvalidDimension`] for a
    /// zero dimension.
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> StoreResult<()>;

    /// Delete a collection and all its rows.
    async fn delete_collection(&self, name: &str) -> StoreResult<()>;

    /// Insert or overwrite the row with this id.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Payload,
    ) -> StoreResult<()>;

    /// Top-`limit` rows by cosine similarity to `query`, filter-first,
    /// ordered by score descending.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<StoredRecord>>;

    /// An unordered page of rows matching the filters.
    async fn scroll(
        &self,
        collection: &str,
        limit: usize,
        filters: Option<&Filters>,
        with_vectors: bool,
    ) -> StoreResult<Vec<StoredRecord>>;

    /// Number of rows matching the filters.
    async fn count(&self, collection: &str, filters: Option<&Filters>) -> StoreResult<usize>;

    /// A single row by id, or `None`.
    async fn get(
        &self,
        collection: &str,
        id: &str,
        with_vector: bool,
    ) -> StoreResult<Option<StoredRecord>>;

    /// Delete a row by id. Deleting an absent id is not an error.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Collection metadata, or `None` if it does not exist.
    async fn collection_info(&self, name: &str) -> StoreResult<Option<CollectionInfo>>;
}
