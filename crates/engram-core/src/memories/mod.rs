//! Free-form memory storage
//!
//! Memories are short agent-curated records (facts, preferences,
//! workflow notes) embedded and stored in the `memories` collection.
//! Retrieval goes through the [`crate::search::Searcher`]; this module
//! owns the write path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collections;
use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::ids::generate_memory_id;
use crate::store::{Distance, Filters, Payload, StoreError, VectorStore};

// ============================================================================
// CATEGORY
// ============================================================================

/// Memory category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Fact,
    Preference,
    Context,
    Workflow,
    Goal,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 5] = [
        MemoryCategory::Fact,
        MemoryCategory::Preference,
        MemoryCategory::Context,
        MemoryCategory::Workflow,
        MemoryCategory::Goal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Fact => "fact",
            MemoryCategory::Preference => "preference",
            MemoryCategory::Context => "context",
            MemoryCategory::Workflow => "workflow",
            MemoryCategory::Goal => "goal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|c| c.as_str() == s).copied()
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// A stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub importance: f64,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Memory bank errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("invalid memory id '{0}': not a UUID")]
    InvalidId(String),

    #[error("memory content cannot be empty")]
    EmptyContent,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// MEMORY BANK
// ============================================================================

/// Write path for the `memories` collection
pub struct MemoryBank {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    collection_ensured: AtomicBool,
}

impl MemoryBank {
    pub fn new(embedder: Arc<dyn EmbeddingService>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            collection_ensured: AtomicBool::new(false),
        }
    }

    async fn ensure_collection(&self) -> Result<(), MemoryError> {
        if self.collection_ensured.load(Ordering::Acquire) {
            return Ok(());
        }
        match self
            .store
            .create_collection(
                collections::MEMORIES,
                self.embedder.dimension(),
                Distance::Cosine,
            )
            .await
        {
            Ok(()) => info!(collection = collections::MEMORIES, "collection created"),
            Err(StoreError::CollectionExists(_)) => {
                debug!(collection = collections::MEMORIES, "collection exists")
            }
            Err(e) => return Err(e.into()),
        }
        self.collection_ensured.store(true, Ordering::Release);
        Ok(())
    }

    /// Store a memory: embed the content and upsert it under a fresh
    /// UUID. Importance is clamped to [0, 1].
    pub async fn store(
        &self,
        content: &str,
        category: MemoryCategory,
        importance: f64,
        tags: Vec<String>,
    ) -> Result<MemoryRecord, MemoryError> {
        if content.trim().is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        self.ensure_collection().await?;

        let record = MemoryRecord {
            id: generate_memory_id(),
            content: content.to_string(),
            category,
            importance: importance.clamp(0.0, 1.0),
            tags,
            created_at: Utc::now(),
        };

        let vector = self.embedder.embed(&record.content).await?;
        let mut payload = Payload::new();
        payload.insert("id".into(), json!(record.id));
        payload.insert("content".into(), json!(record.content));
        payload.insert("category".into(), json!(record.category.as_str()));
        payload.insert("importance".into(), json!(record.importance));
        payload.insert("tags".into(), json!(record.tags));
        payload.insert("created_at".into(), json!(record.created_at.to_rfc3339()));
        payload.insert(
            "created_at_ts".into(),
            json!(record.created_at.timestamp() as f64),
        );

        self.store
            .upsert(collections::MEMORIES, &record.id, vector, payload)
            .await?;

        info!(memory_id = %record.id, category = %record.category, "memory stored");
        Ok(record)
    }

    /// Delete a memory by id. The id must be a UUID; deleting an
    /// absent id succeeds (store deletes are idempotent).
    pub async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        if Uuid::parse_str(id).is_err() {
            return Err(MemoryError::InvalidId(id.to_string()));
        }
        self.ensure_collection().await?;
        self.store.delete(collections::MEMORIES, id).await?;
        info!(memory_id = %id, "memory deleted");
        Ok(())
    }

    /// List memories, optionally filtered by category, newest first.
    pub async fn list(
        &self,
        category: Option<MemoryCategory>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.ensure_collection().await?;

        let filters = category.map(|c| {
            Filters::from([(
                "category".to_string(),
                crate::store::FilterValue::Eq(json!(c.as_str())),
            )])
        });

        let records = self
            .store
            .scroll(collections::MEMORIES, limit, filters.as_ref(), false)
            .await?;

        let mut memories: Vec<MemoryRecord> = records
            .iter()
            .filter_map(|r| {
                let p = &r.payload;
                Some(MemoryRecord {
                    id: r.id.clone(),
                    content: p.get("content")?.as_str()?.to_string(),
                    category: MemoryCategory::parse(p.get("category")?.as_str()?)?,
                    importance: p.get("importance").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    tags: p
                        .get("tags")
                        .and_then(|v| v.as_array())
                        .map(|a| {
                            a.iter()
                                .filter_map(|t| t.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default(),
                    created_at: p
                        .get("created_at")
                        .and_then(|v| v.as_str())
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc))?,
                })
            })
            .collect();

        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(memories)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

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

    fn bank() -> (MemoryBank, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (MemoryBank::new(Arc::new(StubEmbedder), store.clone()), store)
    }

    #[tokio::test]
    async fn test_store_and_list() {
        let (bank, _store) = bank();
        let record = bank
            .store(
                "prefers tabs over spaces",
                MemoryCategory::Preference,
                0.9,
                vec!["style".to_string()],
            )
            .await
            .unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.importance, 0.9);

        let listed = bank.list(None, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], record);
    }

    #[tokio::test]
    async fn test_importance_clamped() {
        let (bank, _store) = bank();
        let high = bank
            .store("a", MemoryCategory::Fact, 7.0, vec![])
            .await
            .unwrap();
        assert_eq!(high.importance, 1.0);
        let low = bank
            .store("b", MemoryCategory::Fact, -3.0, vec![])
            .await
            .unwrap();
        assert_eq!(low.importance, 0.0);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let (bank, _store) = bank();
        let result = bank.store("   ", MemoryCategory::Fact, 0.5, vec![]).await;
        assert!(matches!(result, Err(MemoryError::EmptyContent)));
    }

    #[tokio::test]
    async fn test_list_filters_by_category() {
        let (bank, _store) = bank();
        bank.store("f", MemoryCategory::Fact, 0.5, vec![])
            .await
            .unwrap();
        bank.store("p", MemoryCategory::Preference, 0.5, vec![])
            .await
            .unwrap();

        let facts = bank.list(Some(MemoryCategory::Fact), 10).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, MemoryCategory::Fact);
    }

    #[tokio::test]
    async fn test_delete_validates_uuid() {
        let (bank, _store) = bank();
        let result = bank.delete("not-a-uuid").await;
        assert!(matches!(result, Err(MemoryError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_and_is_idempotent() {
        let (bank, _store) = bank();
        let record = bank
            .store("x", MemoryCategory::Fact, 0.5, vec![])
            .await
            .unwrap();

        bank.delete(&record.id).await.unwrap();
        assert!(bank.list(None, 10).await.unwrap().is_empty());
        // Deleting again succeeds
        bank.delete(&record.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_category_roundtrip() {
        for category in MemoryCategory::ALL {
            assert_eq!(MemoryCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(MemoryCategory::parse("opinion"), None);
    }
}
