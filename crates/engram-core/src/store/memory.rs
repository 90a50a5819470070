//! In-memory vector store
//!
//! Reference implementation of [`VectorStore`] for tests and
//! standalone deployments. Brute-force cosine scan, filter-first,
//! stable ordering with insertion-order tiebreak. Not durable.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embeddings::cosine_similarity;

use super::{
    matches_filters, CollectionInfo, Distance, Filters, Payload, StoreError, StoreResult,
    StoredRecord, VectorStore,
};

struct Row {
    id: String,
    vector: Vec<f32>,
    payload: Payload,
}

struct Collection {
    dimension: usize,
    // Insertion order is the tiebreak for equal scores; upserts keep
    // the row's original position (last-writer-wins on content only).
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

impl Collection {
    fn matching<'a>(&'a self, filters: Option<&'a Filters>) -> impl Iterator<Item = &'a Row> {
        self.rows
            .iter()
            .filter(move |row| filters.is_none_or(|f| matches_filters(&row.payload, f)))
    }
}

/// In-memory [`VectorStore`] implementation
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        _distance: Distance,
    ) -> StoreResult<()> {
        if dimension == 0 {
            return Err(StoreError::InvalidDimension(dimension));
        }
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimension,
                rows: Vec::new(),
                index: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Payload,
    ) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        if vector.len() != coll.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: coll.dimension,
                got: vector.len(),
            });
        }

        match coll.index.get(id) {
            Some(&pos) => {
                coll.rows[pos].vector = vector;
                coll.rows[pos].payload = payload;
            }
            None => {
                coll.index.insert(id.to_string(), coll.rows.len());
                coll.rows.push(Row {
                    id: id.to_string(),
                    vector,
                    payload,
                });
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> StoreResult<Vec<StoredRecord>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        let mut results: Vec<StoredRecord> = coll
            .matching(filters)
            .map(|row| StoredRecord {
                id: row.id.clone(),
                score: cosine_similarity(query, &row.vector),
                payload: row.payload.clone(),
                vector: None,
            })
            .collect();

        // Stable sort keeps insertion order on score ties
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    async fn scroll(
        &self,
        collection: &str,
        limit: usize,
        filters: Option<&Filters>,
        with_vectors: bool,
    ) -> StoreResult<Vec<StoredRecord>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        Ok(coll
            .matching(filters)
            .take(limit)
            .map(|row| StoredRecord {
                id: row.id.clone(),
                score: 0.0,
                payload: row.payload.clone(),
                vector: with_vectors.then(|| row.vector.clone()),
            })
            .collect())
    }

    async fn count(&self, collection: &str, filters: Option<&Filters>) -> StoreResult<usize> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.matching(filters).count())
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
        with_vector: bool,
    ) -> StoreResult<Option<StoredRecord>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        Ok(coll.index.get(id).map(|&pos| {
            let row = &coll.rows[pos];
            StoredRecord {
                id: row.id.clone(),
                score: 0.0,
                payload: row.payload.clone(),
                vector: with_vector.then(|| row.vector.clone()),
            }
        }))
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        if let Some(pos) = coll.index.remove(id) {
            coll.rows.remove(pos);
            // Reindex rows shifted by the removal
            for (i, row) in coll.rows.iter().enumerate().skip(pos) {
                coll.index.insert(row.id.clone(), i);
            }
        }
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> StoreResult<Option<CollectionInfo>> {
        let collections = self.collections.read().await;
        Ok(collections.get(name).map(|coll| CollectionInfo {
            name: name.to_string(),
            dimension: coll.dimension,
            vector_count: coll.rows.len(),
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================
