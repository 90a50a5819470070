//! Unified query surface
//!
//! Three modes over every collection:
//! - `semantic`: embed the query, vector similarity search
//! - `keyword`: case-insensitive text matching on payload fields;
//!   the embedding model is never invoked
//! - `hybrid`: semantic with an additive boost for keyword matches
//!
//! Empty or whitespace-only queries return an empty list in every
//! mode.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde_json::Value;

use crate::collections::{self, experience_collection, Axis};
use crate::embeddings::{EmbeddingError, EmbeddingService};
use crate::memories::MemoryCategory;
use crate::observation::{Domain, OutcomeStatus, Strategy};
use crate::store::{FilterValue, Filters, StoreError, StoredRecord, VectorStore};

use super::results::{CodeResult, CommitResult, ExperienceResult, MemoryResult, ValueResult};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Cap on rows scanned by keyword mode; bounds memory for collection
/// scans.
const KEYWORD_SCROLL_LIMIT: usize = 1000;

/// Additive boost applied to a semantic score when the same id also
/// matched by keyword. The boosted score is capped at 1.0.
const HYBRID_KEYWORD_BOOST: f32 = 0.15;

/// Query embeddings cached per searcher instance
const QUERY_CACHE_SIZE: usize = 128;

/// Payload fields examined by keyword matching, per collection
fn text_fields(collection: &str) -> &'static [&'static str] {
    const EXPERIENCE_FIELDS: &[&str] =
        &["goal", "hypothesis", "action", "prediction", "outcome_result"];
    const EXPERIENCE_SURPRISE_FIELDS: &[&str] = &[
        "goal",
        "hypothesis",
        "action",
        "prediction",
        "outcome_result",
        "surprise",
    ];
    match collection {
        collections::MEMORIES => &["content"],
        collections::CODE => &["code", "qualified_name", "docstring"],
        collections::COMMITS => &["message"],
        collections::VALUES => &["text"],
        "ghap_surprise" => EXPERIENCE_SURPRISE_FIELDS,
        c if c.starts_with(collections::EXPERIENCE_PREFIX) => EXPERIENCE_FIELDS,
        _ => &[],
    }
}

// ============================================================================
// SEARCH MODE
// ============================================================================

/// Retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub const ALL: [SearchMode; 3] = [SearchMode::Semantic, SearchMode::Keyword, SearchMode::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }

    /// Parse a mode name; unknown names are a validation error.
    pub fn parse(s: &str) -> Result<Self, SearchError> {
        Self::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| SearchError::InvalidMode(s.to_string()))
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.as_str()).collect()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Search errors
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid search mode '{0}'. Must be one of: 'semantic', 'keyword', 'hybrid'")]
    InvalidMode(String),

    #[error("invalid axis '{0}'. Valid axes: full, strategy, surprise, root_cause")]
    InvalidAxis(String),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SearchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CollectionNotFound(name) => SearchError::CollectionNotFound(name),
            other => SearchError::Store(other),
        }
    }
}

// ============================================================================
// FILTER BUILDING
// ============================================================================

/// One filter field under construction; `None` values are dropped,
/// datetimes convert to `{field: {$gte: epoch_seconds}}`.
fn push_eq(filters: &mut Filters, field: &str, value: Option<&str>) {
    if let Some(value) = value {
        filters.insert(field.to_string(), FilterValue::Eq(Value::from(value)));
    }
}

fn push_since(filters: &mut Filters, field: &str, since: Option<DateTime<Utc>>) {
    if let Some(since) = since {
        filters.insert(
            field.to_string(),
            FilterValue::Gte(Value::from(since.timestamp() as f64)),
        );
    }
}

fn finish(filters: Filters) -> Option<Filters> {
    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

// ============================================================================
// KEYWORD SCORING
// ============================================================================

/// Keyword relevance of one payload against a query, in [0, 1].
///
/// - exact full-field match: 1.0
/// - full-query substring match: 0.6 + 0.4 * |q| / |field|, below 1.0
/// - otherwise: 0.3 * (matched terms / query terms)
///
/// The row's score is the maximum across its text fields.
pub fn keyword_match_score(
    query: &str,
    payload: &crate::store::Payload,
    fields: &[&str],
) -> f32 {
    let query_lower = query.to_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();

    let mut best: f32 = 0.0;
    for field in fields {
        let Some(value) = payload.get(*field).and_then(|v| v.as_str()) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let value_lower = value.to_lowercase();

        if query_lower == value_lower {
            return 1.0;
        }

        if value_lower.contains(&query_lower) {
            let ratio = query_lower.len() as f32 / value_lower.len().max(1) as f32;
            best = best.max(0.6 + 0.4 * ratio);
            continue;
        }

        if !query_terms.is_empty() {
            let matched = query_terms
                .iter()
                .filter(|t| value_lower.contains(**t))
                .count();
            if matched > 0 {
                best = best.max(0.3 * matched as f32 / query_terms.len() as f32);
            }
        }
    }
    best
}

// ============================================================================
// SEARCHER
// ============================================================================

/// Unified query interface across all vector collections
pub struct Searcher {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Searcher {
    pub fn new(embedder: Arc<dyn EmbeddingService>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Ok(vector.clone());
            }
        }
        let vector = self.embedder.embed(query).await?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    async fn semantic(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<StoredRecord>, SearchError> {
        let vector = self.embed_query(query).await?;
        Ok(self.store.search(collection, &vector, limit, filters).await?)
    }

    async fn keyword(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<StoredRecord>, SearchError> {
        let candidates = self
            .store
            .scroll(collection, KEYWORD_SCROLL_LIMIT, filters, false)
            .await?;

        let fields = text_fields(collection);
        let mut scored: Vec<StoredRecord> = candidates
            .into_iter()
            .filter_map(|mut record| {
                let score = keyword_match_score(query, &record.payload, fields);
                if score > 0.0 {
                    record.score = score;
                    Some(record)
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn hybrid(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<StoredRecord>, SearchError> {
        let semantic = self.semantic(collection, query, limit, filters).await?;
        let keyword = self.keyword(collection, query, limit, filters).await?;

        let keyword_scores: std::collections::HashMap<&str, f32> =
            keyword.iter().map(|r| (r.id.as_str(), r.score)).collect();

        let mut merged: Vec<StoredRecord> = Vec::with_capacity(semantic.len() + keyword.len());
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        for mut record in semantic {
            if keyword_scores.contains_key(record.id.as_str()) {
                record.score = (record.score + HYBRID_KEYWORD_BOOST).min(1.0);
            }
            seen.insert(record.id.clone());
            merged.push(record);
        }
        for record in keyword {
            if !seen.contains(&record.id) {
                merged.push(record);
            }
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(limit);
        Ok(merged)
    }

    async fn dispatch(
        &self,
        mode: SearchMode,
        collection: &str,
        query: &str,
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<StoredRecord>, SearchError> {
        match mode {
            SearchMode::Semantic => self.semantic(collection, query, limit, filters).await,
            SearchMode::Keyword => self.keyword(collection, query, limit, filters).await,
            SearchMode::Hybrid => self.hybrid(collection, query, limit, filters).await,
        }
    }
}

// ============================================================================
// CAPABILITY TRAIT
// ============================================================================

/// The search operations the context assembler depends on. The
/// concrete [`Searcher`] implements it; consumers hold
/// `Arc<dyn SearcherOps>`.
#[async_trait]
pub trait SearcherOps: Send + Sync {
    async fn search_memories(
        &self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<MemoryResult>, SearchError>;

    async fn search_code(
        &self,
        query: &str,
        project: Option<&str>,
        language: Option<&str>,
        unit_type: Option<&str>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<CodeResult>, SearchError>;

    async fn search_experiences(
        &self,
        query: &str,
        axis: Axis,
        domain: Option<Domain>,
        strategy: Option<Strategy>,
        outcome: Option<OutcomeStatus>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<ExperienceResult>, SearchError>;

    async fn search_values(
        &self,
        query: &str,
        axis: Option<Axis>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<ValueResult>, SearchError>;

    async fn search_commits(
        &self,
        query: &str,
        author: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<CommitResult>, SearchError>;
}

#[async_trait]
impl SearcherOps for Searcher {
    async fn search_memories(
        &self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<MemoryResult>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let mut filters = Filters::new();
        push_eq(&mut filters, "category", category.map(|c| c.as_str()));

        let records = self
            .dispatch(
                mode,
                collections::MEMORIES,
                query,
                limit,
                finish(filters).as_ref(),
            )
            .await?;
        Ok(records.iter().map(MemoryResult::from_record).collect())
    }

    async fn search_code(
        &self,
        query: &str,
        project: Option<&str>,
        language: Option<&str>,
        unit_type: Option<&str>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<CodeResult>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let mut filters = Filters::new();
        push_eq(&mut filters, "project", project);
        push_eq(&mut filters, "language", language);
        push_eq(&mut filters, "unit_type", unit_type);

        let records = self
            .dispatch(mode, collections::CODE, query, limit, finish(filters).as_ref())
            .await?;
        Ok(records.iter().map(CodeResult::from_record).collect())
    }

    async fn search_experiences(
        &self,
        query: &str,
        axis: Axis,
        domain: Option<Domain>,
        strategy: Option<Strategy>,
        outcome: Option<OutcomeStatus>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<ExperienceResult>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let collection = experience_collection(axis);
        let mut filters = Filters::new();
        push_eq(&mut filters, "domain", domain.map(|d| d.as_str()));
        push_eq(&mut filters, "strategy", strategy.map(|s| s.as_str()));
        push_eq(&mut filters, "outcome_status", outcome.map(|o| o.as_str()));

        let records = self
            .dispatch(mode, &collection, query, limit, finish(filters).as_ref())
            .await?;
        Ok(records
            .iter()
            .map(|r| ExperienceResult::from_record(r, axis))
            .collect())
    }

    async fn search_values(
        &self,
        query: &str,
        axis: Option<Axis>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<ValueResult>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let mut filters = Filters::new();
        push_eq(&mut filters, "axis", axis.map(|a| a.as_str()));

        let records = self
            .dispatch(
                mode,
                collections::VALUES,
                query,
                limit,
                finish(filters).as_ref(),
            )
            .await?;
        Ok(records.iter().map(ValueResult::from_record).collect())
    }

    async fn search_commits(
        &self,
        query: &str,
        author: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<CommitResult>, SearchError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let mut filters = Filters::new();
        push_eq(&mut filters, "author", author);
        push_since(&mut filters, "timestamp", since);

        let records = self
            .dispatch(
                mode,
                collections::COMMITS,
                query,
                limit,
                finish(filters).as_ref(),
            )
            .await?;
        Ok(records.iter().map(CommitResult::from_record).collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
