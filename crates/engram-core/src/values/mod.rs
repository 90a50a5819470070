//! Value store - validated principles derived from clusters
//!
//! A value is a short statement distilled from a stable experience
//! cluster. A candidate is admitted only when its embedding sits
//! within the cluster's own spread: the acceptance threshold is
//! `mean + 0.5 * std` of the member-to-centroid cosine distances.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::clustering::{ClusterError, ClusterInfo, ExperienceClusterer};
use crate::collections::{self, experience_collection, Axis};
use crate::embeddings::{cosine_distance, EmbeddingError, EmbeddingService};
use crate::ids::generate_value_id;
use crate::store::{Distance, FilterValue, Filters, Payload, StoreError, VectorStore};

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Distance statistics from a validation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    /// Candidate-to-centroid cosine distance
    pub distance: f32,
    /// Mean member-to-centroid distance
    pub mean_distance: f32,
    /// Std of member-to-centroid distances
    pub std_distance: f32,
    /// `mean + 0.5 * std`
    pub threshold: f32,
    /// `1 - distance`
    pub similarity: f32,
}

/// Outcome of validating a candidate value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub metrics: ValidationMetrics,
    /// Present when invalid
    pub reason: Option<String>,
}

/// A stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub id: String,
    pub text: String,
    pub cluster_id: String,
    pub axis: Axis,
    pub cluster_size: usize,
    pub created_at: DateTime<Utc>,
    pub metrics: ValidationMetrics,
}

/// One cluster member with its vector, for validation
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMember {
    pub id: String,
    pub weight: f32,
    pub embedding: Vec<f32>,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Value store errors
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("{0}")]
    Validation(String),

    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    #[error("value rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parse a cluster id of the form `{axis}_{label}`.
pub fn parse_cluster_id(cluster_id: &str) -> Result<(Axis, i32), ValueError> {
    let (axis_part, label_part) = cluster_id.rsplit_once('_').ok_or_else(|| {
        ValueError::Validation(format!(
            "Invalid cluster_id format: {cluster_id}. Expected format: 'axis_label' (e.g. 'full_0')"
        ))
    })?;
    let axis = Axis::parse(axis_part).ok_or_else(|| {
        ValueError::Validation(format!("Invalid axis in cluster_id: {cluster_id}"))
    })?;
    let label: i32 = label_part.parse().map_err(|_| {
        ValueError::Validation(format!(
            "Invalid cluster label in cluster_id: {cluster_id}. Label must be an integer"
        ))
    })?;
    Ok((axis, label))
}

/// Distance statistics over member-to-centroid distances.
/// Std is the population standard deviation.
pub fn distance_stats(distances: &[f32]) -> (f32, f32, f32) {
    if distances.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mean = distances.iter().sum::<f32>() / distances.len() as f32;
    let variance =
        distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / distances.len() as f32;
    let std = variance.sqrt();
    (mean, std, mean + 0.5 * std)
}

// ============================================================================
// VALUE STORE
// ============================================================================

/// Validation and storage of values
pub struct ValueStore {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
    clusterer: Arc<ExperienceClusterer>,
    collection_ensured: AtomicBool,
}

impl ValueStore {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn VectorStore>,
        clusterer: Arc<ExperienceClusterer>,
    ) -> Self {
        Self {
            embedder,
            store,
            clusterer,
            collection_ensured: AtomicBool::new(false),
        }
    }

    async fn ensure_collection(&self) -> Result<(), ValueError> {
        if self.collection_ensured.load(Ordering::Acquire) {
            return Ok(());
        }
        match self
            .store
            .create_collection(
                collections::VALUES,
                self.embedder.dimension(),
                Distance::Cosine,
            )
            .await
        {
            Ok(()) => info!(collection = collections::VALUES, "collection created"),
            Err(StoreError::CollectionExists(_)) => {
                debug!(collection = collections::VALUES, "collection exists")
            }
            Err(e) => return Err(e.into()),
        }
        self.collection_ensured.store(true, Ordering::Release);
        Ok(())
    }

    /// Locate a cluster by id, re-deriving the axis clustering.
    pub async fn find_cluster(&self, cluster_id: &str) -> Result<ClusterInfo, ValueError> {
        let (axis, label) = parse_cluster_id(cluster_id)?;
        let clusters = self.clusterer.cluster_axis(axis).await?;
        clusters
            .into_iter()
            .find(|c| c.label == label)
            .ok_or_else(|| ValueError::ClusterNotFound(cluster_id.to_string()))
    }

    /// The members of a cluster with payload weight and vector
    pub async fn get_cluster_members(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<ClusterMember>, ValueError> {
        let cluster = self.find_cluster(cluster_id).await?;
        let collection = experience_collection(cluster.axis);

        let mut members = Vec::with_capacity(cluster.member_ids.len());
        for id in &cluster.member_ids {
            if let Some(record) = self.store.get(&collection, id, true).await? {
                let weight = record
                    .payload
                    .get("confidence_tier")
                    .and_then(|v| v.as_str())
                    .and_then(crate::observation::ConfidenceTier::parse)
                    .map(|t| t.weight())
                    .unwrap_or(0.0);
                members.push(ClusterMember {
                    id: record.id,
                    weight,
                    embedding: record.vector.unwrap_or_default(),
                });
            }
        }
        Ok(members)
    }

    /// Validate a candidate value text against a cluster.
    pub async fn validate_candidate(
        &self,
        text: &str,
        cluster_id: &str,
    ) -> Result<ValidationOutcome, ValueError> {
        let (outcome, _, _) = self.validate_with_embedding(text, cluster_id).await?;
        Ok(outcome)
    }

    async fn validate_with_embedding(
        &self,
        text: &str,
        cluster_id: &str,
    ) -> Result<(ValidationOutcome, Vec<f32>, ClusterInfo), ValueError> {
        if text.trim().is_empty() {
            return Err(ValueError::Validation(
                "Field 'text' cannot be empty".to_string(),
            ));
        }

        let cluster = self.find_cluster(cluster_id).await?;
        let members = self.get_cluster_members(cluster_id).await?;

        let member_distances: Vec<f32> = members
            .iter()
            .map(|m| cosine_distance(&m.embedding, &cluster.centroid))
            .collect();
        let (mean, std, threshold) = distance_stats(&member_distances);

        let candidate = self.embedder.embed(text).await?;
        let distance = cosine_distance(&candidate, &cluster.centroid);

        let metrics = ValidationMetrics {
            distance,
            mean_distance: mean,
            std_distance: std,
            threshold,
            similarity: 1.0 - distance,
        };
        let valid = distance <= threshold;
        let reason = (!valid).then(|| {
            format!(
                "Candidate is too far from centroid (distance {distance:.3} > threshold {threshold:.3})"
            )
        });

        info!(
            cluster_id = %cluster_id,
            valid,
            distance,
            threshold,
            "value candidate validated"
        );
        Ok((ValidationOutcome { valid, metrics, reason }, candidate, cluster))
    }

    /// Validate and, on acceptance, store a value. The candidate is
    /// embedded exactly once; rejection surfaces the distance reason.
    pub async fn store_value(
        &self,
        text: &str,
        cluster_id: &str,
        axis: Axis,
    ) -> Result<ValueRecord, ValueError> {
        let (outcome, embedding, cluster) = self.validate_with_embedding(text, cluster_id).await?;
        if !outcome.valid {
            return Err(ValueError::Rejected(
                outcome
                    .reason
                    .unwrap_or_else(|| "too far from centroid".to_string()),
            ));
        }

        self.ensure_collection().await?;

        let record = ValueRecord {
            id: generate_value_id(axis.as_str(), cluster.label),
            text: text.to_string(),
            cluster_id: cluster_id.to_string(),
            axis,
            cluster_size: cluster.size,
            created_at: Utc::now(),
            metrics: outcome.metrics,
        };

        let mut payload = Payload::new();
        payload.insert("text".into(), json!(record.text));
        payload.insert("cluster_id".into(), json!(record.cluster_id));
        payload.insert("axis".into(), json!(record.axis.as_str()));
        payload.insert("cluster_size".into(), json!(record.cluster_size));
        payload.insert("created_at".into(), json!(record.created_at.to_rfc3339()));
        payload.insert(
            "created_at_ts".into(),
            json!(record.created_at.timestamp() as f64),
        );
        payload.insert(
            "distance_to_centroid".into(),
            json!(record.metrics.distance),
        );
        payload.insert("mean_distance".into(), json!(record.metrics.mean_distance));
        payload.insert("std_distance".into(), json!(record.metrics.std_distance));
        payload.insert("threshold".into(), json!(record.metrics.threshold));
        payload.insert("similarity".into(), json!(record.metrics.similarity));

        self.store
            .upsert(collections::VALUES, &record.id, embedding, payload)
            .await?;

        info!(value_id = %record.id, cluster_id = %cluster_id, "value stored");
        Ok(record)
    }

    /// List stored values, optionally filtered by axis, newest first.
    pub async fn list_values(
        &self,
        axis: Option<Axis>,
        limit: usize,
    ) -> Result<Vec<ValueRecord>, ValueError> {
        self.ensure_collection().await?;

        let filters = axis.map(|a| {
            Filters::from([(
                "axis".to_string(),
                FilterValue::Eq(json!(a.as_str())),
            )])
        });

        let records = self
            .store
            .scroll(collections::VALUES, limit, filters.as_ref(), false)
            .await?;

        let mut values: Vec<ValueRecord> = records
            .iter()
            .filter_map(|r| {
                let p = &r.payload;
                Some(ValueRecord {
                    id: r.id.clone(),
                    text: p.get("text")?.as_str()?.to_string(),
                    cluster_id: p.get("cluster_id")?.as_str()?.to_string(),
                    axis: Axis::parse(p.get("axis")?.as_str()?)?,
                    cluster_size: p.get("cluster_size").and_then(|v| v.as_u64()).unwrap_or(0)
                        as usize,
                    created_at: p
                        .get("created_at")
                        .and_then(|v| v.as_str())
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc))?,
                    metrics: ValidationMetrics {
                        distance: p
                            .get("distance_to_centroid")
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.0) as f32,
                        mean_distance: p
                            .get("mean_distance")
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.0) as f32,
                        std_distance: p
                            .get("std_distance")
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.0) as f32,
                        threshold: p.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.0)
                            as f32,
                        similarity: p.get("similarity").and_then(|v| v.as_f64()).unwrap_or(0.0)
                            as f32,
                    },
                })
            })
            .collect();

        values.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(values)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::normalize;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    /// Embedder mapping known texts to fixed 2D vectors
    struct MapEmbedder {
        vectors: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingService for MapEmbedder {
        fn dimension(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self
                .vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![1.0, 0.0]))
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    fn tier_payload(tier: &str) -> Payload {
        json!({"confidence_tier": tier}).as_object().unwrap().clone()
    }

    /// 25 points: dense east group (12), dense north group (11), 2
    /// outliers. Mirrors the clusterer fixture so label 0 = east.
    async fn seeded(embedder: MapEmbedder) -> (ValueStore, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("ghap_full", 2, Distance::Cosine)
            .await
            .unwrap();

        for i in 0..12 {
            let mut v = vec![1.0, 0.01 * (i as f32 + 1.0)];
            normalize(&mut v);
            store
                .upsert("ghap_full", &format!("east_{i}"), v, tier_payload("gold"))
                .await
                .unwrap();
        }
        for i in 0..11 {
            let mut v = vec![0.01 * (i as f32 + 1.0), 1.0];
            normalize(&mut v);
            store
                .upsert("ghap_full", &format!("north_{i}"), v, tier_payload("bronze"))
                .await
                .unwrap();
        }
        for (i, v) in [vec![-1.0, 0.0], vec![-0.7, -0.7]].into_iter().enumerate() {
            let mut v = v;
            normalize(&mut v);
            store
                .upsert("ghap_full", &format!("outlier_{i}"), v, tier_payload("silver"))
                .await
                .unwrap();
        }

        let clusterer = Arc::new(ExperienceClusterer::new(store.clone()));
        (
            ValueStore::new(Arc::new(embedder), store.clone(), clusterer),
            store,
        )
    }

    #[test]
    fn test_parse_cluster_id() {
        assert_eq!(parse_cluster_id("full_0").unwrap(), (Axis::Full, 0));
        assert_eq!(
            parse_cluster_id("root_cause_3").unwrap(),
            (Axis::RootCause, 3)
        );
        assert!(matches!(
            parse_cluster_id("nounderscore"),
            Err(ValueError::Validation(_))
        ));
        assert!(matches!(
            parse_cluster_id("bogus_0"),
            Err(ValueError::Validation(_))
        ));
        assert!(matches!(
            parse_cluster_id("full_x"),
            Err(ValueError::Validation(_))
        ));
    }

    #[test]
    fn test_distance_stats_threshold() {
        // mean 0.5, std 0.1 -> threshold 0.55
        let distances = vec![0.4, 0.5, 0.6];
        let (mean, std, threshold) = distance_stats(&distances);
        assert!((mean - 0.5).abs() < 0.001);
        assert!((std - 0.0816).abs() < 0.001);
        assert!((threshold - (mean + 0.5 * std)).abs() < 0.0001);
    }

    #[test]
    fn test_distance_stats_acceptance_boundary() {
        // The S4 shape: mean 0.5, std ~0.1 -> threshold 0.55;
        // a candidate at 0.4 passes, one at 0.7 fails.
        let distances = vec![0.4, 0.4, 0.6, 0.6];
        let (mean, std, threshold) = distance_stats(&distances);
        assert!((mean - 0.5).abs() < 0.001);
        assert!((std - 0.1).abs() < 0.001);
        assert!(0.4 <= threshold);
        assert!(0.7 > threshold);
    }

    #[tokio::test]
    async fn test_find_cluster_and_members() {
        let (value_store, _store) = seeded(MapEmbedder {
            vectors: HashMap::new(),
        })
        .await;

        let cluster = value_store.find_cluster("full_0").await.unwrap();
        assert_eq!(cluster.size, 12);

        let members = value_store.get_cluster_members("full_0").await.unwrap();
        assert_eq!(members.len(), 12);
        assert!(members.iter().all(|m| m.weight == 1.0));
        assert!(members.iter().all(|m| m.embedding.len() == 2));
    }

    #[tokio::test]
    async fn test_missing_cluster_label() {
        let (value_store, _store) = seeded(MapEmbedder {
            vectors: HashMap::new(),
        })
        .await;
        let result = value_store.find_cluster("full_42").await;
        assert!(matches!(result, Err(ValueError::ClusterNotFound(_))));
    }

    #[tokio::test]
    async fn test_validate_accepts_near_candidate() {
        let mut vectors = HashMap::new();
        let mut near = vec![1.0, 0.05];
        normalize(&mut near);
        vectors.insert("stay methodical".to_string(), near);
        let (value_store, _store) = seeded(MapEmbedder { vectors }).await;

        let outcome = value_store
            .validate_candidate("stay methodical", "full_0")
            .await
            .unwrap();
        assert!(outcome.valid, "metrics: {:?}", outcome.metrics);
        assert!(outcome.reason.is_none());
        assert!((outcome.metrics.similarity - (1.0 - outcome.metrics.distance)).abs() < 0.0001);
    }

    #[tokio::test]
    async fn test_validate_rejects_far_candidate() {
        let mut vectors = HashMap::new();
        vectors.insert("something else".to_string(), vec![0.0, 1.0]);
        let (value_store, _store) = seeded(MapEmbedder { vectors }).await;

        let outcome = value_store
            .validate_candidate("something else", "full_0")
            .await
            .unwrap();
        assert!(!outcome.valid);
        assert!(outcome
            .reason
            .as_deref()
            .unwrap()
            .contains("too far from centroid"));
    }

    #[tokio::test]
    async fn test_validate_empty_text_rejected() {
        let (value_store, _store) = seeded(MapEmbedder {
            vectors: HashMap::new(),
        })
        .await;
        let result = value_store.validate_candidate("  ", "full_0").await;
        assert!(matches!(result, Err(ValueError::Validation(_))));
    }

    #[tokio::test]
    async fn test_store_value_roundtrip_and_listing() {
        let mut vectors = HashMap::new();
        let mut near = vec![1.0, 0.05];
        normalize(&mut near);
        vectors.insert("verify assumptions early".to_string(), near);
        let (value_store, _store) = seeded(MapEmbedder { vectors }).await;

        let record = value_store
            .store_value("verify assumptions early", "full_0", Axis::Full)
            .await
            .unwrap();
        assert!(record.id.starts_with("value_full_0_"));
        assert_eq!(record.cluster_size, 12);

        let listed = value_store.list_values(Some(Axis::Full), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "verify assumptions early");
        assert_eq!(listed[0].cluster_id, "full_0");

        // Invariant: anything stored validates against its cluster
        let recheck = value_store
            .validate_candidate(&listed[0].text, &listed[0].cluster_id)
            .await
            .unwrap();
        assert!(recheck.valid);

        // Axis filter excludes other axes
        let other = value_store
            .list_values(Some(Axis::Strategy), 10)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_store_value_rejected_far_candidate() {
        let mut vectors = HashMap::new();
        vectors.insert("off topic".to_string(), vec![-1.0, 0.0]);
        let (value_store, _store) = seeded(MapEmbedder { vectors }).await;

        let result = value_store
            .store_value("off topic", "full_0", Axis::Full)
            .await;
        assert!(matches!(result, Err(ValueError::Rejected(_))));

        // Nothing stored
        assert!(value_store.list_values(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_values_sorted_newest_first() {
        let mut vectors = HashMap::new();
        let mut near = vec![1.0, 0.05];
        normalize(&mut near);
        vectors.insert("first".to_string(), near.clone());
        vectors.insert("second".to_string(), near);
        let (value_store, _store) = seeded(MapEmbedder { vectors }).await;

        value_store
            .store_value("first", "full_0", Axis::Full)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        value_store
            .store_value("second", "full_0", Axis::Full)
            .await
            .unwrap();

        let listed = value_store.list_values(None, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
    }
}
