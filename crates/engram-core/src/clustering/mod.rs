//! Density-based clustering over experience axes
//!
//! Clusters the L2-normalised vectors of one axis collection with a
//! mutual-reachability density method: each point's core distance is
//! the distance to its `min_samples`-th nearest neighbour, pairwise
//! distances are lifted to mutual reachability, a minimum spanning
//! tree is built, and edges beyond half a standard deviation above
//! the mean edge weight are cut. Components smaller than
//! `min_cluster_size` become noise (label -1).
//!
//! The computation is read-only over the store; labels are derived on
//! each call and never written back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collections::{experience_collection, Axis};
use crate::embeddings::{centroid, cosine_distance, normalize};
use crate::observation::ConfidenceTier;
use crate::store::{StoreError, VectorStore};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Clustering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Smallest component that counts as a cluster
    pub min_cluster_size: usize,
    /// Neighbour rank used for the core distance
    pub min_samples: usize,
    /// Minimum stored experiences required before clustering an axis
    pub min_experiences: usize,
    /// Cap on points pulled from the store per axis
    pub max_points: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: 3,
            min_experiences: 20,
            max_points: 10_000,
        }
    }
}

// ============================================================================
// CLUSTER INFO
// ============================================================================

/// One discovered cluster (or the noise bucket, label -1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// `{axis}_{label}`
    pub cluster_id: String,
    pub axis: Axis,
    pub label: i32,
    /// Arithmetic mean of the member vectors
    pub centroid: Vec<f32>,
    pub member_ids: Vec<String>,
    pub size: usize,
    /// Mean confidence weight of the members
    pub avg_weight: f32,
}

impl ClusterInfo {
    pub fn is_noise(&self) -> bool {
        self.label == -1
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Clustering errors
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("not enough experiences for clustering. Found {found}, need at least {required}.")]
    InsufficientData { found: usize, required: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// CLUSTERER
// ============================================================================

/// Density clusterer over one experience axis
pub struct ExperienceClusterer {
    store: Arc<dyn VectorStore>,
    config: ClusteringConfig,
}

impl ExperienceClusterer {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self::with_config(store, ClusteringConfig::default())
    }

    pub fn with_config(store: Arc<dyn VectorStore>, config: ClusteringConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Number of stored experiences on an axis. An axis whose
    /// collection was never created counts as zero.
    pub async fn count_experiences(&self, axis: Axis) -> Result<usize, ClusterError> {
        match self.store.count(&experience_collection(axis), None).await {
            Ok(count) => Ok(count),
            Err(StoreError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Cluster one axis. Returns discovered clusters plus, when any
    /// points were left unassigned, a trailing noise bucket with
    /// label -1. Fails with insufficient-data below the experience
    /// threshold.
    pub async fn cluster_axis(&self, axis: Axis) -> Result<Vec<ClusterInfo>, ClusterError> {
        let rows = match self
            .store
            .scroll(&experience_collection(axis), self.config.max_points, None, true)
            .await
        {
            Ok(rows) => rows,
            Err(StoreError::CollectionNotFound(_)) => vec![],
            Err(e) => return Err(e.into()),
        };

        if rows.len() < self.config.min_experiences {
            return Err(ClusterError::InsufficientData {
                found: rows.len(),
                required: self.config.min_experiences,
            });
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let weights: Vec<f32> = rows
            .iter()
            .map(|r| {
                r.payload
                    .get("confidence_tier")
                    .and_then(|v| v.as_str())
                    .and_then(ConfidenceTier::parse)
                    .map(|t| t.weight())
                    .unwrap_or(0.0)
            })
            .collect();
        let mut vectors: Vec<Vec<f32>> = rows
            .into_iter()
            .map(|r| r.vector.unwrap_or_default())
            .collect();
        for v in &mut vectors {
            normalize(v);
        }

        let labels = density_labels(
            &vectors,
            self.config.min_samples,
            self.config.min_cluster_size,
        );

        let max_label = labels.iter().copied().max().unwrap_or(-1);
        let mut clusters = Vec::new();
        for label in (0..=max_label).chain(std::iter::once(-1)) {
            let member_idx: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == label)
                .map(|(i, _)| i)
                .collect();
            if member_idx.is_empty() {
                continue;
            }

            let member_vectors: Vec<Vec<f32>> =
                member_idx.iter().map(|&i| vectors[i].clone()).collect();
            let avg_weight =
                member_idx.iter().map(|&i| weights[i]).sum::<f32>() / member_idx.len() as f32;

            clusters.push(ClusterInfo {
                cluster_id: format!("{}_{label}", axis.as_str()),
                axis,
                label,
                centroid: centroid(&member_vectors),
                member_ids: member_idx.iter().map(|&i| ids[i].clone()).collect(),
                size: member_idx.len(),
                avg_weight,
            });
        }

        info!(
            axis = %axis,
            clusters = clusters.iter().filter(|c| !c.is_noise()).count(),
            noise = clusters
                .iter()
                .find(|c| c.is_noise())
                .map(|c| c.size)
                .unwrap_or(0),
            "axis clustered"
        );
        Ok(clusters)
    }
}

// ============================================================================
// DENSITY LABELING
// ============================================================================

/// Assign a cluster label to every point; -1 is noise.
///
/// Labels are deterministic: clusters are numbered by descending size,
/// ties broken by the smallest member index.
fn density_labels(vectors: &[Vec<f32>], min_samples: usize, min_cluster_size: usize) -> Vec<i32> {
    let n = vectors.len();
    if n == 0 {
        return vec![];
    }

    // Pairwise cosine distances
    let mut dist = vec![vec![0.0_f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = cosine_distance(&vectors[i], &vectors[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    // Core distance: distance to the min_samples-th nearest neighbour
    let core: Vec<f32> = (0..n)
        .map(|i| {
            let mut neighbours: Vec<f32> = (0..n).filter(|&j| j != i).map(|j| dist[i][j]).collect();
            neighbours.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let k = min_samples.min(neighbours.len());
            if k == 0 {
                0.0
            } else {
                neighbours[k - 1]
            }
        })
        .collect();

    // Minimum spanning tree over mutual reachability (Prim's)
    let reach = |i: usize, j: usize| dist[i][j].max(core[i]).max(core[j]);
    let mut in_tree = vec![false; n];
    let mut best = vec![f32::MAX; n];
    let mut best_from = vec![0_usize; n];
    let mut edges: Vec<(f32, usize, usize)> = Vec::with_capacity(n.saturating_sub(1));

    in_tree[0] = true;
    for j in 1..n {
        best[j] = reach(0, j);
        best_from[j] = 0;
    }
    for _ in 1..n {
        let mut next = None;
        let mut next_cost = f32::MAX;
        for j in 0..n {
            if !in_tree[j] && best[j] < next_cost {
                next = Some(j);
                next_cost = best[j];
            }
        }
        let Some(next) = next else { break };
        in_tree[next] = true;
        edges.push((next_cost, best_from[next], next));
        for j in 0..n {
            if !in_tree[j] {
                let cost = reach(next, j);
                if cost < best[j] {
                    best[j] = cost;
                    best_from[j] = next;
                }
            }
        }
    }

    // Cut edges beyond mean + half a std of the MST edge weights
    let mean = edges.iter().map(|e| e.0).sum::<f32>() / edges.len().max(1) as f32;
    let variance =
        edges.iter().map(|e| (e.0 - mean).powi(2)).sum::<f32>() / edges.len().max(1) as f32;
    let threshold = mean + 0.5 * variance.sqrt();
    debug!(edge_count = edges.len(), mean, threshold, "mst cut");

    // Union-find over the surviving edges
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    for &(w, a, b) in &edges {
        if w <= threshold {
            let ra = find(&mut parent, a);
            let rb = find(&mut parent, b);
            if ra != rb {
                parent[ra] = rb;
            }
        }
    }

    // Collect components
    let mut components: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }

    // Deterministic labels: by descending size, then smallest member
    let mut ordered: Vec<Vec<usize>> = components
        .into_values()
        .filter(|members| members.len() >= min_cluster_size)
        .collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

    let mut labels = vec![-1_i32; n];
    for (label, members) in ordered.into_iter().enumerate() {
        for i in members {
            labels[i] = label as i32;
        }
    }
    labels
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Distance, InMemoryStore, Payload};
    use serde_json::json;

    fn perturbed(base: &[f32; 2], i: usize) -> Vec<f32> {
        // Small deterministic perturbation keeps points inside one
        // density region
        let delta = 0.01 * (i as f32 + 1.0);
        let mut v = vec![base[0] + delta * base[1].signum().max(0.0), base[1] + delta];
        normalize(&mut v);
        v
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("ghap_full", 2, Distance::Cosine)
            .await
            .unwrap();

        // Two dense groups plus two far outliers: 25 points total
        for i in 0..12 {
            store
                .upsert(
                    "ghap_full",
                    &format!("east_{i}"),
                    perturbed(&[1.0, 0.0], i),
                    payload_with_tier("gold"),
                )
                .await
                .unwrap();
        }
        for i in 0..11 {
            store
                .upsert(
                    "ghap_full",
                    &format!("north_{i}"),
                    perturbed(&[0.0, 1.0], i),
                    payload_with_tier("bronze"),
                )
                .await
                .unwrap();
        }
        for (i, v) in [vec![-1.0, 0.0], vec![-0.7, -0.7]].into_iter().enumerate() {
            let mut v = v;
            normalize(&mut v);
            store
                .upsert(
                    "ghap_full",
                    &format!("outlier_{i}"),
                    v,
                    payload_with_tier("silver"),
                )
                .await
                .unwrap();
        }
        store
    }

    fn payload_with_tier(tier: &str) -> Payload {
        json!({"confidence_tier": tier})
            .as_object()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_insufficient_data() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("ghap_full", 2, Distance::Cosine)
            .await
            .unwrap();
        for i in 0..19 {
            store
                .upsert(
                    "ghap_full",
                    &format!("p{i}"),
                    vec![1.0, 0.0],
                    Payload::new(),
                )
                .await
                .unwrap();
        }

        let clusterer = ExperienceClusterer::new(store);
        let result = clusterer.cluster_axis(Axis::Full).await;
        assert!(matches!(
            result,
            Err(ClusterError::InsufficientData {
                found: 19,
                required: 20
            })
        ));
    }

    #[tokio::test]
    async fn test_two_dense_groups_form_two_clusters() {
        let clusterer = ExperienceClusterer::new(seeded_store().await);
        let clusters = clusterer.cluster_axis(Axis::Full).await.unwrap();

        let real: Vec<&ClusterInfo> = clusters.iter().filter(|c| !c.is_noise()).collect();
        assert_eq!(real.len(), 2, "clusters: {clusters:#?}");

        // Label 0 is the larger group
        assert_eq!(real[0].label, 0);
        assert_eq!(real[0].size, 12);
        assert_eq!(real[1].size, 11);
        assert!(real[0].member_ids.iter().all(|id| id.starts_with("east_")));
        assert!(real[1].member_ids.iter().all(|id| id.starts_with("north_")));

        // Outliers land in the noise bucket
        let noise = clusters.iter().find(|c| c.is_noise()).unwrap();
        assert_eq!(noise.size, 2);
    }

    #[tokio::test]
    async fn test_cluster_weights_and_centroid() {
        let clusterer = ExperienceClusterer::new(seeded_store().await);
        let clusters = clusterer.cluster_axis(Axis::Full).await.unwrap();
        let east = clusters
            .iter()
            .find(|c| c.member_ids[0].starts_with("east_"))
            .unwrap();

        // All-gold members average 1.0
        assert!((east.avg_weight - 1.0).abs() < 0.0001);

        // Centroid points roughly east
        assert!(east.centroid[0] > 0.9);
        assert!(east.centroid[1] < 0.2);
        assert_eq!(east.cluster_id, "full_0");
    }

    #[tokio::test]
    async fn test_count_experiences() {
        let clusterer = ExperienceClusterer::new(seeded_store().await);
        assert_eq!(clusterer.count_experiences(Axis::Full).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_labels_are_deterministic() {
        let store = seeded_store().await;
        let clusterer = ExperienceClusterer::new(store);
        let first = clusterer.cluster_axis(Axis::Full).await.unwrap();
        let second = clusterer.cluster_axis(Axis::Full).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_density_labels_identical_points_single_cluster() {
        let vectors = vec![vec![1.0, 0.0]; 10];
        let labels = density_labels(&vectors, 3, 5);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_density_labels_small_components_are_noise() {
        // One dense group of 6 plus 2 isolated points
        let mut vectors: Vec<Vec<f32>> = (0..6)
            .map(|i| {
                let mut v = vec![1.0, 0.001 * i as f32];
                normalize(&mut v);
                v
            })
            .collect();
        vectors.push(vec![0.0, 1.0]);
        vectors.push(vec![-1.0, 0.0]);

        let labels = density_labels(&vectors, 3, 5);
        assert!(labels[..6].iter().all(|&l| l == 0));
        assert_eq!(labels[6], -1);
        assert_eq!(labels[7], -1);
    }
}
